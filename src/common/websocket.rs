//! Thread that keeps a unit inside its session's websocket room.
//!
//! Outbound payloads arrive on an mpsc channel, inbound ones are routed to
//! topic subscribers.  Each payload travels inside a small envelope,
//! `{"topic": .., "body": ..}`, so several topics can share one room.  The
//! thread owns the connection state everyone else reads, and it reconnects
//! forever (every two seconds) until told to stop.
use log::{debug, info, warn};
use serde_json::{json, Value};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc, Mutex, PoisonError,
    },
    thread::sleep,
    time::Duration,
};

use crate::common::{box_error::BoxError, room::Room};
use crate::sync::sync_channel::{ConnectionState, TopicRouter};

pub const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// What the websocket thread shares with the channel that spawned it
#[derive(Clone)]
pub struct RoomLink {
    pub state: Arc<Mutex<ConnectionState>>,
    pub router: Arc<Mutex<TopicRouter>>,
    pub running: Arc<AtomicBool>,
}

impl RoomLink {
    pub fn new() -> RoomLink {
        RoomLink {
            state: Arc::new(Mutex::new(ConnectionState::Connecting)),
            router: Arc::new(Mutex::new(TopicRouter::new())),
            running: Arc::new(AtomicBool::new(true)),
        }
    }
    pub fn set_state(&self, state: ConnectionState) {
        let mut current = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *current != state {
            info!("room connection: {} -> {}", *current, state);
            *current = state;
        }
    }
    pub fn get_state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Default for RoomLink {
    fn default() -> Self {
        RoomLink::new()
    }
}

/// wrap a payload for the room
pub fn envelope(topic: &str, body: &str) -> Value {
    json!({ "topic": topic, "body": body })
}

/// unwrap what somebody said in the room into (topic, body)
pub fn open_envelope(said: &Value) -> Option<(String, String)> {
    let inner: Value = serde_json::from_str(said["message"].as_str()?).ok()?;
    let topic = inner["topic"].as_str()?;
    let body = inner["body"].as_str()?;
    Some((topic.to_string(), body.to_string()))
}

/// Run until `link.running` goes false.  `room_name` picks the session room
/// on the server at `ws_url`.
pub fn websocket_thread(
    room_name: &str,
    ws_url: &str,
    link: RoomLink,
    outbound_rx: mpsc::Receiver<Value>,
) -> Result<(), BoxError> {
    info!("websocket_thread - room: {}, ws_url: {}", room_name, ws_url);
    let mut ever_connected = false;
    while link.is_running() {
        link.set_state(if ever_connected {
            ConnectionState::Reconnecting
        } else {
            ConnectionState::Connecting
        });
        match Room::new(room_name, ws_url) {
            Ok(mut room) => {
                if let Err(e) = room.join_room() {
                    warn!("cannot join room {}: {}", room_name, e);
                    link.set_state(ConnectionState::Disconnected);
                    nap(&link, RECONNECT_DELAY);
                    continue;
                }
                // anything queued while we were away is stale now
                let dropped = outbound_rx.try_iter().count();
                if dropped > 0 {
                    debug!("dropped {} stale outbound messages", dropped);
                }
                ever_connected = true;
                link.set_state(ConnectionState::Connected);
                while room.is_connected() && link.is_running() {
                    match room.get_message() {
                        Ok(Some(said)) => match open_envelope(&said) {
                            Some((topic, body)) => {
                                link.router
                                    .lock()
                                    .unwrap_or_else(PoisonError::into_inner)
                                    .route(&topic, &body);
                            }
                            None => debug!("ignoring room chatter: {}", said),
                        },
                        Ok(None) => {}
                        Err(e) => {
                            warn!("room read failed: {}", e);
                            room.reset();
                        }
                    }
                    for msg in outbound_rx.try_iter() {
                        if let Err(e) = room.send_message(&msg) {
                            warn!("room write failed: {}", e);
                            room.reset();
                            break;
                        }
                    }
                }
                link.set_state(ConnectionState::Disconnected);
            }
            Err(e) => {
                warn!("cannot reach room {}: {}", room_name, e);
                link.set_state(ConnectionState::Disconnected);
                nap(&link, RECONNECT_DELAY);
            }
        }
    }
    Ok(())
}

// sleep, but wake up promptly if we are being shut down
fn nap(link: &RoomLink, total: Duration) {
    let slice = Duration::from_millis(50);
    let mut slept = Duration::ZERO;
    while slept < total && link.is_running() {
        sleep(slice);
        slept += slice;
    }
}

#[cfg(test)]
mod test_websocket {
    use super::*;

    #[test]
    fn envelope_round_trip() {
        let said = json!({
            "context": "user",
            "message": envelope("lights", "{\"type\":\"snapshot_request\"}").to_string(),
        });
        let (topic, body) = open_envelope(&said).unwrap();
        assert_eq!(topic, "lights");
        assert_eq!(body, "{\"type\":\"snapshot_request\"}");
    }

    #[test]
    fn foreign_chatter_is_not_an_envelope() {
        let said = json!({ "context": "user", "message": "{\"speaker\":\"UnitChatRobot\"}" });
        assert!(open_envelope(&said).is_none());
        assert!(open_envelope(&json!({ "context": "user" })).is_none());
    }

    #[test]
    fn stopped_thread_exits_without_connecting() {
        let link = RoomLink::new();
        link.running.store(false, Ordering::SeqCst);
        let (_tx, rx) = mpsc::channel();
        assert!(websocket_thread("room", "ws://127.0.0.1:1/primus", link.clone(), rx).is_ok());
        assert_eq!(link.get_state(), ConnectionState::Connecting);
    }

    #[test]
    fn unreachable_server_reports_disconnected() {
        let link = RoomLink::new();
        let (_tx, rx) = mpsc::channel();
        let thread_link = link.clone();
        let handle = std::thread::spawn(move || {
            websocket_thread("room", "ws://127.0.0.1:1/primus", thread_link, rx)
        });
        sleep(Duration::from_millis(300));
        assert_eq!(link.get_state(), ConnectionState::Disconnected);
        link.running.store(false, Ordering::SeqCst);
        assert!(handle.join().unwrap().is_ok());
    }
}
