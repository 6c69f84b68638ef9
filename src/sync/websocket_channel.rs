//! [`SyncChannel`] over the jam server's websocket rooms.
use log::{debug, error};
use serde_json::Value;
use std::{
    sync::{atomic::Ordering, mpsc, PoisonError},
    thread,
};

use super::sync_channel::{ConnectionState, SyncChannel};
use crate::common::{
    box_error::BoxError,
    sync_error::SyncError,
    websocket::{envelope, websocket_thread, RoomLink},
};

pub struct WebsocketChannel {
    link: RoomLink,
    outbound_tx: mpsc::Sender<Value>,
    handle: Option<thread::JoinHandle<()>>,
}

impl WebsocketChannel {
    /// Spawn the websocket thread for `room_name` on the server at `ws_url`.
    /// Returns straight away; the channel reports `Connecting` until the room is joined.
    pub fn connect(room_name: &str, ws_url: &str) -> Result<WebsocketChannel, BoxError> {
        let link = RoomLink::new();
        let (outbound_tx, outbound_rx) = mpsc::channel();
        let thread_link = link.clone();
        let room_name = room_name.to_string();
        let ws_url = ws_url.to_string();
        let handle = thread::Builder::new()
            .name("websocket".to_string())
            .spawn(move || {
                if let Err(e) = websocket_thread(&room_name, &ws_url, thread_link, outbound_rx) {
                    error!("websocket thread exited with error {}", e);
                }
            })?;
        Ok(WebsocketChannel {
            link,
            outbound_tx,
            handle: Some(handle),
        })
    }

    /// Leave the room and wait for the thread to wind down
    pub fn close(&mut self) {
        self.link.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _res = handle.join();
            debug!("websocket thread joined");
        }
    }
}

impl SyncChannel for WebsocketChannel {
    fn publish(&mut self, topic: &str, payload: &str) -> Result<(), SyncError> {
        if self.connection_state() != ConnectionState::Connected {
            return Err(SyncError::ChannelDisconnected);
        }
        self.outbound_tx
            .send(envelope(topic, payload))
            .map_err(|_| SyncError::ChannelDisconnected)
    }

    fn subscribe(&mut self, topic: &str) -> mpsc::Receiver<String> {
        self.link
            .router
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribe(topic)
    }

    fn connection_state(&self) -> ConnectionState {
        self.link.get_state()
    }
}

impl Drop for WebsocketChannel {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod test_websocket_channel {
    use super::*;
    use std::{thread::sleep, time::Duration};

    #[test]
    fn nothing_goes_out_while_offline() {
        let mut chan = WebsocketChannel::connect("room", "ws://127.0.0.1:1/primus").unwrap();
        let _rx = chan.subscribe("lights");
        sleep(Duration::from_millis(200));
        assert_ne!(chan.connection_state(), ConnectionState::Connected);
        assert_eq!(chan.publish("lights", "{}"), Err(SyncError::ChannelDisconnected));
        chan.close();
    }
}
