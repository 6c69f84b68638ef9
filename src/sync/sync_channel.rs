//! Seam between the sync session and whatever broadcast transport carries it.
//!
//! A channel only has to do three things: put text on a topic for everyone
//! else in the room, hand us what others put on a topic, and say whether it
//! is currently connected.  While it is not, publishing fails with
//! [`SyncError::ChannelDisconnected`] and the message is gone.  Nothing is
//! queued for later, a step toggle from thirty seconds ago is just noise.
use std::{collections::HashMap, fmt, sync::mpsc};

use crate::common::sync_error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Reconnecting => "reconnecting",
        };
        write!(f, "{}", name)
    }
}

pub trait SyncChannel: Send {
    /// Send `payload` to every other member subscribed to `topic`
    fn publish(&mut self, topic: &str, payload: &str) -> Result<(), SyncError>;
    /// Everything other members publish on `topic` from now on
    fn subscribe(&mut self, topic: &str) -> mpsc::Receiver<String>;
    fn connection_state(&self) -> ConnectionState;
}

/// Fan out of inbound payloads to topic subscribers.  Shared by the channel
/// implementations.
#[derive(Default)]
pub struct TopicRouter {
    topics: HashMap<String, Vec<mpsc::Sender<String>>>,
}

impl TopicRouter {
    pub fn new() -> TopicRouter {
        TopicRouter::default()
    }

    pub fn subscribe(&mut self, topic: &str) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel();
        self.topics.entry(topic.to_string()).or_default().push(tx);
        rx
    }

    /// Deliver to the topic's subscribers.  Returns how many got it.
    pub fn route(&mut self, topic: &str, payload: &str) -> usize {
        match self.topics.get_mut(topic) {
            Some(subs) => {
                subs.retain(|tx| tx.send(payload.to_string()).is_ok());
                subs.len()
            }
            None => 0,
        }
    }
}

#[cfg(test)]
mod test_sync_channel {
    use super::*;

    #[test]
    fn routes_by_topic() {
        let mut router = TopicRouter::new();
        let lights = router.subscribe("lights");
        let other = router.subscribe("chat");
        assert_eq!(router.route("lights", "hello"), 1);
        assert_eq!(router.route("nobody", "hello"), 0);
        assert_eq!(lights.try_recv().unwrap(), "hello");
        assert!(other.try_recv().is_err());
        drop(lights);
        assert_eq!(router.route("lights", "again"), 0);
    }

    #[test]
    fn display() {
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
    }
}
