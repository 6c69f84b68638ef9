//! In process broadcast hub.
//!
//! Every [`BusChannel`] joined to the same [`LocalBus`] behaves like a unit in
//! one room: publishes reach every other connected member, never the sender.
//! Each member can be knocked offline through its [`BusLink`], which is how
//! the tests fake a network outage.  Also used by the binary when no
//! websocket url is configured.
use std::sync::{mpsc, Arc, Mutex, PoisonError};

use super::sync_channel::{ConnectionState, SyncChannel, TopicRouter};
use crate::common::sync_error::SyncError;

struct Member {
    id: usize,
    state: Arc<Mutex<ConnectionState>>,
    router: Arc<Mutex<TopicRouter>>,
}

#[derive(Clone, Default)]
pub struct LocalBus {
    members: Arc<Mutex<Vec<Member>>>,
}

impl LocalBus {
    pub fn new() -> LocalBus {
        LocalBus::default()
    }

    /// Add a member.  It starts out connected.
    pub fn join(&self) -> BusChannel {
        let state = Arc::new(Mutex::new(ConnectionState::Connected));
        let router = Arc::new(Mutex::new(TopicRouter::new()));
        let mut members = self.members.lock().unwrap_or_else(PoisonError::into_inner);
        let id = members.len();
        members.push(Member {
            id,
            state: Arc::clone(&state),
            router: Arc::clone(&router),
        });
        BusChannel {
            id,
            bus: self.clone(),
            state,
            router,
        }
    }

    fn deliver(&self, from: usize, topic: &str, payload: &str) {
        let members = self.members.lock().unwrap_or_else(PoisonError::into_inner);
        for member in members.iter().filter(|m| m.id != from) {
            let online = *member.state.lock().unwrap_or_else(PoisonError::into_inner)
                == ConnectionState::Connected;
            // an offline member simply misses it
            if online {
                member
                    .router
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .route(topic, payload);
            }
        }
    }
}

pub struct BusChannel {
    id: usize,
    bus: LocalBus,
    state: Arc<Mutex<ConnectionState>>,
    router: Arc<Mutex<TopicRouter>>,
}

impl BusChannel {
    /// Handle for flipping this member's connection after the channel has
    /// been handed to a session
    pub fn link(&self) -> BusLink {
        BusLink {
            state: Arc::clone(&self.state),
        }
    }
}

impl SyncChannel for BusChannel {
    fn publish(&mut self, topic: &str, payload: &str) -> Result<(), SyncError> {
        if self.connection_state() != ConnectionState::Connected {
            return Err(SyncError::ChannelDisconnected);
        }
        self.bus.deliver(self.id, topic, payload);
        Ok(())
    }

    fn subscribe(&mut self, topic: &str) -> mpsc::Receiver<String> {
        self.router
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribe(topic)
    }

    fn connection_state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone)]
pub struct BusLink {
    state: Arc<Mutex<ConnectionState>>,
}

impl BusLink {
    pub fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }
    pub fn connect(&self) {
        self.set_state(ConnectionState::Connected);
    }
    pub fn disconnect(&self) {
        self.set_state(ConnectionState::Disconnected);
    }
    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
