use axum::extract::ws::Message;
use log::debug;
use std::collections::HashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::{self, ServerMessage};

pub type SubscriberId = Uuid;

/// Outbound half of a subscriber's socket. A per-connection writer task
/// drains it, so sending never waits on the network.
pub type SubscriberSender = mpsc::UnboundedSender<Message>;

/// Live real-time subscribers. Volatile; nothing here is persisted.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    subscribers: HashMap<SubscriberId, SubscriberSender>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn connect(&mut self, id: SubscriberId, tx: SubscriberSender) {
        self.subscribers.insert(id, tx);
        debug!("Subscriber {} connected ({} online)", id, self.len());
    }

    /// Idempotent. Returns whether the subscriber was still registered.
    pub fn disconnect(&mut self, id: SubscriberId) -> bool {
        let removed = self.subscribers.remove(&id).is_some();
        if removed {
            debug!("Subscriber {} disconnected ({} online)", id, self.len());
        }
        removed
    }

    /// Deliver to one subscriber. A failed send removes it.
    pub fn send_to(&mut self, id: SubscriberId, message: &ServerMessage) -> bool {
        let Some(frame) = protocol::encode(message) else {
            return false;
        };
        let Some(tx) = self.subscribers.get(&id) else {
            return false;
        };

        if tx.send(frame).is_ok() {
            return true;
        }
        self.drop_subscriber(id);
        false
    }

    /// Best-effort fan-out to everyone except `skip`.
    ///
    /// Returns how many subscribers were dropped because their channel was
    /// closed. Those failures never reach the caller as errors.
    pub fn notify(&mut self, message: &ServerMessage, skip: Option<SubscriberId>) -> usize {
        let Some(frame) = protocol::encode(message) else {
            return 0;
        };

        let failed: Vec<SubscriberId> = self
            .subscribers
            .iter()
            .filter(|(id, _)| Some(**id) != skip)
            .filter(|(_, tx)| tx.send(frame.clone()).is_err())
            .map(|(id, _)| *id)
            .collect();

        for id in &failed {
            self.drop_subscriber(*id);
        }
        failed.len()
    }

    /// Remove subscribers whose receiving side has gone away.
    pub fn prune_closed(&mut self) -> usize {
        let before = self.len();
        self.subscribers.retain(|id, tx| {
            let open = !tx.is_closed();
            if !open {
                debug!("Pruning closed subscriber {}", id);
            }
            open
        });
        before - self.len()
    }

    fn drop_subscriber(&mut self, id: SubscriberId) {
        if self.subscribers.remove(&id).is_some() {
            debug!("Dropped subscriber {} after failed send", id);
        }
    }
}
