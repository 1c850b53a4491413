//! Response sender implementation for the event system.
//!
//! Handlers answer clients through [`ClientConnectionRef`](conduit_event_system::ClientConnectionRef),
//! which lands here. Nothing is written to a socket from inside a handler;
//! the runtime drains the queue once the current dispatch has finished.

use conduit_event_system::{ClientResponseSender, ConnectionId};
use dashmap::DashSet;
use std::sync::Mutex;
use tracing::trace;

/// A request queued by a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    Data(ConnectionId, Vec<u8>),
    Close(ConnectionId, Option<String>),
}

/// Implementation of `ClientResponseSender` shared by every connection.
#[derive(Debug, Default)]
pub struct ResponseQueue {
    pending: Mutex<Vec<Outgoing>>,
    active: DashSet<ConnectionId>,
}

impl ResponseQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn activate(&self, connection_id: ConnectionId) {
        self.active.insert(connection_id);
    }

    pub(crate) fn deactivate(&self, connection_id: ConnectionId) {
        self.active.remove(&connection_id);
    }

    /// Takes every queued request in submission order.
    pub fn drain(&self) -> Vec<Outgoing> {
        std::mem::take(&mut *self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }

    pub fn is_empty(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_empty()
    }

    fn push(&self, connection_id: ConnectionId, request: Outgoing) -> Result<(), String> {
        if !self.active.contains(&connection_id) {
            return Err(format!("Connection {connection_id} is not active"));
        }
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request);
        Ok(())
    }
}

impl ClientResponseSender for ResponseQueue {
    fn send_to_connection(&self, connection_id: ConnectionId, data: Vec<u8>) -> Result<(), String> {
        trace!("📨 Queued {} byte(s) for connection {}", data.len(), connection_id);
        self.push(connection_id, Outgoing::Data(connection_id, data))
    }

    fn close_connection(&self, connection_id: ConnectionId, reason: Option<String>) -> Result<(), String> {
        self.push(connection_id, Outgoing::Close(connection_id, reason))
    }

    fn is_connection_active(&self, connection_id: ConnectionId) -> bool {
        self.active.contains(&connection_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_active_connections_accept_responses() {
        let queue = ResponseQueue::new();
        assert!(queue.send_to_connection(1, b"hi".to_vec()).is_err());

        queue.activate(1);
        assert!(queue.is_connection_active(1));
        queue.send_to_connection(1, b"hi".to_vec()).unwrap();
        queue.close_connection(1, Some("bye".into())).unwrap();

        assert_eq!(
            queue.drain(),
            vec![
                Outgoing::Data(1, b"hi".to_vec()),
                Outgoing::Close(1, Some("bye".into()))
            ]
        );
        assert!(queue.is_empty());

        queue.deactivate(1);
        assert!(!queue.is_connection_active(1));
    }
}
