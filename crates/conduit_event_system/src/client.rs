//! Client connection references handed to event handlers.
//!
//! Handlers never touch the connection registry directly. They receive a
//! [`ClientConnectionRef`] and queue responses through the
//! [`ClientResponseSender`] implemented by the runtime.

use crate::error::EventError;
use std::net::SocketAddr;
use std::sync::Arc;

/// Identifier assigned to every accepted connection.
pub type ConnectionId = u64;

/// Trait for sending responses to clients - implemented by the runtime's connection layer.
pub trait ClientResponseSender: Send + Sync {
    /// Queues `data` for delivery to the given connection.
    fn send_to_connection(&self, connection_id: ConnectionId, data: Vec<u8>) -> Result<(), String>;

    /// Requests that the given connection be closed after pending data is flushed.
    fn close_connection(&self, connection_id: ConnectionId, reason: Option<String>) -> Result<(), String>;

    /// Reports whether the connection is still registered.
    fn is_connection_active(&self, connection_id: ConnectionId) -> bool;
}

/// Connection-aware reference that lets a handler answer the client that sent a message.
#[derive(Clone)]
pub struct ClientConnectionRef {
    /// Connection ID for internal tracking
    pub connection_id: ConnectionId,
    /// The remote address of the client
    pub peer_addr: SocketAddr,
    /// Seconds since the Unix epoch when the connection was accepted
    pub connected_at: u64,
    response_sender: Arc<dyn ClientResponseSender>,
}

impl std::fmt::Debug for ClientConnectionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnectionRef")
            .field("connection_id", &self.connection_id)
            .field("peer_addr", &self.peer_addr)
            .field("connected_at", &self.connected_at)
            .field("response_sender", &"[response_sender]")
            .finish()
    }
}

impl ClientConnectionRef {
    pub fn new(
        connection_id: ConnectionId,
        peer_addr: SocketAddr,
        connected_at: u64,
        response_sender: Arc<dyn ClientResponseSender>,
    ) -> Self {
        Self {
            connection_id,
            peer_addr,
            connected_at,
            response_sender,
        }
    }

    /// Send a direct response to this specific client.
    pub fn respond(&self, data: &[u8]) -> Result<(), EventError> {
        self.response_sender
            .send_to_connection(self.connection_id, data.to_vec())
            .map_err(|e| EventError::ResponseFailed(format!("Failed to send response: {e}")))
    }

    /// Send a JSON response terminated by a newline, matching the inbound framing.
    pub fn respond_json<T: serde::Serialize>(&self, data: &T) -> Result<(), EventError> {
        let mut json = serde_json::to_vec(data)?;
        json.push(b'\n');
        self.respond(&json)
    }

    /// Close this connection once queued responses have been written.
    pub fn close(&self, reason: Option<String>) -> Result<(), EventError> {
        self.response_sender
            .close_connection(self.connection_id, reason)
            .map_err(|e| EventError::ResponseFailed(format!("Failed to close connection: {e}")))
    }

    /// Check if this connection is still active.
    pub fn is_active(&self) -> bool {
        self.response_sender.is_connection_active(self.connection_id)
    }
}

/// Payload of the `connection.opened` and `connection.closed` runtime events.
#[derive(Debug, Clone)]
pub struct ConnectionEvent {
    pub connection: ClientConnectionRef,
}
