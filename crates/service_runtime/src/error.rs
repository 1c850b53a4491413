//! Error types and handling for the service runtime.
//!
//! Socket bring-up and per-socket accept failures are normally logged and
//! reported as `false` by [`SocketManagement`](crate::SocketManagement); the
//! typed variants below are what those booleans summarise.

/// Enumeration of possible runtime errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Malformed address or listener specification
    #[error("Validation error: {0}")]
    Validation(String),

    /// The listening socket could not be bound
    #[error("Bind error: {0}")]
    Bind(String),

    /// A socket is already registered for this address and port
    #[error("Socket already exists: {0}")]
    AlreadyExists(String),

    /// No socket or connection registered under this key
    #[error("Not found: {0}")]
    NotFound(String),

    /// The listening socket had nothing to accept
    #[error("No pending connection")]
    NoPendingConnection,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The descriptor is too large for a `select` set
    #[error("Descriptor {0} exceeds the select limit")]
    DescriptorLimit(i32),

    /// A peer stopped reading and its pending output passed the cap
    #[error("Pending output exceeds {limit} bytes")]
    OutputLimit { limit: usize },

    /// The loop would block forever without a listening socket
    #[error("No listening sockets are bound")]
    NoListeners,
}
