//! # Service Runtime
//!
//! The single-threaded loop behind Conduit: a registry of IPv4 listening
//! sockets, a registry of accepted connections, a `select` wait over both, and
//! the glue that turns client bytes into events on the shared
//! [`EventHandling`](conduit_event_system::EventHandling) bus.
//!
//! ## Loop Iteration
//!
//! 1. Rebuild the [`FileDescriptorPool`] and block in [`SocketManagement::stall`]
//! 2. Accept pending connections and trigger `connection.opened`
//! 3. Read every connection, framing and dispatching complete messages
//! 4. Deliver responses handlers queued, closing connections that asked for it
//! 5. Apply [`RuntimeCommand`](conduit_event_system::RuntimeCommand)s queued by modules
//!
//! Shutdown is checked between iterations. Initiating it also writes to an
//! internal wake-up socket so a blocked wait returns promptly.

pub use config::{ListenAddress, ServerConfig, DEFAULT_MAX_PENDING_OUTPUT};
pub use connection::{Connection, ConnectionId, ConnectionManagement, Outgoing, ReceiveOutcome, ResponseQueue};
pub use error::ServerError;
pub use net::{FdSet, FileDescriptorPool, Socket, SocketManagement};
pub use server::Runtime;

pub mod config;
pub mod connection;
pub mod error;
pub mod net;
pub mod server;
