//! Client connection management.
//!
//! This module handles the lifecycle of accepted connections: buffering of
//! inbound bytes, queued outbound responses and the registry the select loop
//! iterates over.

pub mod client;
pub mod manager;
pub mod outbox;

pub use client::{Connection, ReceiveOutcome};
pub use manager::ConnectionManagement;
pub use outbox::{Outgoing, ResponseQueue};

pub use conduit_event_system::ConnectionId;
