//! # Conduit Event System
//!
//! The shared contract between the Conduit runtime and its dynamically loaded
//! modules: the event bus, the module trait, client connection references and
//! message framing.
//!
//! ## Core Concepts
//!
//! - **Events** are named channels created by a module (or by the runtime for
//!   connection lifecycle notifications). Each event keeps two ordered lists.
//! - **Preprocessors** form a veto chain. They run in ascending priority and
//!   the first one returning `false` suppresses the dispatch.
//! - **Handlers** run in ascending priority (ties in registration order) once
//!   every preprocessor has allowed the event.
//! - **Ownership** is tracked per registration by module name, so unloading a
//!   module removes everything it registered.
//!
//! ## Quick Start
//!
//! ```rust
//! use conduit_event_system::EventHandling;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! let events = EventHandling::new();
//! events.create_event("chat.message", "chat");
//!
//! let seen = Arc::new(AtomicUsize::new(0));
//! let counter = seen.clone();
//! events.register_for_event("chat.message", "logger", move |_, _| {
//!     counter.fetch_add(1, Ordering::SeqCst);
//! }, 0);
//!
//! // Returning `false` here would veto the dispatch.
//! events.register_preprocessor_for_event("chat.message", "filter", |_| true, 0);
//!
//! assert!(events.trigger_event("chat.message", None));
//! assert_eq!(seen.load(Ordering::SeqCst), 1);
//!
//! events.unregister_module("logger");
//! events.trigger_event("chat.message", None);
//! assert_eq!(seen.load(Ordering::SeqCst), 1);
//! ```
//!
//! ## Writing a Module
//!
//! Module crates depend on this crate, implement [`Module`], and export the
//! factory with [`declare_module!`]. See the `module` docs for the lifecycle.

mod client;
mod error;
mod event;
mod framing;
mod macros;
mod module;
mod settings;
mod shutdown;
pub mod system;

pub use client::{ClientConnectionRef, ClientResponseSender, ConnectionEvent, ConnectionId};
pub use error::EventError;
pub use event::{Event, EventData, EventHandler, EventPreprocessor, HandlerCallback, PreprocessorCallback};
pub use framing::{ClientMessage, MessageEnvelope, MessageFramer, DEFAULT_MAX_MESSAGE_SIZE};
pub use module::{
    CommandQueue, LogLevel, Module, ModuleContext, ModuleError, ModuleFactory, ModuleLog, RuntimeCommand,
    TracingLog, MODULE_FACTORY_SYMBOL,
};
pub use settings::{RuntimeSettings, CORE_ROOT_KEY, PROJECT_ROOT_KEY};
pub use shutdown::ShutdownState;
pub use system::{EventHandling, EventStats, MessageSource};

/// Name under which the runtime owns the events it creates itself.
pub const RUNTIME_MODULE_NAME: &str = "runtime";

/// Triggered after a connection is accepted, with a [`ConnectionEvent`] payload.
pub const CONNECTION_OPENED_EVENT: &str = "connection.opened";

/// Triggered before a connection is destroyed, with a [`ConnectionEvent`] payload.
pub const CONNECTION_CLOSED_EVENT: &str = "connection.closed";
