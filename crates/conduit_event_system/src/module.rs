//! # Module Interface
//!
//! The contract between the runtime and dynamically loaded modules.
//!
//! A module is a `cdylib` exporting a zero-argument factory named
//! [`MODULE_FACTORY_SYMBOL`] that returns a boxed [`Module`]. The
//! [`declare_module!`](crate::declare_module) macro generates that export.
//!
//! ## Module Lifecycle
//!
//! 1. **Creation** - the factory builds the module object
//! 2. **Identity check** - [`Module::name`] must equal the library basename
//! 3. **Instantiation** - [`Module::instantiate`] registers events and handlers
//! 4. **Operation** - handlers run whenever their events are triggered
//! 5. **Shutdown** - [`Module::shutdown`] runs, then the object is destroyed
//!    and finally the library is unmapped
//!
//! Handlers registered by a module are removed from the event bus before the
//! module is destroyed, so no callback can outlive the code it points into.

use crate::settings::RuntimeSettings;
use crate::shutdown::ShutdownState;
use crate::system::EventHandling;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Name of the factory every module library must export.
pub const MODULE_FACTORY_SYMBOL: &[u8] = b"create_module";

/// Signature of the exported factory. A null return signals construction failure.
#[allow(improper_ctypes_definitions)]
pub type ModuleFactory = unsafe extern "C" fn() -> *mut dyn Module;

/// A plug-in's entry object.
pub trait Module: Send {
    /// Returns the module name.
    ///
    /// Must equal the basename of the shared object the module was loaded
    /// from (`echo` for `modules/src/echo.so`).
    fn name(&self) -> &str;

    /// Post-construction self-check, run once at load time.
    ///
    /// This is where a module creates its events and registers handlers and
    /// preprocessors. Returning an error unloads the module immediately and the
    /// error text is reported to whoever requested the load.
    fn instantiate(&mut self, context: &ModuleContext) -> Result<(), ModuleError>;

    /// Called right before the module object is destroyed.
    fn shutdown(&mut self) {}
}

/// Errors a module reports about itself.
#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    /// Module initialization failed during load
    #[error("Module initialization failed: {0}")]
    InitializationFailed(String),
    /// A setting the module depends on is missing or invalid
    #[error("Missing or invalid setting: {0}")]
    MissingSetting(String),
    /// Registration against the event bus was refused
    #[error("Event registration failed: {0}")]
    Registration(String),
    /// Runtime error such as a panic
    #[error("Module runtime error: {0}")]
    Runtime(String),
}

/// Requests a module can make of the runtime.
///
/// Commands are applied between loop iterations, never from inside a dispatch,
/// so a module can safely ask for its own reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCommand {
    LoadModule(String),
    UnloadModule(String),
    ReloadModule(String),
    Shutdown,
}

/// FIFO of pending [`RuntimeCommand`]s shared between modules and the runtime.
#[derive(Debug, Clone, Default)]
pub struct CommandQueue {
    inner: Arc<Mutex<VecDeque<RuntimeCommand>>>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, command: RuntimeCommand) {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(command);
    }

    /// Takes every queued command in submission order.
    pub fn drain(&self) -> Vec<RuntimeCommand> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_empty()
    }
}

/// Log message severity levels.
///
/// Modules log through [`ModuleContext::log`] rather than their own copy of
/// `tracing`, whose subscriber is never installed inside a `cdylib`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Critical errors that may affect system stability
    Error,
    /// Warning conditions that should be investigated
    Warn,
    /// General informational messages
    Info,
    /// Detailed information for debugging
    Debug,
    /// Very detailed trace information
    Trace,
}

/// Destination for module log lines.
///
/// The runtime builds the sink, so calls dispatch through its vtable into the
/// host's logging rather than the module's.
pub trait ModuleLog: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);
}

/// Forwards module log lines to the host's `tracing` subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLog;

impl ModuleLog for TracingLog {
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Error => tracing::error!(target: "conduit::module", "{}", message),
            LogLevel::Warn => tracing::warn!(target: "conduit::module", "{}", message),
            LogLevel::Info => tracing::info!(target: "conduit::module", "{}", message),
            LogLevel::Debug => tracing::debug!(target: "conduit::module", "{}", message),
            LogLevel::Trace => tracing::trace!(target: "conduit::module", "{}", message),
        }
    }
}

/// Services available to a module during instantiation.
///
/// Every field is cheap to clone, so modules may keep copies inside their
/// handler closures.
#[derive(Clone)]
pub struct ModuleContext {
    events: Arc<EventHandling>,
    settings: Arc<RuntimeSettings>,
    shutdown: ShutdownState,
    commands: CommandQueue,
    log: Arc<dyn ModuleLog>,
}

impl std::fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleContext")
            .field("events", &self.events)
            .field("settings", &self.settings.len())
            .field("shutdown", &self.shutdown)
            .finish()
    }
}

impl ModuleContext {
    pub fn new(
        events: Arc<EventHandling>,
        settings: Arc<RuntimeSettings>,
        shutdown: ShutdownState,
        commands: CommandQueue,
    ) -> Self {
        Self {
            events,
            settings,
            shutdown,
            commands,
            log: Arc::new(TracingLog),
        }
    }

    /// Replaces the log sink, which defaults to [`TracingLog`].
    pub fn with_log(mut self, log: Arc<dyn ModuleLog>) -> Self {
        self.log = log;
        self
    }

    pub fn events(&self) -> Arc<EventHandling> {
        self.events.clone()
    }

    pub fn settings(&self) -> Arc<RuntimeSettings> {
        self.settings.clone()
    }

    pub fn shutdown_state(&self) -> ShutdownState {
        self.shutdown.clone()
    }

    pub fn commands(&self) -> CommandQueue {
        self.commands.clone()
    }

    /// Queues a command for the runtime to apply after the current dispatch.
    pub fn request(&self, command: RuntimeCommand) {
        self.commands.push(command);
    }

    /// Logs a message through the runtime's logging system.
    pub fn log(&self, level: LogLevel, message: &str) {
        self.log.log(level, message);
    }
}
