//! The single-threaded event loop.
//!
//! One iteration is: wait on every tracked descriptor, accept pending
//! connections, read and dispatch client input, deliver queued responses,
//! apply module commands. Everything between two waits runs to completion on
//! the calling thread, so dispatch order is deterministic.

use crate::config::ServerConfig;
use crate::connection::{ConnectionId, ConnectionManagement, Outgoing, ReceiveOutcome, ResponseQueue};
use crate::error::ServerError;
use crate::net::{FileDescriptorPool, SocketManagement};
use conduit_event_system::{
    CommandQueue, ConnectionEvent, EventHandling, MessageFramer, MessageSource, ModuleContext, RuntimeCommand,
    RuntimeSettings, ShutdownState, CONNECTION_CLOSED_EVENT, CONNECTION_OPENED_EVENT, RUNTIME_MODULE_NAME,
};
use module_system::ModuleManagement;
use std::io::{Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// The service runtime: event bus, modules, sockets and connections behind one loop.
///
/// # Example
///
/// ```rust,no_run
/// use conduit_event_system::RuntimeSettings;
/// use service_runtime::{Runtime, ServerConfig};
///
/// let mut runtime = Runtime::new(ServerConfig::default(), RuntimeSettings::new())?;
/// runtime.bind_listeners();
/// runtime.run()?;
/// # Ok::<(), service_runtime::ServerError>(())
/// ```
pub struct Runtime {
    config: ServerConfig,
    events: Arc<EventHandling>,
    settings: Arc<RuntimeSettings>,
    shutdown: ShutdownState,
    commands: CommandQueue,
    modules: ModuleManagement,
    sockets: SocketManagement,
    connections: ConnectionManagement,
    responses: Arc<ResponseQueue>,
    /// Becomes readable whenever shutdown is initiated
    wake_reader: UnixStream,
}

impl Runtime {
    /// Creates a runtime with no sockets bound and no modules loaded.
    ///
    /// The runtime creates and owns the `connection.opened` and
    /// `connection.closed` events.
    pub fn new(config: ServerConfig, settings: RuntimeSettings) -> Result<Self, ServerError> {
        let events = Arc::new(EventHandling::with_framer(MessageFramer::new(config.max_message_size)));
        events.create_event(CONNECTION_OPENED_EVENT, RUNTIME_MODULE_NAME);
        events.create_event(CONNECTION_CLOSED_EVENT, RUNTIME_MODULE_NAME);

        let settings = Arc::new(settings);
        let shutdown = ShutdownState::new();
        let commands = CommandQueue::new();

        let (wake_reader, wake_writer) = UnixStream::pair()?;
        wake_reader.set_nonblocking(true)?;
        wake_writer.set_nonblocking(true)?;
        shutdown.set_waker(move || {
            // A full pipe already guarantees a wake-up.
            let _ = (&wake_writer).write(&[1]);
        });

        let context = ModuleContext::new(events.clone(), settings.clone(), shutdown.clone(), commands.clone());
        let responses = Arc::new(ResponseQueue::new());
        let max_message_size = config.max_message_size;
        let max_pending_output = config.max_pending_output;

        Ok(Self {
            config,
            events,
            settings,
            shutdown,
            commands,
            modules: ModuleManagement::new(context),
            sockets: SocketManagement::new(),
            connections: ConnectionManagement::with_limits(
                responses.clone(),
                max_message_size,
                max_pending_output,
            ),
            responses,
            wake_reader,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
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

    pub fn modules(&self) -> &ModuleManagement {
        &self.modules
    }

    pub fn modules_mut(&mut self) -> &mut ModuleManagement {
        &mut self.modules
    }

    pub fn sockets(&self) -> &SocketManagement {
        &self.sockets
    }

    pub fn sockets_mut(&mut self) -> &mut SocketManagement {
        &mut self.sockets
    }

    pub fn connections(&self) -> &ConnectionManagement {
        &self.connections
    }

    /// Binds every configured listener. Failures are logged and skipped.
    ///
    /// Returns the number of sockets bound.
    pub fn bind_listeners(&mut self) -> usize {
        let mut bound = 0;
        for listener in &self.config.listeners {
            match self.sockets.try_new_socket(&listener.address, listener.port) {
                Ok(()) => bound += 1,
                Err(e) => warn!("⚠️ Listener {} not bound: {}", listener, e),
            }
        }
        bound
    }

    /// Runs the loop until shutdown is initiated, then tears everything down.
    ///
    /// Refuses to start without a listening socket, since the wait would
    /// never return.
    pub fn run(&mut self) -> Result<(), ServerError> {
        if self.sockets.count() == 0 {
            return Err(ServerError::NoListeners);
        }

        info!(
            "🚀 Runtime started: {} socket(s), {} module(s)",
            self.sockets.count(),
            self.modules.module_count()
        );

        let result = loop {
            if self.shutdown.is_shutdown_initiated() {
                break Ok(());
            }
            if let Err(e) = self.run_once() {
                error!("❌ Runtime loop failed: {}", e);
                break Err(e);
            }
        };

        self.teardown();
        result
    }

    /// Performs a single loop iteration, blocking until something is ready.
    pub fn run_once(&mut self) -> Result<(), ServerError> {
        self.turn(None)
    }

    fn turn(&mut self, timeout: Option<Duration>) -> Result<(), ServerError> {
        let pool = FileDescriptorPool::collect(&self.sockets, &self.connections, &[self.wake_reader.as_raw_fd()]);
        match timeout {
            Some(timeout) => self.sockets.stall_timeout(&pool, timeout)?,
            None => self.sockets.stall(&pool)?,
        };
        self.drain_wakeups();

        for id in self.sockets.accept_connections(&mut self.connections) {
            self.emit_connection_event(CONNECTION_OPENED_EVENT, id);
        }

        self.read_connections();
        self.deliver_responses();
        self.apply_commands();
        Ok(())
    }

    fn drain_wakeups(&mut self) {
        let mut sink = [0u8; 64];
        while matches!((&self.wake_reader).read(&mut sink), Ok(n) if n > 0) {}
    }

    fn read_connections(&mut self) {
        for id in self.connections.ids() {
            let Some(connection) = self.connections.get_mut(id) else {
                continue;
            };
            match connection.receive() {
                Ok(ReceiveOutcome::Data(bytes)) => {
                    if let Err(e) = self.events.receive_data(connection, &bytes) {
                        warn!("⚠️ Connection {}: {}", id, e);
                        self.close_connection(id, Some(e.to_string()));
                    }
                }
                Ok(ReceiveOutcome::WouldBlock) => {}
                Ok(ReceiveOutcome::Closed) => self.close_connection(id, None),
                Err(e) => {
                    debug!("Connection {} failed to read: {}", id, e);
                    self.close_connection(id, Some(e.to_string()));
                }
            }
        }
    }

    /// Applies queued responses, then flushes and closes connections as needed.
    fn deliver_responses(&mut self) {
        // Closing a connection dispatches `connection.closed`, which may queue more.
        loop {
            for request in self.responses.drain() {
                match request {
                    Outgoing::Data(id, bytes) => {
                        let Some(connection) = self.connections.get_mut(id) else {
                            continue;
                        };
                        if let Err(e) = connection.send(&bytes) {
                            debug!("Connection {} failed to write: {}", id, e);
                            self.close_connection(id, Some(e.to_string()));
                        }
                    }
                    Outgoing::Close(id, reason) => {
                        if let Some(connection) = self.connections.get_mut(id) {
                            connection.request_close(reason);
                        }
                    }
                }
            }

            for id in self.connections.ids() {
                let Some(connection) = self.connections.get_mut(id) else {
                    continue;
                };
                let flushed = connection.flush();
                let should_close = connection.should_close();
                let reason = connection.close_reason().map(str::to_string);
                match flushed {
                    Err(e) => {
                        debug!("Connection {} failed to write: {}", id, e);
                        self.close_connection(id, Some(e.to_string()));
                    }
                    Ok(_) if should_close => self.close_connection(id, reason),
                    Ok(_) => {}
                }
            }

            if self.responses.is_empty() {
                break;
            }
        }
    }

    fn apply_commands(&mut self) {
        for command in self.commands.drain() {
            match command {
                RuntimeCommand::LoadModule(name) => {
                    if let Err(e) = self.modules.load_module(&name) {
                        error!("❌ Failed to load module '{}': {}", name, e);
                    }
                }
                RuntimeCommand::UnloadModule(name) => {
                    if !self.modules.unload_module(&name) {
                        warn!("⚠️ Module '{}' is not loaded", name);
                    }
                }
                RuntimeCommand::ReloadModule(name) => match self.modules.reload_module(&name) {
                    Ok(true) => info!("🔄 Module '{}' reloaded", name),
                    Ok(false) => warn!("⚠️ Module '{}' is not loaded, nothing to reload", name),
                    Err(e) => error!("❌ Failed to reload module '{}': {}", name, e),
                },
                RuntimeCommand::Shutdown => self.shutdown.initiate_shutdown(),
            }
        }
    }

    fn emit_connection_event(&self, event: &str, id: ConnectionId) {
        if let Some(connection) = self.connections.get(id) {
            let payload = ConnectionEvent {
                connection: connection.connection_ref(),
            };
            self.events.trigger_event_with(event, &payload);
        }
    }

    /// Notifies handlers with `connection.closed`, then destroys the connection.
    fn close_connection(&mut self, id: ConnectionId, reason: Option<String>) {
        if let Some(reason) = &reason {
            debug!("Closing connection {}: {}", id, reason);
        }
        self.emit_connection_event(CONNECTION_CLOSED_EVENT, id);
        self.connections.remove_connection(id);
    }

    /// Closes connections, unloads modules in reverse load order and closes sockets.
    pub fn teardown(&mut self) {
        info!("🛑 Runtime shutting down");
        for id in self.connections.ids() {
            self.close_connection(id, Some("runtime shutdown".to_string()));
        }
        self.responses.drain();
        self.modules.unload_all();
        self.sockets.close_all();
        self.shutdown.complete_shutdown();
        info!("✅ Runtime shutdown complete");
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("sockets", &self.sockets.count())
            .field("connections", &self.connections.count())
            .field("modules", &self.modules)
            .field("shutdown", &self.shutdown)
            .finish()
    }
}

#[cfg(test)]
impl Runtime {
    /// One iteration that gives up waiting after `timeout`.
    pub(crate) fn run_once_timeout(&mut self, timeout: Duration) -> Result<(), ServerError> {
        self.turn(Some(timeout))
    }
}
