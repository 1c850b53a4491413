//! Main application logic and lifecycle management.
//!
//! The `Application` turns a validated [`AppConfig`] into a running
//! [`Runtime`]: listeners bound, startup modules loaded, loop started.

use crate::config::AppConfig;
use crate::logging::display_banner;
use conduit_event_system::ShutdownState;
use service_runtime::Runtime;
use tracing::{error, info, warn};

/// Owns the configuration and the runtime for the lifetime of the process.
pub struct Application {
    /// Loaded application configuration
    config: AppConfig,
    /// The event loop, its sockets and its modules
    runtime: Runtime,
}

impl Application {
    /// Creates a new application instance from merged configuration.
    ///
    /// # Process
    ///
    /// 1. Validate configuration
    /// 2. Display startup banner
    /// 3. Create the runtime and bind listeners (failures logged, fatal only
    ///    when nothing could be bound)
    /// 4. Load the autoload modules in order (failures logged, not fatal)
    pub fn new(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        if let Err(e) = config.validate() {
            return Err(format!("Configuration validation failed: {e}").into());
        }
        info!("✅ Configuration validated successfully");

        display_banner();

        let mut runtime = Runtime::new(config.to_server_config()?, config.to_runtime_settings())?;

        let bound = runtime.bind_listeners();
        if bound == 0 {
            return Err("No listener could be bound".into());
        }
        info!("🌐 {} of {} listener(s) bound", bound, config.server.listeners.len());

        for name in &config.modules.autoload {
            match runtime.modules_mut().load_module(name) {
                Ok(()) => info!("📦 Module '{}' loaded", name),
                Err(e) => error!("❌ Failed to load module '{}': {}", name, e),
            }
        }

        Ok(Self { config, runtime })
    }

    /// Handle used by signal handlers to stop the loop.
    pub fn shutdown_state(&self) -> ShutdownState {
        self.runtime.shutdown_state()
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Runs the loop until shutdown, then reports final statistics.
    pub fn run(mut self) -> Result<(), Box<dyn std::error::Error>> {
        info!("🌟 Starting Conduit");
        self.log_configuration_summary();

        let result = self.runtime.run();

        let stats = self.runtime.events().stats();
        info!("📊 Final Event System Statistics:");
        info!("  - Events delivered: {}", stats.events_delivered);
        info!("  - Events vetoed: {}", stats.events_vetoed);
        info!("  - Events without a registration: {}", stats.events_missed);
        info!("  - Handler invocations: {}", stats.handler_invocations);
        if stats.callback_panics > 0 {
            warn!("  - Callback panics: {}", stats.callback_panics);
        }

        result?;
        info!("✅ Conduit shutdown complete");
        Ok(())
    }

    fn log_configuration_summary(&self) {
        let modules = self.runtime.modules().module_names();
        info!("📋 Configuration Summary:");
        for socket in self.runtime.sockets().keys() {
            info!("  - Listening on {}", socket);
        }
        info!(
            "  - Module roots: core={} project={}",
            self.config.modules.core_root.as_deref().unwrap_or("-"),
            self.config.modules.project_root.as_deref().unwrap_or("-")
        );
        info!("  - Modules loaded: {:?}", modules);
        info!("  - Max message size: {} bytes", self.config.server.max_message_size);
        info!("  - Log level: {}", self.config.logging.level);
    }
}
