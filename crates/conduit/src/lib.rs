//! # Conduit - Main Entry Point
//!
//! Event-driven network service runtime. Clients send framed JSON messages
//! naming an event; dynamically loaded modules register handlers for those
//! events and answer through the client's connection.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run with default configuration (writes conduit.toml if missing)
//! conduit
//!
//! # Override specific settings
//! conduit --listen 0.0.0.0:9000 --core-root /opt/conduit --module echo --log-level debug
//!
//! # JSON logging for production
//! conduit --json-logs
//! ```
//!
//! ## Signal Handling
//!
//! SIGINT and SIGTERM stop the loop; modules are then unloaded in reverse load
//! order and sockets closed.

pub mod app;
pub mod cli;
pub mod config;
pub mod logging;
pub mod signals;

pub use app::Application;
pub use cli::CliArgs;
pub use config::{AppConfig, LoggingSettings, ModuleSettings, ServerSettings};

/// Runs Conduit from the process arguments until shutdown.
///
/// 1. Command-line argument parsing
/// 2. Configuration loading and CLI overrides
/// 3. Logging system initialization
/// 4. Application creation, signal handlers, execution
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let mut config = AppConfig::load_from_file(&args.config_path)
        .map_err(|e| format!("Failed to load configuration from {}: {e}", args.config_path.display()))?;
    config.apply_cli(&args);

    logging::setup_logging(&config.logging, args.json_logs)
        .map_err(|e| format!("Failed to setup logging: {e}"))?;
    tracing::info!("📂 Configuration loaded from {}", args.config_path.display());

    let app = Application::new(config)?;
    signals::install_signal_handlers(app.shutdown_state())?;
    app.run()
}
