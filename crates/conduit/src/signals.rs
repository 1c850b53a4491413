//! Signal handling for graceful shutdown.
//!
//! SIGINT and SIGTERM initiate shutdown; the runtime's wake-up socket makes a
//! blocked wait return so the loop notices. A second signal while shutdown is
//! already under way exits immediately.

use conduit_event_system::ShutdownState;
use tracing::{info, warn};

/// Installs the process-wide termination handler.
///
/// Can only be installed once per process.
pub fn install_signal_handlers(shutdown: ShutdownState) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        if shutdown.is_shutdown_initiated() {
            warn!("⚠️ Second shutdown signal received, exiting immediately");
            std::process::exit(130);
        }
        info!("📡 Received shutdown signal - initiating graceful shutdown");
        shutdown.initiate_shutdown();
    })?;
    info!("📡 Signal handlers installed");
    Ok(())
}
