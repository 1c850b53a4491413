//! Shutdown coordination between signal handlers, modules and the runtime loop.
//!
//! The runtime blocks in `stall` with no timeout, so initiating shutdown also
//! fires a wake-up hook that makes a tracked descriptor readable.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::info;

type Waker = Arc<dyn Fn() + Send + Sync>;

/// Shared shutdown state for coordinating graceful shutdown across components.
#[derive(Clone, Default)]
pub struct ShutdownState {
    /// Flag indicating shutdown has been initiated - the loop stops after the current iteration
    shutdown_initiated: Arc<AtomicBool>,
    /// Flag indicating modules have been unloaded and sockets closed
    shutdown_complete: Arc<AtomicBool>,
    waker: Arc<OnceLock<Waker>>,
}

impl std::fmt::Debug for ShutdownState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownState")
            .field("shutdown_initiated", &self.is_shutdown_initiated())
            .field("shutdown_complete", &self.is_shutdown_complete())
            .finish()
    }
}

impl ShutdownState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the hook used to interrupt a blocked wait. Only the first call has effect.
    pub fn set_waker(&self, waker: impl Fn() + Send + Sync + 'static) -> bool {
        self.waker.set(Arc::new(waker)).is_ok()
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Acquire)
    }

    pub fn is_shutdown_complete(&self) -> bool {
        self.shutdown_complete.load(Ordering::Acquire)
    }

    /// Initiates shutdown and wakes the runtime loop.
    pub fn initiate_shutdown(&self) {
        if !self.shutdown_initiated.swap(true, Ordering::AcqRel) {
            info!("🛑 Shutdown initiated - the runtime loop will stop after this iteration");
        }
        if let Some(waker) = self.waker.get() {
            waker();
        }
    }

    /// Marks shutdown as complete - modules are unloaded and sockets closed.
    pub fn complete_shutdown(&self) {
        self.shutdown_complete.store(true, Ordering::Release);
        info!("✅ Shutdown complete");
    }
}
