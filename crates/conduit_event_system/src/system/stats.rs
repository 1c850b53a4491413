/// Statistics tracking for the event bus
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of event bus activity for monitoring
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventStats {
    /// Number of currently registered events
    pub total_events: usize,
    /// Number of currently registered handlers across all events
    pub total_handlers: usize,
    /// Number of currently registered preprocessors across all events
    pub total_preprocessors: usize,
    /// Triggers that reached the handler chain
    pub events_delivered: u64,
    /// Triggers suppressed by a preprocessor
    pub events_vetoed: u64,
    /// Triggers naming an event that does not exist
    pub events_missed: u64,
    /// Individual handler invocations
    pub handler_invocations: u64,
    /// Handler or preprocessor calls that panicked
    pub callback_panics: u64,
}

#[derive(Debug, Default)]
pub(super) struct Counters {
    pub delivered: AtomicU64,
    pub vetoed: AtomicU64,
    pub missed: AtomicU64,
    pub invocations: AtomicU64,
    pub panics: AtomicU64,
}

impl Counters {
    #[inline]
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn read(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}
