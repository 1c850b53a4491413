/// Event bus module - broken down into manageable components
mod core;
mod emitters;
mod handlers;
mod stats;

// Re-export all public items from submodules
pub use self::core::EventHandling;
pub use emitters::MessageSource;
pub use stats::EventStats;
