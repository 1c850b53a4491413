//! Core runtime implementation and loop lifecycle management.

pub mod core;

pub use self::core::Runtime;
