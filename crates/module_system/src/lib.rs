//! Module system for dynamic loading and management of Conduit modules.
//!
//! Modules are shared objects found at `<root>/modules/src/<name>.so` under
//! either the core root or the project root. This crate maps them, checks
//! their identity, runs their instantiation step and tears them down again,
//! always removing their event registrations before their code is unmapped.

mod error;
mod instance;
mod manager;
mod paths;

pub use error::ModuleSystemError;
pub use instance::ModuleInstance;
pub use manager::ModuleManagement;
pub use paths::{get_basename, is_valid_module_name, module_library_path, ModuleRoots, MODULE_EXTENSION};

/// Re-export commonly used types for module development
pub use conduit_event_system::{Module, ModuleContext, ModuleError};
pub use libloading::Library;
