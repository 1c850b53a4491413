//! Error types for the module system.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModuleSystemError {
    #[error("Module not found: {0}")]
    NotFound(String),

    #[error("Module already loaded: {0}")]
    AlreadyLoaded(String),

    #[error("Library loading error: {0}")]
    LoadError(String),

    #[error("Missing module entry point: {0}")]
    SymbolError(String),

    #[error("Module logic error: {0}")]
    LogicError(String),
}
