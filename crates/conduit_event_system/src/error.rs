//! Error types for the event system.

use thiserror::Error;

/// Errors raised while talking back to clients or framing their input.
#[derive(Error, Debug)]
pub enum EventError {
    #[error("Response failed: {0}")]
    ResponseFailed(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Message exceeds {limit} bytes without a delimiter")]
    MessageTooLarge { limit: usize },
}
