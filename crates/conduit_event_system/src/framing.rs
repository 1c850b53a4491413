//! Message framing for inbound connection bytes.
//!
//! Clients send newline-delimited JSON envelopes:
//!
//! ```json
//! {"event": "chat.message", "data": {"text": "hello"}}
//! ```
//!
//! `data` is optional and defaults to `null`. The event name selects which
//! event is triggered; the runtime never looks inside `data`.

use crate::client::ClientConnectionRef;
use crate::error::EventError;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Default upper bound for a single undelimited message.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// The routing envelope every inbound line must carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Event data passed to handlers of events triggered by client input.
#[derive(Debug, Clone)]
pub struct ClientMessage {
    pub connection: ClientConnectionRef,
    pub event: String,
    pub data: serde_json::Value,
}

/// Splits a receive buffer into complete envelopes.
#[derive(Debug, Clone, Copy)]
pub struct MessageFramer {
    max_message_size: usize,
}

impl Default for MessageFramer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_SIZE)
    }
}

impl MessageFramer {
    pub fn new(max_message_size: usize) -> Self {
        Self { max_message_size }
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Extracts every complete envelope from `buffer` and drains the consumed bytes.
    ///
    /// A trailing partial line is left in place. Lines that fail to parse are
    /// dropped with a warning. If the remaining partial line already exceeds the
    /// size limit the buffer is cleared and `MessageTooLarge` is returned.
    pub fn extract(&self, buffer: &mut Vec<u8>) -> Result<Vec<MessageEnvelope>, EventError> {
        let mut envelopes = Vec::new();
        let mut consumed = 0;

        while let Some(offset) = buffer[consumed..].iter().position(|&b| b == b'\n') {
            let line = &buffer[consumed..consumed + offset];
            consumed += offset + 1;

            let line = trim_ascii(line);
            if line.is_empty() {
                continue;
            }
            if line.len() > self.max_message_size {
                warn!("Dropping {} byte message: limit is {}", line.len(), self.max_message_size);
                continue;
            }

            match serde_json::from_slice::<MessageEnvelope>(line) {
                Ok(envelope) => envelopes.push(envelope),
                Err(e) => warn!("Dropping malformed message: {}", e),
            }
        }

        buffer.drain(..consumed);

        if buffer.len() > self.max_message_size {
            buffer.clear();
            return Err(EventError::MessageTooLarge {
                limit: self.max_message_size,
            });
        }

        Ok(envelopes)
    }
}

fn trim_ascii(mut bytes: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = bytes {
        if first.is_ascii_whitespace() {
            bytes = rest;
        } else {
            break;
        }
    }
    while let [rest @ .., last] = bytes {
        if last.is_ascii_whitespace() {
            bytes = rest;
        } else {
            break;
        }
    }
    bytes
}
