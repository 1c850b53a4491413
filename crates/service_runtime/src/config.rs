//! Runtime configuration types and defaults.

use crate::error::ServerError;
use conduit_event_system::DEFAULT_MAX_MESSAGE_SIZE;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default cap on output queued for a single connection.
pub const DEFAULT_MAX_PENDING_OUTPUT: usize = 1024 * 1024;

/// An `address:port` pair naming a listening socket.
///
/// Serialized as the string `"127.0.0.1:9000"`. Parsing only checks the
/// shape; whether the address is a valid IPv4 literal is decided by
/// [`SocketManagement::is_valid_ip`](crate::SocketManagement::is_valid_ip).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ListenAddress {
    pub address: String,
    pub port: u16,
}

impl ListenAddress {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }
}

impl FromStr for ListenAddress {
    type Err = ServerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (address, port) = s
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| ServerError::Validation(format!("'{s}' is not in ADDRESS:PORT form")))?;
        if address.is_empty() {
            return Err(ServerError::Validation(format!("'{s}' has no address")));
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| ServerError::Validation(format!("'{s}' has an invalid port: {e}")))?;
        Ok(Self::new(address, port))
    }
}

impl TryFrom<String> for ListenAddress {
    type Error = ServerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ListenAddress> for String {
    fn from(value: ListenAddress) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ListenAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Configuration structure for the service runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listening sockets bound at startup
    pub listeners: Vec<ListenAddress>,

    /// Largest message accepted from a client before its buffer is discarded
    pub max_message_size: usize,

    /// Unsent output a connection may accumulate before it is dropped
    pub max_pending_output: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listeners: vec![ListenAddress::new("127.0.0.1", 9000)],
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_pending_output: DEFAULT_MAX_PENDING_OUTPUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_listen_address() {
        let parsed: ListenAddress = "127.0.0.1:9000".parse().unwrap();
        assert_eq!(parsed, ListenAddress::new("127.0.0.1", 9000));
        assert_eq!(parsed.to_string(), "127.0.0.1:9000");

        assert!(matches!("127.0.0.1".parse::<ListenAddress>(), Err(ServerError::Validation(_))));
        assert!(matches!(":9000".parse::<ListenAddress>(), Err(ServerError::Validation(_))));
        assert!(matches!("127.0.0.1:99999".parse::<ListenAddress>(), Err(ServerError::Validation(_))));
    }

    #[test]
    fn test_listen_address_serializes_as_string() {
        let config = ServerConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"127.0.0.1:9000\""));

        let back: ServerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);

        let invalid = serde_json::from_str::<ServerConfig>(r#"{"listeners":["nope"]}"#);
        assert!(invalid.is_err());
    }
}
