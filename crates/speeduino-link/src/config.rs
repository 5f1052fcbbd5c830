//! Link configuration
//!
//! Settings for the serial port and the half-duplex engine. Every field has a
//! default, so a config file only needs to name what it changes.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::protocol::{ProtocolError, DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT_MS};

/// Connection configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Serial port name (e.g. "/dev/ttyACM0" or "COM3")
    pub port_name: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Hold DTR high after opening. Arduino-based ECUs reset when DTR toggles.
    pub assert_dtr: bool,
    /// Give up on a fixed-length response once no byte has arrived for this
    /// many milliseconds. `None` waits indefinitely.
    pub response_timeout_ms: Option<u64>,
    /// Requests that may wait behind the one in flight
    pub queue_depth: usize,
    /// Buffered notifications per subscriber before the oldest are dropped
    pub event_capacity: usize,
    /// Size of a single read from the stream
    pub read_buffer_size: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            assert_dtr: true,
            response_timeout_ms: Some(DEFAULT_TIMEOUT_MS),
            queue_depth: 16,
            event_capacity: 64,
            read_buffer_size: 512,
        }
    }
}

impl LinkConfig {
    /// Default configuration for the given port
    pub fn for_port(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            ..Self::default()
        }
    }

    /// Parse and validate a JSON config
    pub fn from_json_str(json: &str) -> Result<Self, ProtocolError> {
        let config: LinkConfig = serde_json::from_str(json)
            .map_err(|e| ProtocolError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ProtocolError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.baud_rate == 0 {
            return Err(ProtocolError::InvalidConfig("baud_rate must be non-zero".into()));
        }
        if self.queue_depth == 0 {
            return Err(ProtocolError::InvalidConfig("queue_depth must be non-zero".into()));
        }
        if self.event_capacity == 0 {
            return Err(ProtocolError::InvalidConfig(
                "event_capacity must be non-zero".into(),
            ));
        }
        if self.read_buffer_size == 0 {
            return Err(ProtocolError::InvalidConfig(
                "read_buffer_size must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Idle guard for fixed-length exchanges
    pub fn response_timeout(&self) -> Option<Duration> {
        self.response_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = LinkConfig::default();
        assert_eq!(config.baud_rate, 115200);
        assert!(config.assert_dtr);
        assert_eq!(config.response_timeout(), Some(Duration::from_millis(2000)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config =
            LinkConfig::from_json_str(r#"{ "port_name": "/dev/ttyACM0", "baud_rate": 9600 }"#)
                .unwrap();
        assert_eq!(config.port_name, "/dev/ttyACM0");
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.queue_depth, 16);
    }

    #[test]
    fn test_null_timeout_disables_guard() {
        let config = LinkConfig::from_json_str(r#"{ "response_timeout_ms": null }"#).unwrap();
        assert_eq!(config.response_timeout(), None);
    }

    #[test]
    fn test_rejects_zero_queue() {
        let err = LinkConfig::from_json_str(r#"{ "queue_depth": 0 }"#).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidConfig(_)));
    }

    #[test]
    fn test_rejects_malformed_json() {
        let err = LinkConfig::from_json_str("{ port_name: ").unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidConfig(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "port_name": "COM3", "assert_dtr": false }}"#).unwrap();

        let config = LinkConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.port_name, "COM3");
        assert!(!config.assert_dtr);
    }

    #[test]
    fn test_missing_file() {
        let err = LinkConfig::from_json_file("/nonexistent/link.json").unwrap_err();
        assert!(matches!(err, ProtocolError::IoError(_)));
    }
}
