//! Protocol errors

use thiserror::Error;

/// Errors that can occur while talking to the ECU
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The serial port could not be opened or configured
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// The byte stream failed mid-exchange. The connection is closed afterwards.
    #[error("Transport error: {0}")]
    TransportError(String),

    /// A fixed-length response stalled for longer than the response guard.
    #[error("Response timeout: received {received} of {expected} bytes")]
    Timeout {
        /// Bytes the response spec asked for
        expected: usize,
        /// Bytes received before the guard fired
        received: usize,
    },

    /// The link is closed
    #[error("Not connected to ECU")]
    NotConnected,

    /// No device at the configured port name
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// A setting or request that cannot be used
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display() {
        let err = ProtocolError::Timeout {
            expected: 4,
            received: 1,
        };
        assert_eq!(err.to_string(), "Response timeout: received 1 of 4 bytes");
    }

    #[test]
    fn test_io_error_converts() {
        let err: ProtocolError =
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "broken pipe").into();
        assert!(matches!(err, ProtocolError::IoError(_)));
    }
}
