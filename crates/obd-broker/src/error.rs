//! Broker Error Types

use std::sync::Arc;
use thiserror::Error;

/// Boxed error returned by a caller-supplied configure step
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Caller misuse detected before any I/O happens
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    /// Options were not given as an object
    #[error("connection options must be an object")]
    NotAnObject,

    /// Required field absent
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// Field present but unusable
    #[error("invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Errors raised by a transport while opening or running a link
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The line could not be opened
    #[error("{0}")]
    Open(String),

    /// I/O failure on an open line
    #[error("Serial port error: {0}")]
    Serial(String),

    /// The link was closed underneath us
    #[error("transport closed")]
    Closed,
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Serial(err.to_string())
    }
}

impl From<tokio_serial::Error> for TransportError {
    fn from(err: tokio_serial::Error) -> Self {
        TransportError::Open(err.to_string())
    }
}

/// Failure of a connection attempt, delivered to every waiter of that attempt
#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
    /// The transport failed to open
    #[error("failed to connect to ecu: {0}")]
    Open(#[source] TransportError),

    /// The configure step failed after the transport opened
    #[error("failed to connect to ecu: {0}")]
    Configure(#[source] Arc<dyn std::error::Error + Send + Sync + 'static>),

    /// The transport or the configure step panicked
    #[error("failed to connect to ecu: attempt aborted: {0}")]
    Aborted(String),

    /// The attempt was superseded by a broker reset or cancelled
    #[error("connection attempt was abandoned")]
    Abandoned,
}

impl ConnectionError {
    /// Wrap a configure-step failure
    pub fn configure(err: BoxError) -> Self {
        ConnectionError::Configure(Arc::from(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_open_error_message() {
        let err = ConnectionError::Open(TransportError::Open("fake error".into()));
        assert_eq!(err.to_string(), "failed to connect to ecu: fake error");
    }

    #[test]
    fn test_configure_error_keeps_source() {
        let err = ConnectionError::configure("adapter said no".into());
        assert_eq!(err.to_string(), "failed to connect to ecu: adapter said no");
        assert_eq!(err.source().unwrap().to_string(), "adapter said no");
    }

    #[test]
    fn test_aborted_message() {
        let err = ConnectionError::Aborted("driver fault".into());
        assert_eq!(err.to_string(), "failed to connect to ecu: attempt aborted: driver fault");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe gone");
        let err: TransportError = io.into();
        assert_eq!(err, TransportError::Serial("pipe gone".into()));
    }
}
