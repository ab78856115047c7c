//! Client error types.

use pushgate_protocol::ProtocolError;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(ProtocolError),

    #[error("connection dead")]
    ConnectionDead,

    #[error("payload body too long: {size} bytes (max {max})")]
    BodyTooLong { size: usize, max: usize },

    #[error("timed out")]
    Timeout,

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),

    #[error("no feedback address configured")]
    NoFeedbackAddress,
}

impl ClientError {
    /// Returns whether the same notification may succeed on another connection.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Io(_) => true,
            ClientError::Timeout => true,
            ClientError::ConnectionDead => true,
            ClientError::TlsHandshake(_) => true,
            _ => false,
        }
    }
}

impl From<ProtocolError> for ClientError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::BodyTooLong { size, max } => ClientError::BodyTooLong { size, max },
            other => ClientError::Protocol(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_too_long_lifted() {
        let err: ClientError = ProtocolError::BodyTooLong {
            size: 4000,
            max: 2048,
        }
        .into();
        assert!(matches!(
            err,
            ClientError::BodyTooLong {
                size: 4000,
                max: 2048
            }
        ));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_retryable() {
        assert!(ClientError::ConnectionDead.is_retryable());
        assert!(ClientError::Timeout.is_retryable());
        assert!(!ClientError::TlsConfig("bad".to_string()).is_retryable());
        assert!(!ClientError::Protocol(ProtocolError::UnknownCommand(1)).is_retryable());
    }
}
