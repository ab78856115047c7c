//! Protocol error types.

use thiserror::Error;

/// Errors that can occur while building or parsing protocol frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown command: {0}")]
    UnknownCommand(u8),

    #[error("item {item} too large: {size} bytes (max {max})")]
    ItemTooLarge {
        item: &'static str,
        size: usize,
        max: usize,
    },

    #[error("expiration out of range: {0}")]
    InvalidExpiration(i64),

    #[error("payload body too long: {size} bytes (max {max})")]
    BodyTooLong { size: usize, max: usize },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProtocolError {
    /// Returns whether this error is caused by the notification content rather
    /// than the connection it was sent on.
    pub fn is_content_error(&self) -> bool {
        matches!(
            self,
            ProtocolError::ItemTooLarge { .. }
                | ProtocolError::InvalidExpiration(_)
                | ProtocolError::BodyTooLong { .. }
                | ProtocolError::Json(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_errors() {
        assert!(ProtocolError::BodyTooLong { size: 3000, max: 2048 }.is_content_error());
        assert!(ProtocolError::InvalidExpiration(-1).is_content_error());
        assert!(!ProtocolError::UnknownCommand(7).is_content_error());
    }

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::UnknownCommand(7);
        assert!(err.to_string().contains('7'));

        let err = ProtocolError::BodyTooLong {
            size: 3000,
            max: 2048,
        };
        let msg = err.to_string();
        assert!(msg.contains("3000"));
        assert!(msg.contains("2048"));

        let err = ProtocolError::ItemTooLarge {
            item: "payload",
            size: 70000,
            max: 65535,
        };
        assert!(err.to_string().contains("payload"));
    }
}
