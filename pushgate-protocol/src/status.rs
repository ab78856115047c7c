//! Status codes reported by the gateway in error responses.

use std::fmt;

/// Status byte of an error response.
///
/// The assigned values are part of the gateway protocol; any byte without an
/// assigned meaning is preserved as [`StatusCode::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    NoError,
    Processing,
    MissingDeviceToken,
    MissingTopic,
    MissingPayload,
    InvalidTokenSize,
    InvalidTopicSize,
    InvalidPayloadSize,
    InvalidToken,
    Shutdown,
    Unknown,
    Other(u8),
}

impl StatusCode {
    /// Returns whether the failed notification is safe to send again unchanged.
    ///
    /// Only `Shutdown` qualifies: the gateway closed the connection for
    /// operational reasons that say nothing about the notification itself.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StatusCode::Shutdown)
    }

    /// Returns the wire value of this status.
    pub fn as_u8(&self) -> u8 {
        match self {
            StatusCode::NoError => 0,
            StatusCode::Processing => 1,
            StatusCode::MissingDeviceToken => 2,
            StatusCode::MissingTopic => 3,
            StatusCode::MissingPayload => 4,
            StatusCode::InvalidTokenSize => 5,
            StatusCode::InvalidTopicSize => 6,
            StatusCode::InvalidPayloadSize => 7,
            StatusCode::InvalidToken => 8,
            StatusCode::Shutdown => 10,
            StatusCode::Unknown => 255,
            StatusCode::Other(code) => *code,
        }
    }
}

impl From<u8> for StatusCode {
    fn from(code: u8) -> Self {
        match code {
            0 => StatusCode::NoError,
            1 => StatusCode::Processing,
            2 => StatusCode::MissingDeviceToken,
            3 => StatusCode::MissingTopic,
            4 => StatusCode::MissingPayload,
            5 => StatusCode::InvalidTokenSize,
            6 => StatusCode::InvalidTopicSize,
            7 => StatusCode::InvalidPayloadSize,
            8 => StatusCode::InvalidToken,
            10 => StatusCode::Shutdown,
            255 => StatusCode::Unknown,
            other => StatusCode::Other(other),
        }
    }
}

impl From<StatusCode> for u8 {
    fn from(status: StatusCode) -> Self {
        status.as_u8()
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusCode::NoError => write!(f, "NO_ERROR"),
            StatusCode::Processing => write!(f, "PROCESSING"),
            StatusCode::MissingDeviceToken => write!(f, "MISSING_DEVICE_TOKEN"),
            StatusCode::MissingTopic => write!(f, "MISSING_TOPIC"),
            StatusCode::MissingPayload => write!(f, "MISSING_PAYLOAD"),
            StatusCode::InvalidTokenSize => write!(f, "INVALID_TOKEN_SIZE"),
            StatusCode::InvalidTopicSize => write!(f, "INVALID_TOPIC_SIZE"),
            StatusCode::InvalidPayloadSize => write!(f, "INVALID_PAYLOAD_SIZE"),
            StatusCode::InvalidToken => write!(f, "INVALID_TOKEN"),
            StatusCode::Shutdown => write!(f, "SHUTDOWN"),
            StatusCode::Unknown => write!(f, "UNKNOWN"),
            StatusCode::Other(code) => write!(f, "STATUS_{}", code),
        }
    }
}
