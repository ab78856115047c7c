//! Feedback service record format.
//!
//! The feedback service streams one record per device that stopped accepting
//! notifications, then closes the connection:
//!
//! ```text
//! +-----------+--------------+-------------------+
//! | timestamp | token_length | token             |
//! |  4 bytes  |   2 bytes    | token_length bytes|
//! +-----------+--------------+-------------------+
//! ```

use bytes::{Buf, Bytes, BytesMut};
use chrono::{DateTime, Utc};

/// Size of the fixed record header in bytes.
pub const FEEDBACK_HEADER_SIZE: usize = 6;

/// A device the gateway reported as no longer reachable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackRecord {
    /// When the gateway determined the app was no longer on the device.
    pub timestamp: DateTime<Utc>,
    /// Raw device token bytes.
    pub token: Bytes,
}

impl FeedbackRecord {
    /// Decodes one record from the front of `buf`.
    ///
    /// Returns `None` if the buffer does not yet hold a complete record.
    pub fn decode(buf: &mut BytesMut) -> Option<Self> {
        if buf.len() < FEEDBACK_HEADER_SIZE {
            return None;
        }
        let token_len = u16::from_be_bytes([buf[4], buf[5]]) as usize;
        if buf.len() < FEEDBACK_HEADER_SIZE + token_len {
            return None;
        }

        let secs = buf.get_u32();
        buf.advance(2);
        let token = buf.split_to(token_len).freeze();

        Some(Self {
            timestamp: DateTime::from_timestamp(secs as i64, 0).unwrap_or_default(),
            token,
        })
    }

    /// Encodes the record into bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FEEDBACK_HEADER_SIZE + self.token.len());
        buf.extend_from_slice(&(self.timestamp.timestamp() as u32).to_be_bytes());
        buf.extend_from_slice(&(self.token.len() as u16).to_be_bytes());
        buf.extend_from_slice(&self.token);
        buf
    }
}
