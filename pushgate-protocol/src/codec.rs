//! Encoder and decoder for the notification protocol.

use crate::error::ProtocolError;
use crate::frame::{ErrorResponse, NotificationFrame};
use crate::payload::Notification;
use crate::truncate::truncate;
use crate::MAX_PAYLOAD_SIZE;
use bytes::{Bytes, BytesMut};

/// Turns notifications into wire frames.
///
/// Carries the payload budget explicitly so that every connection can be
/// configured independently.
#[derive(Debug, Clone, Copy)]
pub struct Encoder {
    max_payload_size: usize,
}

impl Encoder {
    pub fn new(max_payload_size: usize) -> Self {
        Self { max_payload_size }
    }

    /// Returns a copy of the notification with its alert text truncated to fit
    /// the payload budget.
    pub fn prepare(&self, notification: &Notification) -> Result<Notification, ProtocolError> {
        let payload = truncate(&notification.payload, self.max_payload_size)?;
        Ok(Notification {
            payload,
            ..notification.clone()
        })
    }

    /// Encodes a prepared notification under the given sequence number.
    pub fn encode(
        &self,
        sequence: u32,
        notification: &Notification,
    ) -> Result<BytesMut, ProtocolError> {
        let payload = notification.payload.to_json()?;
        if payload.len() > self.max_payload_size {
            return Err(ProtocolError::BodyTooLong {
                size: payload.len(),
                max: self.max_payload_size,
            });
        }

        let expiration = match notification.expiration {
            Some(at) => {
                let secs = at.timestamp();
                Some(u32::try_from(secs).map_err(|_| ProtocolError::InvalidExpiration(secs))?)
            }
            None => None,
        };

        let frame = NotificationFrame {
            sequence,
            token: notification.token.clone(),
            payload: Bytes::from(payload),
            expiration,
            priority: notification.priority,
        };
        frame.encode()
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new(MAX_PAYLOAD_SIZE)
    }
}

/// Accumulates inbound bytes and decodes error responses.
pub struct Decoder {
    buffer: BytesMut,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(64),
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next error response from the buffer.
    pub fn decode_error_response(&mut self) -> Result<Option<ErrorResponse>, ProtocolError> {
        ErrorResponse::decode(&mut self.buffer)
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
