//! Binary frame formats of the notification protocol.
//!
//! Outbound notification frame (5 bytes header + items):
//!
//! ```text
//! +---------+--------------+---------------------------------------+
//! | command | items_length | item | item | ...                     |
//! | 1 byte  |   4 bytes    | items_length bytes                    |
//! +---------+--------------+---------------------------------------+
//!
//! item:
//! +---------+-------------+-------------------+
//! | item_id | data_length | data              |
//! | 1 byte  |   2 bytes   | data_length bytes |
//! +---------+-------------+-------------------+
//! ```
//!
//! Inbound error response (exactly 6 bytes, no length prefix):
//!
//! ```text
//! +---------+--------+----------+
//! | command | status | sequence |
//! | 1 byte  | 1 byte | 4 bytes  |
//! +---------+--------+----------+
//! ```
//!
//! All integers are big-endian. The error response is the only frame the
//! gateway sends; because it carries no length, an unknown command cannot be
//! skipped and leaves the stream unreadable.

use crate::error::ProtocolError;
use crate::status::StatusCode;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Command byte of an outbound notification frame.
pub const COMMAND_SEND_NOTIFICATION: u8 = 2;

/// Command byte of an inbound error response.
pub const COMMAND_ERROR_RESPONSE: u8 = 8;

/// Size of an error response in bytes.
pub const ERROR_RESPONSE_SIZE: usize = 6;

/// Size of the notification frame header (command + items length).
pub const FRAME_HEADER_SIZE: usize = 5;

/// Size of an item header (id + data length).
pub const ITEM_HEADER_SIZE: usize = 3;

/// Item identifiers within a notification frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ItemId {
    DeviceToken = 1,
    Payload = 2,
    Identifier = 3,
    Expiration = 4,
    Priority = 5,
}

impl ItemId {
    fn name(&self) -> &'static str {
        match self {
            ItemId::DeviceToken => "device token",
            ItemId::Payload => "payload",
            ItemId::Identifier => "identifier",
            ItemId::Expiration => "expiration",
            ItemId::Priority => "priority",
        }
    }
}

impl TryFrom<u8> for ItemId {
    type Error = u8;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        match id {
            1 => Ok(ItemId::DeviceToken),
            2 => Ok(ItemId::Payload),
            3 => Ok(ItemId::Identifier),
            4 => Ok(ItemId::Expiration),
            5 => Ok(ItemId::Priority),
            other => Err(other),
        }
    }
}

/// A notification frame as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationFrame {
    /// Connection-scoped sequence number, echoed back in error responses.
    pub sequence: u32,
    pub token: Bytes,
    /// Encoded JSON payload.
    pub payload: Bytes,
    /// Expiration in seconds since the Unix epoch.
    pub expiration: Option<u32>,
    pub priority: Option<u8>,
}

impl NotificationFrame {
    /// Encodes the frame into bytes.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        let mut items = BytesMut::with_capacity(
            4 * ITEM_HEADER_SIZE + self.token.len() + self.payload.len() + 4 + 4 + 1,
        );

        put_item(&mut items, ItemId::DeviceToken, &self.token)?;
        put_item(&mut items, ItemId::Payload, &self.payload)?;
        put_item(&mut items, ItemId::Identifier, &self.sequence.to_be_bytes())?;
        if let Some(expiration) = self.expiration {
            put_item(&mut items, ItemId::Expiration, &expiration.to_be_bytes())?;
        }
        if let Some(priority) = self.priority {
            put_item(&mut items, ItemId::Priority, &[priority])?;
        }

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + items.len());
        buf.put_u8(COMMAND_SEND_NOTIFICATION);
        buf.put_u32(items.len() as u32);
        buf.put_slice(&items);

        Ok(buf)
    }

    /// Decodes a notification frame from bytes.
    ///
    /// Returns `Ok(None)` if more data is needed. Unknown items are skipped.
    /// Used by gateway-side tooling; the client never receives these frames.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }
        if buf[0] != COMMAND_SEND_NOTIFICATION {
            return Err(ProtocolError::UnknownCommand(buf[0]));
        }
        let items_len = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
        if buf.len() < FRAME_HEADER_SIZE + items_len {
            return Ok(None);
        }

        buf.advance(FRAME_HEADER_SIZE);
        let mut items = buf.split_to(items_len).freeze();

        let mut frame = NotificationFrame {
            sequence: 0,
            token: Bytes::new(),
            payload: Bytes::new(),
            expiration: None,
            priority: None,
        };

        while items.remaining() >= ITEM_HEADER_SIZE {
            let id = items.get_u8();
            let len = items.get_u16() as usize;
            if items.remaining() < len {
                break;
            }
            let mut data = items.split_to(len);
            match ItemId::try_from(id) {
                Ok(ItemId::DeviceToken) => frame.token = data,
                Ok(ItemId::Payload) => frame.payload = data,
                Ok(ItemId::Identifier) if len == 4 => frame.sequence = data.get_u32(),
                Ok(ItemId::Expiration) if len == 4 => frame.expiration = Some(data.get_u32()),
                Ok(ItemId::Priority) if len == 1 => frame.priority = Some(data.get_u8()),
                _ => {}
            }
        }

        Ok(Some(frame))
    }
}

fn put_item(buf: &mut BytesMut, id: ItemId, data: &[u8]) -> Result<(), ProtocolError> {
    if data.len() > u16::MAX as usize {
        return Err(ProtocolError::ItemTooLarge {
            item: id.name(),
            size: data.len(),
            max: u16::MAX as usize,
        });
    }
    buf.put_u8(id as u8);
    buf.put_u16(data.len() as u16);
    buf.put_slice(data);
    Ok(())
}

/// Error response sent by the gateway before it closes the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorResponse {
    pub status: StatusCode,
    /// Sequence number of the notification that failed.
    pub sequence: u32,
}

impl ErrorResponse {
    pub fn new(status: StatusCode, sequence: u32) -> Self {
        Self { status, sequence }
    }

    /// Encodes the response into its 6-byte wire form.
    pub fn encode(&self) -> [u8; ERROR_RESPONSE_SIZE] {
        let seq = self.sequence.to_be_bytes();
        [
            COMMAND_ERROR_RESPONSE,
            self.status.as_u8(),
            seq[0],
            seq[1],
            seq[2],
            seq[3],
        ]
    }

    /// Decodes an error response from bytes.
    ///
    /// Returns `Ok(Some(response))` if a complete response was decoded,
    /// `Ok(None)` if more data is needed, or `Err` on an unknown command.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if buf.len() < ERROR_RESPONSE_SIZE {
            return Ok(None);
        }

        let command = buf[0];
        if command != COMMAND_ERROR_RESPONSE {
            return Err(ProtocolError::UnknownCommand(command));
        }

        buf.advance(1);
        let status = StatusCode::from(buf.get_u8());
        let sequence = buf.get_u32();

        Ok(Some(Self { status, sequence }))
    }
}
