//! # pushgate-protocol
//!
//! Binary notification protocol for pushgate.
//!
//! This crate provides:
//! - The notification payload model and its compact JSON encoding
//! - Character-safe truncation of alert text to fit the payload budget
//! - Outbound notification framing and inbound error-response decoding
//! - Gateway status codes and feedback record decoding
//!
//! Nothing in here performs I/O.

pub mod codec;
pub mod error;
pub mod feedback;
pub mod frame;
pub mod payload;
pub mod status;
pub mod truncate;

pub use codec::{Decoder, Encoder};
pub use error::ProtocolError;
pub use feedback::FeedbackRecord;
pub use frame::{ErrorResponse, ItemId, NotificationFrame, ERROR_RESPONSE_SIZE};
pub use payload::{Alert, AlertDictionary, Aps, Notification, Payload};
pub use status::StatusCode;
pub use truncate::{truncate, Choppable};

/// Maximum serialized payload size accepted by the gateway (2 KiB).
pub const MAX_PAYLOAD_SIZE: usize = 2048;

/// Default port of the notification gateway.
pub const DEFAULT_GATEWAY_PORT: u16 = 2195;

/// Default port of the feedback service.
pub const DEFAULT_FEEDBACK_PORT: u16 = 2196;
