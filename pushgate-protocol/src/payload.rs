//! Notification payload model.
//!
//! The payload is the JSON document delivered to the device:
//!
//! ```text
//! {"aps":{"alert":"Hello","badge":1},"custom":"value"}
//! ```
//!
//! It is always encoded compactly (no insignificant whitespace) and with
//! non-ASCII text written as raw UTF-8, because every escaped byte counts
//! against the payload budget.

use crate::error::ProtocolError;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Top-level notification payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    /// The reserved `aps` dictionary interpreted by the device.
    pub aps: Aps,
    /// Application-defined keys delivered alongside `aps`. Never truncated.
    #[serde(flatten)]
    pub custom: Map<String, Value>,
}

impl Payload {
    /// Creates a payload with a plain text alert.
    pub fn alert(text: impl Into<String>) -> Self {
        Self {
            aps: Aps {
                alert: Some(Alert::Text(text.into())),
                ..Default::default()
            },
            custom: Map::new(),
        }
    }

    pub fn with_badge(mut self, badge: u32) -> Self {
        self.aps.badge = Some(badge);
        self
    }

    pub fn with_sound(mut self, sound: impl Into<String>) -> Self {
        self.aps.sound = Some(sound.into());
        self
    }

    pub fn with_custom(mut self, key: impl Into<String>, value: Value) -> Self {
        self.custom.insert(key.into(), value);
        self
    }

    /// Encodes the payload as compact JSON.
    pub fn to_json(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Returns the length of the compact JSON encoding in bytes.
    pub fn encoded_len(&self) -> Result<usize, ProtocolError> {
        Ok(self.to_json()?.len())
    }
}

/// The `aps` dictionary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Aps {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert: Option<Alert>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badge: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sound: Option<String>,
    #[serde(
        rename = "content-available",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub content_available: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

/// Alert shown to the user: either a bare string or a dictionary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Alert {
    Text(String),
    Dictionary(AlertDictionary),
}

/// Structured alert with localization support.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertDictionary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(rename = "loc-key", default, skip_serializing_if = "Option::is_none")]
    pub loc_key: Option<String>,
    #[serde(rename = "loc-args", default, skip_serializing_if = "Option::is_none")]
    pub loc_args: Option<Vec<String>>,
    #[serde(
        rename = "action-loc-key",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub action_loc_key: Option<String>,
    #[serde(
        rename = "launch-image",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub launch_image: Option<String>,
}

/// A notification addressed to one device.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Raw device token bytes.
    pub token: Bytes,
    pub payload: Payload,
    /// Point in time after which the gateway may discard the notification.
    pub expiration: Option<DateTime<Utc>>,
    pub priority: Option<u8>,
    /// Caller correlation value handed back on failure. Never sent.
    pub identifier: Option<String>,
}

impl Notification {
    /// Deliver immediately.
    pub const PRIORITY_IMMEDIATE: u8 = 10;
    /// Deliver at a time that conserves power on the device.
    pub const PRIORITY_CONSERVE_POWER: u8 = 5;

    pub fn new(token: impl Into<Bytes>, payload: Payload) -> Self {
        Self {
            token: token.into(),
            payload,
            expiration: None,
            priority: None,
            identifier: None,
        }
    }

    pub fn with_expiration(mut self, expiration: DateTime<Utc>) -> Self {
        self.expiration = Some(expiration);
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_multibyte_encoded_verbatim() {
        let payload = Payload::alert("\u{1F414}");
        let encoded = payload.to_json().unwrap();
        assert_eq!(encoded, "{\"aps\":{\"alert\":\"\u{1F414}\"}}".as_bytes());
    }

    #[test]
    fn test_absent_fields_omitted() {
        let payload = Payload::default();
        assert_eq!(payload.to_json().unwrap(), br#"{"aps":{}}"#);
    }

    #[test]
    fn test_custom_keys_flattened() {
        let payload = Payload::alert("hi")
            .with_badge(3)
            .with_custom("room", json!("!abc:example.org"));
        let value: Value = serde_json::from_slice(&payload.to_json().unwrap()).unwrap();
        assert_eq!(value["aps"]["alert"], "hi");
        assert_eq!(value["aps"]["badge"], 3);
        assert_eq!(value["room"], "!abc:example.org");
    }

    #[test]
    fn test_alert_dictionary_keys() {
        let payload = Payload {
            aps: Aps {
                alert: Some(Alert::Dictionary(AlertDictionary {
                    body: Some("body".to_string()),
                    loc_key: Some("MSG".to_string()),
                    loc_args: Some(vec!["a".to_string(), "b".to_string()]),
                    ..Default::default()
                })),
                content_available: Some(1),
                ..Default::default()
            },
            custom: Map::new(),
        };
        let encoded = String::from_utf8(payload.to_json().unwrap()).unwrap();
        assert_eq!(
            encoded,
            r#"{"aps":{"alert":{"body":"body","loc-key":"MSG","loc-args":["a","b"]},"content-available":1}}"#
        );

        let parsed: Payload = serde_json::from_str(&encoded).unwrap();
        assert_eq!(parsed, payload);
    }

    #[test]
    fn test_notification_builder() {
        let n = Notification::new(&b"\x01\x02"[..], Payload::alert("x"))
            .with_priority(Notification::PRIORITY_CONSERVE_POWER)
            .with_identifier("id-1");
        assert_eq!(n.token.as_ref(), b"\x01\x02");
        assert_eq!(n.priority, Some(5));
        assert_eq!(n.identifier.as_deref(), Some("id-1"));
        assert!(n.expiration.is_none());
    }
}
