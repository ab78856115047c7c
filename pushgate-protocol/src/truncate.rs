//! Truncation of alert text to fit the payload budget.
//!
//! Only human-readable alert text is ever shortened: the bare `alert` string,
//! the `body` of an alert dictionary and each of its `loc-args`. Everything
//! else in the payload is left untouched, so a payload whose non-text content
//! alone exceeds the budget cannot be made to fit.
//!
//! Text is removed one whole character at a time from the end of whichever
//! choppable field is currently longest in UTF-8 bytes, which spreads the loss
//! over the fields and never splits a multi-byte character.

use crate::error::ProtocolError;
use crate::payload::{Alert, Payload};

/// A text field eligible for truncation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choppable {
    /// `aps.alert` when the alert is a bare string.
    Alert,
    /// `aps.alert.body`.
    AlertBody,
    /// `aps.alert.loc-args[i]`.
    AlertLocArg(usize),
}

impl Choppable {
    /// Lists the choppable fields of a payload in tie-breaking order.
    pub fn all(payload: &Payload) -> Vec<Choppable> {
        match &payload.aps.alert {
            None => Vec::new(),
            Some(Alert::Text(_)) => vec![Choppable::Alert],
            Some(Alert::Dictionary(dict)) => {
                let mut fields = Vec::new();
                if dict.body.is_some() {
                    fields.push(Choppable::AlertBody);
                }
                if let Some(ref args) = dict.loc_args {
                    fields.extend((0..args.len()).map(Choppable::AlertLocArg));
                }
                fields
            }
        }
    }

    pub fn get<'a>(&self, payload: &'a Payload) -> Option<&'a str> {
        match (self, payload.aps.alert.as_ref()?) {
            (Choppable::Alert, Alert::Text(text)) => Some(text.as_str()),
            (Choppable::AlertBody, Alert::Dictionary(dict)) => dict.body.as_deref(),
            (Choppable::AlertLocArg(i), Alert::Dictionary(dict)) => {
                dict.loc_args.as_ref()?.get(*i).map(String::as_str)
            }
            _ => None,
        }
    }

    pub fn get_mut<'a>(&self, payload: &'a mut Payload) -> Option<&'a mut String> {
        match (self, payload.aps.alert.as_mut()?) {
            (Choppable::Alert, Alert::Text(text)) => Some(text),
            (Choppable::AlertBody, Alert::Dictionary(dict)) => dict.body.as_mut(),
            (Choppable::AlertLocArg(i), Alert::Dictionary(dict)) => {
                dict.loc_args.as_mut()?.get_mut(*i)
            }
            _ => None,
        }
    }
}

/// Returns whether the encoded payload exceeds `max_bytes`.
pub fn is_too_long(payload: &Payload, max_bytes: usize) -> Result<bool, ProtocolError> {
    Ok(payload.encoded_len()? > max_bytes)
}

/// Shortens the choppable text of `payload` until its encoding fits in
/// `max_bytes`.
///
/// A payload that already fits is returned unchanged, so truncating twice with
/// the same budget gives the same result as truncating once.
pub fn truncate(payload: &Payload, max_bytes: usize) -> Result<Payload, ProtocolError> {
    let mut payload = payload.clone();
    let mut size = payload.encoded_len()?;

    while size > max_bytes {
        let removed = longest_choppable(&payload)
            .and_then(|field| field.get_mut(&mut payload))
            .and_then(String::pop);

        let Some(ch) = removed else {
            return Err(ProtocolError::BodyTooLong {
                size,
                max: max_bytes,
            });
        };
        size -= escaped_len(ch);

        if size <= max_bytes {
            size = payload.encoded_len()?;
        }
    }

    Ok(payload)
}

/// Finds the non-empty choppable field with the most UTF-8 bytes. Ties go to
/// the field listed first by [`Choppable::all`].
fn longest_choppable(payload: &Payload) -> Option<Choppable> {
    let mut longest = None;
    let mut longest_len = 0;
    for field in Choppable::all(payload) {
        let len = field.get(payload).map_or(0, str::len);
        if len > longest_len {
            longest = Some(field);
            longest_len = len;
        }
    }
    longest
}

/// Bytes a character occupies inside a compact JSON string.
fn escaped_len(ch: char) -> usize {
    match ch {
        '"' | '\\' | '\u{08}' | '\u{0C}' | '\n' | '\r' | '\t' => 2,
        '\u{00}'..='\u{1F}' => 6,
        _ => ch.len_utf8(),
    }
}
