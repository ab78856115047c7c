//! Ledger of notifications written to the gateway whose fate is unknown.
//!
//! The gateway never acknowledges a notification. It reports only the first
//! one it rejects, then stops processing the stream and closes the
//! connection. The ledger keeps every written notification long enough to
//! act on such a report:
//! - everything sent before the failed sequence was accepted
//! - everything sent after it was discarded and must be sent again
//!
//! A record older than the retention window is assumed accepted: the gateway
//! would have reported it by then.

use pushgate_protocol::Notification;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Default retention window for sent records.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(60);

/// A notification written to the gateway.
#[derive(Debug, Clone)]
pub struct SentRecord {
    pub sequence: u32,
    pub sent_at: Instant,
    pub notification: Notification,
}

/// Outcome of resolving an error response against the ledger.
#[derive(Debug, Default)]
pub struct Resolution {
    /// The record the gateway rejected, if it was still held.
    pub failed: Option<SentRecord>,
    /// Records written after the failed one, in ascending sequence order.
    pub later: Vec<SentRecord>,
}

/// Sent records keyed by sequence number.
#[derive(Debug)]
pub struct Ledger {
    records: BTreeMap<u32, SentRecord>,
    retention: Duration,
    last_failed_sequence: Option<u32>,
}

impl Ledger {
    pub fn new(retention: Duration) -> Self {
        Self {
            records: BTreeMap::new(),
            retention,
            last_failed_sequence: None,
        }
    }

    /// Records a notification written under `sequence`.
    pub fn record(&mut self, sequence: u32, notification: Notification, now: Instant) {
        self.records.insert(
            sequence,
            SentRecord {
                sequence,
                sent_at: now,
                notification,
            },
        );
    }

    /// Drops every record older than the retention window. Returns how many
    /// were dropped.
    pub fn prune_expired(&mut self, now: Instant) -> usize {
        let before = self.records.len();
        let retention = self.retention;
        self.records
            .retain(|_, record| now.saturating_duration_since(record.sent_at) <= retention);
        before - self.records.len()
    }

    /// Resolves an error response for `failed_sequence`.
    ///
    /// Expired records are dropped first. If the failed record is still
    /// held, it and all later records are removed and returned and the
    /// ledger is empty afterwards. Otherwise nothing can be correlated with
    /// the report: the remaining records stay until they expire and the
    /// resolution is empty.
    pub fn resolve_and_prune(&mut self, failed_sequence: u32, now: Instant) -> Resolution {
        self.last_failed_sequence = Some(failed_sequence);
        self.prune_expired(now);

        if !self.records.contains_key(&failed_sequence) {
            return Resolution::default();
        }

        let later = match failed_sequence.checked_add(1) {
            Some(next) => self.records.split_off(&next),
            None => BTreeMap::new(),
        };
        let failed = self.records.remove(&failed_sequence);
        self.records.clear();

        Resolution {
            failed,
            later: later.into_values().collect(),
        }
    }

    /// Drops every record. Returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.records.len();
        self.records.clear();
        dropped
    }

    /// Returns the sequence of the last error response resolved, if any.
    pub fn last_failed_sequence(&self) -> Option<u32> {
        self.last_failed_sequence
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}
