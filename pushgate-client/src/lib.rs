//! # pushgate-client
//!
//! Client library for delivering notifications to a push gateway.
//!
//! This crate provides:
//! - A connection engine that writes notifications and concurrently reads
//!   asynchronous error responses on the same TLS socket
//! - A ledger of sent notifications used to correlate failures and resend
//!   everything the gateway dropped after an error
//! - A `PushClient` facade that replaces dead connections and reports
//!   rejected notifications through a callback
//! - A feedback client for the list of unreachable devices

pub mod client;
pub mod connection;
pub mod error;
pub mod feedback;
pub mod ledger;
pub mod stream;
pub mod tls;

#[cfg(test)]
mod testing;

pub use client::{ClientConfig, Endpoint, Environment, PushClient};
pub use connection::{Connection, ConnectionConfig, ConnectionEvent, ConnectionState, TlsClientConfig};
pub use error::ClientError;
pub use feedback::FeedbackClient;
pub use ledger::{Ledger, Resolution, SentRecord};
