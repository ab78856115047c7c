//! Feedback service client.

use crate::connection::ConnectionConfig;
use crate::error::ClientError;
use crate::stream::GatewayStream;
use bytes::BytesMut;
use pushgate_protocol::FeedbackRecord;
use std::io::ErrorKind;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Reads the list of unreachable devices from the feedback service.
///
/// The service streams its records and closes the connection; each fetch
/// opens a new connection.
pub struct FeedbackClient {
    config: ConnectionConfig,
}

impl FeedbackClient {
    /// Creates a client for the service at `config.host:config.port`.
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }

    /// Connects and reads records until the service closes the connection.
    ///
    /// A reset or an unclean TLS close ends the stream like a normal close.
    /// Any other read error is returned only if no record had been read yet;
    /// otherwise the records read so far are returned. A read timeout is
    /// always an error.
    pub async fn fetch_all(&self) -> Result<Vec<FeedbackRecord>, ClientError> {
        let config = &self.config;
        tracing::info!(
            "Establishing new feedback connection to {}:{}",
            config.host,
            config.port
        );
        let mut stream = GatewayStream::connect(
            &config.host,
            config.port,
            config.connect_timeout,
            config.tls.as_ref(),
        )
        .await?;

        let mut records = Vec::new();
        let mut buf = BytesMut::with_capacity(4096);

        loop {
            let read = tokio::time::timeout(config.read_timeout, stream.read_buf(&mut buf))
                .await
                .map_err(|_| {
                    tracing::error!("Timed out reading feedback");
                    ClientError::Timeout
                })?;

            match read {
                Ok(0) => break,
                Ok(_) => {
                    while let Some(record) = FeedbackRecord::decode(&mut buf) {
                        records.push(record);
                    }
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::ConnectionReset | ErrorKind::UnexpectedEof
                    ) =>
                {
                    tracing::debug!("Feedback connection ended: {}", e);
                    break;
                }
                Err(e) => {
                    tracing::error!("Error whilst reading feedback: {}", e);
                    if records.is_empty() {
                        return Err(e.into());
                    }
                    break;
                }
            }
        }

        if !buf.is_empty() {
            tracing::warn!(
                "Discarding {} bytes of incomplete feedback record",
                buf.len()
            );
        }
        let _ = stream.shutdown().await;

        tracing::info!("Returning {} feedback items", records.len());
        Ok(records)
    }
}
