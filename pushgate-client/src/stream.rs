//! Gateway stream: TLS in production, plain TCP against local test gateways.

use crate::connection::TlsClientConfig;
use crate::error::ClientError;
use crate::tls::create_tls_connector;
use pin_project_lite::pin_project;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

pin_project! {
    /// A gateway stream that can be either plain TCP or TLS.
    #[project = GatewayStreamProj]
    pub enum GatewayStream {
        Plain { #[pin] stream: TcpStream },
        Tls { #[pin] stream: TlsStream<TcpStream> },
    }
}

impl GatewayStream {
    /// Opens a TCP connection to `host:port` and, when `tls` is given,
    /// performs the TLS handshake on it.
    ///
    /// The connect and the handshake are each bounded by `connect_timeout`.
    pub async fn connect(
        host: &str,
        port: u16,
        connect_timeout: Duration,
        tls: Option<&TlsClientConfig>,
    ) -> Result<Self, ClientError> {
        tracing::debug!("Connecting to {}:{}...", host, port);

        let tcp_stream = tokio::time::timeout(connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| {
                tracing::debug!("Connection timeout");
                ClientError::Timeout
            })?
            .map_err(|e| {
                tracing::debug!("Connection failed: {}", e);
                ClientError::Io(e)
            })?;

        // Frames are small and written whole; don't let Nagle hold them back.
        tcp_stream.set_nodelay(true).ok();

        let Some(tls_config) = tls else {
            return Ok(GatewayStream::Plain { stream: tcp_stream });
        };

        let (connector, server_name) = create_tls_connector(tls_config, host)?;

        tracing::debug!("Performing TLS handshake...");
        let tls_stream = tokio::time::timeout(
            connect_timeout,
            connector.connect(server_name, tcp_stream),
        )
        .await
        .map_err(|_| ClientError::Timeout)?
        .map_err(|e| ClientError::TlsHandshake(e.to_string()))?;
        tracing::debug!("TLS handshake complete");

        Ok(GatewayStream::Tls { stream: tls_stream })
    }

    /// Returns whether this stream is TLS-encrypted.
    pub fn is_tls(&self) -> bool {
        matches!(self, GatewayStream::Tls { .. })
    }
}

impl AsyncRead for GatewayStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.project() {
            GatewayStreamProj::Plain { stream } => stream.poll_read(cx, buf),
            GatewayStreamProj::Tls { stream } => stream.poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for GatewayStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.project() {
            GatewayStreamProj::Plain { stream } => stream.poll_write(cx, buf),
            GatewayStreamProj::Tls { stream } => stream.poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            GatewayStreamProj::Plain { stream } => stream.poll_flush(cx),
            GatewayStreamProj::Tls { stream } => stream.poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            GatewayStreamProj::Plain { stream } => stream.poll_shutdown(cx),
            GatewayStreamProj::Tls { stream } => stream.poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_plain() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let stream = GatewayStream::connect("127.0.0.1", port, Duration::from_secs(1), None)
            .await
            .unwrap();
        assert!(!stream.is_tls());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = GatewayStream::connect("127.0.0.1", port, Duration::from_secs(1), None).await;
        assert!(matches!(result, Err(ClientError::Io(_))));
    }
}
