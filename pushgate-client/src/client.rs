//! Push client facade.
//!
//! [`PushClient`] keeps one active connection to the gateway, replaces it when
//! it dies, resends what the gateway dropped and reports rejected
//! notifications through a callback.

use crate::connection::{Connection, ConnectionConfig, ConnectionEvent, ConnectionState, TlsClientConfig};
use crate::error::ClientError;
use crate::feedback::FeedbackClient;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use pushgate_protocol::{
    FeedbackRecord, Notification, StatusCode, DEFAULT_FEEDBACK_PORT, DEFAULT_GATEWAY_PORT,
};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Host and port of a gateway service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Well-known gateway deployments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Production,
    Sandbox,
}

impl Environment {
    pub fn gateway(&self) -> Endpoint {
        match self {
            Environment::Production => Endpoint::new("gateway.push.apple.com", DEFAULT_GATEWAY_PORT),
            Environment::Sandbox => {
                Endpoint::new("gateway.sandbox.push.apple.com", DEFAULT_GATEWAY_PORT)
            }
        }
    }

    pub fn feedback(&self) -> Endpoint {
        match self {
            Environment::Production => {
                Endpoint::new("feedback.push.apple.com", DEFAULT_FEEDBACK_PORT)
            }
            Environment::Sandbox => {
                Endpoint::new("feedback.sandbox.push.apple.com", DEFAULT_FEEDBACK_PORT)
            }
        }
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "prod" | "production" => Ok(Environment::Production),
            "sandbox" | "dev" | "development" => Ok(Environment::Sandbox),
            other => Err(format!("unknown platform: {}", other)),
        }
    }
}

/// Push client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub gateway: Endpoint,
    /// Feedback service. `fetch_feedback` fails without it.
    pub feedback: Option<Endpoint>,
    /// Settings applied to every gateway and feedback connection. Host and
    /// port are taken from the endpoints.
    pub connection: ConnectionConfig,
    /// Connections tried for one notification before giving up.
    pub max_send_attempts: usize,
}

impl ClientConfig {
    /// Configuration for an explicit gateway, without a feedback service.
    pub fn new(gateway: Endpoint) -> Self {
        Self {
            connection: ConnectionConfig::new(gateway.host.clone(), gateway.port),
            gateway,
            feedback: None,
            max_send_attempts: 3,
        }
    }

    /// Configuration for a well-known deployment, over TLS.
    pub fn for_environment(environment: Environment) -> Self {
        Self::new(environment.gateway())
            .with_feedback(environment.feedback())
            .with_tls(TlsClientConfig::new())
    }

    pub fn with_feedback(mut self, feedback: Endpoint) -> Self {
        self.feedback = Some(feedback);
        self
    }

    pub fn with_tls(mut self, tls: TlsClientConfig) -> Self {
        self.connection.tls = Some(tls);
        self
    }

    pub fn with_connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }

    pub fn with_max_send_attempts(mut self, attempts: usize) -> Self {
        self.max_send_attempts = attempts.max(1);
        self
    }

    fn connection_config(&self, endpoint: &Endpoint) -> ConnectionConfig {
        ConnectionConfig {
            host: endpoint.host.clone(),
            port: endpoint.port,
            ..self.connection.clone()
        }
    }
}

type FailureCallback = Arc<dyn Fn(&Bytes, Option<&str>, StatusCode) + Send + Sync>;

struct ClientInner {
    config: ClientConfig,
    active: Mutex<Option<Arc<Connection>>>,
    /// Replaced connections that may still report errors.
    draining: Mutex<Vec<Arc<Connection>>>,
    on_push_failed: RwLock<Option<FailureCallback>>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    /// Notifications handed back by a connection and not yet resent.
    resubmitting: AtomicUsize,
}

/// Client for the push gateway.
///
/// Cheap to clone; clones share connections and the failure callback.
#[derive(Clone)]
pub struct PushClient {
    inner: Arc<ClientInner>,
}

impl PushClient {
    /// Creates a client. Must be called within a Tokio runtime.
    pub fn new(config: ClientConfig) -> Self {
        if config.feedback.is_none() {
            tracing::warn!(
                "No feedback service configured for gateway {}",
                config.gateway
            );
        }

        let (events, rx) = mpsc::unbounded_channel();
        let inner = Arc::new(ClientInner {
            config,
            active: Mutex::new(None),
            draining: Mutex::new(Vec::new()),
            on_push_failed: RwLock::new(None),
            events,
            resubmitting: AtomicUsize::new(0),
        });

        tokio::spawn(dispatch_events(Arc::downgrade(&inner), rx));
        Self { inner }
    }

    /// Sets the callback invoked once per rejected notification with its
    /// token, identifier and status.
    pub fn on_push_failed<F>(&self, callback: F)
    where
        F: Fn(&Bytes, Option<&str>, StatusCode) + Send + Sync + 'static,
    {
        *self.inner.on_push_failed.write() = Some(Arc::new(callback));
    }

    /// Sends a notification.
    ///
    /// Returns once it has been written to a connection. Rejections arrive
    /// later through the `on_push_failed` callback.
    pub async fn send(&self, notification: Notification) -> Result<(), ClientError> {
        self.inner.send(notification).await
    }

    /// Returns whether any notification is queued, being resent, or still
    /// within the window in which the gateway may reject it.
    pub fn messages_in_flight(&self) -> bool {
        self.inner.messages_in_flight()
    }

    /// Fetches the tokens the feedback service reports as unreachable.
    pub async fn fetch_feedback(&self) -> Result<Vec<FeedbackRecord>, ClientError> {
        let endpoint = self
            .inner
            .config
            .feedback
            .as_ref()
            .ok_or(ClientError::NoFeedbackAddress)?;
        FeedbackClient::new(self.inner.config.connection_config(endpoint))
            .fetch_all()
            .await
    }

    /// Waits up to `grace` for in-flight notifications to settle, then closes
    /// every connection. Returns whether everything settled in time.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        let deadline = Instant::now() + grace;
        let mut settled = !self.messages_in_flight();
        while !settled && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
            settled = !self.messages_in_flight();
        }

        if !settled {
            tracing::warn!("Shutting down with notifications still in flight");
        }
        if let Some(conn) = self.inner.active.lock().take() {
            conn.close();
        }
        for conn in self.inner.draining.lock().drain(..) {
            conn.close();
        }
        settled
    }
}

impl ClientInner {
    async fn send(&self, notification: Notification) -> Result<(), ClientError> {
        let mut attempt = 1;
        loop {
            let conn = self.current_connection();
            match conn.send(notification.clone()).await {
                Ok(()) => return Ok(()),
                Err(ClientError::ConnectionDead) => {
                    self.retire(&conn);
                    if attempt >= self.config.max_send_attempts {
                        tracing::error!(
                            "Giving up on notification after {} connections",
                            attempt
                        );
                        return Err(ClientError::ConnectionDead);
                    }
                    tracing::info!("Connection died: retrying on a new connection");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Returns the active connection, replacing it if it can no longer take
    /// sends.
    fn current_connection(&self) -> Arc<Connection> {
        let mut active = self.active.lock();
        if let Some(conn) = active.as_ref() {
            if matches!(
                conn.state(),
                ConnectionState::Unopened | ConnectionState::Opening | ConnectionState::Active
            ) {
                return conn.clone();
            }
        }

        if let Some(old) = active.take() {
            self.draining.lock().push(old);
        }
        let conn = Arc::new(Connection::new(
            self.config.connection_config(&self.config.gateway),
            self.events.clone(),
        ));
        *active = Some(conn.clone());
        conn
    }

    fn retire(&self, conn: &Arc<Connection>) {
        let mut active = self.active.lock();
        if active.as_ref().is_some_and(|c| Arc::ptr_eq(c, conn)) {
            if let Some(old) = active.take() {
                self.draining.lock().push(old);
            }
        }
    }

    fn messages_in_flight(&self) -> bool {
        if self.resubmitting.load(Ordering::SeqCst) > 0 {
            return true;
        }

        let mut in_flight = false;
        self.draining.lock().retain(|conn| {
            let busy = conn.messages_in_flight();
            in_flight |= busy;
            busy
        });

        in_flight
            || self
                .active
                .lock()
                .as_ref()
                .is_some_and(|conn| conn.messages_in_flight())
    }

    fn report_failure(&self, token: &Bytes, identifier: Option<&str>, status: StatusCode) {
        let callback = self.on_push_failed.read().clone();
        match callback {
            Some(callback) => callback(token, identifier, status),
            None => tracing::debug!("Push failed with status {} (no callback set)", status),
        }
    }
}

/// Routes connection events to the callback and the resend path.
async fn dispatch_events(
    inner: Weak<ClientInner>,
    mut events: mpsc::UnboundedReceiver<ConnectionEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else { break };

        match event {
            ConnectionEvent::PushFailed {
                token,
                identifier,
                status,
            } => inner.report_failure(&token, identifier.as_deref(), status),
            ConnectionEvent::Resubmit(batch) => {
                inner.resubmitting.fetch_add(batch.len(), Ordering::SeqCst);
                tokio::spawn(async move {
                    for notification in batch {
                        let result = inner.send(notification).await;
                        inner.resubmitting.fetch_sub(1, Ordering::SeqCst);
                        if let Err(e) = result {
                            tracing::error!("Failed to resend notification: {}", e);
                        }
                    }
                });
            }
        }
    }
    tracing::debug!("event dispatcher finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{DummyGateway, Plan};
    use chrono::{TimeZone, Utc};
    use pushgate_protocol::Payload;

    fn client_for(gateway: &DummyGateway) -> PushClient {
        let connection = ConnectionConfig::new("127.0.0.1", gateway.port())
            .with_read_timeout(Duration::from_millis(50))
            .with_error_wait(Duration::from_millis(300));
        PushClient::new(
            ClientConfig::new(Endpoint::new("127.0.0.1", gateway.port()))
                .with_connection(connection),
        )
    }

    fn notification(id: &str) -> Notification {
        Notification::new(id.as_bytes().to_vec(), Payload::alert(id)).with_identifier(id)
    }

    fn failures(client: &PushClient) -> mpsc::UnboundedReceiver<(Bytes, Option<String>, StatusCode)> {
        let (tx, rx) = mpsc::unbounded_channel();
        client.on_push_failed(move |token, identifier, status| {
            let _ = tx.send((token.clone(), identifier.map(str::to_string), status));
        });
        rx
    }

    #[test]
    fn test_environment_addresses() {
        assert_eq!(
            Environment::Production.gateway(),
            Endpoint::new("gateway.push.apple.com", 2195)
        );
        assert_eq!(
            Environment::Sandbox.gateway(),
            Endpoint::new("gateway.sandbox.push.apple.com", 2195)
        );
        assert_eq!(
            Environment::Production.feedback(),
            Endpoint::new("feedback.push.apple.com", 2196)
        );
        assert_eq!(
            Environment::Sandbox.feedback().to_string(),
            "feedback.sandbox.push.apple.com:2196"
        );
        assert_eq!("prod".parse::<Environment>(), Ok(Environment::Production));
        assert_eq!("Sandbox".parse::<Environment>(), Ok(Environment::Sandbox));
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn test_environment_config() {
        let config = ClientConfig::for_environment(Environment::Sandbox);
        assert_eq!(config.gateway.host, "gateway.sandbox.push.apple.com");
        assert!(config.feedback.is_some());
        assert!(config.connection.tls.is_some());
        assert_eq!(config.max_send_attempts, 3);

        let feedback = config.connection_config(&Environment::Sandbox.feedback());
        assert_eq!(feedback.port, 2196);
        assert!(feedback.tls.is_some());
    }

    #[tokio::test]
    async fn test_shutdown_failure_resent_in_order() {
        let mut gateway = DummyGateway::start().await;
        gateway.plan(Plan::Reject {
            after_frames: 3,
            index: 1,
            status: StatusCode::Shutdown,
        });
        let client = client_for(&gateway);
        let mut failed = failures(&client);

        for id in ["1", "2", "3"] {
            client.send(notification(id)).await.unwrap();
        }

        let mut received = Vec::new();
        for _ in 0..5 {
            let (index, frame) = gateway.next_frame().await;
            received.push((index, String::from_utf8(frame.token.to_vec()).unwrap()));
        }
        assert_eq!(
            received,
            vec![
                (0, "1".to_string()),
                (0, "2".to_string()),
                (0, "3".to_string()),
                (1, "2".to_string()),
                (1, "3".to_string()),
            ]
        );

        assert!(client.shutdown(Duration::from_secs(5)).await);
        assert!(failed.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_rejection_invokes_callback_once() {
        let mut gateway = DummyGateway::start().await;
        gateway.plan(Plan::Reject {
            after_frames: 1,
            index: 0,
            status: StatusCode::InvalidToken,
        });
        let client = client_for(&gateway);
        let mut failed = failures(&client);

        client.send(notification("X")).await.unwrap();

        let (token, identifier, status) =
            tokio::time::timeout(Duration::from_secs(5), failed.recv())
                .await
                .unwrap()
                .unwrap();
        assert_eq!(token.as_ref(), b"X");
        assert_eq!(identifier.as_deref(), Some("X"));
        assert_eq!(status, StatusCode::InvalidToken);
        assert_eq!(u8::from(status), 8);

        // Next send goes out on a fresh connection.
        client.send(notification("Y")).await.unwrap();
        let _ = gateway.next_frame().await;
        let (index, frame) = gateway.next_frame().await;
        assert_eq!(index, 1);
        assert_eq!(frame.sequence, 0);

        assert!(client.shutdown(Duration::from_secs(5)).await);
        assert!(failed.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_passes_parameters() {
        let mut gateway = DummyGateway::start().await;
        let client = client_for(&gateway);
        let expiration = Utc.with_ymd_and_hms(2031, 5, 1, 12, 0, 0).unwrap();

        client
            .send(
                Notification::new(&b"\xab\xcd"[..], Payload::alert("hi").with_badge(2))
                    .with_expiration(expiration)
                    .with_priority(Notification::PRIORITY_CONSERVE_POWER),
            )
            .await
            .unwrap();

        let (_, frame) = gateway.next_frame().await;
        assert_eq!(frame.token.as_ref(), b"\xab\xcd");
        assert_eq!(frame.expiration, Some(expiration.timestamp() as u32));
        assert_eq!(frame.priority, Some(5));
        assert_eq!(
            frame.payload.as_ref(),
            br#"{"aps":{"alert":"hi","badge":2}}"#
        );
    }

    #[tokio::test]
    async fn test_replaces_retired_connection() {
        let mut gateway = DummyGateway::start().await;
        let connection = ConnectionConfig::new("127.0.0.1", gateway.port())
            .with_read_timeout(Duration::from_millis(50))
            .with_max_notifications(2);
        let client = PushClient::new(
            ClientConfig::new(Endpoint::new("127.0.0.1", gateway.port()))
                .with_connection(connection),
        );

        for id in ["a", "b", "c"] {
            client.send(notification(id)).await.unwrap();
        }

        let indexes: Vec<usize> = [
            gateway.next_frame().await,
            gateway.next_frame().await,
            gateway.next_frame().await,
        ]
        .iter()
        .map(|(index, _)| *index)
        .collect();
        assert_eq!(indexes, vec![0, 0, 1]);
    }

    #[tokio::test]
    async fn test_open_failure_surfaces() {
        let gateway = DummyGateway::start().await;
        let port = gateway.port();
        drop(gateway);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let client = PushClient::new(ClientConfig::new(Endpoint::new("127.0.0.1", port)));
        let result = client.send(notification("a")).await;
        assert!(matches!(result, Err(ClientError::Io(_))));
        assert!(!client.messages_in_flight());
    }

    #[tokio::test]
    async fn test_messages_in_flight_settles() {
        let gateway = DummyGateway::start().await;
        let client = client_for(&gateway);
        assert!(!client.messages_in_flight());

        client.send(notification("a")).await.unwrap();
        assert!(client.messages_in_flight());

        assert!(client.shutdown(Duration::from_secs(5)).await);
        assert!(!client.messages_in_flight());
    }

    #[tokio::test]
    async fn test_fetch_feedback_requires_address() {
        let gateway = DummyGateway::start().await;
        let client = client_for(&gateway);
        assert!(matches!(
            client.fetch_feedback().await,
            Err(ClientError::NoFeedbackAddress)
        ));
    }
}
