//! Connection engine.
//!
//! A [`Connection`] owns one socket to the gateway and runs two tasks on it:
//!
//! - the **write task** drains a FIFO queue of notifications, truncating,
//!   framing and writing each one whole before recording it in the ledger;
//! - the **read task** waits for error responses, resolves them against the
//!   ledger and drives the idle and error-wait deadlines.
//!
//! The gateway never acknowledges success. When it rejects a notification it
//! reports that one sequence number, discards everything written after it and
//! closes the socket. The read task therefore hands the rejected notification
//! to the owner (or resends it, for a `Shutdown` status) and resends every
//! later notification on a fresh connection.
//!
//! Lifecycle:
//!
//! ```text
//! Unopened -> Opening -> Active -> Retiring -> Retired -> Closed
//!                |          |         |                      ^
//!                +----------+---------+----------------------+
//! ```
//!
//! Only `Active` accepts sends. No state is ever re-entered.

use crate::error::ClientError;
use crate::ledger::Ledger;
use crate::stream::GatewayStream;
use bytes::Bytes;
use pushgate_protocol::frame::ERROR_RESPONSE_SIZE;
use pushgate_protocol::{
    Decoder, Encoder, ErrorResponse, Notification, StatusCode, DEFAULT_GATEWAY_PORT,
    MAX_PAYLOAD_SIZE,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot, watch, Mutex};

/// Default capacity of the write queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// TLS configuration for gateway connections.
#[derive(Debug, Clone, Default)]
pub struct TlsClientConfig {
    /// Path to PEM-encoded CA certificate(s) for server verification.
    /// If None, the bundled web PKI roots are used.
    pub ca_cert_path: Option<PathBuf>,
    /// Path to the PEM-encoded provider certificate.
    pub client_cert_path: Option<PathBuf>,
    /// Path to the PEM-encoded private key. If None, the key is read from
    /// the certificate file.
    pub client_key_path: Option<PathBuf>,
    /// Server name for SNI (defaults to the gateway host).
    pub server_name: Option<String>,
}

impl TlsClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert_path = Some(path.into());
        self
    }

    pub fn with_client_cert(
        mut self,
        cert_path: impl Into<PathBuf>,
        key_path: Option<PathBuf>,
    ) -> Self {
        self.client_cert_path = Some(cert_path.into());
        self.client_key_path = key_path;
        self
    }

    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }
}

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Gateway host name.
    pub host: String,
    /// Gateway port.
    pub port: u16,
    /// Bound on the TCP connect and on the TLS handshake.
    pub connect_timeout: Duration,
    /// Bound on each wait for inbound data. Also paces the idle and
    /// error-wait checks.
    pub read_timeout: Duration,
    /// Bound on writing one frame.
    pub write_timeout: Duration,
    /// Time without sends after which an active connection is retired.
    pub idle_timeout: Duration,
    /// Time after the last send that an unusable connection waits for a late
    /// error response before closing. Sent records older than this are
    /// assumed delivered.
    pub error_wait: Duration,
    /// Payload budget in bytes.
    pub max_payload_size: usize,
    /// Number of sequence numbers a connection may issue before retiring.
    pub max_notifications: u32,
    /// Capacity of the write queue.
    pub queue_capacity: usize,
    /// TLS configuration. Plain TCP when None.
    pub tls: Option<TlsClientConfig>,
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(30),
            error_wait: Duration::from_secs(60),
            max_payload_size: MAX_PAYLOAD_SIZE,
            max_notifications: u32::MAX,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            tls: None,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_error_wait(mut self, wait: Duration) -> Self {
        self.error_wait = wait;
        self
    }

    pub fn with_max_payload_size(mut self, size: usize) -> Self {
        self.max_payload_size = size;
        self
    }

    pub fn with_max_notifications(mut self, max: u32) -> Self {
        self.max_notifications = max;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_tls(mut self, tls_config: TlsClientConfig) -> Self {
        self.tls = Some(tls_config);
        self
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::new("127.0.0.1", DEFAULT_GATEWAY_PORT)
    }
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created, no socket yet.
    Unopened,
    /// Connect and handshake in progress.
    Opening,
    /// Accepting sends.
    Active,
    /// Refusing sends (idle or out of sequence numbers), still reading
    /// error responses.
    Retiring,
    /// An error response arrived; waiting for the gateway to close.
    Retired,
    /// Socket released. Terminal.
    Closed,
}

impl ConnectionState {
    /// Returns whether new notifications may be written.
    pub fn accepts_sends(&self) -> bool {
        matches!(self, ConnectionState::Active)
    }

    /// Position in the lifecycle; transitions only ever increase it.
    fn rank(&self) -> u8 {
        match self {
            ConnectionState::Unopened => 0,
            ConnectionState::Opening => 1,
            ConnectionState::Active => 2,
            ConnectionState::Retiring => 3,
            ConnectionState::Retired => 4,
            ConnectionState::Closed => 5,
        }
    }

    /// Returns whether moving to `next` is a legal transition.
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (Unopened, Opening) | (Unopened, Closed) => true,
            (Opening, Active) | (Opening, Closed) => true,
            (Active, Retiring) | (Active, Retired) | (Active, Closed) => true,
            (Retiring, Retired) | (Retiring, Closed) => true,
            (Retired, Closed) => true,
            _ => false,
        }
    }
}

/// Events a connection reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// The gateway rejected a notification for a reason that resending will
    /// not fix.
    PushFailed {
        token: Bytes,
        identifier: Option<String>,
        status: StatusCode,
    },
    /// Notifications the gateway dropped, to be sent again on another
    /// connection in the given order.
    Resubmit(Vec<Notification>),
}

/// A queued send and the channel its caller waits on.
struct WorkUnit {
    notification: Notification,
    done: oneshot::Sender<Result<(), ClientError>>,
}

/// State shared between the connection handle and its tasks.
struct Inner {
    config: ConnectionConfig,
    encoder: Encoder,
    state: watch::Sender<ConnectionState>,
    /// Held across each frame write so that an error response is resolved
    /// either before a frame is written or after it is recorded.
    ledger: Mutex<Ledger>,
    /// Last send, or the moment the connection became active.
    last_activity: parking_lot::Mutex<Instant>,
    /// Work units enqueued and not yet answered.
    queued: AtomicUsize,
    events: mpsc::UnboundedSender<ConnectionEvent>,
}

/// A connection to the gateway.
pub struct Connection {
    inner: Arc<Inner>,
    queue: OnceLock<mpsc::Sender<WorkUnit>>,
}

impl Connection {
    /// Creates a new connection (not yet connected). Events are delivered on
    /// `events`.
    pub fn new(config: ConnectionConfig, events: mpsc::UnboundedSender<ConnectionEvent>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Unopened);
        let encoder = Encoder::new(config.max_payload_size);
        let ledger = Ledger::new(config.error_wait);
        Self {
            inner: Arc::new(Inner {
                config,
                encoder,
                state,
                ledger: Mutex::new(ledger),
                last_activity: parking_lot::Mutex::new(Instant::now()),
                queued: AtomicUsize::new(0),
                events,
            }),
            queue: OnceLock::new(),
        }
    }

    /// Sends a notification.
    ///
    /// The first call opens the connection; calls made while it is opening
    /// wait for the outcome. Returns once the frame has been written in full.
    /// The gateway reports rejections later, through [`ConnectionEvent`]s.
    ///
    /// Fails with `ConnectionDead` if the connection does not accept sends,
    /// with `BodyTooLong` if the payload cannot be truncated to fit, and with
    /// the connect error if this call opened the connection and that failed.
    pub async fn send(&self, notification: Notification) -> Result<(), ClientError> {
        self.ensure_open().await?;

        if !self.state().accepts_sends() {
            return Err(ClientError::ConnectionDead);
        }
        let queue = self.queue.get().ok_or(ClientError::ConnectionDead)?;

        let (done, rx) = oneshot::channel();
        self.inner.queued.fetch_add(1, Ordering::SeqCst);
        if queue.send(WorkUnit { notification, done }).await.is_err() {
            self.inner.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(ClientError::ConnectionDead);
        }

        rx.await.unwrap_or(Err(ClientError::ConnectionDead))
    }

    /// Opens the connection if nobody has, or waits for the opener.
    async fn ensure_open(&self) -> Result<(), ClientError> {
        let claimed = self.inner.state.send_if_modified(|state| {
            if *state == ConnectionState::Unopened {
                *state = ConnectionState::Opening;
                true
            } else {
                false
            }
        });
        if claimed {
            return self.open().await;
        }

        let mut state = self.inner.state.subscribe();
        state
            .wait_for(|s| *s != ConnectionState::Opening)
            .await
            .map_err(|_| ClientError::ConnectionDead)?;
        Ok(())
    }

    async fn open(&self) -> Result<(), ClientError> {
        let config = &self.inner.config;
        tracing::info!(
            "Establishing new connection to {}:{}",
            config.host,
            config.port
        );

        let stream = match GatewayStream::connect(
            &config.host,
            config.port,
            config.connect_timeout,
            config.tls.as_ref(),
        )
        .await
        {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!("Failed to connect to {}:{}: {}", config.host, config.port, e);
                self.inner.close();
                return Err(e);
            }
        };

        let (reader, writer) = tokio::io::split(stream);
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        if self.queue.set(tx).is_err() {
            self.inner.close();
            return Err(ClientError::ConnectionDead);
        }
        *self.inner.last_activity.lock() = Instant::now();

        if !self.inner.transition(ConnectionState::Active) {
            return Err(ClientError::ConnectionDead);
        }

        tokio::spawn(read_loop(self.inner.clone(), reader));
        tokio::spawn(write_loop(self.inner.clone(), writer, rx));
        Ok(())
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Returns whether the connection accepts sends.
    pub fn is_usable(&self) -> bool {
        self.state().accepts_sends()
    }

    /// Returns whether the connection has been closed.
    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    /// Returns whether notifications are queued or awaiting a possible error
    /// response.
    pub fn messages_in_flight(&self) -> bool {
        if self.inner.queued.load(Ordering::SeqCst) > 0 {
            return true;
        }
        if self.is_closed() {
            return false;
        }
        // A held lock means a frame is being written.
        self.inner
            .ledger
            .try_lock()
            .map(|ledger| !ledger.is_empty())
            .unwrap_or(true)
    }

    /// Waits until the connection reaches `target` or any later state.
    pub async fn wait_for_state(&self, target: ConnectionState) {
        let mut state = self.inner.state.subscribe();
        let _ = state
            .wait_for(|s| s.rank() >= target.rank())
            .await;
    }

    /// Closes the connection. Queued sends fail with `ConnectionDead`;
    /// notifications awaiting a possible error response are abandoned.
    pub fn close(&self) {
        self.inner.close();
    }
}

impl Inner {
    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    /// Moves to `next` if the transition is legal. Returns whether it moved.
    fn transition(&self, next: ConnectionState) -> bool {
        let mut from = None;
        self.state.send_if_modified(|state| {
            if state.can_transition_to(next) {
                from = Some(*state);
                *state = next;
                true
            } else {
                false
            }
        });

        match from {
            Some(from) => {
                tracing::debug!(
                    "Connection to {}:{}: {:?} -> {:?}",
                    self.config.host,
                    self.config.port,
                    from,
                    next
                );
                true
            }
            None => false,
        }
    }

    fn close(&self) {
        if self.transition(ConnectionState::Closed) {
            tracing::info!(
                "Connection to {}:{} closed",
                self.config.host,
                self.config.port
            );
        }
    }

    /// Applies the idle and error-wait deadlines.
    fn check_deadlines(&self) {
        let since_last_used = self.last_activity.lock().elapsed();

        if self.state() == ConnectionState::Active && since_last_used > self.config.idle_timeout {
            tracing::info!(
                "Connection unused for {:.1}s: retiring",
                since_last_used.as_secs_f64()
            );
            self.transition(ConnectionState::Retiring);
        }

        if !self.state().accepts_sends() && since_last_used > self.config.error_wait {
            // Nothing more will be sent and any error would have arrived by now.
            tracing::info!(
                "Connection retired and last used {:.1}s ago: closing",
                since_last_used.as_secs_f64()
            );
            self.close();
        }
    }

    /// Truncates, frames and writes one notification, then records it.
    async fn write_notification(
        &self,
        writer: &mut WriteHalf<GatewayStream>,
        next_sequence: &mut u32,
        notification: Notification,
    ) -> Result<(), ClientError> {
        let prepared = self.encoder.prepare(&notification)?;

        let mut ledger = self.ledger.lock().await;
        if !self.state().accepts_sends() {
            return Err(ClientError::ConnectionDead);
        }

        let sequence = *next_sequence;
        if sequence >= self.config.max_notifications {
            self.retire_exhausted();
            return Err(ClientError::ConnectionDead);
        }

        let frame = self.encoder.encode(sequence, &prepared)?;
        *next_sequence = sequence + 1;

        match tokio::time::timeout(self.config.write_timeout, writer.write_all(&frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!("Caught exception sending notification: {}", e);
                self.close();
                return Err(ClientError::ConnectionDead);
            }
            Err(_) => {
                tracing::error!("Timed out sending notification: closing");
                self.close();
                return Err(ClientError::ConnectionDead);
            }
        }

        let now = Instant::now();
        ledger.record(sequence, prepared, now);
        *self.last_activity.lock() = now;
        tracing::debug!(
            "Sent notification seq={} ({} bytes)",
            sequence,
            frame.len()
        );

        if *next_sequence >= self.config.max_notifications {
            self.retire_exhausted();
        }
        Ok(())
    }

    fn retire_exhausted(&self) {
        // Keep reading: errors for frames already sent may still arrive.
        if self.transition(ConnectionState::Retiring) {
            tracing::info!(
                "Connection used all {} sequence numbers: retiring",
                self.config.max_notifications
            );
        }
    }

    /// Resolves an error response against the ledger.
    async fn push_failed(&self, response: ErrorResponse) {
        let resolution = {
            let mut ledger = self.ledger.lock().await;
            self.transition(ConnectionState::Retired);
            ledger.resolve_and_prune(response.sequence, Instant::now())
        };

        let mut resubmit = Vec::with_capacity(resolution.later.len() + 1);
        match resolution.failed {
            None => {
                tracing::error!(
                    "Got a failure for seq {} that we don't remember (status {})",
                    response.sequence,
                    response.status
                );
            }
            Some(record) if response.status.is_retryable() => {
                tracing::info!(
                    "Notification seq={} failed with status {}: retrying",
                    record.sequence,
                    response.status
                );
                resubmit.push(record.notification);
            }
            Some(record) => {
                tracing::warn!(
                    token = ?record.notification.token,
                    "Notification seq={} failed with status {}",
                    record.sequence,
                    response.status
                );
                let _ = self.events.send(ConnectionEvent::PushFailed {
                    token: record.notification.token,
                    identifier: record.notification.identifier,
                    status: response.status,
                });
            }
        }

        // The gateway stopped processing at the failure, so everything after
        // it was dropped.
        if !resolution.later.is_empty() {
            tracing::info!(
                "Retrying {} notifications sent after failed notification",
                resolution.later.len()
            );
        }
        resubmit.extend(resolution.later.into_iter().map(|r| r.notification));

        if !resubmit.is_empty() {
            let _ = self.events.send(ConnectionEvent::Resubmit(resubmit));
        }
    }
}

/// Reads error responses until the connection closes.
async fn read_loop(inner: Arc<Inner>, mut reader: ReadHalf<GatewayStream>) {
    let mut decoder = Decoder::new();
    let mut buf = [0u8; ERROR_RESPONSE_SIZE];
    let mut state = inner.state.subscribe();

    while !inner.is_closed() {
        inner.ledger.lock().await.prune_expired(Instant::now());

        let read = tokio::select! {
            read = tokio::time::timeout(inner.config.read_timeout, reader.read(&mut buf)) => read,
            _ = state.wait_for(|s| *s == ConnectionState::Closed) => break,
        };

        match read {
            Err(_) => inner.check_deadlines(),
            Ok(Ok(0)) => {
                tracing::info!("Connection closed remotely");
                inner.close();
            }
            Ok(Ok(n)) => {
                decoder.extend(&buf[..n]);
                loop {
                    match decoder.decode_error_response() {
                        Ok(Some(response)) => {
                            inner.push_failed(response).await;
                            // The gateway closes the socket after reporting.
                        }
                        Ok(None) => break,
                        Err(e) => {
                            // No framing to skip past an unknown command.
                            tracing::error!("{}: closing connection", e);
                            inner.close();
                            break;
                        }
                    }
                }
            }
            Ok(Err(e)) => {
                tracing::error!("Caught exception reading from socket: closing: {}", e);
                inner.close();
            }
        }
    }

    let abandoned = inner.ledger.lock().await.clear();
    if abandoned > 0 {
        tracing::warn!(
            "Abandoning {} notifications with unknown outcome",
            abandoned
        );
    }
    tracing::debug!("read loop finished");
}

/// Writes queued notifications in order until the connection closes.
async fn write_loop(
    inner: Arc<Inner>,
    mut writer: WriteHalf<GatewayStream>,
    mut queue: mpsc::Receiver<WorkUnit>,
) {
    let mut next_sequence: u32 = 0;
    let mut state = inner.state.subscribe();

    loop {
        let unit = tokio::select! {
            unit = queue.recv() => unit,
            _ = state.wait_for(|s| *s == ConnectionState::Closed) => None,
        };
        let Some(unit) = unit else { break };

        let result = inner
            .write_notification(&mut writer, &mut next_sequence, unit.notification)
            .await;
        let _ = unit.done.send(result);
        inner.queued.fetch_sub(1, Ordering::SeqCst);
    }

    // Either closed or the handle was dropped; nothing more will be written.
    inner.close();
    queue.close();
    while let Some(unit) = queue.recv().await {
        let _ = unit.done.send(Err(ClientError::ConnectionDead));
        inner.queued.fetch_sub(1, Ordering::SeqCst);
    }

    let _ = writer.shutdown().await;
    tracing::debug!("write loop finished");
}
