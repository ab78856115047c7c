//! A local plain-TCP gateway for tests, scripted per connection.

use bytes::BytesMut;
use parking_lot::Mutex;
use pushgate_protocol::{ErrorResponse, NotificationFrame, StatusCode};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// What the gateway does on one accepted connection.
#[derive(Debug, Clone)]
pub enum Plan {
    /// Read frames until the client goes away.
    AcceptAll,
    /// Once `after_frames` frames have arrived, report the frame at `index`
    /// with `status` and close.
    Reject {
        after_frames: usize,
        index: usize,
        status: StatusCode,
    },
    /// Once `after_frames` frames have arrived, write `bytes` and close.
    Raw { after_frames: usize, bytes: Vec<u8> },
}

impl Plan {
    fn trigger(&self) -> Option<usize> {
        match self {
            Plan::AcceptAll => None,
            Plan::Reject { after_frames, .. } | Plan::Raw { after_frames, .. } => {
                Some(*after_frames)
            }
        }
    }
}

type Frames = mpsc::UnboundedSender<(usize, NotificationFrame)>;

pub struct DummyGateway {
    port: u16,
    plans: Arc<Mutex<VecDeque<Plan>>>,
    connections: Arc<AtomicUsize>,
    frames: mpsc::UnboundedReceiver<(usize, NotificationFrame)>,
    accept_task: JoinHandle<()>,
}

impl DummyGateway {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let plans = Arc::new(Mutex::new(VecDeque::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let (tx, frames) = mpsc::unbounded_channel();

        let accept_task = tokio::spawn(accept_loop(
            listener,
            plans.clone(),
            connections.clone(),
            tx,
        ));

        Self {
            port,
            plans,
            connections,
            frames,
            accept_task,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Queues the plan for the next accepted connection. Connections without
    /// a plan accept everything.
    pub fn plan(&self, plan: Plan) {
        self.plans.lock().push_back(plan);
    }

    /// Number of connections accepted so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Returns the next frame received on any connection, with the index of
    /// the connection it arrived on.
    pub async fn next_frame(&mut self) -> (usize, NotificationFrame) {
        tokio::time::timeout(Duration::from_secs(5), self.frames.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("gateway stopped")
    }
}

impl Drop for DummyGateway {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_loop(
    listener: TcpListener,
    plans: Arc<Mutex<VecDeque<Plan>>>,
    connections: Arc<AtomicUsize>,
    frames: Frames,
) {
    while let Ok((socket, _)) = listener.accept().await {
        let index = connections.fetch_add(1, Ordering::SeqCst);
        let plan = plans.lock().pop_front().unwrap_or(Plan::AcceptAll);
        tokio::spawn(handle_connection(socket, index, plan, frames.clone()));
    }
}

async fn handle_connection(mut socket: TcpStream, index: usize, plan: Plan, frames: Frames) {
    let mut buf = BytesMut::with_capacity(4096);
    let mut sequences = Vec::new();

    loop {
        while let Ok(Some(frame)) = NotificationFrame::decode(&mut buf) {
            sequences.push(frame.sequence);
            let _ = frames.send((index, frame));

            if plan.trigger() == Some(sequences.len()) {
                let reply = match &plan {
                    Plan::Reject { index, status, .. } => {
                        ErrorResponse::new(*status, sequences[*index]).encode().to_vec()
                    }
                    Plan::Raw { bytes, .. } => bytes.clone(),
                    Plan::AcceptAll => Vec::new(),
                };
                let _ = socket.write_all(&reply).await;
                hang_up(socket).await;
                return;
            }
        }

        match socket.read_buf(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}

/// Closes the write side and waits for the client to close its end, so that
/// no unread data turns the close into a reset.
async fn hang_up(mut socket: TcpStream) {
    let _ = socket.shutdown().await;
    let mut sink = [0u8; 1024];
    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        while let Ok(n) = socket.read(&mut sink).await {
            if n == 0 {
                break;
            }
        }
    })
    .await;
}
