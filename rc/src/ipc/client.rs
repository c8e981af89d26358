//! Peer side of the socket transport
//!
//! [`CoordinatorClient`] knows where a coordinator lives and opens
//! [`Session`]s to it. A session is one long-lived connection: requests go out
//! and are answered in order, while `Deliver` frames pushed by the coordinator
//! are split off by a reader task into a separate inbox.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use eyre::{Context, Result, eyre};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::listener::{ReadOutcome, read_frame};
use super::messages::{CoordinatorFrame, PeerRequest, encode_frame};
use crate::coordinator::Delivery;

/// Default timeout for requests to the coordinator
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default largest frame accepted from the coordinator
const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024;

/// Responses waiting to be picked up by the request in flight
const RESPONSE_BUFFER: usize = 16;

/// Client for reaching a coordinator over its socket
#[derive(Debug, Clone)]
pub struct CoordinatorClient {
    socket_path: PathBuf,
    timeout: Duration,
    max_frame_bytes: usize,
}

impl CoordinatorClient {
    /// Create a client for the coordinator at `socket_path`
    pub fn with_socket_path(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            timeout: DEFAULT_TIMEOUT,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }

    /// Set a custom timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the largest frame accepted in either direction
    pub fn with_max_frame_bytes(mut self, max_frame_bytes: usize) -> Self {
        self.max_frame_bytes = max_frame_bytes;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Check if the coordinator socket exists
    pub fn socket_exists(&self) -> bool {
        self.socket_path.exists()
    }

    /// Open a session; relayed messages arrive on the returned receiver
    pub async fn connect(&self, inbound_buffer: usize) -> Result<(Session, mpsc::Receiver<Delivery>)> {
        debug!(?self.socket_path, "CoordinatorClient::connect: called");
        let stream = tokio::time::timeout(self.timeout, UnixStream::connect(&self.socket_path))
            .await
            .context("Connection timeout")?
            .context("Failed to connect to coordinator socket")?;

        Ok(Session::start(stream, self.timeout, self.max_frame_bytes, inbound_buffer))
    }

    /// Check if the coordinator is alive and get its version
    pub async fn ping(&self) -> Result<String> {
        let (session, _inbox) = self.connect(1).await?;
        let version = session.ping().await;
        session.close().await;
        version
    }

    /// Send a single broadcast without registering
    pub async fn broadcast(&self, message: &str, sender: &str) -> Result<()> {
        let (session, _inbox) = self.connect(1).await?;
        let result = session.broadcast(message, sender).await;
        session.close().await;
        result
    }
}

struct SessionIo {
    writer: OwnedWriteHalf,
    responses: mpsc::Receiver<CoordinatorFrame>,
}

/// One open connection to the coordinator
pub struct Session {
    io: Mutex<SessionIo>,
    connected: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    timeout: Duration,
    max_frame_bytes: usize,
}

impl Session {
    fn start(
        stream: UnixStream,
        timeout: Duration,
        max_frame_bytes: usize,
        inbound_buffer: usize,
    ) -> (Self, mpsc::Receiver<Delivery>) {
        let (read_half, writer) = stream.into_split();
        let (response_tx, responses) = mpsc::channel(RESPONSE_BUFFER);
        let (inbound_tx, inbound_rx) = mpsc::channel(inbound_buffer.max(1));
        let connected = Arc::new(AtomicBool::new(true));

        let reader = tokio::spawn(read_loop(
            read_half,
            response_tx,
            inbound_tx,
            Arc::clone(&connected),
            max_frame_bytes,
        ));

        let session = Self {
            io: Mutex::new(SessionIo { writer, responses }),
            connected,
            reader,
            timeout,
            max_frame_bytes,
        };
        (session, inbound_rx)
    }

    /// Whether the coordinator is still on the other end
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Register `handle` with this connection as its callback
    pub async fn register(&self, handle: &str) -> Result<()> {
        let request = PeerRequest::Register {
            handle: handle.to_string(),
        };
        expect_ok(self.request(request).await?)
    }

    /// Broadcast `message`, claiming to be `sender`
    pub async fn broadcast(&self, message: &str, sender: &str) -> Result<()> {
        let request = PeerRequest::Broadcast {
            message: message.to_string(),
            sender: sender.to_string(),
        };
        expect_ok(self.request(request).await?)
    }

    pub async fn unregister(&self, handle: &str) -> Result<()> {
        let request = PeerRequest::Unregister {
            handle: handle.to_string(),
        };
        expect_ok(self.request(request).await?)
    }

    pub async fn ping(&self) -> Result<String> {
        match self.request(PeerRequest::Ping).await? {
            CoordinatorFrame::Pong { version } => Ok(version),
            CoordinatorFrame::Error { message } => Err(eyre!("Coordinator error: {}", message)),
            other => Err(eyre!("Unexpected response: {:?}", other)),
        }
    }

    /// Close the connection
    pub async fn close(self) {
        let mut io = self.io.lock().await;
        if let Err(e) = io.writer.shutdown().await {
            debug!(error = %e, "Session::close: shutdown failed");
        }
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Send one request and wait for its response
    async fn request(&self, request: PeerRequest) -> Result<CoordinatorFrame> {
        debug!(?request, "Session::request: called");
        if !self.is_connected() {
            return Err(eyre!("Not connected to coordinator"));
        }

        let bytes = encode_frame(&request).context("Failed to serialize request")?;
        if bytes.len() > self.max_frame_bytes {
            return Err(eyre!("Message too large: {} bytes", bytes.len()));
        }

        // Holding the lock for the whole exchange keeps responses matched to requests
        let mut io = self.io.lock().await;

        tokio::time::timeout(self.timeout, async {
            io.writer.write_all(&bytes).await.context("Failed to write request")?;
            io.writer.flush().await.context("Failed to flush request")?;
            Ok::<_, eyre::Error>(())
        })
        .await
        .context("Write timeout")??;

        let response = match tokio::time::timeout(self.timeout, io.responses.recv()).await {
            Ok(Some(response)) => response,
            Ok(None) => {
                self.connected.store(false, Ordering::SeqCst);
                return Err(eyre!("Coordinator closed the connection"));
            }
            Err(_) => {
                // A late answer would be mistaken for the next one
                self.connected.store(false, Ordering::SeqCst);
                return Err(eyre!("Read timeout after {:?}", self.timeout));
            }
        };

        debug!(?response, "Session::request: received response");
        Ok(response)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

fn expect_ok(response: CoordinatorFrame) -> Result<()> {
    match response {
        CoordinatorFrame::Ok => Ok(()),
        CoordinatorFrame::Error { message } => Err(eyre!("Coordinator error: {}", message)),
        other => Err(eyre!("Unexpected response: {:?}", other)),
    }
}

/// Split incoming frames into responses and deliveries
///
/// Never blocks on the inbox: deliveries that do not fit are dropped.
async fn read_loop(
    read_half: OwnedReadHalf,
    response_tx: mpsc::Sender<CoordinatorFrame>,
    inbound_tx: mpsc::Sender<Delivery>,
    connected: Arc<AtomicBool>,
    max_frame_bytes: usize,
) {
    let mut reader = BufReader::new(read_half);

    loop {
        let line = match read_frame(&mut reader, max_frame_bytes).await {
            Ok(ReadOutcome::Line(line)) => line,
            Ok(ReadOutcome::TooLarge(size)) => {
                warn!(size, "Dropping oversize frame from coordinator");
                continue;
            }
            Ok(ReadOutcome::Malformed(reason)) => {
                warn!(%reason, "read_loop: ignoring malformed frame");
                continue;
            }
            Ok(ReadOutcome::Eof) => {
                debug!("read_loop: coordinator closed connection");
                break;
            }
            Err(e) => {
                warn!(error = %e, "read_loop: read failed");
                break;
            }
        };

        match serde_json::from_str::<CoordinatorFrame>(line.trim()) {
            Ok(CoordinatorFrame::Deliver { message, sender }) => {
                if let Err(e) = inbound_tx.try_send(Delivery::new(message, sender)) {
                    warn!(error = %e, "Dropping delivery, inbox unavailable");
                }
            }
            Ok(response) => {
                if let Err(e) = response_tx.try_send(response) {
                    warn!(error = %e, "Dropping unsolicited response");
                }
            }
            Err(e) => {
                warn!(error = %e, "read_loop: ignoring unparseable frame");
            }
        }
    }

    connected.store(false, Ordering::SeqCst);
}
