//! Coordinator side of the socket transport

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use eyre::Result;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::OwnedWriteHalf;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::listener::{ReadOutcome, cleanup_socket, create_listener_at, read_frame};
use super::messages::{CoordinatorFrame, PeerRequest, encode_frame};
use super::socket_path_for;
use crate::VERSION;
use crate::coordinator::{Coordinator, CoordinatorError, DeliveryError, PeerCallback};

/// Shared, serialized write side of one connection
///
/// Responses from the connection's own task and deliveries from other peers'
/// broadcasts both go through here, one whole frame at a time. A write that
/// fails or times out may leave a partial frame on the socket, so the writer
/// is then marked broken, the write side is shut down and every later send
/// fails with [`DeliveryError::Closed`].
#[derive(Debug, Clone)]
pub struct FrameWriter {
    inner: Arc<Mutex<OwnedWriteHalf>>,
    broken: Arc<AtomicBool>,
}

impl FrameWriter {
    pub fn new(write_half: OwnedWriteHalf) -> Self {
        Self {
            inner: Arc::new(Mutex::new(write_half)),
            broken: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether an earlier write left the stream unusable
    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::SeqCst)
    }

    /// Write one frame, giving up after `timeout`
    ///
    /// Waiting for the lock and writing are timed separately; only a timeout
    /// during the write breaks the stream.
    pub async fn send(&self, frame: &CoordinatorFrame, timeout: Duration) -> Result<(), DeliveryError> {
        if self.is_broken() {
            return Err(DeliveryError::Closed);
        }
        let bytes = encode_frame(frame)?;

        let mut writer = tokio::time::timeout(timeout, self.inner.lock())
            .await
            .map_err(|_| DeliveryError::Timeout(timeout))?;
        // Another send may have broken the stream while this one waited
        if self.is_broken() {
            return Err(DeliveryError::Closed);
        }

        let write = async {
            writer.write_all(&bytes).await?;
            writer.flush().await
        };
        let err = match tokio::time::timeout(timeout, write).await {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => DeliveryError::Unreachable(e),
            Err(_) => DeliveryError::Timeout(timeout),
        };

        // Still holding the lock, so nothing can follow the partial frame
        self.broken.store(true, Ordering::SeqCst);
        warn!(error = %err, "Frame writer broken, shutting down write side");
        if let Err(e) = writer.shutdown().await {
            debug!(error = %e, "FrameWriter::send: shutdown failed");
        }
        Err(err)
    }
}

/// Callback that pushes `Deliver` frames down a peer's connection
#[derive(Debug, Clone)]
pub struct ConnectionCallback {
    writer: FrameWriter,
    timeout: Duration,
}

impl ConnectionCallback {
    pub fn new(writer: FrameWriter, timeout: Duration) -> Self {
        Self { writer, timeout }
    }
}

#[async_trait]
impl PeerCallback for ConnectionCallback {
    async fn deliver(&self, message: &str, sender: &str) -> Result<(), DeliveryError> {
        let frame = CoordinatorFrame::Deliver {
            message: message.to_string(),
            sender: sender.to_string(),
        };
        self.writer.send(&frame, self.timeout).await
    }
}

/// Accepts peer connections and serves coordinator requests on them
pub struct CoordinatorServer {
    coordinator: Arc<Coordinator>,
    listener: tokio::net::UnixListener,
    socket_path: PathBuf,
}

impl CoordinatorServer {
    /// Publish the coordinator under its configured well-known name
    pub fn bind(coordinator: Arc<Coordinator>) -> Result<Self> {
        let config = coordinator.config();
        let socket_path = socket_path_for(&config.name, config.socket_dir.as_deref())?;
        Self::bind_at(coordinator, &socket_path)
    }

    /// Publish the coordinator at an explicit socket path
    pub fn bind_at(coordinator: Arc<Coordinator>, socket_path: &Path) -> Result<Self> {
        let (listener, socket_path) = create_listener_at(socket_path)?;
        info!(?socket_path, "Coordinator published");
        Ok(Self {
            coordinator,
            listener,
            socket_path,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Serve connections until `shutdown_rx` fires (or its sender is dropped)
    ///
    /// Open connections are aborted and the socket file is removed on the way out.
    pub async fn run(self, mut shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        let mut connections = JoinSet::new();
        let mut next_conn_id: u64 = 0;

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            next_conn_id += 1;
                            let conn_id = next_conn_id;
                            debug!(conn_id, "run: connection accepted");
                            let coordinator = Arc::clone(&self.coordinator);
                            connections.spawn(async move {
                                if let Err(e) = handle_connection(coordinator, stream, conn_id).await {
                                    warn!(conn_id, error = %e, "Connection ended with error");
                                }
                            });
                        }
                        Err(e) => {
                            warn!(error = %e, "run: accept error");
                        }
                    }
                }
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined
                        && e.is_panic()
                    {
                        warn!(error = %e, "Connection task panicked");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Coordinator server shutting down");
                    break;
                }
            }
        }

        connections.shutdown().await;
        cleanup_socket(&self.socket_path);
        info!(metrics = ?self.coordinator.metrics(), "Coordinator server stopped");
        Ok(())
    }
}

/// Serve one peer connection until it closes
async fn handle_connection(coordinator: Arc<Coordinator>, stream: UnixStream, conn_id: u64) -> Result<()> {
    let config = coordinator.config();
    let max_frame_bytes = config.max_frame_bytes;
    let timeout = config.delivery_timeout();

    let (read_half, write_half) = stream.into_split();
    let writer = FrameWriter::new(write_half);
    let mut reader = BufReader::new(read_half);

    loop {
        let response = match read_frame(&mut reader, max_frame_bytes).await? {
            ReadOutcome::Eof => {
                debug!(conn_id, "handle_connection: peer closed connection");
                break;
            }
            ReadOutcome::TooLarge(size) => {
                warn!(conn_id, size, "Rejecting oversize frame");
                CoordinatorFrame::error(CoordinatorError::FrameTooLarge {
                    size,
                    limit: max_frame_bytes,
                })
            }
            ReadOutcome::Malformed(reason) => {
                warn!(conn_id, %reason, "Rejecting malformed frame");
                CoordinatorFrame::error(CoordinatorError::MalformedFrame(reason))
            }
            ReadOutcome::Line(line) if line.trim().is_empty() => continue,
            ReadOutcome::Line(line) => match serde_json::from_str::<PeerRequest>(line.trim()) {
                Ok(request) => handle_request(&coordinator, &writer, request, conn_id).await,
                Err(e) => {
                    warn!(conn_id, error = %e, "Rejecting malformed frame");
                    CoordinatorFrame::error(CoordinatorError::MalformedFrame(e.to_string()))
                }
            },
        };

        writer.send(&response, timeout).await?;
    }

    Ok(())
}

async fn handle_request(
    coordinator: &Coordinator,
    writer: &FrameWriter,
    request: PeerRequest,
    conn_id: u64,
) -> CoordinatorFrame {
    debug!(conn_id, ?request, "handle_request: called");
    match request {
        PeerRequest::Register { handle } => {
            let callback = ConnectionCallback::new(writer.clone(), coordinator.config().delivery_timeout());
            match coordinator.register(&handle, Arc::new(callback)) {
                Ok(registration_id) => {
                    debug!(conn_id, %handle, %registration_id, "handle_request: registered");
                    CoordinatorFrame::Ok
                }
                Err(e) => CoordinatorFrame::error(e),
            }
        }
        PeerRequest::Broadcast { message, sender } => {
            let report = coordinator.broadcast(&message, &sender).await;
            debug!(conn_id, %sender, ?report, "handle_request: broadcast finished");
            CoordinatorFrame::Ok
        }
        PeerRequest::Unregister { handle } => {
            coordinator.unregister(&handle);
            CoordinatorFrame::Ok
        }
        PeerRequest::Ping => CoordinatorFrame::Pong {
            version: VERSION.to_string(),
        },
    }
}
