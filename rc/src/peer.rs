//! Peer: a chat participant talking to a coordinator
//!
//! A peer is created disconnected, joins by registering its handle, sends
//! messages through the coordinator and leaves by unregistering. Losing the
//! coordinator never ends the peer; it simply reports itself disconnected
//! until it connects again.

use eyre::{Context, Result, eyre};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::coordinator::Delivery;
use crate::ipc::{CoordinatorClient, Session};

pub struct Peer {
    handle: String,
    session: Option<Session>,
}

impl Peer {
    /// Create a disconnected peer
    pub fn new(handle: impl Into<String>) -> Result<Self> {
        let handle = handle.into();
        if handle.is_empty() {
            return Err(eyre!("Handle must not be empty"));
        }
        Ok(Self { handle, session: None })
    }

    /// Create a peer and connect it in one step
    pub async fn join(
        client: &CoordinatorClient,
        handle: impl Into<String>,
        inbound_buffer: usize,
    ) -> Result<(Self, mpsc::Receiver<Delivery>)> {
        let mut peer = Self::new(handle)?;
        let inbox = peer.connect(client, inbound_buffer).await?;
        Ok((peer, inbox))
    }

    pub fn handle(&self) -> &str {
        &self.handle
    }

    pub fn is_connected(&self) -> bool {
        self.session.as_ref().is_some_and(Session::is_connected)
    }

    /// Connect and register, replacing a dead session if there is one
    ///
    /// Messages relayed to this peer arrive on the returned receiver.
    pub async fn connect(
        &mut self,
        client: &CoordinatorClient,
        inbound_buffer: usize,
    ) -> Result<mpsc::Receiver<Delivery>> {
        debug!(handle = %self.handle, "Peer::connect: called");
        if self.is_connected() {
            return Err(eyre!("Already connected as '{}'", self.handle));
        }
        if let Some(stale) = self.session.take() {
            stale.close().await;
        }

        let (session, inbox) = client.connect(inbound_buffer).await?;
        session
            .register(&self.handle)
            .await
            .context("Failed to register with coordinator")?;

        info!(handle = %self.handle, socket = ?client.socket_path(), "Peer registered");
        self.session = Some(session);
        Ok(inbox)
    }

    /// Send `message` to every other peer
    pub async fn send(&self, message: &str) -> Result<()> {
        let session = self
            .session
            .as_ref()
            .filter(|s| s.is_connected())
            .ok_or_else(|| eyre!("Not connected to coordinator"))?;
        session.broadcast(message, &self.handle).await
    }

    /// Unregister and close the connection; a no-op when not connected
    pub async fn disconnect(&mut self) -> Result<()> {
        let Some(session) = self.session.take() else {
            debug!(handle = %self.handle, "Peer::disconnect: not connected");
            return Ok(());
        };

        let result = if session.is_connected() {
            session.unregister(&self.handle).await
        } else {
            Ok(())
        };
        session.close().await;

        match &result {
            Ok(()) => info!(handle = %self.handle, "Peer disconnected"),
            Err(e) => warn!(handle = %self.handle, error = %e, "Unregister failed during disconnect"),
        }
        result
    }
}
