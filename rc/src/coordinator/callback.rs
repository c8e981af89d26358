//! Peer callback capability
//!
//! The coordinator never knows how a peer is reached. It only holds something
//! that can `deliver` a message, and any transport can supply one.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use super::error::DeliveryError;
use super::messages::Delivery;

/// Something the coordinator can hand a relayed message to
#[async_trait]
pub trait PeerCallback: Send + Sync {
    /// Deliver `message` from `sender` to this peer
    async fn deliver(&self, message: &str, sender: &str) -> Result<(), DeliveryError>;
}

/// In-process callback backed by a bounded channel
///
/// Used for peers living in the same process as the coordinator (and by tests).
/// A full channel counts as a failed delivery rather than blocking the broadcast.
#[derive(Debug, Clone)]
pub struct ChannelCallback {
    tx: mpsc::Sender<Delivery>,
}

impl ChannelCallback {
    pub fn new(tx: mpsc::Sender<Delivery>) -> Self {
        Self { tx }
    }

    /// Create a callback together with the receiving end
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<Delivery>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl PeerCallback for ChannelCallback {
    async fn deliver(&self, message: &str, sender: &str) -> Result<(), DeliveryError> {
        debug!(%sender, "ChannelCallback::deliver: called");
        self.tx.try_send(Delivery::new(message, sender)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Unreachable(std::io::Error::new(
                std::io::ErrorKind::WouldBlock,
                "peer inbox full",
            )),
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_callback_delivers() {
        let (cb, mut rx) = ChannelCallback::channel(4);
        cb.deliver("hi", "alice").await.unwrap();

        let got = rx.recv().await.unwrap();
        assert_eq!(got, Delivery::new("hi", "alice"));
    }

    #[tokio::test]
    async fn test_channel_callback_from_existing_sender() {
        let (tx, mut rx) = mpsc::channel(4);
        let cb = ChannelCallback::new(tx.clone());
        tx.send(Delivery::new("direct", "bob")).await.unwrap();
        cb.deliver("relayed", "alice").await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), Delivery::new("direct", "bob"));
        assert_eq!(rx.recv().await.unwrap(), Delivery::new("relayed", "alice"));
    }

    #[tokio::test]
    async fn test_channel_callback_closed() {
        let (cb, rx) = ChannelCallback::channel(4);
        drop(rx);

        let err = cb.deliver("hi", "alice").await.unwrap_err();
        assert!(matches!(err, DeliveryError::Closed));
    }

    #[tokio::test]
    async fn test_channel_callback_full_is_failure() {
        let (cb, _rx) = ChannelCallback::channel(1);
        cb.deliver("one", "alice").await.unwrap();

        let err = cb.deliver("two", "alice").await.unwrap_err();
        assert!(matches!(err, DeliveryError::Unreachable(_)));
    }
}
