//! Broadcast fan-out

use futures::future::join_all;
use tracing::{debug, info, warn};

use super::messages::DispatchReport;
use super::registry::Registry;

/// Delivers one message to every registered peer except its sender
#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
    /// Evict a registration after this many consecutive failed deliveries
    evict_after_failures: Option<u32>,
}

impl Dispatcher {
    pub fn new(evict_after_failures: Option<u32>) -> Self {
        Self {
            evict_after_failures: evict_after_failures.filter(|n| *n > 0),
        }
    }

    /// Relay `message` from `sender` to all other peers
    ///
    /// Works from a registry snapshot, so peers registering mid-broadcast may
    /// or may not receive the message. Recipients are excluded by handle string,
    /// not by callback. Every delivery runs concurrently and the call returns
    /// once all of them have finished. Failures are never retried.
    pub async fn broadcast(&self, registry: &Registry, message: &str, sender: &str) -> DispatchReport {
        debug!(%sender, len = message.len(), "Dispatcher::broadcast: called");
        let recipients: Vec<_> = registry
            .snapshot()
            .into_iter()
            .filter(|(handle, _)| handle != sender)
            .collect();

        let attempts = recipients.iter().map(|(handle, entry)| async move {
            let result = entry.callback.deliver(message, sender).await;
            (handle, entry, result)
        });
        let results = join_all(attempts).await;

        let mut report = DispatchReport {
            attempted: results.len(),
            ..Default::default()
        };

        for (handle, entry, result) in results {
            match result {
                Ok(()) => {
                    entry.record_success();
                    report.delivered += 1;
                }
                Err(e) => {
                    let failures = entry.record_failure();
                    report.failed += 1;
                    warn!(
                        recipient = %handle,
                        %sender,
                        failures,
                        disconnected = e.is_disconnect(),
                        error = %e,
                        "Delivery failed"
                    );

                    if let Some(limit) = self.evict_after_failures
                        && failures >= limit
                        && registry.remove_registration(handle, entry.registration_id)
                    {
                        info!(recipient = %handle, failures, "Evicted unreachable peer");
                        report.evicted += 1;
                    }
                }
            }
        }

        debug!(?report, "Dispatcher::broadcast: done");
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use crate::coordinator::callback::{ChannelCallback, PeerCallback};
    use crate::coordinator::error::DeliveryError;
    use crate::coordinator::messages::Delivery;

    struct FailingCallback {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PeerCallback for FailingCallback {
        async fn deliver(&self, _message: &str, _sender: &str) -> Result<(), DeliveryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(DeliveryError::Closed)
        }
    }

    struct SlowCallback {
        delay: Duration,
        tx: mpsc::Sender<Delivery>,
    }

    #[async_trait]
    impl PeerCallback for SlowCallback {
        async fn deliver(&self, message: &str, sender: &str) -> Result<(), DeliveryError> {
            tokio::time::sleep(self.delay).await;
            self.tx
                .send(Delivery::new(message, sender))
                .await
                .map_err(|_| DeliveryError::Closed)
        }
    }

    fn add_peer(registry: &Registry, handle: &str) -> mpsc::Receiver<Delivery> {
        let (cb, rx) = ChannelCallback::channel(16);
        registry.register(handle, Arc::new(cb)).unwrap();
        rx
    }

    #[tokio::test]
    async fn test_broadcast_skips_sender() {
        let registry = Registry::new();
        let mut alice = add_peer(&registry, "alice");
        let mut bob = add_peer(&registry, "bob");

        let report = Dispatcher::default().broadcast(&registry, "hi", "alice").await;

        assert_eq!(report.attempted, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(bob.try_recv().unwrap(), Delivery::new("hi", "alice"));
        assert!(alice.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_every_other_peer_gets_exactly_one() {
        let registry = Registry::new();
        let mut inboxes: Vec<_> = (0..5).map(|i| add_peer(&registry, &format!("p{}", i))).collect();

        Dispatcher::default().broadcast(&registry, "msg", "p2").await;

        for (i, inbox) in inboxes.iter_mut().enumerate() {
            if i == 2 {
                assert!(inbox.try_recv().is_err());
            } else {
                assert_eq!(inbox.try_recv().unwrap(), Delivery::new("msg", "p2"));
                assert!(inbox.try_recv().is_err(), "p{} got a duplicate", i);
            }
        }
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_others() {
        let registry = Registry::new();
        let failing = Arc::new(FailingCallback {
            calls: AtomicUsize::new(0),
        });
        registry.register("dead", failing.clone()).unwrap();
        let mut bob = add_peer(&registry, "bob");
        let mut carol = add_peer(&registry, "carol");

        let report = Dispatcher::default().broadcast(&registry, "hi", "alice").await;

        assert_eq!(report.attempted, 3);
        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);
        assert!(bob.try_recv().is_ok());
        assert!(carol.try_recv().is_ok());
        // Not evicted by default
        assert!(registry.contains("dead"));
    }

    #[tokio::test]
    async fn test_sender_not_registered_still_broadcasts() {
        let registry = Registry::new();
        let mut bob = add_peer(&registry, "bob");

        let report = Dispatcher::default().broadcast(&registry, "hello", "ghost").await;

        assert_eq!(report.delivered, 1);
        assert_eq!(bob.try_recv().unwrap().sender, "ghost");
    }

    #[tokio::test]
    async fn test_empty_registry() {
        let registry = Registry::new();
        let report = Dispatcher::default().broadcast(&registry, "hi", "alice").await;
        assert_eq!(report, DispatchReport::default());
    }

    #[tokio::test]
    async fn test_slow_peer_does_not_serialize_fanout() {
        let registry = Registry::new();
        let (tx, mut rx) = mpsc::channel(16);
        for handle in ["a", "b", "c", "d"] {
            let cb = SlowCallback {
                delay: Duration::from_millis(200),
                tx: tx.clone(),
            };
            registry.register(handle, Arc::new(cb)).unwrap();
        }

        let started = std::time::Instant::now();
        let report = Dispatcher::default().broadcast(&registry, "hi", "z").await;
        let elapsed = started.elapsed();

        assert_eq!(report.delivered, 4);
        assert!(elapsed < Duration::from_millis(700), "fan-out took {:?}", elapsed);
        for _ in 0..4 {
            assert!(rx.try_recv().is_ok());
        }
    }

    #[tokio::test]
    async fn test_eviction_after_repeated_failures() {
        let registry = Registry::new();
        let failing = Arc::new(FailingCallback {
            calls: AtomicUsize::new(0),
        });
        registry.register("dead", failing).unwrap();
        let _bob = add_peer(&registry, "bob");
        let dispatcher = Dispatcher::new(Some(2));

        let first = dispatcher.broadcast(&registry, "1", "alice").await;
        assert_eq!(first.evicted, 0);
        assert!(registry.contains("dead"));

        let second = dispatcher.broadcast(&registry, "2", "alice").await;
        assert_eq!(second.evicted, 1);
        assert!(!registry.contains("dead"));
        assert!(registry.contains("bob"));
    }

    #[test]
    fn test_zero_eviction_limit_disables() {
        let dispatcher = Dispatcher::new(Some(0));
        assert_eq!(dispatcher.evict_after_failures, None);
    }
}
