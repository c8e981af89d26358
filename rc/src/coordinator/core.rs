//! Coordinator: registration, broadcast and departure over one shared registry

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use super::callback::{ChannelCallback, PeerCallback};
use super::config::CoordinatorConfig;
use super::dispatch::Dispatcher;
use super::error::CoordinatorError;
use super::messages::{CoordinatorMetrics, Delivery, DispatchReport};
use super::registry::Registry;

#[derive(Debug, Default)]
struct Counters {
    registrations: AtomicU64,
    unregistrations: AtomicU64,
    broadcasts: AtomicU64,
    deliveries: AtomicU64,
    delivery_failures: AtomicU64,
    evictions: AtomicU64,
}

/// The Coordinator owns the peer registry and relays every message
///
/// Cheap to share behind an `Arc`; every operation takes `&self` and may run
/// concurrently with any other.
///
/// Known limitations, kept on purpose:
/// - a handle is never authenticated, so any caller may broadcast as, or
///   unregister, any handle;
/// - registering a taken handle replaces the earlier peer without telling it;
/// - a peer that vanishes without unregistering stays registered unless
///   `evict-after-failures` is configured.
pub struct Coordinator {
    config: CoordinatorConfig,
    registry: Arc<Registry>,
    dispatcher: Dispatcher,
    counters: Counters,
}

impl Coordinator {
    /// Create a new Coordinator with an empty registry
    pub fn new(config: CoordinatorConfig) -> Self {
        Self::with_registry(config, Arc::new(Registry::new()))
    }

    /// Create a Coordinator over an existing registry
    pub fn with_registry(config: CoordinatorConfig, registry: Arc<Registry>) -> Self {
        let dispatcher = Dispatcher::new(config.evict_after_failures);
        Self {
            config,
            registry,
            dispatcher,
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Register `handle`, replacing any previous callback for it
    pub fn register(&self, handle: &str, callback: Arc<dyn PeerCallback>) -> Result<Uuid, CoordinatorError> {
        info!(%handle, "Registering peer");
        let id = self.registry.register(handle, callback)?;
        self.counters.registrations.fetch_add(1, Ordering::Relaxed);
        Ok(id)
    }

    /// Register an in-process peer and return its inbox
    pub fn register_local(&self, handle: &str, buffer: usize) -> Result<mpsc::Receiver<Delivery>, CoordinatorError> {
        debug!(%handle, buffer, "Coordinator::register_local: called");
        let (callback, rx) = ChannelCallback::channel(buffer.max(1));
        self.register(handle, Arc::new(callback))?;
        Ok(rx)
    }

    /// Relay `message` to every registered peer other than `sender`
    ///
    /// The report stays inside the coordinator; callers over the wire only
    /// ever learn that the broadcast finished.
    pub async fn broadcast(&self, message: &str, sender: &str) -> DispatchReport {
        info!(%sender, "Broadcasting message");
        let report = self.dispatcher.broadcast(&self.registry, message, sender).await;

        self.counters.broadcasts.fetch_add(1, Ordering::Relaxed);
        self.counters
            .deliveries
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.counters
            .delivery_failures
            .fetch_add(report.failed as u64, Ordering::Relaxed);
        self.counters
            .evictions
            .fetch_add(report.evicted as u64, Ordering::Relaxed);

        report
    }

    /// Remove `handle`; unknown handles are ignored
    pub fn unregister(&self, handle: &str) {
        info!(%handle, "Unregistering peer");
        if self.registry.unregister(handle) {
            self.counters.unregistrations.fetch_add(1, Ordering::Relaxed);
        } else {
            debug!(%handle, "Coordinator::unregister: handle was not registered");
        }
    }

    /// Get current coordinator metrics
    pub fn metrics(&self) -> CoordinatorMetrics {
        CoordinatorMetrics {
            registered_peers: self.registry.len(),
            registrations: self.counters.registrations.load(Ordering::Relaxed),
            unregistrations: self.counters.unregistrations.load(Ordering::Relaxed),
            broadcasts: self.counters.broadcasts.load(Ordering::Relaxed),
            deliveries: self.counters.deliveries.load(Ordering::Relaxed),
            delivery_failures: self.counters.delivery_failures.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
        }
    }
}
