//! Peer registry: handle -> callback
//!
//! Registering a handle that is already taken silently replaces the previous
//! callback (last write wins). Unregistering an unknown handle does nothing.
//! Neither is reported as an error.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info};
use uuid::Uuid;

use super::callback::PeerCallback;
use super::error::CoordinatorError;

/// One registered peer
#[derive(Clone)]
pub struct RegistryEntry {
    /// Distinguishes this registration from an earlier one under the same handle
    pub registration_id: Uuid,
    pub callback: Arc<dyn PeerCallback>,
    failures: Arc<AtomicU32>,
}

impl RegistryEntry {
    fn new(callback: Arc<dyn PeerCallback>) -> Self {
        Self {
            registration_id: Uuid::now_v7(),
            callback,
            failures: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Record a failed delivery, returning the consecutive failure count
    pub fn record_failure(&self) -> u32 {
        self.failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_success(&self) {
        self.failures.store(0, Ordering::Relaxed);
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("registration_id", &self.registration_id)
            .field("consecutive_failures", &self.consecutive_failures())
            .finish_non_exhaustive()
    }
}

/// Thread-safe mapping from peer handle to callback
///
/// The lock is only ever held for the map operation itself, never across a
/// delivery. Broadcasts work from a [`Registry::snapshot`].
#[derive(Default)]
pub struct Registry {
    peers: RwLock<HashMap<String, RegistryEntry>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the entry for `handle`
    pub fn register(&self, handle: &str, callback: Arc<dyn PeerCallback>) -> Result<Uuid, CoordinatorError> {
        debug!(%handle, "Registry::register: called");
        if handle.is_empty() {
            return Err(CoordinatorError::EmptyHandle);
        }

        let entry = RegistryEntry::new(callback);
        let registration_id = entry.registration_id;

        // Poisoning is recoverable: every write is a single insert/remove
        let mut peers = self.peers.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = peers.insert(handle.to_string(), entry) {
            info!(
                %handle,
                previous = %previous.registration_id,
                current = %registration_id,
                "Handle re-registered, previous callback replaced"
            );
        }

        Ok(registration_id)
    }

    /// Remove the entry for `handle`; returns whether one existed
    pub fn unregister(&self, handle: &str) -> bool {
        debug!(%handle, "Registry::unregister: called");
        let mut peers = self.peers.write().unwrap_or_else(PoisonError::into_inner);
        peers.remove(handle).is_some()
    }

    /// Remove `handle` only if it still belongs to `registration_id`
    pub fn remove_registration(&self, handle: &str, registration_id: Uuid) -> bool {
        debug!(%handle, %registration_id, "Registry::remove_registration: called");
        let mut peers = self.peers.write().unwrap_or_else(PoisonError::into_inner);
        match peers.get(handle) {
            Some(entry) if entry.registration_id == registration_id => {
                peers.remove(handle);
                true
            }
            _ => false,
        }
    }

    /// Point-in-time copy of every entry
    pub fn snapshot(&self) -> Vec<(String, RegistryEntry)> {
        let peers = self.peers.read().unwrap_or_else(PoisonError::into_inner);
        peers.iter().map(|(h, e)| (h.clone(), e.clone())).collect()
    }

    pub fn get(&self, handle: &str) -> Option<RegistryEntry> {
        let peers = self.peers.read().unwrap_or_else(PoisonError::into_inner);
        peers.get(handle).cloned()
    }

    pub fn contains(&self, handle: &str) -> bool {
        let peers = self.peers.read().unwrap_or_else(PoisonError::into_inner);
        peers.contains_key(handle)
    }

    /// Registered handles, sorted
    pub fn handles(&self) -> Vec<String> {
        let peers = self.peers.read().unwrap_or_else(PoisonError::into_inner);
        let mut handles: Vec<String> = peers.keys().cloned().collect();
        handles.sort();
        handles
    }

    pub fn len(&self) -> usize {
        let peers = self.peers.read().unwrap_or_else(PoisonError::into_inner);
        peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::callback::ChannelCallback;
    use proptest::prelude::*;

    fn callback() -> Arc<dyn PeerCallback> {
        let (cb, _rx) = ChannelCallback::channel(1);
        Arc::new(cb)
    }

    #[test]
    fn test_register_and_contains() {
        let registry = Registry::new();
        registry.register("alice", callback()).unwrap();

        assert!(registry.contains("alice"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.handles(), vec!["alice".to_string()]);
    }

    #[test]
    fn test_register_empty_handle_rejected() {
        let registry = Registry::new();
        let err = registry.register("", callback()).unwrap_err();

        assert_eq!(err, CoordinatorError::EmptyHandle);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_register_overwrites() {
        let registry = Registry::new();
        let first = registry.register("alice", callback()).unwrap();
        let second = registry.register("alice", callback()).unwrap();

        assert_ne!(first, second);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("alice").unwrap().registration_id, second);
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let registry = Registry::new();
        registry.register("bob", callback()).unwrap();

        assert!(registry.unregister("bob"));
        assert!(!registry.unregister("bob"));
        assert!(!registry.unregister("never-registered"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_registration_ignores_newer_entry() {
        let registry = Registry::new();
        let old = registry.register("alice", callback()).unwrap();
        let new = registry.register("alice", callback()).unwrap();

        assert!(!registry.remove_registration("alice", old));
        assert!(registry.contains("alice"));

        assert!(registry.remove_registration("alice", new));
        assert!(!registry.contains("alice"));
    }

    #[test]
    fn test_snapshot_is_detached() {
        let registry = Registry::new();
        registry.register("alice", callback()).unwrap();
        registry.register("bob", callback()).unwrap();

        let snapshot = registry.snapshot();
        registry.unregister("alice");

        assert_eq!(snapshot.len(), 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_failure_counter() {
        let registry = Registry::new();
        registry.register("alice", callback()).unwrap();
        let entry = registry.get("alice").unwrap();

        assert_eq!(entry.record_failure(), 1);
        assert_eq!(entry.record_failure(), 2);
        // Snapshot clones share the counter
        assert_eq!(registry.get("alice").unwrap().consecutive_failures(), 2);

        entry.record_success();
        assert_eq!(entry.consecutive_failures(), 0);
    }

    #[test]
    fn test_concurrent_mutations_stay_consistent() {
        let registry = Arc::new(Registry::new());
        let threads: Vec<_> = (0..8)
            .map(|t| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for i in 0..200 {
                        let handle = format!("peer-{}-{}", t, i % 10);
                        registry.register(&handle, callback()).unwrap();
                        if i % 3 == 0 {
                            registry.unregister(&handle);
                        }
                        let _ = registry.snapshot();
                    }
                })
            })
            .collect();

        for t in threads {
            t.join().unwrap();
        }

        // Each thread's last touch of handle k decides whether it survives
        for t in 0..8 {
            for k in 0..10 {
                let last = (0..200).filter(|i| i % 10 == k).max().unwrap();
                let handle = format!("peer-{}-{}", t, k);
                assert_eq!(registry.contains(&handle), last % 3 != 0, "{}", handle);
            }
        }
    }

    proptest! {
        #[test]
        fn prop_last_write_wins(ops in proptest::collection::vec((0usize..4, any::<bool>()), 0..64)) {
            let registry = Registry::new();
            let mut expected: HashMap<String, Uuid> = HashMap::new();

            for (slot, is_register) in ops {
                let handle = format!("h{}", slot);
                if is_register {
                    let id = registry.register(&handle, callback()).unwrap();
                    expected.insert(handle, id);
                } else {
                    registry.unregister(&handle);
                    expected.remove(&handle);
                }
            }

            prop_assert_eq!(registry.len(), expected.len());
            for (handle, id) in &expected {
                prop_assert_eq!(registry.get(handle).map(|e| e.registration_id), Some(*id));
            }
        }
    }
}
