//! Message and report types for the Coordinator

use serde::{Deserialize, Serialize};

/// A message relayed to one peer on behalf of another
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub message: String,
    pub sender: String,
}

impl Delivery {
    pub fn new(message: impl Into<String>, sender: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            sender: sender.into(),
        }
    }
}

/// Outcome of one broadcast, kept inside the coordinator
///
/// The sending peer never sees this; it is only logged and folded into metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
    pub evicted: usize,
}

/// Coordinator metrics for observability
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CoordinatorMetrics {
    pub registered_peers: usize,
    pub registrations: u64,
    pub unregistrations: u64,
    pub broadcasts: u64,
    pub deliveries: u64,
    pub delivery_failures: u64,
    pub evictions: u64,
}
