//! Coordinator error types

use std::time::Duration;
use thiserror::Error;

/// Errors a coordinator operation can report back to the calling peer
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error("Handle must not be empty")]
    EmptyHandle,

    #[error("Frame too large: {size} bytes (limit {limit})")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),
}

/// Errors from a single delivery attempt to one peer
///
/// These never leave the dispatcher: they are logged, counted and dropped.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Peer unreachable: {0}")]
    Unreachable(#[from] std::io::Error),

    #[error("Delivery timed out after {0:?}")]
    Timeout(Duration),

    #[error("Peer callback closed")]
    Closed,

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DeliveryError {
    /// Check if the peer is gone for good (as opposed to merely slow)
    pub fn is_disconnect(&self) -> bool {
        matches!(self, DeliveryError::Unreachable(_) | DeliveryError::Closed)
    }
}
