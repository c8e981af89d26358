//! Wire message types between peers and the coordinator
//!
//! Simple JSON-over-newline protocol. Each message is a single line of JSON followed by `\n`.

use serde::{Deserialize, Serialize};

/// Requests from a peer to the coordinator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum PeerRequest {
    /// Bind `handle` to the connection this request arrived on
    Register { handle: String },

    /// Relay `message` to everyone except `sender`
    ///
    /// `sender` is taken at face value; nothing ties it to the connection.
    Broadcast { message: String, sender: String },

    /// Drop `handle` from the registry
    Unregister { handle: String },

    /// Ping to check if the coordinator is alive
    Ping,
}

/// Frames from the coordinator to a peer
///
/// `Ok`, `Pong` and `Error` answer requests, one each, in order.
/// `Deliver` is pushed whenever another peer broadcasts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum CoordinatorFrame {
    /// Acknowledgment
    Ok,

    /// Pong response to ping
    Pong { version: String },

    /// Error response
    Error { message: String },

    /// A relayed message
    Deliver { message: String, sender: String },
}

impl CoordinatorFrame {
    pub fn error(err: impl std::fmt::Display) -> Self {
        Self::Error {
            message: err.to_string(),
        }
    }

    /// Whether this frame answers a request (as opposed to a pushed delivery)
    pub fn is_response(&self) -> bool {
        !matches!(self, Self::Deliver { .. })
    }
}

/// Serialize a frame as one JSON line
pub fn encode_frame<T: Serialize>(frame: &T) -> serde_json::Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec(frame)?;
    bytes.push(b'\n');
    Ok(bytes)
}
