//! Transport between peers and the coordinator
//!
//! A coordinator publishes itself under a well-known name, which resolves to a
//! Unix Domain Socket path. Peers look the name up, connect, and speak
//! newline-delimited JSON (see [`messages`]). The connection a peer registers
//! on doubles as its callback: relayed messages are pushed back down it.

use std::path::{Path, PathBuf};

use eyre::{Result, eyre};
use tracing::debug;

pub mod client;
pub mod listener;
pub mod messages;
pub mod server;

pub use client::{CoordinatorClient, Session};
pub use listener::{ReadOutcome, cleanup_socket, create_listener_at, read_frame};
pub use messages::{CoordinatorFrame, PeerRequest, encode_frame};
pub use server::{ConnectionCallback, CoordinatorServer, FrameWriter};

/// Directory holding published coordinator sockets
pub fn default_socket_dir() -> PathBuf {
    dirs::runtime_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("relaychat")
}

/// Resolve a well-known coordinator name to its socket path
pub fn socket_path_for(name: &str, socket_dir: Option<&Path>) -> Result<PathBuf> {
    debug!(%name, ?socket_dir, "socket_path_for: called");
    if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(eyre!("Invalid coordinator name: {:?}", name));
    }

    let dir = socket_dir.map(Path::to_path_buf).unwrap_or_else(default_socket_dir);
    Ok(dir.join(format!("{}.sock", name)))
}

/// Find a published coordinator by name
///
/// Fails if nothing is published under `name`; connecting may still fail later
/// if the socket is stale.
pub fn lookup(name: &str, socket_dir: Option<&Path>) -> Result<CoordinatorClient> {
    let socket_path = socket_path_for(name, socket_dir)?;
    let client = CoordinatorClient::with_socket_path(socket_path);
    if !client.socket_exists() {
        return Err(eyre!(
            "No coordinator published as '{}' (expected socket at {})",
            name,
            client.socket_path().display()
        ));
    }
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_socket_path_ends_with_name() {
        let path = socket_path_for("relay", None).unwrap();
        assert!(path.ends_with("relaychat/relay.sock"));
    }

    #[test]
    fn test_socket_path_in_custom_dir() {
        let path = socket_path_for("lobby", Some(Path::new("/var/run/chat"))).unwrap();
        assert_eq!(path, PathBuf::from("/var/run/chat/lobby.sock"));
    }

    #[test]
    fn test_invalid_names_rejected() {
        for name in ["", "a/b", "..", "."] {
            assert!(socket_path_for(name, None).is_err(), "{:?} should be rejected", name);
        }
    }

    #[test]
    fn test_lookup_missing_coordinator() {
        let temp = TempDir::new().unwrap();
        let err = lookup("relay", Some(temp.path())).unwrap_err();
        assert!(err.to_string().contains("No coordinator published"));
    }
}
