//! Socket and framing helpers shared by both ends
//!
//! Provides helpers for creating and managing the Unix Domain Socket listener.

use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use tokio::net::UnixListener;
use tracing::{debug, warn};

/// Result of reading one line-delimited frame
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A complete line, newline stripped
    Line(String),
    /// A line longer than the limit was read and discarded
    TooLarge(usize),
    /// A line that is not valid UTF-8
    Malformed(String),
    /// The other side closed the connection
    Eof,
}

/// Bind a coordinator socket at `socket_path`
///
/// Parent directories are created and a leftover socket file from an earlier
/// coordinator is replaced.
pub fn create_listener_at(socket_path: &Path) -> Result<(UnixListener, PathBuf)> {
    debug!(?socket_path, "create_listener_at: called");

    if let Some(dir) = socket_path.parent() {
        std::fs::create_dir_all(dir).context("Failed to create socket directory")?;
    }

    if socket_path.exists() {
        debug!(?socket_path, "create_listener_at: replacing leftover socket file");
        std::fs::remove_file(socket_path).context("Failed to remove leftover socket file")?;
    }

    let listener = UnixListener::bind(socket_path).context("Failed to bind coordinator socket")?;
    Ok((listener, socket_path.to_path_buf()))
}

/// Unpublish a coordinator by removing its socket file
pub fn cleanup_socket(socket_path: &Path) {
    match std::fs::remove_file(socket_path) {
        Ok(()) => debug!(?socket_path, "cleanup_socket: removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(?socket_path, error = %e, "Failed to remove socket file"),
    }
}

/// Read one newline-terminated frame, enforcing `max_bytes`
///
/// An oversize line is consumed whole so the stream stays aligned on frame
/// boundaries; the caller decides whether to answer with an error.
pub async fn read_frame<R: AsyncBufRead + Unpin>(reader: &mut R, max_bytes: usize) -> Result<ReadOutcome> {
    let mut buf = Vec::new();
    let bytes_read = (&mut *reader)
        .take(max_bytes as u64 + 1)
        .read_until(b'\n', &mut buf)
        .await
        .context("Failed to read frame")?;

    if bytes_read == 0 {
        return Ok(ReadOutcome::Eof);
    }

    if bytes_read > max_bytes {
        let mut total = bytes_read;
        if !buf.ends_with(b"\n") {
            total += discard_line(reader).await?;
        }
        return Ok(ReadOutcome::TooLarge(total));
    }

    match String::from_utf8(buf) {
        Ok(line) => Ok(ReadOutcome::Line(line.trim_end_matches(['\n', '\r']).to_string())),
        Err(e) => Ok(ReadOutcome::Malformed(format!("invalid UTF-8: {}", e.utf8_error()))),
    }
}

/// Skip the rest of the current line without buffering it
async fn discard_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<usize> {
    let mut discarded = 0;
    loop {
        let available = reader.fill_buf().await.context("Failed to read frame")?;
        if available.is_empty() {
            return Ok(discarded);
        }
        let (consumed, done) = match available.iter().position(|b| *b == b'\n') {
            Some(i) => (i + 1, true),
            None => (available.len(), false),
        };
        reader.consume(consumed);
        discarded += consumed;
        if done {
            return Ok(discarded);
        }
    }
}
