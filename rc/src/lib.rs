//! relaychat - broadcast chat through a central coordinator
//!
//! Peers register under a handle with a coordinator. Anything one peer sends
//! is relayed to every other registered peer; the sender never gets its own
//! message back.
//!
//! # Modules
//!
//! - [`coordinator`] - Peer registry and broadcast dispatch
//! - [`ipc`] - Unix socket transport and well-known name lookup
//! - [`peer`] - Chat participant built on the transport
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface
//!
//! Handles are not authenticated: whoever claims a handle can send as it or
//! unregister it. This is a known limitation of the protocol.

pub mod cli;
pub mod config;
pub mod coordinator;
pub mod ipc;
pub mod peer;

/// Version reported in ping responses
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Re-export commonly used types
pub use config::{Config, PeerConfig};
pub use coordinator::{
    ChannelCallback, Coordinator, CoordinatorConfig, CoordinatorError, CoordinatorMetrics, Delivery, DeliveryError,
    DispatchReport, Dispatcher, PeerCallback, Registry,
};
pub use ipc::{CoordinatorClient, CoordinatorServer, Session};
pub use peer::Peer;
