//! Coordinator for peer-to-peer broadcast
//!
//! The Coordinator keeps one registry of peers and offers three operations:
//! - **Register:** Bind a handle to a delivery callback (last write wins)
//! - **Broadcast:** Relay a message to every peer except the sender
//! - **Unregister:** Drop a handle (idempotent)

mod callback;
mod config;
mod core;
mod dispatch;
mod error;
mod messages;
mod registry;

pub use callback::{ChannelCallback, PeerCallback};
pub use config::{CoordinatorConfig, DEFAULT_NAME};
pub use core::Coordinator;
pub use dispatch::Dispatcher;
pub use error::{CoordinatorError, DeliveryError};
pub use messages::{CoordinatorMetrics, Delivery, DispatchReport};
pub use registry::{Registry, RegistryEntry};
