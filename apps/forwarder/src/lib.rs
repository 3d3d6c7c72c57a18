//! ntnl tunnel client
//!
//! Keeps one control connection open to a relay, replays relayed requests
//! against a local origin, and reconnects with exponential backoff.

pub mod config;
pub mod connection;
pub mod forwarder;
pub mod reconnect;
pub mod serve;

pub use config::{ClientConfig, ConfigManager};
pub use connection::ConnectionManager;
pub use forwarder::Forwarder;
pub use reconnect::{ConnectionState, ReconnectConfig, Reconnector};
