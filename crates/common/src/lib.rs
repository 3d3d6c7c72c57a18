//! Common types and utilities for the ntnl tunnel
//!
//! This crate provides the control-channel wire protocol and helpers shared by
//! the relay (public endpoint) and the forwarder (tunnel client).

pub mod constants;
pub mod error;
pub mod protocol;
pub mod utils;
pub mod validation;

// Re-export commonly used types for convenience
pub use error::{Result, TunnelError};
pub use protocol::{ClientMessage, ServerMessage, TunnelRequest, TunnelResponse};
pub use utils::{
    decode_body, encode_body, generate_request_id, generate_subdomain, headers_to_map,
    map_to_headers, strip_hop_by_hop,
};
