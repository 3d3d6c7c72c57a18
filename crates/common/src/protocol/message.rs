use serde::{Deserialize, Serialize};

use super::{TunnelRequest, TunnelResponse};
use crate::error::{Result, TunnelError};

/// Envelopes sent by the tunnel client to the relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Claim a subdomain for the local port
    Register {
        port: u16,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subdomain: Option<String>,
    },

    /// Origin response for a relayed request
    Tunnel { data: TunnelResponse },

    /// Application-level heartbeat
    Ping,
}

/// Envelopes sent by the relay to the tunnel client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Registration accepted; `url` is the public address of the tunnel
    Registered { url: String },

    /// A public request to be answered by the origin
    Tunnel { data: TunnelRequest },

    /// Human-readable failure reason
    Error { message: String },

    /// Answer to a client `ping`
    Pong,
}

impl ClientMessage {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| TunnelError::MalformedMessage(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl ServerMessage {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| TunnelError::MalformedMessage(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}
