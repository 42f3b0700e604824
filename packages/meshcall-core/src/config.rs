//! Client configuration.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::MAX_DISPLAY_NAME_LEN;

/// Public STUN servers used when none are configured.
pub const DEFAULT_ICE_SERVERS: &[&str] = &[
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
    "stun:stun2.l.google.com:19302",
];

/// How a client reaches the relay and presents itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// WebSocket URL of the relay, e.g. `ws://localhost:3000/ws`
    pub server_url: String,
    /// Name shown to the other participants
    pub display_name: String,
    /// STUN/TURN URLs handed to the media transport
    #[serde(default = "default_ice_servers")]
    pub ice_servers: Vec<String>,
}

fn default_ice_servers() -> Vec<String> {
    DEFAULT_ICE_SERVERS.iter().map(|s| s.to_string()).collect()
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            display_name: display_name.into(),
            ice_servers: default_ice_servers(),
        }
    }

    pub fn with_ice_servers(mut self, servers: Vec<String>) -> Self {
        self.ice_servers = servers;
        self
    }

    /// Trim the display name and check it is usable.
    pub fn validate(mut self) -> Result<Self> {
        self.display_name = normalize_display_name(&self.display_name)?;
        if self.server_url.is_empty() {
            return Err(Error::ConnectionFailed("server URL is empty".into()));
        }
        Ok(self)
    }
}

/// Trimmed, non-empty, at most [`MAX_DISPLAY_NAME_LEN`] characters.
pub fn normalize_display_name(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidDisplayName("name is empty".into()));
    }
    let len = trimmed.chars().count();
    if len > MAX_DISPLAY_NAME_LEN {
        return Err(Error::InvalidDisplayName(format!(
            "name is {} characters, limit is {}",
            len, MAX_DISPLAY_NAME_LEN
        )));
    }
    Ok(trimmed.to_string())
}
