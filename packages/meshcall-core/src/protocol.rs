//! # Signaling Protocol
//!
//! Messages exchanged with the meshcall relay, plus the shapes of the
//! negotiation payloads the relay carries without looking at.
//!
//! Must match the relay server's `ClientMessage` / `ServerMessage` enums:
//! JSON objects internally tagged by `type`, one per WebSocket text frame.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Server-assigned identifier of one participant's connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ConnectionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Messages sent from client to relay server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    JoinRoom {
        display_name: String,
    },
    LeaveRoom,
    Offer {
        description: Value,
        to: ConnectionId,
    },
    Answer {
        description: Value,
        to: ConnectionId,
    },
    IceCandidate {
        candidate: Value,
        to: ConnectionId,
    },
    Ping,
}

/// Messages received from the relay server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    AllUsers {
        connection_id: ConnectionId,
        users: Vec<RosterEntry>,
        is_host: bool,
    },
    UserJoined {
        connection_id: ConnectionId,
        display_name: String,
        is_host: bool,
    },
    RoomFull,
    HostChanged {
        connection_id: ConnectionId,
    },
    Offer {
        description: Value,
        from: ConnectionId,
    },
    Answer {
        description: Value,
        from: ConnectionId,
    },
    IceCandidate {
        candidate: Value,
        from: ConnectionId,
    },
    UserDisconnected {
        connection_id: ConnectionId,
    },
    Error {
        message: String,
    },
    Pong,
}

/// A participant already in the room, as listed in `all-users`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub connection_id: ConnectionId,
    pub display_name: String,
    pub is_host: bool,
}

// ============================================================================
// NEGOTIATION PAYLOADS
// ============================================================================

/// Kind of a session description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// A session description as produced and consumed by the media transport.
///
/// Serialized the way browsers do (`{"type": "offer", "sdp": "..."}`) so
/// browser clients and native clients can share a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }

    /// Parse a relayed description, requiring the given kind.
    pub fn from_payload(payload: Value, expected: SdpType) -> Result<Self> {
        let description: SessionDescription = serde_json::from_value(payload)
            .map_err(|e| Error::MalformedNegotiationPayload(e.to_string()))?;
        if description.sdp_type != expected {
            return Err(Error::MalformedNegotiationPayload(format!(
                "expected {:?} description, got {:?}",
                expected, description.sdp_type
            )));
        }
        Ok(description)
    }

    pub fn to_payload(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// A single network candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// The candidate string
    pub candidate: String,
    /// SDP mid
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    /// SDP m-line index
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_m_line_index: Option<u16>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
        }
    }

    /// Parse a relayed candidate.
    pub fn from_payload(payload: Value) -> Result<Self> {
        serde_json::from_value(payload).map_err(|e| Error::MalformedNegotiationPayload(e.to_string()))
    }

    pub fn to_payload(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}
