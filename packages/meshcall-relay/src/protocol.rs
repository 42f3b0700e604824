//! Signaling protocol message definitions.
//!
//! The server speaks a JSON-over-WebSocket protocol: one message per text
//! frame, internally tagged by `type`. Negotiation payloads (session
//! descriptions, network candidates) are opaque to the server and are
//! forwarded untouched.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ── Identifiers ───────────────────────────────────────────────────────────────

/// Server-assigned identifier of a single WebSocket connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Allocate a fresh, unique connection id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

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

// ── Client → Server ───────────────────────────────────────────────────────────

/// Messages sent from a client to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Ask to be admitted to the room.
    JoinRoom {
        display_name: String,
    },

    /// Leave the room without closing the connection.
    LeaveRoom,

    /// Session description offer for another participant.
    Offer {
        description: Value,
        to: ConnectionId,
    },

    /// Session description answer for another participant.
    Answer {
        description: Value,
        to: ConnectionId,
    },

    /// Network candidate for another participant.
    IceCandidate {
        candidate: Value,
        to: ConnectionId,
    },

    /// Keepalive.
    Ping,
}

// ── Server → Client ───────────────────────────────────────────────────────────

/// Messages sent from the server to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Admission response: everyone already in the room, and whether the
    /// joiner became host.
    AllUsers {
        connection_id: ConnectionId,
        users: Vec<RosterEntry>,
        is_host: bool,
    },

    /// Another participant was admitted.
    UserJoined {
        connection_id: ConnectionId,
        display_name: String,
        is_host: bool,
    },

    /// Admission refused: the room is at capacity.
    RoomFull,

    /// The previous host left and this participant now holds the flag.
    HostChanged {
        connection_id: ConnectionId,
    },

    /// Relayed offer.
    Offer {
        description: Value,
        from: ConnectionId,
    },

    /// Relayed answer.
    Answer {
        description: Value,
        from: ConnectionId,
    },

    /// Relayed network candidate.
    IceCandidate {
        candidate: Value,
        from: ConnectionId,
    },

    /// A participant left the room.
    UserDisconnected {
        connection_id: ConnectionId,
    },

    /// Error response.
    Error {
        message: String,
    },

    /// Keepalive response.
    Pong,
}

// ── Supporting Types ──────────────────────────────────────────────────────────

/// One participant as seen by other participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub connection_id: ConnectionId,
    pub display_name: String,
    pub is_host: bool,
}

/// The three kinds of negotiation message the relay forwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Offer,
    Answer,
    Candidate,
}

impl SignalKind {
    /// Build the inbound form of a relayed message, stamped with its sender.
    pub fn into_server_message(self, payload: Value, from: ConnectionId) -> ServerMessage {
        match self {
            SignalKind::Offer => ServerMessage::Offer {
                description: payload,
                from,
            },
            SignalKind::Answer => ServerMessage::Answer {
                description: payload,
                from,
            },
            SignalKind::Candidate => ServerMessage::IceCandidate {
                candidate: payload,
                from,
            },
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalKind::Offer => write!(f, "offer"),
            SignalKind::Answer => write!(f, "answer"),
            SignalKind::Candidate => write!(f, "ice-candidate"),
        }
    }
}
