//! Server state management.
//!
//! Owns the connection table (connection id → outbound channel) and the room
//! registry. Created once at start-up and handed to every connection handler;
//! torn down after the server stops accepting connections.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::protocol::{ConnectionId, ServerMessage};
use crate::registry::{RoomRegistry, DEFAULT_ROOM_CAPACITY};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bind: String,
    pub port: u16,
    /// Maximum participants admitted to the room at once.
    pub room_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 3000,
            room_capacity: DEFAULT_ROOM_CAPACITY,
        }
    }
}

/// A connected client's sender channel.
pub type ClientSender = mpsc::UnboundedSender<ServerMessage>;

/// Shared server state.
#[derive(Clone)]
pub struct RelayState {
    /// Connection id → sender channel for every open socket, joined or not.
    pub connections: Arc<DashMap<ConnectionId, ClientSender>>,

    /// The single shared room.
    pub registry: RoomRegistry,

    /// Server configuration.
    pub config: RelayConfig,

    pub started_at: DateTime<Utc>,
}

impl RelayState {
    /// Create a new state with an empty room.
    pub fn new(config: RelayConfig) -> Self {
        Self {
            connections: Arc::new(DashMap::new()),
            registry: RoomRegistry::new(config.room_capacity),
            config,
            started_at: Utc::now(),
        }
    }

    // ── Connection Management ─────────────────────────────────────────────

    /// Register a freshly accepted connection.
    pub fn register_connection(&self, connection_id: &ConnectionId, sender: ClientSender) {
        tracing::debug!(connection_id = %connection_id, "Connection registered");
        self.connections.insert(connection_id.clone(), sender);
    }

    /// Forget a connection once its socket has closed.
    pub fn unregister_connection(&self, connection_id: &ConnectionId) {
        tracing::debug!(connection_id = %connection_id, "Connection unregistered");
        self.connections.remove(connection_id);
    }

    /// Check if a connection is currently open.
    pub fn is_connected(&self, connection_id: &ConnectionId) -> bool {
        self.connections.contains_key(connection_id)
    }

    /// Queue a message for one connection. Returns false if the connection is
    /// unknown or its writer has gone away.
    pub fn send_to_client(&self, connection_id: &ConnectionId, message: ServerMessage) -> bool {
        if let Some(sender) = self.connections.get(connection_id) {
            sender.send(message).is_ok()
        } else {
            false
        }
    }

    /// Queue the same message for each recipient. Never waits on a recipient;
    /// returns how many accepted it.
    pub fn broadcast(&self, recipients: &[ConnectionId], message: &ServerMessage) -> usize {
        recipients
            .iter()
            .filter(|id| self.send_to_client(id, message.clone()))
            .count()
    }

    /// Get the number of open connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────

    /// Drop the room and every connection channel. Writers notice their
    /// channel closing and end.
    pub fn shutdown(&self) {
        let participants = self.registry.clear();
        let connections = self.connections.len();
        self.connections.clear();
        tracing::info!(
            participants = participants,
            connections = connections,
            "Relay state torn down"
        );
    }
}
