//! Room registry.
//!
//! Holds the participants of the shared room in admission order, enforces the
//! capacity limit and decides who carries the host flag. All mutation happens
//! under one mutex scoped to the room. The `*_with` variants run a callback
//! before the lock is released, so the membership notices it queues are
//! ordered the same way the mutations were.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use thiserror::Error;

use crate::protocol::{ConnectionId, RosterEntry};

/// Default maximum number of participants in the room.
pub const DEFAULT_ROOM_CAPACITY: usize = 10;

/// A participant admitted to the room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub connection_id: ConnectionId,
    pub display_name: String,
    pub is_host: bool,
    pub admitted_at: DateTime<Utc>,
}

impl Participant {
    pub fn roster_entry(&self) -> RosterEntry {
        RosterEntry {
            connection_id: self.connection_id.clone(),
            display_name: self.display_name.clone(),
            is_host: self.is_host,
        }
    }
}

/// Reasons an admission is refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdmitError {
    #[error("room is full ({capacity} participants)")]
    RoomFull { capacity: usize },

    #[error("connection {0} has already joined the room")]
    AlreadyJoined(ConnectionId),
}

/// Result of a successful admission.
#[derive(Debug, Clone)]
pub struct Admission {
    /// Whether the joiner is the host (the room was empty).
    pub is_host: bool,
    /// Every other participant, in admission order.
    pub existing: Vec<RosterEntry>,
}

/// Result of removing a participant.
#[derive(Debug, Clone)]
pub struct Removal {
    pub participant: Participant,
    /// Set when the removed participant was host and someone was promoted.
    pub promoted: Option<ConnectionId>,
    /// Everyone still in the room, in admission order.
    pub remaining: Vec<ConnectionId>,
}

#[derive(Debug)]
struct Room {
    /// Ordered by admission.
    participants: Vec<Participant>,
    capacity: usize,
}

impl Room {
    fn position(&self, connection_id: &ConnectionId) -> Option<usize> {
        self.participants
            .iter()
            .position(|p| &p.connection_id == connection_id)
    }
}

/// Shared handle to the room. Cloning is cheap and every clone sees the same
/// room.
#[derive(Debug, Clone)]
pub struct RoomRegistry {
    room: Arc<Mutex<Room>>,
}

impl RoomRegistry {
    /// Create an empty room. A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        Self {
            room: Arc::new(Mutex::new(Room {
                participants: Vec::new(),
                capacity: capacity.max(1),
            })),
        }
    }

    /// Admit a connection to the room.
    ///
    /// Refusals leave the room untouched. On success the joiner is host only if
    /// the room was empty before the insertion.
    pub fn admit(
        &self,
        connection_id: &ConnectionId,
        display_name: &str,
    ) -> Result<Admission, AdmitError> {
        self.admit_with(connection_id, display_name, |_| {})
    }

    /// Like [`admit`](Self::admit), calling `notify` with the admission while
    /// the room is still locked. `notify` must not block.
    pub fn admit_with<F>(
        &self,
        connection_id: &ConnectionId,
        display_name: &str,
        notify: F,
    ) -> Result<Admission, AdmitError>
    where
        F: FnOnce(&Admission),
    {
        let mut room = self.room.lock();

        if room.position(connection_id).is_some() {
            return Err(AdmitError::AlreadyJoined(connection_id.clone()));
        }

        if room.participants.len() >= room.capacity {
            tracing::warn!(
                connection_id = %connection_id,
                capacity = room.capacity,
                "Room full, admission refused"
            );
            return Err(AdmitError::RoomFull {
                capacity: room.capacity,
            });
        }

        let is_host = room.participants.is_empty();
        let existing = room
            .participants
            .iter()
            .map(Participant::roster_entry)
            .collect();

        room.participants.push(Participant {
            connection_id: connection_id.clone(),
            display_name: display_name.to_string(),
            is_host,
            admitted_at: Utc::now(),
        });

        tracing::info!(
            connection_id = %connection_id,
            display_name = display_name,
            is_host = is_host,
            participant_count = room.participants.len(),
            "Participant admitted"
        );

        let admission = Admission { is_host, existing };
        notify(&admission);
        Ok(admission)
    }

    /// Remove a participant. Returns `None` (and changes nothing) when the
    /// connection is not in the room.
    ///
    /// If the host leaves, the earliest-admitted remaining participant is
    /// promoted.
    pub fn remove(&self, connection_id: &ConnectionId) -> Option<Removal> {
        self.remove_with(connection_id, |_| {})
    }

    /// Like [`remove`](Self::remove), calling `notify` with the removal while
    /// the room is still locked. `notify` must not block.
    pub fn remove_with<F>(&self, connection_id: &ConnectionId, notify: F) -> Option<Removal>
    where
        F: FnOnce(&Removal),
    {
        let mut room = self.room.lock();
        let index = room.position(connection_id)?;
        let participant = room.participants.remove(index);

        let promoted = if participant.is_host {
            room.participants.first_mut().map(|next| {
                next.is_host = true;
                next.connection_id.clone()
            })
        } else {
            None
        };

        let remaining = room
            .participants
            .iter()
            .map(|p| p.connection_id.clone())
            .collect::<Vec<_>>();

        tracing::info!(
            connection_id = %connection_id,
            display_name = participant.display_name.as_str(),
            remaining = remaining.len(),
            "Participant removed"
        );
        if let Some(ref host) = promoted {
            tracing::info!(connection_id = %host, "Host promoted");
        }

        let removal = Removal {
            participant,
            promoted,
            remaining,
        };
        notify(&removal);
        Some(removal)
    }

    /// Whether the connection has been admitted.
    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.room.lock().position(connection_id).is_some()
    }

    /// Current participants in admission order.
    pub fn roster(&self) -> Vec<RosterEntry> {
        self.room
            .lock()
            .participants
            .iter()
            .map(Participant::roster_entry)
            .collect()
    }

    /// The current host, if the room is non-empty.
    pub fn host(&self) -> Option<ConnectionId> {
        self.room
            .lock()
            .participants
            .iter()
            .find(|p| p.is_host)
            .map(|p| p.connection_id.clone())
    }

    pub fn len(&self) -> usize {
        self.room.lock().participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.room.lock().capacity
    }

    /// Drop every participant. Used at shutdown; returns how many were removed.
    pub fn clear(&self) -> usize {
        let mut room = self.room.lock();
        let count = room.participants.len();
        room.participants.clear();
        count
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_ROOM_CAPACITY)
    }
}
