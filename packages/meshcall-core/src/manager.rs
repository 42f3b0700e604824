//! # Peer Session Manager
//!
//! Owns every [`PeerSession`](crate::session::PeerSession) of one client and
//! turns relay messages into session commands.
//!
//! ## Who offers
//!
//! | Learned about the peer from     | Session starts as | Then                  |
//! |---------------------------------|-------------------|-----------------------|
//! | `user-joined` (they just joined)| Idle              | initiate (send offer) |
//! | `all-users` (we just joined)    | Idle              | wait for their offer  |
//! | an `offer` from an unknown id   | Idle              | answer                |
//!
//! Members already in the room offer to the newcomer; the newcomer only
//! answers. Two peers therefore never offer to each other.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::normalize_display_name;
use crate::error::{Error, Result};
use crate::media::{LocalMedia, TrackKind};
use crate::protocol::{ClientMessage, ConnectionId, RosterEntry, ServerMessage};
use crate::session::{self, NegotiationState, PeerSession, SessionCommand, SessionContext, SessionHandle};
use crate::transport::{ConnectionState, RemoteStream, TransportFactory};

/// Everything the UI needs to render the call.
#[derive(Debug, Clone, PartialEq)]
pub enum MeshEvent {
    /// The relay admitted us; `participants` were already in the room
    Admitted {
        connection_id: ConnectionId,
        is_host: bool,
        participants: Vec<RosterEntry>,
    },
    /// Admission refused; local media has been released
    RoomFull,
    ParticipantJoined {
        connection_id: ConnectionId,
        display_name: String,
        is_host: bool,
    },
    ParticipantLeft {
        connection_id: ConnectionId,
    },
    HostChanged {
        connection_id: ConnectionId,
        is_local: bool,
    },
    NegotiationStateChanged {
        connection_id: ConnectionId,
        state: NegotiationState,
    },
    ConnectionStateChanged {
        connection_id: ConnectionId,
        state: ConnectionState,
    },
    RemoteStreamAvailable {
        connection_id: ConnectionId,
        stream: RemoteStream,
    },
    LocalTrackToggled {
        kind: TrackKind,
        enabled: bool,
    },
    /// The relay link is gone; every session has been closed
    Disconnected,
}

/// Room membership as seen by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Membership {
    Outside,
    Joining,
    Joined,
}

/// All peer sessions of one client.
pub struct PeerSessionManager {
    local_id: Option<ConnectionId>,
    is_host: bool,
    membership: Membership,
    sessions: HashMap<ConnectionId, SessionHandle>,
    media: LocalMedia,
    context: SessionContext,
}

impl PeerSessionManager {
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        media: LocalMedia,
        signals: mpsc::UnboundedSender<ClientMessage>,
        events: mpsc::UnboundedSender<MeshEvent>,
    ) -> Self {
        let context = SessionContext {
            factory,
            local_media: media.source(),
            signals,
            events,
        };
        Self {
            local_id: None,
            is_host: false,
            membership: Membership::Outside,
            sessions: HashMap::new(),
            media,
            context,
        }
    }

    pub fn local_id(&self) -> Option<&ConnectionId> {
        self.local_id.as_ref()
    }

    pub fn is_host(&self) -> bool {
        self.is_host
    }

    pub fn is_joined(&self) -> bool {
        self.membership == Membership::Joined
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn session_state(&self, remote: &ConnectionId) -> Option<NegotiationState> {
        self.sessions.get(remote).map(SessionHandle::state)
    }

    /// Display name of a peer, once the relay has told us it.
    ///
    /// Peers that reached us only through an offer have no name yet.
    pub fn participant_name(&self, remote: &ConnectionId) -> Option<&str> {
        self.sessions.get(remote).and_then(SessionHandle::display_name)
    }

    pub fn remotes(&self) -> Vec<ConnectionId> {
        let mut remotes: Vec<_> = self.sessions.keys().cloned().collect();
        remotes.sort();
        remotes
    }

    pub fn media(&self) -> &LocalMedia {
        &self.media
    }

    /// Ask the relay to admit us.
    pub fn join(&mut self, display_name: &str) -> Result<()> {
        if self.membership != Membership::Outside {
            return Err(Error::Internal("join already requested".into()));
        }
        if self.media.is_released() {
            return Err(Error::MediaReleased);
        }
        let display_name = normalize_display_name(display_name)?;
        self.signal(ClientMessage::JoinRoom { display_name })?;
        self.membership = Membership::Joining;
        Ok(())
    }

    /// Apply one message from the relay.
    ///
    /// Returns [`Error::RoomFull`] when admission was refused and
    /// [`Error::ProtocolError`] when the relay reports an error. Every other
    /// message is handled in place.
    pub async fn handle_server_message(&mut self, message: ServerMessage) -> Result<()> {
        match message {
            ServerMessage::AllUsers {
                connection_id,
                users,
                is_host,
            } => self.on_admitted(connection_id, users, is_host),

            ServerMessage::UserJoined {
                connection_id,
                display_name,
                is_host,
            } => {
                if self.local_id.as_ref() == Some(&connection_id) {
                    return Ok(());
                }
                tracing::info!(remote = %connection_id, name = %display_name, "Participant joined");
                let session = self.ensure_session(&connection_id, Some(display_name.clone()));
                if let Err(e) = session.send(SessionCommand::Initiate) {
                    tracing::warn!(remote = %connection_id, error = %e, "Could not start negotiation");
                }
                self.emit(MeshEvent::ParticipantJoined {
                    connection_id,
                    display_name,
                    is_host,
                });
                Ok(())
            }

            ServerMessage::RoomFull => {
                tracing::warn!("Room is full, releasing local media");
                self.membership = Membership::Outside;
                self.media.release();
                self.emit(MeshEvent::RoomFull);
                Err(Error::RoomFull)
            }

            ServerMessage::HostChanged { connection_id } => {
                let is_local = self.local_id.as_ref() == Some(&connection_id);
                if is_local {
                    tracing::info!("We are now the host");
                }
                self.is_host = is_local;
                self.emit(MeshEvent::HostChanged {
                    connection_id,
                    is_local,
                });
                Ok(())
            }

            ServerMessage::Offer { description, from } => {
                self.ensure_session(&from, None)
                    .send(SessionCommand::ApplyOffer(description))
            }

            ServerMessage::Answer { description, from } => match self.sessions.get(&from) {
                Some(session) => session.send(SessionCommand::ApplyAnswer(description)),
                None => {
                    tracing::warn!(remote = %from, "Answer from unknown participant");
                    Ok(())
                }
            },

            ServerMessage::IceCandidate { candidate, from } => match self.sessions.get(&from) {
                Some(session) => session.send(SessionCommand::ApplyCandidate(candidate)),
                None => {
                    tracing::debug!(remote = %from, "Candidate from unknown participant");
                    Ok(())
                }
            },

            ServerMessage::UserDisconnected { connection_id } => {
                if let Some(session) = self.sessions.remove(&connection_id) {
                    tracing::info!(remote = %connection_id, "Participant left");
                    session.close().await;
                    self.emit(MeshEvent::ParticipantLeft { connection_id });
                }
                Ok(())
            }

            ServerMessage::Error { message } => Err(Error::ProtocolError(message)),

            ServerMessage::Pong => Ok(()),
        }
    }

    pub fn toggle_audio(&self) -> Result<Option<bool>> {
        self.toggle(TrackKind::Audio)
    }

    pub fn toggle_video(&self) -> Result<Option<bool>> {
        self.toggle(TrackKind::Video)
    }

    fn toggle(&self, kind: TrackKind) -> Result<Option<bool>> {
        let enabled = self.media.toggle(kind)?;
        if let Some(enabled) = enabled {
            self.emit(MeshEvent::LocalTrackToggled { kind, enabled });
        }
        Ok(enabled)
    }

    /// Leave the room: tell the relay, close every session, release media.
    pub async fn leave(&mut self) {
        if self.membership != Membership::Outside {
            // The socket may already be gone; teardown proceeds regardless.
            let _ = self.signal(ClientMessage::LeaveRoom);
        }
        self.teardown().await;
    }

    /// The relay link dropped.
    pub async fn disconnected(&mut self) {
        tracing::info!(sessions = self.sessions.len(), "Relay connection lost");
        self.teardown().await;
        self.emit(MeshEvent::Disconnected);
    }

    fn on_admitted(&mut self, local_id: ConnectionId, users: Vec<RosterEntry>, is_host: bool) -> Result<()> {
        tracing::info!(
            connection_id = %local_id,
            is_host,
            participants = users.len(),
            "Admitted to room"
        );
        self.local_id = Some(local_id.clone());
        self.is_host = is_host;
        self.membership = Membership::Joined;

        // Everyone listed will offer to us.
        for user in users.iter().filter(|u| u.connection_id != local_id) {
            self.ensure_session(&user.connection_id, Some(user.display_name.clone()));
        }

        self.emit(MeshEvent::Admitted {
            connection_id: local_id,
            is_host,
            participants: users,
        });
        Ok(())
    }

    fn ensure_session(&mut self, remote: &ConnectionId, display_name: Option<String>) -> &SessionHandle {
        let context = &self.context;
        self.sessions.entry(remote.clone()).or_insert_with(|| {
            tracing::debug!(remote = %remote, "Creating peer session");
            session::spawn(PeerSession::new(remote.clone(), display_name, context.clone()))
        })
    }

    async fn teardown(&mut self) {
        for (_, session) in self.sessions.drain() {
            session.close().await;
        }
        self.membership = Membership::Outside;
        self.is_host = false;
        self.media.release();
    }

    fn signal(&self, message: ClientMessage) -> Result<()> {
        self.context.signals.send(message).map_err(|_| Error::NotConnected)
    }

    fn emit(&self, event: MeshEvent) {
        let _ = self.context.events.send(event);
    }
}
