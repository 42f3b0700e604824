//! # meshcall Core
//!
//! Client side of a small-group mesh call: every participant holds a direct
//! media connection to every other participant, negotiated through the
//! meshcall relay.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          MESHCALL CLIENT CORE                           │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │   relay (WebSocket)                                                     │
//! │        │  ▲                                                             │
//! │        ▼  │ one ordered outbound channel                                │
//! │  ┌─────────────────┐       ┌──────────────────────────────────────┐     │
//! │  │ SignalingClient │─────► │         PeerSessionManager           │     │
//! │  └─────────────────┘       │  roster / join / leave / relay msgs  │     │
//! │                            └───────┬───────────┬───────────┬──────┘     │
//! │                                    ▼           ▼           ▼            │
//! │                             PeerSession  PeerSession  PeerSession       │
//! │                             (own task)   (own task)   (own task)        │
//! │                                    │           │           │            │
//! │                             MediaTransport (injected capability)        │
//! │                                                                         │
//! │   LocalMedia: one capture source shared read-only by every session      │
//! │   MeshEvent:  everything the UI needs to render the call                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Negotiation
//!
//! Initiation is asymmetric. Participants already in the room send an offer
//! to each newcomer as soon as they hear it joined; the newcomer learns the
//! roster on admission and only ever answers. Two sides never offer to each
//! other, so the state machine needs no glare handling or rollback.
//!
//! ## Module Hierarchy
//!
//! - [`error`] - Error types for the whole crate
//! - [`protocol`] - Signaling messages and negotiation payload shapes
//! - [`config`] - Client configuration
//! - [`media`] - Local capture source and track toggles
//! - [`transport`] - The media transport capability set
//! - [`session`] - Per-peer negotiation state machine
//! - [`manager`] - Owns all sessions of one client
//! - [`signaling`] - WebSocket link to the relay
//! - [`client`] - Glues signaling and the manager together

pub mod client;
pub mod config;
pub mod error;
pub mod manager;
pub mod media;
pub mod protocol;
pub mod session;
pub mod signaling;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{CallEnd, ClientCommand, MeshClient};
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use manager::{MeshEvent, PeerSessionManager};
pub use media::{LocalMedia, MediaSource, MediaTrack, TrackKind};
pub use protocol::{ConnectionId, IceCandidate, RosterEntry, SdpType, SessionDescription};
pub use session::NegotiationState;
pub use transport::{
    BoundTransport, ConnectionState, MediaTransport, RemoteStream, TransportEvent, TransportEvents, TransportFactory,
};

/// Maximum number of participants in a room.
pub const ROOM_CAPACITY: usize = 10;

/// Maximum display name length, in characters.
pub const MAX_DISPLAY_NAME_LEN: usize = 30;

/// Get the library version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
