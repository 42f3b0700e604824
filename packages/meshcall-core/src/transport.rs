//! # Media Transport
//!
//! The capability a peer session drives: produce and apply session
//! descriptions, accept remote candidates, and report what happens on the
//! wire. A real implementation wraps a WebRTC stack; the session state
//! machine only ever sees this trait.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::media::{MediaSource, MediaTrack};
use crate::protocol::{ConnectionId, IceCandidate, SessionDescription};

/// Transport-level connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Media arriving from the remote participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteStream {
    pub id: String,
    pub tracks: Vec<MediaTrack>,
}

/// Things the transport reports asynchronously.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A local candidate to forward to the remote side
    CandidateDiscovered(IceCandidate),
    /// Remote media became available
    RemoteStream(RemoteStream),
    /// The underlying connection changed state
    ConnectionState(ConnectionState),
}

/// Event stream of one transport.
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// One media connection to one remote participant.
#[async_trait]
pub trait MediaTransport: Send {
    /// Produce a local offer and install it as the local description.
    async fn create_offer(&mut self) -> Result<SessionDescription>;

    /// Produce a local answer to the installed remote offer.
    async fn create_answer(&mut self) -> Result<SessionDescription>;

    async fn apply_remote_description(&mut self, description: SessionDescription) -> Result<()>;

    async fn add_candidate(&mut self, candidate: IceCandidate) -> Result<()>;

    /// Tear down the connection. Called at most once per transport.
    async fn close(&mut self);
}

/// A freshly created transport with its event stream.
pub struct BoundTransport {
    pub handle: Box<dyn MediaTransport>,
    pub events: TransportEvents,
}

/// Creates transports, each attached to the shared local media.
pub trait TransportFactory: Send + Sync {
    fn create(&self, remote: &ConnectionId, local_media: Arc<dyn MediaSource>) -> Result<BoundTransport>;
}
