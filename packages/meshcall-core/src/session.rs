//! # Peer Session
//!
//! One negotiation state machine per remote participant.
//!
//! ## States
//!
//! ```text
//!              initiate                       answer received
//!   Idle ──────────────────► OfferSent ─────────────────────────┐
//!    │                                                          ▼
//!    │ offer received                                   AnswerExchanged ──► Connected
//!    └─────────────────────► OfferReceived ──(answer sent)──────┘   transport reports
//!                                                                   a live media path
//!
//!   any state ──close──► Closed (absorbing)
//! ```
//!
//! Only `Idle` accepts an offer or an initiate, and only `OfferSent`
//! accepts an answer. Candidates are accepted in every state except
//! `Closed`; they are held back until the transport has a remote
//! description, then applied in arrival order.
//!
//! ## Runtime
//!
//! [`spawn`] moves a [`PeerSession`] onto its own task. The task owns the
//! session outright and multiplexes the command inbox with the transport's
//! event stream, so the session itself needs no locking. Each command runs
//! to completion before the next one starts, unless the handle is closed
//! while it is in flight: closing cancels the pending transport call and
//! tears the transport down.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::manager::MeshEvent;
use crate::media::MediaSource;
use crate::protocol::{ClientMessage, ConnectionId, IceCandidate, SdpType, SessionDescription};
use crate::transport::{
    ConnectionState, MediaTransport, RemoteStream, TransportEvent, TransportEvents, TransportFactory,
};

/// Negotiation progress with one remote participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NegotiationState {
    Idle,
    OfferSent,
    OfferReceived,
    AnswerExchanged,
    Connected,
    Closed,
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NegotiationState::Idle => "idle",
            NegotiationState::OfferSent => "offer-sent",
            NegotiationState::OfferReceived => "offer-received",
            NegotiationState::AnswerExchanged => "answer-exchanged",
            NegotiationState::Connected => "connected",
            NegotiationState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// What every session of one client shares.
#[derive(Clone)]
pub struct SessionContext {
    pub factory: Arc<dyn TransportFactory>,
    pub local_media: Arc<dyn MediaSource>,
    /// The single ordered outbound signaling channel
    pub signals: mpsc::UnboundedSender<ClientMessage>,
    pub events: mpsc::UnboundedSender<MeshEvent>,
}

/// Negotiation with one remote participant.
pub struct PeerSession {
    remote: ConnectionId,
    display_name: Option<String>,
    state: NegotiationState,
    transport: Option<Box<dyn MediaTransport>>,
    transport_events: Option<TransportEvents>,
    remote_description_applied: bool,
    pending_candidates: Vec<IceCandidate>,
    remote_stream: Option<RemoteStream>,
    context: SessionContext,
    state_tx: watch::Sender<NegotiationState>,
}

impl PeerSession {
    pub fn new(remote: ConnectionId, display_name: Option<String>, context: SessionContext) -> Self {
        let (state_tx, _) = watch::channel(NegotiationState::Idle);
        Self {
            remote,
            display_name,
            state: NegotiationState::Idle,
            transport: None,
            transport_events: None,
            remote_description_applied: false,
            pending_candidates: Vec::new(),
            remote_stream: None,
            context,
            state_tx,
        }
    }

    pub fn remote(&self) -> &ConnectionId {
        &self.remote
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn remote_stream(&self) -> Option<&RemoteStream> {
        self.remote_stream.as_ref()
    }

    pub fn has_transport(&self) -> bool {
        self.transport.is_some()
    }

    pub fn pending_candidate_count(&self) -> usize {
        self.pending_candidates.len()
    }

    pub fn subscribe(&self) -> watch::Receiver<NegotiationState> {
        self.state_tx.subscribe()
    }

    /// Hand the event stream of a newly created transport to whoever drives
    /// this session.
    pub fn take_transport_events(&mut self) -> Option<TransportEvents> {
        self.transport_events.take()
    }

    /// Initiator path: create the transport, produce an offer and send it.
    pub async fn initiate(&mut self) -> Result<()> {
        self.expect_state(NegotiationState::Idle, "initiate")?;

        let offer = self.ensure_transport()?.create_offer().await?;
        let description = offer.to_payload()?;
        self.set_state(NegotiationState::OfferSent);
        self.signal(ClientMessage::Offer {
            description,
            to: self.remote.clone(),
        })
    }

    /// Responder path: apply the remote offer, answer it.
    pub async fn apply_offer(&mut self, payload: Value) -> Result<()> {
        self.expect_state(NegotiationState::Idle, "offer")?;
        let offer = SessionDescription::from_payload(payload, SdpType::Offer)?;

        self.ensure_transport()?.apply_remote_description(offer).await?;
        self.remote_description_applied = true;
        self.set_state(NegotiationState::OfferReceived);

        let answer = self.ensure_transport()?.create_answer().await?;
        let description = answer.to_payload()?;
        self.set_state(NegotiationState::AnswerExchanged);
        self.signal(ClientMessage::Answer {
            description,
            to: self.remote.clone(),
        })?;

        self.flush_pending_candidates().await;
        Ok(())
    }

    /// Complete the initiator path with the matching answer.
    pub async fn apply_answer(&mut self, payload: Value) -> Result<()> {
        self.expect_state(NegotiationState::OfferSent, "answer")?;
        let answer = SessionDescription::from_payload(payload, SdpType::Answer)?;

        self.ensure_transport()?.apply_remote_description(answer).await?;
        self.remote_description_applied = true;
        self.flush_pending_candidates().await;

        self.set_state(NegotiationState::AnswerExchanged);
        Ok(())
    }

    /// Apply a remote candidate, or hold it until the transport can take it.
    pub async fn apply_candidate(&mut self, payload: Value) -> Result<()> {
        if self.state == NegotiationState::Closed {
            return Err(Error::SessionClosed(self.remote.to_string()));
        }
        let candidate = IceCandidate::from_payload(payload)?;

        match self.transport.as_mut() {
            Some(transport) if self.remote_description_applied => transport.add_candidate(candidate).await,
            _ => {
                tracing::trace!(remote = %self.remote, "Buffering remote candidate");
                self.pending_candidates.push(candidate);
                Ok(())
            }
        }
    }

    /// React to something the transport reported.
    pub async fn on_transport_event(&mut self, event: TransportEvent) -> Result<()> {
        if self.state == NegotiationState::Closed {
            return Ok(());
        }

        match event {
            TransportEvent::CandidateDiscovered(candidate) => {
                let candidate = candidate.to_payload()?;
                self.signal(ClientMessage::IceCandidate {
                    candidate,
                    to: self.remote.clone(),
                })
            }
            TransportEvent::RemoteStream(stream) => {
                tracing::info!(remote = %self.remote, stream = %stream.id, "Remote stream available");
                self.remote_stream = Some(stream.clone());
                self.emit(MeshEvent::RemoteStreamAvailable {
                    connection_id: self.remote.clone(),
                    stream,
                });
                Ok(())
            }
            TransportEvent::ConnectionState(state) => {
                tracing::debug!(remote = %self.remote, ?state, "Transport state changed");
                self.emit(MeshEvent::ConnectionStateChanged {
                    connection_id: self.remote.clone(),
                    state,
                });
                if state == ConnectionState::Connected && self.state == NegotiationState::AnswerExchanged {
                    self.set_state(NegotiationState::Connected);
                }
                Ok(())
            }
        }
    }

    /// Release the transport and the remote stream. Closing twice is a no-op.
    pub async fn close(&mut self) {
        if self.state == NegotiationState::Closed {
            return;
        }
        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
        }
        self.transport_events = None;
        self.remote_stream = None;
        self.pending_candidates.clear();
        self.set_state(NegotiationState::Closed);
    }

    async fn handle_command(&mut self, command: SessionCommand) -> Result<()> {
        match command {
            SessionCommand::Initiate => self.initiate().await,
            SessionCommand::ApplyOffer(payload) => self.apply_offer(payload).await,
            SessionCommand::ApplyAnswer(payload) => self.apply_answer(payload).await,
            SessionCommand::ApplyCandidate(payload) => self.apply_candidate(payload).await,
            SessionCommand::Close => {
                self.close().await;
                Ok(())
            }
        }
    }

    fn ensure_transport(&mut self) -> Result<&mut Box<dyn MediaTransport>> {
        if self.transport.is_none() {
            let bound = self
                .context
                .factory
                .create(&self.remote, Arc::clone(&self.context.local_media))?;
            tracing::debug!(remote = %self.remote, "Created media transport");
            self.transport_events = Some(bound.events);
            self.transport = Some(bound.handle);
        }
        self.transport
            .as_mut()
            .ok_or_else(|| Error::Internal("transport missing after creation".into()))
    }

    async fn flush_pending_candidates(&mut self) {
        if self.pending_candidates.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut self.pending_candidates);
        let Some(transport) = self.transport.as_mut() else {
            self.pending_candidates = pending;
            return;
        };
        tracing::debug!(remote = %self.remote, count = pending.len(), "Applying buffered candidates");
        for candidate in pending {
            if let Err(e) = transport.add_candidate(candidate).await {
                tracing::warn!(remote = %self.remote, error = %e, "Buffered candidate rejected");
            }
        }
    }

    fn expect_state(&self, expected: NegotiationState, message: &'static str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::UnexpectedNegotiationMessage {
                state: self.state,
                message,
            })
        }
    }

    fn set_state(&mut self, state: NegotiationState) {
        if self.state == state {
            return;
        }
        tracing::debug!(remote = %self.remote, from = %self.state, to = %state, "Negotiation state changed");
        self.state = state;
        self.state_tx.send_replace(state);
        self.emit(MeshEvent::NegotiationStateChanged {
            connection_id: self.remote.clone(),
            state,
        });
    }

    fn signal(&self, message: ClientMessage) -> Result<()> {
        self.context.signals.send(message).map_err(|_| Error::NotConnected)
    }

    fn emit(&self, event: MeshEvent) {
        // Nobody listening is fine.
        let _ = self.context.events.send(event);
    }
}

// ============================================================================
// SESSION TASK
// ============================================================================

/// Inputs accepted by a running session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    Initiate,
    ApplyOffer(Value),
    ApplyAnswer(Value),
    ApplyCandidate(Value),
    Close,
}

impl SessionCommand {
    fn name(&self) -> &'static str {
        match self {
            SessionCommand::Initiate => "initiate",
            SessionCommand::ApplyOffer(_) => "offer",
            SessionCommand::ApplyAnswer(_) => "answer",
            SessionCommand::ApplyCandidate(_) => "candidate",
            SessionCommand::Close => "close",
        }
    }
}

/// How long [`SessionHandle::close`] waits for the transport to shut down.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Owner's end of a running session.
pub struct SessionHandle {
    remote: ConnectionId,
    display_name: Option<String>,
    commands: mpsc::UnboundedSender<SessionCommand>,
    cancel: Option<oneshot::Sender<()>>,
    state: watch::Receiver<NegotiationState>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub fn remote(&self) -> &ConnectionId {
        &self.remote
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    pub fn state(&self) -> NegotiationState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<NegotiationState> {
        self.state.clone()
    }

    pub fn send(&self, command: SessionCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| Error::SessionClosed(self.remote.to_string()))
    }

    /// Close the session and wait for its task to finish.
    ///
    /// A command still waiting on the transport is abandoned. If the task
    /// has not stopped within [`CLOSE_TIMEOUT`] it is aborted.
    pub async fn close(mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
        match tokio::time::timeout(CLOSE_TIMEOUT, &mut self.task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(remote = %self.remote, error = %e, "Session task failed");
            }
            Err(_) => {
                tracing::warn!(remote = %self.remote, "Session task did not stop, aborting");
                self.task.abort();
            }
        }
    }
}

/// Run a session on its own task.
pub fn spawn(session: PeerSession) -> SessionHandle {
    let (commands, inbox) = mpsc::unbounded_channel();
    let (cancel, cancelled) = oneshot::channel();
    let remote = session.remote.clone();
    let display_name = session.display_name().map(str::to_owned);
    let state = session.subscribe();
    let task = tokio::spawn(run(session, inbox, cancelled));

    SessionHandle {
        remote,
        display_name,
        commands,
        cancel: Some(cancel),
        state,
        task,
    }
}

/// Fires when the handle is closed or dropped.
type Cancelled = oneshot::Receiver<()>;

async fn run(
    mut session: PeerSession,
    mut inbox: mpsc::UnboundedReceiver<SessionCommand>,
    mut cancelled: Cancelled,
) {
    let mut transport_events: Option<TransportEvents> = None;

    loop {
        tokio::select! {
            biased;

            _ = &mut cancelled => break,
            command = inbox.recv() => {
                let Some(command) = command else {
                    break;
                };
                let closing = command == SessionCommand::Close;
                let name = command.name();
                let outcome = tokio::select! {
                    biased;

                    _ = &mut cancelled => None,
                    result = session.handle_command(command) => Some(result),
                };
                match outcome {
                    None => {
                        tracing::debug!(
                            remote = %session.remote,
                            state = %session.state,
                            command = name,
                            "Abandoned negotiation step on close"
                        );
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(
                            remote = %session.remote,
                            state = %session.state,
                            command = name,
                            error = %e,
                            "Discarded negotiation message"
                        );
                    }
                    Some(Ok(())) => {}
                }
                if closing {
                    break;
                }
            }
            event = next_transport_event(&mut transport_events) => match event {
                Some(event) => {
                    if let Err(e) = session.on_transport_event(event).await {
                        tracing::warn!(remote = %session.remote, error = %e, "Failed to handle transport event");
                    }
                }
                None => transport_events = None,
            }
        }

        if transport_events.is_none() {
            transport_events = session.take_transport_events();
        }
    }

    session.close().await;
    tracing::debug!(remote = %session.remote, "Session task finished");
}

async fn next_transport_event(events: &mut Option<TransportEvents>) -> Option<TransportEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

// ============================================================================
// TESTS
// ============================================================================
