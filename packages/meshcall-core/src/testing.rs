//! Fakes for the media capabilities, shared by unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};

use crate::error::{Error, Result};
use crate::manager::MeshEvent;
use crate::media::{MediaSource, MediaTrack, TrackKind};
use crate::protocol::{ClientMessage, ConnectionId, IceCandidate, SdpType, SessionDescription};
use crate::session::{NegotiationState, SessionContext};
use crate::transport::{BoundTransport, MediaTransport, TransportEvent, TransportFactory};

const WAIT: Duration = Duration::from_secs(2);

pub fn offer_payload() -> Value {
    json!({"type": "offer", "sdp": "v=0 remote-offer"})
}

pub fn answer_payload() -> Value {
    json!({"type": "answer", "sdp": "v=0 remote-answer"})
}

pub fn candidate_payload(candidate: &str) -> Value {
    json!({"candidate": candidate, "sdpMid": "0", "sdpMLineIndex": 0})
}

// ============================================================================
// MEDIA SOURCE
// ============================================================================

pub struct FakeMediaSource {
    tracks: Mutex<Vec<MediaTrack>>,
    stops: AtomicUsize,
}

impl FakeMediaSource {
    pub fn camera_and_mic() -> Arc<Self> {
        Self::with_kinds(&[TrackKind::Audio, TrackKind::Video])
    }

    pub fn audio_only() -> Arc<Self> {
        Self::with_kinds(&[TrackKind::Audio])
    }

    fn with_kinds(kinds: &[TrackKind]) -> Arc<Self> {
        let tracks = kinds
            .iter()
            .enumerate()
            .map(|(i, kind)| MediaTrack {
                id: format!("local-{}", i),
                kind: *kind,
                enabled: true,
            })
            .collect();
        Arc::new(Self {
            tracks: Mutex::new(tracks),
            stops: AtomicUsize::new(0),
        })
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn is_enabled(&self, kind: TrackKind) -> bool {
        self.tracks.lock().iter().any(|t| t.kind == kind && t.enabled)
    }
}

impl MediaSource for FakeMediaSource {
    fn tracks(&self) -> Vec<MediaTrack> {
        self.tracks.lock().clone()
    }

    fn set_enabled(&self, kind: TrackKind, enabled: bool) {
        for track in self.tracks.lock().iter_mut().filter(|t| t.kind == kind) {
            track.enabled = enabled;
        }
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// TRANSPORT
// ============================================================================

/// A call made on a fake transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    CreateOffer,
    CreateAnswer,
    ApplyRemote(SdpType),
    AddCandidate(String),
    Close,
}

type CallLog = Arc<Mutex<Vec<TransportCall>>>;

pub struct FakeTransport {
    remote: ConnectionId,
    calls: CallLog,
    stall: bool,
}

impl FakeTransport {
    /// Record `call`, then never return if this transport was built stalled.
    async fn record(&self, call: TransportCall) {
        self.calls.lock().push(call);
        if self.stall {
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl MediaTransport for FakeTransport {
    async fn create_offer(&mut self) -> Result<SessionDescription> {
        self.record(TransportCall::CreateOffer).await;
        Ok(SessionDescription::offer(format!("v=0 offer-to-{}", self.remote)))
    }

    async fn create_answer(&mut self) -> Result<SessionDescription> {
        self.record(TransportCall::CreateAnswer).await;
        Ok(SessionDescription::answer(format!("v=0 answer-to-{}", self.remote)))
    }

    async fn apply_remote_description(&mut self, description: SessionDescription) -> Result<()> {
        self.record(TransportCall::ApplyRemote(description.sdp_type)).await;
        Ok(())
    }

    async fn add_candidate(&mut self, candidate: IceCandidate) -> Result<()> {
        self.calls.lock().push(TransportCall::AddCandidate(candidate.candidate));
        Ok(())
    }

    async fn close(&mut self) {
        self.calls.lock().push(TransportCall::Close);
    }
}

struct Created {
    remote: ConnectionId,
    calls: CallLog,
    events: mpsc::UnboundedSender<TransportEvent>,
}

#[derive(Default)]
pub struct FakeFactory {
    created: Mutex<Vec<Created>>,
    fail_next: AtomicBool,
    stall: AtomicBool,
}

impl FakeFactory {
    pub fn fail_next_create(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Transports created from now on never finish creating or applying a
    /// description.
    pub fn stall_negotiation(&self) {
        self.stall.store(true, Ordering::SeqCst);
    }

    /// Remote ids transports were created for, in creation order.
    pub fn created(&self) -> Vec<ConnectionId> {
        self.created.lock().iter().map(|c| c.remote.clone()).collect()
    }

    /// Calls made on the most recent transport for `remote`.
    pub fn calls(&self, remote: &str) -> Vec<TransportCall> {
        self.created
            .lock()
            .iter()
            .rev()
            .find(|c| c.remote.as_str() == remote)
            .map(|c| c.calls.lock().clone())
            .unwrap_or_default()
    }

    /// Push an event out of the transport for `remote`.
    pub fn emit(&self, remote: &str, event: TransportEvent) {
        let created = self.created.lock();
        let target = created
            .iter()
            .rev()
            .find(|c| c.remote.as_str() == remote)
            .expect("no transport for remote");
        target.events.send(event).expect("session dropped its event stream");
    }
}

impl TransportFactory for FakeFactory {
    fn create(&self, remote: &ConnectionId, _local_media: Arc<dyn MediaSource>) -> Result<BoundTransport> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(Error::TransportFailed("fake factory refused".into()));
        }
        let calls = CallLog::default();
        let (events_tx, events) = mpsc::unbounded_channel();
        self.created.lock().push(Created {
            remote: remote.clone(),
            calls: Arc::clone(&calls),
            events: events_tx,
        });
        Ok(BoundTransport {
            handle: Box::new(FakeTransport {
                remote: remote.clone(),
                calls,
                stall: self.stall.load(Ordering::SeqCst),
            }),
            events,
        })
    }
}

// ============================================================================
// HARNESS
// ============================================================================

/// Fakes wired to the channels a session or manager writes to.
pub struct Harness {
    pub factory: Arc<FakeFactory>,
    pub media: Arc<FakeMediaSource>,
    pub signals: mpsc::UnboundedReceiver<ClientMessage>,
    pub events: mpsc::UnboundedReceiver<MeshEvent>,
    signals_tx: mpsc::UnboundedSender<ClientMessage>,
    events_tx: mpsc::UnboundedSender<MeshEvent>,
}

impl Harness {
    pub fn new() -> Self {
        let (signals_tx, signals) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();
        Self {
            factory: Arc::new(FakeFactory::default()),
            media: FakeMediaSource::camera_and_mic(),
            signals,
            events,
            signals_tx,
            events_tx,
        }
    }

    pub fn context(&self) -> SessionContext {
        SessionContext {
            factory: self.factory.clone(),
            local_media: self.media.clone(),
            signals: self.signals_tx.clone(),
            events: self.events_tx.clone(),
        }
    }

    pub fn signal_sender(&self) -> mpsc::UnboundedSender<ClientMessage> {
        self.signals_tx.clone()
    }

    pub fn event_sender(&self) -> mpsc::UnboundedSender<MeshEvent> {
        self.events_tx.clone()
    }

    pub fn drain_events(&mut self) -> Vec<MeshEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    pub fn drain_signals(&mut self) -> Vec<ClientMessage> {
        let mut signals = Vec::new();
        while let Ok(signal) = self.signals.try_recv() {
            signals.push(signal);
        }
        signals
    }

    pub async fn next_signal(&mut self) -> ClientMessage {
        tokio::time::timeout(WAIT, self.signals.recv())
            .await
            .expect("timed out waiting for a signal")
            .expect("signal channel closed")
    }

    /// Wait for an event matching `pred`, skipping others.
    pub async fn wait_for_event(&mut self, pred: impl Fn(&MeshEvent) -> bool) -> MeshEvent {
        tokio::time::timeout(WAIT, async {
            loop {
                let event = self.events.recv().await.expect("event channel closed");
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for an event")
    }

    pub async fn wait_for_call(&self, remote: &str, call: TransportCall) {
        tokio::time::timeout(WAIT, async {
            while !self.factory.calls(remote).contains(&call) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for a transport call");
    }

    pub async fn wait_for_state(&self, state: &mut watch::Receiver<NegotiationState>, expected: NegotiationState) {
        tokio::time::timeout(WAIT, state.wait_for(|s| *s == expected))
            .await
            .expect("timed out waiting for negotiation state")
            .expect("session dropped its state channel");
    }
}
