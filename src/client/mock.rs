//! Test doubles for the media and negotiation backends.

use async_trait::async_trait;
use serde_json::json;
use sigcore::client::{
    LocalMedia, MediaDevices, MediaError, MediaTrack, NegotiationError, NegotiationEvent,
    NegotiationEventSink, PeerConnection, PeerConnectionFactory, SessionDescription, TrackKind,
};
use sigcore::protocol::{CandidatePayload, ClientMessage};
use sigcore::types::CallKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::signaling::SignalingSender;

#[derive(Default)]
pub(crate) struct RecordingSignaling {
    sent: Mutex<Vec<ClientMessage>>,
    closed: AtomicBool,
}

impl RecordingSignaling {
    pub fn sent(&self) -> Vec<ClientMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn take(&self) -> Vec<ClientMessage> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl SignalingSender for RecordingSignaling {
    fn send(&self, message: ClientMessage) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        self.sent.lock().unwrap().push(message);
        true
    }
}

pub(crate) struct MockTrack {
    id: String,
    kind: TrackKind,
    enabled: AtomicBool,
    stopped: AtomicBool,
}

impl MockTrack {
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl MediaTrack for MockTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub(crate) struct MockMedia {
    failure: Mutex<Option<MediaError>>,
    tracks: Mutex<Vec<Arc<MockTrack>>>,
}

impl MockMedia {
    pub fn fail_with(&self, error: MediaError) {
        *self.failure.lock().unwrap() = Some(error);
    }

    /// Every track handed out so far.
    pub fn tracks(&self) -> Vec<Arc<MockTrack>> {
        self.tracks.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaDevices for MockMedia {
    async fn acquire(&self, kind: CallKind) -> Result<LocalMedia, MediaError> {
        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }
        let mut kinds = vec![TrackKind::Audio];
        if kind.is_video() {
            kinds.push(TrackKind::Video);
        }
        let mut tracks = self.tracks.lock().unwrap();
        let acquired: Vec<Arc<dyn MediaTrack>> = kinds
            .into_iter()
            .map(|kind| {
                let track = Arc::new(MockTrack {
                    id: format!("{kind}-{}", tracks.len()),
                    kind,
                    enabled: AtomicBool::new(true),
                    stopped: AtomicBool::new(false),
                });
                tracks.push(track.clone());
                track as Arc<dyn MediaTrack>
            })
            .collect();
        Ok(LocalMedia::new(acquired))
    }
}

/// Peer that records calls and emits `candidates` local candidates as soon
/// as its local description is set.
pub(crate) struct MockPeer {
    log: Arc<Mutex<Vec<String>>>,
    events: Arc<dyn NegotiationEventSink>,
    candidates: usize,
}

#[async_trait]
impl PeerConnection for MockPeer {
    async fn add_track(&self, track: Arc<dyn MediaTrack>) -> Result<(), NegotiationError> {
        self.log.lock().unwrap().push(format!("track:{}", track.kind()));
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        Ok(SessionDescription::offer("offer-sdp"))
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        Ok(SessionDescription::answer("answer-sdp"))
    }

    async fn set_local_description(
        &self,
        description: &SessionDescription,
    ) -> Result<(), NegotiationError> {
        self.log
            .lock()
            .unwrap()
            .push(format!("local:{}", description.sdp));
        for n in 0..self.candidates {
            self.events
                .emit(NegotiationEvent::LocalCandidate(json!({ "n": n })));
        }
        Ok(())
    }

    async fn set_remote_description(
        &self,
        description: &SessionDescription,
    ) -> Result<(), NegotiationError> {
        self.log
            .lock()
            .unwrap()
            .push(format!("remote:{}", description.sdp));
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &CandidatePayload) -> Result<(), NegotiationError> {
        self.log
            .lock()
            .unwrap()
            .push(format!("candidate:{}", candidate["n"]));
        Ok(())
    }

    fn close(&self) {
        self.log.lock().unwrap().push("close".to_string());
    }
}

#[derive(Default)]
pub(crate) struct MockPeerFactory {
    log: Arc<Mutex<Vec<String>>>,
    candidates: usize,
    sinks: Mutex<Vec<Arc<dyn NegotiationEventSink>>>,
}

impl MockPeerFactory {
    pub fn with_local_candidates(candidates: usize) -> Self {
        Self {
            candidates,
            ..Self::default()
        }
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Event sink handed to the most recent peer.
    pub fn last_sink(&self) -> Arc<dyn NegotiationEventSink> {
        self.sinks.lock().unwrap().last().cloned().unwrap()
    }
}

impl PeerConnectionFactory for MockPeerFactory {
    fn create(
        &self,
        _kind: CallKind,
        events: Arc<dyn NegotiationEventSink>,
    ) -> Result<Arc<dyn PeerConnection>, NegotiationError> {
        self.sinks.lock().unwrap().push(events.clone());
        Ok(Arc::new(MockPeer {
            log: self.log.clone(),
            events,
            candidates: self.candidates,
        }))
    }
}
