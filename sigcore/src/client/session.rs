//! Per-call negotiation wrapper.
//!
//! A [`CallSession`] owns the negotiation context and local media of exactly one
//! call and is dropped when that call ends. It guarantees two orderings:
//!
//! - remote candidates are never applied before a remote description exists;
//!   early ones wait in a FIFO queue drained right after the description is set.
//! - local candidates are never emitted before the server-assigned call id is
//!   known; early ones wait in a FIFO queue flushed by [`CallSession::set_call_id`].

use super::media::{LocalMedia, TrackKind};
use super::peer::{
    NegotiationError, NegotiationEventSink, PeerConnection, PeerConnectionFactory,
    SessionDescription,
};
use crate::protocol::CandidatePayload;
use crate::types::{CallId, CallKind};
use log::{debug, warn};
use std::collections::VecDeque;
use std::sync::Arc;

pub struct CallSession {
    factory: Arc<dyn PeerConnectionFactory>,
    events: Arc<dyn NegotiationEventSink>,
    kind: Option<CallKind>,
    peer: Option<Arc<dyn PeerConnection>>,
    media: Option<LocalMedia>,
    call_id: Option<CallId>,
    remote_description_set: bool,
    pending_remote: VecDeque<CandidatePayload>,
    pending_local: VecDeque<CandidatePayload>,
    terminated: bool,
}

impl std::fmt::Debug for CallSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallSession")
            .field("kind", &self.kind)
            .field("call_id", &self.call_id)
            .field("started", &self.peer.is_some())
            .field("remote_description_set", &self.remote_description_set)
            .field("pending_remote", &self.pending_remote.len())
            .field("pending_local", &self.pending_local.len())
            .field("terminated", &self.terminated)
            .finish()
    }
}

impl CallSession {
    pub fn new(
        factory: Arc<dyn PeerConnectionFactory>,
        events: Arc<dyn NegotiationEventSink>,
    ) -> Self {
        Self {
            factory,
            events,
            kind: None,
            peer: None,
            media: None,
            call_id: None,
            remote_description_set: false,
            pending_remote: VecDeque::new(),
            pending_local: VecDeque::new(),
            terminated: false,
        }
    }

    pub fn call_id(&self) -> Option<&CallId> {
        self.call_id.as_ref()
    }

    pub fn is_started(&self) -> bool {
        self.peer.is_some()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn has_remote_description(&self) -> bool {
        self.remote_description_set
    }

    pub fn queued_remote_candidates(&self) -> usize {
        self.pending_remote.len()
    }

    pub fn queued_local_candidates(&self) -> usize {
        self.pending_local.len()
    }

    pub fn local_media(&self) -> Option<&LocalMedia> {
        self.media.as_ref()
    }

    /// Caller side: attach media and produce the local offer.
    ///
    /// On failure the half-built context is torn down before returning.
    pub async fn initiate(
        &mut self,
        kind: CallKind,
        media: LocalMedia,
    ) -> Result<SessionDescription, NegotiationError> {
        self.open(kind, media)?;
        match self.build_offer().await {
            Ok(offer) => Ok(offer),
            Err(e) => {
                self.terminate();
                Err(e)
            }
        }
    }

    async fn build_offer(&mut self) -> Result<SessionDescription, NegotiationError> {
        let peer = self.peer()?;
        self.attach_media(&peer).await?;
        let offer = peer.create_offer().await?;
        peer.set_local_description(&offer).await?;
        Ok(offer)
    }

    /// Callee side: attach media, apply the caller's offer, drain early
    /// candidates, and produce the local answer.
    pub async fn accept(
        &mut self,
        call_id: CallId,
        kind: CallKind,
        media: LocalMedia,
        remote: &SessionDescription,
    ) -> Result<SessionDescription, NegotiationError> {
        self.open(kind, media)?;
        // The callee learns the call id from the incoming offer itself.
        self.call_id = Some(call_id);
        match self.build_answer(remote).await {
            Ok(answer) => Ok(answer),
            Err(e) => {
                self.terminate();
                Err(e)
            }
        }
    }

    async fn build_answer(
        &mut self,
        remote: &SessionDescription,
    ) -> Result<SessionDescription, NegotiationError> {
        let peer = self.peer()?;
        self.attach_media(&peer).await?;
        self.apply_remote_description(remote).await?;
        let answer = peer.create_answer().await?;
        peer.set_local_description(&answer).await?;
        Ok(answer)
    }

    /// Apply the remote description, then drain queued remote candidates in receipt order.
    pub async fn apply_remote_description(
        &mut self,
        description: &SessionDescription,
    ) -> Result<(), NegotiationError> {
        let peer = self.peer()?;
        peer.set_remote_description(description).await?;
        self.remote_description_set = true;

        if !self.pending_remote.is_empty() {
            debug!(
                target: "Client/Session",
                "Applying {} queued remote candidates",
                self.pending_remote.len()
            );
        }
        while let Some(candidate) = self.pending_remote.pop_front() {
            if let Err(e) = peer.add_ice_candidate(&candidate).await {
                // One bad candidate must not block the ones behind it.
                warn!(target: "Client/Session", "Failed to apply queued candidate: {e}");
            }
        }
        Ok(())
    }

    /// Queue the candidate until a remote description exists, else apply it now.
    pub async fn add_remote_candidate(
        &mut self,
        candidate: CandidatePayload,
    ) -> Result<(), NegotiationError> {
        if self.terminated {
            return Ok(());
        }
        match (&self.peer, self.remote_description_set) {
            (Some(peer), true) => peer.add_ice_candidate(&candidate).await,
            _ => {
                self.pending_remote.push_back(candidate);
                debug!(
                    target: "Client/Session",
                    "Queued remote candidate, queue size: {}",
                    self.pending_remote.len()
                );
                Ok(())
            }
        }
    }

    /// Route a locally discovered candidate.
    ///
    /// Returns the call id and candidate when it can be sent now; otherwise the
    /// candidate is kept until [`CallSession::set_call_id`].
    pub fn on_local_candidate(
        &mut self,
        candidate: CandidatePayload,
    ) -> Option<(CallId, CandidatePayload)> {
        if self.terminated {
            return None;
        }
        match &self.call_id {
            Some(call_id) => Some((call_id.clone(), candidate)),
            None => {
                self.pending_local.push_back(candidate);
                debug!(
                    target: "Client/Session",
                    "Queued local candidate (no call id yet), queue size: {}",
                    self.pending_local.len()
                );
                None
            }
        }
    }

    /// Record the server-assigned call id and return queued local candidates in discovery order.
    pub fn set_call_id(&mut self, call_id: CallId) -> Vec<CandidatePayload> {
        self.call_id = Some(call_id);
        self.pending_local.drain(..).collect()
    }

    pub fn set_audio_enabled(&self, enabled: bool) {
        if let Some(media) = &self.media {
            media.set_kind_enabled(TrackKind::Audio, enabled);
        }
    }

    pub fn set_video_enabled(&self, enabled: bool) {
        if let Some(media) = &self.media {
            media.set_kind_enabled(TrackKind::Video, enabled);
        }
    }

    /// Stop local tracks, close the context and clear both queues. Idempotent.
    pub fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        if let Some(media) = self.media.take() {
            media.stop_all();
        }
        if let Some(peer) = self.peer.take() {
            peer.close();
        }
        self.pending_remote.clear();
        self.pending_local.clear();
        self.remote_description_set = false;
        debug!(target: "Client/Session", "Session terminated (call_id: {:?})", self.call_id);
    }

    fn open(&mut self, kind: CallKind, media: LocalMedia) -> Result<(), NegotiationError> {
        if self.terminated {
            media.stop_all();
            return Err(NegotiationError::NoContext);
        }
        if self.peer.is_some() {
            media.stop_all();
            return Err(NegotiationError::AlreadyStarted);
        }
        let peer = match self.factory.create(kind, self.events.clone()) {
            Ok(peer) => peer,
            Err(e) => {
                media.stop_all();
                return Err(e);
            }
        };
        self.kind = Some(kind);
        self.peer = Some(peer);
        self.media = Some(media);
        Ok(())
    }

    async fn attach_media(&self, peer: &Arc<dyn PeerConnection>) -> Result<(), NegotiationError> {
        if let Some(media) = &self.media {
            for track in media.tracks() {
                peer.add_track(track.clone()).await?;
            }
        }
        Ok(())
    }

    fn peer(&self) -> Result<Arc<dyn PeerConnection>, NegotiationError> {
        self.peer.clone().ok_or(NegotiationError::NoContext)
    }
}

impl Drop for CallSession {
    fn drop(&mut self) {
        self.terminate();
    }
}
