//! Client call state store.
//!
//! [`CallStore`] owns the single active call of one user: its phase, its
//! [`CallSession`], and the duration ticker. It is driven serially by the
//! [`CallClient`](super::runner::CallClient) actor; every change is published
//! as a [`CallSnapshot`] on a watch channel.

use super::error::ClientError;
use super::runner::ClientInput;
use super::signaling::SignalingSender;
use log::{debug, info, warn};
use sigcore::client::{
    CallErrorInfo, CallPhase, CallSession, CallSnapshot, ConnectionState, MediaDevices,
    NegotiationEvent, NegotiationEventSink, PeerConnectionFactory, PhaseTransition,
    SessionDescription,
};
use sigcore::protocol::{
    AnswerData, CallEndedData, CallRef, CandidateData, ClientMessage, ErrorData,
    IncomingCallData, OfferData, ServerMessage,
};
use sigcore::types::{CallId, CallKind, CallerProfile};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

const DURATION_TICK: Duration = Duration::from_secs(1);

/// Forwards negotiation events into the actor queue, tagged with the call
/// generation they belong to.
struct ChannelEventSink {
    generation: u64,
    inputs: mpsc::UnboundedSender<ClientInput>,
}

impl NegotiationEventSink for ChannelEventSink {
    fn emit(&self, event: NegotiationEvent) {
        let _ = self.inputs.send(ClientInput::Negotiation {
            generation: self.generation,
            event,
        });
    }
}

pub struct CallStore {
    snapshot: CallSnapshot,
    updates: watch::Sender<CallSnapshot>,
    session: Option<CallSession>,
    remote_offer: Option<String>,
    /// Bumped for every new session; events and ticks from older sessions are dropped.
    generation: u64,
    connected_at: Option<Instant>,
    ticker: Option<JoinHandle<()>>,
    /// Set when the user hung up before the server assigned a call id.
    abandoned_offer: bool,
    signaling: Arc<dyn SignalingSender>,
    media: Arc<dyn MediaDevices>,
    peers: Arc<dyn PeerConnectionFactory>,
    inputs: mpsc::UnboundedSender<ClientInput>,
}

impl CallStore {
    pub fn new(
        signaling: Arc<dyn SignalingSender>,
        media: Arc<dyn MediaDevices>,
        peers: Arc<dyn PeerConnectionFactory>,
        inputs: mpsc::UnboundedSender<ClientInput>,
    ) -> (Self, watch::Receiver<CallSnapshot>) {
        let (updates, snapshots) = watch::channel(CallSnapshot::default());
        let store = Self {
            snapshot: CallSnapshot::default(),
            updates,
            session: None,
            remote_offer: None,
            generation: 0,
            connected_at: None,
            ticker: None,
            abandoned_offer: false,
            signaling,
            media,
            peers,
            inputs,
        };
        (store, snapshots)
    }

    pub fn snapshot(&self) -> &CallSnapshot {
        &self.snapshot
    }

    pub fn phase(&self) -> CallPhase {
        self.snapshot.phase
    }

    pub fn is_in_call(&self) -> bool {
        !self.snapshot.phase.is_idle()
    }

    pub fn session(&self) -> Option<&CallSession> {
        self.session.as_ref()
    }

    fn publish(&self) {
        self.updates.send_replace(self.snapshot.clone());
    }

    fn transition(&mut self, transition: PhaseTransition) -> Result<(), ClientError> {
        self.snapshot.phase = self.snapshot.phase.apply(transition)?;
        Ok(())
    }

    fn send(&self, message: ClientMessage) -> bool {
        let op = message.op();
        let sent = self.signaling.send(message);
        if !sent {
            warn!(target: "Client/CallStore", "Signaling closed, dropped {op}");
        }
        sent
    }

    fn new_session(&mut self) -> CallSession {
        self.generation += 1;
        let events = Arc::new(ChannelEventSink {
            generation: self.generation,
            inputs: self.inputs.clone(),
        });
        CallSession::new(Arc::clone(&self.peers), events)
    }

    fn set_error(&mut self, code: &str, message: impl Into<String>) {
        self.snapshot.error = Some(CallErrorInfo {
            code: code.to_string(),
            message: message.into(),
        });
    }

    /// Record `error` in the error slot and drop the call locally.
    fn fail(&mut self, error: ClientError) -> ClientError {
        warn!(target: "Client/CallStore", "Call failed: {error}");
        self.set_error(error.code(), error.to_string());
        self.teardown();
        error
    }

    /// Release everything the current call holds and return to idle.
    fn teardown(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.terminate();
        }
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        self.remote_offer = None;
        self.connected_at = None;
        self.snapshot = self.snapshot.cleared();
        self.publish();
    }

    fn begin(&mut self, kind: CallKind, thread_id: String, remote: CallerProfile) {
        self.snapshot.kind = Some(kind);
        self.snapshot.thread_id = Some(thread_id);
        self.snapshot.remote_profile = Some(remote);
        self.snapshot.is_muted = false;
        self.snapshot.is_video_off = !kind.is_video();
        self.snapshot.error = None;
        self.snapshot.last_end_reason = None;
    }

    /// Place a call to `callee`.
    pub async fn start_call(
        &mut self,
        thread_id: String,
        callee: CallerProfile,
        kind: CallKind,
    ) -> Result<(), ClientError> {
        if self.is_in_call() {
            return Err(ClientError::Busy);
        }
        self.abandoned_offer = false;
        self.transition(PhaseTransition::StartOutgoing)?;
        let callee_id = callee.id.clone();
        self.begin(kind, thread_id.clone(), callee);
        self.publish();

        let media = match self.media.acquire(kind).await {
            Ok(media) => media,
            Err(e) => return Err(self.fail(e.into())),
        };

        let mut session = self.new_session();
        let offer = match session.initiate(kind, media).await {
            Ok(offer) => offer,
            Err(e) => return Err(self.fail(e.into())),
        };
        let sdp = match offer.to_wire() {
            Ok(sdp) => sdp,
            Err(e) => return Err(self.fail(e.into())),
        };
        self.session = Some(session);

        if !self.send(ClientMessage::Offer(OfferData {
            thread_id,
            callee_id,
            kind,
            sdp,
        })) {
            return Err(self.fail(ClientError::SignalingClosed));
        }
        info!(target: "Client/CallStore", "Placed {kind} call");
        Ok(())
    }

    /// Accept the ringing incoming call.
    pub async fn accept_call(&mut self) -> Result<(), ClientError> {
        if self.snapshot.phase != CallPhase::Incoming {
            return Err(ClientError::NoIncomingCall);
        }
        let (Some(call_id), Some(kind), Some(offer)) = (
            self.snapshot.call_id.clone(),
            self.snapshot.kind,
            self.remote_offer.take(),
        ) else {
            return Err(ClientError::NoIncomingCall);
        };
        self.transition(PhaseTransition::LocalAccepted)?;
        self.publish();

        match self.answer_offer(call_id.clone(), kind, &offer).await {
            Ok(sdp) => {
                if !self.send(ClientMessage::Answer(AnswerData { call_id, sdp })) {
                    return Err(self.fail(ClientError::SignalingClosed));
                }
                Ok(())
            }
            Err(e) => {
                self.send(ClientMessage::Reject(CallRef { call_id }));
                Err(self.fail(e))
            }
        }
    }

    async fn answer_offer(
        &mut self,
        call_id: CallId,
        kind: CallKind,
        offer: &str,
    ) -> Result<String, ClientError> {
        let remote = SessionDescription::from_wire(offer)?;
        let media = self.media.acquire(kind).await?;
        let session = self.session.as_mut().ok_or(ClientError::NoIncomingCall)?;
        let answer = session.accept(call_id, kind, media, &remote).await?;
        Ok(answer.to_wire()?)
    }

    /// Decline the incoming call, or cancel any call in progress.
    pub fn reject_call(&mut self) {
        if let Some(call_id) = self.snapshot.call_id.clone() {
            self.send(ClientMessage::Reject(CallRef { call_id }));
        }
        if self.is_in_call() {
            self.teardown();
        }
    }

    /// Hang up the current call.
    pub fn end_call(&mut self) {
        if !self.is_in_call() {
            return;
        }
        match self.snapshot.call_id.clone() {
            Some(call_id) => {
                self.send(ClientMessage::End(CallRef { call_id }));
            }
            None => self.abandoned_offer = true,
        }
        self.teardown();
    }

    pub fn toggle_mute(&mut self) {
        if !self.is_in_call() {
            return;
        }
        self.snapshot.is_muted = !self.snapshot.is_muted;
        if let Some(session) = &self.session {
            session.set_audio_enabled(!self.snapshot.is_muted);
        }
        self.publish();
    }

    pub fn toggle_video(&mut self) {
        if !self.is_in_call() {
            return;
        }
        self.snapshot.is_video_off = !self.snapshot.is_video_off;
        if let Some(session) = &self.session {
            session.set_video_enabled(!self.snapshot.is_video_off);
        }
        self.publish();
    }

    /// Drop the current call, if any, and clear the error slot.
    pub fn reset(&mut self) {
        self.abandoned_offer = false;
        self.snapshot.error = None;
        self.snapshot.last_end_reason = None;
        self.teardown();
    }

    pub fn clear_error(&mut self) {
        if self.snapshot.error.take().is_some() {
            self.publish();
        }
    }

    /// The signaling connection dropped; the server ends the call on its side.
    pub fn handle_transport_disconnected(&mut self) {
        if self.is_in_call() {
            warn!(target: "Client/CallStore", "Signaling lost during call {:?}", self.snapshot.call_id);
            self.set_error("signaling_closed", "connection to the server was lost");
            self.teardown();
        }
        self.abandoned_offer = false;
    }

    pub async fn handle_server_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::Ringing(CallRef { call_id }) => self.handle_ringing(call_id),
            ServerMessage::Incoming(incoming) => self.handle_incoming(incoming),
            ServerMessage::Answered(answer) => self.handle_answered(answer).await,
            ServerMessage::Ended(ended) => self.handle_ended(ended),
            ServerMessage::IceCandidate(candidate) => self.handle_remote_candidate(candidate).await,
            ServerMessage::Error(error) => self.handle_error(error),
        }
    }

    pub fn handle_ringing(&mut self, call_id: CallId) {
        if self.snapshot.phase != CallPhase::Outgoing || self.snapshot.call_id.is_some() {
            if self.abandoned_offer && !self.is_in_call() {
                debug!(target: "Client/CallStore", "Ending abandoned call {call_id}");
                self.abandoned_offer = false;
                self.send(ClientMessage::End(CallRef { call_id }));
            } else {
                debug!(target: "Client/CallStore", "Ignoring ringing for {call_id}");
            }
            return;
        }

        let flushed = match self.session.as_mut() {
            Some(session) => session.set_call_id(call_id.clone()),
            None => Vec::new(),
        };
        self.snapshot.call_id = Some(call_id.clone());
        self.publish();

        for candidate in flushed {
            self.send(ClientMessage::IceCandidate(CandidateData {
                call_id: call_id.clone(),
                candidate,
            }));
        }
    }

    pub fn handle_incoming(&mut self, incoming: IncomingCallData) {
        if self.is_in_call() {
            info!(
                target: "Client/CallStore",
                "Declining call {} while another call is active", incoming.call_id
            );
            self.send(ClientMessage::Reject(CallRef {
                call_id: incoming.call_id,
            }));
            return;
        }
        if self.transition(PhaseTransition::OfferReceived).is_err() {
            return;
        }
        self.abandoned_offer = false;
        self.begin(incoming.kind, incoming.thread_id, incoming.caller);
        self.snapshot.call_id = Some(incoming.call_id);
        self.remote_offer = Some(incoming.sdp);
        let session = self.new_session();
        self.session = Some(session);
        self.publish();
    }

    pub async fn handle_answered(&mut self, answer: AnswerData) {
        if self.snapshot.phase != CallPhase::Outgoing
            || self.snapshot.call_id.as_ref() != Some(&answer.call_id)
        {
            debug!(target: "Client/CallStore", "Ignoring answer for {}", answer.call_id);
            return;
        }
        if self.transition(PhaseTransition::RemoteAnswered).is_err() {
            return;
        }
        self.publish();

        let applied = match (SessionDescription::from_wire(&answer.sdp), self.session.as_mut()) {
            (Ok(remote), Some(session)) => session.apply_remote_description(&remote).await,
            (Err(e), _) => Err(e),
            (Ok(_), None) => Err(sigcore::client::NegotiationError::NoContext),
        };
        if let Err(e) = applied {
            warn!(target: "Client/CallStore", "Failed to apply answer: {e}");
            let error = ClientError::from(e);
            self.set_error(error.code(), error.to_string());
            self.end_call();
        }
    }

    pub fn handle_ended(&mut self, ended: CallEndedData) {
        let ours = match &self.snapshot.call_id {
            Some(call_id) => call_id == &ended.call_id,
            // An outgoing call refused before it got an id.
            None => self.snapshot.phase == CallPhase::Outgoing,
        };
        if !ours {
            if ended.call_id.is_empty() && !self.is_in_call() {
                self.abandoned_offer = false;
            }
            debug!(target: "Client/CallStore", "Ignoring end of {:?}", ended.call_id);
            return;
        }
        info!(
            target: "Client/CallStore",
            "Call {} ended: {} (duration: {:?})", ended.call_id, ended.reason, ended.duration
        );
        self.snapshot.last_end_reason = Some(ended.reason);
        self.teardown();
    }

    pub async fn handle_remote_candidate(&mut self, candidate: CandidateData) {
        if self.snapshot.call_id.as_ref() != Some(&candidate.call_id) {
            debug!(target: "Client/CallStore", "Ignoring candidate for {}", candidate.call_id);
            return;
        }
        if let Some(session) = self.session.as_mut() {
            if let Err(e) = session.add_remote_candidate(candidate.candidate).await {
                warn!(target: "Client/CallStore", "Failed to apply remote candidate: {e}");
            }
        }
    }

    pub fn handle_error(&mut self, error: ErrorData) {
        warn!(target: "Client/CallStore", "Server error {}: {}", error.code, error.message);
        let refused_offer =
            self.snapshot.phase == CallPhase::Outgoing && self.snapshot.call_id.is_none();
        self.set_error(&error.code, error.message);
        if refused_offer {
            self.teardown();
        } else {
            self.publish();
        }
    }

    pub fn handle_negotiation_event(&mut self, generation: u64, event: NegotiationEvent) {
        if generation != self.generation || self.session.is_none() {
            debug!(target: "Client/CallStore", "Dropping event from a finished session: {event:?}");
            return;
        }
        match event {
            NegotiationEvent::LocalCandidate(candidate) => {
                let ready = self
                    .session
                    .as_mut()
                    .and_then(|session| session.on_local_candidate(candidate));
                if let Some((call_id, candidate)) = ready {
                    self.send(ClientMessage::IceCandidate(CandidateData { call_id, candidate }));
                }
            }
            NegotiationEvent::RemoteTrack(kind) => {
                debug!(target: "Client/CallStore", "Remote {kind} track arrived");
                self.snapshot.has_remote_media = true;
                self.publish();
            }
            NegotiationEvent::ConnectionStateChanged(ConnectionState::Connected) => {
                if self.transition(PhaseTransition::MediaConnected).is_ok() {
                    self.start_ticker();
                    self.publish();
                }
            }
            NegotiationEvent::ConnectionStateChanged(state) if state.is_failure() => {
                info!(target: "Client/CallStore", "Media path {state:?}, ending call");
                self.end_call();
            }
            NegotiationEvent::ConnectionStateChanged(_) => {}
        }
    }

    fn start_ticker(&mut self) {
        if let Some(previous) = self.ticker.take() {
            previous.abort();
        }
        self.connected_at = Some(Instant::now());
        self.snapshot.duration_secs = 0;
        let generation = self.generation;
        let inputs = self.inputs.clone();
        self.ticker = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + DURATION_TICK, DURATION_TICK);
            loop {
                interval.tick().await;
                if inputs.send(ClientInput::Tick { generation }).is_err() {
                    break;
                }
            }
        }));
    }

    pub fn handle_tick(&mut self, generation: u64) {
        if generation != self.generation || self.snapshot.phase != CallPhase::Connected {
            return;
        }
        if let Some(connected_at) = self.connected_at {
            self.snapshot.duration_secs = connected_at.elapsed().as_secs();
            self.publish();
        }
    }
}

impl Drop for CallStore {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}
