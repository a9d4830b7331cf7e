//! Server-side call lifecycle.
//!
//! The [`Coordinator`] owns the live-call registry and applies every
//! client-originated event to it. Each call is finalized exactly once: only
//! the path that removes the call from the registry writes the terminal
//! record and notifies the participants.

use super::error::CoordinatorError;
use super::history::CallHistory;
use super::push::PushNotifier;
use super::registry::{ActiveCall, CallRegistry};
use crate::config::CoordinatorConfig;
use crate::socket::hub::ConnectionHub;
use crate::store::{
    CallRecordStore, MemoryCallRecordStore, MemoryPendingCallStore, MemoryProfileDirectory,
    PendingCallStore, ProfileDirectory,
};
use chrono::Utc;
use log::{debug, info, warn};
use sigcore::protocol::{
    AnswerData, CallEndedData, CallRef, CandidateData, IncomingCallData, OfferData, ServerMessage,
};
use sigcore::types::{
    CallId, CallRecord, CallerProfile, EndReason, ProfileId, whole_seconds_between,
};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// External services the coordinator depends on.
#[derive(Clone)]
pub struct Collaborators {
    pub records: Arc<dyn CallRecordStore>,
    pub pending: Arc<dyn PendingCallStore>,
    pub profiles: Arc<dyn ProfileDirectory>,
    pub push: Arc<dyn PushNotifier>,
}

impl Collaborators {
    /// Process-local stores with the given push notifier.
    pub fn in_memory(config: &CoordinatorConfig, push: Arc<dyn PushNotifier>) -> Self {
        Self {
            records: Arc::new(MemoryCallRecordStore::new()),
            pending: Arc::new(MemoryPendingCallStore::new(config.pending_ttl)),
            profiles: Arc::new(MemoryProfileDirectory::new()),
            push,
        }
    }
}

pub struct Coordinator {
    pub(super) config: CoordinatorConfig,
    pub(super) registry: CallRegistry,
    pub(super) hub: Arc<ConnectionHub>,
    pub(super) records: Arc<dyn CallRecordStore>,
    pub(super) pending: Arc<dyn PendingCallStore>,
    pub(super) profiles: Arc<dyn ProfileDirectory>,
    pub(super) push: Arc<dyn PushNotifier>,
    history: CallHistory,
    me: Weak<Coordinator>,
}

impl Coordinator {
    pub fn new(
        config: CoordinatorConfig,
        registry: CallRegistry,
        hub: Arc<ConnectionHub>,
        collaborators: Collaborators,
    ) -> Arc<Self> {
        let history = CallHistory::new(
            Arc::clone(&collaborators.records),
            Arc::clone(&collaborators.profiles),
        );
        Arc::new_cyclic(|me| Self {
            config,
            registry,
            hub,
            history,
            records: collaborators.records,
            pending: collaborators.pending,
            profiles: collaborators.profiles,
            push: collaborators.push,
            me: me.clone(),
        })
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn hub(&self) -> &Arc<ConnectionHub> {
        &self.hub
    }

    pub fn registry(&self) -> &CallRegistry {
        &self.registry
    }

    /// Per-profile call history over the same record store.
    pub fn history(&self) -> &CallHistory {
        &self.history
    }

    /// Whether `profile` is a participant of a ringing or ongoing call.
    pub fn is_in_call(&self, profile: &ProfileId) -> bool {
        self.registry.is_busy(profile)
    }

    /// Start a call from `caller`.
    ///
    /// A busy caller or callee gets a busy `call:ended` and no record is
    /// written. Otherwise the call is recorded, the caller receives
    /// `call:ringing`, the ring timer is armed, and the offer is delivered
    /// (or parked for an offline callee).
    pub async fn offer(
        &self,
        caller: &ProfileId,
        offer: OfferData,
    ) -> Result<CallId, CoordinatorError> {
        let call_id = CallId::generate();
        let callee = offer.callee_id.clone();

        if let Err(e) = self.registry.claim(&call_id, caller, &callee) {
            info!(target: "Calls/Coordinator", "Offer from {caller} to {callee} refused: {e}");
            self.hub.send_to_profile(caller, ServerMessage::busy());
            return Err(e);
        }

        let record = CallRecord::new_ringing(
            call_id.clone(),
            offer.thread_id.clone(),
            caller.clone(),
            callee.clone(),
            offer.kind,
        );
        let incoming = IncomingCallData {
            call_id: call_id.clone(),
            thread_id: offer.thread_id,
            caller: self.caller_profile(caller).await,
            kind: offer.kind,
            sdp: offer.sdp,
        };
        if let Err(e) = self.records.create_call(&record).await {
            warn!(target: "Calls/Coordinator", "Failed to record call {call_id}: {e}");
            self.registry.remove(&call_id);
            self.hub.send_to_profile(
                caller,
                ServerMessage::error("call_failed", "the call could not be started"),
            );
            return Err(e.into());
        }

        // A disconnect during the awaits above already finalized the call,
        // before the record existed.
        if !self.registry.contains(&call_id) {
            self.records
                .finalize(&call_id, EndReason::Ended, Utc::now(), None)
                .await?;
            info!(target: "Calls/Coordinator", "Call {call_id} ended before its offer went out");
            return Err(CoordinatorError::NotFound(call_id));
        }

        self.hub.send_to_profile(
            caller,
            ServerMessage::Ringing(CallRef {
                call_id: call_id.clone(),
            }),
        );
        self.arm_ring_timer(&call_id, self.config.ring_timeout);

        if self
            .hub
            .send_to_profile(&callee, ServerMessage::Incoming(incoming.clone()))
        {
            debug!(target: "Calls/Coordinator", "Delivered offer {call_id} to {callee}");
        } else {
            self.park_offer(&callee, incoming, record.created_at).await;
        }

        info!(target: "Calls/Coordinator", "Call {call_id} ringing ({caller} -> {callee}, {})", offer.kind);
        Ok(call_id)
    }

    /// Accept a ringing call as its callee.
    pub async fn answer(
        &self,
        callee: &ProfileId,
        answer: AnswerData,
    ) -> Result<(), CoordinatorError> {
        let call_id = answer.call_id.clone();
        let (caller, started_at) = self.registry.answer(&call_id, callee)?;

        self.clear_pending(callee, &call_id).await;
        match self.records.mark_answered(&call_id, started_at).await {
            Ok(true) => {}
            Ok(false) => warn!(target: "Calls/Coordinator", "Record for {call_id} was not ringing"),
            Err(e) => warn!(target: "Calls/Coordinator", "Failed to mark {call_id} answered: {e}"),
        }

        self.hub
            .send_to_profile(&caller, ServerMessage::Answered(answer));
        info!(target: "Calls/Coordinator", "Call {call_id} answered by {callee}");
        Ok(())
    }

    /// Decline a call. Returns whether this request ended it.
    pub async fn reject(
        &self,
        from: &ProfileId,
        call_id: &CallId,
    ) -> Result<bool, CoordinatorError> {
        self.end_as_participant(from, call_id, EndReason::Rejected)
            .await
    }

    /// Hang up a call. Returns whether this request ended it.
    pub async fn end(&self, from: &ProfileId, call_id: &CallId) -> Result<bool, CoordinatorError> {
        self.end_as_participant(from, call_id, EndReason::Ended)
            .await
    }

    async fn end_as_participant(
        &self,
        from: &ProfileId,
        call_id: &CallId,
        reason: EndReason,
    ) -> Result<bool, CoordinatorError> {
        let (caller, callee) = self
            .registry
            .participants(call_id)
            .ok_or_else(|| CoordinatorError::NotFound(call_id.clone()))?;
        if from != &caller && from != &callee {
            return Err(CoordinatorError::NotParticipant {
                call_id: call_id.clone(),
                profile: from.clone(),
            });
        }
        Ok(self.terminate(call_id, reason).await)
    }

    /// Relay a path candidate to the other participant, unmodified.
    pub async fn ice_candidate(
        &self,
        from: &ProfileId,
        candidate: CandidateData,
    ) -> Result<(), CoordinatorError> {
        let call_id = &candidate.call_id;
        let peer = match self.registry.participants(call_id) {
            Some((caller, callee)) if from == &caller => callee,
            Some((caller, callee)) if from == &callee => caller,
            Some(_) => {
                return Err(CoordinatorError::NotParticipant {
                    call_id: call_id.clone(),
                    profile: from.clone(),
                });
            }
            None => self.peer_from_record(from, call_id).await?,
        };
        if !self
            .hub
            .send_to_profile(&peer, ServerMessage::IceCandidate(candidate))
        {
            debug!(target: "Calls/Coordinator", "Dropped candidate for offline {peer}");
        }
        Ok(())
    }

    async fn peer_from_record(
        &self,
        from: &ProfileId,
        call_id: &CallId,
    ) -> Result<ProfileId, CoordinatorError> {
        let record = self
            .records
            .get_call(call_id)
            .await?
            .filter(|r| !r.status.is_terminal())
            .ok_or_else(|| CoordinatorError::NotFound(call_id.clone()))?;
        if !record.involves(from) {
            return Err(CoordinatorError::NotParticipant {
                call_id: call_id.clone(),
                profile: from.clone(),
            });
        }
        Ok(record.peer_of(from).clone())
    }

    /// A participant's transport went away: end whatever call it was in.
    pub async fn disconnect(&self, profile: &ProfileId) -> bool {
        let Some(call_id) = self.registry.call_for(profile) else {
            return false;
        };
        info!(target: "Calls/Coordinator", "{profile} disconnected during call {call_id}");
        self.terminate(&call_id, EndReason::Ended).await
    }

    /// End a live call for `reason`. Returns `false` if another path already
    /// finalized it.
    pub async fn terminate(&self, call_id: &CallId, reason: EndReason) -> bool {
        let Some(call) = self.registry.remove(call_id) else {
            debug!(target: "Calls/Coordinator", "Call {call_id} already finalized");
            return false;
        };
        self.finalize(call_id, call, reason).await;
        true
    }

    async fn expire(&self, call_id: &CallId) {
        if let Some(call) = self.registry.remove_if_ringing(call_id) {
            info!(target: "Calls/Coordinator", "Call {call_id} was not answered in time");
            self.finalize(call_id, call, EndReason::Missed).await;
        }
    }

    async fn finalize(&self, call_id: &CallId, call: ActiveCall, reason: EndReason) {
        let duration = self.record_end(call_id, &call, reason).await;
        let ended = ServerMessage::Ended(CallEndedData {
            call_id: call_id.clone(),
            reason,
            duration,
        });
        self.hub.send_to_profile(&call.caller, ended.clone());
        self.hub.send_to_profile(&call.callee, ended);
        info!(target: "Calls/Coordinator", "Call {call_id} {reason} (duration: {duration:?})");
    }

    /// Write the terminal record of a call already removed from the registry,
    /// without notifying anyone. Returns the billed duration.
    pub(super) async fn record_end(
        &self,
        call_id: &CallId,
        call: &ActiveCall,
        reason: EndReason,
    ) -> Option<u64> {
        let ended_at = Utc::now();
        let duration = call
            .started_at
            .map(|started_at| whole_seconds_between(started_at, ended_at));

        self.clear_pending(&call.callee, call_id).await;
        if let Err(e) = self
            .records
            .finalize(call_id, reason, ended_at, duration)
            .await
        {
            warn!(target: "Calls/Coordinator", "Failed to finalize record {call_id}: {e}");
        }
        duration
    }

    /// Schedule a missed-call timeout for a ringing call.
    pub(super) fn arm_ring_timer(&self, call_id: &CallId, after: Duration) {
        let me = self.me.clone();
        let timer_call_id = call_id.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(coordinator) = me.upgrade() {
                coordinator.expire(&timer_call_id).await;
            }
        });
        if !self.registry.arm_timer(call_id, task.abort_handle()) {
            debug!(target: "Calls/Coordinator", "Call {call_id} left ringing before its timer was armed");
        }
    }

    pub(super) async fn caller_profile(&self, caller: &ProfileId) -> CallerProfile {
        match self.profiles.caller_profile(caller).await {
            Ok(Some(profile)) => profile,
            Ok(None) => CallerProfile::bare(caller.clone()),
            Err(e) => {
                warn!(target: "Calls/Coordinator", "Profile lookup for {caller} failed: {e}");
                CallerProfile::bare(caller.clone())
            }
        }
    }
}
