//! In-memory index of live calls.
//!
//! A profile appears in at most one live call. Admission claims both
//! participants in the participant index and rolls back on conflict, so two
//! racing offers touching the same profile can never both succeed.

use super::error::CoordinatorError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use log::debug;
use sigcore::types::{CallId, CallStatus, ProfileId};
use tokio::task::AbortHandle;

/// A call that is ringing or ongoing.
#[derive(Debug)]
pub struct ActiveCall {
    pub caller: ProfileId,
    pub callee: ProfileId,
    pub status: CallStatus,
    pub started_at: Option<DateTime<Utc>>,
    ring_timer: Option<AbortHandle>,
}

impl ActiveCall {
    pub fn involves(&self, profile: &ProfileId) -> bool {
        &self.caller == profile || &self.callee == profile
    }

    pub fn peer_of(&self, profile: &ProfileId) -> &ProfileId {
        if &self.caller == profile {
            &self.callee
        } else {
            &self.caller
        }
    }
}

#[derive(Default)]
pub struct CallRegistry {
    calls: DashMap<CallId, ActiveCall>,
    participants: DashMap<ProfileId, CallId>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a new ringing call, failing with [`CoordinatorError::Busy`] if
    /// either participant is already in a live call.
    pub fn claim(
        &self,
        call_id: &CallId,
        caller: &ProfileId,
        callee: &ProfileId,
    ) -> Result<(), CoordinatorError> {
        if !self.claim_participant(caller, call_id) {
            return Err(CoordinatorError::Busy(caller.clone()));
        }
        if !self.claim_participant(callee, call_id) {
            self.release_participant(caller, call_id);
            return Err(CoordinatorError::Busy(callee.clone()));
        }
        self.calls.insert(
            call_id.clone(),
            ActiveCall {
                caller: caller.clone(),
                callee: callee.clone(),
                status: CallStatus::Ringing,
                started_at: None,
                ring_timer: None,
            },
        );
        debug!(target: "Calls/Registry", "Registered call {call_id} ({caller} -> {callee})");
        Ok(())
    }

    fn claim_participant(&self, profile: &ProfileId, call_id: &CallId) -> bool {
        match self.participants.entry(profile.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(call_id.clone());
                true
            }
        }
    }

    fn release_participant(&self, profile: &ProfileId, call_id: &CallId) {
        self.participants.remove_if(profile, |_, id| id == call_id);
    }

    /// Attach the ring timer of a ringing call. A call that is gone or no
    /// longer ringing gets its timer aborted on the spot.
    pub fn arm_timer(&self, call_id: &CallId, timer: AbortHandle) -> bool {
        match self.calls.get_mut(call_id) {
            Some(mut call) if call.status == CallStatus::Ringing => {
                if let Some(previous) = call.ring_timer.replace(timer) {
                    previous.abort();
                }
                true
            }
            _ => {
                timer.abort();
                false
            }
        }
    }

    /// Move a ringing call to ongoing and cancel its timer, all under the
    /// entry lock. Returns the caller and the answer instant.
    pub fn answer(
        &self,
        call_id: &CallId,
        callee: &ProfileId,
    ) -> Result<(ProfileId, DateTime<Utc>), CoordinatorError> {
        let mut call = self
            .calls
            .get_mut(call_id)
            .ok_or_else(|| CoordinatorError::NotFound(call_id.clone()))?;
        if &call.callee != callee {
            return Err(CoordinatorError::NotParticipant {
                call_id: call_id.clone(),
                profile: callee.clone(),
            });
        }
        if call.status != CallStatus::Ringing {
            return Err(CoordinatorError::NotRinging(call_id.clone()));
        }
        let started_at = Utc::now();
        call.status = CallStatus::Ongoing;
        call.started_at = Some(started_at);
        if let Some(timer) = call.ring_timer.take() {
            timer.abort();
        }
        Ok((call.caller.clone(), started_at))
    }

    /// Remove a live call in any status, cancelling its ring timer.
    pub fn remove(&self, call_id: &CallId) -> Option<ActiveCall> {
        let (_, mut call) = self.calls.remove(call_id)?;
        if let Some(timer) = call.ring_timer.take() {
            timer.abort();
        }
        self.release(call_id, &call);
        Some(call)
    }

    /// Remove the call only if it is still ringing. Used by the ring timer
    /// itself, so the timer handle is dropped rather than aborted.
    pub fn remove_if_ringing(&self, call_id: &CallId) -> Option<ActiveCall> {
        let (_, mut call) = self
            .calls
            .remove_if(call_id, |_, call| call.status == CallStatus::Ringing)?;
        call.ring_timer = None;
        self.release(call_id, &call);
        Some(call)
    }

    fn release(&self, call_id: &CallId, call: &ActiveCall) {
        self.release_participant(&call.caller, call_id);
        self.release_participant(&call.callee, call_id);
        debug!(target: "Calls/Registry", "Released call {call_id}");
    }

    pub fn participants(&self, call_id: &CallId) -> Option<(ProfileId, ProfileId)> {
        self.calls
            .get(call_id)
            .map(|call| (call.caller.clone(), call.callee.clone()))
    }

    pub fn status(&self, call_id: &CallId) -> Option<CallStatus> {
        self.calls.get(call_id).map(|call| call.status)
    }

    pub fn call_for(&self, profile: &ProfileId) -> Option<CallId> {
        self.participants.get(profile).map(|id| id.value().clone())
    }

    pub fn is_busy(&self, profile: &ProfileId) -> bool {
        self.participants.contains_key(profile)
    }

    pub fn contains(&self, call_id: &CallId) -> bool {
        self.calls.contains_key(call_id)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}
