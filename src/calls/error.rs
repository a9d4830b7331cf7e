//! Coordinator error types.

use sigcore::store::StoreError;
use sigcore::types::{CallId, ProfileId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("{0} is already in a call")]
    Busy(ProfileId),

    #[error("call not found: {0}")]
    NotFound(CallId),

    #[error("{profile} is not a participant of call {call_id}")]
    NotParticipant { call_id: CallId, profile: ProfileId },

    #[error("call {0} is not ringing")]
    NotRinging(CallId),
}

impl CoordinatorError {
    /// Errors caused by stale or misdirected client messages rather than
    /// a server-side failure.
    pub fn is_benign(&self) -> bool {
        !matches!(self, Self::Store(_))
    }
}
