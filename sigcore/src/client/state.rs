//! UI-facing call phase machine.

use crate::types::{CallId, CallKind, CallerProfile, EndReason};
use serde::Serialize;
use std::fmt;

/// Phase of the local call as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CallPhase {
    #[default]
    Idle,
    /// Locally initiated, waiting for the far side.
    Outgoing,
    /// Remotely initiated, waiting for local accept or reject.
    Incoming,
    Connecting,
    Connected,
}

impl CallPhase {
    pub fn is_idle(self) -> bool {
        self == Self::Idle
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseTransition {
    StartOutgoing,
    OfferReceived,
    LocalAccepted,
    RemoteAnswered,
    MediaConnected,
    /// Any terminal event. Valid from every phase.
    Teardown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTransition {
    pub current: CallPhase,
    pub attempted: PhaseTransition,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid transition {:?} in phase {:?}",
            self.attempted, self.current
        )
    }
}

impl std::error::Error for InvalidTransition {}

impl CallPhase {
    /// Compute the next phase. Teardown always lands in `Idle`.
    pub fn apply(self, transition: PhaseTransition) -> Result<CallPhase, InvalidTransition> {
        let next = match (self, transition) {
            (_, PhaseTransition::Teardown) => CallPhase::Idle,
            (CallPhase::Idle, PhaseTransition::StartOutgoing) => CallPhase::Outgoing,
            (CallPhase::Idle, PhaseTransition::OfferReceived) => CallPhase::Incoming,
            (CallPhase::Incoming, PhaseTransition::LocalAccepted) => CallPhase::Connecting,
            (CallPhase::Outgoing, PhaseTransition::RemoteAnswered) => CallPhase::Connecting,
            (CallPhase::Connecting, PhaseTransition::MediaConnected) => CallPhase::Connected,
            (current, attempted) => {
                return Err(InvalidTransition { current, attempted });
            }
        };
        Ok(next)
    }
}

/// Error slot shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallErrorInfo {
    pub code: String,
    pub message: String,
}

/// Everything the UI renders for the current call.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CallSnapshot {
    pub phase: CallPhase,
    pub call_id: Option<CallId>,
    pub kind: Option<CallKind>,
    pub thread_id: Option<String>,
    pub remote_profile: Option<CallerProfile>,
    pub is_muted: bool,
    pub is_video_off: bool,
    pub duration_secs: u64,
    pub has_remote_media: bool,
    pub error: Option<CallErrorInfo>,
    /// Reason the previous call ended, for a post-call notice.
    pub last_end_reason: Option<EndReason>,
}

impl CallSnapshot {
    /// Back to idle, keeping the error slot and the last end reason.
    pub fn cleared(&self) -> Self {
        Self {
            error: self.error.clone(),
            last_end_reason: self.last_end_reason,
            ..Self::default()
        }
    }
}

/// Format a call duration as `mm:ss`; minutes keep growing past an hour.
pub fn format_call_duration(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}
