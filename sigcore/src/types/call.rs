use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque call identifier assigned by the server when an offer is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh 32-character upper-case hex identifier.
    pub fn generate() -> Self {
        let bytes: [u8; 16] = rand::random();
        Self(hex::encode_upper(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The placeholder id carried by a busy response, which never created a call.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Identifier of a connected user profile.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileId(String);

impl ProfileId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProfileId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Audio-only or audio+video call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallKind {
    #[serde(rename = "audio", alias = "AUDIO")]
    Audio,
    #[serde(rename = "video", alias = "VIDEO")]
    Video,
}

impl CallKind {
    pub fn is_video(self) -> bool {
        self == Self::Video
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a call record.
///
/// `Ringing` and `Ongoing` are the only non-terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallStatus {
    Ringing,
    Ongoing,
    Ended,
    Missed,
    Rejected,
    Busy,
}

impl CallStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Ringing | Self::Ongoing)
    }
}

/// Why a call was terminated, as reported to both participants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndReason {
    Ended,
    Missed,
    Rejected,
    Busy,
}

impl EndReason {
    /// The terminal record status this reason finalizes a call with.
    pub fn status(self) -> CallStatus {
        match self {
            Self::Ended => CallStatus::Ended,
            Self::Missed => CallStatus::Missed,
            Self::Rejected => CallStatus::Rejected,
            Self::Busy => CallStatus::Busy,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ended => "ended",
            Self::Missed => "missed",
            Self::Rejected => "rejected",
            Self::Busy => "busy",
        }
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Public profile of a caller, shown to the callee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallerProfile {
    pub id: ProfileId,
    pub handle: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

impl CallerProfile {
    /// A profile carrying only the identifier, used when the directory has no entry.
    pub fn bare(id: ProfileId) -> Self {
        Self {
            handle: id.as_str().to_string(),
            id,
            display_name: None,
            avatar_url: None,
        }
    }

    /// Name to show in notifications: display name, then handle.
    pub fn notification_name(&self) -> Option<&str> {
        self.display_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .or_else(|| Some(self.handle.as_str()).filter(|h| !h.is_empty()))
    }
}

/// Durable record of one call attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    pub id: CallId,
    pub thread_id: String,
    pub caller_id: ProfileId,
    pub callee_id: ProfileId,
    #[serde(rename = "type")]
    pub kind: CallKind,
    pub status: CallStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Whole seconds between answer and termination.
    pub duration: Option<u64>,
    pub end_reason: Option<EndReason>,
}

impl CallRecord {
    pub fn new_ringing(
        id: CallId,
        thread_id: impl Into<String>,
        caller_id: ProfileId,
        callee_id: ProfileId,
        kind: CallKind,
    ) -> Self {
        Self {
            id,
            thread_id: thread_id.into(),
            caller_id,
            callee_id,
            kind,
            status: CallStatus::Ringing,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            duration: None,
            end_reason: None,
        }
    }

    pub fn involves(&self, profile: &ProfileId) -> bool {
        &self.caller_id == profile || &self.callee_id == profile
    }

    /// The participant on the other side from `profile`.
    pub fn peer_of(&self, profile: &ProfileId) -> &ProfileId {
        if &self.caller_id == profile {
            &self.callee_id
        } else {
            &self.caller_id
        }
    }
}

/// Mailbox snapshot of an offer addressed to a recipient who could not be reached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingCall {
    pub call_id: CallId,
    pub thread_id: String,
    pub caller: CallerProfile,
    #[serde(rename = "type")]
    pub kind: CallKind,
    pub sdp: String,
    pub created_at: DateTime<Utc>,
}

/// Whole seconds elapsed between two instants, clamped at zero.
pub fn whole_seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    end.signed_duration_since(start).num_seconds().max(0) as u64
}
