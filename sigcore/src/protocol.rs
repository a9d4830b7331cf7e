//! Signaling envelopes exchanged over the transport connection.
//!
//! Every frame is a JSON object `{"op": <tag>, "data": {...}}`. Negotiation
//! payloads (`sdp`, `candidate`) are opaque and passed through unmodified.

use crate::types::{CallId, CallKind, CallerProfile, EndReason, PendingCall, ProfileId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque network-path candidate, forwarded as-is between peers.
pub type CandidatePayload = serde_json::Value;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferData {
    pub thread_id: String,
    pub callee_id: ProfileId,
    #[serde(rename = "type")]
    pub kind: CallKind,
    pub sdp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerData {
    pub call_id: CallId,
    pub sdp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRef {
    pub call_id: CallId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateData {
    pub call_id: CallId,
    pub candidate: CandidatePayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingCallData {
    pub call_id: CallId,
    pub thread_id: String,
    pub caller: CallerProfile,
    #[serde(rename = "type")]
    pub kind: CallKind,
    pub sdp: String,
}

impl From<PendingCall> for IncomingCallData {
    fn from(pending: PendingCall) -> Self {
        Self {
            call_id: pending.call_id,
            thread_id: pending.thread_id,
            caller: pending.caller,
            kind: pending.kind,
            sdp: pending.sdp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallEndedData {
    pub call_id: CallId,
    pub reason: EndReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorData {
    pub code: String,
    pub message: String,
}

/// Messages a client sends to the signaling server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "data")]
pub enum ClientMessage {
    #[serde(rename = "call:offer")]
    Offer(OfferData),
    #[serde(rename = "call:answer")]
    Answer(AnswerData),
    #[serde(rename = "call:reject")]
    Reject(CallRef),
    #[serde(rename = "call:end")]
    End(CallRef),
    #[serde(rename = "ice:candidate")]
    IceCandidate(CandidateData),
}

impl ClientMessage {
    pub fn op(&self) -> &'static str {
        match self {
            Self::Offer(_) => "call:offer",
            Self::Answer(_) => "call:answer",
            Self::Reject(_) => "call:reject",
            Self::End(_) => "call:end",
            Self::IceCandidate(_) => "ice:candidate",
        }
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Messages the signaling server sends to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "data")]
pub enum ServerMessage {
    #[serde(rename = "call:ringing")]
    Ringing(CallRef),
    #[serde(rename = "call:incoming")]
    Incoming(IncomingCallData),
    #[serde(rename = "call:answered")]
    Answered(AnswerData),
    #[serde(rename = "call:ended")]
    Ended(CallEndedData),
    #[serde(rename = "ice:candidate")]
    IceCandidate(CandidateData),
    #[serde(rename = "error")]
    Error(ErrorData),
}

impl ServerMessage {
    pub fn op(&self) -> &'static str {
        match self {
            Self::Ringing(_) => "call:ringing",
            Self::Incoming(_) => "call:incoming",
            Self::Answered(_) => "call:answered",
            Self::Ended(_) => "call:ended",
            Self::IceCandidate(_) => "ice:candidate",
            Self::Error(_) => "error",
        }
    }

    /// The busy response sent to an initiator; no call id was ever assigned.
    pub fn busy() -> Self {
        Self::Ended(CallEndedData {
            call_id: CallId::new(""),
            reason: EndReason::Busy,
            duration: None,
        })
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error(ErrorData {
            code: code.into(),
            message: message.into(),
        })
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}
