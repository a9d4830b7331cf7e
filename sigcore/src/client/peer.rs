//! Negotiation context abstraction and the events it reports.

use super::media::{MediaTrack, TrackKind};
use crate::protocol::CandidatePayload;
use crate::types::CallKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("negotiation backend error: {0}")]
    Backend(String),

    #[error("malformed session description: {0}")]
    MalformedDescription(#[from] serde_json::Error),

    #[error("no negotiation context (session not started or already terminated)")]
    NoContext,

    #[error("session already started")]
    AlreadyStarted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// A local or remote session description.
///
/// On the wire the whole description is serialized to JSON and carried in the
/// envelope's opaque `sdp` string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }

    pub fn to_wire(&self) -> Result<String, NegotiationError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_wire(wire: &str) -> Result<Self, NegotiationError> {
        Ok(serde_json::from_str(wire)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// States after which the media path is unusable.
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed)
    }
}

/// Asynchronous events raised by a negotiation context.
#[derive(Debug, Clone, PartialEq)]
pub enum NegotiationEvent {
    /// A local path candidate was discovered and should reach the peer.
    LocalCandidate(CandidatePayload),
    /// The remote side started sending a track.
    RemoteTrack(TrackKind),
    ConnectionStateChanged(ConnectionState),
}

/// Receiver of negotiation events; one per call.
pub trait NegotiationEventSink: Send + Sync {
    fn emit(&self, event: NegotiationEvent);
}

/// A peer-to-peer negotiation context.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn add_track(&self, track: Arc<dyn MediaTrack>) -> Result<(), NegotiationError>;
    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError>;
    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError>;
    async fn set_local_description(
        &self,
        description: &SessionDescription,
    ) -> Result<(), NegotiationError>;
    async fn set_remote_description(
        &self,
        description: &SessionDescription,
    ) -> Result<(), NegotiationError>;
    async fn add_ice_candidate(&self, candidate: &CandidatePayload)
    -> Result<(), NegotiationError>;
    fn close(&self);
}

/// Creates one negotiation context per call.
pub trait PeerConnectionFactory: Send + Sync {
    fn create(
        &self,
        kind: CallKind,
        events: Arc<dyn NegotiationEventSink>,
    ) -> Result<Arc<dyn PeerConnection>, NegotiationError>;
}
