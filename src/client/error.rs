use sigcore::client::{InvalidTransition, MediaError, NegotiationError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("a call is already in progress")]
    Busy,

    #[error("there is no incoming call to accept")]
    NoIncomingCall,

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error("negotiation failed: {0}")]
    Negotiation(#[from] NegotiationError),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("signaling connection is closed")]
    SignalingClosed,

    #[error("call client has shut down")]
    Shutdown,
}

impl ClientError {
    /// Code stored in the error slot of the call snapshot.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Busy => "busy",
            Self::NoIncomingCall => "no_incoming_call",
            Self::Media(e) => e.code(),
            Self::Negotiation(_) => "negotiation_failed",
            Self::InvalidTransition(_) => "invalid_state",
            Self::SignalingClosed => "signaling_closed",
            Self::Shutdown => "shutdown",
        }
    }
}
