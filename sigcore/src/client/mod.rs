//! Client side of call signaling: media acquisition, the per-call
//! negotiation session, and the UI-facing phase machine.

pub mod media;
pub mod peer;
pub mod session;
pub mod state;

pub use media::{LocalMedia, MediaDevices, MediaError, MediaTrack, TrackKind};
pub use peer::{
    ConnectionState, NegotiationError, NegotiationEvent, NegotiationEventSink, PeerConnection,
    PeerConnectionFactory, SdpType, SessionDescription,
};
pub use session::CallSession;
pub use state::{
    CallErrorInfo, CallPhase, CallSnapshot, InvalidTransition, PhaseTransition,
    format_call_duration,
};
