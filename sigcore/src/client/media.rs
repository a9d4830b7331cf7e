//! Local media acquisition and the failure taxonomy surfaced to the UI.

use crate::types::CallKind;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Why local media could not be acquired.
///
/// Callers match on the variant to pick an actionable message; a failure here
/// aborts the call locally before anything reaches the server.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    #[error("permission to use the microphone or camera was denied")]
    PermissionDenied,

    #[error("no microphone or camera was found")]
    DeviceNotFound,

    #[error("the microphone or camera is already in use by another application")]
    DeviceInUse,

    #[error("failed to acquire media: {0}")]
    Other(String),
}

impl MediaError {
    /// Classify a platform error by its name (`NotAllowedError`, `NotFoundError`, ...).
    pub fn classify(name: &str, message: &str) -> Self {
        match name {
            "NotAllowedError" | "PermissionDeniedError" | "SecurityError" => Self::PermissionDenied,
            "NotFoundError" | "DevicesNotFoundError" | "OverconstrainedError" => {
                Self::DeviceNotFound
            }
            "NotReadableError" | "TrackStartError" | "AbortError" => Self::DeviceInUse,
            _ => Self::Other(format!("{name}: {message}")),
        }
    }

    /// Stable code reported in the client error slot.
    pub fn code(&self) -> &'static str {
        match self {
            Self::PermissionDenied => "permission_denied",
            Self::DeviceNotFound => "device_not_found",
            Self::DeviceInUse => "device_in_use",
            Self::Other(_) => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => f.write_str("audio"),
            Self::Video => f.write_str("video"),
        }
    }
}

/// A single captured local track.
pub trait MediaTrack: Send + Sync {
    fn id(&self) -> &str;
    fn kind(&self) -> TrackKind;
    fn set_enabled(&self, enabled: bool);
    fn is_enabled(&self) -> bool;
    /// Release the underlying device. Stopping twice is harmless.
    fn stop(&self);
}

/// The set of local tracks captured for one call.
#[derive(Clone, Default)]
pub struct LocalMedia {
    tracks: Vec<Arc<dyn MediaTrack>>,
}

impl fmt::Debug for LocalMedia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.tracks.iter().map(|t| (t.kind(), t.id().to_string())))
            .finish()
    }
}

impl LocalMedia {
    pub fn new(tracks: Vec<Arc<dyn MediaTrack>>) -> Self {
        Self { tracks }
    }

    pub fn tracks(&self) -> &[Arc<dyn MediaTrack>] {
        &self.tracks
    }

    pub fn has_video(&self) -> bool {
        self.tracks.iter().any(|t| t.kind() == TrackKind::Video)
    }

    /// Enable or disable every track of one kind.
    pub fn set_kind_enabled(&self, kind: TrackKind, enabled: bool) {
        for track in self.tracks.iter().filter(|t| t.kind() == kind) {
            track.set_enabled(enabled);
        }
    }

    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

/// Access to the local microphone and camera.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Capture audio, plus video for a video call.
    async fn acquire(&self, kind: CallKind) -> Result<LocalMedia, MediaError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_platform_error_names() {
        assert_eq!(
            MediaError::classify("NotAllowedError", "denied"),
            MediaError::PermissionDenied
        );
        assert_eq!(
            MediaError::classify("NotFoundError", "none"),
            MediaError::DeviceNotFound
        );
        assert_eq!(
            MediaError::classify("NotReadableError", "busy"),
            MediaError::DeviceInUse
        );

        let other = MediaError::classify("TypeError", "bad constraints");
        assert_eq!(other.code(), "unknown");
        assert!(other.to_string().contains("bad constraints"));
    }
}
