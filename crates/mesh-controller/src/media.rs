//! Local media source abstraction.

use async_trait::async_trait;

use crate::errors::MediaError;

/// Kind of a media track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    /// Short name for logging.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        }
    }
}

/// An opaque reference to a local track that can be attached to peer
/// connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackHandle {
    /// Stable track identifier.
    pub id: String,
    pub kind: TrackKind,
}

/// A track received from a remote peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    /// Track identifier as announced by the remote side.
    pub id: String,
    pub kind: TrackKind,
}

/// Source of local capture tracks.
///
/// Enumeration failure is non-fatal: the orchestrator proceeds without
/// local tracks and negotiates receive-only.
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// The current set of local tracks to offer to peers.
    async fn current_tracks(&self) -> Result<Vec<TrackHandle>, MediaError>;
}
