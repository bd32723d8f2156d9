//! Error types for the mesh controller.

use thiserror::Error;

/// Top-level error surface of the orchestrator.
#[derive(Debug, Error)]
pub enum MeshError {
    /// A request targeted a peer with no live session.
    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    /// The external signal channel failed.
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// A media source operation failed.
    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    /// The orchestrator is shutting down and no longer accepts requests.
    #[error("Mesh is shutting down")]
    ShuttingDown,

    /// Internal plumbing failure (mailbox send, dropped reply).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors surfaced by the peer connection abstraction.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The operation is not valid in the connection's current signaling
    /// state (e.g. applying an answer while stable).
    #[error("Invalid state for operation: {0}")]
    InvalidState(String),

    /// The underlying connection stack reported a failure.
    #[error("Connection failed: {0}")]
    Failed(String),

    /// The connection has already been closed.
    #[error("Connection closed")]
    Closed,
}

impl ConnectionError {
    /// True when the error indicates local and remote negotiation state
    /// have diverged, as opposed to a transient stack failure.
    #[must_use]
    pub fn is_state_error(&self) -> bool {
        matches!(self, ConnectionError::InvalidState(_))
    }
}

/// Errors surfaced by the external signal channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// An outbound send was rejected or timed out.
    #[error("Send failed: {0}")]
    Send(String),

    /// The channel connection is gone.
    #[error("Channel closed")]
    Closed,

    /// The session metadata endpoint returned an error.
    #[error("Metadata fetch failed: {0}")]
    Metadata(String),
}

/// Errors surfaced by the local media source.
#[derive(Debug, Error)]
pub enum MediaError {
    /// Device enumeration or capture start failed.
    #[error("Media acquisition failed: {0}")]
    Acquisition(String),
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MeshError::PeerNotFound("peer-1".to_string());
        assert_eq!(err.to_string(), "Peer not found: peer-1");

        let err = MeshError::from(ChannelError::Closed);
        assert_eq!(err.to_string(), "Channel error: Channel closed");
    }

    #[test]
    fn test_state_error_classification() {
        assert!(ConnectionError::InvalidState("have-local-offer".to_string()).is_state_error());
        assert!(!ConnectionError::Failed("dtls".to_string()).is_state_error());
        assert!(!ConnectionError::Closed.is_state_error());
    }
}
