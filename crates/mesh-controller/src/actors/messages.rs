//! Message types for the actor system.
//!
//! Two mailboxes exist: the mesh actor's ([`MeshMessage`]) and each peer
//! actor's ([`PeerMessage`]). Peer actors report back to the mesh over a
//! shared [`PeerReport`] channel, and the mesh surfaces [`MeshEvent`]s to
//! the embedding application.

use std::time::Duration;
use tokio::sync::oneshot;

use crate::connection::{ConnectionState, SignalingState};
use crate::errors::MeshError;
use crate::media::{RemoteTrack, TrackHandle, TrackKind};
use signal_protocol::Signal;

/// Messages handled by the mesh actor.
#[derive(Debug)]
pub enum MeshMessage {
    /// The local media set changed; re-enumerate and attach to all peers.
    TracksChanged,

    /// Swap the sender for `kind` on every peer without renegotiating.
    ReplaceTrack {
        kind: TrackKind,
        track: TrackHandle,
        respond_to: oneshot::Sender<Result<(), MeshError>>,
    },

    /// Spotlight a participant for every session member.
    Spotlight {
        peer_id: String,
        respond_to: oneshot::Sender<Result<(), MeshError>>,
    },

    /// End the session for every member and shut down.
    EndSession {
        respond_to: oneshot::Sender<Result<(), MeshError>>,
    },

    /// Snapshot current mesh state.
    GetState {
        respond_to: oneshot::Sender<MeshState>,
    },

    /// Internal: recreate a peer after its reconnect delay elapsed.
    RespawnPeer { peer_id: String },
}

/// Messages handled by a peer actor.
///
/// The mailbox is processed strictly in order, which is what serializes
/// negotiation work per peer: a signal is never handled while an earlier
/// one for the same peer is still being applied.
#[derive(Debug)]
pub enum PeerMessage {
    /// Start a renegotiation if the cooldown and in-flight guards allow.
    Negotiate,

    /// An inbound signal from the remote peer, already unwrapped from
    /// its envelope by the dispatcher.
    Remote(Signal),

    /// Attach a local track to the connection.
    AddTrack(TrackHandle),

    /// Swap the sender for `kind` to a new track.
    ReplaceTrack { kind: TrackKind, track: TrackHandle },

    /// Detach a local track that is no longer captured.
    RemoveTrack(TrackHandle),

    /// Snapshot the peer's negotiation state.
    GetSnapshot {
        respond_to: oneshot::Sender<PeerSnapshot>,
    },
}

/// Why a peer session is being torn down and recreated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetReason {
    /// Rollback failed while resolving offer glare.
    RollbackFailed,
    /// Remote and local negotiation state diverged past recovery.
    StateDiverged,
    /// No answer arrived within the offer timeout.
    OfferTimeout,
    /// The connection reported failed.
    ConnectionFailed,
    /// The stall watchdog found the peer stuck establishing.
    Stalled,
    /// Connection creation failed and will be retried.
    CreateFailed,
}

impl ResetReason {
    /// Short name for logging.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ResetReason::RollbackFailed => "rollback-failed",
            ResetReason::StateDiverged => "state-diverged",
            ResetReason::OfferTimeout => "offer-timeout",
            ResetReason::ConnectionFailed => "connection-failed",
            ResetReason::Stalled => "stalled",
            ResetReason::CreateFailed => "create-failed",
        }
    }
}

/// Upward report from a peer actor to the mesh actor.
#[derive(Debug)]
pub struct PeerReport {
    pub peer_id: String,
    /// Connection-instance generation the report came from. The mesh
    /// drops reports whose generation does not match the live session,
    /// so a torn-down instance can never mutate its replacement.
    pub generation: u64,
    pub kind: PeerReportKind,
}

#[derive(Debug)]
pub enum PeerReportKind {
    /// The connection's aggregate state changed.
    StateChanged(ConnectionState),
    /// A remote track arrived.
    RemoteTrack(RemoteTrack),
    /// The peer cannot recover in place and must be reset.
    ResetNeeded(ResetReason),
}

/// Events surfaced to the embedding application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeshEvent {
    /// A peer reached connected.
    PeerConnected { peer_id: String },
    /// A peer was torn down and will be recreated.
    PeerReconnecting {
        peer_id: String,
        reason: ResetReason,
    },
    /// A peer left the session.
    PeerLeft { peer_id: String },
    /// A remote track arrived from a peer.
    RemoteTrack {
        peer_id: String,
        track: RemoteTrack,
    },
    /// A participant was spotlighted.
    Spotlight { peer_id: String },
    /// The session ended.
    SessionEnded,
}

/// Where a peer's negotiation currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    /// Nothing in flight.
    Idle,
    /// A renegotiation was accepted and an offer is being produced.
    Negotiating,
    /// A local offer was sent; waiting for the answer.
    OfferSent,
    /// A remote offer was applied; an answer is being produced.
    AnswerPending,
}

impl NegotiationState {
    /// Short name for logging.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            NegotiationState::Idle => "idle",
            NegotiationState::Negotiating => "negotiating",
            NegotiationState::OfferSent => "offer-sent",
            NegotiationState::AnswerPending => "answer-pending",
        }
    }
}

/// Point-in-time view of a peer actor's state, for tests and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSnapshot {
    pub peer_id: String,
    pub negotiation: NegotiationState,
    pub signaling: SignalingState,
    pub connection: ConnectionState,
    /// Candidates held back until a remote description is applied.
    pub buffered_candidates: usize,
}

/// Per-peer entry in a mesh state snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshPeerInfo {
    pub peer_id: String,
    pub connection: ConnectionState,
    /// Time since this peer session was (re)created.
    pub age: Duration,
}

/// Point-in-time view of the whole mesh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshState {
    pub local_peer_id: String,
    pub session_id: String,
    pub peers: Vec<MeshPeerInfo>,
    pub spotlighted_peer_id: Option<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_reason_names() {
        assert_eq!(ResetReason::RollbackFailed.as_str(), "rollback-failed");
        assert_eq!(ResetReason::Stalled.as_str(), "stalled");
        assert_eq!(ResetReason::OfferTimeout.as_str(), "offer-timeout");
    }

    #[test]
    fn test_negotiation_state_names() {
        assert_eq!(NegotiationState::Idle.as_str(), "idle");
        assert_eq!(NegotiationState::OfferSent.as_str(), "offer-sent");
    }
}
