//! Peer connection abstraction.
//!
//! The negotiation state machines are written against [`PeerConnection`]
//! rather than a concrete WebRTC stack, so the orchestrator can be driven
//! by a real engine in production and a scripted mock in tests. The
//! surface mirrors the standard RTCPeerConnection operations the state
//! machines need, nothing more.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::ConnectionError;
use crate::media::{RemoteTrack, TrackHandle, TrackKind};
use signal_protocol::IceCandidate;

/// Which side of the offer/answer exchange a description belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

/// A session description produced or consumed by a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    #[must_use]
    pub fn offer(sdp: impl Into<String>) -> Self {
        SessionDescription {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    #[must_use]
    pub fn answer(sdp: impl Into<String>) -> Self {
        SessionDescription {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Signaling state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    /// No negotiation in flight.
    Stable,
    /// A local offer has been applied and awaits a remote answer.
    HaveLocalOffer,
    /// A remote offer has been applied and awaits a local answer.
    HaveRemoteOffer,
}

impl SignalingState {
    /// Short name for logging.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalingState::Stable => "stable",
            SignalingState::HaveLocalOffer => "have-local-offer",
            SignalingState::HaveRemoteOffer => "have-remote-offer",
        }
    }
}

/// Aggregate connectivity state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created, no connectivity attempt yet.
    New,
    /// Connectivity checks in progress.
    Connecting,
    /// Media is flowing.
    Connected,
    /// Connectivity lost, may recover on its own.
    Disconnected,
    /// Connectivity lost permanently.
    Failed,
    /// Closed by either side.
    Closed,
}

impl ConnectionState {
    /// True while the connection has not yet reached connected. Peers
    /// stuck in these states are what the stall watchdog looks for.
    #[must_use]
    pub fn is_establishing(&self) -> bool {
        matches!(self, ConnectionState::New | ConnectionState::Connecting)
    }

    /// Short name for logging.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::New => "new",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        }
    }
}

/// Asynchronous events emitted by a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The local media topology changed and a fresh offer is needed.
    NegotiationNeeded,
    /// A local ICE candidate was gathered and should be relayed.
    IceCandidate(IceCandidate),
    /// A remote track arrived.
    Track(RemoteTrack),
    /// The aggregate connectivity state changed.
    ConnectionStateChanged(ConnectionState),
    /// The signaling state changed.
    SignalingStateChanged(SignalingState),
}

/// One peer connection, as seen by the negotiation state machine.
///
/// Implementations must tolerate `close` being called more than once.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, ConnectionError>;

    async fn create_answer(&self) -> Result<SessionDescription, ConnectionError>;

    async fn set_local_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), ConnectionError>;

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), ConnectionError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), ConnectionError>;

    /// Discard the pending local offer and return to stable.
    async fn rollback(&self) -> Result<(), ConnectionError>;

    async fn add_track(&self, track: TrackHandle) -> Result<(), ConnectionError>;

    /// Detach a previously added local track.
    async fn remove_track(&self, track: TrackHandle) -> Result<(), ConnectionError>;

    /// Swap the sender for `kind` to a new track without renegotiating.
    async fn replace_track(
        &self,
        kind: TrackKind,
        track: TrackHandle,
    ) -> Result<(), ConnectionError>;

    fn signaling_state(&self) -> SignalingState;

    fn connection_state(&self) -> ConnectionState;

    /// True once a remote description has been applied. Candidates that
    /// arrive before this must be buffered, not applied.
    fn has_remote_description(&self) -> bool;

    async fn close(&self);
}

/// A freshly created connection plus its event stream.
pub struct NewConnection {
    pub connection: Box<dyn PeerConnection>,
    pub events: mpsc::Receiver<ConnectionEvent>,
}

/// Factory for peer connections, one per remote peer session.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn create(&self, peer_id: &str) -> Result<NewConnection, ConnectionError>;
}
