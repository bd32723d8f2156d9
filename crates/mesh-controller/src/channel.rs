//! External signal channel abstraction.
//!
//! The channel is whatever transport relays signaling between session
//! members (a pub/sub service in production, an in-process hub in tests).
//! Delivery is at-least-once and possibly reordered; the orchestrator
//! filters echoes and tolerates duplicates.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::ChannelError;
use signal_protocol::{RosterSnapshot, SessionEvent, Signal, SignalEnvelope};

/// Inbound events from the external channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A point-to-point signal envelope. May include echoes of our own
    /// messages and envelopes addressed to other members.
    Signal(SignalEnvelope),
    /// A member joined the session.
    MemberJoined { peer_id: String },
    /// A member left the session.
    MemberLeft { peer_id: String },
    /// A session-level broadcast.
    Session(SessionEvent),
}

/// Outbound half of the signal channel.
///
/// The inbound half is an `mpsc::Receiver<ChannelEvent>` handed to the
/// mesh actor at spawn time.
#[async_trait]
pub trait SignalChannel: Send + Sync {
    /// Our own identity in the session.
    fn local_peer_id(&self) -> &str;

    /// The session this channel is bound to.
    fn session_id(&self) -> &str;

    /// Relay a signal to one member.
    async fn send(&self, to_peer_id: &str, signal: Signal) -> Result<(), ChannelError>;

    /// Broadcast a session-level event to all other members.
    async fn broadcast(&self, event: SessionEvent) -> Result<(), ChannelError>;
}

/// Session metadata endpoint, consulted once at startup for the initial
/// roster.
#[async_trait]
pub trait RosterProvider: Send + Sync {
    async fn fetch(&self) -> Result<RosterSnapshot, ChannelError>;
}

/// Convenience alias for the inbound event stream.
pub type ChannelEvents = mpsc::Receiver<ChannelEvent>;
