//! Mesh controller - multi-peer negotiation orchestrator.
//!
//! Drives WebRTC-style offer/answer negotiation against every other
//! member of a session, one serialized state machine per peer, on top of
//! an at-least-once external signal channel.
//!
//! # Architecture
//!
//! ```text
//! MeshActor (registry, dispatch, membership, watchdog)
//! ├── PeerActor "bob"   (negotiation queue, candidate buffer, glare)
//! ├── PeerActor "carol"
//! └── ...
//! ```
//!
//! The embedder supplies four seams and receives an event stream back:
//!
//! - [`channel::SignalChannel`] / channel events: the signaling transport
//! - [`connection::ConnectionFactory`]: the underlying connection engine
//! - [`media::MediaSource`]: local capture tracks
//! - [`channel::RosterProvider`]: initial session membership
//!
//! Everything else (glare resolution, candidate buffering, offer
//! cooldown and timeout, stall detection, peer resets) happens inside
//! the actors.

pub mod actors;
pub mod channel;
pub mod config;
pub mod connection;
pub mod errors;
pub mod media;

pub use actors::{
    MeshActor, MeshEvent, MeshHandle, MeshPeerInfo, MeshState, NegotiationState, PeerSnapshot,
    ResetReason,
};
pub use channel::{ChannelEvent, ChannelEvents, RosterProvider, SignalChannel};
pub use config::MeshConfig;
pub use connection::{
    ConnectionEvent, ConnectionFactory, ConnectionState, NewConnection, PeerConnection, SdpKind,
    SessionDescription, SignalingState,
};
pub use errors::{ChannelError, ConnectionError, MediaError, MeshError};
pub use media::{MediaSource, RemoteTrack, TrackHandle, TrackKind};
