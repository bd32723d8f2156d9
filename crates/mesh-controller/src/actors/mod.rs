//! Actor system for mesh orchestration.
//!
//! Two actor types form a small hierarchy:
//!
//! ```text
//! MeshActor (one per session)
//! └── PeerActor (one per remote member)
//! ```
//!
//! The mesh actor owns membership, dispatch and recovery; each peer
//! actor owns one connection and its negotiation state machine.
//! Cancellation flows down through child tokens.

pub mod mesh;
pub mod messages;
pub mod peer;

pub use mesh::{MeshActor, MeshHandle};
pub use messages::{
    MeshEvent, MeshPeerInfo, MeshState, NegotiationState, PeerSnapshot, ResetReason,
};
pub use peer::{PeerActor, PeerActorHandle};
