//! Wire types for the mesh signaling protocol.
//!
//! Every message that crosses the external signal channel is defined here:
//! the offer/answer/candidate tagged union ([`signal::Signal`]), the
//! point-to-point envelope ([`envelope::SignalEnvelope`]), session-level
//! broadcast events ([`session::SessionEvent`]), and the roster snapshot
//! served by the session metadata endpoint ([`session::RosterSnapshot`]).
//!
//! The JSON shape is part of the protocol contract: peers written against
//! other stacks interoperate as long as they produce the same tagged
//! union, so the serde attributes in this crate are load-bearing.

#![warn(clippy::pedantic)]

pub mod envelope;
pub mod session;
pub mod signal;

pub use envelope::SignalEnvelope;
pub use session::{RosterEntry, RosterSnapshot, SessionEvent};
pub use signal::{IceCandidate, Signal};
