//! # Mesh Test Utilities
//!
//! Shared test utilities for the mesh controller.
//!
//! This crate provides mock implementations of the controller's seams so
//! negotiation behavior can be tested without a real WebRTC engine or
//! signaling service.
//!
//! ## Modules
//!
//! - `mock_connection` - Scripted peer connection and factory
//! - `loopback` - In-process signal hub connecting multiple meshes
//! - `fixtures` - Static media sources, rosters, capturing channels
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mesh_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let hub = LoopbackHub::new("session-1");
//!     let (channel, events) = hub.join("alice");
//!     let factory = Arc::new(MockConnectionFactory::new());
//!     // Spawn a mesh against the hub and drive it...
//! }
//! ```

pub mod fixtures;
pub mod loopback;
pub mod mock_connection;

pub use fixtures::{
    audio_track, video_track, CapturingChannel, FailingRoster, StaticMedia, StaticRoster,
};
pub use loopback::{LoopbackChannel, LoopbackHub};
pub use mock_connection::{MockConnection, MockConnectionFactory, MockOp};
