//! Mesh controller configuration.
//!
//! Configuration is loaded from environment variables; every knob has a
//! default so an empty environment produces a working config.

use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default minimum gap between locally initiated offers, in milliseconds.
pub const DEFAULT_OFFER_COOLDOWN_MS: u64 = 2_000;

/// Default deadline for an answer after sending an offer, in milliseconds.
pub const DEFAULT_OFFER_TIMEOUT_MS: u64 = 10_000;

/// Default age past which a still-establishing peer counts as stalled,
/// in milliseconds.
pub const DEFAULT_STALL_THRESHOLD_MS: u64 = 10_000;

/// Default stall watchdog sweep interval, in milliseconds.
pub const DEFAULT_WATCHDOG_INTERVAL_MS: u64 = 5_000;

/// Default delay between tearing a peer down and recreating it, in
/// milliseconds.
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 500;

/// Default mesh actor mailbox capacity.
pub const DEFAULT_MESH_CHANNEL_BUFFER: usize = 256;

/// Default per-peer actor mailbox capacity.
pub const DEFAULT_PEER_CHANNEL_BUFFER: usize = 64;

/// Default outbound mesh event channel capacity.
pub const DEFAULT_EVENT_CHANNEL_BUFFER: usize = 256;

/// Mesh controller configuration.
///
/// Loaded from environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct MeshConfig {
    /// Minimum gap between locally initiated offers to the same peer.
    pub offer_cooldown: Duration,

    /// How long to wait for an answer after sending an offer before
    /// resetting the peer.
    pub offer_timeout: Duration,

    /// Age past which a peer that has not reached connected counts as
    /// stalled.
    pub stall_threshold: Duration,

    /// How often the stall watchdog sweeps the registry.
    pub watchdog_interval: Duration,

    /// Delay between destroying a failed peer and recreating it.
    pub reconnect_delay: Duration,

    /// Mesh actor mailbox capacity.
    pub mesh_channel_buffer: usize,

    /// Per-peer actor mailbox capacity. This bounds the negotiation
    /// queue: signals past capacity apply backpressure to the dispatcher.
    pub peer_channel_buffer: usize,

    /// Outbound mesh event channel capacity.
    pub event_channel_buffer: usize,
}

impl Default for MeshConfig {
    fn default() -> Self {
        MeshConfig {
            offer_cooldown: Duration::from_millis(DEFAULT_OFFER_COOLDOWN_MS),
            offer_timeout: Duration::from_millis(DEFAULT_OFFER_TIMEOUT_MS),
            stall_threshold: Duration::from_millis(DEFAULT_STALL_THRESHOLD_MS),
            watchdog_interval: Duration::from_millis(DEFAULT_WATCHDOG_INTERVAL_MS),
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            mesh_channel_buffer: DEFAULT_MESH_CHANNEL_BUFFER,
            peer_channel_buffer: DEFAULT_PEER_CHANNEL_BUFFER,
            event_channel_buffer: DEFAULT_EVENT_CHANNEL_BUFFER,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl MeshConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let millis = |key: &str, default: u64| {
            vars.get(key)
                .and_then(|s| s.parse().ok())
                .map_or_else(|| Duration::from_millis(default), Duration::from_millis)
        };

        let offer_cooldown = millis("MESH_OFFER_COOLDOWN_MS", DEFAULT_OFFER_COOLDOWN_MS);
        let offer_timeout = millis("MESH_OFFER_TIMEOUT_MS", DEFAULT_OFFER_TIMEOUT_MS);
        let stall_threshold = millis("MESH_STALL_THRESHOLD_MS", DEFAULT_STALL_THRESHOLD_MS);
        let watchdog_interval = millis("MESH_WATCHDOG_INTERVAL_MS", DEFAULT_WATCHDOG_INTERVAL_MS);
        let reconnect_delay = millis("MESH_RECONNECT_DELAY_MS", DEFAULT_RECONNECT_DELAY_MS);

        let mesh_channel_buffer = vars
            .get("MESH_CHANNEL_BUFFER")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MESH_CHANNEL_BUFFER);

        let peer_channel_buffer = vars
            .get("MESH_PEER_CHANNEL_BUFFER")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PEER_CHANNEL_BUFFER);

        let event_channel_buffer = vars
            .get("MESH_EVENT_CHANNEL_BUFFER")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_EVENT_CHANNEL_BUFFER);

        let config = MeshConfig {
            offer_cooldown,
            offer_timeout,
            stall_threshold,
            watchdog_interval,
            reconnect_delay,
            mesh_channel_buffer,
            peer_channel_buffer,
            event_channel_buffer,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.watchdog_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "MESH_WATCHDOG_INTERVAL_MS must be greater than zero".to_string(),
            ));
        }
        if self.mesh_channel_buffer == 0 || self.peer_channel_buffer == 0 {
            return Err(ConfigError::InvalidValue(
                "channel buffers must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
