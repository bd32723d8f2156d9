//! Session-level broadcast events and the startup roster snapshot.

use serde::{Deserialize, Serialize};

/// Events broadcast to every session member (as opposed to the
/// point-to-point [`crate::SignalEnvelope`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SessionEvent {
    /// The session has ended for everyone.
    SessionEnded,
    /// A participant was spotlighted (pinned for all viewers).
    Spotlight {
        /// Identity of the spotlighted participant.
        #[serde(rename = "peerId")]
        peer_id: String,
    },
}

/// A participant entry in the roster snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    /// Participant identity.
    #[serde(rename = "peerId")]
    pub peer_id: String,
    /// Display name, if the metadata endpoint has one.
    #[serde(rename = "displayName", skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// When the participant joined, if known.
    #[serde(rename = "joinedAt", skip_serializing_if = "Option::is_none")]
    pub joined_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Initial session state served by the metadata endpoint.
///
/// Consumed exactly once during orchestrator startup; membership changes
/// after that arrive as channel events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterSnapshot {
    /// Participants already present in the session.
    pub participants: Vec<RosterEntry>,
    /// Persisted spotlight state, if any participant is spotlighted.
    #[serde(rename = "spotlightedPeerId", skip_serializing_if = "Option::is_none")]
    pub spotlighted_peer_id: Option<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_session_event_wire_shape() {
        let json = serde_json::to_value(SessionEvent::Spotlight {
            peer_id: "alice".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "spotlight");
        assert_eq!(json["peerId"], "alice");

        let json = serde_json::to_value(SessionEvent::SessionEnded).unwrap();
        assert_eq!(json["type"], "session-ended");
    }

    #[test]
    fn test_roster_snapshot_defaults() {
        let snapshot: RosterSnapshot = serde_json::from_str(r#"{"participants": []}"#).unwrap();
        assert!(snapshot.participants.is_empty());
        assert!(snapshot.spotlighted_peer_id.is_none());
    }
}
