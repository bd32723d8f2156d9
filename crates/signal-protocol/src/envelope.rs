//! Point-to-point envelope wrapping a signal payload.

use serde::{Deserialize, Serialize};

use crate::signal::Signal;

/// Envelope for a signal relayed over the external channel.
///
/// The channel delivers envelopes at-least-once and possibly reordered;
/// the negotiation state machine is responsible for tolerating duplicates
/// and out-of-order arrival. Receivers must discard envelopes whose
/// `from_peer_id` equals their own identity (echo suppression) and
/// envelopes addressed to somebody else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalEnvelope {
    /// Sender identity.
    #[serde(rename = "fromPeerId")]
    pub from_peer_id: String,
    /// Recipient identity.
    #[serde(rename = "toPeerId")]
    pub to_peer_id: String,
    /// Session this exchange belongs to.
    #[serde(rename = "sessionId")]
    pub session_id: String,
    /// The signal payload.
    pub signal: Signal,
}

impl SignalEnvelope {
    /// True if this envelope is addressed to `peer_id` and did not
    /// originate from it.
    #[must_use]
    pub fn is_for(&self, peer_id: &str) -> bool {
        self.to_peer_id == peer_id && self.from_peer_id != peer_id
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn envelope(from: &str, to: &str) -> SignalEnvelope {
        SignalEnvelope {
            from_peer_id: from.to_string(),
            to_peer_id: to.to_string(),
            session_id: "session-1".to_string(),
            signal: Signal::Offer {
                sdp: "v=0\r\n".to_string(),
            },
        }
    }

    #[test]
    fn test_envelope_wire_shape() {
        let json = serde_json::to_value(envelope("alice", "bob")).unwrap();
        assert_eq!(json["fromPeerId"], "alice");
        assert_eq!(json["toPeerId"], "bob");
        assert_eq!(json["sessionId"], "session-1");
        assert_eq!(json["signal"]["type"], "offer");
    }

    #[test]
    fn test_is_for_filters_echo_and_misaddressed() {
        assert!(envelope("alice", "bob").is_for("bob"));
        // Echo: a peer's own message reflected back.
        assert!(!envelope("bob", "bob").is_for("bob"));
        // Addressed to somebody else.
        assert!(!envelope("alice", "carol").is_for("bob"));
    }
}
