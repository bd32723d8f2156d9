//! The offer/answer/candidate tagged union.

use serde::{Deserialize, Serialize};

/// An ICE candidate descriptor as exchanged over signaling.
///
/// Field names follow the conventional JSON shape so candidates survive a
/// round trip through non-Rust peers unchanged. Candidate order matters to
/// connectivity-check priority, so consumers must preserve arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// The candidate attribute line (`candidate:...`).
    pub candidate: String,
    /// Media stream identification tag, if present.
    #[serde(rename = "sdpMid", skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    /// Index of the media description this candidate belongs to.
    #[serde(rename = "sdpMLineIndex", skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
}

/// A single signaling message.
///
/// Serialized as a tagged union: `{"type": "offer", "sdp": ...}`,
/// `{"type": "answer", "sdp": ...}`, or
/// `{"type": "ice-candidate", "candidate": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Signal {
    /// An SDP offer starting (or restarting) negotiation.
    Offer {
        /// The session description, verbatim.
        sdp: String,
    },
    /// An SDP answer completing negotiation.
    Answer {
        /// The session description, verbatim.
        sdp: String,
    },
    /// A discovered network path descriptor.
    IceCandidate {
        /// The candidate descriptor.
        candidate: IceCandidate,
    },
}

impl Signal {
    /// Short name for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Signal::Offer { .. } => "offer",
            Signal::Answer { .. } => "answer",
            Signal::IceCandidate { .. } => "ice-candidate",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_wire_shape() {
        let signal = Signal::Offer {
            sdp: "v=0\r\n".to_string(),
        };
        let json = serde_json::to_value(&signal).unwrap();
        assert_eq!(json["type"], "offer");
        assert_eq!(json["sdp"], "v=0\r\n");
    }

    #[test]
    fn test_candidate_wire_shape() {
        let signal = Signal::IceCandidate {
            candidate: IceCandidate {
                candidate: "candidate:1 1 udp 2130706431 192.0.2.1 54321 typ host".to_string(),
                sdp_mid: Some("0".to_string()),
                sdp_mline_index: Some(0),
            },
        };
        let json = serde_json::to_value(&signal).unwrap();
        assert_eq!(json["type"], "ice-candidate");
        assert_eq!(json["candidate"]["sdpMid"], "0");
        assert_eq!(json["candidate"]["sdpMLineIndex"], 0);
    }

    #[test]
    fn test_answer_round_trip() {
        let signal = Signal::Answer {
            sdp: "v=0\r\na=setup:active\r\n".to_string(),
        };
        let json = serde_json::to_string(&signal).unwrap();
        let back: Signal = serde_json::from_str(&json).unwrap();
        assert_eq!(signal, back);
    }

    #[test]
    fn test_unknown_type_rejected() {
        let result = serde_json::from_str::<Signal>(r#"{"type": "bye"}"#);
        assert!(result.is_err());
    }
}
