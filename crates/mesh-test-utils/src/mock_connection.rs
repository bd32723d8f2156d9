//! Scripted peer connection for negotiation tests.
//!
//! `MockConnection` enforces the offer/answer signaling state machine
//! (wrong-state operations fail with `InvalidState`, like a real engine)
//! and records every operation so tests can assert on ordering. Failure
//! injection hooks cover rollback, remote descriptions, candidates and
//! connection creation.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use mesh_controller::{
    ConnectionError, ConnectionEvent, ConnectionFactory, ConnectionState, NewConnection,
    PeerConnection, SdpKind, SessionDescription, SignalingState, TrackHandle, TrackKind,
};
use signal_protocol::IceCandidate;

/// A recorded connection operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOp {
    CreateOffer,
    CreateAnswer,
    SetLocalOffer,
    SetLocalAnswer,
    SetRemoteOffer,
    SetRemoteAnswer,
    AddCandidate(String),
    Rollback,
    AddTrack(String),
    RemoveTrack(String),
    ReplaceTrack(String),
    Close,
}

struct MockState {
    ops: Vec<MockOp>,
    signaling: SignalingState,
    connection: ConnectionState,
    has_remote_description: bool,
    sdp_seq: u32,
    fail_rollback: bool,
    fail_remote_descriptions: u8,
    rejected_candidates: HashSet<String>,
    applied_candidates: Vec<String>,
    negotiation_needed_on_track_change: bool,
}

/// A scripted in-memory peer connection.
///
/// Clones share state, so tests can keep a clone for steering and
/// inspection after handing the boxed original to an actor.
#[derive(Clone)]
pub struct MockConnection {
    state: Arc<Mutex<MockState>>,
    events_tx: mpsc::Sender<ConnectionEvent>,
}

impl MockConnection {
    /// Create a mock connection and its event stream.
    pub fn new() -> (Self, mpsc::Receiver<ConnectionEvent>) {
        let (events_tx, events_rx) = mpsc::channel(64);
        let conn = MockConnection {
            state: Arc::new(Mutex::new(MockState {
                ops: Vec::new(),
                signaling: SignalingState::Stable,
                connection: ConnectionState::New,
                has_remote_description: false,
                sdp_seq: 0,
                fail_rollback: false,
                fail_remote_descriptions: 0,
                rejected_candidates: HashSet::new(),
                applied_candidates: Vec::new(),
                negotiation_needed_on_track_change: true,
            })),
            events_tx,
        };
        (conn, events_rx)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("mock state lock poisoned")
    }

    /// Every operation performed so far, in order.
    pub fn ops(&self) -> Vec<MockOp> {
        self.lock().ops.clone()
    }

    /// Candidates successfully applied, in order.
    pub fn applied_candidates(&self) -> Vec<String> {
        self.lock().applied_candidates.clone()
    }

    /// Current signaling state.
    pub fn signaling(&self) -> SignalingState {
        self.lock().signaling
    }

    /// Make every subsequent rollback fail.
    pub fn fail_rollback(&self) {
        self.lock().fail_rollback = true;
    }

    /// Make the next `count` remote descriptions fail with an
    /// invalid-state error.
    pub fn fail_remote_descriptions(&self, count: u8) {
        self.lock().fail_remote_descriptions = count;
    }

    /// Reject a specific candidate when it is applied.
    pub fn reject_candidate(&self, candidate: &str) {
        self.lock().rejected_candidates.insert(candidate.to_string());
    }

    /// Stop emitting negotiation-needed events on track changes.
    pub fn quiet_track_changes(&self) {
        self.lock().negotiation_needed_on_track_change = false;
    }

    /// Push an event into the connection's event stream. State-change
    /// events also update the state the getters report.
    pub async fn emit(&self, event: ConnectionEvent) {
        {
            let mut state = self.lock();
            match &event {
                ConnectionEvent::ConnectionStateChanged(s) => state.connection = *s,
                ConnectionEvent::SignalingStateChanged(s) => state.signaling = *s,
                _ => {}
            }
        }
        self.events_tx
            .send(event)
            .await
            .expect("mock event receiver dropped");
    }
}

#[async_trait]
impl PeerConnection for MockConnection {
    async fn create_offer(&self) -> Result<SessionDescription, ConnectionError> {
        let mut state = self.lock();
        state.sdp_seq += 1;
        state.ops.push(MockOp::CreateOffer);
        Ok(SessionDescription::offer(format!(
            "v=0 mock-offer-{}",
            state.sdp_seq
        )))
    }

    async fn create_answer(&self) -> Result<SessionDescription, ConnectionError> {
        let mut state = self.lock();
        if state.signaling != SignalingState::HaveRemoteOffer {
            return Err(ConnectionError::InvalidState(format!(
                "create_answer in {}",
                state.signaling.as_str()
            )));
        }
        state.sdp_seq += 1;
        state.ops.push(MockOp::CreateAnswer);
        Ok(SessionDescription::answer(format!(
            "v=0 mock-answer-{}",
            state.sdp_seq
        )))
    }

    async fn set_local_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), ConnectionError> {
        let mut state = self.lock();
        match desc.kind {
            SdpKind::Offer => {
                if state.signaling != SignalingState::Stable {
                    return Err(ConnectionError::InvalidState(format!(
                        "local offer in {}",
                        state.signaling.as_str()
                    )));
                }
                state.signaling = SignalingState::HaveLocalOffer;
                state.ops.push(MockOp::SetLocalOffer);
            }
            SdpKind::Answer => {
                if state.signaling != SignalingState::HaveRemoteOffer {
                    return Err(ConnectionError::InvalidState(format!(
                        "local answer in {}",
                        state.signaling.as_str()
                    )));
                }
                state.signaling = SignalingState::Stable;
                state.ops.push(MockOp::SetLocalAnswer);
            }
        }
        Ok(())
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), ConnectionError> {
        let mut state = self.lock();
        if state.fail_remote_descriptions > 0 {
            state.fail_remote_descriptions -= 1;
            return Err(ConnectionError::InvalidState(
                "injected remote description failure".to_string(),
            ));
        }
        match desc.kind {
            SdpKind::Offer => {
                if state.signaling != SignalingState::Stable {
                    return Err(ConnectionError::InvalidState(format!(
                        "remote offer in {}",
                        state.signaling.as_str()
                    )));
                }
                state.signaling = SignalingState::HaveRemoteOffer;
                state.ops.push(MockOp::SetRemoteOffer);
            }
            SdpKind::Answer => {
                if state.signaling != SignalingState::HaveLocalOffer {
                    return Err(ConnectionError::InvalidState(format!(
                        "remote answer in {}",
                        state.signaling.as_str()
                    )));
                }
                state.signaling = SignalingState::Stable;
                state.ops.push(MockOp::SetRemoteAnswer);
            }
        }
        state.has_remote_description = true;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), ConnectionError> {
        let mut state = self.lock();
        if !state.has_remote_description {
            return Err(ConnectionError::InvalidState(
                "candidate before remote description".to_string(),
            ));
        }
        if state.rejected_candidates.contains(&candidate.candidate) {
            return Err(ConnectionError::Failed(format!(
                "candidate rejected: {}",
                candidate.candidate
            )));
        }
        state.ops.push(MockOp::AddCandidate(candidate.candidate.clone()));
        state.applied_candidates.push(candidate.candidate);
        Ok(())
    }

    async fn rollback(&self) -> Result<(), ConnectionError> {
        let mut state = self.lock();
        if state.fail_rollback {
            return Err(ConnectionError::Failed(
                "injected rollback failure".to_string(),
            ));
        }
        state.signaling = SignalingState::Stable;
        state.ops.push(MockOp::Rollback);
        Ok(())
    }

    async fn add_track(&self, track: TrackHandle) -> Result<(), ConnectionError> {
        let fire = {
            let mut state = self.lock();
            state.ops.push(MockOp::AddTrack(track.id));
            state.negotiation_needed_on_track_change
        };
        if fire {
            // try_send: the owning actor drains this stream itself.
            let _ = self.events_tx.try_send(ConnectionEvent::NegotiationNeeded);
        }
        Ok(())
    }

    async fn remove_track(&self, track: TrackHandle) -> Result<(), ConnectionError> {
        let fire = {
            let mut state = self.lock();
            state.ops.push(MockOp::RemoveTrack(track.id));
            state.negotiation_needed_on_track_change
        };
        if fire {
            let _ = self.events_tx.try_send(ConnectionEvent::NegotiationNeeded);
        }
        Ok(())
    }

    async fn replace_track(
        &self,
        _kind: TrackKind,
        track: TrackHandle,
    ) -> Result<(), ConnectionError> {
        self.lock().ops.push(MockOp::ReplaceTrack(track.id));
        Ok(())
    }

    fn signaling_state(&self) -> SignalingState {
        self.lock().signaling
    }

    fn connection_state(&self) -> ConnectionState {
        self.lock().connection
    }

    fn has_remote_description(&self) -> bool {
        self.lock().has_remote_description
    }

    async fn close(&self) {
        let mut state = self.lock();
        state.connection = ConnectionState::Closed;
        state.ops.push(MockOp::Close);
    }
}

/// Factory producing [`MockConnection`]s and remembering every instance
/// it created, keyed by peer ID. Tests assert on instance counts to
/// verify reset behavior.
pub struct MockConnectionFactory {
    created: Mutex<Vec<(String, MockConnection)>>,
    fail_next: Mutex<usize>,
}

impl MockConnectionFactory {
    pub fn new() -> Self {
        MockConnectionFactory {
            created: Mutex::new(Vec::new()),
            fail_next: Mutex::new(0),
        }
    }

    /// Make the next `count` `create` calls fail.
    pub fn fail_next_creates(&self, count: usize) {
        *self.fail_next.lock().expect("factory lock poisoned") = count;
    }

    /// How many connections were created for `peer_id`.
    pub fn created_count(&self, peer_id: &str) -> usize {
        self.created
            .lock()
            .expect("factory lock poisoned")
            .iter()
            .filter(|(id, _)| id == peer_id)
            .count()
    }

    /// Total connections created across all peers.
    pub fn total_created(&self) -> usize {
        self.created.lock().expect("factory lock poisoned").len()
    }

    /// The most recently created connection for `peer_id`.
    pub fn latest(&self, peer_id: &str) -> Option<MockConnection> {
        self.created
            .lock()
            .expect("factory lock poisoned")
            .iter()
            .rev()
            .find(|(id, _)| id == peer_id)
            .map(|(_, conn)| conn.clone())
    }
}

impl Default for MockConnectionFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectionFactory for MockConnectionFactory {
    async fn create(&self, peer_id: &str) -> Result<NewConnection, ConnectionError> {
        {
            let mut fail_next = self.fail_next.lock().expect("factory lock poisoned");
            if *fail_next > 0 {
                *fail_next -= 1;
                return Err(ConnectionError::Failed(
                    "injected create failure".to_string(),
                ));
            }
        }
        let (conn, events) = MockConnection::new();
        self.created
            .lock()
            .expect("factory lock poisoned")
            .push((peer_id.to_string(), conn.clone()));
        Ok(NewConnection {
            connection: Box::new(conn),
            events,
        })
    }
}
