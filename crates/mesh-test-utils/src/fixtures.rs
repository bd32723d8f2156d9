//! Static seam implementations and small test fixtures.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use mesh_controller::{
    ChannelError, MediaError, MediaSource, RosterProvider, SignalChannel, TrackHandle, TrackKind,
};
use signal_protocol::{RosterEntry, RosterSnapshot, SessionEvent, Signal};

/// An audio track fixture.
pub fn audio_track(id: &str) -> TrackHandle {
    TrackHandle {
        id: id.to_string(),
        kind: TrackKind::Audio,
    }
}

/// A video track fixture.
pub fn video_track(id: &str) -> TrackHandle {
    TrackHandle {
        id: id.to_string(),
        kind: TrackKind::Video,
    }
}

/// A media source serving a mutable in-memory track list.
pub struct StaticMedia {
    tracks: Mutex<Vec<TrackHandle>>,
}

impl StaticMedia {
    pub fn new(tracks: Vec<TrackHandle>) -> Self {
        StaticMedia {
            tracks: Mutex::new(tracks),
        }
    }

    /// No local tracks: the mesh negotiates receive-only.
    pub fn none() -> Self {
        Self::new(Vec::new())
    }

    /// Replace the track list; pair with `MeshHandle::tracks_changed`.
    pub fn set_tracks(&self, tracks: Vec<TrackHandle>) {
        *self.tracks.lock().expect("media lock poisoned") = tracks;
    }
}

#[async_trait]
impl MediaSource for StaticMedia {
    async fn current_tracks(&self) -> Result<Vec<TrackHandle>, MediaError> {
        Ok(self.tracks.lock().expect("media lock poisoned").clone())
    }
}

/// A roster provider serving a fixed snapshot.
pub struct StaticRoster {
    snapshot: RosterSnapshot,
}

impl StaticRoster {
    pub fn new(snapshot: RosterSnapshot) -> Self {
        StaticRoster { snapshot }
    }

    pub fn empty() -> Self {
        Self::new(RosterSnapshot::default())
    }

    /// A roster with the given peer IDs and no spotlight.
    pub fn with_peers(peer_ids: &[&str]) -> Self {
        Self::new(RosterSnapshot {
            participants: peer_ids
                .iter()
                .map(|id| RosterEntry {
                    peer_id: (*id).to_string(),
                    display_name: None,
                    joined_at: None,
                })
                .collect(),
            spotlighted_peer_id: None,
        })
    }
}

#[async_trait]
impl RosterProvider for StaticRoster {
    async fn fetch(&self) -> Result<RosterSnapshot, ChannelError> {
        Ok(self.snapshot.clone())
    }
}

/// A roster provider whose fetch always fails, for startup resilience
/// tests.
pub struct FailingRoster;

#[async_trait]
impl RosterProvider for FailingRoster {
    async fn fetch(&self) -> Result<RosterSnapshot, ChannelError> {
        Err(ChannelError::Metadata("roster unavailable".to_string()))
    }
}

/// A signal channel that records what it is asked to send.
///
/// Point-to-point sends come out of the returned receiver; broadcasts
/// accumulate and are read back with [`CapturingChannel::broadcasts`].
pub struct CapturingChannel {
    local_peer_id: String,
    session_id: String,
    sent_tx: mpsc::Sender<(String, Signal)>,
    broadcasts: Mutex<Vec<SessionEvent>>,
    fail_sends: Mutex<bool>,
}

impl CapturingChannel {
    pub fn new(
        local_peer_id: &str,
        session_id: &str,
    ) -> (Arc<Self>, mpsc::Receiver<(String, Signal)>) {
        let (sent_tx, sent_rx) = mpsc::channel(64);
        let channel = Arc::new(CapturingChannel {
            local_peer_id: local_peer_id.to_string(),
            session_id: session_id.to_string(),
            sent_tx,
            broadcasts: Mutex::new(Vec::new()),
            fail_sends: Mutex::new(false),
        });
        (channel, sent_rx)
    }

    /// Every session event broadcast so far.
    pub fn broadcasts(&self) -> Vec<SessionEvent> {
        self.broadcasts
            .lock()
            .expect("broadcast lock poisoned")
            .clone()
    }

    /// Make every subsequent point-to-point send fail.
    pub fn fail_sends(&self) {
        *self.fail_sends.lock().expect("send flag lock poisoned") = true;
    }
}

#[async_trait]
impl SignalChannel for CapturingChannel {
    fn local_peer_id(&self) -> &str {
        &self.local_peer_id
    }

    fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn send(&self, to_peer_id: &str, signal: Signal) -> Result<(), ChannelError> {
        if *self.fail_sends.lock().expect("send flag lock poisoned") {
            return Err(ChannelError::Send("injected send failure".to_string()));
        }
        self.sent_tx
            .send((to_peer_id.to_string(), signal))
            .await
            .map_err(|e| ChannelError::Send(e.to_string()))
    }

    async fn broadcast(&self, event: SessionEvent) -> Result<(), ChannelError> {
        self.broadcasts
            .lock()
            .expect("broadcast lock poisoned")
            .push(event);
        Ok(())
    }
}
