//! `MeshActor` - top-level orchestrator actor.
//!
//! The `MeshActor`:
//! - Owns the registry of peer actors, one per remote session member
//! - Dispatches inbound channel traffic to the right peer mailbox
//! - Reacts to membership changes (join creates, leave tears down)
//! - Sweeps the registry for peers stuck establishing (stall watchdog)
//! - Resets failed peers: destroy, then recreate after a short delay
//!
//! # Lifecycle
//!
//! 1. Spawned with the channel, connection factory, media source and
//!    roster endpoint
//! 2. Seeds the registry from the initial roster snapshot
//! 3. Runs until cancelled, the session ends, or the channel closes
//! 4. Shutdown cancels every peer actor and waits for them to stop

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::channel::{ChannelEvent, RosterProvider, SignalChannel};
use crate::config::MeshConfig;
use crate::connection::{ConnectionFactory, ConnectionState, NewConnection};
use crate::errors::MeshError;
use crate::media::{MediaSource, TrackHandle, TrackKind};
use signal_protocol::{SessionEvent, SignalEnvelope};

use super::messages::{
    MeshEvent, MeshMessage, MeshPeerInfo, MeshState, PeerReport, PeerReportKind, ResetReason,
};
use super::peer::{PeerActor, PeerActorHandle};

/// How long to wait for a peer actor to stop during teardown.
const PEER_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to the `MeshActor`.
#[derive(Clone, Debug)]
pub struct MeshHandle {
    sender: mpsc::Sender<MeshMessage>,
    cancel_token: CancellationToken,
    local_peer_id: String,
    session_id: String,
}

impl MeshHandle {
    /// Our own identity in the session.
    #[must_use]
    pub fn local_peer_id(&self) -> &str {
        &self.local_peer_id
    }

    /// The session this mesh belongs to.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Snapshot current mesh state.
    pub async fn state(&self) -> Result<MeshState, MeshError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MeshMessage::GetState { respond_to: tx })
            .await
            .map_err(|e| MeshError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| MeshError::Internal(format!("response receive failed: {e}")))
    }

    /// Notify the mesh that the local media set changed.
    pub async fn tracks_changed(&self) -> Result<(), MeshError> {
        self.sender
            .send(MeshMessage::TracksChanged)
            .await
            .map_err(|e| MeshError::Internal(format!("channel send failed: {e}")))
    }

    /// Swap the sender for `kind` on every peer without renegotiating.
    pub async fn replace_track(
        &self,
        kind: TrackKind,
        track: TrackHandle,
    ) -> Result<(), MeshError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MeshMessage::ReplaceTrack {
                kind,
                track,
                respond_to: tx,
            })
            .await
            .map_err(|e| MeshError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| MeshError::Internal(format!("response receive failed: {e}")))?
    }

    /// Spotlight a participant for every session member.
    pub async fn spotlight(&self, peer_id: String) -> Result<(), MeshError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MeshMessage::Spotlight {
                peer_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| MeshError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| MeshError::Internal(format!("response receive failed: {e}")))?
    }

    /// End the session for every member and shut the mesh down.
    pub async fn end_session(&self) -> Result<(), MeshError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MeshMessage::EndSession { respond_to: tx })
            .await
            .map_err(|e| MeshError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| MeshError::Internal(format!("response receive failed: {e}")))?
    }

    /// Cancel the mesh actor and everything under it.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the mesh is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// A peer actor tracked by the registry.
struct ManagedPeer {
    handle: PeerActorHandle,
    task_handle: JoinHandle<()>,
    /// Connection-instance generation; reports carrying any other value
    /// came from a torn-down predecessor and are dropped.
    generation: u64,
    /// When this peer session was (re)created. Resets restart the clock.
    created_at: Instant,
    /// Last connectivity state reported by the peer actor.
    connection_state: ConnectionState,
}

/// The `MeshActor` implementation.
pub struct MeshActor {
    local_peer_id: String,
    session_id: String,
    config: MeshConfig,
    /// Message receiver.
    receiver: mpsc::Receiver<MeshMessage>,
    /// Own sender, for delayed self-messages (peer respawn).
    self_sender: mpsc::Sender<MeshMessage>,
    /// Root cancellation token; peer actors get child tokens.
    cancel_token: CancellationToken,
    channel: Arc<dyn SignalChannel>,
    /// Inbound channel traffic.
    channel_events: mpsc::Receiver<ChannelEvent>,
    factory: Arc<dyn ConnectionFactory>,
    media: Arc<dyn MediaSource>,
    roster: Arc<dyn RosterProvider>,
    /// Peer registry, one entry per live peer session.
    peers: HashMap<String, ManagedPeer>,
    /// Monotonic counter stamping each connection instance.
    next_generation: u64,
    /// Current session members (excluding ourselves).
    members: HashSet<String>,
    /// Peers destroyed and awaiting their reconnect delay.
    pending_respawn: HashSet<String>,
    /// Upward reports from peer actors.
    reports_rx: mpsc::Receiver<PeerReport>,
    reports_tx: mpsc::Sender<PeerReport>,
    /// Outbound events to the embedding application.
    events_tx: mpsc::Sender<MeshEvent>,
    /// Cached local tracks, attached to every new peer.
    local_tracks: Vec<TrackHandle>,
    spotlighted_peer_id: Option<String>,
}

impl MeshActor {
    /// Spawn the mesh actor.
    ///
    /// Returns a handle, the outbound event stream, and the task join
    /// handle.
    pub fn spawn(
        config: MeshConfig,
        channel: Arc<dyn SignalChannel>,
        channel_events: mpsc::Receiver<ChannelEvent>,
        factory: Arc<dyn ConnectionFactory>,
        media: Arc<dyn MediaSource>,
        roster: Arc<dyn RosterProvider>,
    ) -> (MeshHandle, mpsc::Receiver<MeshEvent>, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(config.mesh_channel_buffer);
        let (events_tx, events_rx) = mpsc::channel(config.event_channel_buffer);
        let (reports_tx, reports_rx) = mpsc::channel(config.mesh_channel_buffer);
        let cancel_token = CancellationToken::new();

        let local_peer_id = channel.local_peer_id().to_string();
        let session_id = channel.session_id().to_string();

        let actor = Self {
            local_peer_id: local_peer_id.clone(),
            session_id: session_id.clone(),
            config,
            receiver,
            self_sender: sender.clone(),
            cancel_token: cancel_token.clone(),
            channel,
            channel_events,
            factory,
            media,
            roster,
            peers: HashMap::new(),
            next_generation: 0,
            members: HashSet::new(),
            pending_respawn: HashSet::new(),
            reports_rx,
            reports_tx,
            events_tx,
            local_tracks: Vec::new(),
            spotlighted_peer_id: None,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = MeshHandle {
            sender,
            cancel_token,
            local_peer_id,
            session_id,
        };

        (handle, events_rx, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(
        skip_all,
        name = "mesh.actor.mesh",
        fields(session_id = %self.session_id, local_peer_id = %self.local_peer_id)
    )]
    async fn run(mut self) {
        info!(
            target: "mesh.actor.mesh",
            session_id = %self.session_id,
            local_peer_id = %self.local_peer_id,
            "MeshActor started"
        );

        self.startup().await;

        let mut watchdog = interval(self.config.watchdog_interval);
        watchdog.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                // Handle cancellation
                () = self.cancel_token.cancelled() => {
                    self.graceful_shutdown().await;
                    break;
                }

                // Stall watchdog sweep
                _ = watchdog.tick() => {
                    self.check_stalled_peers().await;
                }

                // Handle requests
                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message).await,
                        None => {
                            debug!(
                                target: "mesh.actor.mesh",
                                "MeshActor channel closed, exiting"
                            );
                            self.graceful_shutdown().await;
                            break;
                        }
                    }
                }

                // Inbound channel traffic
                event = self.channel_events.recv() => {
                    match event {
                        Some(event) => self.handle_channel_event(event).await,
                        None => {
                            warn!(
                                target: "mesh.actor.mesh",
                                session_id = %self.session_id,
                                "signal channel closed, shutting down"
                            );
                            self.cancel_token.cancel();
                        }
                    }
                }

                // Upward reports from peer actors
                Some(report) = self.reports_rx.recv() => {
                    self.handle_report(report).await;
                }
            }
        }

        info!(
            target: "mesh.actor.mesh",
            session_id = %self.session_id,
            "MeshActor stopped"
        );
    }

    /// Enumerate local media and seed the registry from the roster.
    async fn startup(&mut self) {
        match self.media.current_tracks().await {
            Ok(tracks) => self.local_tracks = tracks,
            Err(e) => {
                // Non-fatal: negotiate receive-only until tracks appear.
                warn!(
                    target: "mesh.actor.mesh",
                    error = %e,
                    "media enumeration failed, starting without local tracks"
                );
            }
        }

        match self.roster.fetch().await {
            Ok(snapshot) => {
                for entry in snapshot.participants {
                    if entry.peer_id == self.local_peer_id {
                        continue;
                    }
                    self.members.insert(entry.peer_id.clone());
                    self.create_peer(&entry.peer_id).await;
                }
                if let Some(peer_id) = snapshot.spotlighted_peer_id {
                    self.spotlighted_peer_id = Some(peer_id.clone());
                    self.emit(MeshEvent::Spotlight { peer_id });
                }
            }
            Err(e) => {
                // Non-fatal: members will surface through join events.
                warn!(
                    target: "mesh.actor.mesh",
                    error = %e,
                    "roster fetch failed, starting with empty roster"
                );
            }
        }
    }

    async fn handle_message(&mut self, message: MeshMessage) {
        match message {
            MeshMessage::TracksChanged => self.handle_tracks_changed().await,
            MeshMessage::ReplaceTrack {
                kind,
                track,
                respond_to,
            } => {
                self.local_tracks.retain(|t| t.kind != kind);
                self.local_tracks.push(track.clone());
                for peer in self.peers.values() {
                    if let Err(e) = peer.handle.replace_track(kind, track.clone()).await {
                        warn!(
                            target: "mesh.actor.mesh",
                            peer_id = peer.handle.peer_id(),
                            error = %e,
                            "failed to replace track"
                        );
                    }
                }
                let _ = respond_to.send(Ok(()));
            }
            MeshMessage::Spotlight {
                peer_id,
                respond_to,
            } => {
                let result = self
                    .channel
                    .broadcast(SessionEvent::Spotlight {
                        peer_id: peer_id.clone(),
                    })
                    .await
                    .map_err(MeshError::from);
                if result.is_ok() {
                    self.spotlighted_peer_id = Some(peer_id.clone());
                    self.emit(MeshEvent::Spotlight { peer_id });
                }
                let _ = respond_to.send(result);
            }
            MeshMessage::EndSession { respond_to } => {
                let result = self
                    .channel
                    .broadcast(SessionEvent::SessionEnded)
                    .await
                    .map_err(MeshError::from);
                let _ = respond_to.send(result);
                // The session ends locally even if the broadcast failed.
                self.emit(MeshEvent::SessionEnded);
                self.cancel_token.cancel();
            }
            MeshMessage::GetState { respond_to } => {
                let mut peers: Vec<MeshPeerInfo> = self
                    .peers
                    .values()
                    .map(|p| MeshPeerInfo {
                        peer_id: p.handle.peer_id().to_string(),
                        connection: p.connection_state,
                        age: p.created_at.elapsed(),
                    })
                    .collect();
                peers.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
                let _ = respond_to.send(MeshState {
                    local_peer_id: self.local_peer_id.clone(),
                    session_id: self.session_id.clone(),
                    peers,
                    spotlighted_peer_id: self.spotlighted_peer_id.clone(),
                });
            }
            MeshMessage::RespawnPeer { peer_id } => {
                self.pending_respawn.remove(&peer_id);
                if !self.members.contains(&peer_id) {
                    debug!(
                        target: "mesh.actor.mesh",
                        peer_id = %peer_id,
                        "respawn suppressed: peer left during reconnect delay"
                    );
                    return;
                }
                self.create_peer(&peer_id).await;
            }
        }
    }

    async fn handle_tracks_changed(&mut self) {
        match self.media.current_tracks().await {
            Ok(tracks) => {
                let added: Vec<TrackHandle> = tracks
                    .iter()
                    .filter(|t| !self.local_tracks.contains(t))
                    .cloned()
                    .collect();
                let removed: Vec<TrackHandle> = self
                    .local_tracks
                    .iter()
                    .filter(|t| !tracks.contains(t))
                    .cloned()
                    .collect();
                self.local_tracks = tracks;
                for track in removed {
                    for peer in self.peers.values() {
                        if let Err(e) = peer.handle.remove_track(track.clone()).await {
                            warn!(
                                target: "mesh.actor.mesh",
                                peer_id = peer.handle.peer_id(),
                                error = %e,
                                "failed to remove track"
                            );
                        }
                    }
                }
                for track in added {
                    for peer in self.peers.values() {
                        if let Err(e) = peer.handle.add_track(track.clone()).await {
                            warn!(
                                target: "mesh.actor.mesh",
                                peer_id = peer.handle.peer_id(),
                                error = %e,
                                "failed to add track"
                            );
                        }
                    }
                }
            }
            Err(e) => {
                warn!(
                    target: "mesh.actor.mesh",
                    error = %e,
                    "media enumeration failed, keeping current tracks"
                );
            }
        }
    }

    async fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Signal(envelope) => self.handle_signal(envelope).await,
            ChannelEvent::MemberJoined { peer_id } => {
                if peer_id == self.local_peer_id {
                    return;
                }
                if self.members.insert(peer_id.clone()) {
                    info!(
                        target: "mesh.actor.mesh",
                        peer_id = %peer_id,
                        "member joined"
                    );
                }
                self.create_peer(&peer_id).await;
            }
            ChannelEvent::MemberLeft { peer_id } => {
                if peer_id == self.local_peer_id {
                    return;
                }
                info!(
                    target: "mesh.actor.mesh",
                    peer_id = %peer_id,
                    "member left"
                );
                self.members.remove(&peer_id);
                self.pending_respawn.remove(&peer_id);
                self.destroy_peer(&peer_id);
                if self.spotlighted_peer_id.as_deref() == Some(peer_id.as_str()) {
                    self.spotlighted_peer_id = None;
                }
                self.emit(MeshEvent::PeerLeft { peer_id });
            }
            ChannelEvent::Session(SessionEvent::SessionEnded) => {
                info!(
                    target: "mesh.actor.mesh",
                    session_id = %self.session_id,
                    "session ended"
                );
                self.emit(MeshEvent::SessionEnded);
                self.cancel_token.cancel();
            }
            ChannelEvent::Session(SessionEvent::Spotlight { peer_id }) => {
                self.spotlighted_peer_id = Some(peer_id.clone());
                self.emit(MeshEvent::Spotlight { peer_id });
            }
        }
    }

    /// Route an inbound envelope to the owning peer actor, creating the
    /// peer session on first contact.
    async fn handle_signal(&mut self, envelope: SignalEnvelope) {
        if !envelope.is_for(&self.local_peer_id) {
            debug!(
                target: "mesh.actor.mesh",
                from = %envelope.from_peer_id,
                to = %envelope.to_peer_id,
                "envelope dropped: echo or misaddressed"
            );
            return;
        }
        if envelope.session_id != self.session_id {
            debug!(
                target: "mesh.actor.mesh",
                session_id = %envelope.session_id,
                "envelope dropped: wrong session"
            );
            return;
        }

        let peer_id = envelope.from_peer_id.clone();
        if self.pending_respawn.contains(&peer_id) {
            // The old session is gone and the new one is not up yet;
            // the remote will renegotiate against the fresh connection.
            debug!(
                target: "mesh.actor.mesh",
                peer_id = %peer_id,
                kind = envelope.signal.kind(),
                "signal dropped during reconnect delay"
            );
            return;
        }
        if !self.peers.contains_key(&peer_id) {
            // A signal can outrun the membership event for its sender.
            self.members.insert(peer_id.clone());
            self.create_peer(&peer_id).await;
        }

        if let Some(peer) = self.peers.get(&peer_id) {
            if let Err(e) = peer.handle.remote(envelope.signal).await {
                warn!(
                    target: "mesh.actor.mesh",
                    peer_id = %peer_id,
                    error = %e,
                    "failed to dispatch signal"
                );
            }
        }
    }

    async fn handle_report(&mut self, report: PeerReport) {
        // A report can sit in the queue across a reset; one stamped with
        // an older generation belongs to a torn-down connection instance
        // and must not touch the replacement.
        match self.peers.get(&report.peer_id) {
            Some(peer) if peer.generation == report.generation => {}
            _ => {
                debug!(
                    target: "mesh.actor.mesh",
                    peer_id = %report.peer_id,
                    generation = report.generation,
                    "report dropped: stale connection instance"
                );
                return;
            }
        }

        match report.kind {
            PeerReportKind::StateChanged(state) => {
                let mut newly_connected = false;
                if let Some(peer) = self.peers.get_mut(&report.peer_id) {
                    newly_connected = state == ConnectionState::Connected
                        && peer.connection_state != ConnectionState::Connected;
                    peer.connection_state = state;
                }
                if newly_connected {
                    info!(
                        target: "mesh.actor.mesh",
                        peer_id = %report.peer_id,
                        "peer connected"
                    );
                    self.emit(MeshEvent::PeerConnected {
                        peer_id: report.peer_id,
                    });
                }
            }
            PeerReportKind::RemoteTrack(track) => {
                self.emit(MeshEvent::RemoteTrack {
                    peer_id: report.peer_id,
                    track,
                });
            }
            PeerReportKind::ResetNeeded(reason) => {
                warn!(
                    target: "mesh.actor.mesh",
                    peer_id = %report.peer_id,
                    reason = reason.as_str(),
                    "peer reset requested"
                );
                self.reset_peer(&report.peer_id, reason).await;
            }
        }
    }

    /// Sweep for peers that have sat in an establishing state past the
    /// stall threshold. Each sweep resets a given peer at most once:
    /// resetting removes it from the registry until its respawn.
    async fn check_stalled_peers(&mut self) {
        let stalled: Vec<String> = self
            .peers
            .iter()
            .filter(|(_, p)| {
                p.connection_state.is_establishing()
                    && p.created_at.elapsed() >= self.config.stall_threshold
            })
            .map(|(id, _)| id.clone())
            .collect();

        for peer_id in stalled {
            warn!(
                target: "mesh.actor.mesh",
                peer_id = %peer_id,
                "peer stalled establishing, resetting"
            );
            self.reset_peer(&peer_id, ResetReason::Stalled).await;
        }
    }

    /// Tear a peer down and schedule its recreation after the reconnect
    /// delay. The respawn is suppressed if the member leaves meanwhile.
    async fn reset_peer(&mut self, peer_id: &str, reason: ResetReason) {
        if !self.peers.contains_key(peer_id) {
            // Already torn down (e.g. reset report raced the watchdog).
            return;
        }
        self.destroy_peer(peer_id);
        self.emit(MeshEvent::PeerReconnecting {
            peer_id: peer_id.to_string(),
            reason,
        });
        self.schedule_respawn(peer_id);
    }

    fn schedule_respawn(&mut self, peer_id: &str) {
        if !self.pending_respawn.insert(peer_id.to_string()) {
            return;
        }
        let sender = self.self_sender.clone();
        let delay = self.config.reconnect_delay;
        let peer_id = peer_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = sender.send(MeshMessage::RespawnPeer { peer_id }).await;
        });
    }

    /// Create a peer session and attach the cached local tracks.
    async fn create_peer(&mut self, peer_id: &str) {
        if self.peers.contains_key(peer_id) {
            return;
        }

        match self.factory.create(peer_id).await {
            Ok(NewConnection { connection, events }) => {
                self.next_generation += 1;
                let generation = self.next_generation;
                let (handle, task_handle) = PeerActor::spawn(
                    peer_id.to_string(),
                    generation,
                    Arc::clone(&self.channel),
                    connection,
                    events,
                    self.reports_tx.clone(),
                    self.cancel_token.child_token(),
                    &self.config,
                );
                for track in self.local_tracks.clone() {
                    if let Err(e) = handle.add_track(track).await {
                        warn!(
                            target: "mesh.actor.mesh",
                            peer_id = %peer_id,
                            error = %e,
                            "failed to attach track to new peer"
                        );
                    }
                }
                info!(
                    target: "mesh.actor.mesh",
                    peer_id = %peer_id,
                    "peer session created"
                );
                self.peers.insert(
                    peer_id.to_string(),
                    ManagedPeer {
                        handle,
                        task_handle,
                        generation,
                        created_at: Instant::now(),
                        connection_state: ConnectionState::New,
                    },
                );
            }
            Err(e) => {
                warn!(
                    target: "mesh.actor.mesh",
                    peer_id = %peer_id,
                    error = %e,
                    "connection creation failed, retrying after delay"
                );
                self.emit(MeshEvent::PeerReconnecting {
                    peer_id: peer_id.to_string(),
                    reason: ResetReason::CreateFailed,
                });
                self.schedule_respawn(peer_id);
            }
        }
    }

    /// Remove a peer from the registry and stop its actor. Queued mail
    /// for the peer is dropped with it.
    fn destroy_peer(&mut self, peer_id: &str) {
        if let Some(peer) = self.peers.remove(peer_id) {
            peer.handle.cancel();
            let task = peer.task_handle;
            let peer_id = peer_id.to_string();
            tokio::spawn(async move {
                if tokio::time::timeout(PEER_STOP_TIMEOUT, task).await.is_err() {
                    warn!(
                        target: "mesh.actor.mesh",
                        peer_id = %peer_id,
                        "peer actor did not stop within timeout"
                    );
                }
            });
        }
    }

    async fn graceful_shutdown(&mut self) {
        info!(
            target: "mesh.actor.mesh",
            session_id = %self.session_id,
            peer_count = self.peers.len(),
            "MeshActor shutting down"
        );

        let mut tasks = Vec::new();
        for (_, peer) in self.peers.drain() {
            peer.handle.cancel();
            tasks.push(peer.task_handle);
        }
        for task in tasks {
            if tokio::time::timeout(PEER_STOP_TIMEOUT, task).await.is_err() {
                warn!(
                    target: "mesh.actor.mesh",
                    "peer actor did not stop within shutdown timeout"
                );
            }
        }
    }

    fn emit(&self, event: MeshEvent) {
        if let Err(e) = self.events_tx.try_send(event) {
            debug!(
                target: "mesh.actor.mesh",
                error = %e,
                "mesh event dropped"
            );
        }
    }
}
