//! `PeerActor` - per-remote-peer negotiation actor.
//!
//! Each `PeerActor`:
//! - Owns exactly one peer connection and its event stream
//! - Processes signals strictly in mailbox order (serialized negotiation)
//! - Buffers remote candidates until a remote description is applied
//! - Resolves offer glare by rolling back its own pending offer
//! - Escalates unrecoverable situations to the mesh actor as reset reports
//!
//! # Lifecycle
//!
//! 1. Created when a member joins (or on first inbound signal from an
//!    unknown peer)
//! 2. Runs until the member leaves, the mesh resets it, or the session ends
//! 3. Cancellation via child token propagates from the mesh actor;
//!    teardown closes the connection and drops any queued mail

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::channel::SignalChannel;
use crate::config::MeshConfig;
use crate::connection::{
    ConnectionEvent, ConnectionState, PeerConnection, SessionDescription, SignalingState,
};
use crate::errors::MeshError;
use signal_protocol::{IceCandidate, Signal};

use super::messages::{
    NegotiationState, PeerMessage, PeerReport, PeerReportKind, PeerSnapshot, ResetReason,
};

/// Consecutive remote-description failures tolerated before the peer is
/// declared diverged and reset.
const MAX_APPLY_FAILURES: u8 = 2;

/// Handle to a `PeerActor`.
#[derive(Clone, Debug)]
pub struct PeerActorHandle {
    sender: mpsc::Sender<PeerMessage>,
    cancel_token: CancellationToken,
    peer_id: String,
}

impl PeerActorHandle {
    /// Get the remote peer ID.
    #[must_use]
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Ask the actor to start a renegotiation (subject to the cooldown
    /// and in-flight guards).
    pub async fn negotiate(&self) -> Result<(), MeshError> {
        self.sender
            .send(PeerMessage::Negotiate)
            .await
            .map_err(|e| MeshError::Internal(format!("channel send failed: {e}")))
    }

    /// Deliver an inbound signal from the remote peer.
    pub async fn remote(&self, signal: Signal) -> Result<(), MeshError> {
        self.sender
            .send(PeerMessage::Remote(signal))
            .await
            .map_err(|e| MeshError::Internal(format!("channel send failed: {e}")))
    }

    /// Attach a local track to this peer's connection.
    pub async fn add_track(&self, track: crate::media::TrackHandle) -> Result<(), MeshError> {
        self.sender
            .send(PeerMessage::AddTrack(track))
            .await
            .map_err(|e| MeshError::Internal(format!("channel send failed: {e}")))
    }

    /// Swap the sender for a track kind without renegotiating.
    pub async fn replace_track(
        &self,
        kind: crate::media::TrackKind,
        track: crate::media::TrackHandle,
    ) -> Result<(), MeshError> {
        self.sender
            .send(PeerMessage::ReplaceTrack { kind, track })
            .await
            .map_err(|e| MeshError::Internal(format!("channel send failed: {e}")))
    }

    /// Detach a local track that is no longer captured.
    pub async fn remove_track(&self, track: crate::media::TrackHandle) -> Result<(), MeshError> {
        self.sender
            .send(PeerMessage::RemoveTrack(track))
            .await
            .map_err(|e| MeshError::Internal(format!("channel send failed: {e}")))
    }

    /// Snapshot the peer's negotiation state.
    pub async fn snapshot(&self) -> Result<PeerSnapshot, MeshError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(PeerMessage::GetSnapshot { respond_to: tx })
            .await
            .map_err(|e| MeshError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| MeshError::Internal(format!("response receive failed: {e}")))
    }

    /// Cancel the peer actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// The `PeerActor` implementation.
pub struct PeerActor {
    /// Remote peer ID.
    peer_id: String,
    /// Connection-instance generation, echoed in every report.
    generation: u64,
    /// Message receiver.
    receiver: mpsc::Receiver<PeerMessage>,
    /// Cancellation token (child of the mesh actor's token).
    cancel_token: CancellationToken,
    /// Outbound signal channel.
    channel: Arc<dyn SignalChannel>,
    /// The owned connection.
    connection: Box<dyn PeerConnection>,
    /// Event stream from the connection.
    conn_events: mpsc::Receiver<ConnectionEvent>,
    /// Set once the connection's event stream ends.
    events_closed: bool,
    /// Report channel back to the mesh actor.
    reports: mpsc::Sender<PeerReport>,
    /// Minimum gap between locally initiated offers.
    offer_cooldown: Duration,
    /// Deadline budget for an answer after sending an offer.
    offer_timeout: Duration,
    /// Where negotiation currently stands.
    negotiation: NegotiationState,
    /// When the last local offer was sent.
    last_offer_at: Option<Instant>,
    /// Armed while a local offer awaits its answer.
    offer_deadline: Option<Instant>,
    /// Remote candidates held back until a remote description exists.
    pending_candidates: Vec<IceCandidate>,
    /// Consecutive remote-description apply failures.
    apply_failures: u8,
}

impl PeerActor {
    /// Spawn a new peer actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        peer_id: String,
        generation: u64,
        channel: Arc<dyn SignalChannel>,
        connection: Box<dyn PeerConnection>,
        conn_events: mpsc::Receiver<ConnectionEvent>,
        reports: mpsc::Sender<PeerReport>,
        cancel_token: CancellationToken,
        config: &MeshConfig,
    ) -> (PeerActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(config.peer_channel_buffer);

        let actor = Self {
            peer_id: peer_id.clone(),
            generation,
            receiver,
            cancel_token: cancel_token.clone(),
            channel,
            connection,
            conn_events,
            events_closed: false,
            reports,
            offer_cooldown: config.offer_cooldown,
            offer_timeout: config.offer_timeout,
            negotiation: NegotiationState::Idle,
            last_offer_at: None,
            offer_deadline: None,
            pending_candidates: Vec::new(),
            apply_failures: 0,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = PeerActorHandle {
            sender,
            cancel_token,
            peer_id,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "mesh.actor.peer", fields(peer_id = %self.peer_id))]
    async fn run(mut self) {
        debug!(
            target: "mesh.actor.peer",
            peer_id = %self.peer_id,
            "PeerActor started"
        );

        loop {
            let deadline = self.offer_deadline;
            tokio::select! {
                // Handle cancellation
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "mesh.actor.peer",
                        peer_id = %self.peer_id,
                        "PeerActor received cancellation signal"
                    );
                    self.connection.close().await;
                    break;
                }

                // Handle mailbox messages (strictly in order)
                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message).await,
                        None => {
                            debug!(
                                target: "mesh.actor.peer",
                                peer_id = %self.peer_id,
                                "PeerActor channel closed, exiting"
                            );
                            self.connection.close().await;
                            break;
                        }
                    }
                }

                // Handle connection events
                event = self.conn_events.recv(), if !self.events_closed => {
                    match event {
                        Some(event) => self.handle_connection_event(event).await,
                        None => {
                            debug!(
                                target: "mesh.actor.peer",
                                peer_id = %self.peer_id,
                                "connection event stream ended"
                            );
                            self.events_closed = true;
                        }
                    }
                }

                // Offer timeout: the answer never arrived
                () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                        if deadline.is_some() => {
                    self.handle_offer_timeout().await;
                }
            }
        }

        info!(
            target: "mesh.actor.peer",
            peer_id = %self.peer_id,
            "PeerActor stopped"
        );
    }

    async fn handle_message(&mut self, message: PeerMessage) {
        match message {
            PeerMessage::Negotiate => self.maybe_negotiate().await,
            PeerMessage::Remote(signal) => self.handle_remote_signal(signal).await,
            PeerMessage::AddTrack(track) => {
                if let Err(e) = self.connection.add_track(track).await {
                    warn!(
                        target: "mesh.actor.peer",
                        peer_id = %self.peer_id,
                        error = %e,
                        "failed to add track"
                    );
                }
            }
            PeerMessage::ReplaceTrack { kind, track } => {
                if let Err(e) = self.connection.replace_track(kind, track).await {
                    warn!(
                        target: "mesh.actor.peer",
                        peer_id = %self.peer_id,
                        kind = kind.as_str(),
                        error = %e,
                        "failed to replace track"
                    );
                }
            }
            PeerMessage::RemoveTrack(track) => {
                if let Err(e) = self.connection.remove_track(track).await {
                    warn!(
                        target: "mesh.actor.peer",
                        peer_id = %self.peer_id,
                        error = %e,
                        "failed to remove track"
                    );
                }
            }
            PeerMessage::GetSnapshot { respond_to } => {
                let snapshot = PeerSnapshot {
                    peer_id: self.peer_id.clone(),
                    negotiation: self.negotiation,
                    signaling: self.connection.signaling_state(),
                    connection: self.connection.connection_state(),
                    buffered_candidates: self.pending_candidates.len(),
                };
                let _ = respond_to.send(snapshot);
            }
        }
    }

    async fn handle_remote_signal(&mut self, signal: Signal) {
        match signal {
            Signal::Offer { sdp } => self.handle_remote_offer(sdp).await,
            Signal::Answer { sdp } => self.handle_remote_answer(sdp).await,
            Signal::IceCandidate { candidate } => self.handle_remote_candidate(candidate).await,
        }
    }

    /// Start a renegotiation unless one is in flight, the cooldown has
    /// not elapsed, or signaling is not stable.
    async fn maybe_negotiate(&mut self) {
        if self.negotiation != NegotiationState::Idle {
            debug!(
                target: "mesh.actor.peer",
                peer_id = %self.peer_id,
                negotiation = self.negotiation.as_str(),
                "renegotiation trigger dropped: negotiation in flight"
            );
            return;
        }

        if let Some(last) = self.last_offer_at {
            if last.elapsed() < self.offer_cooldown {
                debug!(
                    target: "mesh.actor.peer",
                    peer_id = %self.peer_id,
                    "renegotiation trigger dropped: cooldown active"
                );
                return;
            }
        }

        if self.connection.signaling_state() != SignalingState::Stable {
            debug!(
                target: "mesh.actor.peer",
                peer_id = %self.peer_id,
                signaling = self.connection.signaling_state().as_str(),
                "renegotiation trigger dropped: signaling not stable"
            );
            return;
        }

        self.negotiation = NegotiationState::Negotiating;
        if let Err(e) = self.send_offer().await {
            warn!(
                target: "mesh.actor.peer",
                peer_id = %self.peer_id,
                error = %e,
                "failed to produce offer"
            );
            self.negotiation = NegotiationState::Idle;
            self.offer_deadline = None;
        }
    }

    async fn send_offer(&mut self) -> Result<(), MeshError> {
        let offer = self.connection.create_offer().await.map_err(|e| {
            MeshError::Internal(format!("create_offer failed: {e}"))
        })?;
        self.connection
            .set_local_description(offer.clone())
            .await
            .map_err(|e| MeshError::Internal(format!("set_local_description failed: {e}")))?;

        self.negotiation = NegotiationState::OfferSent;
        self.last_offer_at = Some(Instant::now());
        self.offer_deadline = Some(Instant::now() + self.offer_timeout);

        debug!(
            target: "mesh.actor.peer",
            peer_id = %self.peer_id,
            "sending offer"
        );
        // The local description is already applied, so a failed send must
        // not return to idle: signaling would sit at have-local-offer with
        // nothing armed to recover it. Keep the deadline; the offer
        // timeout resets the peer if the remote never hears from us.
        if let Err(e) = self
            .channel
            .send(&self.peer_id, Signal::Offer { sdp: offer.sdp })
            .await
        {
            warn!(
                target: "mesh.actor.peer",
                peer_id = %self.peer_id,
                error = %e,
                "offer send failed, waiting out the offer timeout"
            );
        }
        Ok(())
    }

    /// Apply a remote offer, rolling back our own pending offer first if
    /// the two collided.
    async fn handle_remote_offer(&mut self, sdp: String) {
        if self.connection.signaling_state() != SignalingState::Stable {
            info!(
                target: "mesh.actor.peer",
                peer_id = %self.peer_id,
                signaling = self.connection.signaling_state().as_str(),
                "offer glare, rolling back local offer"
            );
            if let Err(e) = self.connection.rollback().await {
                warn!(
                    target: "mesh.actor.peer",
                    peer_id = %self.peer_id,
                    error = %e,
                    "rollback failed"
                );
                self.request_reset(ResetReason::RollbackFailed).await;
                return;
            }
            // The suppressed local offer is not retried here; if media
            // still needs renegotiating the connection fires another
            // negotiation-needed event once stable.
            self.negotiation = NegotiationState::Idle;
            self.offer_deadline = None;
        }

        if let Err(e) = self
            .connection
            .set_remote_description(SessionDescription::offer(sdp))
            .await
        {
            warn!(
                target: "mesh.actor.peer",
                peer_id = %self.peer_id,
                error = %e,
                "failed to apply remote offer"
            );
            self.record_apply_failure().await;
            return;
        }
        self.apply_failures = 0;

        self.drain_candidates().await;

        self.negotiation = NegotiationState::AnswerPending;
        if let Err(e) = self.send_answer().await {
            warn!(
                target: "mesh.actor.peer",
                peer_id = %self.peer_id,
                error = %e,
                "failed to produce answer"
            );
        }
        self.negotiation = NegotiationState::Idle;
    }

    async fn send_answer(&mut self) -> Result<(), MeshError> {
        let answer = self.connection.create_answer().await.map_err(|e| {
            MeshError::Internal(format!("create_answer failed: {e}"))
        })?;
        self.connection
            .set_local_description(answer.clone())
            .await
            .map_err(|e| MeshError::Internal(format!("set_local_description failed: {e}")))?;

        debug!(
            target: "mesh.actor.peer",
            peer_id = %self.peer_id,
            "sending answer"
        );
        self.channel
            .send(&self.peer_id, Signal::Answer { sdp: answer.sdp })
            .await?;
        Ok(())
    }

    /// Apply a remote answer. Duplicate answers (signaling already
    /// stable) are dropped without touching the connection.
    async fn handle_remote_answer(&mut self, sdp: String) {
        if self.connection.signaling_state() == SignalingState::Stable {
            debug!(
                target: "mesh.actor.peer",
                peer_id = %self.peer_id,
                "duplicate answer dropped"
            );
            return;
        }

        match self
            .connection
            .set_remote_description(SessionDescription::answer(sdp))
            .await
        {
            Ok(()) => {
                self.negotiation = NegotiationState::Idle;
                self.offer_deadline = None;
                self.apply_failures = 0;
                self.drain_candidates().await;
            }
            Err(e) => {
                warn!(
                    target: "mesh.actor.peer",
                    peer_id = %self.peer_id,
                    error = %e,
                    "failed to apply remote answer"
                );
                self.record_apply_failure().await;
            }
        }
    }

    /// Apply a remote candidate, or buffer it if no remote description
    /// has been applied yet. A single bad candidate is logged and
    /// skipped; connectivity can still establish over the others.
    async fn handle_remote_candidate(&mut self, candidate: IceCandidate) {
        if self.connection.has_remote_description() {
            if let Err(e) = self.connection.add_ice_candidate(candidate).await {
                warn!(
                    target: "mesh.actor.peer",
                    peer_id = %self.peer_id,
                    error = %e,
                    "candidate rejected, skipping"
                );
            }
        } else {
            self.pending_candidates.push(candidate);
            debug!(
                target: "mesh.actor.peer",
                peer_id = %self.peer_id,
                buffered = self.pending_candidates.len(),
                "buffered candidate until remote description"
            );
        }
    }

    /// Flush buffered candidates in arrival order. The buffer is cleared
    /// regardless of per-candidate failures.
    async fn drain_candidates(&mut self) {
        if self.pending_candidates.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut self.pending_candidates);
        let total = pending.len();
        let mut applied = 0_usize;
        for candidate in pending {
            match self.connection.add_ice_candidate(candidate).await {
                Ok(()) => applied += 1,
                Err(e) => {
                    warn!(
                        target: "mesh.actor.peer",
                        peer_id = %self.peer_id,
                        error = %e,
                        "buffered candidate rejected, skipping"
                    );
                }
            }
        }
        debug!(
            target: "mesh.actor.peer",
            peer_id = %self.peer_id,
            applied,
            total,
            "drained buffered candidates"
        );
    }

    async fn handle_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::NegotiationNeeded => self.maybe_negotiate().await,
            ConnectionEvent::IceCandidate(candidate) => {
                if let Err(e) = self
                    .channel
                    .send(&self.peer_id, Signal::IceCandidate { candidate })
                    .await
                {
                    warn!(
                        target: "mesh.actor.peer",
                        peer_id = %self.peer_id,
                        error = %e,
                        "failed to relay local candidate"
                    );
                }
            }
            ConnectionEvent::Track(track) => {
                self.report(PeerReportKind::RemoteTrack(track)).await;
            }
            ConnectionEvent::ConnectionStateChanged(state) => {
                debug!(
                    target: "mesh.actor.peer",
                    peer_id = %self.peer_id,
                    state = state.as_str(),
                    "connection state changed"
                );
                self.report(PeerReportKind::StateChanged(state)).await;
                if state == ConnectionState::Failed {
                    self.request_reset(ResetReason::ConnectionFailed).await;
                }
            }
            ConnectionEvent::SignalingStateChanged(state) => {
                debug!(
                    target: "mesh.actor.peer",
                    peer_id = %self.peer_id,
                    signaling = state.as_str(),
                    "signaling state changed"
                );
            }
        }
    }

    async fn handle_offer_timeout(&mut self) {
        self.offer_deadline = None;
        if self.negotiation == NegotiationState::OfferSent {
            warn!(
                target: "mesh.actor.peer",
                peer_id = %self.peer_id,
                "no answer within offer timeout"
            );
            self.request_reset(ResetReason::OfferTimeout).await;
        }
    }

    async fn record_apply_failure(&mut self) {
        self.apply_failures = self.apply_failures.saturating_add(1);
        if self.apply_failures >= MAX_APPLY_FAILURES {
            self.request_reset(ResetReason::StateDiverged).await;
        }
    }

    async fn request_reset(&mut self, reason: ResetReason) {
        self.report(PeerReportKind::ResetNeeded(reason)).await;
    }

    async fn report(&self, kind: PeerReportKind) {
        let report = PeerReport {
            peer_id: self.peer_id.clone(),
            generation: self.generation,
            kind,
        };
        if self.reports.send(report).await.is_err() {
            debug!(
                target: "mesh.actor.peer",
                peer_id = %self.peer_id,
                "mesh report channel closed"
            );
        }
    }
}
