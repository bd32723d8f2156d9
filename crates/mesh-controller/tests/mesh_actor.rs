//! Unit tests for `MeshActor`, run as an integration target so the mock
//! types from `mesh-test-utils` and the crate under test share one copy
//! of `mesh_controller`.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Duration;

use mesh_controller::{
    ChannelEvent, ConnectionEvent, ConnectionState, MeshActor, MeshConfig, MeshEvent, MeshHandle,
    ResetReason,
};
use mesh_test_utils::{
    audio_track, CapturingChannel, MockConnectionFactory, MockOp, StaticMedia, StaticRoster,
};
use signal_protocol::{SessionEvent, Signal, SignalEnvelope};

struct Harness {
    handle: MeshHandle,
    events: mpsc::Receiver<MeshEvent>,
    channel_tx: mpsc::Sender<ChannelEvent>,
    factory: Arc<MockConnectionFactory>,
    sent: mpsc::Receiver<(String, Signal)>,
    channel: Arc<CapturingChannel>,
}

fn spawn_mesh(config: MeshConfig) -> Harness {
    let (channel, sent) = CapturingChannel::new("local", "session-1");
    let (channel_tx, channel_rx) = mpsc::channel(64);
    let factory = Arc::new(MockConnectionFactory::new());
    let (handle, events, _task) = MeshActor::spawn(
        config,
        channel.clone(),
        channel_rx,
        factory.clone(),
        Arc::new(StaticMedia::none()),
        Arc::new(StaticRoster::empty()),
    );
    Harness {
        handle,
        events,
        channel_tx,
        factory,
        sent,
        channel,
    }
}

#[tokio::test]
async fn test_member_join_creates_peer_session() {
    let h = spawn_mesh(MeshConfig::default());

    h.channel_tx
        .send(ChannelEvent::MemberJoined {
            peer_id: "bob".to_string(),
        })
        .await
        .unwrap();

    // state() round-trips through the mailbox, so the join is
    // processed by the time it answers.
    let state = h.handle.state().await.unwrap();
    assert_eq!(state.peers.len(), 1);
    assert_eq!(state.peers.first().unwrap().peer_id, "bob");
    assert_eq!(h.factory.created_count("bob"), 1);
}

#[tokio::test]
async fn test_member_left_tears_down_peer() {
    let mut h = spawn_mesh(MeshConfig::default());

    h.channel_tx
        .send(ChannelEvent::MemberJoined {
            peer_id: "bob".to_string(),
        })
        .await
        .unwrap();
    h.channel_tx
        .send(ChannelEvent::MemberLeft {
            peer_id: "bob".to_string(),
        })
        .await
        .unwrap();

    let state = h.handle.state().await.unwrap();
    assert!(state.peers.is_empty());

    let event = h.events.recv().await.unwrap();
    assert_eq!(
        event,
        MeshEvent::PeerLeft {
            peer_id: "bob".to_string()
        }
    );
}

#[tokio::test]
async fn test_inbound_offer_from_unknown_peer_creates_session() {
    let mut h = spawn_mesh(MeshConfig::default());

    h.channel_tx
        .send(ChannelEvent::Signal(SignalEnvelope {
            from_peer_id: "bob".to_string(),
            to_peer_id: "local".to_string(),
            session_id: "session-1".to_string(),
            signal: Signal::Offer {
                sdp: "v=0 offer".to_string(),
            },
        }))
        .await
        .unwrap();

    // The new peer session answers the offer.
    let (to, signal) = h.sent.recv().await.unwrap();
    assert_eq!(to, "bob");
    assert!(matches!(signal, Signal::Answer { .. }));
    assert_eq!(h.factory.created_count("bob"), 1);
}

#[tokio::test]
async fn test_candidate_from_unknown_peer_creates_session() {
    let h = spawn_mesh(MeshConfig::default());

    h.channel_tx
        .send(ChannelEvent::Signal(SignalEnvelope {
            from_peer_id: "bob".to_string(),
            to_peer_id: "local".to_string(),
            session_id: "session-1".to_string(),
            signal: Signal::IceCandidate {
                candidate: signal_protocol::IceCandidate {
                    candidate: "candidate:early".to_string(),
                    sdp_mid: None,
                    sdp_mline_index: None,
                },
            },
        }))
        .await
        .unwrap();

    let state = h.handle.state().await.unwrap();
    assert_eq!(state.peers.len(), 1);
    assert_eq!(h.factory.created_count("bob"), 1);
    // No remote description yet, so the candidate sits buffered.
    assert!(h
        .factory
        .latest("bob")
        .unwrap()
        .applied_candidates()
        .is_empty());
}

#[tokio::test]
async fn test_echoed_and_misaddressed_envelopes_ignored() {
    let h = spawn_mesh(MeshConfig::default());

    for (from, to) in [("local", "bob"), ("bob", "carol")] {
        h.channel_tx
            .send(ChannelEvent::Signal(SignalEnvelope {
                from_peer_id: from.to_string(),
                to_peer_id: to.to_string(),
                session_id: "session-1".to_string(),
                signal: Signal::Offer {
                    sdp: "v=0 offer".to_string(),
                },
            }))
            .await
            .unwrap();
    }

    let state = h.handle.state().await.unwrap();
    assert!(state.peers.is_empty());
    assert_eq!(h.factory.total_created(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stall_watchdog_resets_stuck_peer() {
    let mut h = spawn_mesh(MeshConfig::default());

    h.channel_tx
        .send(ChannelEvent::MemberJoined {
            peer_id: "bob".to_string(),
        })
        .await
        .unwrap();
    let _ = h.handle.state().await.unwrap();
    assert_eq!(h.factory.created_count("bob"), 1);

    // Past the stall threshold plus the reconnect delay: the
    // watchdog tears the peer down and a fresh session comes up.
    // Sleeping under the paused clock lets every intermediate timer
    // fire and be processed before the assertions run.
    tokio::time::sleep(Duration::from_secs(13)).await;

    let state = h.handle.state().await.unwrap();
    assert_eq!(state.peers.len(), 1);
    assert_eq!(h.factory.created_count("bob"), 2);

    let mut reconnecting = false;
    while let Ok(event) = h.events.try_recv() {
        if matches!(
            event,
            MeshEvent::PeerReconnecting {
                reason: ResetReason::Stalled,
                ..
            }
        ) {
            reconnecting = true;
        }
    }
    assert!(reconnecting, "expected a stall reset event");
}

#[tokio::test(start_paused = true)]
async fn test_stale_reports_do_not_touch_replacement_peer() {
    let mut config = MeshConfig::default();
    // Zero delay so the replacement can exist while reports from the
    // old connection instance are still queued.
    config.reconnect_delay = Duration::from_millis(0);
    let h = spawn_mesh(config);

    h.channel_tx
        .send(ChannelEvent::MemberJoined {
            peer_id: "bob".to_string(),
        })
        .await
        .unwrap();
    let _ = h.handle.state().await.unwrap();
    let old_conn = h.factory.latest("bob").unwrap();

    // Two failure events back to back: the first triggers the reset,
    // the second produces reports that outlive their instance.
    old_conn
        .emit(ConnectionEvent::ConnectionStateChanged(
            ConnectionState::Failed,
        ))
        .await;
    old_conn
        .emit(ConnectionEvent::ConnectionStateChanged(
            ConnectionState::Failed,
        ))
        .await;

    tokio::time::sleep(Duration::from_millis(100)).await;

    // Exactly one reset; the leftover reports neither reset the
    // replacement nor smear the old failed state onto it.
    assert_eq!(h.factory.created_count("bob"), 2);
    let state = h.handle.state().await.unwrap();
    assert_eq!(state.peers.len(), 1);
    assert_eq!(
        state.peers.first().unwrap().connection,
        ConnectionState::New
    );
}

#[tokio::test(start_paused = true)]
async fn test_tracks_changed_detaches_removed_tracks() {
    let (channel, _sent) = CapturingChannel::new("local", "session-1");
    let (channel_tx, channel_rx) = mpsc::channel(64);
    let factory = Arc::new(MockConnectionFactory::new());
    let media = Arc::new(StaticMedia::new(vec![audio_track("mic")]));
    let (handle, _events, _task) = MeshActor::spawn(
        MeshConfig::default(),
        channel,
        channel_rx,
        factory.clone(),
        media.clone(),
        Arc::new(StaticRoster::empty()),
    );

    channel_tx
        .send(ChannelEvent::MemberJoined {
            peer_id: "bob".to_string(),
        })
        .await
        .unwrap();
    let _ = handle.state().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let conn = factory.latest("bob").unwrap();
    assert!(conn.ops().contains(&MockOp::AddTrack("mic".to_string())));

    // The capture source loses the track; every peer must detach it.
    media.set_tracks(Vec::new());
    handle.tracks_changed().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(conn.ops().contains(&MockOp::RemoveTrack("mic".to_string())));
}

#[tokio::test]
async fn test_end_session_broadcasts_and_stops() {
    let mut h = spawn_mesh(MeshConfig::default());

    h.handle.end_session().await.unwrap();

    assert!(h
        .channel
        .broadcasts()
        .contains(&SessionEvent::SessionEnded));
    assert!(h.handle.is_cancelled());

    let event = h.events.recv().await.unwrap();
    assert_eq!(event, MeshEvent::SessionEnded);
}

#[tokio::test]
async fn test_spotlight_broadcasts_and_updates_state() {
    let mut h = spawn_mesh(MeshConfig::default());

    h.handle.spotlight("bob".to_string()).await.unwrap();

    assert!(h.channel.broadcasts().contains(&SessionEvent::Spotlight {
        peer_id: "bob".to_string()
    }));
    let state = h.handle.state().await.unwrap();
    assert_eq!(state.spotlighted_peer_id.as_deref(), Some("bob"));

    let event = h.events.recv().await.unwrap();
    assert_eq!(
        event,
        MeshEvent::Spotlight {
            peer_id: "bob".to_string()
        }
    );
}
