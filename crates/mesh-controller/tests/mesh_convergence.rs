//! End-to-end negotiation tests: two real mesh actors wired through the
//! in-process loopback hub, with scripted connections underneath.
//!
//! Paused-clock tests: sleeps auto-advance virtual time, so "waiting"
//! for the meshes to settle costs no wall time.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;

use mesh_controller::{
    ConnectionEvent, MeshActor, MeshConfig, MeshEvent, MeshHandle, SignalingState,
};
use mesh_test_utils::{
    audio_track, FailingRoster, LoopbackHub, MockConnectionFactory, MockOp, StaticMedia,
    StaticRoster,
};
use signal_protocol::IceCandidate;

struct Mesh {
    handle: MeshHandle,
    events: mpsc::Receiver<MeshEvent>,
    factory: Arc<MockConnectionFactory>,
}

fn spawn_on_hub(hub: &LoopbackHub, peer_id: &str, roster: StaticRoster, media: StaticMedia) -> Mesh {
    let (channel, channel_events) = hub.join(peer_id);
    let factory = Arc::new(MockConnectionFactory::new());
    let (handle, events, _task) = MeshActor::spawn(
        MeshConfig::default(),
        channel,
        channel_events,
        factory.clone(),
        Arc::new(media),
        Arc::new(roster),
    );
    Mesh {
        handle,
        events,
        factory,
    }
}

fn negotiated(factory: &MockConnectionFactory, peer_id: &str) -> bool {
    factory.latest(peer_id).is_some_and(|conn| {
        conn.signaling() == SignalingState::Stable
            && conn.ops().iter().any(|op| {
                matches!(op, MockOp::SetRemoteOffer | MockOp::SetRemoteAnswer)
            })
    })
}

#[tokio::test(start_paused = true)]
async fn test_two_meshes_converge_despite_glare() {
    let hub = LoopbackHub::new("session-1");

    let alice = spawn_on_hub(
        &hub,
        "alice",
        StaticRoster::empty(),
        StaticMedia::new(vec![audio_track("alice-mic")]),
    );
    // Bob joins second and also knows alice from the roster, so both
    // sides start negotiating toward each other and offers can cross.
    let bob = spawn_on_hub(
        &hub,
        "bob",
        StaticRoster::with_peers(&["alice"]),
        StaticMedia::new(vec![audio_track("bob-mic")]),
    );

    sleep(Duration::from_millis(500)).await;

    assert!(negotiated(&alice.factory, "bob"), "alice side not stable");
    assert!(negotiated(&bob.factory, "alice"), "bob side not stable");
    assert_eq!(alice.factory.created_count("bob"), 1);
    assert_eq!(bob.factory.created_count("alice"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_candidates_relayed_between_meshes() {
    let hub = LoopbackHub::new("session-1");

    let alice = spawn_on_hub(
        &hub,
        "alice",
        StaticRoster::empty(),
        StaticMedia::new(vec![audio_track("alice-mic")]),
    );
    let bob = spawn_on_hub(
        &hub,
        "bob",
        StaticRoster::with_peers(&["alice"]),
        StaticMedia::none(),
    );

    sleep(Duration::from_millis(500)).await;
    assert!(negotiated(&bob.factory, "alice"));

    // A candidate gathered on alice's side must end up applied on bob's.
    let alice_conn = alice.factory.latest("bob").unwrap();
    alice_conn
        .emit(ConnectionEvent::IceCandidate(IceCandidate {
            candidate: "candidate:relayed".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        }))
        .await;

    sleep(Duration::from_millis(200)).await;

    let bob_conn = bob.factory.latest("alice").unwrap();
    assert_eq!(
        bob_conn.applied_candidates(),
        vec!["candidate:relayed".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn test_echoed_envelopes_do_not_create_self_session() {
    let hub = LoopbackHub::new("session-1");
    hub.set_echo(true);

    let alice = spawn_on_hub(
        &hub,
        "alice",
        StaticRoster::empty(),
        StaticMedia::new(vec![audio_track("alice-mic")]),
    );
    // A raw member that never answers; its queue just absorbs traffic.
    let (_bob_channel, _bob_events) = hub.join("bob");

    sleep(Duration::from_millis(500)).await;

    // Alice offered to bob and saw her own envelope echoed back. The
    // echo must not have produced a session for "alice".
    let state = alice.handle.state().await.unwrap();
    let peer_ids: Vec<&str> = state.peers.iter().map(|p| p.peer_id.as_str()).collect();
    assert_eq!(peer_ids, vec!["bob"]);
    assert_eq!(alice.factory.created_count("alice"), 0);
    assert!(alice
        .factory
        .latest("bob")
        .unwrap()
        .ops()
        .contains(&MockOp::CreateOffer));
}

#[tokio::test(start_paused = true)]
async fn test_roster_failure_recovers_via_join_events() {
    let hub = LoopbackHub::new("session-1");

    let (channel, channel_events) = hub.join("alice");
    let factory = Arc::new(MockConnectionFactory::new());
    let (handle, _events, _task) = MeshActor::spawn(
        MeshConfig::default(),
        channel,
        channel_events,
        factory.clone(),
        Arc::new(StaticMedia::none()),
        Arc::new(FailingRoster),
    );

    // Startup survived the failed fetch; a later join still works.
    let (_bob_channel, _bob_events) = hub.join("bob");
    sleep(Duration::from_millis(200)).await;

    let state = handle.state().await.unwrap();
    assert_eq!(state.peers.len(), 1);
    assert_eq!(factory.created_count("bob"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_end_session_propagates_to_other_mesh() {
    let hub = LoopbackHub::new("session-1");

    let alice = spawn_on_hub(&hub, "alice", StaticRoster::empty(), StaticMedia::none());
    let mut bob = spawn_on_hub(
        &hub,
        "bob",
        StaticRoster::with_peers(&["alice"]),
        StaticMedia::none(),
    );

    sleep(Duration::from_millis(200)).await;

    alice.handle.end_session().await.unwrap();
    sleep(Duration::from_millis(200)).await;

    assert!(alice.handle.is_cancelled());
    assert!(bob.handle.is_cancelled());

    let mut bob_saw_end = false;
    while let Ok(event) = bob.events.try_recv() {
        if event == MeshEvent::SessionEnded {
            bob_saw_end = true;
        }
    }
    assert!(bob_saw_end, "bob never observed the session ending");
}
