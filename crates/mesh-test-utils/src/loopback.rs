//! In-process signal hub connecting multiple meshes.
//!
//! `LoopbackHub` plays the role of the signaling service: members join,
//! receive each other's envelopes and membership events, and can be
//! removed to simulate departure. With `set_echo(true)` the hub delivers
//! every envelope to all members including the sender, which is how real
//! pub/sub channels often behave.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use mesh_controller::{ChannelError, ChannelEvent, SignalChannel};
use signal_protocol::{SessionEvent, Signal, SignalEnvelope};

struct HubInner {
    members: HashMap<String, mpsc::Sender<ChannelEvent>>,
    echo: bool,
}

impl HubInner {
    fn deliver(&self, peer_id: &str, event: ChannelEvent) {
        if let Some(tx) = self.members.get(peer_id) {
            // Bounded but large; a full queue in a test is a test bug.
            tx.try_send(event).expect("loopback member queue full");
        }
    }
}

/// The hub itself. Cheap to clone into helper tasks.
#[derive(Clone)]
pub struct LoopbackHub {
    inner: Arc<Mutex<HubInner>>,
    session_id: String,
}

impl LoopbackHub {
    pub fn new(session_id: &str) -> Self {
        LoopbackHub {
            inner: Arc::new(Mutex::new(HubInner {
                members: HashMap::new(),
                echo: false,
            })),
            session_id: session_id.to_string(),
        }
    }

    /// Deliver envelopes to every member including the sender.
    pub fn set_echo(&self, echo: bool) {
        self.inner.lock().expect("hub lock poisoned").echo = echo;
    }

    /// Add a member. Existing members see a join event; the new member
    /// gets a channel and its inbound event stream.
    pub fn join(&self, peer_id: &str) -> (Arc<LoopbackChannel>, mpsc::Receiver<ChannelEvent>) {
        let (tx, rx) = mpsc::channel(1024);
        {
            let mut inner = self.inner.lock().expect("hub lock poisoned");
            for (member, member_tx) in &inner.members {
                if member != peer_id {
                    let _ = member_tx.try_send(ChannelEvent::MemberJoined {
                        peer_id: peer_id.to_string(),
                    });
                }
            }
            inner.members.insert(peer_id.to_string(), tx);
        }
        let channel = Arc::new(LoopbackChannel {
            inner: Arc::clone(&self.inner),
            session_id: self.session_id.clone(),
            local_peer_id: peer_id.to_string(),
        });
        (channel, rx)
    }

    /// Remove a member. Remaining members see a leave event and the
    /// removed member's event stream ends.
    pub fn leave(&self, peer_id: &str) {
        let mut inner = self.inner.lock().expect("hub lock poisoned");
        inner.members.remove(peer_id);
        for member_tx in inner.members.values() {
            let _ = member_tx.try_send(ChannelEvent::MemberLeft {
                peer_id: peer_id.to_string(),
            });
        }
    }
}

/// One member's handle on the hub.
pub struct LoopbackChannel {
    inner: Arc<Mutex<HubInner>>,
    session_id: String,
    local_peer_id: String,
}

#[async_trait]
impl SignalChannel for LoopbackChannel {
    fn local_peer_id(&self) -> &str {
        &self.local_peer_id
    }

    fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn send(&self, to_peer_id: &str, signal: Signal) -> Result<(), ChannelError> {
        let envelope = SignalEnvelope {
            from_peer_id: self.local_peer_id.clone(),
            to_peer_id: to_peer_id.to_string(),
            session_id: self.session_id.clone(),
            signal,
        };
        let inner = self.inner.lock().expect("hub lock poisoned");
        if inner.echo {
            for peer_id in inner.members.keys() {
                inner.deliver(peer_id, ChannelEvent::Signal(envelope.clone()));
            }
        } else {
            // A departed recipient is not an error; real channels
            // deliver into the void too.
            inner.deliver(to_peer_id, ChannelEvent::Signal(envelope));
        }
        Ok(())
    }

    async fn broadcast(&self, event: SessionEvent) -> Result<(), ChannelError> {
        let inner = self.inner.lock().expect("hub lock poisoned");
        for peer_id in inner.members.keys() {
            if peer_id != &self.local_peer_id {
                inner.deliver(peer_id, ChannelEvent::Session(event.clone()));
            }
        }
        Ok(())
    }
}
