//! In-process transport for tests and single-machine demos.
//!
//! A [`MemoryHub`] plays the role of the rendezvous: every transport that
//! joins it can reach every other, and joins and leaves fan out as peer
//! events exactly like the WebRTC mesh reports them.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use super::{PeerEvent, RoomTransport, TransportError};

#[derive(Clone, Default)]
pub struct MemoryHub {
    peers: Arc<RwLock<HashMap<Uuid, mpsc::UnboundedSender<PeerEvent>>>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connects a new transport and announces it to everyone present.
    pub async fn join(&self) -> MemoryTransport {
        let peer = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut peers = self.peers.write().await;
        for (&other, sender) in peers.iter() {
            let _ = sender.send(PeerEvent::Joined(peer));
            let _ = tx.send(PeerEvent::Joined(other));
        }
        peers.insert(peer, tx);
        debug!("memory hub: {peer} joined ({} present)", peers.len());
        MemoryTransport {
            peer,
            hub: self.clone(),
            events: rx,
            connected: true,
        }
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    async fn remove(&self, peer: Uuid) {
        let mut peers = self.peers.write().await;
        if peers.remove(&peer).is_some() {
            debug!("memory hub: {peer} left ({} present)", peers.len());
            for sender in peers.values() {
                let _ = sender.send(PeerEvent::Left(peer));
            }
        }
    }

    async fn deliver(&self, from: Uuid, to: Uuid, bytes: Vec<u8>) -> Result<(), TransportError> {
        let peers = self.peers.read().await;
        let sender = peers.get(&to).ok_or(TransportError::UnknownPeer(to))?;
        sender
            .send(PeerEvent::Packet(from, bytes))
            .map_err(|_| TransportError::Closed)
    }
}

pub struct MemoryTransport {
    peer: Uuid,
    hub: MemoryHub,
    events: mpsc::UnboundedReceiver<PeerEvent>,
    connected: bool,
}

impl MemoryTransport {
    pub fn peer_id(&self) -> Uuid {
        self.peer
    }
}

#[async_trait]
impl RoomTransport for MemoryTransport {
    async fn next_event(&mut self) -> Option<PeerEvent> {
        if !self.connected {
            return None;
        }
        self.events.recv().await
    }

    async fn send(&mut self, peer: Uuid, bytes: Vec<u8>) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::Closed);
        }
        self.hub.deliver(self.peer, peer, bytes).await
    }

    async fn leave(&mut self) -> Result<(), TransportError> {
        if self.connected {
            self.connected = false;
            self.hub.remove(self.peer).await;
        }
        Ok(())
    }
}
