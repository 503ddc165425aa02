//! Peer transports.
//!
//! A transport delivers packets between everyone who rendezvoused on the
//! same room code and reports membership changes. The sync layer never
//! cares how: [`webrtc::MeshTransport`] is the real thing, a full WebRTC
//! mesh brokered by a signaling server, and [`memory::MemoryHub`] wires
//! sessions together inside one process for tests.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

pub mod memory;
pub mod webrtc;

pub use memory::{MemoryHub, MemoryTransport};
pub use webrtc::{MeshConfig, MeshTransport};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,
    #[error("unknown peer {0}")]
    UnknownPeer(Uuid),
}

/// Membership and traffic, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    Joined(Uuid),
    Left(Uuid),
    Packet(Uuid, Vec<u8>),
}

/// One connection to a room's mesh.
#[async_trait]
pub trait RoomTransport: Send {
    /// Next membership change or packet. `None` once the transport is done
    /// for good.
    async fn next_event(&mut self) -> Option<PeerEvent>;

    /// Queues `bytes` for one peer.
    async fn send(&mut self, peer: Uuid, bytes: Vec<u8>) -> Result<(), TransportError>;

    /// Disconnects from the room. Idempotent.
    async fn leave(&mut self) -> Result<(), TransportError>;
}
