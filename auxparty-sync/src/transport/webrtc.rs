//! WebRTC full-mesh transport.
//!
//! Every device that resolves the same room URL against the signaling
//! server gets a reliable data channel to every other. The signaling
//! server only brokers the handshake; game traffic flows peer to peer, so
//! the room keeps working as long as the devices can reach each other.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use auxparty_core::RoomCode;
use log::{debug, warn};
use matchbox_socket::{PeerId, PeerState, WebRtcSocket};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::{PeerEvent, RoomTransport, TransportError};

/// How often the socket is drained while nothing is arriving.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone)]
pub struct MeshConfig {
    /// Base URL of the matchbox signaling server.
    pub signaling_url: String,
    /// Scopes room URLs so different deployments sharing one signaling
    /// server can never collide on a code.
    pub namespace: String,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://localhost:3536".into(),
            namespace: "auxparty-v1".into(),
        }
    }
}

impl MeshConfig {
    /// Rendezvous URL for one room code.
    pub fn room_url(&self, code: &RoomCode) -> String {
        format!(
            "{}/{}:{}",
            self.signaling_url.trim_end_matches('/'),
            self.namespace,
            code.as_str()
        )
    }
}

pub struct MeshTransport {
    socket: Option<WebRtcSocket>,
    driver: JoinHandle<()>,
    pending: VecDeque<PeerEvent>,
}

impl MeshTransport {
    /// Opens the signaling connection for one room. Peers trickle in as
    /// [`PeerEvent::Joined`] once their WebRTC handshake completes.
    pub fn connect(config: &MeshConfig, code: &RoomCode) -> Self {
        let url = config.room_url(code);
        debug!("joining mesh at {url}");
        let (socket, loop_fut) = WebRtcSocket::new_reliable(url);
        let driver = tokio::spawn(async move {
            if let Err(e) = loop_fut.await {
                warn!("signaling loop ended: {e:?}");
            }
        });
        Self {
            socket: Some(socket),
            driver,
            pending: VecDeque::new(),
        }
    }

    /// Our transport-level id, once the signaling server has assigned one.
    pub fn peer_id(&mut self) -> Option<Uuid> {
        self.socket.as_mut().and_then(|s| s.id()).map(|p| p.0)
    }
}

#[async_trait]
impl RoomTransport for MeshTransport {
    async fn next_event(&mut self) -> Option<PeerEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            if self.driver.is_finished() {
                self.socket = None;
            }
            let socket = match self.socket.as_mut() {
                Some(s) => s,
                None => return None,
            };

            let mut fresh = Vec::new();
            for (peer, state) in socket.update_peers() {
                fresh.push(match state {
                    PeerState::Connected => {
                        debug!("peer {peer} connected");
                        PeerEvent::Joined(peer.0)
                    }
                    PeerState::Disconnected => {
                        debug!("peer {peer} disconnected");
                        PeerEvent::Left(peer.0)
                    }
                });
            }
            for (peer, packet) in socket.channel_mut(0).receive() {
                fresh.push(PeerEvent::Packet(peer.0, packet.into_vec()));
            }
            if fresh.is_empty() {
                tokio::time::sleep(POLL_INTERVAL).await;
            } else {
                self.pending.extend(fresh);
            }
        }
    }

    async fn send(&mut self, peer: Uuid, bytes: Vec<u8>) -> Result<(), TransportError> {
        if self.driver.is_finished() {
            return Err(TransportError::Closed);
        }
        let socket = self.socket.as_mut().ok_or(TransportError::Closed)?;
        socket
            .channel_mut(0)
            .send(bytes.into_boxed_slice(), PeerId(peer));
        Ok(())
    }

    async fn leave(&mut self) -> Result<(), TransportError> {
        if let Some(socket) = self.socket.take() {
            drop(socket);
            self.driver.abort();
            debug!("left mesh");
        }
        Ok(())
    }
}

impl Drop for MeshTransport {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_url_scopes_by_namespace_and_code() {
        let config = MeshConfig {
            signaling_url: "wss://signal.example.com/".into(),
            namespace: "auxparty-v1".into(),
        };
        let code = RoomCode::parse("ABCD").unwrap();
        assert_eq!(
            config.room_url(&code),
            "wss://signal.example.com/auxparty-v1:ABCD"
        );
    }

    #[test]
    fn test_default_config_points_at_local_signaling() {
        let config = MeshConfig::default();
        assert!(config.signaling_url.starts_with("ws://"));
        assert!(!config.namespace.is_empty());
    }
}
