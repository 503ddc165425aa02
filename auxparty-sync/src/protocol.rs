//! Binary protocol for peer-to-peer document synchronization.
//!
//! Wire format (bincode-encoded):
//! ```text
//! ┌─────────┬──────────┬──────────────┬──────────┐
//! │ version │ sender   │ state_vector │ update   │
//! │ 1 byte  │ 16 bytes │ variable     │ variable │
//! └─────────┴──────────┴──────────────┴──────────┘
//! ```
//!
//! Every message carries the sender's yrs state vector; the update part may
//! be empty. A peer that receives a message applies the update, then replies
//! with whatever the embedded state vector shows the sender is missing. When
//! neither side is missing anything the exchange goes quiet on its own, so
//! there is no explicit end-of-sync marker.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Bumped on incompatible wire changes. Peers on a different version are
/// ignored rather than half-understood.
pub const PROTOCOL_VERSION: u8 = 1;

#[derive(Debug, Clone, Error)]
pub enum WireError {
    #[error("serialization failed: {0}")]
    Encode(String),
    #[error("deserialization failed: {0}")]
    Decode(String),
    #[error("unsupported protocol version {got}")]
    Version { got: u8 },
}

/// The only message kind peers exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncMessage {
    pub version: u8,
    /// Stable device id of the sender, not the transport-level peer id.
    pub sender: Uuid,
    /// Sender's yrs state vector (v1 encoding).
    pub state_vector: Vec<u8>,
    /// Yrs update (v1 encoding); empty when there is nothing to ship.
    pub update: Vec<u8>,
}

impl SyncMessage {
    pub fn new(sender: Uuid, state_vector: Vec<u8>, update: Vec<u8>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            sender,
            state_vector,
            update,
        }
    }

    /// First contact: announce our state vector without shipping anything.
    pub fn greeting(sender: Uuid, state_vector: Vec<u8>) -> Self {
        Self::new(sender, state_vector, Vec::new())
    }

    /// True when the message carries no document operations.
    pub fn is_empty(&self) -> bool {
        self.update.is_empty()
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| WireError::Encode(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let (msg, _): (SyncMessage, _) =
            bincode::serde::decode_from_slice(bytes, bincode::config::standard())
                .map_err(|e| WireError::Decode(e.to_string()))?;
        if msg.version != PROTOCOL_VERSION {
            return Err(WireError::Version { got: msg.version });
        }
        Ok(msg)
    }
}
