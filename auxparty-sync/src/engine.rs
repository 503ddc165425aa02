//! Cursor-based sync engine.
//!
//! Tracks, per connected peer, the last state vector that peer reported
//! (its cursor) and whether we have introduced ourselves yet. The exchange
//! rule is small:
//!
//! 1. Apply any update carried by an incoming message.
//! 2. Record the sender's state vector as their cursor.
//! 3. Reply with the diff their cursor shows they are missing. Send an
//!    empty-handed reply only the first time we talk to them, or to
//!    acknowledge a merged update — the ack carries our new state vector
//!    so the sender's cursor moves past what it just shipped.
//!
//! An ack carries no operations, so it draws no further reply: a pair of
//! replicas goes silent as soon as both cursors catch up. There is no
//! sync-complete message to lose. Cursors live and die with the
//! connection; a reconnecting peer starts from a fresh greeting and the
//! diff exchange recovers whatever is missing.

use std::collections::HashMap;

use auxparty_core::{DocError, GameDoc};
use log::{debug, trace};
use thiserror::Error;
use uuid::Uuid;

use crate::protocol::{SyncMessage, WireError};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Doc(#[from] DocError),
}

#[derive(Debug, Default)]
struct PeerCursor {
    /// Device id the peer reported in its envelopes.
    device: Option<Uuid>,
    /// Last state vector the peer told us about.
    remote_sv: Option<Vec<u8>>,
    /// Whether we have sent this peer anything yet.
    introduced: bool,
}

/// What handling one incoming packet produced.
#[derive(Debug)]
pub struct SyncOutcome {
    /// The remote update carried operations and was merged.
    pub applied: bool,
    /// Message to send back to the same peer, if any.
    pub reply: Option<SyncMessage>,
    /// Stable device id of the sender.
    pub sender_device: Uuid,
}

pub struct SyncEngine {
    device_id: Uuid,
    cursors: HashMap<Uuid, PeerCursor>,
}

impl SyncEngine {
    pub fn new(device_id: Uuid) -> Self {
        Self {
            device_id,
            cursors: HashMap::new(),
        }
    }

    pub fn device_id(&self) -> Uuid {
        self.device_id
    }

    /// Builds the first message for a newly connected peer and remembers
    /// that we spoke first.
    pub fn greeting_for(&mut self, doc: &GameDoc, peer: Uuid) -> SyncMessage {
        let cursor = self.cursors.entry(peer).or_default();
        cursor.introduced = true;
        debug!("greeting peer {peer}");
        SyncMessage::greeting(self.device_id, doc.state_vector())
    }

    /// Drops the peer's cursor. Returns the device id the peer had
    /// reported, which callers use to flip that player offline.
    pub fn forget_peer(&mut self, peer: Uuid) -> Option<Uuid> {
        let cursor = self.cursors.remove(&peer)?;
        debug!("forgetting peer {peer}");
        cursor.device
    }

    /// Handles one packet from `peer` per the exchange rule above.
    pub fn handle_packet(
        &mut self,
        doc: &GameDoc,
        peer: Uuid,
        bytes: &[u8],
    ) -> Result<SyncOutcome, SyncError> {
        let msg = SyncMessage::decode(bytes)?;
        trace!(
            "packet from {peer}: sv {} bytes, update {} bytes",
            msg.state_vector.len(),
            msg.update.len()
        );

        let applied = if msg.update.is_empty() {
            false
        } else {
            doc.apply_update(&msg.update)?;
            true
        };

        let diff = doc.diff(&msg.state_vector)?;

        let cursor = self.cursors.entry(peer).or_default();
        cursor.device = Some(msg.sender);
        cursor.remote_sv = Some(msg.state_vector);

        // Reply when they are missing something, when this is first
        // contact, or to ack an update we just merged (the ack's state
        // vector is what advances their cursor past it).
        let reply = if !diff.is_empty() || !cursor.introduced || applied {
            cursor.introduced = true;
            Some(SyncMessage::new(self.device_id, doc.state_vector(), diff))
        } else {
            None
        };

        Ok(SyncOutcome {
            applied,
            reply,
            sender_device: msg.sender,
        })
    }

    /// Diff for one peer against its cursor, or None when it has caught up
    /// (or never told us where it stands).
    pub fn push_for(&self, doc: &GameDoc, peer: Uuid) -> Result<Option<SyncMessage>, SyncError> {
        let cursor = match self.cursors.get(&peer) {
            Some(c) => c,
            None => return Ok(None),
        };
        let remote_sv = match &cursor.remote_sv {
            Some(sv) => sv,
            None => return Ok(None),
        };
        let diff = doc.diff(remote_sv)?;
        if diff.is_empty() {
            return Ok(None);
        }
        Ok(Some(SyncMessage::new(
            self.device_id,
            doc.state_vector(),
            diff,
        )))
    }

    /// Peers we currently hold a cursor for.
    pub fn peers(&self) -> Vec<Uuid> {
        self.cursors.keys().copied().collect()
    }

    /// Device id a peer last reported, if it has spoken yet.
    pub fn device_of(&self, peer: Uuid) -> Option<Uuid> {
        self.cursors.get(&peer).and_then(|c| c.device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auxparty_core::RoomCode;

    struct Replica {
        doc: GameDoc,
        engine: SyncEngine,
        peer: Uuid,
    }

    impl Replica {
        fn host() -> Self {
            let code = RoomCode::parse("QRST").unwrap();
            Self {
                doc: GameDoc::for_host(&code, 0),
                engine: SyncEngine::new(Uuid::new_v4()),
                peer: Uuid::new_v4(),
            }
        }

        fn empty() -> Self {
            Self {
                doc: GameDoc::new(),
                engine: SyncEngine::new(Uuid::new_v4()),
                peer: Uuid::new_v4(),
            }
        }
    }

    /// Runs the back-and-forth between two replicas until it goes quiet,
    /// returning how many messages were exchanged.
    fn pump(a: &mut Replica, b: &mut Replica, opener: SyncMessage) -> usize {
        let mut in_flight = vec![(b.peer, opener)];
        let mut count = 0;
        while let Some((to, msg)) = in_flight.pop() {
            count += 1;
            assert!(count < 32, "exchange did not terminate");
            let bytes = msg.encode().unwrap();
            let (target, other_peer) = if to == b.peer {
                (&mut *b, a.peer)
            } else {
                (&mut *a, b.peer)
            };
            let outcome = target
                .engine
                .handle_packet(&target.doc, other_peer, &bytes)
                .unwrap();
            if let Some(reply) = outcome.reply {
                in_flight.push((other_peer, reply));
            }
        }
        count
    }

    fn connect(a: &mut Replica, b: &mut Replica) -> usize {
        let hello = a.engine.greeting_for(&a.doc, b.peer);
        pump(a, b, hello)
    }

    #[test]
    fn test_fresh_peer_receives_full_state() {
        let mut host = Replica::host();
        host.doc.add_player(Uuid::new_v4(), "Dana", 10);
        let mut joiner = Replica::empty();

        connect(&mut host, &mut joiner);

        assert_eq!(host.doc.save(), joiner.doc.save());
        assert_eq!(joiner.doc.state().room.code, "QRST");
        assert_eq!(joiner.doc.state().players.len(), 1);
    }

    #[test]
    fn test_exchange_terminates_when_in_sync() {
        let mut host = Replica::host();
        let mut joiner = Replica::empty();
        connect(&mut host, &mut joiner);

        // Both sides are introduced and identical; another greeting gets no
        // reply at all.
        let hello = joiner.engine.greeting_for(&joiner.doc, host.peer);
        let outcome = host
            .engine
            .handle_packet(&host.doc, joiner.peer, &hello.encode().unwrap())
            .unwrap();
        assert!(!outcome.applied);
        assert!(outcome.reply.is_none());
    }

    #[test]
    fn test_concurrent_edits_converge() {
        let mut a = Replica::host();
        let mut b = Replica::empty();
        connect(&mut a, &mut b);

        a.doc.add_player(Uuid::new_v4(), "Ana", 1);
        b.doc.add_player(Uuid::new_v4(), "Ben", 2);

        // Each side pushes what the other's cursor is missing.
        let push = a.engine.push_for(&a.doc, b.peer).unwrap().unwrap();
        pump(&mut a, &mut b, push);

        assert_eq!(a.doc.save(), b.doc.save());
        assert_eq!(a.doc.state().players.len(), 2);
    }

    #[test]
    fn test_duplicate_delivery_is_harmless() {
        let mut a = Replica::host();
        let mut b = Replica::empty();
        connect(&mut a, &mut b);

        a.doc.add_player(Uuid::new_v4(), "Kim", 1);
        let push = a.engine.push_for(&a.doc, b.peer).unwrap().unwrap();
        let bytes = push.encode().unwrap();

        b.engine.handle_packet(&b.doc, a.peer, &bytes).unwrap();
        let before = b.doc.save();
        let outcome = b.engine.handle_packet(&b.doc, a.peer, &bytes).unwrap();
        assert_eq!(b.doc.save(), before);
        // The redelivery still gets an ack, but the ack ships nothing and
        // terminates the round.
        let ack = outcome.reply.unwrap();
        assert!(ack.is_empty());
        let end = a
            .engine
            .handle_packet(&a.doc, b.peer, &ack.encode().unwrap())
            .unwrap();
        assert!(end.reply.is_none());
    }

    #[test]
    fn test_push_ack_advances_cursor() {
        let mut a = Replica::host();
        let mut b = Replica::empty();
        connect(&mut a, &mut b);

        a.doc.add_player(Uuid::new_v4(), "Ana", 1);
        let push = a.engine.push_for(&a.doc, b.peer).unwrap().unwrap();
        // One push, one ack, silence.
        assert_eq!(pump(&mut a, &mut b, push), 2);

        // The ack moved b's cursor past the mutation: nothing left to ship,
        // even though b never mutated or spoke on its own.
        assert!(a.engine.push_for(&a.doc, b.peer).unwrap().is_none());

        // An undelivered push stays in the next diff; delivery plus ack
        // clears it.
        a.doc.add_player(Uuid::new_v4(), "Ben", 2);
        let first = a.engine.push_for(&a.doc, b.peer).unwrap().unwrap();
        a.doc.add_player(Uuid::new_v4(), "Cal", 3);
        let second = a.engine.push_for(&a.doc, b.peer).unwrap().unwrap();
        assert!(second.update.len() > first.update.len());
        pump(&mut a, &mut b, second);
        assert!(a.engine.push_for(&a.doc, b.peer).unwrap().is_none());
        assert_eq!(a.doc.save(), b.doc.save());
    }

    #[test]
    fn test_push_for_quiet_when_caught_up() {
        let mut a = Replica::host();
        let mut b = Replica::empty();
        connect(&mut a, &mut b);
        assert!(a.engine.push_for(&a.doc, b.peer).unwrap().is_none());

        a.doc.add_player(Uuid::new_v4(), "Zoe", 1);
        assert!(a.engine.push_for(&a.doc, b.peer).unwrap().is_some());

        // Unknown peer: nothing to push against.
        assert!(a.engine.push_for(&a.doc, Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn test_forget_peer_reports_device() {
        let mut a = Replica::host();
        let mut b = Replica::empty();
        connect(&mut a, &mut b);

        assert_eq!(a.engine.device_of(b.peer), Some(b.engine.device_id()));
        assert_eq!(a.engine.forget_peer(b.peer), Some(b.engine.device_id()));
        assert_eq!(a.engine.forget_peer(b.peer), None);
        assert!(a.engine.peers().is_empty());
    }

    #[test]
    fn test_reconnect_recovers_missed_updates() {
        let mut a = Replica::host();
        let mut b = Replica::empty();
        connect(&mut a, &mut b);

        // b drops; a keeps editing.
        a.engine.forget_peer(b.peer);
        b.engine.forget_peer(a.peer);
        a.doc.add_player(Uuid::new_v4(), "Sam", 3);

        // b comes back under a new transport id.
        b.peer = Uuid::new_v4();
        connect(&mut b, &mut a);
        assert_eq!(a.doc.save(), b.doc.save());
        assert_eq!(b.doc.state().players.len(), 1);
    }

    #[test]
    fn test_full_mesh_three_way_convergence() {
        let mut a = Replica::host();
        let mut b = Replica::empty();
        let mut c = Replica::empty();
        connect(&mut a, &mut b);
        connect(&mut a, &mut c);
        connect(&mut b, &mut c);

        a.doc.add_player(Uuid::new_v4(), "Ana", 1);
        b.doc.add_player(Uuid::new_v4(), "Ben", 2);
        c.doc.add_player(Uuid::new_v4(), "Cal", 3);

        // Everyone pushes their edit to both neighbors, as the session does
        // after a local mutation.
        for _ in 0..2 {
            if let Some(push) = a.engine.push_for(&a.doc, b.peer).unwrap() {
                pump(&mut a, &mut b, push);
            }
            if let Some(push) = b.engine.push_for(&b.doc, c.peer).unwrap() {
                pump(&mut b, &mut c, push);
            }
            if let Some(push) = c.engine.push_for(&c.doc, a.peer).unwrap() {
                pump(&mut c, &mut a, push);
            }
        }

        assert_eq!(a.doc.save(), b.doc.save());
        assert_eq!(b.doc.save(), c.doc.save());
        assert_eq!(a.doc.state().players.len(), 3);
    }

    #[test]
    fn test_bad_packet_is_an_error() {
        let mut a = Replica::host();
        let peer = Uuid::new_v4();
        assert!(a.engine.handle_packet(&a.doc, peer, b"nonsense").is_err());
    }
}
