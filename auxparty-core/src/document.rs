//! CRDT-backed game document.
//!
//! One `GameDoc` per device carries the whole replicated state as a yrs
//! document with three root maps:
//!
//! ```text
//! GameDoc (yrs::Doc)
//! ├── "room"        { code, status, now-playing fields, settings, order }
//! ├── "players"     { <player-id> : { nickname, avatar_seed, ... } }
//! └── "queue_items" { <item-id>   : { video_id, status, ...,
//!                                     votes: { <voter-id>: score } } }
//! ```
//!
//! Every map entry and scalar field is independently mergeable: concurrent
//! edits to different entries never conflict, and concurrent writes to the
//! same scalar resolve by the CRDT's last-writer rule for that field alone.
//! Peers exchange v1 update encodings; applying an update twice is a no-op.

use std::collections::BTreeMap;

use thiserror::Error;
use uuid::Uuid;
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{
    Any, Doc, Map, MapPrelim, MapRef, Out, ReadTxn, StateVector, Transact, TransactionMut, Update,
};

use crate::room_code::RoomCode;
use crate::state::{
    GameState, ItemStatus, Player, QueueItem, Room, RoomStatus, DEFAULT_TIMER_DURATION_SECS,
};

const ROOM: &str = "room";
const PLAYERS: &str = "players";
const QUEUE_ITEMS: &str = "queue_items";

/// v1 encoding of an update carrying no operations and no deletions. What
/// `encode_diff_v1` hands back for a fully caught-up state vector.
const EMPTY_UPDATE_V1: [u8; 2] = [0, 0];

#[derive(Debug, Error)]
pub enum DocError {
    #[error("could not decode update: {0}")]
    DecodeUpdate(String),
    #[error("could not apply update: {0}")]
    ApplyUpdate(String),
    #[error("could not decode state vector: {0}")]
    DecodeStateVector(String),
}

/// The replicated document plus handles to its root maps.
pub struct GameDoc {
    doc: Doc,
    room: MapRef,
    players: MapRef,
    queue_items: MapRef,
}

impl GameDoc {
    /// Fresh empty document with all root maps materialized.
    pub fn new() -> Self {
        let doc = Doc::new();
        let room = doc.get_or_insert_map(ROOM);
        let players = doc.get_or_insert_map(PLAYERS);
        let queue_items = doc.get_or_insert_map(QUEUE_ITEMS);
        GameDoc {
            doc,
            room,
            players,
            queue_items,
        }
    }

    /// Bootstrap a document for a newly hosted room. Settings stay unwritten
    /// so they read as their defaults until someone toggles them.
    pub fn for_host(code: &RoomCode, now_ms: i64) -> Self {
        let doc = Self::new();
        doc.apply(|e| {
            e.set_room_id(Uuid::new_v4());
            e.set_code(code.as_str());
            e.set_status(RoomStatus::Lobby);
            e.set_created_at(now_ms);
        });
        doc
    }

    /// Runs `f` inside a single write transaction. The transaction commits
    /// when the editor drops, so all edits land as one update.
    pub fn apply<T>(&self, f: impl FnOnce(&mut DocEditor) -> T) -> T {
        let mut editor = DocEditor {
            txn: self.doc.transact_mut(),
            room: self.room.clone(),
            players: self.players.clone(),
            queue_items: self.queue_items.clone(),
        };
        f(&mut editor)
    }

    /// Full-state encoding, used for snapshots and as the fallback when no
    /// peer has been synced with yet.
    pub fn save(&self) -> Vec<u8> {
        self.doc
            .transact()
            .encode_diff_v1(&StateVector::default())
    }

    /// Rebuilds a document from a [`save`](Self::save) encoding.
    pub fn load(bytes: &[u8]) -> Result<Self, DocError> {
        let doc = Self::new();
        doc.apply_update(bytes)?;
        Ok(doc)
    }

    pub fn state_vector(&self) -> Vec<u8> {
        self.doc.transact().state_vector().encode_v1()
    }

    /// Operations the holder of `remote_sv` is missing. Empty when they
    /// have caught up: yrs encodes a no-op diff as two zero bytes rather
    /// than nothing, so that sentinel is normalized away here — callers
    /// decide whether to ship a message by checking `is_empty()`.
    pub fn diff(&self, remote_sv: &[u8]) -> Result<Vec<u8>, DocError> {
        let sv = StateVector::decode_v1(remote_sv)
            .map_err(|e| DocError::DecodeStateVector(e.to_string()))?;
        let diff = self.doc.transact().encode_diff_v1(&sv);
        if diff == EMPTY_UPDATE_V1 {
            return Ok(Vec::new());
        }
        Ok(diff)
    }

    /// Merges remote operations. Idempotent; out-of-order updates are held
    /// back by yrs until their dependencies arrive.
    pub fn apply_update(&self, bytes: &[u8]) -> Result<(), DocError> {
        let update =
            Update::decode_v1(bytes).map_err(|e| DocError::DecodeUpdate(e.to_string()))?;
        let mut txn = self.doc.transact_mut();
        txn.apply_update(update)
            .map_err(|e| DocError::ApplyUpdate(e.to_string()))
    }

    /// Materializes the read model. Entries with unparseable ids or the
    /// wrong shape (foreign documents) are skipped.
    pub fn state(&self) -> GameState {
        let txn = self.doc.transact();

        let room = Room {
            id: read_uuid(&self.room, &txn, "id").unwrap_or_else(Uuid::nil),
            code: read_str(&self.room, &txn, "code").unwrap_or_default(),
            status: read_str(&self.room, &txn, "status")
                .and_then(|s| RoomStatus::parse(&s))
                .unwrap_or(RoomStatus::Lobby),
            current_video_id: read_str(&self.room, &txn, "current_video_id"),
            current_start_time: read_u32(&self.room, &txn, "current_start_time"),
            current_video_offset: read_u32(&self.room, &txn, "current_video_offset"),
            playback_started_at: read_i64(&self.room, &txn, "playback_started_at"),
            paused_at: read_i64(&self.room, &txn, "paused_at"),
            active_player_id: read_uuid(&self.room, &txn, "active_player_id"),
            active_queue_item_id: read_uuid(&self.room, &txn, "active_queue_item_id"),
            timer_duration: read_u32(&self.room, &txn, "timer_duration")
                .unwrap_or(DEFAULT_TIMER_DURATION_SECS),
            auto_skip: read_bool(&self.room, &txn, "auto_skip").unwrap_or(true),
            allow_self_voting: read_bool(&self.room, &txn, "allow_self_voting").unwrap_or(false),
            player_order: read_uuid_list(&self.room, &txn, "player_order"),
            current_turn_index: read_u32(&self.room, &txn, "current_turn_index"),
            created_at: read_i64(&self.room, &txn, "created_at").unwrap_or(0),
        };

        let mut players = BTreeMap::new();
        for key in keys_of(&self.players, &txn) {
            let id = match Uuid::parse_str(&key) {
                Ok(id) => id,
                Err(_) => continue,
            };
            let entry = match read_map(&self.players, &txn, &key) {
                Some(m) => m,
                None => continue,
            };
            players.insert(
                id,
                Player {
                    id,
                    nickname: read_str(&entry, &txn, "nickname").unwrap_or_default(),
                    avatar_seed: read_str(&entry, &txn, "avatar_seed").unwrap_or_default(),
                    is_online: read_bool(&entry, &txn, "is_online").unwrap_or(false),
                    is_vip: read_bool(&entry, &txn, "is_vip").unwrap_or(false),
                    joined_at: read_i64(&entry, &txn, "joined_at").unwrap_or(0),
                },
            );
        }

        let mut queue_items = BTreeMap::new();
        for key in keys_of(&self.queue_items, &txn) {
            let id = match Uuid::parse_str(&key) {
                Ok(id) => id,
                Err(_) => continue,
            };
            let entry = match read_map(&self.queue_items, &txn, &key) {
                Some(m) => m,
                None => continue,
            };
            let mut votes = BTreeMap::new();
            if let Some(votes_map) = read_map(&entry, &txn, "votes") {
                for voter_key in keys_of(&votes_map, &txn) {
                    let voter = match Uuid::parse_str(&voter_key) {
                        Ok(v) => v,
                        Err(_) => continue,
                    };
                    if let Some(score) = read_i64(&votes_map, &txn, &voter_key) {
                        votes.insert(voter, score.clamp(0, 100) as u8);
                    }
                }
            }
            queue_items.insert(
                id,
                QueueItem {
                    id,
                    video_id: read_str(&entry, &txn, "video_id").unwrap_or_default(),
                    video_title: read_str(&entry, &txn, "video_title"),
                    highlight_start: read_u32(&entry, &txn, "highlight_start").unwrap_or(0),
                    status: read_str(&entry, &txn, "status")
                        .and_then(|s| ItemStatus::parse(&s))
                        .unwrap_or(ItemStatus::Pending),
                    votes,
                    created_at: read_i64(&entry, &txn, "created_at").unwrap_or(0),
                    player_id: read_uuid(&entry, &txn, "player_id").unwrap_or_else(Uuid::nil),
                    room_id: read_uuid(&entry, &txn, "room_id").unwrap_or_else(Uuid::nil),
                },
            );
        }

        GameState {
            room,
            players,
            queue_items,
        }
    }
}

impl Default for GameDoc {
    fn default() -> Self {
        Self::new()
    }
}

/// Write handle passed to [`GameDoc::apply`] closures. Exposes each field
/// and map entry as its own edit so concurrent mutations stay independent.
pub struct DocEditor<'a> {
    txn: TransactionMut<'a>,
    room: MapRef,
    players: MapRef,
    queue_items: MapRef,
}

impl DocEditor<'_> {
    // ── room scalars ──────────────────────────────────────────────

    pub fn set_room_id(&mut self, id: Uuid) {
        self.room.insert(&mut self.txn, "id", id.to_string());
    }

    pub fn room_id(&self) -> Option<Uuid> {
        read_uuid(&self.room, &self.txn, "id")
    }

    pub fn set_code(&mut self, code: &str) {
        self.room.insert(&mut self.txn, "code", code);
    }

    pub fn set_status(&mut self, status: RoomStatus) {
        self.room.insert(&mut self.txn, "status", status.as_str());
    }

    pub fn status(&self) -> RoomStatus {
        read_str(&self.room, &self.txn, "status")
            .and_then(|s| RoomStatus::parse(&s))
            .unwrap_or(RoomStatus::Lobby)
    }

    pub fn set_created_at(&mut self, ms: i64) {
        self.room.insert(&mut self.txn, "created_at", ms);
    }

    pub fn set_current_video_id(&mut self, video_id: &str) {
        self.room.insert(&mut self.txn, "current_video_id", video_id);
    }

    pub fn clear_current_video_id(&mut self) {
        self.room.remove(&mut self.txn, "current_video_id");
    }

    pub fn set_current_start_time(&mut self, secs: u32) {
        self.room
            .insert(&mut self.txn, "current_start_time", i64::from(secs));
    }

    pub fn set_current_video_offset(&mut self, secs: u32) {
        self.room
            .insert(&mut self.txn, "current_video_offset", i64::from(secs));
    }

    pub fn clear_current_video_offset(&mut self) {
        self.room.remove(&mut self.txn, "current_video_offset");
    }

    pub fn set_playback_started_at(&mut self, ms: i64) {
        self.room.insert(&mut self.txn, "playback_started_at", ms);
    }

    pub fn clear_playback_started_at(&mut self) {
        self.room.remove(&mut self.txn, "playback_started_at");
    }

    pub fn playback_started_at(&self) -> Option<i64> {
        read_i64(&self.room, &self.txn, "playback_started_at")
    }

    pub fn set_paused_at(&mut self, ms: i64) {
        self.room.insert(&mut self.txn, "paused_at", ms);
    }

    pub fn clear_paused_at(&mut self) {
        self.room.remove(&mut self.txn, "paused_at");
    }

    pub fn set_active_player_id(&mut self, id: Uuid) {
        self.room
            .insert(&mut self.txn, "active_player_id", id.to_string());
    }

    pub fn clear_active_player_id(&mut self) {
        self.room.remove(&mut self.txn, "active_player_id");
    }

    pub fn set_active_queue_item_id(&mut self, id: Uuid) {
        self.room
            .insert(&mut self.txn, "active_queue_item_id", id.to_string());
    }

    pub fn clear_active_queue_item_id(&mut self) {
        self.room.remove(&mut self.txn, "active_queue_item_id");
    }

    pub fn active_queue_item_id(&self) -> Option<Uuid> {
        read_uuid(&self.room, &self.txn, "active_queue_item_id")
    }

    pub fn set_timer_duration(&mut self, secs: u32) {
        self.room
            .insert(&mut self.txn, "timer_duration", i64::from(secs));
    }

    pub fn set_auto_skip(&mut self, on: bool) {
        self.room.insert(&mut self.txn, "auto_skip", on);
    }

    pub fn set_allow_self_voting(&mut self, on: bool) {
        self.room.insert(&mut self.txn, "allow_self_voting", on);
    }

    pub fn allow_self_voting(&self) -> bool {
        read_bool(&self.room, &self.txn, "allow_self_voting").unwrap_or(false)
    }

    /// The whole order is one value; last writer wins. Safe because every
    /// advance recomputes it from the player map anyway.
    pub fn set_player_order(&mut self, order: &[Uuid]) {
        let items: Vec<Any> = order.iter().map(|id| Any::from(id.to_string())).collect();
        self.room
            .insert(&mut self.txn, "player_order", Any::Array(items.into()));
    }

    pub fn set_current_turn_index(&mut self, index: u32) {
        self.room
            .insert(&mut self.txn, "current_turn_index", i64::from(index));
    }

    // ── players ───────────────────────────────────────────────────

    pub fn player_exists(&self, id: Uuid) -> bool {
        read_map(&self.players, &self.txn, &id.to_string()).is_some()
    }

    pub fn insert_player(&mut self, id: Uuid, nickname: &str, avatar_seed: &str, joined_at: i64) {
        self.players.insert(
            &mut self.txn,
            id.to_string(),
            MapPrelim::from([
                ("nickname", Any::from(nickname)),
                ("avatar_seed", Any::from(avatar_seed)),
                ("is_online", Any::from(true)),
                ("is_vip", Any::from(false)),
                ("joined_at", Any::from(joined_at)),
            ]),
        );
    }

    /// Rejoin path: refresh the mutable bits but keep `joined_at` so the
    /// rotation order stays put.
    pub fn refresh_player(&mut self, id: Uuid, nickname: &str, avatar_seed: &str) -> bool {
        let entry = match read_map(&self.players, &self.txn, &id.to_string()) {
            Some(m) => m,
            None => return false,
        };
        entry.insert(&mut self.txn, "nickname", nickname);
        entry.insert(&mut self.txn, "avatar_seed", avatar_seed);
        entry.insert(&mut self.txn, "is_online", true);
        true
    }

    pub fn remove_player(&mut self, id: Uuid) -> bool {
        self.players
            .remove(&mut self.txn, &id.to_string())
            .is_some()
    }

    pub fn set_player_online(&mut self, id: Uuid, online: bool) -> bool {
        let entry = match read_map(&self.players, &self.txn, &id.to_string()) {
            Some(m) => m,
            None => return false,
        };
        entry.insert(&mut self.txn, "is_online", online);
        true
    }

    pub fn player_is_vip(&self, id: Uuid) -> bool {
        read_map(&self.players, &self.txn, &id.to_string())
            .and_then(|entry| read_bool(&entry, &self.txn, "is_vip"))
            .unwrap_or(false)
    }

    /// Returns the new flag value, or None when the player is unknown.
    pub fn toggle_player_vip(&mut self, id: Uuid) -> Option<bool> {
        let entry = read_map(&self.players, &self.txn, &id.to_string())?;
        let flipped = !read_bool(&entry, &self.txn, "is_vip").unwrap_or(false);
        entry.insert(&mut self.txn, "is_vip", flipped);
        Some(flipped)
    }

    // ── queue items ───────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    pub fn insert_queue_item(
        &mut self,
        id: Uuid,
        owner: Uuid,
        room_id: Uuid,
        video_id: &str,
        video_title: Option<&str>,
        highlight_start: u32,
        created_at: i64,
    ) {
        let key = id.to_string();
        self.queue_items.insert(
            &mut self.txn,
            key.clone(),
            MapPrelim::from([
                ("video_id", Any::from(video_id)),
                ("highlight_start", Any::from(i64::from(highlight_start))),
                ("status", Any::from(ItemStatus::Pending.as_str())),
                ("created_at", Any::from(created_at)),
                ("player_id", Any::from(owner.to_string())),
                ("room_id", Any::from(room_id.to_string())),
            ]),
        );
        // The votes container is created with the item so every peer's votes
        // land in the same nested map.
        if let Some(entry) = read_map(&self.queue_items, &self.txn, &key) {
            entry.insert(&mut self.txn, "votes", MapPrelim::default());
            if let Some(title) = video_title {
                entry.insert(&mut self.txn, "video_title", title);
            }
        }
    }

    pub fn remove_queue_item(&mut self, id: Uuid) -> bool {
        self.queue_items
            .remove(&mut self.txn, &id.to_string())
            .is_some()
    }

    pub fn item_exists(&self, id: Uuid) -> bool {
        read_map(&self.queue_items, &self.txn, &id.to_string()).is_some()
    }

    pub fn item_owner(&self, id: Uuid) -> Option<Uuid> {
        let entry = read_map(&self.queue_items, &self.txn, &id.to_string())?;
        read_uuid(&entry, &self.txn, "player_id")
    }

    pub fn set_item_status(&mut self, id: Uuid, status: ItemStatus) -> bool {
        let entry = match read_map(&self.queue_items, &self.txn, &id.to_string()) {
            Some(m) => m,
            None => return false,
        };
        entry.insert(&mut self.txn, "status", status.as_str());
        true
    }

    pub fn set_vote(&mut self, item: Uuid, voter: Uuid, score: u8) -> bool {
        let entry = match read_map(&self.queue_items, &self.txn, &item.to_string()) {
            Some(m) => m,
            None => return false,
        };
        let votes = match read_map(&entry, &self.txn, "votes") {
            Some(m) => m,
            None => {
                // Old or foreign item without a votes container; grow one.
                entry.insert(&mut self.txn, "votes", MapPrelim::default());
                match read_map(&entry, &self.txn, "votes") {
                    Some(m) => m,
                    None => return false,
                }
            }
        };
        votes.insert(&mut self.txn, voter.to_string(), i64::from(score));
        true
    }
}

// ── typed reads over yrs values ───────────────────────────────────

fn keys_of<T: ReadTxn>(map: &MapRef, txn: &T) -> Vec<String> {
    map.keys(txn).map(|k| k.to_string()).collect()
}

fn read_map<T: ReadTxn>(map: &MapRef, txn: &T, key: &str) -> Option<MapRef> {
    match map.get(txn, key) {
        Some(Out::YMap(m)) => Some(m),
        _ => None,
    }
}

fn read_str<T: ReadTxn>(map: &MapRef, txn: &T, key: &str) -> Option<String> {
    match map.get(txn, key) {
        Some(Out::Any(Any::String(s))) => Some(s.to_string()),
        _ => None,
    }
}

fn read_i64<T: ReadTxn>(map: &MapRef, txn: &T, key: &str) -> Option<i64> {
    match map.get(txn, key) {
        Some(Out::Any(Any::BigInt(v))) => Some(v),
        Some(Out::Any(Any::Number(v))) => Some(v as i64),
        _ => None,
    }
}

fn read_u32<T: ReadTxn>(map: &MapRef, txn: &T, key: &str) -> Option<u32> {
    read_i64(map, txn, key).and_then(|v| u32::try_from(v).ok())
}

fn read_bool<T: ReadTxn>(map: &MapRef, txn: &T, key: &str) -> Option<bool> {
    match map.get(txn, key) {
        Some(Out::Any(Any::Bool(b))) => Some(b),
        _ => None,
    }
}

fn read_uuid<T: ReadTxn>(map: &MapRef, txn: &T, key: &str) -> Option<Uuid> {
    read_str(map, txn, key).and_then(|s| Uuid::parse_str(&s).ok())
}

fn read_uuid_list<T: ReadTxn>(map: &MapRef, txn: &T, key: &str) -> Vec<Uuid> {
    match map.get(txn, key) {
        Some(Out::Any(Any::Array(items))) => items
            .iter()
            .filter_map(|v| match v {
                Any::String(s) => Uuid::parse_str(s).ok(),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host_doc() -> GameDoc {
        let code = RoomCode::parse("ABCD").unwrap();
        GameDoc::for_host(&code, 1_000)
    }

    /// Pushes everything each side is missing to the other.
    fn exchange(a: &GameDoc, b: &GameDoc) {
        let to_b = a.diff(&b.state_vector()).unwrap();
        let to_a = b.diff(&a.state_vector()).unwrap();
        if !to_b.is_empty() {
            b.apply_update(&to_b).unwrap();
        }
        if !to_a.is_empty() {
            a.apply_update(&to_a).unwrap();
        }
    }

    #[test]
    fn test_fresh_doc_reads_defaults() {
        let state = GameDoc::new().state();
        assert_eq!(state.room.status, RoomStatus::Lobby);
        assert_eq!(state.room.timer_duration, DEFAULT_TIMER_DURATION_SECS);
        assert!(state.room.auto_skip);
        assert!(!state.room.allow_self_voting);
        assert!(state.players.is_empty());
        assert!(state.queue_items.is_empty());
    }

    #[test]
    fn test_host_bootstrap() {
        let state = host_doc().state();
        assert_eq!(state.room.code, "ABCD");
        assert_eq!(state.room.status, RoomStatus::Lobby);
        assert_eq!(state.room.created_at, 1_000);
        assert_ne!(state.room.id, Uuid::nil());
    }

    #[test]
    fn test_player_roundtrip() {
        let doc = host_doc();
        let id = Uuid::new_v4();
        doc.apply(|e| e.insert_player(id, "Alex", "Alex", 5_000));

        let state = doc.state();
        let p = &state.players[&id];
        assert_eq!(p.nickname, "Alex");
        assert!(p.is_online);
        assert!(!p.is_vip);
        assert_eq!(p.joined_at, 5_000);

        doc.apply(|e| {
            assert_eq!(e.toggle_player_vip(id), Some(true));
            assert!(e.set_player_online(id, false));
        });
        let p = doc.state().players[&id].clone();
        assert!(p.is_vip);
        assert!(!p.is_online);
    }

    #[test]
    fn test_queue_item_roundtrip_with_votes() {
        let doc = host_doc();
        let room_id = doc.state().room.id;
        let owner = Uuid::new_v4();
        let item = Uuid::new_v4();
        let voter = Uuid::new_v4();
        doc.apply(|e| {
            e.insert_queue_item(item, owner, room_id, "xyz", Some("Banger"), 30, 2_000);
            assert!(e.set_vote(item, voter, 90));
        });

        let state = doc.state();
        let i = &state.queue_items[&item];
        assert_eq!(i.video_id, "xyz");
        assert_eq!(i.video_title.as_deref(), Some("Banger"));
        assert_eq!(i.highlight_start, 30);
        assert_eq!(i.status, ItemStatus::Pending);
        assert_eq!(i.player_id, owner);
        assert_eq!(i.room_id, room_id);
        assert_eq!(i.votes[&voter], 90);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let doc = host_doc();
        let owner = Uuid::new_v4();
        doc.apply(|e| {
            e.insert_player(owner, "Sam", "Sam", 10);
            e.insert_queue_item(Uuid::new_v4(), owner, Uuid::new_v4(), "abc", None, 0, 20);
        });

        let restored = GameDoc::load(&doc.save()).unwrap();
        assert_eq!(restored.state(), doc.state());
        assert_eq!(restored.save(), doc.save());
    }

    #[test]
    fn test_load_rejects_garbage() {
        assert!(GameDoc::load(b"not an update").is_err());
    }

    #[test]
    fn test_concurrent_entry_edits_merge_losslessly() {
        let a = host_doc();
        let b = GameDoc::load(&a.save()).unwrap();

        let pa = Uuid::new_v4();
        let pb = Uuid::new_v4();
        a.apply(|e| e.insert_player(pa, "Ana", "Ana", 1));
        b.apply(|e| e.insert_player(pb, "Ben", "Ben", 2));

        exchange(&a, &b);

        let sa = a.state();
        let sb = b.state();
        assert_eq!(sa.players.len(), 2);
        assert_eq!(sa, sb);
        assert_eq!(a.save(), b.save());
    }

    #[test]
    fn test_same_field_conflict_converges() {
        let a = host_doc();
        let b = GameDoc::load(&a.save()).unwrap();

        a.apply(|e| e.set_status(RoomStatus::Playing));
        b.apply(|e| e.set_status(RoomStatus::Finished));

        exchange(&a, &b);

        // One writer wins; both replicas agree on which.
        assert_eq!(a.state().room.status, b.state().room.status);
        assert_eq!(a.save(), b.save());
        // Only the contended field was affected.
        assert_eq!(a.state().room.code, "ABCD");
    }

    #[test]
    fn test_diff_is_empty_for_caught_up_peer() {
        let a = host_doc();
        let b = GameDoc::load(&a.save()).unwrap();

        // b holds everything a has; the diff must be empty, not the
        // two-byte no-op encoding.
        assert!(a.diff(&b.state_vector()).unwrap().is_empty());
        assert!(b.diff(&a.state_vector()).unwrap().is_empty());

        a.apply(|e| e.set_status(RoomStatus::Playing));
        assert!(!a.diff(&b.state_vector()).unwrap().is_empty());
        assert!(b.diff(&a.state_vector()).unwrap().is_empty());
    }

    #[test]
    fn test_apply_update_idempotent() {
        let a = host_doc();
        let b = GameDoc::load(&a.save()).unwrap();
        a.apply(|e| e.insert_player(Uuid::new_v4(), "Kim", "Kim", 1));

        let update = a.diff(&b.state_vector()).unwrap();
        b.apply_update(&update).unwrap();
        let once = b.save();
        b.apply_update(&update).unwrap();
        assert_eq!(b.save(), once);
    }

    #[test]
    fn test_foreign_entries_skipped() {
        let doc = GameDoc::new();
        // Scribble a non-map value where a player entry should be.
        doc.apply(|e| {
            e.players.insert(&mut e.txn, "not-a-uuid", "junk");
            e.players.insert(&mut e.txn, Uuid::new_v4().to_string(), 42i64);
        });
        assert!(doc.state().players.is_empty());
    }
}
