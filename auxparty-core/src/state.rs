//! Plain read-model types for the shared game document.
//!
//! `GameDoc::state()` materializes the CRDT maps into one `GameState` value.
//! Consumers only ever see these structs: ids come back as typed `Uuid`s and
//! status strings as real enums, so nothing outside [`crate::document`]
//! touches yrs types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Countdown length used when the room has not chosen one.
pub const DEFAULT_TIMER_DURATION_SECS: u32 = 120;

/// Longest nickname accepted by the join flow; longer input is truncated.
pub const NICKNAME_MAX_LEN: usize = 12;

/// Room lifecycle status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RoomStatus {
    /// Created, players joining, nothing scheduled yet.
    Lobby,
    /// Rotation running; the countdown is derived from the shared anchor.
    Playing,
    /// Rotation running but the countdown is frozen at `paused_at`.
    Paused,
    /// Party ended; the document stays readable for the session summary.
    Finished,
}

impl RoomStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomStatus::Lobby => "LOBBY",
            RoomStatus::Playing => "PLAYING",
            RoomStatus::Paused => "PAUSED",
            RoomStatus::Finished => "FINISHED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "LOBBY" => Some(RoomStatus::Lobby),
            "PLAYING" => Some(RoomStatus::Playing),
            "PAUSED" => Some(RoomStatus::Paused),
            "FINISHED" => Some(RoomStatus::Finished),
            _ => None,
        }
    }
}

/// Queue item lifecycle. Items only leave `Pending` through the scheduler
/// or the end-of-party sweep.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ItemStatus {
    Pending,
    Played,
    Skipped,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "PENDING",
            ItemStatus::Played => "PLAYED",
            ItemStatus::Skipped => "SKIPPED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(ItemStatus::Pending),
            "PLAYED" => Some(ItemStatus::Played),
            "SKIPPED" => Some(ItemStatus::Skipped),
            _ => None,
        }
    }
}

/// Scalar half of the document: join code, lifecycle status, the
/// now-playing fields and the rotation bookkeeping.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: Uuid,
    /// 4-character join token, also the rendezvous namespace suffix.
    pub code: String,
    pub status: RoomStatus,
    /// External video id of the clip on screen, absent while waiting.
    pub current_video_id: Option<String>,
    /// Seek position (seconds into the video) the current clip started from.
    pub current_start_time: Option<u32>,
    /// Seek position to resume from after a pause.
    pub current_video_offset: Option<u32>,
    /// Wall-clock anchor (epoch ms) every peer measures elapsed time against.
    pub playback_started_at: Option<i64>,
    /// Epoch ms at which the countdown froze; only meaningful while PAUSED.
    pub paused_at: Option<i64>,
    /// Player whose turn it is, even when they have nothing queued.
    pub active_player_id: Option<Uuid>,
    /// Item currently assigned to the screen; was PENDING when assigned.
    pub active_queue_item_id: Option<Uuid>,
    /// Round length in seconds.
    pub timer_duration: u32,
    /// When set, any peer observing the countdown hit zero advances the turn.
    pub auto_skip: bool,
    /// When unset, votes on your own clips are rejected.
    pub allow_self_voting: bool,
    /// Rotation order; recomputed from the player map on every advance.
    pub player_order: Vec<Uuid>,
    /// Index into `player_order`, always read modulo its length.
    pub current_turn_index: Option<u32>,
    pub created_at: i64,
}

impl Default for Room {
    fn default() -> Self {
        Room {
            id: Uuid::nil(),
            code: String::new(),
            status: RoomStatus::Lobby,
            current_video_id: None,
            current_start_time: None,
            current_video_offset: None,
            playback_started_at: None,
            paused_at: None,
            active_player_id: None,
            active_queue_item_id: None,
            timer_duration: DEFAULT_TIMER_DURATION_SECS,
            auto_skip: true,
            allow_self_voting: false,
            player_order: Vec::new(),
            current_turn_index: None,
            created_at: 0,
        }
    }
}

/// One seat at the party. The id is the device identity, so a phone that
/// reconnects resumes the same seat.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: Uuid,
    pub nickname: String,
    pub avatar_seed: String,
    pub is_online: bool,
    pub is_vip: bool,
    /// Epoch ms of first join; rotation appends newcomers in this order.
    pub joined_at: i64,
}

/// One queued clip.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: Uuid,
    pub video_id: String,
    pub video_title: Option<String>,
    /// Seconds into the video where the highlight begins.
    pub highlight_start: u32,
    pub status: ItemStatus,
    /// Voter device id to score, 0..=100.
    pub votes: BTreeMap<Uuid, u8>,
    pub created_at: i64,
    /// Player who queued the clip.
    pub player_id: Uuid,
    pub room_id: Uuid,
}

impl QueueItem {
    /// Crowd score for this clip: the rounded mean of all votes, or a
    /// neutral 50 before anyone has voted.
    pub fn hype_score(&self) -> u8 {
        if self.votes.is_empty() {
            return 50;
        }
        let sum: u32 = self.votes.values().map(|v| u32::from(*v)).sum();
        let mean = f64::from(sum) / self.votes.len() as f64;
        mean.round() as u8
    }
}

/// One row of the end-of-party summary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackSummary {
    pub item_id: Uuid,
    pub video_id: String,
    pub video_title: Option<String>,
    pub player_nickname: String,
    pub status: ItemStatus,
    pub votes: Vec<u8>,
    pub score: u8,
}

/// Snapshot of the whole replicated document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GameState {
    pub room: Room,
    pub players: BTreeMap<Uuid, Player>,
    pub queue_items: BTreeMap<Uuid, QueueItem>,
}

impl GameState {
    /// Pending clips owned by `player`, earliest queued first.
    pub fn pending_items_of(&self, player: Uuid) -> Vec<&QueueItem> {
        let mut items: Vec<&QueueItem> = self
            .queue_items
            .values()
            .filter(|i| i.player_id == player && i.status == ItemStatus::Pending)
            .collect();
        items.sort_by_key(|i| (i.created_at, i.id));
        items
    }

    pub fn pending_count(&self) -> usize {
        self.queue_items
            .values()
            .filter(|i| i.status == ItemStatus::Pending)
            .count()
    }

    pub fn player_nickname(&self, id: Uuid) -> Option<&str> {
        self.players.get(&id).map(|p| p.nickname.as_str())
    }

    /// Every clip that reached the screen (played or skipped), in queue
    /// order, with its final crowd score. Data only; how this gets exported
    /// is the embedder's business.
    pub fn session_summary(&self) -> Vec<TrackSummary> {
        let mut finished: Vec<&QueueItem> = self
            .queue_items
            .values()
            .filter(|i| i.status != ItemStatus::Pending)
            .collect();
        finished.sort_by_key(|i| (i.created_at, i.id));
        finished
            .into_iter()
            .map(|i| TrackSummary {
                item_id: i.id,
                video_id: i.video_id.clone(),
                video_title: i.video_title.clone(),
                player_nickname: self
                    .player_nickname(i.player_id)
                    .unwrap_or("Unknown")
                    .to_string(),
                status: i.status,
                votes: i.votes.values().copied().collect(),
                score: i.hype_score(),
            })
            .collect()
    }
}
