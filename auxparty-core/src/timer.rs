//! Round timer arithmetic.
//!
//! The timer is never ticked across the wire. Each round stores a single
//! wall-clock anchor (`playback_started_at`) in the document and every
//! replica derives the remaining time locally from its own clock. Pause
//! freezes the countdown by recording `paused_at`; resume shifts the anchor
//! forward by the length of the pause so the elapsed time is unchanged.

use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

use crate::state::{Room, RoomStatus};

/// Milliseconds since the Unix epoch.
pub fn epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Whole seconds the current round has been running. While paused the
/// reference point is the pause instant, so the value stops moving.
pub fn elapsed_secs(room: &Room, now_ms: i64) -> u32 {
    let anchor = match room.playback_started_at {
        Some(anchor) => anchor,
        None => return 0,
    };
    let reference = match (room.status, room.paused_at) {
        (RoomStatus::Paused, Some(paused_at)) => paused_at,
        _ => now_ms,
    };
    ((reference - anchor).max(0) / 1000) as u32
}

/// Seconds left on the round clock, or None when no round is running.
pub fn remaining_secs(room: &Room, now_ms: i64) -> Option<u32> {
    if room.current_video_id.is_none() {
        return None;
    }
    match room.status {
        RoomStatus::Playing | RoomStatus::Paused => {
            Some(room.timer_duration.saturating_sub(elapsed_secs(room, now_ms)))
        }
        _ => None,
    }
}

/// Field writes that freeze the round at `now_ms`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PausePlan {
    pub paused_at: i64,
    /// Seek position to store so late joiners land at the right spot.
    pub video_offset: Option<u32>,
}

pub fn plan_pause(room: &Room, now_ms: i64) -> Option<PausePlan> {
    if room.status != RoomStatus::Playing {
        return None;
    }
    let video_offset = room
        .playback_started_at
        .map(|_| room.current_start_time.unwrap_or(0) + elapsed_secs(room, now_ms));
    Some(PausePlan {
        paused_at: now_ms,
        video_offset,
    })
}

/// Field writes that unfreeze the round at `now_ms`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResumePlan {
    pub playback_started_at: i64,
}

pub fn plan_resume(room: &Room, now_ms: i64) -> Option<ResumePlan> {
    if room.status != RoomStatus::Paused {
        return None;
    }
    let anchor = room.playback_started_at?;
    let pause_len = room.paused_at.map_or(0, |paused_at| (now_ms - paused_at).max(0));
    Some(ResumePlan {
        playback_started_at: anchor + pause_len,
    })
}

/// Fires exactly once per expiry: only on the transition from a positive
/// remainder to zero on the same clip. A clip that is already at zero when
/// first observed (stale snapshot, rejoin) never fires.
#[derive(Debug, Default)]
pub struct AutoSkipEdge {
    last: Option<(Uuid, u32)>,
}

impl AutoSkipEdge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one observation of the active clip and its remaining seconds.
    /// Returns the clip id when this observation crosses the edge.
    pub fn observe(&mut self, item: Option<Uuid>, remaining: Option<u32>) -> Option<Uuid> {
        let (item, remaining) = match (item, remaining) {
            (Some(item), Some(remaining)) => (item, remaining),
            _ => {
                self.last = None;
                return None;
            }
        };
        let fired = matches!(self.last, Some((prev_item, prev)) if prev_item == item && prev > 0 && remaining == 0);
        self.last = Some((item, remaining));
        fired.then_some(item)
    }
}
