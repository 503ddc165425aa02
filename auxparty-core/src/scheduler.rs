//! Turn rotation.
//!
//! Pure functions from a [`GameState`] snapshot to a [`TurnPlan`]. Nothing
//! here touches the document; callers apply the plan through the editor so
//! that every replica that evaluates the same snapshot writes the same
//! fields. Rotation walks the player order round-robin starting after the
//! current turn index and picks the first player holding an unplayed clip.

use std::collections::BTreeMap;

use uuid::Uuid;

use crate::state::{GameState, Player};

/// Outcome of advancing the rotation.
#[derive(Clone, Debug, PartialEq)]
pub enum TurnPlan {
    /// No players left; playback stops entirely.
    Halt { mark_played: Option<Uuid> },
    /// A clip was found; it starts at `started_at`.
    Play {
        mark_played: Option<Uuid>,
        player: Uuid,
        item: Uuid,
        video_id: String,
        start_time: u32,
        order: Vec<Uuid>,
        turn_index: u32,
        started_at: i64,
    },
    /// Nobody has a clip queued; the turn passes to `player` who gets to
    /// pick one.
    Wait {
        mark_played: Option<Uuid>,
        player: Uuid,
        order: Vec<Uuid>,
        turn_index: u32,
    },
}

impl TurnPlan {
    pub fn mark_played(&self) -> Option<Uuid> {
        match self {
            TurnPlan::Halt { mark_played }
            | TurnPlan::Play { mark_played, .. }
            | TurnPlan::Wait { mark_played, .. } => *mark_played,
        }
    }
}

/// Stable rotation order: ids already in `existing` keep their slots (minus
/// anyone who left), newcomers append in join order.
pub fn compute_player_order(existing: &[Uuid], players: &BTreeMap<Uuid, Player>) -> Vec<Uuid> {
    let mut order: Vec<Uuid> = existing
        .iter()
        .copied()
        .filter(|id| players.contains_key(id))
        .collect();
    let mut newcomers: Vec<&Player> = players
        .values()
        .filter(|p| !order.contains(&p.id))
        .collect();
    newcomers.sort_by_key(|p| (p.joined_at, p.id));
    order.extend(newcomers.into_iter().map(|p| p.id));
    order
}

/// Decides what happens after the current clip ends (or is skipped).
///
/// When `mark_current_played` is set, the clip the room is currently on is
/// flagged for retirement and excluded from the scan even though the
/// snapshot still shows it as pending.
pub fn next_turn(state: &GameState, now_ms: i64, mark_current_played: bool) -> TurnPlan {
    let mark_played = if mark_current_played {
        state
            .room
            .active_queue_item_id
            .filter(|id| state.queue_items.contains_key(id))
    } else {
        None
    };

    let order = compute_player_order(&state.room.player_order, &state.players);
    if order.is_empty() {
        return TurnPlan::Halt { mark_played };
    }

    let len = order.len() as i64;
    let start = state.room.current_turn_index.map_or(-1, i64::from);

    for attempt in 1..=order.len() as i64 {
        let index = (start + attempt).rem_euclid(len) as usize;
        let player = order[index];
        let candidate = state
            .pending_items_of(player)
            .into_iter()
            .find(|item| Some(item.id) != mark_played);
        if let Some(item) = candidate {
            return TurnPlan::Play {
                mark_played,
                player,
                item: item.id,
                video_id: item.video_id.clone(),
                start_time: item.highlight_start,
                order,
                turn_index: index as u32,
                started_at: now_ms,
            };
        }
    }

    // Empty queue everywhere: hand the turn to the next seat anyway so the
    // room keeps rotating while people dig for clips.
    let index = (start + 1).rem_euclid(len) as usize;
    TurnPlan::Wait {
        mark_played,
        player: order[index],
        order,
        turn_index: index as u32,
    }
}
