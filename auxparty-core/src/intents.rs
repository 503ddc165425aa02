//! Game commands.
//!
//! Each method on [`GameDoc`] here is one user-visible action: validate
//! against the current snapshot, then write the result through the editor
//! in a single transaction. Rejected commands return `false` and leave the
//! document untouched. Callers pass `now_ms` explicitly so replays and
//! tests control the clock.

use log::debug;
use uuid::Uuid;

use crate::document::{DocEditor, GameDoc};
use crate::scheduler::{next_turn, TurnPlan};
use crate::state::{ItemStatus, RoomStatus, NICKNAME_MAX_LEN};
use crate::timer::{plan_pause, plan_resume};

impl GameDoc {
    /// Adds a player, or refreshes them if the id is already known (a
    /// rejoin keeps the original `joined_at` so the seat order holds).
    pub fn add_player(&self, id: Uuid, nickname: &str, now_ms: i64) -> bool {
        let nickname: String = nickname.trim().chars().take(NICKNAME_MAX_LEN).collect();
        if nickname.is_empty() {
            debug!("add_player rejected: empty nickname");
            return false;
        }
        self.apply(|e| {
            if !e.refresh_player(id, &nickname, &nickname) {
                e.insert_player(id, &nickname, &nickname, now_ms);
            }
        });
        true
    }

    pub fn queue_clip(
        &self,
        id: Uuid,
        owner: Uuid,
        video_id: &str,
        video_title: Option<&str>,
        highlight_start: u32,
        now_ms: i64,
    ) -> bool {
        let video_id = video_id.trim();
        if video_id.is_empty() {
            debug!("queue_clip rejected: empty video id");
            return false;
        }
        self.apply(|e| {
            if !e.player_exists(owner) {
                debug!("queue_clip rejected: unknown player {owner}");
                return false;
            }
            let room_id = e.room_id().unwrap_or_else(Uuid::nil);
            e.insert_queue_item(
                id,
                owner,
                room_id,
                video_id,
                video_title,
                highlight_start,
                now_ms,
            );
            true
        })
    }

    /// Removing a clip is reserved for its owner and for VIPs.
    pub fn delete_clip(&self, item: Uuid, requester: Uuid) -> bool {
        self.apply(|e| {
            let owner = match e.item_owner(item) {
                Some(owner) => owner,
                None => return false,
            };
            if owner != requester && !e.player_is_vip(requester) {
                debug!("delete_clip rejected: {requester} is neither owner nor VIP");
                return false;
            }
            e.remove_queue_item(item)
        })
    }

    /// Scores are capped at 100. Voting for your own clip is refused unless
    /// the room allows it.
    pub fn cast_vote(&self, item: Uuid, voter: Uuid, score: u8) -> bool {
        self.apply(|e| {
            if !e.player_exists(voter) {
                debug!("cast_vote rejected: unknown voter {voter}");
                return false;
            }
            if !e.allow_self_voting() && e.item_owner(item) == Some(voter) {
                debug!("cast_vote rejected: self-vote on {item}");
                return false;
            }
            e.set_vote(item, voter, score.min(100))
        })
    }

    /// Moves the rotation forward. Returns true when a clip starts playing.
    ///
    /// Also lifts a pause: the new round starts running immediately, and no
    /// stale pause timestamp may leak into it.
    pub fn advance_turn(&self, now_ms: i64, mark_current_played: bool) -> bool {
        let plan = next_turn(&self.state(), now_ms, mark_current_played);
        self.apply(|e| {
            apply_plan(e, &plan);
            if e.status() == RoomStatus::Paused {
                e.set_status(RoomStatus::Playing);
            }
            e.clear_paused_at();
        });
        matches!(plan, TurnPlan::Play { .. })
    }

    pub fn pause_playback(&self, now_ms: i64) -> bool {
        let plan = match plan_pause(&self.state().room, now_ms) {
            Some(plan) => plan,
            None => return false,
        };
        self.apply(|e| {
            e.set_status(RoomStatus::Paused);
            e.set_paused_at(plan.paused_at);
            if let Some(offset) = plan.video_offset {
                e.set_current_video_offset(offset);
            }
        });
        true
    }

    pub fn resume_playback(&self, now_ms: i64) -> bool {
        let plan = match plan_resume(&self.state().room, now_ms) {
            Some(plan) => plan,
            None => return false,
        };
        self.apply(|e| {
            e.set_status(RoomStatus::Playing);
            e.set_playback_started_at(plan.playback_started_at);
            e.clear_paused_at();
        });
        true
    }

    /// Grants the current round extra seconds by shifting its anchor.
    pub fn extend_round(&self, secs: u32) -> bool {
        self.apply(|e| match e.playback_started_at() {
            Some(anchor) => {
                e.set_playback_started_at(anchor + i64::from(secs) * 1000);
                true
            }
            None => false,
        })
    }

    pub fn set_auto_skip(&self, on: bool) {
        self.apply(|e| e.set_auto_skip(on));
    }

    pub fn set_allow_self_voting(&self, on: bool) {
        self.apply(|e| e.set_allow_self_voting(on));
    }

    pub fn set_timer_duration(&self, secs: u32) -> bool {
        if secs == 0 {
            return false;
        }
        self.apply(|e| e.set_timer_duration(secs));
        true
    }

    /// Removes a player and all their clips. If it was their turn the
    /// rotation moves on so the room is not stuck on an empty seat.
    pub fn kick_player(&self, player: Uuid, now_ms: i64) -> bool {
        let state = self.state();
        if !state.players.contains_key(&player) {
            return false;
        }
        let was_active = state.room.active_player_id == Some(player);
        self.apply(|e| {
            e.remove_player(player);
            for item in state.queue_items.values().filter(|i| i.player_id == player) {
                e.remove_queue_item(item.id);
            }
        });
        if was_active {
            self.advance_turn(now_ms, false);
        }
        true
    }

    pub fn toggle_vip(&self, player: Uuid) -> Option<bool> {
        self.apply(|e| e.toggle_player_vip(player))
    }

    /// Lobby only. Flips the room to playing and kicks off the first turn.
    pub fn start_party(&self, now_ms: i64) -> bool {
        if self.state().room.status != RoomStatus::Lobby {
            return false;
        }
        self.apply(|e| e.set_status(RoomStatus::Playing));
        self.advance_turn(now_ms, false);
        true
    }

    /// Retires the active clip and freezes the room for the wrap-up screen.
    pub fn end_party(&self) -> bool {
        if self.state().room.status == RoomStatus::Finished {
            return false;
        }
        self.apply(|e| {
            if let Some(active) = e.active_queue_item_id() {
                if e.item_exists(active) {
                    e.set_item_status(active, ItemStatus::Played);
                }
            }
            e.clear_current_video_id();
            e.clear_active_player_id();
            e.clear_active_queue_item_id();
            e.clear_playback_started_at();
            e.clear_paused_at();
            e.set_status(RoomStatus::Finished);
        });
        true
    }

    pub fn set_player_online(&self, player: Uuid, online: bool) -> bool {
        self.apply(|e| e.set_player_online(player, online))
    }
}

fn apply_plan(e: &mut DocEditor, plan: &TurnPlan) {
    if let Some(retired) = plan.mark_played() {
        e.set_item_status(retired, ItemStatus::Played);
    }
    match plan {
        TurnPlan::Halt { .. } => {
            e.clear_current_video_id();
            e.clear_active_player_id();
            e.clear_active_queue_item_id();
            e.clear_playback_started_at();
        }
        TurnPlan::Play {
            player,
            item,
            video_id,
            start_time,
            order,
            turn_index,
            started_at,
            ..
        } => {
            e.set_current_video_id(video_id);
            e.set_current_start_time(*start_time);
            e.set_current_video_offset(*start_time);
            e.set_playback_started_at(*started_at);
            e.set_active_player_id(*player);
            e.set_active_queue_item_id(*item);
            e.set_player_order(order);
            e.set_current_turn_index(*turn_index);
        }
        TurnPlan::Wait {
            player,
            order,
            turn_index,
            ..
        } => {
            e.set_active_player_id(*player);
            e.set_player_order(order);
            e.set_current_turn_index(*turn_index);
            e.clear_current_video_id();
            e.clear_active_queue_item_id();
            e.clear_playback_started_at();
            e.clear_current_video_offset();
        }
    }
}
