//! # auxparty-core — Game rules for the aux-party queue
//!
//! Pure game core: the replicated room document, the turn rotation, and the
//! round timer. No I/O and no async; everything here is driven by callers
//! handing in timestamps and update bytes, which is what keeps replicas
//! deterministic.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────┐
//! │ GameDoc (yrs document)                         │
//! │  "room" / "players" / "queue_items" root maps  │
//! └──────┬─────────────────────────────┬───────────┘
//!        │ state()                     │ apply(editor)
//!        ▼                             │
//! ┌─────────────┐   next_turn   ┌──────┴──────┐
//! │ GameState   │ ────────────► │ TurnPlan    │
//! │ (snapshot)  │               │ (writes)    │
//! └──────┬──────┘               └─────────────┘
//!        │ remaining_secs
//!        ▼
//! ┌─────────────┐
//! │ AutoSkipEdge│
//! └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`document`] — CRDT document with typed field access
//! - [`state`] — Plain read model materialized from the document
//! - [`scheduler`] — Pure round-robin turn planner
//! - [`timer`] — Wall-clock round timer and auto-skip edge detection
//! - [`room_code`] — Four-letter join codes

pub mod document;
pub mod room_code;
pub mod scheduler;
pub mod state;
pub mod timer;

mod intents;

// Re-exports for convenience
pub use document::{DocEditor, DocError, GameDoc};
pub use room_code::{RoomCode, RoomCodeError, ROOM_CODE_LEN};
pub use scheduler::{compute_player_order, next_turn, TurnPlan};
pub use state::{
    GameState, ItemStatus, Player, QueueItem, Room, RoomStatus, TrackSummary,
    DEFAULT_TIMER_DURATION_SECS, NICKNAME_MAX_LEN,
};
pub use timer::{
    elapsed_secs, epoch_ms, plan_pause, plan_resume, remaining_secs, AutoSkipEdge, PausePlan,
    ResumePlan,
};
