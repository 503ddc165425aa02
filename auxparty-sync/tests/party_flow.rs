//! Integration tests for full rooms: several live sessions wired through the
//! in-memory hub, exercising join, rotation, voting, auto-skip and rejoin
//! exactly as devices on a real mesh would.

use std::path::Path;
use std::sync::Arc;

use auxparty_core::{epoch_ms, GameDoc, GameState, ItemStatus, RoomCode, RoomStatus};
use auxparty_sync::identity::load_or_create_device_id;
use auxparty_sync::session::{Command, Session, SessionConfig, SessionEvent, SessionHandle};
use auxparty_sync::snapshot::SnapshotStore;
use auxparty_sync::transport::MemoryHub;
use tokio::sync::watch;
use tokio::time::{timeout, Duration};

const WAIT: Duration = Duration::from_secs(5);

async fn start_session(
    hub: &MemoryHub,
    dir: &Path,
    code: &RoomCode,
    doc: GameDoc,
) -> SessionHandle {
    let config = SessionConfig::for_testing(dir);
    let device_id = load_or_create_device_id(dir).unwrap();
    let transport = Box::new(hub.join().await);
    Session::start(config, code.clone(), device_id, doc, transport)
}

/// Start a hosting session: fresh document carrying the room scalars.
async fn host_session(hub: &MemoryHub, dir: &Path, code: &RoomCode) -> SessionHandle {
    let doc = GameDoc::for_host(code, epoch_ms());
    start_session(hub, dir, code, doc).await
}

/// Start a joining session the way the public join path does: restore the
/// local snapshot when one matches, otherwise begin empty.
async fn join_session(hub: &MemoryHub, dir: &Path, code: &RoomCode) -> SessionHandle {
    let doc = SnapshotStore::new(dir, code.clone())
        .restore_or_fresh()
        .unwrap_or_default();
    start_session(hub, dir, code, doc).await
}

/// Block until the watched state satisfies `pred`.
async fn wait_for(rx: &mut watch::Receiver<Arc<GameState>>, pred: impl Fn(&GameState) -> bool) {
    timeout(WAIT, async {
        loop {
            {
                let state = rx.borrow();
                if pred(state.as_ref()) {
                    return;
                }
            }
            rx.changed().await.expect("session ended while waiting");
        }
    })
    .await
    .expect("state never matched");
}

#[tokio::test]
async fn test_host_and_guest_play_a_round() {
    let hub = MemoryHub::new();
    let code = RoomCode::parse("ABCD").unwrap();
    let host_dir = tempfile::tempdir().unwrap();
    let guest_dir = tempfile::tempdir().unwrap();

    let host = host_session(&hub, host_dir.path(), &code).await;
    let guest = join_session(&hub, guest_dir.path(), &code).await;
    let mut host_state = host.watch_state();
    let mut guest_state = guest.watch_state();

    // The empty joiner receives the whole room from the host.
    wait_for(&mut guest_state, |s| s.room.code == "ABCD").await;

    host.join_as("Sam").await.unwrap();
    guest.join_as("Alex").await.unwrap();
    wait_for(&mut host_state, |s| s.players.len() == 2).await;
    wait_for(&mut guest_state, |s| s.players.len() == 2).await;

    // Alex queues a clip whose highlight starts 30 seconds in.
    let clip = guest.queue_clip("xyz", Some("Banger"), 30).await.unwrap();
    wait_for(&mut host_state, |s| s.queue_items.contains_key(&clip)).await;

    host.send(Command::StartParty).await.unwrap();
    wait_for(&mut guest_state, |s| s.room.current_video_id.is_some()).await;

    // Sam has nothing queued, so the rotation lands on Alex and the clip
    // starts at its highlight.
    {
        let s = guest_state.borrow().clone();
        assert_eq!(s.room.status, RoomStatus::Playing);
        assert_eq!(s.room.active_player_id, Some(guest.device_id()));
        assert_eq!(s.room.active_queue_item_id, Some(clip));
        assert_eq!(s.room.current_video_id.as_deref(), Some("xyz"));
        assert_eq!(s.room.current_start_time, Some(30));
        assert_eq!(s.room.current_video_offset, Some(30));
        assert!(s.room.playback_started_at.is_some());
    }

    // Sam hypes the clip; the score shows up on Alex's device.
    host.vote(clip, 90).await.unwrap();
    wait_for(&mut guest_state, |s| s.queue_items[&clip].hype_score() == 90).await;

    // Sam skips. The clip retires and, with nothing left queued, the room
    // parks on the next seat.
    host.skip().await.unwrap();
    wait_for(&mut guest_state, |s| {
        s.queue_items[&clip].status == ItemStatus::Played && s.room.current_video_id.is_none()
    })
    .await;

    guest.leave().await;
    host.leave().await;
}

#[tokio::test]
async fn test_round_clock_auto_skips() {
    let hub = MemoryHub::new();
    let code = RoomCode::parse("FAST").unwrap();
    let dir = tempfile::tempdir().unwrap();

    let session = host_session(&hub, dir.path(), &code).await;
    let mut events = session.subscribe();
    let mut state = session.watch_state();

    session.join_as("Solo").await.unwrap();
    let clip = session.queue_clip("quick", None, 0).await.unwrap();
    session.send(Command::SetTimerDuration(1)).await.unwrap();
    session.send(Command::StartParty).await.unwrap();
    wait_for(&mut state, |s| s.room.current_video_id.is_some()).await;

    // The one-second round clock expires and the session advances on its own.
    let fired = timeout(WAIT, async {
        loop {
            if let SessionEvent::AutoSkipped { item } = events.recv().await.unwrap() {
                return item;
            }
        }
    })
    .await
    .expect("auto-skip should fire");
    assert_eq!(fired, clip);

    wait_for(&mut state, |s| {
        s.queue_items[&clip].status == ItemStatus::Played && s.room.current_video_id.is_none()
    })
    .await;

    session.leave().await;
}

#[tokio::test]
async fn test_votes_average_across_devices() {
    let hub = MemoryHub::new();
    let code = RoomCode::parse("VOTE").unwrap();
    let host_dir = tempfile::tempdir().unwrap();
    let guest_dir = tempfile::tempdir().unwrap();

    let host = host_session(&hub, host_dir.path(), &code).await;
    let guest = join_session(&hub, guest_dir.path(), &code).await;
    let mut host_state = host.watch_state();
    let mut guest_state = guest.watch_state();

    host.join_as("Owner").await.unwrap();
    guest.join_as("Crowd").await.unwrap();
    wait_for(&mut host_state, |s| s.players.len() == 2).await;
    wait_for(&mut guest_state, |s| s.players.len() == 2).await;

    // The owner scores their own clip too, so switch self-voting on.
    host.send(Command::SetAllowSelfVoting(true)).await.unwrap();
    let clip = host.queue_clip("anthem", None, 0).await.unwrap();
    wait_for(&mut guest_state, |s| {
        s.room.allow_self_voting && s.queue_items.contains_key(&clip)
    })
    .await;

    host.vote(clip, 100).await.unwrap();
    guest.vote(clip, 40).await.unwrap();

    // Both votes land in the shared map and both devices agree on the mean.
    wait_for(&mut host_state, |s| s.queue_items[&clip].votes.len() == 2).await;
    wait_for(&mut guest_state, |s| s.queue_items[&clip].votes.len() == 2).await;
    assert_eq!(host_state.borrow().queue_items[&clip].hype_score(), 70);
    assert_eq!(guest_state.borrow().queue_items[&clip].hype_score(), 70);

    guest.leave().await;
    host.leave().await;
}

#[tokio::test]
async fn test_kick_removes_player_and_their_clips() {
    let hub = MemoryHub::new();
    let code = RoomCode::parse("KICK").unwrap();
    let host_dir = tempfile::tempdir().unwrap();
    let guest_dir = tempfile::tempdir().unwrap();

    let host = host_session(&hub, host_dir.path(), &code).await;
    let guest = join_session(&hub, guest_dir.path(), &code).await;
    let mut host_state = host.watch_state();
    let mut guest_state = guest.watch_state();

    host.join_as("Boss").await.unwrap();
    guest.join_as("Trouble").await.unwrap();
    wait_for(&mut host_state, |s| s.players.len() == 2).await;

    let clip = guest.queue_clip("loud", None, 0).await.unwrap();
    wait_for(&mut host_state, |s| s.queue_items.contains_key(&clip)).await;

    host.send(Command::KickPlayer(guest.device_id())).await.unwrap();

    // The kicked device syncs its own removal, clips included.
    wait_for(&mut guest_state, |s| {
        s.players.len() == 1 && !s.queue_items.contains_key(&clip)
    })
    .await;

    guest.leave().await;
    host.leave().await;
}

#[tokio::test]
async fn test_rejoin_resumes_from_snapshot() {
    let hub = MemoryHub::new();
    let code = RoomCode::parse("BACK").unwrap();
    let host_dir = tempfile::tempdir().unwrap();
    let guest_dir = tempfile::tempdir().unwrap();

    let host = host_session(&hub, host_dir.path(), &code).await;
    let guest = join_session(&hub, guest_dir.path(), &code).await;
    let mut host_state = host.watch_state();

    host.join_as("Anchor").await.unwrap();
    guest.join_as("Memo").await.unwrap();
    let first_clip = guest.queue_clip("before", None, 0).await.unwrap();
    wait_for(&mut host_state, |s| s.queue_items.contains_key(&first_clip)).await;

    let guest_device = guest.device_id();
    guest.leave().await;

    // The room moves on while the guest is away.
    let second_clip = host.queue_clip("during", None, 0).await.unwrap();

    // Same storage dir: the rejoin keeps its device id and seeds from the
    // snapshot before the mesh fills in what it missed.
    let rejoined = join_session(&hub, guest_dir.path(), &code).await;
    assert_eq!(rejoined.device_id(), guest_device);
    assert!(
        rejoined.state().queue_items.contains_key(&first_clip),
        "snapshot should seed the rejoin"
    );

    let mut rejoined_state = rejoined.watch_state();
    wait_for(&mut rejoined_state, |s| {
        s.queue_items.contains_key(&second_clip) && s.players.len() == 2
    })
    .await;

    rejoined.leave().await;
    host.leave().await;
}
