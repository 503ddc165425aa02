//! Room sessions.
//!
//! A [`Session`] owns one device's replica for one room: the document, the
//! sync engine, the transport, and the snapshot store, all driven by a
//! single task. Callers hold a [`SessionHandle`] and interact three ways:
//!
//! - send [`Command`]s (fire-and-forget game actions),
//! - watch the [`GameState`] channel for every change,
//! - subscribe to [`SessionEvent`]s for the things state alone cannot
//!   show (peers coming and going, auto-skips, shutdown).
//!
//! The loop reacts to transport events and commands as they arrive, and a
//! periodic tick drives the two time-based behaviors: firing the auto-skip
//! edge and flushing the debounced snapshot.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use auxparty_core::{
    epoch_ms, remaining_secs, AutoSkipEdge, GameDoc, GameState, RoomCode, RoomStatus,
};
use log::{debug, info, warn};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::engine::SyncEngine;
use crate::identity::{load_or_create_device_id, IdentityError};
use crate::snapshot::SnapshotStore;
use crate::transport::{MeshConfig, MeshTransport, PeerEvent, RoomTransport};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session has ended")]
    Ended,
    #[error(transparent)]
    Identity(#[from] IdentityError),
}

/// Game actions a session accepts. Timestamps are stamped on receipt so
/// every command uses the session's clock.
#[derive(Debug, Clone)]
pub enum Command {
    AddPlayer { id: Uuid, nickname: String },
    QueueClip {
        id: Uuid,
        owner: Uuid,
        video_id: String,
        video_title: Option<String>,
        highlight_start: u32,
    },
    DeleteClip { item: Uuid, requester: Uuid },
    CastVote { item: Uuid, voter: Uuid, score: u8 },
    Advance { mark_current_played: bool },
    Pause,
    Resume,
    ExtendRound { secs: u32 },
    SetAutoSkip(bool),
    SetAllowSelfVoting(bool),
    SetTimerDuration(u32),
    KickPlayer(Uuid),
    ToggleVip(Uuid),
    StartParty,
    EndParty,
    Leave,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A transport peer finished its handshake.
    PeerJoined(Uuid),
    PeerLeft(Uuid),
    /// Remote operations from this device were merged.
    Synced { from: Uuid },
    /// The round clock hit zero and the rotation moved on.
    AutoSkipped { item: Uuid },
    SnapshotSaved,
    /// Terminal; the session task is about to finish.
    Left,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Cadence of the timer/persistence tick.
    pub tick_interval: Duration,
    /// Quiet period after the last change before the snapshot is written.
    pub snapshot_debounce: Duration,
    /// Where snapshots and the device id live.
    pub storage_dir: PathBuf,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(250),
            snapshot_debounce: Duration::from_millis(500),
            storage_dir: PathBuf::from("auxparty-data"),
            event_capacity: 64,
        }
    }
}

impl SessionConfig {
    /// Tight intervals so tests settle fast.
    pub fn for_testing(dir: impl Into<PathBuf>) -> Self {
        Self {
            tick_interval: Duration::from_millis(10),
            snapshot_debounce: Duration::from_millis(25),
            storage_dir: dir.into(),
            event_capacity: 64,
        }
    }
}

pub struct Session {
    config: SessionConfig,
    doc: GameDoc,
    engine: SyncEngine,
    transport: Box<dyn RoomTransport>,
    store: SnapshotStore,
    edge: AutoSkipEdge,
    state_tx: watch::Sender<Arc<GameState>>,
    events_tx: broadcast::Sender<SessionEvent>,
    commands_rx: mpsc::Receiver<Command>,
    snapshot_due: Option<Instant>,
}

impl Session {
    /// Hosts a new room: fresh code, fresh document, mesh transport.
    pub fn host(
        config: SessionConfig,
        mesh: &MeshConfig,
    ) -> Result<(SessionHandle, RoomCode), SessionError> {
        let code = RoomCode::generate();
        let device_id = load_or_create_device_id(&config.storage_dir)?;
        let doc = GameDoc::for_host(&code, epoch_ms());
        let transport = MeshTransport::connect(mesh, &code);
        info!("hosting room {code}");
        let handle = Self::start(config, code.clone(), device_id, doc, Box::new(transport));
        Ok((handle, code))
    }

    /// Joins an existing room, seeding from the local snapshot when one
    /// matches the code.
    pub fn join(
        config: SessionConfig,
        mesh: &MeshConfig,
        code: RoomCode,
    ) -> Result<SessionHandle, SessionError> {
        let device_id = load_or_create_device_id(&config.storage_dir)?;
        let doc = SnapshotStore::new(&config.storage_dir, code.clone())
            .restore_or_fresh()
            .unwrap_or_default();
        let transport = MeshTransport::connect(mesh, &code);
        info!("joining room {code}");
        Ok(Self::start(config, code, device_id, doc, Box::new(transport)))
    }

    /// Wires a session around an existing document and transport and spawns
    /// its task.
    pub fn start(
        config: SessionConfig,
        code: RoomCode,
        device_id: Uuid,
        doc: GameDoc,
        transport: Box<dyn RoomTransport>,
    ) -> SessionHandle {
        let (commands_tx, commands_rx) = mpsc::channel(64);
        let (events_tx, _) = broadcast::channel(config.event_capacity);
        let (state_tx, state_rx) = watch::channel(Arc::new(doc.state()));
        let store = SnapshotStore::new(&config.storage_dir, code);
        let session = Session {
            config,
            doc,
            engine: SyncEngine::new(device_id),
            transport,
            store,
            edge: AutoSkipEdge::new(),
            state_tx,
            events_tx: events_tx.clone(),
            commands_rx,
            snapshot_due: None,
        };
        let task = tokio::spawn(session.run());
        SessionHandle {
            device_id,
            commands: commands_tx,
            state: state_rx,
            events: events_tx,
            task,
        }
    }

    async fn run(mut self) {
        info!("session running as device {}", self.engine.device_id());
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        loop {
            tokio::select! {
                event = self.transport.next_event() => match event {
                    Some(event) => self.on_peer_event(event).await,
                    None => {
                        warn!("transport closed, ending session");
                        break;
                    }
                },
                cmd = self.commands_rx.recv() => match cmd {
                    Some(Command::Leave) | None => break,
                    Some(cmd) => self.on_command(cmd).await,
                },
                _ = ticker.tick() => self.on_tick().await,
            }
        }
        self.shutdown().await;
    }

    async fn on_peer_event(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::Joined(peer) => {
                let hello = self.engine.greeting_for(&self.doc, peer);
                self.send_to(peer, &hello).await;
                let _ = self.events_tx.send(SessionEvent::PeerJoined(peer));
            }
            PeerEvent::Left(peer) => {
                if let Some(device) = self.engine.forget_peer(peer) {
                    self.apply_local(|doc| {
                        doc.set_player_online(device, false);
                    })
                    .await;
                }
                let _ = self.events_tx.send(SessionEvent::PeerLeft(peer));
            }
            PeerEvent::Packet(peer, bytes) => match self.engine.handle_packet(&self.doc, peer, &bytes) {
                Ok(outcome) => {
                    if let Some(reply) = outcome.reply {
                        self.send_to(peer, &reply).await;
                    }
                    if outcome.applied {
                        self.publish_state();
                        self.snapshot_due =
                            Some(Instant::now() + self.config.snapshot_debounce);
                        let _ = self.events_tx.send(SessionEvent::Synced {
                            from: outcome.sender_device,
                        });
                    }
                }
                Err(e) => warn!("dropping bad packet from {peer}: {e}"),
            },
        }
    }

    async fn on_command(&mut self, cmd: Command) {
        let now = epoch_ms();
        self.apply_local(|doc| dispatch(doc, cmd, now)).await;
    }

    async fn on_tick(&mut self) {
        let state = self.doc.state();
        let now = epoch_ms();

        if state.room.status == RoomStatus::Playing {
            if state.room.current_video_id.is_some() {
                if state.room.auto_skip {
                    let remaining = remaining_secs(&state.room, now);
                    if let Some(item) = self
                        .edge
                        .observe(state.room.active_queue_item_id, remaining)
                    {
                        debug!("round clock expired for {item}, advancing");
                        self.apply_local(|doc| {
                            doc.advance_turn(now, true);
                        })
                        .await;
                        let _ = self.events_tx.send(SessionEvent::AutoSkipped { item });
                    }
                }
            } else if state.pending_count() > 0 {
                // Someone queued a clip while the room sat idle.
                debug!("clips queued while idle, starting next round");
                self.apply_local(|doc| {
                    doc.advance_turn(now, false);
                })
                .await;
            }
        }

        if let Some(due) = self.snapshot_due {
            if Instant::now() >= due {
                self.snapshot_due = None;
                match self.store.save(&self.doc, now) {
                    Ok(()) => {
                        let _ = self.events_tx.send(SessionEvent::SnapshotSaved);
                    }
                    Err(e) => warn!("snapshot failed: {e}"),
                }
            }
        }
    }

    /// Runs a local mutation; when the document actually changed, publishes
    /// the new state, arms the snapshot debounce and pushes diffs to every
    /// peer whose cursor is behind.
    async fn apply_local<F: FnOnce(&GameDoc)>(&mut self, f: F) -> bool {
        let before = self.doc.state_vector();
        f(&self.doc);
        if self.doc.state_vector() == before {
            return false;
        }
        self.publish_state();
        self.snapshot_due = Some(Instant::now() + self.config.snapshot_debounce);
        for peer in self.engine.peers() {
            match self.engine.push_for(&self.doc, peer) {
                Ok(Some(msg)) => self.send_to(peer, &msg).await,
                Ok(None) => {}
                Err(e) => warn!("push to {peer} failed: {e}"),
            }
        }
        true
    }

    async fn send_to(&mut self, peer: Uuid, msg: &crate::protocol::SyncMessage) {
        match msg.encode() {
            Ok(bytes) => {
                if let Err(e) = self.transport.send(peer, bytes).await {
                    warn!("send to {peer} failed: {e}");
                }
            }
            Err(e) => warn!("encoding message for {peer} failed: {e}"),
        }
    }

    fn publish_state(&self) {
        self.state_tx.send_replace(Arc::new(self.doc.state()));
    }

    async fn shutdown(&mut self) {
        if let Err(e) = self.store.save(&self.doc, epoch_ms()) {
            warn!("final snapshot failed: {e}");
        }
        if let Err(e) = self.transport.leave().await {
            warn!("leaving transport failed: {e}");
        }
        let _ = self.events_tx.send(SessionEvent::Left);
        info!("session ended");
    }
}

fn dispatch(doc: &GameDoc, cmd: Command, now: i64) {
    match cmd {
        Command::AddPlayer { id, nickname } => {
            doc.add_player(id, &nickname, now);
        }
        Command::QueueClip {
            id,
            owner,
            video_id,
            video_title,
            highlight_start,
        } => {
            doc.queue_clip(
                id,
                owner,
                &video_id,
                video_title.as_deref(),
                highlight_start,
                now,
            );
        }
        Command::DeleteClip { item, requester } => {
            doc.delete_clip(item, requester);
        }
        Command::CastVote { item, voter, score } => {
            doc.cast_vote(item, voter, score);
        }
        Command::Advance {
            mark_current_played,
        } => {
            doc.advance_turn(now, mark_current_played);
        }
        Command::Pause => {
            doc.pause_playback(now);
        }
        Command::Resume => {
            doc.resume_playback(now);
        }
        Command::ExtendRound { secs } => {
            doc.extend_round(secs);
        }
        Command::SetAutoSkip(on) => doc.set_auto_skip(on),
        Command::SetAllowSelfVoting(on) => doc.set_allow_self_voting(on),
        Command::SetTimerDuration(secs) => {
            doc.set_timer_duration(secs);
        }
        Command::KickPlayer(player) => {
            doc.kick_player(player, now);
        }
        Command::ToggleVip(player) => {
            doc.toggle_vip(player);
        }
        Command::StartParty => {
            doc.start_party(now);
        }
        Command::EndParty => {
            doc.end_party();
        }
        // Intercepted by the run loop.
        Command::Leave => {}
    }
}

/// Cheap-to-clone front door to a running session.
pub struct SessionHandle {
    device_id: Uuid,
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<Arc<GameState>>,
    events: broadcast::Sender<SessionEvent>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Stable id of this device; also the player id used by the
    /// convenience methods.
    pub fn device_id(&self) -> Uuid {
        self.device_id
    }

    /// Latest materialized state.
    pub fn state(&self) -> Arc<GameState> {
        self.state.borrow().clone()
    }

    /// A receiver that yields on every state change.
    pub fn watch_state(&self) -> watch::Receiver<Arc<GameState>> {
        self.state.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn send(&self, cmd: Command) -> Result<(), SessionError> {
        self.commands.send(cmd).await.map_err(|_| SessionError::Ended)
    }

    /// Joins the game as this device.
    pub async fn join_as(&self, nickname: &str) -> Result<(), SessionError> {
        self.send(Command::AddPlayer {
            id: self.device_id,
            nickname: nickname.to_string(),
        })
        .await
    }

    /// Queues a clip owned by this device; returns the new item's id.
    pub async fn queue_clip(
        &self,
        video_id: &str,
        video_title: Option<&str>,
        highlight_start: u32,
    ) -> Result<Uuid, SessionError> {
        let id = Uuid::new_v4();
        self.send(Command::QueueClip {
            id,
            owner: self.device_id,
            video_id: video_id.to_string(),
            video_title: video_title.map(str::to_string),
            highlight_start,
        })
        .await?;
        Ok(id)
    }

    /// Removes a clip as this device; honored only when this device owns
    /// it or is a VIP.
    pub async fn delete_clip(&self, item: Uuid) -> Result<(), SessionError> {
        self.send(Command::DeleteClip {
            item,
            requester: self.device_id,
        })
        .await
    }

    /// Votes on a clip as this device.
    pub async fn vote(&self, item: Uuid, score: u8) -> Result<(), SessionError> {
        self.send(Command::CastVote {
            item,
            voter: self.device_id,
            score,
        })
        .await
    }

    /// Skips the current clip.
    pub async fn skip(&self) -> Result<(), SessionError> {
        self.send(Command::Advance {
            mark_current_played: true,
        })
        .await
    }

    /// Leaves the room and waits for the session task to finish its final
    /// snapshot.
    pub async fn leave(self) {
        let _ = self.commands.send(Command::Leave).await;
        let _ = self.task.await;
    }
}
