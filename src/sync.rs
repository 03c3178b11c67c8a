//! Reconciliation between a local session and an authoritative remote copy.
//!
//! Authority is one-directional: every locally accepted move is pushed to the
//! remote store as a partial update, and every snapshot received back is
//! treated as fully authoritative. The local session is rebuilt by replaying
//! the remote move list through the rules engine, never merged field by
//! field. Remote failures are isolated here; the session continues in
//! local-optimistic mode.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use derive_getters::Getters;
use derive_more::{Display, Error, From};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument, warn};

use crate::session::{GameSession, GameSnapshot, Player, SessionError, SessionId};
use crate::{GameResult, GameStatus, Side};

/// Characters used in human-enterable room codes.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Length of a room code.
const CODE_LEN: usize = 6;

/// Error surfaced by the sync layer.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error, From)]
pub enum SyncError {
    /// Push or subscribe failed. Logged and non-fatal: the session keeps
    /// playing locally.
    #[display("remote unavailable: {_0}")]
    RemoteUnavailable(#[error(not(source))] String),
    /// No game document under this id.
    #[display("no remote game {_0}")]
    GameNotFound(#[error(not(source))] SessionId),
    /// No room document under this code.
    #[display("no room with code {_0}")]
    RoomNotFound(#[error(not(source))] String),
    /// Room already consumed by another guest.
    #[display("room {_0} already has a guest")]
    RoomTaken(#[error(not(source))] String),
    /// The authoritative move list failed to replay locally.
    #[from]
    Rebuild(SessionError),
}

/// Partial update pushed after each locally accepted move.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Getters)]
pub struct GameUpdate {
    /// Full move record including the new ply.
    moves: Vec<String>,
    /// Side to move after the update.
    active_side: Side,
    /// Session status after the update.
    status: GameStatus,
    /// Result, when the move finished the game.
    result: Option<GameResult>,
    /// Completion time, when the move finished the game.
    ended_at: Option<DateTime<Utc>>,
}

impl GameUpdate {
    /// Builds the partial update corresponding to a snapshot.
    pub fn from_snapshot(snapshot: &GameSnapshot) -> Self {
        Self {
            moves: snapshot.moves().clone(),
            active_side: *snapshot.active_side(),
            status: *snapshot.status(),
            result: *snapshot.result(),
            ended_at: *snapshot.ended_at(),
        }
    }
}

/// Room lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RoomStatus {
    /// Created by a host, waiting for exactly one guest.
    Waiting,
    /// Guest arrived; the room is spent.
    Active,
}

/// A room document: maps a short code to a game id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Getters)]
pub struct Room {
    /// Human-enterable join code.
    code: String,
    /// The game this room leads to.
    game_id: SessionId,
    /// The hosting player.
    host: Player,
    /// The guest, once joined.
    guest: Option<Player>,
    /// Waiting or consumed.
    status: RoomStatus,
}

/// The remote store's interface: snapshot documents keyed by session id and
/// room documents keyed by code.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Creates the game document.
    async fn create_game(&self, snapshot: GameSnapshot) -> Result<(), SyncError>;

    /// Applies a partial update to the game document.
    async fn update_game(&self, id: SessionId, update: GameUpdate) -> Result<(), SyncError>;

    /// Fetches the current snapshot, if the game exists.
    async fn fetch_game(&self, id: SessionId) -> Result<Option<GameSnapshot>, SyncError>;

    /// Subscribes to snapshot changes for a game. The returned channel yields
    /// each new authoritative snapshot; dropping it unsubscribes.
    async fn subscribe(&self, id: SessionId) -> Result<mpsc::Receiver<GameSnapshot>, SyncError>;

    /// Creates a room for the given waiting game and returns it.
    async fn create_room(&self, game_id: SessionId, host: Player) -> Result<Room, SyncError>;

    /// Consumes a room: seats the guest in the game document and marks the
    /// room active. Exactly one guest may ever join.
    async fn join_room(&self, code: &str, guest: Player) -> Result<Room, SyncError>;
}

#[derive(Debug)]
struct GameDoc {
    snapshot: GameSnapshot,
    revision: u64,
    changed: watch::Sender<u64>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    games: HashMap<SessionId, GameDoc>,
    rooms: HashMap<String, Room>,
}

/// In-process remote store. Backs the standalone server and the sync tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryRemoteStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryRemoteStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot plus its revision counter, for long-poll reads.
    pub fn get_with_revision(&self, id: SessionId) -> Option<(GameSnapshot, u64)> {
        let inner = self.inner.lock().unwrap();
        inner
            .games
            .get(&id)
            .map(|doc| (doc.snapshot.clone(), doc.revision))
    }

    /// Waits until the game's revision exceeds `since`, then returns the
    /// fresh snapshot. Returns `None` if the game does not exist.
    pub async fn wait_change(
        &self,
        id: SessionId,
        since: u64,
    ) -> Option<(GameSnapshot, u64)> {
        let mut rx = {
            let inner = self.inner.lock().unwrap();
            let doc = inner.games.get(&id)?;
            if doc.revision > since {
                return Some((doc.snapshot.clone(), doc.revision));
            }
            doc.changed.subscribe()
        };
        loop {
            if rx.changed().await.is_err() {
                return None;
            }
            let current = *rx.borrow();
            if current > since {
                return self.get_with_revision(id);
            }
        }
    }

    fn bump(doc: &mut GameDoc) {
        doc.revision += 1;
        // Receivers may all be gone; that just means nobody is watching.
        let _ = doc.changed.send(doc.revision);
    }

    fn fresh_code(rooms: &HashMap<String, Room>) -> String {
        let mut rng = rand::thread_rng();
        loop {
            let code: String = (0..CODE_LEN)
                .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
                .collect();
            if !rooms.contains_key(&code) {
                return code;
            }
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    #[instrument(skip(self, snapshot), fields(session_id = %snapshot.id()))]
    async fn create_game(&self, snapshot: GameSnapshot) -> Result<(), SyncError> {
        let mut inner = self.inner.lock().unwrap();
        let id = *snapshot.id();
        // A second create (a joining peer publishing its rebuilt copy) must
        // not reset the revision counter or drop existing watchers.
        if let Some(doc) = inner.games.get_mut(&id) {
            doc.snapshot = snapshot;
            Self::bump(doc);
            debug!(session_id = %id, "Remote game document re-published");
            return Ok(());
        }
        let (changed, _) = watch::channel(0);
        inner.games.insert(
            id,
            GameDoc {
                snapshot,
                revision: 0,
                changed,
            },
        );
        info!(session_id = %id, "Remote game document created");
        Ok(())
    }

    #[instrument(skip(self, update), fields(session_id = %id, plies = update.moves().len()))]
    async fn update_game(&self, id: SessionId, update: GameUpdate) -> Result<(), SyncError> {
        let mut inner = self.inner.lock().unwrap();
        let doc = inner
            .games
            .get_mut(&id)
            .ok_or(SyncError::GameNotFound(id))?;
        doc.snapshot = doc.snapshot.clone().merged(&update);
        Self::bump(doc);
        debug!(revision = doc.revision, "Remote game document updated");
        Ok(())
    }

    async fn fetch_game(&self, id: SessionId) -> Result<Option<GameSnapshot>, SyncError> {
        Ok(self.get_with_revision(id).map(|(snapshot, _)| snapshot))
    }

    #[instrument(skip(self))]
    async fn subscribe(&self, id: SessionId) -> Result<mpsc::Receiver<GameSnapshot>, SyncError> {
        let mut change_rx = {
            let inner = self.inner.lock().unwrap();
            let doc = inner.games.get(&id).ok_or(SyncError::GameNotFound(id))?;
            doc.changed.subscribe()
        };
        let (tx, rx) = mpsc::channel(16);
        let store = self.clone();
        tokio::spawn(async move {
            while change_rx.changed().await.is_ok() {
                let Some((snapshot, revision)) = store.get_with_revision(id) else {
                    break;
                };
                debug!(session_id = %id, revision, "Forwarding remote snapshot");
                if tx.send(snapshot).await.is_err() {
                    break; // subscriber dropped
                }
            }
        });
        info!(session_id = %id, "Remote subscription established");
        Ok(rx)
    }

    #[instrument(skip(self, host))]
    async fn create_room(&self, game_id: SessionId, host: Player) -> Result<Room, SyncError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.games.contains_key(&game_id) {
            return Err(SyncError::GameNotFound(game_id));
        }
        let code = Self::fresh_code(&inner.rooms);
        let room = Room {
            code: code.clone(),
            game_id,
            host,
            guest: None,
            status: RoomStatus::Waiting,
        };
        inner.rooms.insert(code.clone(), room.clone());
        info!(%code, %game_id, "Room created");
        Ok(room)
    }

    #[instrument(skip(self, guest))]
    async fn join_room(&self, code: &str, guest: Player) -> Result<Room, SyncError> {
        let mut inner = self.inner.lock().unwrap();
        let room = inner
            .rooms
            .get_mut(code)
            .ok_or_else(|| SyncError::RoomNotFound(code.to_string()))?;
        if room.status != RoomStatus::Waiting {
            warn!(%code, "Join on a consumed room");
            return Err(SyncError::RoomTaken(code.to_string()));
        }
        room.guest = Some(guest.clone());
        room.status = RoomStatus::Active;
        let room = room.clone();

        let doc = inner
            .games
            .get_mut(&room.game_id)
            .ok_or(SyncError::GameNotFound(room.game_id))?;
        doc.snapshot = doc.snapshot.clone().with_guest(guest);
        Self::bump(doc);
        info!(%code, game_id = %room.game_id, "Guest joined room");
        Ok(room)
    }
}

/// Reconciles one locally owned session against the remote store.
pub struct SyncAdapter {
    store: Arc<dyn RemoteStore>,
    session_id: SessionId,
}

impl SyncAdapter {
    /// Creates the adapter for a session.
    pub fn new(store: Arc<dyn RemoteStore>, session_id: SessionId) -> Self {
        Self { store, session_id }
    }

    /// Publishes the initial game document for a hosted session.
    ///
    /// # Errors
    ///
    /// Propagates [`SyncError::RemoteUnavailable`] from the store.
    pub async fn publish(&self, snapshot: GameSnapshot) -> Result<(), SyncError> {
        self.store.create_game(snapshot).await
    }

    /// Pushes a locally accepted move as a partial update. Failures are
    /// logged and swallowed: the session continues optimistically and the
    /// next authoritative snapshot reconciles.
    #[instrument(skip(self, snapshot), fields(session_id = %self.session_id))]
    pub async fn push(&self, snapshot: &GameSnapshot) {
        let update = GameUpdate::from_snapshot(snapshot);
        if let Err(err) = self.store.update_game(self.session_id, update).await {
            warn!(error = %err, "Remote push failed, continuing locally");
        }
    }

    /// Subscribes to authoritative snapshots for this session.
    ///
    /// # Errors
    ///
    /// Propagates store failures; the caller may keep playing locally.
    pub async fn subscribe(&self) -> Result<mpsc::Receiver<GameSnapshot>, SyncError> {
        self.store.subscribe(self.session_id).await
    }

    /// Rebuilds local state from an authoritative remote snapshot.
    ///
    /// Last-writer-wins at snapshot granularity: the remote copy always
    /// replaces the local one, even if a local push has not yet round-tripped
    /// (a peer snapshot that predates it can drop that move).
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Rebuild`] if the remote move list fails to
    /// replay.
    pub fn rebuild(snapshot: GameSnapshot) -> Result<GameSession, SyncError> {
        Ok(GameSession::from_snapshot(snapshot)?)
    }
}

impl GameSnapshot {
    /// Snapshot with a partial update folded in. Only the fields a move
    /// changes are touched; identity and clock fields survive.
    pub fn merged(self, update: &GameUpdate) -> Self {
        let mut merged = self;
        merged.apply_update(
            update.moves.clone(),
            update.active_side,
            update.status,
            update.result,
            update.ended_at,
        );
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::GameSession;
    use crate::GameMode;

    fn hosted() -> (GameSession, MemoryRemoteStore) {
        let session = GameSession::start(GameMode::Online, Player::new("h", "Host"), None);
        (session, MemoryRemoteStore::new())
    }

    #[tokio::test]
    async fn push_reaches_subscribers() {
        let (mut session, store) = hosted();
        session.seat_guest(Player::new("g", "Guest")).unwrap();
        store.create_game(session.snapshot()).await.unwrap();

        let mut rx = store.subscribe(session.id()).await.unwrap();
        session.apply_san("e4").unwrap();

        let adapter = SyncAdapter::new(Arc::new(store), session.id());
        adapter.push(&session.snapshot()).await;

        let received = rx.recv().await.unwrap();
        assert_eq!(received.moves(), session.moves());
        assert_eq!(*received.active_side(), Side::Black);
    }

    #[tokio::test]
    async fn remote_snapshot_rebuilds_by_replay() {
        let (mut session, store) = hosted();
        session.seat_guest(Player::new("g", "Guest")).unwrap();
        store.create_game(session.snapshot()).await.unwrap();

        // A peer pushed two plies we have not seen locally.
        let mut peer = GameSession::from_snapshot(session.snapshot()).unwrap();
        peer.apply_san("e4").unwrap();
        peer.apply_san("e5").unwrap();
        store
            .update_game(session.id(), GameUpdate::from_snapshot(&peer.snapshot()))
            .await
            .unwrap();

        let remote = store.fetch_game(session.id()).await.unwrap().unwrap();
        let rebuilt = SyncAdapter::rebuild(remote).unwrap();
        assert_eq!(rebuilt.moves(), peer.moves());
        assert_eq!(rebuilt.position().board(), peer.position().board());
    }

    #[tokio::test]
    async fn remote_wins_over_unacknowledged_local_state() {
        let (mut session, store) = hosted();
        session.seat_guest(Player::new("g", "Guest")).unwrap();
        store.create_game(session.snapshot()).await.unwrap();

        // Local optimistic move that never reaches the store.
        session.apply_san("d4").unwrap();

        // Peer snapshot without it arrives; it is authoritative.
        let remote = store.fetch_game(session.id()).await.unwrap().unwrap();
        let rebuilt = SyncAdapter::rebuild(remote).unwrap();
        assert!(rebuilt.moves().is_empty());
    }

    #[tokio::test]
    async fn room_is_consumed_by_exactly_one_guest() {
        let (session, store) = hosted();
        store.create_game(session.snapshot()).await.unwrap();
        let room = store
            .create_room(session.id(), Player::new("h", "Host"))
            .await
            .unwrap();
        assert_eq!(room.code().len(), CODE_LEN);
        assert_eq!(*room.status(), RoomStatus::Waiting);

        let joined = store
            .join_room(room.code(), Player::new("g", "Guest"))
            .await
            .unwrap();
        assert_eq!(*joined.status(), RoomStatus::Active);

        // The game document now shows the guest seated and active.
        let snapshot = store.fetch_game(session.id()).await.unwrap().unwrap();
        assert_eq!(*snapshot.status(), GameStatus::Active);

        let second = store.join_room(room.code(), Player::new("x", "Other")).await;
        assert!(matches!(second, Err(SyncError::RoomTaken(_))));
    }

    #[tokio::test]
    async fn unknown_room_and_game_are_reported() {
        let store = MemoryRemoteStore::new();
        assert!(matches!(
            store.join_room("NOPE11", Player::new("g", "G")).await,
            Err(SyncError::RoomNotFound(_))
        ));
        let missing = SessionId::new_v4();
        assert!(matches!(
            store.subscribe(missing).await,
            Err(SyncError::GameNotFound(_))
        ));
    }
}
