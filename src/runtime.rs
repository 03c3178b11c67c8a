//! Async driver for a single game session.
//!
//! One task owns the [`GameSession`]; clock ticks, human moves, engine
//! results, and remote snapshots all arrive as commands on one mpsc channel,
//! so no two callbacks ever mutate the session concurrently. The engine's
//! search runs on the blocking pool behind a deliberation delay, tagged with
//! a generation counter so results that resolve after a reset are discarded
//! instead of being applied to the wrong session.

use chess::ChessMove;
use derive_more::{Display, Error, From};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::clock::ClockPair;
use crate::search::{self, Difficulty};
use crate::session::{AppliedMove, GameSession, GameSnapshot, SessionError, SessionId};
use crate::sync::{RemoteStore, SyncAdapter};
use crate::{GameMode, GameResult, Side};

/// Default artificial deliberation before an engine move.
pub const ENGINE_DELAY: Duration = Duration::from_millis(500);

/// Where the runtime delivers snapshots and final results.
///
/// Implementations must swallow their own failures: persistence problems are
/// logged, never allowed to corrupt a live session.
pub trait Persistence: Send + Sync {
    /// Stores the snapshot for the owning player. Called on every mutation.
    fn save_snapshot(&self, owner_id: &str, snapshot: &GameSnapshot);

    /// Records the final outcome exactly once per finished session.
    fn record_result(&self, owner_id: &str, snapshot: &GameSnapshot);
}

/// Error surfaced by [`SessionHandle`] calls.
#[derive(Debug, Display, Error, From)]
pub enum RuntimeError {
    /// The session rejected the operation.
    #[from]
    Session(SessionError),
    /// The runtime has been reset and its task is gone.
    #[display("session runtime stopped")]
    Stopped,
}

/// Configuration for spawning a session runtime.
pub struct RuntimeConfig {
    /// Engine strength for `ai` mode.
    pub difficulty: Difficulty,
    /// Which side the engine plays in `ai` mode.
    pub engine_side: Side,
    /// Deliberation delay before the engine's move.
    pub engine_delay: Duration,
    /// Clock tick interval, or `None` to run without a tick source.
    pub tick_interval: Option<Duration>,
    /// Owner identity for persistence, if any.
    pub owner_id: Option<String>,
    /// Offline snapshot store.
    pub persistence: Option<Arc<dyn Persistence>>,
    /// Remote store for `online` mode.
    pub remote: Option<Arc<dyn RemoteStore>>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            difficulty: Difficulty::Medium,
            engine_side: Side::Black,
            engine_delay: ENGINE_DELAY,
            tick_interval: Some(Duration::from_secs(1)),
            owner_id: None,
            persistence: None,
            remote: None,
        }
    }
}

/// Observable session activity, broadcast to subscribers.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A move was accepted.
    MoveApplied {
        /// The move in SAN.
        san: String,
        /// Whether the engine played it.
        by_engine: bool,
    },
    /// The clock advanced.
    Clock {
        /// Remaining time for both sides.
        clocks: ClockPair,
    },
    /// The session finished.
    GameOver {
        /// The final result.
        result: GameResult,
    },
    /// An authoritative remote snapshot replaced local state.
    Rebuilt,
}

enum Command {
    ApplyMove {
        from: String,
        to: String,
        promotion: Option<char>,
        reply: oneshot::Sender<Result<AppliedMove, SessionError>>,
    },
    ApplySan {
        san: String,
        reply: oneshot::Sender<Result<AppliedMove, SessionError>>,
    },
    Resign {
        side: Side,
        reply: oneshot::Sender<Result<GameResult, SessionError>>,
    },
    OfferDraw {
        reply: oneshot::Sender<Result<GameResult, SessionError>>,
    },
    Snapshot {
        reply: oneshot::Sender<GameSnapshot>,
    },
    Export {
        reply: oneshot::Sender<String>,
    },
    Tick,
    EngineMove {
        generation: u64,
        mv: ChessMove,
    },
    RemoteSnapshot(GameSnapshot),
    Reset,
}

/// Clonable handle to a running session task.
#[derive(Clone)]
pub struct SessionHandle {
    id: SessionId,
    tx: mpsc::Sender<Command>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionHandle {
    /// The session's id.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Subscribes to session events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| RuntimeError::Stopped)?;
        rx.await.map_err(|_| RuntimeError::Stopped)
    }

    /// Applies a human move from coordinate input.
    ///
    /// # Errors
    ///
    /// Session rejections pass through; [`RuntimeError::Stopped`] after a
    /// reset.
    pub async fn apply_move(
        &self,
        from: &str,
        to: &str,
        promotion: Option<char>,
    ) -> Result<AppliedMove, RuntimeError> {
        let (from, to) = (from.to_string(), to.to_string());
        Ok(self
            .request(|reply| Command::ApplyMove {
                from,
                to,
                promotion,
                reply,
            })
            .await??)
    }

    /// Applies a human move given in standard algebraic notation.
    ///
    /// # Errors
    ///
    /// As [`SessionHandle::apply_move`].
    pub async fn apply_san(&self, san: &str) -> Result<AppliedMove, RuntimeError> {
        let san = san.to_string();
        Ok(self.request(|reply| Command::ApplySan { san, reply }).await??)
    }

    /// Resigns for the given side.
    ///
    /// # Errors
    ///
    /// As [`SessionHandle::apply_move`].
    pub async fn resign(&self, side: Side) -> Result<GameResult, RuntimeError> {
        Ok(self.request(|reply| Command::Resign { side, reply }).await??)
    }

    /// Offers (and, per current behavior, immediately concludes) a draw.
    ///
    /// # Errors
    ///
    /// As [`SessionHandle::apply_move`].
    pub async fn offer_draw(&self) -> Result<GameResult, RuntimeError> {
        Ok(self.request(|reply| Command::OfferDraw { reply }).await??)
    }

    /// Current snapshot of the session.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::Stopped`] after a reset.
    pub async fn snapshot(&self) -> Result<GameSnapshot, RuntimeError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Movetext transcript of the session.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::Stopped`] after a reset.
    pub async fn export(&self) -> Result<String, RuntimeError> {
        self.request(|reply| Command::Export { reply }).await
    }

    /// Drives the clock directly, bypassing the tick source.
    #[cfg(test)]
    pub(crate) async fn tick(&self) {
        let _ = self.tx.send(Command::Tick).await;
    }

    /// Discards the session: stops the clock, cancels pending engine work
    /// and the remote subscription, and marks an unfinished game abandoned.
    pub async fn reset(&self) {
        // A send failure just means the runtime is already gone.
        let _ = self.tx.send(Command::Reset).await;
    }
}

/// Spawns the session task and its tick source.
pub struct SessionRuntime;

impl SessionRuntime {
    /// Starts driving `session` and returns the handle.
    #[instrument(skip(session, config), fields(session_id = %session.id(), mode = %session.mode()))]
    pub fn spawn(session: GameSession, config: RuntimeConfig) -> SessionHandle {
        let (tx, rx) = mpsc::channel(64);
        let (events, _) = broadcast::channel(64);
        let handle = SessionHandle {
            id: session.id(),
            tx: tx.clone(),
            events: events.clone(),
        };

        let ticker = config.tick_interval.map(|interval| {
            let tick_tx = tx.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    if tick_tx.send(Command::Tick).await.is_err() {
                        break;
                    }
                }
            })
        });

        let adapter = match (&config.remote, session.mode()) {
            (Some(store), GameMode::Online) => {
                Some(Arc::new(SyncAdapter::new(store.clone(), session.id())))
            }
            _ => None,
        };

        let actor = Actor {
            session,
            config,
            events,
            adapter,
            cmd_tx: tx,
            pusher: None,
            generation: 0,
            result_recorded: false,
            subscription: None,
            ticker,
        };
        tokio::spawn(actor.run(rx));
        info!("Session runtime spawned");
        handle
    }
}

struct Actor {
    session: GameSession,
    config: RuntimeConfig,
    events: broadcast::Sender<SessionEvent>,
    adapter: Option<Arc<SyncAdapter>>,
    cmd_tx: mpsc::Sender<Command>,
    pusher: Option<mpsc::UnboundedSender<GameSnapshot>>,
    generation: u64,
    result_recorded: bool,
    subscription: Option<JoinHandle<()>>,
    ticker: Option<JoinHandle<()>>,
}

impl Actor {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        self.spawn_pusher();
        self.connect_remote().await;

        // An engine-as-white session owes a move before any human input.
        if self.engine_to_move() {
            self.schedule_engine_move();
        }

        while let Some(command) = rx.recv().await {
            match command {
                Command::ApplyMove {
                    from,
                    to,
                    promotion,
                    reply,
                } => {
                    let outcome = self.session.apply_coords(&from, &to, promotion);
                    if let Ok(applied) = &outcome {
                        self.after_move(applied.clone(), false).await;
                    }
                    let _ = reply.send(outcome);
                }
                Command::ApplySan { san, reply } => {
                    let outcome = self.session.apply_san(&san);
                    if let Ok(applied) = &outcome {
                        self.after_move(applied.clone(), false).await;
                    }
                    let _ = reply.send(outcome);
                }
                Command::Resign { side, reply } => {
                    let outcome = self.session.resign(side);
                    if let Ok(result) = outcome {
                        self.after_finish(result).await;
                    }
                    let _ = reply.send(outcome);
                }
                Command::OfferDraw { reply } => {
                    let outcome = self.session.offer_draw();
                    if let Ok(result) = outcome {
                        self.after_finish(result).await;
                    }
                    let _ = reply.send(outcome);
                }
                Command::Snapshot { reply } => {
                    let _ = reply.send(self.session.snapshot());
                }
                Command::Export { reply } => {
                    let _ = reply.send(self.session.export());
                }
                Command::Tick => {
                    if let Some(result) = self.session.tick() {
                        self.after_finish(result).await;
                    } else {
                        let _ = self.events.send(SessionEvent::Clock {
                            clocks: self.session.clocks(),
                        });
                    }
                }
                Command::EngineMove { generation, mv } => {
                    self.handle_engine_move(generation, mv).await;
                }
                Command::RemoteSnapshot(snapshot) => {
                    self.handle_remote_snapshot(snapshot).await;
                }
                Command::Reset => {
                    self.session.abandon();
                    self.persist();
                    break;
                }
            }
        }

        self.shutdown();
    }

    fn engine_to_move(&self) -> bool {
        self.session.mode() == GameMode::Ai
            && !self.session.is_over()
            && self.session.status() == crate::GameStatus::Active
            && self.session.active_side() == self.config.engine_side
    }

    /// One queue-draining task owns all remote pushes: successive snapshots
    /// go out in acceptance order, and network latency never blocks the
    /// command loop. The task drains and exits when the actor drops the
    /// sender.
    fn spawn_pusher(&mut self) {
        let Some(adapter) = &self.adapter else {
            return;
        };
        let adapter = adapter.clone();
        let (tx, mut rx) = mpsc::unbounded_channel::<GameSnapshot>();
        self.pusher = Some(tx);
        tokio::spawn(async move {
            while let Some(snapshot) = rx.recv().await {
                adapter.push(&snapshot).await;
            }
        });
    }

    fn push_remote(&self) {
        if let Some(pusher) = &self.pusher {
            // A send failure just means the pusher task is gone.
            let _ = pusher.send(self.session.snapshot());
        }
    }

    async fn connect_remote(&mut self) {
        let Some(adapter) = &self.adapter else {
            return;
        };
        if let Err(err) = adapter.publish(self.session.snapshot()).await {
            warn!(error = %err, "Initial remote publish failed, playing locally");
            return;
        }
        match adapter.subscribe().await {
            Ok(mut snapshots) => {
                let tx = self.cmd_tx.clone();
                self.subscription = Some(tokio::spawn(async move {
                    while let Some(snapshot) = snapshots.recv().await {
                        if tx.send(Command::RemoteSnapshot(snapshot)).await.is_err() {
                            break;
                        }
                    }
                }));
            }
            Err(err) => {
                warn!(error = %err, "Remote subscription failed, playing locally");
            }
        }
    }

    async fn after_move(&mut self, applied: AppliedMove, by_engine: bool) {
        let _ = self.events.send(SessionEvent::MoveApplied {
            san: applied.outcome().san().clone(),
            by_engine,
        });
        self.persist();
        self.push_remote();
        if let Some(result) = applied.result() {
            self.finish_bookkeeping(*result);
        } else if self.engine_to_move() {
            self.schedule_engine_move();
        }
    }

    async fn after_finish(&mut self, result: GameResult) {
        self.persist();
        self.push_remote();
        self.finish_bookkeeping(result);
    }

    fn finish_bookkeeping(&mut self, result: GameResult) {
        let _ = self.events.send(SessionEvent::GameOver { result });
        if !self.result_recorded {
            self.result_recorded = true;
            if let (Some(persistence), Some(owner)) =
                (&self.config.persistence, &self.config.owner_id)
            {
                let persistence = persistence.clone();
                let owner = owner.clone();
                let snapshot = self.session.snapshot();
                tokio::task::spawn_blocking(move || persistence.record_result(&owner, &snapshot));
            }
        }
    }

    fn persist(&self) {
        if let (Some(persistence), Some(owner)) =
            (&self.config.persistence, &self.config.owner_id)
        {
            let persistence = persistence.clone();
            let owner = owner.clone();
            let snapshot = self.session.snapshot();
            tokio::task::spawn_blocking(move || persistence.save_snapshot(&owner, &snapshot));
        }
    }

    /// Kicks off the engine's reply: deliberation delay, then the search on
    /// the blocking pool, result delivered back through the command channel.
    fn schedule_engine_move(&mut self) {
        self.generation += 1;
        let generation = self.generation;
        let board = self.session.position().board();
        let difficulty = self.config.difficulty;
        let delay = self.config.engine_delay;
        let tx = self.cmd_tx.clone();
        debug!(generation, %difficulty, "Scheduling engine move");
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let chosen = tokio::task::spawn_blocking(move || {
                let mut rng = rand::thread_rng();
                search::select_move(&board, difficulty, &mut rng)
            })
            .await;
            match chosen {
                Ok(mv) => {
                    let _ = tx.send(Command::EngineMove { generation, mv }).await;
                }
                Err(err) => warn!(error = %err, "Engine search task failed"),
            }
        });
    }

    async fn handle_engine_move(&mut self, generation: u64, mv: ChessMove) {
        if generation != self.generation || self.session.is_over() {
            debug!(generation, current = self.generation, "Discarding stale engine move");
            return;
        }
        match self.session.apply_move(mv) {
            Ok(applied) => self.after_move(applied, true).await,
            // The engine searched the position it was given; a rejection here
            // means the session changed under it (e.g. remote rebuild).
            Err(err) => warn!(error = %err, "Engine move rejected"),
        }
    }

    async fn handle_remote_snapshot(&mut self, snapshot: GameSnapshot) {
        if snapshot.moves() == self.session.moves()
            && snapshot.status() == &self.session.status()
        {
            debug!("Remote snapshot matches local state");
            return;
        }
        // Remote authority covers the position, move record, and status.
        // Clocks are measured locally and survive the rebuild.
        let clocks = self.session.clocks();
        match SyncAdapter::rebuild(snapshot) {
            Ok(mut session) => {
                session.restore_clocks(clocks);
                info!(plies = session.moves().len(), "Local state replaced by remote snapshot");
                let finished = session.is_over();
                let result = session.result();
                self.session = session;
                self.generation += 1; // cancel any in-flight engine move
                let _ = self.events.send(SessionEvent::Rebuilt);
                self.persist();
                if finished {
                    if let Some(result) = result {
                        self.finish_bookkeeping(result);
                    }
                }
            }
            Err(err) => warn!(error = %err, "Remote snapshot failed to replay, keeping local state"),
        }
    }

    fn shutdown(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        if let Some(subscription) = self.subscription.take() {
            subscription.abort();
        }
        info!(session_id = %self.session.id(), "Session runtime stopped");
    }
}
