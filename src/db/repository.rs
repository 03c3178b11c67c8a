//! Database repository for saved games, game statistics, and user profiles.

use diesel::prelude::*;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use tracing::{debug, info, instrument, warn};

use crate::db::{
    AggregatedStats, DbError, GameOutcome, GameStat, NewGameStat, NewSavedGame, NewUser,
    SavedGame, User, schema,
};
use crate::runtime::Persistence;
use crate::session::GameSnapshot;
use crate::Side;

/// Schema migrations compiled into the binary.
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Database repository for user and game operations.
#[derive(Debug, Clone)]
pub struct GameRepository {
    db_path: String,
}

impl GameRepository {
    /// Creates a new repository connected to the database at the given path.
    ///
    /// Use `":memory:"` for an in-memory database (useful for tests).
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the path is invalid.
    #[instrument(skip(db_path), fields(db_path = %db_path))]
    pub fn new(db_path: String) -> Result<Self, DbError> {
        info!(path = %db_path, "Creating GameRepository");
        Ok(Self { db_path })
    }

    /// Applies any pending schema migrations.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a migration fails.
    #[instrument(skip(self))]
    pub fn run_migrations(&self) -> Result<(), DbError> {
        let mut conn = self.connection()?;
        let applied = conn
            .run_pending_migrations(MIGRATIONS)
            .map_err(|e| DbError::new(format!("Migration failed: {}", e)))?;
        info!(count = applied.len(), "Migrations applied");
        Ok(())
    }

    /// Establishes a database connection.
    #[instrument(skip(self))]
    fn connection(&self) -> Result<SqliteConnection, DbError> {
        debug!(path = %self.db_path, "Establishing connection");
        SqliteConnection::establish(&self.db_path)
            .map_err(|e| DbError::new(format!("Failed to connect to '{}': {}", self.db_path, e)))
    }

    /// Creates a new user profile.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the display name is already taken or a database error occurs.
    #[instrument(skip(self))]
    pub fn create_user(&self, display_name: String) -> Result<User, DbError> {
        debug!(display_name = %display_name, "Creating user");
        let mut conn = self.connection()?;

        let new_user = NewUser::new(display_name);

        let user = diesel::insert_into(schema::users::table)
            .values(&new_user)
            .returning(User::as_returning())
            .get_result(&mut conn)?;

        info!(user_id = user.id(), display_name = %user.display_name(), "User created");
        Ok(user)
    }

    /// Gets a user by display name. Returns `None` if not found.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a database error occurs.
    #[instrument(skip(self))]
    pub fn get_user_by_name(&self, display_name: &str) -> Result<Option<User>, DbError> {
        debug!(display_name = %display_name, "Looking up user by name");
        let mut conn = self.connection()?;

        let user = schema::users::table
            .filter(schema::users::display_name.eq(display_name))
            .first::<User>(&mut conn)
            .optional()?;

        Ok(user)
    }

    /// Gets the user with this display name, creating it on first sight.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a database error occurs.
    #[instrument(skip(self))]
    pub fn ensure_user(&self, display_name: &str) -> Result<User, DbError> {
        match self.get_user_by_name(display_name)? {
            Some(user) => Ok(user),
            None => self.create_user(display_name.to_string()),
        }
    }

    /// Upserts a session snapshot, keyed on `(owner, session id)`.
    ///
    /// Saving the same session twice overwrites the previous row, so the
    /// store holds exactly one document per game per player.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if serialization or a database operation fails.
    #[instrument(skip(self, snapshot), fields(owner = %owner, session_id = %snapshot.id()))]
    pub fn save_game(&self, owner: &str, snapshot: &GameSnapshot) -> Result<(), DbError> {
        debug!("Saving game snapshot");
        let mut conn = self.connection()?;

        let document = serde_json::to_string(snapshot)?;
        let row = NewSavedGame::new(
            owner.to_string(),
            snapshot.id().to_string(),
            document,
            snapshot.status().to_string(),
            snapshot.result().map(|r| r.to_string()),
            snapshot.moves().len() as i32,
        );

        use crate::db::schema::saved_games::dsl;
        diesel::insert_into(dsl::saved_games)
            .values(&row)
            .on_conflict((dsl::owner, dsl::session_id))
            .do_update()
            .set((
                dsl::document.eq(row.document().clone()),
                dsl::status.eq(row.status().clone()),
                dsl::result.eq(row.result().clone()),
                dsl::moves_count.eq(*row.moves_count()),
                dsl::saved_at.eq(diesel::dsl::now),
            ))
            .execute(&mut conn)?;

        info!(plies = snapshot.moves().len(), "Game snapshot saved");
        Ok(())
    }

    /// Loads a saved snapshot. Returns `None` if the player never saved this
    /// session.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if deserialization or a database operation fails.
    #[instrument(skip(self))]
    pub fn load_game(
        &self,
        owner: &str,
        session_id: &str,
    ) -> Result<Option<GameSnapshot>, DbError> {
        debug!("Loading game snapshot");
        let mut conn = self.connection()?;

        let row = schema::saved_games::table
            .filter(schema::saved_games::owner.eq(owner))
            .filter(schema::saved_games::session_id.eq(session_id))
            .first::<SavedGame>(&mut conn)
            .optional()?;

        match row {
            Some(row) => Ok(Some(serde_json::from_str(row.document())?)),
            None => Ok(None),
        }
    }

    /// Lists a player's saved games, most recently saved first.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a database error occurs.
    #[instrument(skip(self))]
    pub fn list_games(&self, owner: &str) -> Result<Vec<SavedGame>, DbError> {
        debug!("Listing saved games");
        let mut conn = self.connection()?;

        let games = schema::saved_games::table
            .filter(schema::saved_games::owner.eq(owner))
            .order(schema::saved_games::saved_at.desc())
            .load::<SavedGame>(&mut conn)?;

        info!(count = games.len(), "Saved games loaded");
        Ok(games)
    }

    /// Records a completed game result.
    ///
    /// The session id is unique in the stats table, so recording the same
    /// finished session twice is a no-op and returns `None`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a database error occurs.
    #[instrument(skip(self, stat), fields(owner = %stat.owner(), mode = %stat.mode(), outcome = %stat.outcome()))]
    pub fn record_game(&self, stat: NewGameStat) -> Result<Option<GameStat>, DbError> {
        debug!("Recording game result");
        let mut conn = self.connection()?;

        let game_stat = diesel::insert_into(schema::game_stats::table)
            .values(&stat)
            .on_conflict(schema::game_stats::session_id)
            .do_nothing()
            .returning(GameStat::as_returning())
            .get_result(&mut conn)
            .optional()?;

        match &game_stat {
            Some(recorded) => info!(
                stat_id = recorded.id(),
                outcome = %recorded.outcome(),
                "Game result recorded"
            ),
            None => debug!("Result already recorded for this session"),
        }
        Ok(game_stat)
    }

    /// Gets all game stats for a player, ordered most recent first.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a database error occurs.
    #[instrument(skip(self))]
    pub fn get_player_stats(&self, owner: &str) -> Result<Vec<GameStat>, DbError> {
        debug!("Loading player stats");
        let mut conn = self.connection()?;

        let stats = schema::game_stats::table
            .filter(schema::game_stats::owner.eq(owner))
            .order(schema::game_stats::played_at.desc())
            .load::<GameStat>(&mut conn)?;

        info!(count = stats.len(), "Player stats loaded");
        Ok(stats)
    }

    /// Gets aggregated win/loss/draw counts for a player.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a database error occurs.
    #[instrument(skip(self))]
    pub fn get_aggregated_stats(&self, owner: &str) -> Result<AggregatedStats, DbError> {
        debug!("Computing aggregated stats");
        let stats = self.get_player_stats(owner)?;

        let mut wins = 0;
        let mut losses = 0;
        let mut draws = 0;

        for stat in &stats {
            match stat.outcome().as_str() {
                "win" => wins += 1,
                "loss" => losses += 1,
                "draw" => draws += 1,
                other => warn!(outcome = %other, stat_id = stat.id(), "Unknown outcome value"),
            }
        }

        let total = stats.len() as i32;
        let aggregated = AggregatedStats::new(total, wins, losses, draws);

        info!(
            owner = %owner,
            total = %total,
            wins = %wins,
            losses = %losses,
            draws = %draws,
            win_rate = %format!("{:.1}%", aggregated.win_rate()),
            "Aggregated stats computed"
        );

        Ok(aggregated)
    }
}

/// Which side the owning player held in this snapshot. Falls back to white
/// for local sessions where both seats carry the same identity.
fn owned_side(owner: &str, snapshot: &GameSnapshot) -> Side {
    let seated = |player: &Option<crate::session::Player>| {
        player.as_ref().is_some_and(|p| p.id == owner)
    };
    if seated(snapshot.white()) {
        Side::White
    } else if seated(snapshot.black()) {
        Side::Black
    } else {
        Side::White
    }
}

impl Persistence for GameRepository {
    #[instrument(skip(self, snapshot), fields(owner = %owner_id, session_id = %snapshot.id()))]
    fn save_snapshot(&self, owner_id: &str, snapshot: &GameSnapshot) {
        if let Err(err) = self.save_game(owner_id, snapshot) {
            warn!(error = %err, "Snapshot save failed");
        }
    }

    #[instrument(skip(self, snapshot), fields(owner = %owner_id, session_id = %snapshot.id()))]
    fn record_result(&self, owner_id: &str, snapshot: &GameSnapshot) {
        let Some(result) = snapshot.result() else {
            warn!("Result recording requested for an unfinished session");
            return;
        };
        let owned = owned_side(owner_id, snapshot);
        let Some(outcome) = GameOutcome::from_result(*result, owned) else {
            debug!(result = %result, "No countable outcome for this result");
            return;
        };
        let opponent = match owned {
            Side::White => snapshot.black(),
            Side::Black => snapshot.white(),
        };
        let opponent_name = opponent
            .as_ref()
            .map(|p| p.name.clone())
            .unwrap_or_else(|| "Unknown".to_string());
        let stat = NewGameStat::new(
            owner_id.to_string(),
            opponent_name,
            snapshot.mode().to_string(),
            outcome.to_db_string().to_string(),
            snapshot.moves().len() as i32,
            snapshot.id().to_string(),
        );
        if let Err(err) = self.record_game(stat) {
            warn!(error = %err, "Result recording failed");
        }
    }
}
