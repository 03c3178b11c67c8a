//! Tests for database repository operations.

use tempfile::NamedTempFile;

use chessmate::{
    GameMode, GameOutcome, GameRepository, GameResult, GameSession, NewGameStat, Player, Side,
};

/// Creates a temporary database file with schema applied, returns the file
/// handle (must stay in scope to keep the file alive) and a ready repository.
fn setup_test_db() -> (NamedTempFile, GameRepository) {
    let db_file = NamedTempFile::new().expect("Failed to create temp file");
    let db_path = db_file.path().to_str().expect("Invalid path").to_string();

    let repo = GameRepository::new(db_path).expect("Failed to create repository");
    repo.run_migrations().expect("Migrations failed");
    (db_file, repo)
}

fn stat(owner: &str, outcome: GameOutcome, session_id: &str) -> NewGameStat {
    NewGameStat::new(
        owner.to_string(),
        "Engine".to_string(),
        "ai".to_string(),
        outcome.to_db_string().to_string(),
        12,
        session_id.to_string(),
    )
}

#[test]
fn test_create_user() {
    let (_db, repo) = setup_test_db();
    let user = repo
        .create_user("Alice".to_string())
        .expect("Create failed");
    assert_eq!(user.display_name(), "Alice");
    assert!(*user.id() > 0);
}

#[test]
fn test_create_user_duplicate_name_fails() {
    let (_db, repo) = setup_test_db();
    repo.create_user("Bob".to_string())
        .expect("First create failed");
    let result = repo.create_user("Bob".to_string());
    assert!(result.is_err(), "Duplicate name should fail");
}

#[test]
fn test_ensure_user_is_idempotent() {
    let (_db, repo) = setup_test_db();
    let first = repo.ensure_user("Carol").expect("First ensure failed");
    let second = repo.ensure_user("Carol").expect("Second ensure failed");
    assert_eq!(first.id(), second.id());
}

#[test]
fn test_save_and_load_game_round_trip() {
    let (_db, repo) = setup_test_db();
    let mut session = GameSession::start_ai(Player::new("alice", "Alice"));
    session.apply_san("e4").expect("Move failed");
    session.apply_san("e5").expect("Move failed");

    let snapshot = session.snapshot();
    repo.save_game("alice", &snapshot).expect("Save failed");

    let loaded = repo
        .load_game("alice", &snapshot.id().to_string())
        .expect("Load failed")
        .expect("Snapshot missing");
    assert_eq!(loaded, snapshot);

    // The full session rebuilds from the stored document.
    let rebuilt = GameSession::from_snapshot(loaded).expect("Rebuild failed");
    assert_eq!(rebuilt.moves(), session.moves());
    assert_eq!(rebuilt.position().board(), session.position().board());
}

#[test]
fn test_save_game_upserts_one_row_per_session() {
    let (_db, repo) = setup_test_db();
    let mut session = GameSession::start_ai(Player::new("alice", "Alice"));

    repo.save_game("alice", &session.snapshot())
        .expect("First save failed");
    session.apply_san("d4").expect("Move failed");
    repo.save_game("alice", &session.snapshot())
        .expect("Second save failed");

    let games = repo.list_games("alice").expect("List failed");
    assert_eq!(games.len(), 1);
    assert_eq!(*games[0].moves_count(), 1);
}

#[test]
fn test_load_game_missing_returns_none() {
    let (_db, repo) = setup_test_db();
    let found = repo
        .load_game("alice", "no-such-session")
        .expect("Load failed");
    assert!(found.is_none());
}

#[test]
fn test_saved_games_are_scoped_to_owner() {
    let (_db, repo) = setup_test_db();
    let session = GameSession::start_ai(Player::new("alice", "Alice"));
    repo.save_game("alice", &session.snapshot())
        .expect("Save failed");

    assert!(repo.list_games("bob").expect("List failed").is_empty());
    assert!(
        repo.load_game("bob", &session.id().to_string())
            .expect("Load failed")
            .is_none()
    );
}

#[test]
fn test_record_game_is_exactly_once_per_session() {
    let (_db, repo) = setup_test_db();
    let first = repo
        .record_game(stat("alice", GameOutcome::Win, "s1"))
        .expect("Record failed");
    assert!(first.is_some());

    let second = repo
        .record_game(stat("alice", GameOutcome::Win, "s1"))
        .expect("Record failed");
    assert!(second.is_none(), "Same session must not count twice");

    let stats = repo.get_aggregated_stats("alice").expect("Stats failed");
    assert_eq!(*stats.total_games(), 1);
    assert_eq!(*stats.wins(), 1);
}

#[test]
fn test_aggregated_stats_counts_by_outcome() {
    let (_db, repo) = setup_test_db();
    repo.record_game(stat("alice", GameOutcome::Win, "s1"))
        .expect("Record failed");
    repo.record_game(stat("alice", GameOutcome::Win, "s2"))
        .expect("Record failed");
    repo.record_game(stat("alice", GameOutcome::Loss, "s3"))
        .expect("Record failed");
    repo.record_game(stat("alice", GameOutcome::Draw, "s4"))
        .expect("Record failed");
    repo.record_game(stat("bob", GameOutcome::Win, "s5"))
        .expect("Record failed");

    let stats = repo.get_aggregated_stats("alice").expect("Stats failed");
    assert_eq!(*stats.total_games(), 4);
    assert_eq!(*stats.wins(), 2);
    assert_eq!(*stats.losses(), 1);
    assert_eq!(*stats.draws(), 1);
    assert_eq!(stats.win_rate(), 50.0);

    assert_eq!(
        *repo.get_aggregated_stats("bob").expect("Stats failed").wins(),
        1
    );
}

#[test]
fn test_aggregated_stats_empty_history() {
    let (_db, repo) = setup_test_db();
    let stats = repo.get_aggregated_stats("nobody").expect("Stats failed");
    assert_eq!(*stats.total_games(), 0);
    assert_eq!(stats.win_rate(), 0.0);
}

#[test]
fn test_result_recording_orients_outcome_to_owner() {
    use chessmate::Persistence;

    let (_db, repo) = setup_test_db();
    let mut session = GameSession::start(
        GameMode::Online,
        Player::new("alice", "Alice"),
        Some(Player::new("bob", "Bob")),
    );
    session.resign(Side::Black).expect("Resign failed");
    assert_eq!(session.result(), Some(GameResult::WhiteWins));
    let snapshot = session.snapshot();

    repo.record_result("alice", &snapshot);
    repo.record_result("alice", &snapshot); // duplicate is a no-op
    let stats = repo.get_aggregated_stats("alice").expect("Stats failed");
    assert_eq!(*stats.wins(), 1);
    assert_eq!(*stats.total_games(), 1);

    // Bob lost the same game; a separate session id would be needed to
    // record it, which is exactly the point of the uniqueness guard.
    repo.record_result("bob", &snapshot);
    let stats = repo.get_aggregated_stats("bob").expect("Stats failed");
    assert_eq!(*stats.total_games(), 0);
}
