//! End-to-end online play: REST client against a live server.

use std::sync::Arc;
use std::time::Duration;

use chessmate::{
    GameMode, GameSession, GameSnapshot, GameStatus, GameUpdate, MemoryRemoteStore, Player,
    RemoteStore, RestRemoteStore, Side, SyncAdapter, SyncError,
};

/// Serves the API on an ephemeral port and returns a client pointed at it.
async fn spawn_server() -> RestRemoteStore {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0))
        .await
        .expect("Bind failed");
    let addr = listener.local_addr().expect("No local addr");
    let store = Arc::new(MemoryRemoteStore::new());
    tokio::spawn(async move {
        chessmate::serve(listener, store).await.expect("Serve failed");
    });
    RestRemoteStore::new(format!("http://{addr}"))
}

fn hosted_session() -> GameSession {
    GameSession::start(GameMode::Online, Player::new("h", "Host"), None)
}

#[tokio::test]
async fn test_create_fetch_update_round_trip() {
    let client = spawn_server().await;
    let mut session = hosted_session();
    session.seat_guest(Player::new("g", "Guest")).expect("Seat failed");

    client.create_game(session.snapshot()).await.expect("Create failed");
    let fetched = client
        .fetch_game(session.id())
        .await
        .expect("Fetch failed")
        .expect("Game missing");
    assert_eq!(fetched, session.snapshot());

    session.apply_san("e4").expect("Move failed");
    client
        .update_game(session.id(), GameUpdate::from_snapshot(&session.snapshot()))
        .await
        .expect("Update failed");

    let fetched = client
        .fetch_game(session.id())
        .await
        .expect("Fetch failed")
        .expect("Game missing");
    assert_eq!(fetched.moves(), session.moves());
    assert_eq!(*fetched.active_side(), Side::Black);
}

#[tokio::test]
async fn test_fetch_unknown_game_returns_none() {
    let client = spawn_server().await;
    let missing = client
        .fetch_game(chessmate::SessionId::new_v4())
        .await
        .expect("Fetch failed");
    assert!(missing.is_none());
}

#[tokio::test]
async fn test_update_unknown_game_is_not_found() {
    let client = spawn_server().await;
    let session = hosted_session();
    let result = client
        .update_game(session.id(), GameUpdate::from_snapshot(&session.snapshot()))
        .await;
    assert!(matches!(result, Err(SyncError::GameNotFound(_))));
}

#[tokio::test]
async fn test_subscription_sees_peer_moves() {
    let client = spawn_server().await;
    let mut host = hosted_session();
    host.seat_guest(Player::new("g", "Guest")).expect("Seat failed");
    client.create_game(host.snapshot()).await.expect("Create failed");

    let mut snapshots = client.subscribe(host.id()).await.expect("Subscribe failed");

    // A peer (the host here) pushes a move through its own adapter.
    host.apply_san("d4").expect("Move failed");
    let adapter = SyncAdapter::new(Arc::new(client.clone()), host.id());
    adapter.push(&host.snapshot()).await;

    let received: GameSnapshot =
        tokio::time::timeout(Duration::from_secs(5), snapshots.recv())
            .await
            .expect("No snapshot within timeout")
            .expect("Subscription closed");
    assert_eq!(received.moves(), host.moves());

    // The authoritative copy replays cleanly on the other side.
    let rebuilt = SyncAdapter::rebuild(received).expect("Rebuild failed");
    assert_eq!(rebuilt.moves(), host.moves());
}

#[tokio::test]
async fn test_room_flow_seats_exactly_one_guest() {
    let client = spawn_server().await;
    let session = hosted_session();
    assert_eq!(session.status(), GameStatus::Waiting);
    client.create_game(session.snapshot()).await.expect("Create failed");

    let room = client
        .create_room(session.id(), Player::new("h", "Host"))
        .await
        .expect("Room creation failed");

    let joined = client
        .join_room(room.code(), Player::new("g", "Guest"))
        .await
        .expect("Join failed");
    assert_eq!(*joined.game_id(), session.id());

    // The game document is now active with the guest seated as black.
    let snapshot = client
        .fetch_game(session.id())
        .await
        .expect("Fetch failed")
        .expect("Game missing");
    assert_eq!(*snapshot.status(), GameStatus::Active);
    assert_eq!(snapshot.black().as_ref().expect("No guest").name, "Guest");

    let second = client.join_room(room.code(), Player::new("x", "Other")).await;
    assert!(matches!(second, Err(SyncError::RoomTaken(_))));

    let unknown = client.join_room("ZZZZ99", Player::new("x", "Other")).await;
    assert!(matches!(unknown, Err(SyncError::RoomNotFound(_))));
}

#[tokio::test]
async fn test_room_for_unknown_game_is_rejected() {
    let client = spawn_server().await;
    let result = client
        .create_room(chessmate::SessionId::new_v4(), Player::new("h", "Host"))
        .await;
    assert!(matches!(result, Err(SyncError::GameNotFound(_))));
}
