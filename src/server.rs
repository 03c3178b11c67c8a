//! REST authority for online sessions.
//!
//! Serves the game and room documents of a [`MemoryRemoteStore`] over HTTP.
//! Reads support long-polling on the document revision counter, so clients
//! see a peer's move without hammering the endpoint.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, instrument};

use crate::session::{GameSnapshot, Player, SessionId};
use crate::sync::{GameUpdate, MemoryRemoteStore, RemoteStore, Room, SyncError};

/// How long a long-poll read is held open before returning unchanged state.
const POLL_HOLD: Duration = Duration::from_secs(25);

/// Game document plus its revision counter, the client's polling cursor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameDocument {
    /// Monotonic change counter for this game.
    pub revision: u64,
    /// The authoritative snapshot.
    pub snapshot: GameSnapshot,
}

/// Query string for reads: `?since=N` long-polls past revision `N`.
#[derive(Debug, Deserialize)]
pub struct PollQuery {
    /// Revision the client has already seen.
    pub since: Option<u64>,
}

/// Body for room creation.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateRoomRequest {
    /// The waiting game the room leads to.
    pub game_id: SessionId,
    /// The hosting player.
    pub host: Player,
}

/// Body for joining a room.
#[derive(Debug, Serialize, Deserialize)]
pub struct JoinRoomRequest {
    /// The joining player; seated as black.
    pub guest: Player,
}

struct ApiError(SyncError);

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            SyncError::GameNotFound(_) | SyncError::RoomNotFound(_) => StatusCode::NOT_FOUND,
            SyncError::RoomTaken(_) => StatusCode::CONFLICT,
            SyncError::Rebuild(_) => StatusCode::UNPROCESSABLE_ENTITY,
            SyncError::RemoteUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, self.0.to_string()).into_response()
    }
}

/// Builds the API router over the given store.
pub fn router(store: Arc<MemoryRemoteStore>) -> Router {
    Router::new()
        .route("/api/games", post(create_game))
        .route("/api/games/{id}", get(get_game).patch(update_game))
        .route("/api/rooms", post(create_room))
        .route("/api/rooms/{code}/join", post(join_room))
        .with_state(store)
}

/// Binds and serves the API until the process exits.
///
/// # Errors
///
/// Returns the underlying I/O error if binding or serving fails.
#[instrument(skip(store))]
pub async fn serve(listener: TcpListener, store: Arc<MemoryRemoteStore>) -> std::io::Result<()> {
    info!(addr = %listener.local_addr()?, "Game server listening");
    axum::serve(listener, router(store)).await
}

#[instrument(skip(store, snapshot), fields(session_id = %snapshot.id()))]
async fn create_game(
    State(store): State<Arc<MemoryRemoteStore>>,
    Json(snapshot): Json<GameSnapshot>,
) -> Result<StatusCode, ApiError> {
    store.create_game(snapshot).await?;
    Ok(StatusCode::CREATED)
}

#[instrument(skip(store))]
async fn get_game(
    State(store): State<Arc<MemoryRemoteStore>>,
    Path(id): Path<SessionId>,
    Query(query): Query<PollQuery>,
) -> Result<Json<GameDocument>, ApiError> {
    if let Some(since) = query.since {
        match tokio::time::timeout(POLL_HOLD, store.wait_change(id, since)).await {
            Ok(Some((snapshot, revision))) => {
                return Ok(Json(GameDocument { revision, snapshot }));
            }
            Ok(None) => return Err(SyncError::GameNotFound(id).into()),
            Err(_) => {} // hold expired; fall through to current state
        }
    }
    store
        .get_with_revision(id)
        .map(|(snapshot, revision)| Json(GameDocument { revision, snapshot }))
        .ok_or_else(|| SyncError::GameNotFound(id).into())
}

#[instrument(skip(store, update), fields(session_id = %id, plies = update.moves().len()))]
async fn update_game(
    State(store): State<Arc<MemoryRemoteStore>>,
    Path(id): Path<SessionId>,
    Json(update): Json<GameUpdate>,
) -> Result<StatusCode, ApiError> {
    store.update_game(id, update).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(store, request), fields(game_id = %request.game_id))]
async fn create_room(
    State(store): State<Arc<MemoryRemoteStore>>,
    Json(request): Json<CreateRoomRequest>,
) -> Result<(StatusCode, Json<Room>), ApiError> {
    let room = store.create_room(request.game_id, request.host).await?;
    Ok((StatusCode::CREATED, Json(room)))
}

#[instrument(skip(store, request))]
async fn join_room(
    State(store): State<Arc<MemoryRemoteStore>>,
    Path(code): Path<String>,
    Json(request): Json<JoinRoomRequest>,
) -> Result<Json<Room>, ApiError> {
    let room = store.join_room(&code, request.guest).await?;
    Ok(Json(room))
}
