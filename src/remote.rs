//! HTTP client for a remote game server.
//!
//! Implements [`RemoteStore`] against the REST surface in [`crate::server`].
//! Subscriptions are driven by long-polling the document revision counter.

use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::server::{CreateRoomRequest, GameDocument, JoinRoomRequest};
use crate::session::{GameSnapshot, Player, SessionId};
use crate::sync::{GameUpdate, RemoteStore, Room, SyncError};

/// Pause between poll attempts after a transport failure.
const RETRY_PAUSE: Duration = Duration::from_secs(2);

/// [`RemoteStore`] backed by a game server over HTTP.
#[derive(Debug, Clone)]
pub struct RestRemoteStore {
    client: reqwest::Client,
    base_url: String,
}

impl RestRemoteStore {
    /// Creates a store client for the server at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        info!(url = %base_url, "Creating remote store client");
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn transport(err: reqwest::Error) -> SyncError {
        SyncError::RemoteUnavailable(err.to_string())
    }

    /// Fetches the game document, long-polling past `since` when given.
    /// `None` when the hold expired without a change.
    async fn fetch_document(
        &self,
        id: SessionId,
        since: Option<u64>,
    ) -> Result<Option<GameDocument>, SyncError> {
        let mut request = self.client.get(self.url(&format!("/api/games/{}", id)));
        if let Some(since) = since {
            request = request.query(&[("since", since)]);
        }
        let response = request.send().await.map_err(Self::transport)?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(SyncError::GameNotFound(id)),
            status if status.is_success() => {
                let document = response.json().await.map_err(Self::transport)?;
                Ok(Some(document))
            }
            status => Err(SyncError::RemoteUnavailable(format!(
                "server returned {}",
                status
            ))),
        }
    }

    async fn check(response: reqwest::Response, code: &str) -> Result<reqwest::Response, SyncError> {
        match response.status() {
            StatusCode::NOT_FOUND => Err(SyncError::RoomNotFound(code.to_string())),
            StatusCode::CONFLICT => Err(SyncError::RoomTaken(code.to_string())),
            status if status.is_success() => Ok(response),
            status => Err(SyncError::RemoteUnavailable(format!(
                "server returned {}",
                status
            ))),
        }
    }
}

#[async_trait]
impl RemoteStore for RestRemoteStore {
    #[instrument(skip(self, snapshot), fields(session_id = %snapshot.id()))]
    async fn create_game(&self, snapshot: GameSnapshot) -> Result<(), SyncError> {
        let response = self
            .client
            .post(self.url("/api/games"))
            .json(&snapshot)
            .send()
            .await
            .map_err(Self::transport)?;
        if !response.status().is_success() {
            return Err(SyncError::RemoteUnavailable(format!(
                "server returned {}",
                response.status()
            )));
        }
        debug!("Remote game document created");
        Ok(())
    }

    #[instrument(skip(self, update), fields(session_id = %id, plies = update.moves().len()))]
    async fn update_game(&self, id: SessionId, update: GameUpdate) -> Result<(), SyncError> {
        let response = self
            .client
            .patch(self.url(&format!("/api/games/{}", id)))
            .json(&update)
            .send()
            .await
            .map_err(Self::transport)?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(SyncError::GameNotFound(id)),
            status if status.is_success() => Ok(()),
            status => Err(SyncError::RemoteUnavailable(format!(
                "server returned {}",
                status
            ))),
        }
    }

    #[instrument(skip(self))]
    async fn fetch_game(&self, id: SessionId) -> Result<Option<GameSnapshot>, SyncError> {
        match self.fetch_document(id, None).await {
            Ok(document) => Ok(document.map(|d| d.snapshot)),
            Err(SyncError::GameNotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    #[instrument(skip(self))]
    async fn subscribe(&self, id: SessionId) -> Result<mpsc::Receiver<GameSnapshot>, SyncError> {
        // Establish the starting revision; also surfaces GameNotFound early.
        let mut since = match self.fetch_document(id, None).await? {
            Some(document) => document.revision,
            None => return Err(SyncError::GameNotFound(id)),
        };

        let (tx, rx) = mpsc::channel(16);
        let store = self.clone();
        tokio::spawn(async move {
            loop {
                match store.fetch_document(id, Some(since)).await {
                    Ok(Some(document)) if document.revision > since => {
                        since = document.revision;
                        debug!(session_id = %id, revision = since, "Forwarding remote snapshot");
                        if tx.send(document.snapshot).await.is_err() {
                            break; // subscriber dropped
                        }
                    }
                    // Hold expired without a change; poll again.
                    Ok(_) => {}
                    Err(SyncError::GameNotFound(_)) => {
                        warn!(session_id = %id, "Remote game document disappeared");
                        break;
                    }
                    Err(err) => {
                        warn!(session_id = %id, error = %err, "Poll failed, retrying");
                        tokio::time::sleep(RETRY_PAUSE).await;
                    }
                }
                if tx.is_closed() {
                    break;
                }
            }
        });
        info!(session_id = %id, "Remote subscription established");
        Ok(rx)
    }

    #[instrument(skip(self, host))]
    async fn create_room(&self, game_id: SessionId, host: Player) -> Result<Room, SyncError> {
        let response = self
            .client
            .post(self.url("/api/rooms"))
            .json(&CreateRoomRequest { game_id, host })
            .send()
            .await
            .map_err(Self::transport)?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(SyncError::GameNotFound(game_id)),
            status if status.is_success() => {
                response.json().await.map_err(Self::transport)
            }
            status => Err(SyncError::RemoteUnavailable(format!(
                "server returned {}",
                status
            ))),
        }
    }

    #[instrument(skip(self, guest))]
    async fn join_room(&self, code: &str, guest: Player) -> Result<Room, SyncError> {
        let response = self
            .client
            .post(self.url(&format!("/api/rooms/{}/join", code)))
            .json(&JoinRoomRequest { guest })
            .send()
            .await
            .map_err(Self::transport)?;
        let response = Self::check(response, code).await?;
        response.json().await.map_err(Self::transport)
    }
}
