//! HTTP client for the notes server.
//!
//! Routes:
//! - `GET /api/tree`, `POST /api/tree` (tree actions)
//! - `GET /api/notes/{id}`, `POST /api/notes/{id}`, `DELETE /api/notes/{id}`
//! - `POST /api/notes` (create)

use async_trait::async_trait;
use note_tree::{NotePatch, TreeModel};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use sync_core::remote::{RemoteError, RemoteNoteService, RemoteTreeService, Result, TreeAction};

/// Default per-request timeout, matching the server's own bound.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(8);

pub struct HttpRemote {
    client: Client,
    base_url: String,
}

impl HttpRemote {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Sends the request and turns transport failures and error statuses into
    /// `RemoteError`s. `what` names the resource in `NotFound`.
    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response> {
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(RemoteError::NotFound(what.to_string()));
        }
        let message = response.text().await.unwrap_or_default();
        Err(RemoteError::Rejected {
            status: status.as_u16(),
            message,
        })
    }

    async fn json<T: DeserializeOwned>(response: Response) -> Result<T> {
        response.json().await.map_err(|e| {
            if e.is_timeout() {
                RemoteError::Timeout
            } else {
                RemoteError::Decode(e.to_string())
            }
        })
    }

    /// Notes are decoded field by field; whatever the server leaves out stays
    /// `None` so it can't clobber local metadata.
    async fn note(response: Response) -> Result<NotePatch> {
        Self::json(response).await
    }
}

fn transport_error(e: reqwest::Error) -> RemoteError {
    if e.is_timeout() {
        RemoteError::Timeout
    } else {
        RemoteError::Transport(e.to_string())
    }
}

#[async_trait]
impl RemoteTreeService for HttpRemote {
    async fn fetch_tree(&self) -> Result<TreeModel> {
        let response = self.send(self.client.get(self.url("/api/tree")), "tree").await?;
        Self::json(response).await
    }

    async fn submit_tree_action(&self, action: &TreeAction) -> Result<()> {
        self.send(self.client.post(self.url("/api/tree")).json(action), "tree")
            .await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteNoteService for HttpRemote {
    async fn fetch_note(&self, id: &str) -> Result<NotePatch> {
        let url = self.url(&format!("/api/notes/{}", id));
        let response = self.send(self.client.get(url), id).await?;
        Self::note(response).await
    }

    async fn create_note(&self, note: &NotePatch) -> Result<NotePatch> {
        let response = self
            .send(self.client.post(self.url("/api/notes")).json(note), "notes")
            .await?;
        Self::note(response).await
    }

    async fn update_note(&self, id: &str, note: &NotePatch) -> Result<NotePatch> {
        let url = self.url(&format!("/api/notes/{}", id));
        let response = self.send(self.client.post(url).json(note), id).await?;
        Self::note(response).await
    }

    async fn delete_note(&self, id: &str) -> Result<()> {
        let url = self.url(&format!("/api/notes/{}", id));
        self.send(self.client.delete(url), id).await?;
        Ok(())
    }
}
