//! HTTP collaborators: history, availability, and the model list.

use std::sync::Arc;

use async_trait::async_trait;
use proto::{AvailabilityMap, BackendError, HistoryResponse, ModelName, PlatformsResponse};
use reqwest::Url;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::credential::CredentialSource;

const HISTORY_PATH: &str = "/ai/chat-history";
const PLATFORMS_PATH: &str = "/ai/platforms";
const AVAILABILITY_PATH: &str = "/ai/availability";

/// Request/response collaborators the client consumes but does not own.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Stored conversation (and quota snapshot) for `model`.
    async fn history(&self, model: &ModelName) -> Result<HistoryResponse, BackendError>;

    /// Availability flag per model.
    async fn availability(&self) -> Result<AvailabilityMap, BackendError>;

    /// Selectable models; the first is the default.
    async fn models(&self) -> Result<Vec<ModelName>, BackendError>;
}

/// [`ChatBackend`] over the server's JSON HTTP API.
pub struct HttpBackend {
    http: reqwest::Client,
    base_url: Url,
    credential: Arc<dyn CredentialSource>,
}

impl HttpBackend {
    pub fn new(base_url: Url, credential: Arc<dyn CredentialSource>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            credential,
        }
    }

    /// Appends `path` to the base URL's own path.
    fn endpoint(&self, path: &str) -> Url {
        let mut url = self.base_url.clone();
        let joined = format!(
            "{}/{}",
            self.base_url.path().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        url.set_path(&joined);
        url.set_query(None);
        url
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, BackendError> {
        debug!(url = %url, "GET");
        let mut request = self.http.get(url);
        if let Some(token) = self.credential.bearer_token() {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))
    }
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn history(&self, model: &ModelName) -> Result<HistoryResponse, BackendError> {
        let mut url = self.endpoint(HISTORY_PATH);
        url.query_pairs_mut().append_pair("model_name", model.as_str());
        self.get_json(url).await
    }

    async fn availability(&self) -> Result<AvailabilityMap, BackendError> {
        self.get_json(self.endpoint(AVAILABILITY_PATH)).await
    }

    async fn models(&self) -> Result<Vec<ModelName>, BackendError> {
        let resp: PlatformsResponse = self.get_json(self.endpoint(PLATFORMS_PATH)).await?;
        Ok(resp.platforms)
    }
}
