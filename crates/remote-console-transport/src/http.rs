//! HTTP implementation of the session API (feature-gated).

use async_trait::async_trait;
use remote_console_core::{
    ConsoleConfig,
    traits::{ApiError, CancelResponse, SessionApi, SubmitResponse},
};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;

use crate::protocol::{CreateSessionResponse, SubmitRequest};

/// Session API over the service's REST endpoints.
#[derive(Clone)]
pub struct HttpSessionApi {
    client: Client,
    base_url: String,
}

impl HttpSessionApi {
    /// Create a client for `config.api_base`.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(config: &ConsoleConfig) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Ok(Self::with_client(client, config.api_base()))
    }

    /// Use an existing client.
    #[must_use]
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn session_url(&self, session_id: &str, suffix: &str) -> String {
        format!("{}/{session_id}{suffix}", self.base_url)
    }
}

fn transport(e: &reqwest::Error) -> ApiError {
    ApiError::Transport(e.to_string())
}

async fn error_for_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ApiError::Status {
        status: status.as_u16(),
        body,
    })
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    response
        .json::<T>()
        .await
        .map_err(|e| ApiError::Decode(e.to_string()))
}

#[async_trait]
impl SessionApi for HttpSessionApi {
    async fn create_session(&self) -> Result<String, ApiError> {
        tracing::debug!(url = %self.base_url, "Creating session");
        let response = self
            .client
            .post(&self.base_url)
            .send()
            .await
            .map_err(|e| transport(&e))?;
        let created: CreateSessionResponse = decode(error_for_status(response).await?).await?;
        Ok(created.session_id)
    }

    async fn submit_input(&self, session_id: &str, text: &str) -> Result<SubmitResponse, ApiError> {
        let response = self
            .client
            .post(self.session_url(session_id, "/input"))
            .json(&SubmitRequest {
                text: text.to_string(),
            })
            .send()
            .await
            .map_err(|e| transport(&e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(ApiError::SessionNotFound);
        }
        decode(error_for_status(response).await?).await
    }

    async fn cancel(&self, session_id: &str) -> Result<CancelResponse, ApiError> {
        let response = self
            .client
            .post(self.session_url(session_id, "/cancel"))
            .send()
            .await
            .map_err(|e| transport(&e))?;
        decode(error_for_status(response).await?).await
    }

    async fn close_session(&self, session_id: &str) -> Result<(), ApiError> {
        let response = self
            .client
            .delete(self.session_url(session_id, ""))
            .send()
            .await
            .map_err(|e| transport(&e))?;
        error_for_status(response).await?;
        Ok(())
    }

    fn stream_url(&self, session_id: &str) -> String {
        self.session_url(session_id, "/stream")
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::assert_ok;

    use super::*;

    #[test]
    fn test_endpoint_layout() {
        let api = HttpSessionApi::with_client(Client::new(), "http://svc/api/sessions/");
        assert_eq!(api.session_url("abc", "/input"), "http://svc/api/sessions/abc/input");
        assert_eq!(api.session_url("abc", ""), "http://svc/api/sessions/abc");
        assert_eq!(api.stream_url("abc"), "http://svc/api/sessions/abc/stream");
    }

    #[test]
    fn test_new_uses_config_base() {
        let config = ConsoleConfig::default().with_api_base("http://localhost:9000/api/sessions/");
        let api = assert_ok!(HttpSessionApi::new(&config));
        assert_eq!(api.base_url, "http://localhost:9000/api/sessions");
    }
}
