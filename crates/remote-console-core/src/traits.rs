//! Core traits for storage, the remote service and the push transport.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Storage error.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Storage error: {0}")]
    Internal(String),
}

/// Pluggable string key/value backend for persisted client state.
///
/// A missing key is a valid empty state, not an error.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value.
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write a value, replacing any previous one.
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove a value. Removing a missing key succeeds.
    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Remote service error.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The service no longer knows the session.
    #[error("Session not found")]
    SessionNotFound,
    #[error("Request failed with status {status}")]
    Status { status: u16, body: String },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Invalid response: {0}")]
    Decode(String),
    /// The in-flight request was dropped locally.
    #[error("Request aborted")]
    Aborted,
}

/// Response to an input submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    #[serde(default)]
    pub session_id: Option<String>,
    /// Final output the service observed for the command.
    #[serde(default)]
    pub latest_output: String,
}

/// Response to a cancellation request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelResponse {
    #[serde(default)]
    pub session_id: Option<String>,
    /// Whether the service accepted the cancellation.
    #[serde(default)]
    pub cancelled: bool,
    #[serde(default)]
    pub message: Option<String>,
}

/// Request/response side of the remote command service.
#[async_trait]
pub trait SessionApi: Send + Sync {
    /// Create a new session and return its token.
    async fn create_session(&self) -> Result<String, ApiError>;

    /// Submit input text to a session.
    ///
    /// Implementations map a not-found status to [`ApiError::SessionNotFound`].
    async fn submit_input(&self, session_id: &str, text: &str) -> Result<SubmitResponse, ApiError>;

    /// Ask the service to stop the running command.
    async fn cancel(&self, session_id: &str) -> Result<CancelResponse, ApiError>;

    /// Close a session on the service.
    async fn close_session(&self, session_id: &str) -> Result<(), ApiError>;

    /// Push stream endpoint for a session.
    fn stream_url(&self, session_id: &str) -> String;
}

/// Push transport error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Push transport is not available")]
    Unsupported,
    #[error("Failed to open stream: {0}")]
    Open(String),
    #[error("Stream error: {0}")]
    Stream(String),
    #[error("Stream closed by server")]
    Closed,
}

/// One message delivered by the push transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushFrame {
    /// Raw payload.
    pub data: String,
    /// Transport-level correlation id, when the transport provides one.
    pub correlation_id: Option<String>,
}

impl PushFrame {
    #[must_use]
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            correlation_id: None,
        }
    }

    #[must_use]
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }
}

/// An open subscription. Dropping it closes the underlying transport.
pub type PushSubscription = BoxStream<'static, Result<PushFrame, TransportError>>;

/// Server-push transport.
///
/// `open` resolving means the subscription is established; each item is a
/// message or an error, and the end of the stream means the server closed it.
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Whether the transport can work in this runtime at all.
    fn is_supported(&self) -> bool {
        true
    }

    /// Open a subscription against `url`.
    async fn open(&self, url: &str) -> Result<PushSubscription, TransportError>;
}
