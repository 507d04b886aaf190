//! Client configuration.

use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable prefix shared with the command service.
pub const ENV_PREFIX: &str = "CODEX_WEB_";

const DEFAULT_API_BASE: &str = "http://127.0.0.1:8000/api/sessions";

/// The service waits up to 120s for a command; leave room on top.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 130;

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Base URL of the sessions resource.
    pub api_base: String,
    /// Timeout for a single request/response call.
    pub request_timeout_secs: u64,
    /// File holding persisted client state.
    pub state_file: PathBuf,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            state_file: default_state_file(),
        }
    }
}

impl ConsoleConfig {
    /// Defaults overlaid with `CODEX_WEB_*` environment variables.
    ///
    /// # Errors
    /// Returns error if a numeric variable does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from `lookup`, keyed by full variable name.
    ///
    /// # Errors
    /// Returns error if a numeric variable does not parse.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.trim().is_empty())
        };

        let mut config = Self::default();
        if let Some(base) = var("API_BASE") {
            config.api_base = base;
        }
        if let Some(raw) = var("TIMEOUT_SECS") {
            config.request_timeout_secs = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue {
                    key: format!("{ENV_PREFIX}TIMEOUT_SECS"),
                    value: raw.clone(),
                })?;
        }
        if let Some(path) = var("STATE_FILE") {
            config.state_file = PathBuf::from(path);
        }
        Ok(config)
    }

    #[must_use]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    #[must_use]
    pub const fn with_request_timeout_secs(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    #[must_use]
    pub fn with_state_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_file = path.into();
        self
    }

    /// Base URL without a trailing slash.
    #[must_use]
    pub fn api_base(&self) -> &str {
        self.api_base.trim_end_matches('/')
    }

    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_state_file() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("codex-console")
        .join("state.json")
}
