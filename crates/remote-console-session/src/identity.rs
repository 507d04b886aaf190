//! Session token lifecycle.

use std::sync::{Arc, PoisonError, RwLock};

use remote_console_core::traits::{ApiError, KeyValueStore, SessionApi};
use tokio::sync::Mutex;

use crate::persist::{self, SESSION_KEY};

/// Session lifecycle error.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Failed to create session: {0}")]
    Create(#[source] ApiError),
}

/// Result of [`SessionIdentity::ensure`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ensured {
    pub session_id: String,
    /// The session was created by this call.
    pub created: bool,
}

/// Holder of the current session token.
///
/// At most one create call is in flight at a time; callers that waited for
/// it reuse its token.
pub struct SessionIdentity {
    api: Arc<dyn SessionApi>,
    store: Arc<dyn KeyValueStore>,
    token: RwLock<Option<String>>,
    creating: Mutex<()>,
}

impl SessionIdentity {
    #[must_use]
    pub fn new(api: Arc<dyn SessionApi>, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            api,
            store,
            token: RwLock::new(None),
            creating: Mutex::new(()),
        }
    }

    /// Current token, if any.
    #[must_use]
    pub fn current(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set(&self, token: Option<String>) -> Option<String> {
        let mut guard = self.token.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, token)
    }

    /// Load the last-used token from the store. A read failure is treated
    /// as no stored session.
    pub async fn restore(&self) -> Option<String> {
        let stored = match self.store.get(SESSION_KEY).await {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                tracing::error!("Failed to read stored session: {e}");
                None
            }
        };
        if let Some(id) = &stored {
            tracing::debug!(session_id = %id, "Restored session");
        }
        self.set(stored.clone());
        stored
    }

    /// Return the current token, creating a session when there is none.
    ///
    /// # Errors
    /// Returns error if the service fails to create a session.
    pub async fn ensure(&self) -> Result<Ensured, SessionError> {
        if let Some(session_id) = self.current() {
            return Ok(Ensured {
                session_id,
                created: false,
            });
        }

        let _guard = self.creating.lock().await;
        if let Some(session_id) = self.current() {
            return Ok(Ensured {
                session_id,
                created: false,
            });
        }

        let session_id = self
            .api
            .create_session()
            .await
            .map_err(SessionError::Create)?;
        tracing::info!(session_id = %session_id, "Created session");

        if let Err(e) = self.store.set(SESSION_KEY, &session_id).await {
            tracing::error!(session_id = %session_id, "Failed to persist session: {e}");
        }
        self.set(Some(session_id.clone()));

        Ok(Ensured {
            session_id,
            created: true,
        })
    }

    /// Forget the current token and its persisted state. Returns the
    /// token that was cleared.
    pub async fn clear(&self) -> Option<String> {
        let previous = self.set(None);
        if let Err(e) = self.store.remove(SESSION_KEY).await {
            tracing::error!("Failed to remove stored session: {e}");
        }
        if let Some(id) = &previous {
            if let Err(e) = persist::discard_transcript(self.store.as_ref(), id).await {
                tracing::error!(session_id = %id, "Failed to discard transcript: {e}");
            }
            tracing::info!(session_id = %id, "Session reset");
        }
        previous
    }
}
