//! Persisted session snapshot layout.
//!
//! One key holds the last-used session token; one key per token holds that
//! session's transcript as a JSON array. A missing key is an empty state.

use remote_console_core::{
    Transcript,
    traits::{KeyValueStore, StorageError},
};

/// Key of the last-used session token.
pub const SESSION_KEY: &str = "codex-web-session-id";

/// Prefix of per-session transcript keys.
pub const OUTPUT_KEY_PREFIX: &str = "codex-web-session-output:";

#[must_use]
pub fn output_key(session_id: &str) -> String {
    format!("{OUTPUT_KEY_PREFIX}{session_id}")
}

/// Save the full transcript, or remove the key when it is empty.
///
/// # Errors
/// Returns error if the store fails or serialization fails.
pub async fn save_transcript(
    store: &dyn KeyValueStore,
    session_id: &str,
    transcript: &Transcript,
) -> Result<(), StorageError> {
    let key = output_key(session_id);
    if transcript.is_empty() {
        return store.remove(&key).await;
    }
    store.set(&key, &transcript.to_json()?).await
}

/// Load a persisted transcript. Missing, unreadable or malformed data all
/// yield an empty transcript.
pub async fn load_transcript(store: &dyn KeyValueStore, session_id: &str) -> Transcript {
    match store.get(&output_key(session_id)).await {
        Ok(Some(raw)) => Transcript::restore_from_json(&raw),
        Ok(None) => Transcript::new(),
        Err(e) => {
            tracing::error!(session_id, "Failed to read stored transcript: {e}");
            Transcript::new()
        }
    }
}

/// Drop a session's persisted transcript.
///
/// # Errors
/// Returns error if the store fails.
pub async fn discard_transcript(
    store: &dyn KeyValueStore,
    session_id: &str,
) -> Result<(), StorageError> {
    store.remove(&output_key(session_id)).await
}

#[cfg(test)]
mod tests {
    use remote_console_core::{Role, TranscriptEntry};
    use tokio_test::assert_ok;

    use super::*;
    use crate::storage::MemoryStore;

    #[tokio::test]
    async fn test_roundtrip_under_same_token() {
        let store = MemoryStore::new();
        let transcript = Transcript::from_entries([
            TranscriptEntry::new("entry-1", Role::User, "echo hi"),
            TranscriptEntry::new("entry-2", Role::Assistant, "hi").with_pending(false),
            TranscriptEntry::new("stream-9", Role::Status, "[timeout]"),
        ]);

        assert_ok!(save_transcript(&store, "s1", &transcript).await);
        assert_eq!(load_transcript(&store, "s1").await, transcript);
        assert_eq!(load_transcript(&store, "s2").await, Transcript::new());
    }

    #[tokio::test]
    async fn test_empty_transcript_removes_key() {
        let store = MemoryStore::new();
        let transcript = Transcript::from_entries([TranscriptEntry::new("a", Role::User, "x")]);
        assert_ok!(save_transcript(&store, "s1", &transcript).await);
        assert!(store.get("codex-web-session-output:s1").await.unwrap().is_some());

        assert_ok!(save_transcript(&store, "s1", &Transcript::new()).await);
        assert_eq!(store.get("codex-web-session-output:s1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_malformed_payload_restores_empty() {
        let store = MemoryStore::new();
        store
            .set(&output_key("s1"), "{\"entries\": [oops")
            .await
            .unwrap();
        assert!(load_transcript(&store, "s1").await.is_empty());

        store.set(&output_key("s1"), "{\"id\":\"a\"}").await.unwrap();
        assert!(load_transcript(&store, "s1").await.is_empty());
    }

    #[tokio::test]
    async fn test_discard() {
        let store = MemoryStore::new();
        store.set(&output_key("s1"), "[]").await.unwrap();
        assert_ok!(discard_transcript(&store, "s1").await);
        assert_ok!(discard_transcript(&store, "s1").await);
        assert_eq!(store.get(&output_key("s1")).await.unwrap(), None);
    }
}
