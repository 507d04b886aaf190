//! Ordered, id-addressable conversation transcript.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// Who produced a transcript entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Text the user submitted.
    User,
    /// Output of the remote command.
    #[default]
    Assistant,
    /// Client or service status annotation.
    Status,
}

impl Role {
    /// Parse a wire role name. Unknown names yield `None`.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "status" => Some(Self::Status),
            _ => None,
        }
    }

    /// Wire name of the role.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Status => "status",
        }
    }
}

/// A single addressable line of the transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    /// Unique within a session.
    pub id: String,
    /// Producer of the entry.
    pub role: Role,
    /// Accumulated text.
    pub content: String,
    /// Whether the entry is still awaiting a final value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<bool>,
}

impl TranscriptEntry {
    /// Create an entry without a pending flag.
    #[must_use]
    pub fn new(id: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            content: content.into(),
            pending: None,
        }
    }

    /// Baseline used when an upsert targets an unknown id.
    #[must_use]
    pub fn empty(id: impl Into<String>) -> Self {
        Self::new(id, Role::Assistant, String::new())
    }

    /// Set the pending flag.
    #[must_use]
    pub const fn with_pending(mut self, pending: bool) -> Self {
        self.pending = Some(pending);
        self
    }

    /// Whether the entry is explicitly pending.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending == Some(true)
    }

    fn from_stored(map: &Map<String, Value>, id: String) -> Self {
        Self {
            id,
            role: map
                .get("role")
                .and_then(Value::as_str)
                .and_then(Role::parse)
                .unwrap_or_default(),
            content: map
                .get("content")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            pending: map.get("pending").and_then(Value::as_bool),
        }
    }
}

/// Transcript error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TranscriptError {
    #[error("Duplicate entry id: {0}")]
    DuplicateId(String),
}

/// Ordered log of entries. Order is insertion order; ids are unique.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    /// Create an empty transcript.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Build from entries, keeping the first occurrence of any repeated id.
    #[must_use]
    pub fn from_entries(entries: impl IntoIterator<Item = TranscriptEntry>) -> Self {
        let mut transcript = Self::new();
        for entry in entries {
            // Later duplicates lose.
            let _ = transcript.append(entry);
        }
        transcript
    }

    #[must_use]
    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    #[must_use]
    pub fn into_entries(self) -> Vec<TranscriptEntry> {
        self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&TranscriptEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    #[must_use]
    pub fn last(&self) -> Option<&TranscriptEntry> {
        self.entries.last()
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.id == id)
    }

    /// Add an entry at the end.
    ///
    /// # Errors
    /// Returns error if an entry with the same id already exists.
    pub fn append(&mut self, entry: TranscriptEntry) -> Result<(), TranscriptError> {
        if self.contains(&entry.id) {
            return Err(TranscriptError::DuplicateId(entry.id));
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Replace the entry with `id` in place, or append a new one built from
    /// an empty baseline when the id is unknown.
    ///
    /// The mutator receives an owned copy and returns the new value; the
    /// entry id is always kept as `id`.
    pub fn upsert<F>(&mut self, id: &str, mutator: F) -> &TranscriptEntry
    where
        F: FnOnce(TranscriptEntry) -> TranscriptEntry,
    {
        let index = if let Some(index) = self.position(id) {
            let mut next = mutator(self.entries[index].clone());
            next.id = id.to_string();
            self.entries[index] = next;
            index
        } else {
            let mut next = mutator(TranscriptEntry::empty(id));
            next.id = id.to_string();
            self.entries.push(next);
            self.entries.len() - 1
        };
        &self.entries[index]
    }

    /// Like [`Transcript::upsert`] but never appends.
    ///
    /// Returns whether the entry existed.
    pub fn update<F>(&mut self, id: &str, mutator: F) -> bool
    where
        F: FnOnce(TranscriptEntry) -> TranscriptEntry,
    {
        if self.contains(id) {
            self.upsert(id, mutator);
            true
        } else {
            false
        }
    }

    /// Empty the log.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Serialize the ordered entry list as a JSON array.
    ///
    /// # Errors
    /// Returns error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.entries)
    }

    /// Restore a persisted transcript, dropping or defaulting anything
    /// malformed. Never fails.
    #[must_use]
    pub fn restore_from_json(raw: &str) -> Self {
        let items = match serde_json::from_str::<Value>(raw) {
            Ok(Value::Array(items)) => items,
            Ok(other) => {
                tracing::warn!(kind = value_kind(&other), "Discarding non-array stored transcript");
                return Self::new();
            }
            Err(e) => {
                tracing::warn!("Discarding unreadable stored transcript: {e}");
                return Self::new();
            }
        };

        let mut seen = HashSet::new();
        let mut entries = Vec::with_capacity(items.len());
        for item in items {
            let Value::Object(map) = item else {
                continue;
            };
            let id = match map.get("id").and_then(Value::as_str) {
                Some(id) if !seen.contains(id) => id.to_string(),
                _ => restored_id(),
            };
            seen.insert(id.clone());
            entries.push(TranscriptEntry::from_stored(&map, id));
        }
        Self { entries }
    }
}

fn restored_id() -> String {
    format!("restored-{}", Uuid::new_v4().simple())
}

const fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Transcript {
        Transcript::from_entries([
            TranscriptEntry::new("entry-1", Role::User, "ls"),
            TranscriptEntry::new("entry-2", Role::Assistant, "waiting").with_pending(true),
        ])
    }

    #[test]
    fn test_append_rejects_duplicate_id() {
        let mut transcript = sample();
        let err = transcript
            .append(TranscriptEntry::new("entry-1", Role::Status, "again"))
            .unwrap_err();
        assert_eq!(err, TranscriptError::DuplicateId("entry-1".into()));
        assert_eq!(transcript.len(), 2);
    }

    #[test]
    fn test_upsert_existing_keeps_position() {
        let mut transcript = sample();
        transcript.upsert("entry-1", |mut e| {
            e.content.push_str(" -la");
            e
        });
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.entries()[0].content, "ls -la");
        assert_eq!(transcript.entries()[1].id, "entry-2");
    }

    #[test]
    fn test_upsert_unknown_appends_from_baseline() {
        let mut transcript = sample();
        let entry = transcript
            .upsert("stream-x", |mut e| {
                e.content = "hello".into();
                e
            })
            .clone();
        assert_eq!(entry.role, Role::Assistant);
        assert_eq!(entry.pending, None);
        assert_eq!(transcript.last(), Some(&entry));
    }

    #[test]
    fn test_upsert_cannot_rename_entry() {
        let mut transcript = sample();
        transcript.upsert("entry-2", |mut e| {
            e.id = "entry-1".into();
            e
        });
        let ids: Vec<_> = transcript.entries().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["entry-1", "entry-2"]);
    }

    #[test]
    fn test_update_missing_is_noop() {
        let mut transcript = sample();
        assert!(!transcript.update("nope", |e| e));
        assert_eq!(transcript.len(), 2);
    }

    #[test]
    fn test_restore_roundtrip() {
        let transcript = sample();
        let json = transcript.to_json().unwrap();
        assert!(!json.contains("\"pending\":null"));
        assert_eq!(Transcript::restore_from_json(&json), transcript);
    }

    #[test]
    fn test_restore_rejects_non_array() {
        assert!(Transcript::restore_from_json("{\"id\":\"a\"}").is_empty());
        assert!(Transcript::restore_from_json("not json at all").is_empty());
        assert!(Transcript::restore_from_json("[{\"id\":").is_empty());
    }

    #[test]
    fn test_restore_defaults_fields() {
        let raw = r#"[
            null,
            3,
            {"id": "a", "role": "robot", "content": 7, "pending": "yes"},
            {"role": "user", "content": "hi"},
            {"id": "a", "role": "status", "content": "dup"}
        ]"#;
        let transcript = Transcript::restore_from_json(raw);
        let entries = transcript.entries();
        assert_eq!(entries.len(), 3);

        assert_eq!(entries[0].id, "a");
        assert_eq!(entries[0].role, Role::Assistant);
        assert_eq!(entries[0].content, "");
        assert_eq!(entries[0].pending, None);

        assert!(entries[1].id.starts_with("restored-"));
        assert_eq!(entries[1].role, Role::User);

        assert_ne!(entries[2].id, "a");
        assert_eq!(entries[2].content, "dup");
    }
}
