//! Wire protocol for the command service and its push stream.

use remote_console_core::{Role, traits::PushFrame};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Textual fields in priority order.
const TEXT_FIELDS: [&str; 4] = ["text", "content", "chunk", "message"];

/// Stream tag of echoed user input.
pub const INPUT_STREAM: &str = "input";

/// Body of a successful session creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
}

/// Body of an input submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub text: String,
}

/// A decoded push message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushMessage {
    /// Explicit target entry (`id` or `entry_id`).
    pub id: Option<String>,
    /// Transport correlation id.
    pub correlation_id: Option<String>,
    /// Producer tag, e.g. `input`, `status`, `stdout`.
    pub stream: Option<String>,
    /// Explicit, recognised role.
    pub role: Option<Role>,
    /// First populated textual field.
    pub text: Option<String>,
    pub pending: Option<bool>,
    /// `final` or `done` was set.
    pub is_final: bool,
    pub append: bool,
    pub replace: bool,
}

impl PushMessage {
    /// A message carrying only opaque text.
    #[must_use]
    pub fn opaque(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            text: (!text.is_empty()).then_some(text),
            ..Self::default()
        }
    }

    fn from_fields(map: &Map<String, Value>) -> Self {
        let string = |key: &str| map.get(key).and_then(string_like);
        let flag = |key: &str| map.get(key).and_then(Value::as_bool);

        Self {
            id: string("id").or_else(|| string("entry_id")),
            correlation_id: None,
            stream: string("stream"),
            role: map.get("role").and_then(Value::as_str).and_then(Role::parse),
            text: TEXT_FIELDS
                .iter()
                .filter_map(|key| map.get(*key).and_then(Value::as_str))
                .find(|text| !text.is_empty())
                .map(str::to_string),
            pending: flag("pending"),
            is_final: flag("final").unwrap_or(false) || flag("done").unwrap_or(false),
            append: flag("append").unwrap_or(false),
            replace: flag("replace").unwrap_or(false),
        }
    }

    /// Explicit role, else derived from the stream tag.
    #[must_use]
    pub fn resolved_role(&self) -> Role {
        if let Some(role) = self.role {
            return role;
        }
        match self.stream.as_deref() {
            Some(INPUT_STREAM) => Role::User,
            Some("status") => Role::Status,
            _ => Role::Assistant,
        }
    }

    /// Whether this echoes the user's own submitted text.
    #[must_use]
    pub fn is_input_echo(&self) -> bool {
        self.stream.as_deref() == Some(INPUT_STREAM)
    }

    /// Explicit id, else the correlation id.
    #[must_use]
    pub fn target_id(&self) -> Option<&str> {
        self.id.as_deref().or(self.correlation_id.as_deref())
    }
}

/// Outcome of decoding one push frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Content or an explicit pending flag to reconcile.
    Message(PushMessage),
    /// Nothing to show, but the active entry is complete.
    Finalize,
    /// Nothing to do.
    Ignored,
}

/// Decode a push frame. Never fails: anything that is not a JSON object is
/// treated as opaque text.
#[must_use]
pub fn decode_push(frame: &PushFrame) -> Inbound {
    let mut message = match serde_json::from_str::<Value>(&frame.data) {
        Ok(Value::Object(map)) => PushMessage::from_fields(&map),
        Ok(Value::String(text)) => PushMessage::opaque(text),
        _ => PushMessage::opaque(frame.data.clone()),
    };
    message.correlation_id.clone_from(&frame.correlation_id);

    if message.text.is_some() || message.pending.is_some() {
        Inbound::Message(message)
    } else if message.is_final {
        Inbound::Finalize
    } else {
        Inbound::Ignored
    }
}

fn string_like(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(data: &str) -> Inbound {
        decode_push(&PushFrame::new(data))
    }

    fn message(data: &str) -> PushMessage {
        match decode(data) {
            Inbound::Message(m) => m,
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[test]
    fn test_text_field_priority() {
        let m = message(r#"{"message":"m","chunk":"c","content":"","text":null}"#);
        assert_eq!(m.text.as_deref(), Some("c"));

        let m = message(r#"{"message":"m","text":"t"}"#);
        assert_eq!(m.text.as_deref(), Some("t"));
    }

    #[test]
    fn test_flags_and_ids() {
        let m = message(r#"{"entry_id":7,"chunk":"x","append":true,"done":true,"pending":false}"#);
        assert_eq!(m.id.as_deref(), Some("7"));
        assert!(m.append);
        assert!(!m.replace);
        assert!(m.is_final);
        assert_eq!(m.pending, Some(false));
    }

    #[test]
    fn test_wrong_types_are_ignored() {
        let m = message(r#"{"text":"hi","final":"yes","role":"robot","pending":1}"#);
        assert!(!m.is_final);
        assert_eq!(m.role, None);
        assert_eq!(m.pending, None);
    }

    #[test]
    fn test_role_resolution() {
        assert_eq!(message(r#"{"text":"a","stream":"input"}"#).resolved_role(), Role::User);
        assert_eq!(message(r#"{"text":"a","stream":"status"}"#).resolved_role(), Role::Status);
        assert_eq!(message(r#"{"text":"a","stream":"stdout"}"#).resolved_role(), Role::Assistant);
        assert_eq!(
            message(r#"{"text":"a","stream":"input","role":"status"}"#).resolved_role(),
            Role::Status
        );
    }

    #[test]
    fn test_non_json_is_opaque_text() {
        assert_eq!(message("plain output").text.as_deref(), Some("plain output"));
        assert_eq!(message("{broken").text.as_deref(), Some("{broken"));
        assert_eq!(message(r#""quoted""#).text.as_deref(), Some("quoted"));
        assert_eq!(message("[1,2]").text.as_deref(), Some("[1,2]"));
    }

    #[test]
    fn test_empty_messages() {
        assert_eq!(decode(""), Inbound::Ignored);
        assert_eq!(decode("{}"), Inbound::Ignored);
        assert_eq!(decode(r#"{"id":"a","append":true}"#), Inbound::Ignored);
        assert_eq!(decode(r#"{"final":true}"#), Inbound::Finalize);
        assert!(matches!(decode(r#"{"pending":true}"#), Inbound::Message(_)));
    }

    #[test]
    fn test_correlation_id_fallback() {
        let frame = PushFrame::new(r#"{"text":"x"}"#).with_correlation_id("evt-3");
        let Inbound::Message(m) = decode_push(&frame) else {
            panic!("expected message");
        };
        assert_eq!(m.target_id(), Some("evt-3"));

        let frame = PushFrame::new(r#"{"text":"x","id":"own"}"#).with_correlation_id("evt-3");
        let Inbound::Message(m) = decode_push(&frame) else {
            panic!("expected message");
        };
        assert_eq!(m.target_id(), Some("own"));
    }
}
