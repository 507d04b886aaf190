//! Merge of push messages and command results into the transcript.
//!
//! Three producers share one transcript: the user's submitted text, the
//! in-flight command's single logical answer (the active entry), and
//! out-of-band status pushes addressed by id.

use remote_console_core::{Role, Transcript, TranscriptEntry};
use remote_console_transport::protocol::{Inbound, PushMessage};
use uuid::Uuid;

/// Content of the assistant entry before any output is known.
pub const PLACEHOLDER: &str = "Waiting for response…";

/// Prefixes the service uses for non-answer results.
const STATUS_MARKERS: [&str; 4] = ["[timeout]", "[cancelled]", "[codex-error]", "[error]"];

/// Role of a final command result.
#[must_use]
pub fn infer_role(text: &str) -> Role {
    if STATUS_MARKERS.iter().any(|m| text.starts_with(m)) {
        Role::Status
    } else {
        Role::Assistant
    }
}

/// Ids of the optimistic entries of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandEntries {
    pub user_id: String,
    pub placeholder_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ActiveEntry {
    id: String,
    /// No streamed output has been merged yet.
    placeholder: bool,
}

/// Owner of the transcript and the active-entry pointer.
#[derive(Debug, Default)]
pub struct Reconciler {
    transcript: Transcript,
    active: Option<ActiveEntry>,
    counter: u64,
}

impl Reconciler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Id of the entry currently receiving streamed updates.
    #[must_use]
    pub fn active_id(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.id.as_str())
    }

    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.active.is_some()
    }

    /// Swap in a session's stored transcript.
    ///
    /// Entries held in memory while no session was bound (a command carried
    /// across an expired session) follow the stored ones, and the pointer
    /// survives if its entry does.
    pub fn replace_transcript(&mut self, transcript: Transcript) {
        let unsaved = std::mem::replace(&mut self.transcript, transcript);
        self.carry_over(unsaved.into_entries());
        if self.active_id().is_some_and(|id| !self.transcript.contains(id)) {
            self.active = None;
        }
    }

    pub fn clear(&mut self) {
        self.transcript.clear();
        self.active = None;
    }

    /// Mint an `entry-<n>` id not present in the transcript.
    pub fn next_entry_id(&mut self) -> String {
        loop {
            self.counter += 1;
            let id = format!("entry-{}", self.counter);
            if !self.transcript.contains(&id) {
                return id;
            }
        }
    }

    /// Append the user entry and a pending placeholder, and make the
    /// placeholder active.
    pub fn begin_command(&mut self, text: &str) -> CommandEntries {
        let user_id = self.next_entry_id();
        let placeholder_id = self.next_entry_id();
        self.transcript
            .upsert(&user_id, |_| TranscriptEntry::new(&user_id, Role::User, text));
        self.transcript.upsert(&placeholder_id, |_| {
            TranscriptEntry::new(&placeholder_id, Role::Assistant, PLACEHOLDER).with_pending(true)
        });
        self.activate(&placeholder_id);
        CommandEntries {
            user_id,
            placeholder_id,
        }
    }

    /// Point streamed updates at `id`.
    pub fn activate(&mut self, id: &str) {
        self.active = Some(ActiveEntry {
            id: id.to_string(),
            placeholder: true,
        });
    }

    pub fn clear_active(&mut self) {
        self.active = None;
    }

    /// Overwrite an existing entry. Returns whether it existed.
    pub fn mark(&mut self, id: &str, role: Role, content: &str, pending: bool) -> bool {
        self.transcript.update(id, |mut entry| {
            entry.role = role;
            entry.content = content.to_string();
            entry.pending = Some(pending);
            entry
        })
    }

    /// Write a terminal value into `id` and release the pointer if it
    /// targets `id`.
    pub fn finalize(&mut self, id: &str, role: Role, content: &str) -> bool {
        if self.active_id() == Some(id) {
            self.active = None;
        }
        self.mark(id, role, content, false)
    }

    /// Copies of the given entries, in transcript order.
    #[must_use]
    pub fn snapshot(&self, ids: &[&str]) -> Vec<TranscriptEntry> {
        self.transcript
            .entries()
            .iter()
            .filter(|e| ids.contains(&e.id.as_str()))
            .cloned()
            .collect()
    }

    /// Re-append entries that are not in the transcript.
    pub fn carry_over(&mut self, entries: Vec<TranscriptEntry>) {
        for entry in entries {
            if let Err(e) = self.transcript.append(entry) {
                tracing::debug!("Entry already present after session swap: {e}");
            }
        }
    }

    pub fn apply_inbound(&mut self, inbound: &Inbound) {
        match inbound {
            Inbound::Message(message) => self.apply(message),
            Inbound::Finalize => self.clear_active(),
            Inbound::Ignored => {}
        }
    }

    /// Merge one decoded push message.
    pub fn apply(&mut self, message: &PushMessage) {
        let role = message.resolved_role();

        if message.is_input_echo() {
            let id = resolve_id(message);
            if !self.transcript.contains(&id) {
                let mut entry =
                    TranscriptEntry::new(id, role, message.text.clone().unwrap_or_default());
                entry.pending = message.pending;
                let _ = self.transcript.append(entry);
            }
            return;
        }

        if let Some(active) = self.active.as_mut() {
            let placeholder = active.placeholder;
            if message.text.is_some() {
                active.placeholder = false;
            }
            let id = active.id.clone();
            self.transcript
                .upsert(&id, |entry| merge(entry, message, role, placeholder));
            if message.is_final {
                self.active = None;
            }
            return;
        }

        let id = resolve_id(message);
        self.transcript
            .upsert(&id, |entry| merge(entry, message, role, false));
    }
}

fn resolve_id(message: &PushMessage) -> String {
    message.target_id().map_or_else(
        || {
            let id = format!("stream-{}", Uuid::new_v4().simple());
            tracing::debug!(%id, "Push message without id, minted one");
            id
        },
        str::to_string,
    )
}

/// Replace when asked to, when append was not asked for, or when there is
/// nothing real to append to; otherwise append.
fn merge(
    mut entry: TranscriptEntry,
    message: &PushMessage,
    role: Role,
    placeholder: bool,
) -> TranscriptEntry {
    if let Some(text) = &message.text {
        let replace =
            message.replace || !message.append || placeholder || entry.content.is_empty();
        if replace {
            entry.content.clone_from(text);
        } else {
            entry.content.push_str(text);
        }
    }
    entry.role = role;
    entry.pending = message
        .pending
        .or(if message.is_final { Some(false) } else { entry.pending });
    entry
}
