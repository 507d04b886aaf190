//! Command submission, expiry recovery and cancellation.

use remote_console_core::{
    Role,
    traits::{ApiError, SubmitResponse},
};

use crate::{
    client::Shared,
    identity::SessionError,
    reconciler::{CommandEntries, infer_role},
};

const NO_RESPONSE: &str = "(no response)";
const SESSION_EXPIRED: &str = "Session expired, reconnecting…";
const CANCEL_REQUESTED: &str = "Cancellation requested…";
const CANCEL_SENT: &str = "Cancellation sent, awaiting response…";
const CANCEL_REFUSED: &str = "Cancellation was not accepted";
const ABORTED: &str = "Aborted";

/// How a command ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The service answered; the result is in the transcript.
    Completed,
    /// The submission was dropped locally.
    Aborted,
}

/// Command dispatch error.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("Command failed: {0}")]
    Api(#[from] ApiError),
}

pub(crate) struct CommandDispatcher<'a> {
    shared: &'a Shared,
}

impl<'a> CommandDispatcher<'a> {
    pub(crate) const fn new(shared: &'a Shared) -> Self {
        Self { shared }
    }

    pub(crate) async fn send_command(&self, text: &str) -> Result<CommandOutcome, DispatchError> {
        let session_id = self.shared.ensure_session().await?;
        let interrupt = self.shared.arm_interrupt();
        let entries = self.shared.mutate(|state| state.begin_command(text)).await;
        tracing::debug!(session_id = %session_id, entry = %entries.placeholder_id, "Submitting command");

        let result = tokio::select! {
            result = self.submit_with_recovery(session_id, text, &entries) => Some(result),
            Ok(()) = interrupt => None,
        };
        self.shared.disarm_interrupt();

        let placeholder = entries.placeholder_id.as_str();
        match result {
            None | Some(Err(DispatchError::Api(ApiError::Aborted))) => {
                tracing::info!(entry = %placeholder, "Command aborted");
                self.shared
                    .mutate(|state| state.finalize(placeholder, Role::Status, ABORTED))
                    .await;
                Ok(CommandOutcome::Aborted)
            }
            Some(Ok(response)) => {
                let output = if response.latest_output.is_empty() {
                    NO_RESPONSE
                } else {
                    response.latest_output.as_str()
                };
                let role = infer_role(output);
                self.shared
                    .mutate(|state| state.finalize(placeholder, role, output))
                    .await;
                Ok(CommandOutcome::Completed)
            }
            Some(Err(e)) => {
                tracing::warn!(entry = %placeholder, "Command failed: {e}");
                let message = format!("Error: {e}");
                self.shared
                    .mutate(|state| state.finalize(placeholder, Role::Status, &message))
                    .await;
                Err(e)
            }
        }
    }

    /// Submit once; on an expired session, move the command's entries to a
    /// fresh session and submit once more.
    async fn submit_with_recovery(
        &self,
        session_id: String,
        text: &str,
        entries: &CommandEntries,
    ) -> Result<SubmitResponse, DispatchError> {
        match self.shared.api.submit_input(&session_id, text).await {
            Err(ApiError::SessionNotFound) => {}
            other => return Ok(other?),
        }
        tracing::warn!(session_id = %session_id, "Session expired, recovering");

        let placeholder = entries.placeholder_id.as_str();
        let carried = self
            .shared
            .mutate(|state| {
                state.mark(placeholder, Role::Status, SESSION_EXPIRED, true);
                state.snapshot(&[entries.user_id.as_str(), placeholder])
            })
            .await;

        self.shared.reset().await;
        // Keep the command visible while the replacement session is created;
        // activation rebases these entries onto the new session.
        self.shared
            .mutate(|state| {
                state.carry_over(carried);
                state.activate(placeholder);
            })
            .await;

        let session_id = self.shared.ensure_session().await?;
        Ok(self.shared.api.submit_input(&session_id, text).await?)
    }

    pub(crate) async fn cancel_command(&self) -> bool {
        let Some(session_id) = self.shared.identity.current() else {
            return false;
        };
        let active = self
            .shared
            .state
            .lock()
            .await
            .active_id()
            .map(str::to_string);
        let Some(target) = active else {
            return false;
        };

        self.shared
            .mutate(|state| state.mark(&target, Role::Status, CANCEL_REQUESTED, true))
            .await;

        let refusal = match self.shared.api.cancel(&session_id).await {
            Ok(response) if response.cancelled => None,
            Ok(response) => Some(
                response
                    .message
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| CANCEL_REFUSED.to_string()),
            ),
            Err(e) => Some(format!("Cancel failed: {e}")),
        };

        let accepted = refusal.is_none();
        self.shared
            .mutate(|state| {
                if state.active_id() != Some(target.as_str()) {
                    return;
                }
                match &refusal {
                    None => {
                        state.mark(&target, Role::Status, CANCEL_SENT, true);
                    }
                    Some(message) => {
                        tracing::warn!(session_id = %session_id, "Cancellation refused: {message}");
                        state.finalize(&target, Role::Status, message);
                    }
                }
            })
            .await;
        accepted
    }
}
