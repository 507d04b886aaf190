//! Console client: the state container behind a console UI.
//!
//! One instance owns the session token, the transcript with its active
//! entry, and the push stream. Every transcript mutation is serialized by
//! one lock, persisted under the current token and published as a
//! snapshot before the lock is released.

use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use remote_console_core::{
    ConsoleEvent, EventHub, StreamStatus, Transcript,
    traits::{KeyValueStore, PushTransport, SessionApi},
};
use remote_console_transport::{StreamConnection, StreamDelivery};
use tokio::{
    sync::{Mutex, broadcast, mpsc, oneshot},
    task::JoinHandle,
};

use crate::{
    dispatcher::{CommandDispatcher, CommandOutcome, DispatchError},
    identity::{SessionError, SessionIdentity},
    persist,
    reconciler::Reconciler,
};

/// Client construction error.
#[cfg(all(feature = "http", feature = "file"))]
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Failed to build HTTP client: {0}")]
    Api(#[from] remote_console_core::traits::ApiError),
    #[error("Failed to open state file: {0}")]
    Storage(#[from] remote_console_core::traits::StorageError),
}

pub(crate) struct Shared {
    pub(crate) api: Arc<dyn SessionApi>,
    store: Arc<dyn KeyValueStore>,
    pub(crate) identity: SessionIdentity,
    pub(crate) state: Mutex<Reconciler>,
    stream: StreamConnection,
    events: EventHub,
    /// Serializes session creation with the transcript swap that follows.
    activation: Mutex<()>,
    interrupt: StdMutex<Option<oneshot::Sender<()>>>,
}

impl Shared {
    /// Apply `f` to the reconciler, persist and publish the result.
    pub(crate) async fn mutate<R>(&self, f: impl FnOnce(&mut Reconciler) -> R) -> R {
        let mut state = self.state.lock().await;
        let result = f(&mut state);

        if let Some(session_id) = self.identity.current() {
            if let Err(e) =
                persist::save_transcript(self.store.as_ref(), &session_id, state.transcript())
                    .await
            {
                tracing::error!(session_id = %session_id, "Failed to persist transcript: {e}");
            }
        }
        self.events.publish(ConsoleEvent::TranscriptChanged(
            state.transcript().entries().to_vec(),
        ));
        result
    }

    /// Return the current token, creating and activating a session when
    /// there is none.
    pub(crate) async fn ensure_session(&self) -> Result<String, SessionError> {
        let _guard = self.activation.lock().await;
        let ensured = self.identity.ensure().await?;
        if ensured.created {
            self.activate(&ensured.session_id).await;
        } else {
            self.stream
                .connect(&ensured.session_id, self.api.stream_url(&ensured.session_id));
        }
        Ok(ensured.session_id)
    }

    /// Swap in the stored transcript of `session_id` and bind the stream.
    async fn activate(&self, session_id: &str) {
        let transcript = persist::load_transcript(self.store.as_ref(), session_id).await;
        tracing::debug!(session_id, entries = transcript.len(), "Activating session");
        self.mutate(|state| state.replace_transcript(transcript))
            .await;
        self.events
            .publish(ConsoleEvent::SessionChanged(Some(session_id.to_string())));
        self.stream.connect(session_id, self.api.stream_url(session_id));
    }

    pub(crate) async fn reset(&self) {
        self.stream.dispose();
        self.identity.clear().await;
        self.mutate(Reconciler::clear).await;
        self.events.publish(ConsoleEvent::SessionChanged(None));
    }

    pub(crate) fn arm_interrupt(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        *self.lock_interrupt() = Some(tx);
        rx
    }

    /// Drop the interrupt sender once its command has finished.
    pub(crate) fn disarm_interrupt(&self) {
        let mut interrupt = self.lock_interrupt();
        if interrupt.as_ref().is_some_and(oneshot::Sender::is_closed) {
            *interrupt = None;
        }
    }

    fn interrupt(&self) -> bool {
        self.lock_interrupt()
            .take()
            .is_some_and(|tx| tx.send(()).is_ok())
    }

    fn lock_interrupt(&self) -> std::sync::MutexGuard<'_, Option<oneshot::Sender<()>>> {
        self.interrupt.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn pump(self: Arc<Self>, mut deliveries: mpsc::UnboundedReceiver<StreamDelivery>) {
        while let Some(delivery) = deliveries.recv().await {
            if self.identity.current().as_deref() != Some(delivery.session_id.as_str()) {
                tracing::debug!(
                    session_id = %delivery.session_id,
                    "Dropping message for inactive session"
                );
                continue;
            }
            self.mutate(|state| state.apply_inbound(&delivery.inbound))
                .await;
        }
    }
}

/// Client for one remote console.
///
/// Must be created inside a Tokio runtime. Dropping it stops the push
/// stream.
pub struct ConsoleClient {
    shared: Arc<Shared>,
    pump: JoinHandle<()>,
}

impl ConsoleClient {
    /// Create a client with no session.
    #[must_use]
    pub fn new(
        api: Arc<dyn SessionApi>,
        transport: Arc<dyn PushTransport>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        let events = EventHub::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            identity: SessionIdentity::new(Arc::clone(&api), Arc::clone(&store)),
            api,
            store,
            state: Mutex::new(Reconciler::new()),
            stream: StreamConnection::new(transport, events.clone(), tx),
            events,
            activation: Mutex::new(()),
            interrupt: StdMutex::new(None),
        });
        let pump = tokio::spawn(Arc::clone(&shared).pump(rx));
        Self { shared, pump }
    }

    /// Create a client talking HTTP and SSE to `config.api_base`, with
    /// state kept in `config.state_file`.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built or the state file
    /// cannot be opened.
    #[cfg(all(feature = "http", feature = "file"))]
    pub async fn from_config(
        config: &remote_console_core::ConsoleConfig,
    ) -> Result<Self, BuildError> {
        use remote_console_transport::{http::HttpSessionApi, sse::SsePushTransport};

        use crate::storage::FileStore;

        let api = HttpSessionApi::new(config)?;
        let store = FileStore::open(config.state_file.clone()).await?;
        Ok(Self::new(
            Arc::new(api),
            Arc::new(SsePushTransport::new()),
            Arc::new(store),
        ))
    }

    /// Resume the last-used session from the store, with its transcript
    /// and stream. Returns the restored token.
    pub async fn restore(&self) -> Option<String> {
        let _guard = self.shared.activation.lock().await;
        let session_id = self.shared.identity.restore().await?;
        self.shared.activate(&session_id).await;
        Some(session_id)
    }

    /// Return the current session, creating one if needed.
    ///
    /// # Errors
    /// Returns error if the service fails to create a session.
    pub async fn ensure_session(&self) -> Result<String, SessionError> {
        self.shared.ensure_session().await
    }

    /// Forget the session locally: token, persisted transcript, in-memory
    /// transcript and stream.
    pub async fn reset_session(&self) {
        self.shared.reset().await;
    }

    /// Close the session on the service, then reset locally. A failed
    /// remote close is only logged.
    pub async fn close_session(&self) {
        if let Some(session_id) = self.shared.identity.current() {
            if let Err(e) = self.shared.api.close_session(&session_id).await {
                tracing::warn!(session_id = %session_id, "Failed to close session: {e}");
            }
        }
        self.shared.reset().await;
    }

    /// Run one command to completion.
    ///
    /// # Errors
    /// Returns error if no session could be created, or if the submission
    /// failed. A failed submission also leaves a status entry.
    pub async fn send_command(&self, text: &str) -> Result<CommandOutcome, DispatchError> {
        CommandDispatcher::new(&self.shared).send_command(text).await
    }

    /// Ask the service to cancel the running command. Returns whether the
    /// service accepted.
    pub async fn cancel_command(&self) -> bool {
        CommandDispatcher::new(&self.shared).cancel_command().await
    }

    /// Drop the in-flight submission locally. Returns whether one was
    /// running.
    #[must_use = "false means no submission was in flight"]
    pub fn abort_command(&self) -> bool {
        self.shared.interrupt()
    }

    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.shared.identity.current()
    }

    /// Snapshot of the transcript.
    pub async fn transcript(&self) -> Transcript {
        self.shared.state.lock().await.transcript().clone()
    }

    /// Whether a command's result is still expected.
    pub async fn is_running(&self) -> bool {
        self.shared.state.lock().await.is_running()
    }

    #[must_use]
    pub fn stream_status(&self) -> StreamStatus {
        self.shared.stream.status()
    }

    #[must_use]
    pub fn stream_error(&self) -> Option<String> {
        self.shared.stream.error()
    }

    /// Live state changes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConsoleEvent> {
        self.shared.events.subscribe()
    }

    #[must_use]
    pub fn events(&self) -> &EventHub {
        &self.shared.events
    }
}

impl Drop for ConsoleClient {
    fn drop(&mut self) {
        self.pump.abort();
        self.shared.stream.dispose();
    }
}
