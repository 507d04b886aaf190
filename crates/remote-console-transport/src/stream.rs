//! Reconnecting push stream bound to one session at a time.
//!
//! States: `Idle → Connecting → Open`, with `Error` reachable from
//! `Connecting` or `Open` and `Unsupported` reachable only from `Idle`.
//! Each `connect` bumps a generation counter; a worker whose generation is
//! no longer current stops without touching state, so a reconnect timer left
//! over from an abandoned session is a no-op.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use futures::StreamExt;
use remote_console_core::{
    ConsoleEvent, EventHub, StreamStatus,
    traits::{PushSubscription, PushTransport, TransportError},
};
use tokio::{sync::mpsc, task::JoinHandle};

use crate::protocol::{Inbound, decode_push};

const BASE_RECONNECT_DELAY: Duration = Duration::from_millis(1000);
const MAX_RECONNECT_DELAY: Duration = Duration::from_millis(10_000);

/// Delay before reconnect attempt number `attempt` (1-based).
#[must_use]
pub fn reconnect_delay(attempt: u32) -> Duration {
    BASE_RECONNECT_DELAY
        .saturating_mul(attempt)
        .min(MAX_RECONNECT_DELAY)
}

/// A decoded message, tagged with the session whose stream produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDelivery {
    pub session_id: String,
    pub inbound: Inbound,
}

/// Push transport for runtimes without server push.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedTransport;

#[async_trait]
impl PushTransport for UnsupportedTransport {
    fn is_supported(&self) -> bool {
        false
    }

    async fn open(&self, _url: &str) -> Result<PushSubscription, TransportError> {
        Err(TransportError::Unsupported)
    }
}

struct State {
    status: StreamStatus,
    error: Option<String>,
    attempts: u32,
    session_id: Option<String>,
    generation: u64,
    worker: Option<JoinHandle<()>>,
}

struct Inner {
    transport: Arc<dyn PushTransport>,
    events: EventHub,
    deliveries: mpsc::UnboundedSender<StreamDelivery>,
    state: Mutex<State>,
}

/// Push stream connection with capped linear backoff.
#[derive(Clone)]
pub struct StreamConnection {
    inner: Arc<Inner>,
}

impl StreamConnection {
    /// Create an idle connection. Decoded messages go to `deliveries`.
    #[must_use]
    pub fn new(
        transport: Arc<dyn PushTransport>,
        events: EventHub,
        deliveries: mpsc::UnboundedSender<StreamDelivery>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                events,
                deliveries,
                state: Mutex::new(State {
                    status: StreamStatus::Idle,
                    error: None,
                    attempts: 0,
                    session_id: None,
                    generation: 0,
                    worker: None,
                }),
            }),
        }
    }

    #[must_use]
    pub fn status(&self) -> StreamStatus {
        self.inner.lock().status
    }

    /// User-facing description of the last transport error.
    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.inner.lock().error.clone()
    }

    /// Consecutive failed attempts since the last successful open.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.inner.lock().attempts
    }

    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.inner.lock().session_id.clone()
    }

    /// Bind the stream to `session_id` and start connecting to `url`.
    ///
    /// Connecting to the session already bound is a no-op; any other session
    /// is disposed first. Must be called within a Tokio runtime.
    pub fn connect(&self, session_id: &str, url: String) {
        let mut state = self.inner.lock();
        if state.session_id.as_deref() == Some(session_id)
            && matches!(
                state.status,
                StreamStatus::Connecting
                    | StreamStatus::Open
                    | StreamStatus::Error
                    | StreamStatus::Unsupported
            )
        {
            return;
        }

        self.inner.release(&mut state);
        state.session_id = Some(session_id.to_string());

        if !self.inner.transport.is_supported() {
            tracing::warn!(session_id, "Push transport unsupported, live updates disabled");
            self.inner.transition(&mut state, StreamStatus::Unsupported);
            return;
        }

        tracing::debug!(session_id, %url, "Opening push stream");
        self.inner.transition(&mut state, StreamStatus::Connecting);
        let worker = tokio::spawn(run(
            Arc::clone(&self.inner),
            session_id.to_string(),
            url,
            state.generation,
        ));
        state.worker = Some(worker);
    }

    /// Cancel any pending reconnect, close the transport and return to `Idle`.
    pub fn dispose(&self) {
        let mut state = self.inner.lock();
        self.inner.release(&mut state);
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stop the worker, invalidate its generation and publish `Idle`.
    fn release(&self, state: &mut State) {
        if let Some(worker) = state.worker.take() {
            worker.abort();
        }
        state.generation += 1;
        state.attempts = 0;
        state.error = None;
        if let Some(session_id) = state.session_id.take() {
            tracing::debug!(%session_id, "Disposed push stream");
        }
        if state.status != StreamStatus::Idle {
            self.transition(state, StreamStatus::Idle);
        }
    }

    fn transition(&self, state: &mut State, status: StreamStatus) {
        state.status = status;
        self.events.publish(ConsoleEvent::StreamStatus {
            status,
            error: state.error.clone(),
        });
    }

    /// Move to `Connecting` for a retry. False if the worker is stale.
    fn begin_attempt(&self, generation: u64) -> bool {
        let mut state = self.lock();
        if state.generation != generation {
            return false;
        }
        if state.status != StreamStatus::Connecting {
            self.transition(&mut state, StreamStatus::Connecting);
        }
        true
    }

    fn mark_open(&self, generation: u64) -> bool {
        let mut state = self.lock();
        if state.generation != generation {
            return false;
        }
        state.attempts = 0;
        state.error = None;
        self.transition(&mut state, StreamStatus::Open);
        tracing::debug!(session_id = ?state.session_id, "Push stream open");
        true
    }

    /// Record a failure and return the reconnect delay, or `None` if stale.
    fn mark_failed(&self, generation: u64, failure: &TransportError) -> Option<Duration> {
        let mut state = self.lock();
        if state.generation != generation {
            return None;
        }
        state.attempts += 1;
        let delay = reconnect_delay(state.attempts);
        state.error = Some(format!(
            "{failure}; reconnecting in {}s",
            delay.as_secs()
        ));
        self.transition(&mut state, StreamStatus::Error);
        tracing::warn!(
            session_id = ?state.session_id,
            attempt = state.attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Push stream failed: {failure}"
        );
        Some(delay)
    }

    /// Forward messages until the subscription fails or ends.
    ///
    /// Returns `None` when nobody is listening any more.
    async fn pump(
        &self,
        session_id: &str,
        mut subscription: PushSubscription,
    ) -> Option<TransportError> {
        while let Some(item) = subscription.next().await {
            let frame = match item {
                Ok(frame) => frame,
                Err(e) => return Some(e),
            };
            let inbound = decode_push(&frame);
            if inbound == Inbound::Ignored {
                tracing::trace!(session_id, "Ignoring empty push message");
                continue;
            }
            let delivery = StreamDelivery {
                session_id: session_id.to_string(),
                inbound,
            };
            if self.deliveries.send(delivery).is_err() {
                return None;
            }
        }
        Some(TransportError::Closed)
    }
}

async fn run(inner: Arc<Inner>, session_id: String, url: String, generation: u64) {
    loop {
        if inner.deliveries.is_closed() || !inner.begin_attempt(generation) {
            return;
        }

        let failure = match inner.transport.open(&url).await {
            Ok(subscription) => {
                if !inner.mark_open(generation) {
                    return;
                }
                match inner.pump(&session_id, subscription).await {
                    Some(failure) => failure,
                    None => return,
                }
            }
            Err(e) => e,
        };

        let Some(delay) = inner.mark_failed(generation, &failure) else {
            return;
        };
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use futures::stream;
    use remote_console_core::traits::PushFrame;
    use tokio::time::{Instant, sleep};

    use super::*;

    enum Attempt {
        Fail,
        /// Deliver frames then keep the stream open.
        Hold(Vec<&'static str>),
        /// Deliver frames then end the stream.
        Close(Vec<&'static str>),
    }

    #[derive(Default)]
    struct ScriptedTransport {
        script: Mutex<VecDeque<Attempt>>,
        opens: Mutex<Vec<(String, Instant)>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Attempt>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                opens: Mutex::default(),
            })
        }

        fn opens(&self) -> Vec<(String, Instant)> {
            self.opens.lock().unwrap().clone()
        }

        fn gaps_ms(&self) -> Vec<u128> {
            let opens = self.opens();
            opens
                .windows(2)
                .map(|w| (w[1].1 - w[0].1).as_millis())
                .collect()
        }
    }

    fn frames(data: Vec<&'static str>) -> Vec<Result<PushFrame, TransportError>> {
        data.into_iter().map(|d| Ok(PushFrame::new(d))).collect()
    }

    #[async_trait]
    impl PushTransport for ScriptedTransport {
        async fn open(&self, url: &str) -> Result<PushSubscription, TransportError> {
            self.opens
                .lock()
                .unwrap()
                .push((url.to_string(), Instant::now()));
            let next = self.script.lock().unwrap().pop_front();
            match next.unwrap_or(Attempt::Fail) {
                Attempt::Fail => Err(TransportError::Open("connection refused".into())),
                Attempt::Hold(data) => Ok(stream::iter(frames(data))
                    .chain(stream::pending())
                    .boxed()),
                Attempt::Close(data) => Ok(stream::iter(frames(data)).boxed()),
            }
        }
    }

    fn connection(
        transport: Arc<dyn PushTransport>,
    ) -> (StreamConnection, mpsc::UnboundedReceiver<StreamDelivery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (StreamConnection::new(transport, EventHub::new(), tx), rx)
    }

    async fn settle() {
        sleep(Duration::from_millis(1)).await;
    }

    #[test]
    fn test_reconnect_delay_is_capped_linear() {
        let delays: Vec<u128> = (1..=12).map(|a| reconnect_delay(a).as_millis()).collect();
        assert_eq!(
            delays,
            [1000, 2000, 3000, 4000, 5000, 6000, 7000, 8000, 9000, 10_000, 10_000, 10_000]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_sequence_on_repeated_failure() {
        let transport = ScriptedTransport::new(vec![]);
        let (conn, _rx) = connection(transport.clone());

        conn.connect("s1", "http://svc/s1/stream".into());
        settle().await;
        assert_eq!(conn.status(), StreamStatus::Error);
        assert_eq!(conn.attempts(), 1);
        assert!(conn.error().unwrap().contains("reconnecting in 1s"));

        sleep(Duration::from_secs(80)).await;
        let gaps = transport.gaps_ms();
        assert_eq!(
            gaps[..11],
            [1000, 2000, 3000, 4000, 5000, 6000, 7000, 8000, 9000, 10_000, 10_000]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_open_resets_attempts() {
        let transport = ScriptedTransport::new(vec![
            Attempt::Fail,
            Attempt::Fail,
            Attempt::Close(vec![]),
            Attempt::Hold(vec![]),
        ]);
        let (conn, _rx) = connection(transport.clone());

        conn.connect("s1", "http://svc/s1/stream".into());
        sleep(Duration::from_secs(10)).await;

        assert_eq!(transport.gaps_ms(), [1000, 2000, 1000]);
        assert_eq!(conn.status(), StreamStatus::Open);
        assert_eq!(conn.attempts(), 0);
        assert_eq!(conn.error(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivers_decoded_messages() {
        let transport = ScriptedTransport::new(vec![Attempt::Hold(vec![
            r#"{"text":"hello","append":true}"#,
            "{}",
            r#"{"done":true}"#,
        ])]);
        let (conn, mut rx) = connection(transport);

        conn.connect("s1", "http://svc/s1/stream".into());
        settle().await;

        let first = rx.recv().await.unwrap();
        assert_eq!(first.session_id, "s1");
        assert!(matches!(first.inbound, Inbound::Message(ref m) if m.append));
        assert_eq!(rx.recv().await.unwrap().inbound, Inbound::Finalize);
        assert!(rx.try_recv().is_err());
        assert_eq!(conn.status(), StreamStatus::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_cancels_pending_reconnect() {
        let transport = ScriptedTransport::new(vec![]);
        let (conn, _rx) = connection(transport.clone());

        conn.connect("s1", "http://svc/s1/stream".into());
        settle().await;
        assert_eq!(conn.status(), StreamStatus::Error);

        conn.dispose();
        assert_eq!(conn.status(), StreamStatus::Idle);
        assert_eq!(conn.session_id(), None);
        assert_eq!(conn.error(), None);

        sleep(Duration::from_secs(30)).await;
        assert_eq!(transport.opens().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_switching_session_abandons_old_timer() {
        let transport = ScriptedTransport::new(vec![Attempt::Fail]);
        let (conn, _rx) = connection(transport.clone());

        conn.connect("old", "http://svc/old/stream".into());
        settle().await;
        // Same session while waiting to reconnect: no second worker.
        conn.connect("old", "http://svc/old/stream".into());
        conn.connect("new", "http://svc/new/stream".into());
        sleep(Duration::from_secs(20)).await;

        let urls: Vec<String> = transport.opens().into_iter().map(|(u, _)| u).collect();
        assert_eq!(urls[0], "http://svc/old/stream");
        assert!(urls[1..].iter().all(|u| u == "http://svc/new/stream"));
        assert_eq!(conn.session_id().as_deref(), Some("new"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_switching_session_passes_through_idle() {
        let transport = ScriptedTransport::new(vec![Attempt::Hold(vec![]), Attempt::Hold(vec![])]);
        let (conn, _rx) = connection(transport);
        let mut events = conn.inner.events.subscribe();

        conn.connect("old", "http://svc/old/stream".into());
        settle().await;
        assert_eq!(conn.status(), StreamStatus::Open);
        conn.connect("new", "http://svc/new/stream".into());
        settle().await;

        let mut statuses = Vec::new();
        while let Ok(ConsoleEvent::StreamStatus { status, .. }) = events.try_recv() {
            statuses.push(status);
        }
        assert_eq!(
            statuses,
            [
                StreamStatus::Connecting,
                StreamStatus::Open,
                StreamStatus::Idle,
                StreamStatus::Connecting,
                StreamStatus::Open,
            ]
        );
    }

    #[tokio::test]
    async fn test_unsupported_transport() {
        let (conn, _rx) = connection(Arc::new(UnsupportedTransport));
        let mut events = conn.inner.events.subscribe();

        conn.connect("s1", "http://svc/s1/stream".into());
        assert_eq!(conn.status(), StreamStatus::Unsupported);
        assert_eq!(
            events.recv().await.unwrap(),
            ConsoleEvent::StreamStatus {
                status: StreamStatus::Unsupported,
                error: None
            }
        );

        conn.dispose();
        assert_eq!(conn.status(), StreamStatus::Idle);
    }
}
