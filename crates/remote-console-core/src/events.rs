//! Broadcast of client state changes to observers.

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::TranscriptEntry;

/// Live update buffer per subscriber.
const EVENT_CAPACITY: usize = 1024;

/// Push stream connection status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    /// No stream, or no active session.
    #[default]
    Idle,
    /// Opening the push transport.
    Connecting,
    /// Receiving messages.
    Open,
    /// Disconnected, waiting to reconnect.
    Error,
    /// The push transport is unavailable; only request/response works.
    Unsupported,
}

/// State change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleEvent {
    /// The active session token changed.
    SessionChanged(Option<String>),
    /// Full ordered snapshot after a transcript mutation.
    TranscriptChanged(Vec<TranscriptEntry>),
    /// The stream state machine moved.
    StreamStatus {
        status: StreamStatus,
        error: Option<String>,
    },
}

/// Fan-out of [`ConsoleEvent`]s.
///
/// Publishing never blocks and never fails; events sent while nobody is
/// subscribed are dropped.
#[derive(Clone)]
pub struct EventHub {
    sender: broadcast::Sender<ConsoleEvent>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub fn publish(&self, event: ConsoleEvent) {
        let _ = self.sender.send(event);
    }

    /// Get a receiver for live updates.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConsoleEvent> {
        self.sender.subscribe()
    }

    /// Live updates as a stream; lagged events are skipped.
    #[must_use]
    pub fn stream(&self) -> futures::stream::BoxStream<'static, ConsoleEvent> {
        BroadcastStream::new(self.subscribe())
            .filter_map(|res| async move { res.ok() })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stream_receives_published_events() {
        let hub = EventHub::new();
        let mut stream = hub.stream();

        hub.publish(ConsoleEvent::SessionChanged(Some("abc".into())));
        hub.publish(ConsoleEvent::StreamStatus {
            status: StreamStatus::Connecting,
            error: None,
        });

        assert_eq!(
            stream.next().await,
            Some(ConsoleEvent::SessionChanged(Some("abc".into())))
        );
        assert!(matches!(
            stream.next().await,
            Some(ConsoleEvent::StreamStatus {
                status: StreamStatus::Connecting,
                ..
            })
        ));
    }

    #[test]
    fn test_publish_without_subscribers() {
        let hub = EventHub::default();
        hub.publish(ConsoleEvent::SessionChanged(None));
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&StreamStatus::Unsupported).unwrap();
        assert_eq!(json, "\"unsupported\"");
    }
}
