//! Server-sent events push transport (feature-gated).

use async_trait::async_trait;
use bytes::BytesMut;
use futures::{StreamExt, future, stream};
use remote_console_core::traits::{PushFrame, PushSubscription, PushTransport, TransportError};
use reqwest::{Client, header::ACCEPT};

/// Longest line accepted without a terminating newline.
const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Push transport reading `text/event-stream` responses.
///
/// The client must not carry a total request timeout, or long-lived
/// streams are cut off.
#[derive(Clone, Default)]
pub struct SsePushTransport {
    client: Client,
}

impl SsePushTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PushTransport for SsePushTransport {
    async fn open(&self, url: &str) -> Result<PushSubscription, TransportError> {
        let response = self
            .client
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| TransportError::Open(e.to_string()))?;

        if !response.status().is_success() {
            return Err(TransportError::Open(format!(
                "unexpected status {}",
                response.status()
            )));
        }

        let frames = response
            .bytes_stream()
            .scan(SseParser::default(), |parser, chunk| {
                let items: Vec<Result<PushFrame, TransportError>> = match chunk {
                    Ok(bytes) => match parser.feed(&bytes) {
                        Ok(frames) => frames.into_iter().map(Ok).collect(),
                        Err(e) => vec![Err(e)],
                    },
                    Err(e) => vec![Err(TransportError::Stream(e.to_string()))],
                };
                future::ready(Some(stream::iter(items)))
            })
            .flatten();

        Ok(frames.boxed())
    }
}

/// Incremental `text/event-stream` parser.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: BytesMut,
    data: Vec<String>,
    id: Option<String>,
}

impl SseParser {
    /// Feed raw bytes; returns every event completed by them.
    ///
    /// # Errors
    /// Returns error if an unterminated line grows past the size limit. The
    /// pending input is discarded.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<PushFrame>, TransportError> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw = self.buffer.split_to(pos + 1);
            let text = String::from_utf8_lossy(&raw[..pos]).into_owned();
            let line = text.strip_suffix('\r').unwrap_or(text.as_str());
            if let Some(frame) = self.process_line(line) {
                frames.push(frame);
            }
        }

        if self.buffer.len() > MAX_LINE_BYTES {
            self.buffer.clear();
            self.data.clear();
            self.id = None;
            return Err(TransportError::Stream(format!(
                "event line exceeds {MAX_LINE_BYTES} bytes"
            )));
        }
        Ok(frames)
    }

    fn process_line(&mut self, line: &str) -> Option<PushFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = line
            .split_once(':')
            .map_or((line, ""), |(f, v)| (f, v.strip_prefix(' ').unwrap_or(v)));
        match field {
            "data" => self.data.push(value.to_string()),
            "id" if !value.contains('\0') => self.id = Some(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<PushFrame> {
        let id = self.id.take().filter(|id| !id.is_empty());
        if self.data.is_empty() {
            return None;
        }
        Some(PushFrame {
            data: std::mem::take(&mut self.data).join("\n"),
            correlation_id: id,
        })
    }
}
