use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Future, Stream};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use parley_core::errors::GatewayError;
use parley_core::messages::ChatMessage;
use parley_core::provider::{EventStream, LlmProvider, ProviderKind, StreamOptions};
use parley_core::stream::StreamEvent;

use crate::sse::{self, SseParser};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const SSE_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const MODELS_TIMEOUT: Duration = Duration::from_secs(10);

/// Normalize a server URL so it always points at the OpenAI-compatible `/v1` root.
pub fn normalize_base_url(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    if trimmed.ends_with("/v1") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/v1")
    }
}

/// Client for a local server speaking the OpenAI chat completions protocol.
pub struct OpenAiCompatProvider {
    client: Client,
    kind: ProviderKind,
    base_url: String,
}

impl OpenAiCompatProvider {
    pub fn new(kind: ProviderKind, base_url: &str) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::NetworkError(format!("build HTTP client: {e}")))?;

        Ok(Self {
            client,
            kind,
            base_url: normalize_base_url(base_url),
        })
    }

    fn request_body<'a>(
        &self,
        model: &'a str,
        messages: &'a [ChatMessage],
        options: &StreamOptions,
    ) -> ChatRequest<'a> {
        ChatRequest {
            model,
            messages,
            stream: true,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    #[instrument(skip(self), fields(provider = %self.kind))]
    async fn list_models(&self) -> Result<Vec<String>, GatewayError> {
        let resp = self
            .client
            .get(format!("{}/models", self.base_url))
            .timeout(MODELS_TIMEOUT)
            .send()
            .await
            .map_err(|e| GatewayError::NetworkError(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::from_status(status, body));
        }

        let list: ModelList = resp
            .json()
            .await
            .map_err(|e| GatewayError::InvalidRequest(format!("malformed model list: {e}")))?;
        Ok(list.data.into_iter().map(|m| m.id).collect())
    }

    #[instrument(skip(self, messages, options), fields(provider = %self.kind, model = %model))]
    async fn stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &StreamOptions,
    ) -> Result<EventStream, GatewayError> {
        let body = self.request_body(model, messages, options);

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::NetworkError(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::from_status(status, body));
        }

        Ok(Box::pin(SseStream::new(resp.bytes_stream())))
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

/// Wraps a byte stream from reqwest and yields StreamEvents.
/// Emits an error if no data arrives within `idle_duration`.
struct SseStream {
    inner: Pin<Box<dyn Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>,
    parser: SseParser,
    buffer: String,
    pending: Vec<StreamEvent>,
    idle_deadline: Pin<Box<tokio::time::Sleep>>,
    idle_duration: Duration,
    terminated: bool,
}

impl SseStream {
    fn new(byte_stream: impl Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static) -> Self {
        Self::with_idle_timeout(byte_stream, SSE_IDLE_TIMEOUT)
    }

    fn with_idle_timeout(
        byte_stream: impl Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            inner: Box::pin(byte_stream),
            parser: SseParser::new(),
            buffer: String::new(),
            pending: Vec::new(),
            idle_deadline: Box::pin(tokio::time::sleep(idle_timeout)),
            idle_duration: idle_timeout,
            terminated: false,
        }
    }

    /// Queue events and mark the stream done once a terminal event is seen.
    fn enqueue(&mut self, events: Vec<StreamEvent>) {
        for event in events {
            if event.is_terminal() {
                self.terminated = true;
            }
            self.pending.push(event);
        }
    }
}

impl Stream for SseStream {
    type Item = StreamEvent;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        // Return pending events first
        if !self.pending.is_empty() {
            return std::task::Poll::Ready(Some(self.pending.remove(0)));
        }
        if self.terminated {
            return std::task::Poll::Ready(None);
        }

        loop {
            match self.inner.as_mut().poll_next(cx) {
                std::task::Poll::Ready(Some(Ok(bytes))) => {
                    // Data received, reset the idle timer
                    let new_deadline = tokio::time::Instant::now() + self.idle_duration;
                    self.idle_deadline.as_mut().reset(new_deadline);

                    let text = String::from_utf8_lossy(&bytes);
                    self.buffer.push_str(&text.replace("\r\n", "\n"));

                    // Process complete SSE events from the buffer
                    while let Some(pos) = self.buffer.find("\n\n") {
                        let chunk = self.buffer[..pos + 2].to_string();
                        self.buffer = self.buffer[pos + 2..].to_string();

                        for data in sse::parse_sse_lines(&chunk) {
                            let events = self.parser.parse_data(&data);
                            self.enqueue(events);
                        }
                    }

                    if !self.pending.is_empty() {
                        return std::task::Poll::Ready(Some(self.pending.remove(0)));
                    }
                }
                std::task::Poll::Ready(Some(Err(e))) => {
                    self.terminated = true;
                    return std::task::Poll::Ready(Some(StreamEvent::Error {
                        error: GatewayError::StreamInterrupted(e.to_string()),
                    }));
                }
                std::task::Poll::Ready(None) => {
                    // Stream ended; flush what is buffered
                    let remaining = std::mem::take(&mut self.buffer);
                    for data in sse::parse_sse_lines(&remaining) {
                        let events = self.parser.parse_data(&data);
                        self.enqueue(events);
                    }
                    let tail = self.parser.finish();
                    self.enqueue(tail);
                    self.terminated = true;
                    if !self.pending.is_empty() {
                        return std::task::Poll::Ready(Some(self.pending.remove(0)));
                    }
                    return std::task::Poll::Ready(None);
                }
                std::task::Poll::Pending => {
                    // Nothing yet; check the idle timer
                    if self.idle_deadline.as_mut().poll(cx).is_ready() {
                        self.terminated = true;
                        return std::task::Poll::Ready(Some(StreamEvent::Error {
                            error: GatewayError::StreamInterrupted(format!(
                                "idle timeout after {}s",
                                self.idle_duration.as_secs()
                            )),
                        }));
                    }
                    return std::task::Poll::Pending;
                }
            }
        }
    }
}
