use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use parking_lot::Mutex;

use parley_core::errors::GatewayError;
use parley_core::messages::ChatMessage;
use parley_core::provider::{EventStream, LlmProvider, ProviderKind, StreamOptions};
use parley_core::stream::StreamEvent;

/// Pre-programmed responses for deterministic testing without a model server.
pub enum MockResponse {
    /// Yield a sequence of StreamEvents.
    Stream(Vec<StreamEvent>),
    /// Yield each event after waiting `Duration`.
    Paced(Duration, Vec<StreamEvent>),
    /// Yield the events, then never produce anything else.
    Stalled(Vec<StreamEvent>),
    /// Return an error from the stream() call itself.
    Error(GatewayError),
    /// Wait a duration, then yield the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    /// Convenience: a complete stream with one text delta per piece.
    pub fn stream_text(pieces: &[&str]) -> Self {
        Self::Stream(text_events(pieces))
    }

    /// Convenience: like `stream_text`, with `pace` between events.
    pub fn paced_text(pace: Duration, pieces: &[&str]) -> Self {
        Self::Paced(pace, text_events(pieces))
    }

    /// Convenience: a stream that ends with an error event after some text.
    pub fn stream_error(pieces: &[&str], error: GatewayError) -> Self {
        let mut events = vec![StreamEvent::Start];
        events.extend(pieces.iter().map(|p| StreamEvent::text(*p)));
        events.push(StreamEvent::Error { error });
        Self::Stream(events)
    }

    /// Convenience: wrap any response with a delay.
    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

fn text_events(pieces: &[&str]) -> Vec<StreamEvent> {
    let mut events = vec![StreamEvent::Start];
    events.extend(pieces.iter().map(|p| StreamEvent::text(*p)));
    events.push(StreamEvent::Done {
        finish_reason: Some("stop".into()),
    });
    events
}

/// Mock provider that returns pre-programmed responses in sequence and
/// records the prompts it was sent.
pub struct MockProvider {
    kind: ProviderKind,
    responses: Mutex<VecDeque<MockResponse>>,
    models: Vec<String>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
    call_count: AtomicUsize,
}

impl MockProvider {
    pub fn new(kind: ProviderKind, responses: Vec<MockResponse>) -> Self {
        Self {
            kind,
            responses: Mutex::new(responses.into()),
            models: vec!["mock-model".to_string()],
            requests: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn with_models(mut self, models: &[&str]) -> Self {
        self.models = models.iter().map(|m| m.to_string()).collect();
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Prompts received so far, one entry per `stream` call.
    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn base_url(&self) -> &str {
        "mock://local/v1"
    }

    async fn list_models(&self) -> Result<Vec<String>, GatewayError> {
        Ok(self.models.clone())
    }

    async fn stream(
        &self,
        _model: &str,
        messages: &[ChatMessage],
        _options: &StreamOptions,
    ) -> Result<EventStream, GatewayError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.requests.lock().push(messages.to_vec());

        let next = self.responses.lock().pop_front();
        let Some(response) = next else {
            return Err(GatewayError::InvalidRequest(format!(
                "MockProvider: no response configured for call {idx}"
            )));
        };

        resolve_response(response).await
    }
}

/// Resolve a MockResponse, handling Delay by sleeping first.
/// Unrolls nested delays iteratively to avoid recursive async.
async fn resolve_response(response: MockResponse) -> Result<EventStream, GatewayError> {
    let mut current = response;
    loop {
        match current {
            MockResponse::Stream(events) => return Ok(Box::pin(stream::iter(events))),
            MockResponse::Paced(pace, events) => {
                return Ok(Box::pin(stream::iter(events).then(move |event| async move {
                    tokio::time::sleep(pace).await;
                    event
                })));
            }
            MockResponse::Stalled(events) => {
                return Ok(Box::pin(stream::iter(events).chain(stream::pending())));
            }
            MockResponse::Error(e) => return Err(e),
            MockResponse::Delay(duration, inner) => {
                tokio::time::sleep(duration).await;
                current = *inner;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(mock: &MockProvider) -> Vec<StreamEvent> {
        mock.stream("m", &[ChatMessage::user("hi")], &StreamOptions::default())
            .await
            .unwrap()
            .collect()
            .await
    }

    #[tokio::test]
    async fn text_response() {
        let mock = MockProvider::new(ProviderKind::Ollama, vec![MockResponse::stream_text(&["hello", " world"])]);
        let events = collect(&mock).await;

        assert_eq!(events.len(), 4); // Start, TextDelta x2, Done
        assert!(matches!(events[0], StreamEvent::Start));
        assert!(matches!(&events[2], StreamEvent::TextDelta { delta } if delta == " world"));
        assert!(matches!(events[3], StreamEvent::Done { .. }));
        assert_eq!(mock.requests(), vec![vec![ChatMessage::user("hi")]]);
    }

    #[tokio::test]
    async fn error_response() {
        let mock = MockProvider::new(
            ProviderKind::Ollama,
            vec![MockResponse::Error(GatewayError::ModelNotFound("x".into()))],
        );
        let result = mock.stream("m", &[], &StreamOptions::default()).await;
        assert!(matches!(result, Err(GatewayError::ModelNotFound(_))));
    }

    #[tokio::test]
    async fn sequential_and_exhausted() {
        let mock = MockProvider::new(
            ProviderKind::LmStudio,
            vec![MockResponse::stream_text(&["first"]), MockResponse::stream_text(&["second"])],
        );
        assert!(mock.stream("m", &[], &StreamOptions::default()).await.is_ok());
        assert!(mock.stream("m", &[], &StreamOptions::default()).await.is_ok());
        assert!(mock.stream("m", &[], &StreamOptions::default()).await.is_err());
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn paced_response_waits_between_events() {
        tokio::time::pause();
        let mock = MockProvider::new(
            ProviderKind::Ollama,
            vec![MockResponse::paced_text(Duration::from_secs(1), &["a", "b"])],
        );
        let start = tokio::time::Instant::now();
        let events = collect(&mock).await;
        assert_eq!(events.len(), 4);
        assert!(start.elapsed() >= Duration::from_secs(4));
    }

    #[tokio::test]
    async fn stalled_response_never_finishes() {
        tokio::time::pause();
        let mock = MockProvider::new(
            ProviderKind::Ollama,
            vec![MockResponse::Stalled(vec![StreamEvent::Start, StreamEvent::text("x")])],
        );
        let mut stream = mock.stream("m", &[], &StreamOptions::default()).await.unwrap();
        assert!(matches!(stream.next().await, Some(StreamEvent::Start)));
        assert!(matches!(stream.next().await, Some(StreamEvent::TextDelta { .. })));
        let third = tokio::time::timeout(Duration::from_secs(60), stream.next()).await;
        assert!(third.is_err());
    }

    #[tokio::test]
    async fn delayed_error() {
        tokio::time::pause();
        let mock = MockProvider::new(
            ProviderKind::Ollama,
            vec![MockResponse::delayed(Duration::from_millis(20), MockResponse::Error(GatewayError::ServerBusy))],
        );
        let start = tokio::time::Instant::now();
        let result = mock.stream("m", &[], &StreamOptions::default()).await;
        assert!(matches!(result, Err(GatewayError::ServerBusy)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn list_models_returns_configured() {
        let mock = MockProvider::new(ProviderKind::Ollama, vec![]).with_models(&["llama3", "qwen"]);
        assert_eq!(mock.list_models().await.unwrap(), vec!["llama3", "qwen"]);
    }
}
