use serde::Deserialize;
use tracing::debug;

use parley_core::errors::GatewayError;
use parley_core::stream::StreamEvent;

/// State machine for parsing OpenAI-compatible chat completion chunks, as
/// served by Ollama and LM Studio.
#[derive(Default)]
pub struct SseParser {
    started: bool,
    finished: bool,
    finish_reason: Option<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Parse the payload of one `data:` field and return zero or more StreamEvents.
    pub fn parse_data(&mut self, data: &str) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }

        let data = data.trim();
        if data == "[DONE]" {
            self.finished = true;
            events.push(StreamEvent::Done {
                finish_reason: self.finish_reason.take(),
            });
            return events;
        }

        let chunk: ChunkPayload = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                debug!(error = %e, "skipping unparseable SSE payload");
                return events;
            }
        };

        if let Some(err) = chunk.error {
            self.finished = true;
            events.push(StreamEvent::Error {
                error: GatewayError::ServerError {
                    status: 500,
                    body: err.message(),
                },
            });
            return events;
        }

        if !self.started {
            self.started = true;
            events.push(StreamEvent::Start);
        }

        for choice in chunk.choices.into_iter().take(1) {
            if let Some(delta) = choice.delta {
                if let Some(thinking) = delta.reasoning_content.or(delta.reasoning) {
                    if !thinking.is_empty() {
                        events.push(StreamEvent::ThinkingDelta { delta: thinking });
                    }
                }
                if let Some(text) = delta.content {
                    if !text.is_empty() {
                        events.push(StreamEvent::TextDelta { delta: text });
                    }
                }
            }
            if let Some(reason) = choice.finish_reason {
                self.finish_reason = Some(reason);
            }
        }

        events
    }

    /// Called when the byte stream ends. Servers that close the connection
    /// after a finish reason without sending `[DONE]` still complete cleanly.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;
        if self.finish_reason.is_some() {
            vec![StreamEvent::Done {
                finish_reason: self.finish_reason.take(),
            }]
        } else {
            vec![StreamEvent::Error {
                error: GatewayError::StreamInterrupted("connection closed before completion".into()),
            }]
        }
    }
}

/// Extract the `data:` payloads of the complete SSE events in `raw`.
/// Multi-line data fields are joined with `\n`; comments and other fields are ignored.
pub fn parse_sse_lines(raw: &str) -> Vec<String> {
    let mut payloads = Vec::new();
    let mut current: Option<String> = None;

    for line in raw.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            if let Some(data) = current.take() {
                payloads.push(data);
            }
        } else if let Some(data) = line.strip_prefix("data:") {
            let data = data.strip_prefix(' ').unwrap_or(data);
            match current.as_mut() {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(data);
                }
                None => current = Some(data.to_string()),
            }
        }
    }

    // Handle trailing event without blank line
    if let Some(data) = current {
        payloads.push(data);
    }

    payloads
}

// --- Deserialization types for chat completion chunks ---

#[derive(Deserialize)]
struct ChunkPayload {
    #[serde(default)]
    choices: Vec<ChoicePayload>,
    error: Option<ErrorPayload>,
}

#[derive(Deserialize)]
struct ChoicePayload {
    delta: Option<DeltaPayload>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct DeltaPayload {
    content: Option<String>,
    reasoning_content: Option<String>,
    reasoning: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorPayload {
    Message(String),
    Object { message: String },
}

impl ErrorPayload {
    fn message(self) -> String {
        match self {
            Self::Message(m) | Self::Object { message: m } => m,
        }
    }
}
