use crate::errors::GatewayError;

/// Events emitted while a model server streams a completion. Ordering contract:
///
/// Start → (TextDelta | ThinkingDelta)* → Done
///
/// Error can appear at any point and ends the stream.
#[derive(Clone, Debug)]
pub enum StreamEvent {
    Start,
    /// Visible completion text. May still contain inline reasoning markers.
    TextDelta { delta: String },
    /// Reasoning the server reports on a separate channel. Never shown.
    ThinkingDelta { delta: String },
    Done { finish_reason: Option<String> },
    Error { error: GatewayError },
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }

    pub fn text(delta: impl Into<String>) -> Self {
        Self::TextDelta { delta: delta.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_classification() {
        assert!(StreamEvent::Done { finish_reason: None }.is_terminal());
        assert!(StreamEvent::Error { error: GatewayError::Cancelled }.is_terminal());
        assert!(!StreamEvent::text("x").is_terminal());
        assert!(!StreamEvent::Start.is_terminal());
    }
}
