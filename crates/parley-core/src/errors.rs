use std::time::Duration;

/// Typed error hierarchy for model-server operations.
/// Classifies errors as fatal (the request itself is wrong), retryable, or operational.
#[derive(Clone, Debug, thiserror::Error)]
pub enum GatewayError {
    // Fatal: the request will not succeed as sent
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("model not found: {0}")]
    ModelNotFound(String),

    // Retryable
    #[error("server error {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("server busy")]
    ServerBusy,
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),

    // Operational
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("cancelled")]
    Cancelled,
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ServerError { .. } | Self::ServerBusy | Self::NetworkError(_) | Self::StreamInterrupted(_)
        )
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvalidRequest(_) | Self::ModelNotFound(_))
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::ModelNotFound(_) => "model_not_found",
            Self::ServerError { .. } => "server_error",
            Self::ServerBusy => "server_busy",
            Self::NetworkError(_) => "network_error",
            Self::StreamInterrupted(_) => "stream_interrupted",
            Self::Timeout(_) => "timeout",
            Self::Cancelled => "cancelled",
        }
    }

    /// Classify an HTTP status code into the appropriate error variant.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            400 | 422 => Self::InvalidRequest(body),
            404 => Self::ModelNotFound(body),
            429 | 503 => Self::ServerBusy,
            500..=599 => Self::ServerError { status, body },
            _ => Self::InvalidRequest(format!("unexpected status {status}: {body}")),
        }
    }
}
