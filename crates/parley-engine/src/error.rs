use std::time::Duration;

use parley_core::errors::GatewayError;
use parley_store::StoreError;

use crate::speech::SpeechError;
use crate::validation::ValidationError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("speech error: {0}")]
    Speech(#[from] SpeechError),

    #[error("generation timed out after {0:?}")]
    StreamTimeout(Duration),

    #[error("generation cancelled")]
    Cancelled,

    #[error("{0}")]
    Internal(String),
}

impl EngineError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::ProviderUnavailable(_) => "provider_unavailable",
            Self::Gateway(e) => e.error_kind(),
            Self::Store(e) => e.error_kind(),
            Self::Speech(_) => "speech",
            Self::StreamTimeout(_) => "stream_timeout",
            Self::Cancelled => "cancelled",
            Self::Internal(_) => "internal",
        }
    }

    /// Message safe to show the person chatting. Storage and internal
    /// details stay in the logs.
    pub fn client_message(&self) -> String {
        match self {
            Self::Validation(e) => e.to_string(),
            Self::ProviderUnavailable(name) => format!("Provider '{name}' is not available"),
            Self::Gateway(GatewayError::ModelNotFound(_)) => {
                "The selected model was not found on the provider".to_string()
            }
            Self::Gateway(GatewayError::NetworkError(_)) => {
                "Could not reach the model server. Is it running?".to_string()
            }
            Self::Gateway(e) => format!("Model server error: {e}"),
            Self::StreamTimeout(d) => format!("Generation timed out after {}s", d.as_secs()),
            Self::Cancelled => "Generation cancelled".to_string(),
            Self::Store(_) | Self::Speech(_) | Self::Internal(_) => "Internal error while generating a response".to_string(),
        }
    }
}
