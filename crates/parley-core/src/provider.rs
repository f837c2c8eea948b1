use std::fmt;
use std::pin::Pin;
use std::str::FromStr;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::errors::GatewayError;
use crate::messages::ChatMessage;
use crate::stream::StreamEvent;

/// Local model servers the orchestrator knows how to reach.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    #[serde(rename = "ollama")]
    Ollama,
    #[serde(rename = "lmstudio")]
    LmStudio,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 2] = [ProviderKind::Ollama, ProviderKind::LmStudio];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::LmStudio => "lmstudio",
        }
    }

    /// OpenAI-compatible endpoint each server exposes out of the box.
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::Ollama => "http://localhost:11434/v1",
            Self::LmStudio => "http://localhost:1234/v1",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "lmstudio" => Ok(Self::LmStudio),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

/// Options controlling generation behavior.
#[derive(Clone, Debug, Default)]
pub struct StreamOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
}

pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Trait implemented by each model-server client.
///
/// Dropping the returned stream must abort the underlying request.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;
    fn base_url(&self) -> &str;

    async fn list_models(&self) -> Result<Vec<String>, GatewayError>;

    async fn stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &StreamOptions,
    ) -> Result<EventStream, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_and_whitespace_insensitively() {
        assert_eq!(" Ollama ".parse::<ProviderKind>().unwrap(), ProviderKind::Ollama);
        assert_eq!("LMSTUDIO".parse::<ProviderKind>().unwrap(), ProviderKind::LmStudio);
        assert!("openai".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn serde_names_match_display() {
        for kind in ProviderKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{kind}\""));
        }
    }

    #[test]
    fn default_urls_end_in_v1() {
        for kind in ProviderKind::ALL {
            assert!(kind.default_base_url().ends_with("/v1"));
        }
    }

    #[test]
    fn stream_options_defaults() {
        let opts = StreamOptions::default();
        assert!(opts.max_tokens.is_none());
        assert!(opts.temperature.is_none());
    }
}
