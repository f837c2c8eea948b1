use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// One message in the prompt sent to a model server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Derived metrics attached to a completed assistant turn.
///
/// Serialized with the short keys clients and stored turn metadata use:
/// `{"tokens": 12, "tps": 4.3, "duration": 2.81}`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationMetrics {
    /// Number of visible deltas emitted.
    pub tokens: u32,
    #[serde(rename = "tps")]
    pub tokens_per_second: f64,
    #[serde(rename = "duration")]
    pub duration_secs: f64,
}

impl GenerationMetrics {
    /// Rounds the rate to one decimal and the duration to two.
    pub fn new(tokens: u32, tokens_per_second: f64, duration_secs: f64) -> Self {
        Self {
            tokens,
            tokens_per_second: (tokens_per_second * 10.0).round() / 10.0,
            duration_secs: (duration_secs * 100.0).round() / 100.0,
        }
    }
}
