use std::sync::LazyLock;

use regex::Regex;

use parley_core::profile::UserProfile;
use parley_core::provider::ProviderKind;

pub const MAX_MESSAGE_CHARS: usize = 50_000;
pub const MAX_SESSION_ID_CHARS: usize = 128;
pub const MAX_MODEL_CHARS: usize = 256;
pub const MAX_PROMPT_CHARS: usize = 10_000;
pub const MAX_PROFILE_FIELD_CHARS: usize = 500;
const LOG_PREVIEW_CHARS: usize = 100;
const SENSITIVE_KEYS: [&str; 4] = ["api_key", "password", "token", "secret"];

static SESSION_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap());
static LOCAL_URL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https?://([^/:?#\s]+)(:\d{1,5})?(/\S*)?$").unwrap());

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("message cannot be empty")]
    EmptyMessage,
    #[error("message exceeds {max} characters")]
    MessageTooLong { max: usize },
    #[error("invalid session id")]
    InvalidSessionId,
    #[error("provider '{0}' is not supported (use: ollama, lmstudio)")]
    UnknownProvider(String),
    #[error("invalid model name")]
    InvalidModel,
    #[error("only local http(s) URLs are allowed")]
    NonLocalUrl,
    #[error("prompt exceeds {max} characters")]
    PromptTooLong { max: usize },
    #[error("profile field '{field}' exceeds {max} characters")]
    ProfileFieldTooLong { field: &'static str, max: usize },
}

/// Trim a user message and check its length. Returns the trimmed text.
pub fn validate_message(message: &str) -> Result<String, ValidationError> {
    let trimmed = message.trim();
    let len = trimmed.chars().count();
    if len == 0 {
        return Err(ValidationError::EmptyMessage);
    }
    if len > MAX_MESSAGE_CHARS {
        return Err(ValidationError::MessageTooLong { max: MAX_MESSAGE_CHARS });
    }
    Ok(trimmed.to_string())
}

/// Client-chosen session ids: `default` or a short slug of `[A-Za-z0-9_-]`.
pub fn validate_session_id(id: &str) -> Result<(), ValidationError> {
    if id.len() > MAX_SESSION_ID_CHARS || !SESSION_ID_PATTERN.is_match(id) {
        return Err(ValidationError::InvalidSessionId);
    }
    Ok(())
}

pub fn validate_provider(name: &str) -> Result<ProviderKind, ValidationError> {
    name.parse()
        .map_err(|_| ValidationError::UnknownProvider(name.trim().to_ascii_lowercase()))
}

pub fn validate_model(model: &str) -> Result<(), ValidationError> {
    let model = model.trim();
    if model.is_empty() || model.chars().count() > MAX_MODEL_CHARS || model.chars().any(char::is_control) {
        return Err(ValidationError::InvalidModel);
    }
    Ok(())
}

/// Model servers must live on this machine or the local network.
pub fn validate_base_url(url: &str) -> Result<String, ValidationError> {
    let url = url.trim();
    let caps = LOCAL_URL_PATTERN.captures(url).ok_or(ValidationError::NonLocalUrl)?;
    let host = caps.get(1).map(|m| m.as_str()).unwrap_or_default().to_ascii_lowercase();
    let is_local = matches!(host.as_str(), "localhost" | "127.0.0.1" | "0.0.0.0") || host.starts_with("192.168.");
    if !is_local {
        return Err(ValidationError::NonLocalUrl);
    }
    Ok(url.to_string())
}

pub fn validate_system_prompt(prompt: &str) -> Result<String, ValidationError> {
    let prompt = prompt.trim();
    if prompt.chars().count() > MAX_PROMPT_CHARS {
        return Err(ValidationError::PromptTooLong { max: MAX_PROMPT_CHARS });
    }
    Ok(prompt.to_string())
}

/// Trim every field and enforce the per-field limit.
pub fn validate_profile(profile: &UserProfile) -> Result<UserProfile, ValidationError> {
    let check = |field: &'static str, value: &str| -> Result<String, ValidationError> {
        let value = value.trim();
        if value.chars().count() > MAX_PROFILE_FIELD_CHARS {
            return Err(ValidationError::ProfileFieldTooLong {
                field,
                max: MAX_PROFILE_FIELD_CHARS,
            });
        }
        Ok(value.to_string())
    };

    Ok(UserProfile {
        display_name: check("display_name", &profile.display_name)?,
        email: check("email", &profile.email)?,
        gender: check("gender", &profile.gender)?,
        birthdate: check("birthdate", &profile.birthdate)?,
        custom_instructions: check("custom_instructions", &profile.custom_instructions)?,
    })
}

/// Shorten user text before it reaches a log line.
pub fn sanitize_for_log(text: &str) -> String {
    if text.chars().count() > LOG_PREVIEW_CHARS {
        let head: String = text.chars().take(LOG_PREVIEW_CHARS).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}

/// Like `sanitize_for_log`, for structured values: sensitive keys are hidden
/// and nested strings shortened.
pub fn sanitize_value_for_log(value: &serde_json::Value) -> serde_json::Value {
    use serde_json::Value;
    match value {
        Value::String(s) => Value::String(sanitize_for_log(s)),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let lower = k.to_ascii_lowercase();
                    if SENSITIVE_KEYS.iter().any(|s| lower.contains(s)) {
                        (k.clone(), Value::String("***HIDDEN***".into()))
                    } else {
                        (k.clone(), sanitize_value_for_log(v))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_value_for_log).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_is_trimmed_and_bounded() {
        assert_eq!(validate_message("  hi  ").unwrap(), "hi");
        assert_eq!(validate_message(" \n\t "), Err(ValidationError::EmptyMessage));
        assert!(validate_message(&"a".repeat(MAX_MESSAGE_CHARS)).is_ok());
        assert!(matches!(
            validate_message(&"a".repeat(MAX_MESSAGE_CHARS + 1)),
            Err(ValidationError::MessageTooLong { .. })
        ));
    }

    #[test]
    fn message_length_counts_characters() {
        // 50k multi-byte characters are still within the limit
        assert!(validate_message(&"é".repeat(MAX_MESSAGE_CHARS)).is_ok());
    }

    #[test]
    fn session_ids() {
        assert!(validate_session_id("default").is_ok());
        assert!(validate_session_id("sess_1712_abc-DEF").is_ok());
        assert!(validate_session_id("").is_err());
        assert!(validate_session_id("../etc").is_err());
        assert!(validate_session_id("has space").is_err());
        assert!(validate_session_id(&"a".repeat(MAX_SESSION_ID_CHARS + 1)).is_err());
    }

    #[test]
    fn providers() {
        assert_eq!(validate_provider(" LMStudio ").unwrap(), ProviderKind::LmStudio);
        assert_eq!(
            validate_provider("OpenAI"),
            Err(ValidationError::UnknownProvider("openai".into()))
        );
    }

    #[test]
    fn models() {
        assert!(validate_model("llama3.1:8b").is_ok());
        assert!(validate_model("  ").is_err());
        assert!(validate_model("bad\nmodel").is_err());
    }

    #[test]
    fn base_urls_must_be_local() {
        assert!(validate_base_url("http://localhost:11434").is_ok());
        assert!(validate_base_url("http://127.0.0.1:1234/v1").is_ok());
        assert!(validate_base_url("https://192.168.0.10:8080/v1").is_ok());
        assert!(validate_base_url("http://0.0.0.0:1234").is_ok());
        assert_eq!(validate_base_url("http://example.com/v1"), Err(ValidationError::NonLocalUrl));
        assert_eq!(validate_base_url("ftp://localhost"), Err(ValidationError::NonLocalUrl));
        assert_eq!(validate_base_url("localhost:11434"), Err(ValidationError::NonLocalUrl));
    }

    #[test]
    fn prompt_and_profile_limits() {
        assert_eq!(validate_system_prompt("  be brief ").unwrap(), "be brief");
        assert!(validate_system_prompt(&"x".repeat(MAX_PROMPT_CHARS + 1)).is_err());

        let profile = UserProfile {
            display_name: " Ana ".into(),
            ..Default::default()
        };
        assert_eq!(validate_profile(&profile).unwrap().display_name, "Ana");

        let too_long = UserProfile {
            email: "e".repeat(MAX_PROFILE_FIELD_CHARS + 1),
            ..Default::default()
        };
        assert_eq!(
            validate_profile(&too_long),
            Err(ValidationError::ProfileFieldTooLong {
                field: "email",
                max: MAX_PROFILE_FIELD_CHARS
            })
        );
    }

    #[test]
    fn log_sanitizing() {
        assert_eq!(sanitize_for_log("short"), "short");
        let long = "x".repeat(150);
        let out = sanitize_for_log(&long);
        assert_eq!(out.chars().count(), 103);
        assert!(out.ends_with("..."));

        let value = serde_json::json!({"API_KEY": "k", "auth_token": "t", "base_url": "http://localhost"});
        let clean = sanitize_value_for_log(&value);
        assert_eq!(clean["API_KEY"], "***HIDDEN***");
        assert_eq!(clean["auth_token"], "***HIDDEN***");
        assert_eq!(clean["base_url"], "http://localhost");
    }
}
