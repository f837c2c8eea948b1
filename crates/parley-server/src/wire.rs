//! Wire format.
//!
//! Translates internal types into the camelCase JSON clients consume and
//! normalizes camelCase request params into the snake_case keys handlers read.

use serde::Serialize;

use parley_core::events::ChatEvent;
use parley_core::messages::{GenerationMetrics, Role};
use parley_store::{DashboardStats, SessionRow, TurnRow};
use parley_telemetry::MetricsSummary;

// ── Param normalization ──────────────────────────────────────────────────

const CAMEL_TO_SNAKE: &[(&str, &str)] = &[
    ("sessionId", "session_id"),
    ("displayName", "display_name"),
    ("customInstructions", "custom_instructions"),
    ("promptType", "prompt_type"),
    ("includeMetrics", "include_metrics"),
];

/// If both spellings are present, the snake_case value wins.
pub fn normalize_params(params: &serde_json::Value) -> serde_json::Value {
    let Some(obj) = params.as_object() else {
        return params.clone();
    };
    let mut result = obj.clone();
    for &(camel, snake) in CAMEL_TO_SNAKE {
        if result.contains_key(snake) {
            result.remove(camel);
        } else if let Some(val) = result.remove(camel) {
            result.insert(snake.to_string(), val);
        }
    }
    serde_json::Value::Object(result)
}

// ── Event envelope ───────────────────────────────────────────────────────

/// `{ type, sessionId?, timestamp, data }`
#[derive(Debug, Serialize)]
pub struct WireEvent {
    #[serde(rename = "type")]
    pub event_type: &'static str,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub timestamp: String,
    pub data: serde_json::Value,
}

pub fn wire_event_type(event: &ChatEvent) -> &'static str {
    match event {
        ChatEvent::Chunk { .. } => "chat.chunk",
        ChatEvent::TitleAssigned { .. } => "session.title",
        ChatEvent::GenerationComplete { .. } => "chat.complete",
        ChatEvent::GenerationStopped { .. } => "chat.stopped",
        ChatEvent::Error { .. } => "chat.error",
        ChatEvent::AudioReady { .. } => "chat.audio",
        ChatEvent::StatusChanged { .. } => "system.status",
    }
}

fn now_iso8601() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub fn audio_url(file: &str) -> String {
    format!("/audio/{file}")
}

pub fn metrics_to_wire(metrics: &GenerationMetrics) -> serde_json::Value {
    serde_json::json!({
        "tokens": metrics.tokens,
        "tps": metrics.tokens_per_second,
        "duration": metrics.duration_secs,
    })
}

pub fn event_to_wire(event: &ChatEvent) -> WireEvent {
    let data = match event {
        ChatEvent::Chunk { delta, .. } => serde_json::json!({ "content": delta }),
        ChatEvent::TitleAssigned { title, .. } => serde_json::json!({ "title": title }),
        ChatEvent::GenerationComplete { text, metrics, .. } => serde_json::json!({
            "text": text,
            "metrics": metrics_to_wire(metrics),
        }),
        ChatEvent::GenerationStopped { .. } => serde_json::json!({}),
        ChatEvent::Error { message, .. } => serde_json::json!({ "message": message }),
        ChatEvent::AudioReady { file, .. } => serde_json::json!({
            "file": file,
            "url": audio_url(file),
        }),
        ChatEvent::StatusChanged { state } => serde_json::json!({ "status": state.as_str() }),
    };

    WireEvent {
        event_type: wire_event_type(event),
        session_id: event.session_id().map(ToString::to_string),
        timestamp: now_iso8601(),
        data,
    }
}

pub fn serialize_event(event: &ChatEvent) -> Option<String> {
    serde_json::to_string(&event_to_wire(event)).ok()
}

// ── Response transforms ──────────────────────────────────────────────────

pub fn session_to_wire(session: &SessionRow) -> serde_json::Value {
    serde_json::json!({
        "sessionId": session.id.to_string(),
        "title": session.title,
        "isPersistent": session.is_persistent,
        "createdAt": session.created_at,
        "updatedAt": session.updated_at,
    })
}

pub fn session_list_to_wire(sessions: &[SessionRow]) -> serde_json::Value {
    let items: Vec<serde_json::Value> = sessions.iter().map(session_to_wire).collect();
    serde_json::json!({ "sessions": items })
}

/// One history row: `{ role, content, isUser, metrics? }`.
pub fn turn_to_wire(turn: &TurnRow) -> serde_json::Value {
    let mut obj = serde_json::json!({
        "role": turn.role.as_str(),
        "content": turn.content,
        "isUser": turn.role == Role::User,
    });
    if let Some(ref metrics) = turn.metadata {
        obj["metrics"] = metrics_to_wire(metrics);
    }
    obj
}

pub fn history_to_wire(session_id: &str, turns: &[TurnRow]) -> serde_json::Value {
    let messages: Vec<serde_json::Value> = turns.iter().map(turn_to_wire).collect();
    serde_json::json!({
        "sessionId": session_id,
        "messages": messages,
    })
}

pub fn dashboard_to_wire(stats: &DashboardStats, live: Option<&MetricsSummary>) -> serde_json::Value {
    let mut obj = serde_json::json!({
        "totalGenerations": stats.total_generations,
        "successfulGenerations": stats.successful_generations,
        "avgLatency": stats.avg_latency_secs,
        "totalInputTokens": stats.total_input_tokens,
        "totalOutputTokens": stats.total_output_tokens,
        "byProvider": stats.by_provider,
    });
    if let Some(summary) = live {
        obj["live"] = serde_json::to_value(summary).unwrap_or_default();
    }
    obj
}
