//! RPC method handlers organized by domain.

use std::sync::Arc;
use std::time::Instant;

use parley_core::ids::{ClientId, SessionId};
use parley_core::profile::UserProfile;
use parley_core::provider::ProviderKind;
use parley_core::state::LifecycleState;
use parley_engine::validation;
use parley_llm::ProviderRegistry;
use parley_store::settings::GENERAL_PROMPT;
use parley_store::{Database, SessionRepo, SettingsRepo, StoreError, TelemetryRepo, TurnRepo};
use parley_telemetry::MetricsRecorder;

use crate::orchestrator::{ChatOrchestrator, Rejection, SubmitParams};
use crate::rpc::{self, RpcResponse};
use crate::wire;

const DEFAULT_SESSION_ID: &str = "default";
const DEFAULT_SESSION_LIST_LIMIT: u64 = 50;

/// Shared state available to all RPC handlers.
pub struct HandlerState {
    pub db: Database,
    pub providers: ProviderRegistry,
    pub orchestrator: Option<Arc<dyn ChatOrchestrator>>,
    pub metrics: Option<Arc<MetricsRecorder>>,
    started_at: Instant,
}

impl HandlerState {
    pub fn new(db: Database, providers: ProviderRegistry) -> Self {
        Self {
            db,
            providers,
            orchestrator: None,
            metrics: None,
            started_at: Instant::now(),
        }
    }

    pub fn with_orchestrator(mut self, orchestrator: Arc<dyn ChatOrchestrator>) -> Self {
        self.orchestrator = Some(orchestrator);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        self.orchestrator
            .as_ref()
            .map(|o| o.state())
            .unwrap_or_default()
    }
}

/// Dispatch an RPC method to its handler. `client_id` is `None` for calls
/// that did not arrive over a WebSocket (e.g. `/health`).
pub async fn dispatch(
    state: &Arc<HandlerState>,
    client_id: Option<&ClientId>,
    method: &str,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let params = wire::normalize_params(params);

    match method {
        // Chat
        "chat.send" => chat_send(state, client_id, &params, id).await,
        "chat.stop" => chat_stop(state, client_id, id).await,

        // Sessions
        "session.list" => session_list(state, &params, id),
        "session.history" => session_history(state, &params, id),
        "session.delete" => session_delete(state, &params, id),

        // Models
        "models.list" => models_list(state, &params, id).await,

        // Settings
        "settings.getPrompts" => settings_get_prompts(state, id),
        "settings.savePrompts" => settings_save_prompts(state, &params, id),
        "profile.get" => profile_get(state, id),
        "profile.save" => profile_save(state, &params, id),

        // Telemetry
        "metrics.dashboard" => metrics_dashboard(state, id),

        // System
        "system.status" => system_status(state, id),
        "health" | "system.ping" => health(state, id),

        _ => RpcResponse::method_not_found(id, method),
    }
}

fn store_error(id: Option<serde_json::Value>, e: &StoreError) -> RpcResponse {
    tracing::warn!(error = %e, kind = e.error_kind(), "store error in rpc handler");
    RpcResponse::internal_error(id, "Storage error")
}

fn session_id_param(params: &serde_json::Value) -> Result<SessionId, String> {
    let raw = rpc::require_str(params, "session_id")?;
    validation::validate_session_id(raw).map_err(|e| e.to_string())?;
    Ok(SessionId::from_raw(raw))
}

// ── Chat handlers (wired to orchestrator) ──

async fn chat_send(
    state: &Arc<HandlerState>,
    client_id: Option<&ClientId>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let Some(ref orchestrator) = state.orchestrator else {
        return RpcResponse::internal_error(id, "Chat orchestrator not configured");
    };
    let Some(client_id) = client_id else {
        return RpcResponse::invalid_params(id, "chat.send requires a WebSocket client");
    };

    let content = rpc::optional_str(params, "message")
        .or_else(|| rpc::optional_str(params, "content"))
        .unwrap_or_default();

    let submit = SubmitParams {
        client_id: client_id.clone(),
        session_id: rpc::optional_str(params, "session_id")
            .unwrap_or(DEFAULT_SESSION_ID)
            .to_string(),
        content: content.to_string(),
        provider: rpc::optional_str(params, "provider")
            .unwrap_or(ProviderKind::Ollama.as_str())
            .to_string(),
        model: rpc::optional_str(params, "model").unwrap_or_default().to_string(),
    };

    match orchestrator.submit(submit).await {
        Ok(accepted) => RpcResponse::success(
            id,
            serde_json::json!({
                "acknowledged": true,
                "generationId": accepted.generation_id.to_string(),
                "sessionId": accepted.session_id.to_string(),
            }),
        ),
        Err(rejection) => {
            let code = match rejection {
                Rejection::RateLimited => rpc::RATE_LIMITED,
                Rejection::Busy => rpc::BUSY,
                Rejection::Invalid(_) => rpc::VALIDATION_ERROR,
            };
            RpcResponse::error(id, code, rejection.to_string())
        }
    }
}

async fn chat_stop(
    state: &Arc<HandlerState>,
    client_id: Option<&ClientId>,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let Some(ref orchestrator) = state.orchestrator else {
        return RpcResponse::internal_error(id, "Chat orchestrator not configured");
    };
    let Some(client_id) = client_id else {
        return RpcResponse::invalid_params(id, "chat.stop requires a WebSocket client");
    };

    let stopped = orchestrator.stop(client_id).await;
    RpcResponse::success(id, serde_json::json!({ "stopped": stopped }))
}

// ── Session handlers ──

fn session_list(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let limit = rpc::optional_u64(params, "limit")
        .unwrap_or(DEFAULT_SESSION_LIST_LIMIT)
        .min(u64::from(u32::MAX)) as u32;

    match SessionRepo::new(state.db.clone()).list_persistent(limit) {
        Ok(sessions) => RpcResponse::success(id, wire::session_list_to_wire(&sessions)),
        Err(e) => store_error(id, &e),
    }
}

fn session_history(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let session_id = match session_id_param(params) {
        Ok(s) => s,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };

    let turns = match TurnRepo::new(state.db.clone()).history(&session_id) {
        Ok(turns) => turns,
        Err(e) => return store_error(id, &e),
    };
    let title = match SessionRepo::new(state.db.clone()).get(&session_id) {
        Ok(session) => session.title,
        Err(StoreError::NotFound(_)) => None,
        Err(e) => return store_error(id, &e),
    };

    let mut result = wire::history_to_wire(session_id.as_str(), &turns);
    result["title"] = serde_json::json!(title);
    RpcResponse::success(id, result)
}

fn session_delete(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let session_id = match session_id_param(params) {
        Ok(s) => s,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };

    match SessionRepo::new(state.db.clone()).delete(&session_id) {
        Ok(true) => {
            tracing::info!(session_id = %session_id, "session deleted");
            RpcResponse::success(id, serde_json::json!({ "deleted": true }))
        }
        Ok(false) => RpcResponse::error(id, rpc::NOT_FOUND, format!("Session not found: {session_id}")),
        Err(e) => store_error(id, &e),
    }
}

// ── Model handlers ──

async fn models_list(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let requested = match rpc::optional_str(params, "provider") {
        Some(name) => match validation::validate_provider(name) {
            Ok(kind) => Some(kind),
            Err(e) => return RpcResponse::error(id, rpc::VALIDATION_ERROR, e.to_string()),
        },
        None => None,
    };

    let kinds = match requested {
        Some(kind) => vec![kind],
        None => state.providers.kinds(),
    };

    let mut providers = serde_json::Map::new();
    for kind in kinds {
        let Some(provider) = state.providers.get(kind) else {
            return RpcResponse::error(
                id,
                rpc::PROVIDER_UNAVAILABLE,
                format!("Provider '{kind}' is not available"),
            );
        };
        let models = match provider.list_models().await {
            Ok(models) => models,
            Err(e) if requested.is_some() => {
                tracing::warn!(provider = %kind, error = %e, "model listing failed");
                return RpcResponse::error(
                    id,
                    rpc::PROVIDER_UNAVAILABLE,
                    format!("Could not list models for '{kind}'"),
                );
            }
            Err(e) => {
                tracing::warn!(provider = %kind, error = %e, "model listing failed");
                Vec::new()
            }
        };
        providers.insert(kind.to_string(), serde_json::json!(models));
    }

    RpcResponse::success(id, serde_json::json!({ "providers": providers }))
}

// ── Settings handlers ──

fn is_known_prompt_type(prompt_type: &str) -> bool {
    prompt_type == GENERAL_PROMPT || prompt_type.parse::<ProviderKind>().is_ok()
}

fn settings_get_prompts(state: &Arc<HandlerState>, id: Option<serde_json::Value>) -> RpcResponse {
    match SettingsRepo::new(state.db.clone()).all_prompts() {
        Ok(prompts) => RpcResponse::success(id, serde_json::json!({ "prompts": prompts })),
        Err(e) => store_error(id, &e),
    }
}

fn settings_save_prompts(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let Some(prompts) = params.get("prompts").and_then(|p| p.as_object()) else {
        return RpcResponse::invalid_params(id, "Missing required parameter: prompts");
    };

    let mut validated = Vec::with_capacity(prompts.len());
    for (prompt_type, content) in prompts {
        if !is_known_prompt_type(prompt_type) {
            return RpcResponse::error(
                id,
                rpc::VALIDATION_ERROR,
                format!("unknown prompt type '{prompt_type}'"),
            );
        }
        let Some(content) = content.as_str() else {
            return RpcResponse::invalid_params(id, format!("prompt '{prompt_type}' must be a string"));
        };
        match validation::validate_system_prompt(content) {
            Ok(content) => validated.push((prompt_type.as_str(), content)),
            Err(e) => return RpcResponse::error(id, rpc::VALIDATION_ERROR, e.to_string()),
        }
    }

    let repo = SettingsRepo::new(state.db.clone());
    for (prompt_type, content) in &validated {
        if let Err(e) = repo.save_prompt(prompt_type, content) {
            return store_error(id, &e);
        }
    }
    RpcResponse::success(id, serde_json::json!({ "saved": validated.len() }))
}

fn profile_to_wire(profile: &UserProfile) -> serde_json::Value {
    serde_json::json!({
        "displayName": profile.display_name,
        "email": profile.email,
        "gender": profile.gender,
        "birthdate": profile.birthdate,
        "customInstructions": profile.custom_instructions,
    })
}

fn profile_get(state: &Arc<HandlerState>, id: Option<serde_json::Value>) -> RpcResponse {
    match SettingsRepo::new(state.db.clone()).user_profile() {
        Ok(profile) => RpcResponse::success(id, serde_json::json!({ "profile": profile_to_wire(&profile) })),
        Err(e) => store_error(id, &e),
    }
}

fn profile_save(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let fields = match params.get("profile") {
        Some(nested) => wire::normalize_params(nested),
        None => params.clone(),
    };
    let field = |key: &str| rpc::optional_str(&fields, key).unwrap_or_default().to_string();
    let submitted = UserProfile {
        display_name: field("display_name"),
        email: field("email"),
        gender: field("gender"),
        birthdate: field("birthdate"),
        custom_instructions: field("custom_instructions"),
    };

    let profile = match validation::validate_profile(&submitted) {
        Ok(profile) => profile,
        Err(e) => return RpcResponse::error(id, rpc::VALIDATION_ERROR, e.to_string()),
    };

    match SettingsRepo::new(state.db.clone()).save_profile(&profile) {
        Ok(()) => RpcResponse::success(
            id,
            serde_json::json!({ "saved": true, "profile": profile_to_wire(&profile) }),
        ),
        Err(e) => store_error(id, &e),
    }
}

// ── Telemetry handlers ──

fn metrics_dashboard(state: &Arc<HandlerState>, id: Option<serde_json::Value>) -> RpcResponse {
    match TelemetryRepo::new(state.db.clone()).dashboard() {
        Ok(stats) => {
            let live = state.metrics.as_ref().map(|m| m.summary());
            RpcResponse::success(id, wire::dashboard_to_wire(&stats, live.as_ref()))
        }
        Err(e) => store_error(id, &e),
    }
}

// ── System handlers ──

fn system_status(state: &Arc<HandlerState>, id: Option<serde_json::Value>) -> RpcResponse {
    RpcResponse::success(
        id,
        serde_json::json!({ "status": state.lifecycle_state().as_str() }),
    )
}

fn health(state: &Arc<HandlerState>, id: Option<serde_json::Value>) -> RpcResponse {
    let db_ok = SessionRepo::new(state.db.clone()).list_persistent(1).is_ok();
    let providers: Vec<&str> = state.providers.kinds().iter().map(|k| k.as_str()).collect();
    RpcResponse::success(
        id,
        serde_json::json!({
            "status": if db_ok { "healthy" } else { "degraded" },
            "state": state.lifecycle_state().as_str(),
            "database": db_ok,
            "providers": providers,
            "uptimeSecs": state.started_at.elapsed().as_secs(),
            "version": env!("CARGO_PKG_VERSION"),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::tests::MockOrchestrator;
    use parley_core::messages::{GenerationMetrics, Role};
    use parley_engine::ValidationError;
    use parley_llm::mock::MockProvider;
    use parley_store::GenerationRecord;

    fn setup() -> Arc<HandlerState> {
        let db = Database::in_memory().unwrap();
        let mut providers = ProviderRegistry::new();
        providers.register(Arc::new(
            MockProvider::new(ProviderKind::Ollama, vec![]).with_models(&["llama3", "qwen3"]),
        ));
        Arc::new(HandlerState::new(db, providers))
    }

    fn setup_with_orchestrator(orch: MockOrchestrator) -> (Arc<HandlerState>, Arc<MockOrchestrator>) {
        let orch = Arc::new(orch);
        let db = Database::in_memory().unwrap();
        let state = HandlerState::new(db, ProviderRegistry::new()).with_orchestrator(orch.clone());
        (Arc::new(state), orch)
    }

    async fn call(state: &Arc<HandlerState>, method: &str, params: serde_json::Value) -> RpcResponse {
        let client = ClientId::from_raw("client_a");
        dispatch(state, Some(&client), method, &params, Some(serde_json::json!(1))).await
    }

    fn seed_session(state: &Arc<HandlerState>, id: &str) -> SessionId {
        let sid = SessionId::from_raw(id);
        SessionRepo::new(state.db.clone()).create_or_touch(&sid, "Trip planning").unwrap();
        let turns = TurnRepo::new(state.db.clone());
        turns.append(&sid, Role::User, "Plan a trip", None).unwrap();
        turns
            .append(&sid, Role::Assistant, "Sure", Some(&GenerationMetrics::new(1, 2.0, 0.5)))
            .unwrap();
        sid
    }

    #[tokio::test]
    async fn unknown_method() {
        let state = setup();
        let resp = call(&state, "foo.bar", serde_json::json!({})).await;
        assert_eq!(resp.error_code(), Some("METHOD_NOT_FOUND"));
    }

    #[tokio::test]
    async fn chat_send_passes_normalized_params() {
        let (state, orch) = setup_with_orchestrator(MockOrchestrator::default());
        let resp = call(
            &state,
            "chat.send",
            serde_json::json!({"sessionId": "chat-9", "message": "Hi", "provider": "lmstudio", "model": "m"}),
        )
        .await;

        assert!(resp.success);
        let result = resp.result.unwrap();
        assert_eq!(result["acknowledged"], true);
        assert_eq!(result["sessionId"], "chat-9");

        let submitted = orch.submitted.lock().unwrap();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].client_id.as_str(), "client_a");
        assert_eq!(submitted[0].session_id, "chat-9");
        assert_eq!(submitted[0].provider, "lmstudio");
        assert_eq!(submitted[0].content, "Hi");
    }

    #[tokio::test]
    async fn chat_send_defaults_session_and_provider() {
        let (state, orch) = setup_with_orchestrator(MockOrchestrator::default());
        call(&state, "chat.send", serde_json::json!({"content": "Hi", "model": "m"})).await;

        let submitted = orch.submitted.lock().unwrap();
        assert_eq!(submitted[0].session_id, "default");
        assert_eq!(submitted[0].provider, "ollama");
    }

    #[tokio::test]
    async fn chat_send_maps_rejections_to_codes() {
        let cases = [
            (Rejection::RateLimited, "RATE_LIMITED"),
            (Rejection::Busy, "BUSY"),
            (Rejection::Invalid(ValidationError::EmptyMessage), "VALIDATION_ERROR"),
        ];
        for (rejection, code) in cases {
            let (state, _) = setup_with_orchestrator(MockOrchestrator::rejecting(rejection));
            let resp = call(&state, "chat.send", serde_json::json!({"message": "Hi"})).await;
            assert!(!resp.success);
            assert_eq!(resp.error_code(), Some(code));
        }
    }

    #[tokio::test]
    async fn chat_send_needs_a_client() {
        let (state, _) = setup_with_orchestrator(MockOrchestrator::default());
        let resp = dispatch(&state, None, "chat.send", &serde_json::json!({"message": "x"}), None).await;
        assert_eq!(resp.error_code(), Some("INVALID_PARAMS"));
    }

    #[tokio::test]
    async fn chat_without_orchestrator_is_internal_error() {
        let state = setup();
        let resp = call(&state, "chat.send", serde_json::json!({"message": "Hi"})).await;
        assert_eq!(resp.error_code(), Some("INTERNAL_ERROR"));
    }

    #[tokio::test]
    async fn chat_stop_reports_result() {
        let orch = MockOrchestrator {
            stop_result: false,
            ..Default::default()
        };
        let (state, _) = setup_with_orchestrator(orch);
        let resp = call(&state, "chat.stop", serde_json::json!({})).await;
        assert_eq!(resp.result.unwrap()["stopped"], false);
    }

    #[tokio::test]
    async fn system_status_reflects_lifecycle() {
        let orch = MockOrchestrator {
            state: LifecycleState::Speaking,
            ..Default::default()
        };
        let (state, _) = setup_with_orchestrator(orch);
        let resp = call(&state, "system.status", serde_json::json!({})).await;
        assert_eq!(resp.result.unwrap()["status"], "speaking");

        let resp = call(&setup(), "system.status", serde_json::json!({})).await;
        assert_eq!(resp.result.unwrap()["status"], "idle");
    }

    #[tokio::test]
    async fn session_list_shows_only_persistent_sessions() {
        let state = setup();
        seed_session(&state, "chat-1");
        SessionRepo::new(state.db.clone())
            .assign_title(&SessionId::from_raw("scratch"), "Scratch")
            .unwrap();

        let resp = call(&state, "session.list", serde_json::json!({"limit": 10})).await;
        let result = resp.result.unwrap();
        let sessions = result["sessions"].as_array().unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0]["sessionId"], "chat-1");
        assert_eq!(sessions[0]["title"], "Trip planning");
    }

    #[tokio::test]
    async fn session_history_returns_wire_rows() {
        let state = setup();
        seed_session(&state, "chat-1");

        let resp = call(&state, "session.history", serde_json::json!({"sessionId": "chat-1"})).await;
        let result = resp.result.unwrap();
        assert_eq!(result["title"], "Trip planning");
        let messages = result["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["isUser"], true);
        assert_eq!(messages[1]["metrics"]["tps"], 2.0);
    }

    #[tokio::test]
    async fn session_history_of_unknown_session_is_empty() {
        let state = setup();
        let resp = call(&state, "session.history", serde_json::json!({"session_id": "nope"})).await;
        let result = resp.result.unwrap();
        assert!(result["messages"].as_array().unwrap().is_empty());
        assert!(result["title"].is_null());
    }

    #[tokio::test]
    async fn session_ids_are_validated() {
        let state = setup();
        let resp = call(&state, "session.history", serde_json::json!({"session_id": "../x"})).await;
        assert_eq!(resp.error_code(), Some("INVALID_PARAMS"));
        let resp = call(&state, "session.delete", serde_json::json!({})).await;
        assert_eq!(resp.error_code(), Some("INVALID_PARAMS"));
    }

    #[tokio::test]
    async fn session_delete_removes_history() {
        let state = setup();
        let sid = seed_session(&state, "chat-1");

        let resp = call(&state, "session.delete", serde_json::json!({"session_id": "chat-1"})).await;
        assert_eq!(resp.result.unwrap()["deleted"], true);
        assert_eq!(TurnRepo::new(state.db.clone()).count(&sid).unwrap(), 0);

        let resp = call(&state, "session.delete", serde_json::json!({"session_id": "chat-1"})).await;
        assert_eq!(resp.error_code(), Some("NOT_FOUND"));
    }

    #[tokio::test]
    async fn models_list_for_all_and_one_provider() {
        let state = setup();
        let resp = call(&state, "models.list", serde_json::json!({})).await;
        let result = resp.result.unwrap();
        assert_eq!(result["providers"]["ollama"], serde_json::json!(["llama3", "qwen3"]));

        let resp = call(&state, "models.list", serde_json::json!({"provider": "lmstudio"})).await;
        assert_eq!(resp.error_code(), Some("PROVIDER_UNAVAILABLE"));

        let resp = call(&state, "models.list", serde_json::json!({"provider": "openai"})).await;
        assert_eq!(resp.error_code(), Some("VALIDATION_ERROR"));
    }

    #[tokio::test]
    async fn prompts_round_trip_through_rpc() {
        let state = setup();
        let resp = call(
            &state,
            "settings.savePrompts",
            serde_json::json!({"prompts": {"ollama": "  Be brief.  ", "general": "Be kind."}}),
        )
        .await;
        assert_eq!(resp.result.unwrap()["saved"], 2);

        let resp = call(&state, "settings.getPrompts", serde_json::json!({})).await;
        let result = resp.result.unwrap();
        assert_eq!(result["prompts"]["ollama"], "Be brief.");
        assert_eq!(result["prompts"]["general"], "Be kind.");
    }

    #[tokio::test]
    async fn prompts_are_validated_before_saving() {
        let state = setup();
        let resp = call(
            &state,
            "settings.savePrompts",
            serde_json::json!({"prompts": {"ollama": "ok", "openai": "nope"}}),
        )
        .await;
        assert_eq!(resp.error_code(), Some("VALIDATION_ERROR"));

        let long = "x".repeat(validation::MAX_PROMPT_CHARS + 1);
        let resp = call(&state, "settings.savePrompts", serde_json::json!({"prompts": {"general": long}})).await;
        assert_eq!(resp.error_code(), Some("VALIDATION_ERROR"));

        let resp = call(&state, "settings.savePrompts", serde_json::json!({})).await;
        assert_eq!(resp.error_code(), Some("INVALID_PARAMS"));
    }

    #[tokio::test]
    async fn profile_save_accepts_camel_case_and_nesting() {
        let state = setup();
        let resp = call(
            &state,
            "profile.save",
            serde_json::json!({"profile": {"displayName": " Ana ", "customInstructions": "Short answers"}}),
        )
        .await;
        assert!(resp.success);

        let resp = call(&state, "profile.get", serde_json::json!({})).await;
        let profile = &resp.result.unwrap()["profile"];
        assert_eq!(profile["displayName"], "Ana");
        assert_eq!(profile["customInstructions"], "Short answers");
        assert_eq!(profile["email"], "");
    }

    #[tokio::test]
    async fn profile_fields_are_length_checked() {
        let state = setup();
        let long = "x".repeat(validation::MAX_PROFILE_FIELD_CHARS + 1);
        let resp = call(&state, "profile.save", serde_json::json!({"email": long})).await;
        assert_eq!(resp.error_code(), Some("VALIDATION_ERROR"));
    }

    #[tokio::test]
    async fn dashboard_reports_recorded_generations() {
        let db = Database::in_memory().unwrap();
        let metrics = Arc::new(MetricsRecorder::new());
        metrics.counter_inc("generations_total", &[("status", "success")], 1);
        let state = Arc::new(HandlerState::new(db, ProviderRegistry::new()).with_metrics(metrics));

        TelemetryRepo::new(state.db.clone())
            .record(&GenerationRecord {
                session_id: SessionId::from_raw("chat-1"),
                provider: "ollama".into(),
                model: "llama3".into(),
                input_tokens: 10,
                output_tokens: 20,
                latency_secs: 1.5,
                status: "success".into(),
            })
            .unwrap();

        let resp = call(&state, "metrics.dashboard", serde_json::json!({})).await;
        let result = resp.result.unwrap();
        assert_eq!(result["totalGenerations"], 1);
        assert_eq!(result["byProvider"]["ollama"], 1);
        assert_eq!(result["live"]["counters"]["generations_total{status=success}"], 1);
    }

    #[tokio::test]
    async fn health_reports_healthy() {
        let state = setup();
        let resp = dispatch(&state, None, "health", &serde_json::json!({}), None).await;
        let result = resp.result.unwrap();
        assert_eq!(result["status"], "healthy");
        assert_eq!(result["database"], true);
        assert_eq!(result["providers"], serde_json::json!(["ollama"]));
    }
}
