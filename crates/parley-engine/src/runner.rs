use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use parley_core::events::ChatEvent;
use parley_core::ids::{ClientId, GenerationId, SessionId};
use parley_core::messages::{ChatMessage, GenerationMetrics, Role};
use parley_core::provider::{LlmProvider, ProviderKind, StreamOptions};
use parley_core::state::LifecycleState;
use parley_core::stream::StreamEvent;
use parley_llm::ProviderRegistry;
use parley_store::{Database, GenerationRecord, SessionRepo, SettingsRepo, TelemetryRepo, TurnRepo};
use parley_telemetry::metrics::{GENERATIONS_TOTAL, GENERATION_DURATION_SECONDS, GENERATION_TOKENS_PER_SECOND};
use parley_telemetry::MetricsRecorder;

use crate::assembler::{estimate_input_tokens, ContextAssembler};
use crate::error::EngineError;
use crate::lifecycle::Lifecycle;
use crate::persistence::{PersistenceDecision, SessionPolicy};
use crate::reasoning::ReasoningFilter;
use crate::speech::SpeechSynthesizer;
use crate::title::TitleGenerator;
use crate::validation::sanitize_for_log;

#[derive(Clone, Debug)]
pub struct RunnerConfig {
    /// Deadline for the whole stream, from dispatch to the last delta.
    pub stream_timeout: Duration,
    pub speech_timeout: Duration,
    pub stream_options: StreamOptions,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            stream_timeout: Duration::from_secs(300),
            speech_timeout: Duration::from_secs(120),
            stream_options: StreamOptions::default(),
        }
    }
}

/// One admitted user message.
#[derive(Clone, Debug)]
pub struct GenerationRequest {
    pub generation_id: GenerationId,
    pub client_id: ClientId,
    pub session_id: SessionId,
    /// Already validated and trimmed.
    pub content: String,
    pub provider: ProviderKind,
    pub model: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GenerationOutcome {
    pub text: String,
    pub metrics: GenerationMetrics,
    pub audio_file: Option<String>,
}

/// Visible text gathered from the stream so far.
#[derive(Default)]
struct VisibleText {
    text: String,
    tokens: u32,
    first_visible: Option<Instant>,
}

impl VisibleText {
    fn push(&mut self, delta: &str) -> bool {
        if delta.is_empty() {
            return false;
        }
        self.first_visible.get_or_insert_with(Instant::now);
        self.text.push_str(delta);
        self.tokens += 1;
        true
    }

    fn metrics(&self, cycle_start: Instant) -> GenerationMetrics {
        let now = Instant::now();
        let tps = match self.first_visible {
            Some(first) => {
                let secs = now.duration_since(first).as_secs_f64();
                if secs > 0.0 {
                    f64::from(self.tokens) / secs
                } else {
                    0.0
                }
            }
            None => 0.0,
        };
        GenerationMetrics::new(self.tokens, tps, now.duration_since(cycle_start).as_secs_f64())
    }
}

/// Runs one generation cycle: record the user turn, assemble the prompt,
/// stream the reply, persist it and optionally speak it.
///
/// Admission, the generation slot and error reporting belong to the caller.
pub struct GenerationRunner {
    db: Database,
    turns: TurnRepo,
    sessions: SessionRepo,
    settings: SettingsRepo,
    providers: ProviderRegistry,
    lifecycle: Arc<Lifecycle>,
    event_tx: broadcast::Sender<ChatEvent>,
    policy: SessionPolicy,
    titles: TitleGenerator,
    assembler: ContextAssembler,
    speech: Option<Arc<dyn SpeechSynthesizer>>,
    metrics: Option<Arc<MetricsRecorder>>,
    config: RunnerConfig,
}

impl GenerationRunner {
    pub fn new(
        db: Database,
        providers: ProviderRegistry,
        lifecycle: Arc<Lifecycle>,
        event_tx: broadcast::Sender<ChatEvent>,
    ) -> Self {
        Self {
            turns: TurnRepo::new(db.clone()),
            sessions: SessionRepo::new(db.clone()),
            settings: SettingsRepo::new(db.clone()),
            db,
            providers,
            lifecycle,
            event_tx,
            policy: SessionPolicy::default(),
            titles: TitleGenerator::default(),
            assembler: ContextAssembler::default(),
            speech: None,
            metrics: None,
            config: RunnerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_policy(mut self, policy: SessionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_titles(mut self, titles: TitleGenerator) -> Self {
        self.titles = titles;
        self
    }

    pub fn with_assembler(mut self, assembler: ContextAssembler) -> Self {
        self.assembler = assembler;
        self
    }

    pub fn with_speech(mut self, speech: Arc<dyn SpeechSynthesizer>) -> Self {
        self.speech = Some(speech);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    fn send_event(&self, event: ChatEvent) {
        if self.event_tx.send(event).is_err() {
            warn!("no event receivers, chat event dropped");
        }
    }

    #[instrument(skip_all, fields(
        session_id = %req.session_id,
        client_id = %req.client_id,
        generation_id = %req.generation_id,
        provider = %req.provider,
        model = %req.model
    ))]
    pub async fn run(
        &self,
        req: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<GenerationOutcome, EngineError> {
        let result = self.run_cycle(req, cancel).await;
        self.observe(req, &result);
        result
    }

    async fn run_cycle(
        &self,
        req: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<GenerationOutcome, EngineError> {
        let cycle_start = Instant::now();
        debug!(content = %sanitize_for_log(&req.content), "generation started");

        self.record_user_turn(req)?;
        let recent = self.turns.recent(&req.session_id, self.assembler.context_limit())?;

        if recent.len() == 1 && !self.policy.is_greeting(&req.content) {
            let title = self.titles.generate(&req.content);
            self.sessions.assign_title(&req.session_id, &title)?;
            self.send_event(ChatEvent::TitleAssigned {
                client_id: req.client_id.clone(),
                session_id: req.session_id.clone(),
                title,
            });
        }

        let base_prompt = self.settings.system_prompt(req.provider)?;
        let profile = self.settings.user_profile()?;
        let system_prompt = self.assembler.compose_system_prompt(&base_prompt, &profile);
        let messages = self.assembler.assemble(&system_prompt, &recent);

        let provider = self
            .providers
            .get(req.provider)
            .ok_or_else(|| EngineError::ProviderUnavailable(req.provider.to_string()))?;

        let visible = self.stream_reply(provider.as_ref(), req, &messages, cancel).await?;
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let metrics = visible.metrics(cycle_start);
        let text = visible.text;
        self.turns
            .append(&req.session_id, Role::Assistant, &text, Some(&metrics))?;
        self.send_event(ChatEvent::GenerationComplete {
            client_id: req.client_id.clone(),
            session_id: req.session_id.clone(),
            text: text.clone(),
            metrics,
        });
        info!(
            tokens = metrics.tokens,
            tps = metrics.tokens_per_second,
            duration_secs = metrics.duration_secs,
            "generation complete"
        );

        self.record_telemetry(GenerationRecord {
            session_id: req.session_id.clone(),
            provider: req.provider.to_string(),
            model: req.model.clone(),
            input_tokens: estimate_input_tokens(&messages),
            output_tokens: u64::from(metrics.tokens),
            latency_secs: metrics.duration_secs,
            status: "success".into(),
        });

        let audio_file = match &self.speech {
            Some(speech) if !text.trim().is_empty() => self.speak(speech.clone(), req, &text, cancel).await?,
            _ => None,
        };

        Ok(GenerationOutcome {
            text,
            metrics,
            audio_file,
        })
    }

    fn record_user_turn(&self, req: &GenerationRequest) -> Result<(), EngineError> {
        let persisted = self.sessions.exists(&req.session_id)?;
        self.turns.append(&req.session_id, Role::User, &req.content, None)?;

        match self.policy.decide(&req.content, persisted) {
            PersistenceDecision::Ignore => {}
            PersistenceDecision::Touch => self.sessions.touch(&req.session_id)?,
            PersistenceDecision::Create { title } => {
                info!(title = %title, "session qualified for the history list");
                self.sessions.create_or_touch(&req.session_id, &title)?;
            }
        }
        Ok(())
    }

    /// Consume the provider stream under the whole-stream deadline, emitting
    /// each visible delta as a chunk.
    async fn stream_reply(
        &self,
        provider: &dyn LlmProvider,
        req: &GenerationRequest,
        messages: &[ChatMessage],
        cancel: &CancellationToken,
    ) -> Result<VisibleText, EngineError> {
        let timeout = self.config.stream_timeout;
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            _ = &mut deadline => return Err(EngineError::StreamTimeout(timeout)),
            opened = provider.stream(&req.model, messages, &self.config.stream_options) => opened?,
        };

        let mut filter = ReasoningFilter::new();
        let mut visible = VisibleText::default();

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                _ = &mut deadline => {
                    warn!(timeout_secs = timeout.as_secs(), partial_chars = visible.text.len(), "stream timed out");
                    return Err(EngineError::StreamTimeout(timeout));
                }
                event = stream.next() => event,
            };

            match event {
                Some(StreamEvent::TextDelta { delta }) => {
                    let shown = filter.push(&delta);
                    self.emit_chunk(req, &mut visible, shown);
                }
                Some(StreamEvent::Start) | Some(StreamEvent::ThinkingDelta { .. }) => {}
                Some(StreamEvent::Done { .. }) | None => break,
                Some(StreamEvent::Error { error }) => return Err(error.into()),
            }
        }

        let tail = filter.finish();
        self.emit_chunk(req, &mut visible, tail);
        Ok(visible)
    }

    fn emit_chunk(&self, req: &GenerationRequest, visible: &mut VisibleText, delta: String) {
        if visible.push(&delta) {
            self.send_event(ChatEvent::Chunk {
                client_id: req.client_id.clone(),
                session_id: req.session_id.clone(),
                delta,
            });
        }
    }

    fn record_telemetry(&self, record: GenerationRecord) {
        let repo = TelemetryRepo::new(self.db.clone());
        tokio::task::spawn_blocking(move || {
            if let Err(e) = repo.record(&record) {
                warn!(error = %e, session_id = %record.session_id, "failed to record generation telemetry");
            }
        });
    }

    /// Synthesize speech in its own task. Failures and timeouts only cost
    /// the audio; cancellation still ends the cycle.
    async fn speak(
        &self,
        speech: Arc<dyn SpeechSynthesizer>,
        req: &GenerationRequest,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, EngineError> {
        self.lifecycle.change_to(LifecycleState::Speaking);

        let owned = text.to_string();
        let mut task = tokio::spawn(async move { speech.synthesize(&owned).await });
        let limit = self.config.speech_timeout;

        let joined = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                task.abort();
                return Err(EngineError::Cancelled);
            }
            joined = tokio::time::timeout(limit, &mut task) => joined,
        };

        let file = match joined {
            Ok(Ok(Ok(file))) => file,
            Ok(Ok(Err(e))) => {
                warn!(error = %e, "speech synthesis failed");
                None
            }
            Ok(Err(e)) => {
                warn!(error = %e, "speech task failed");
                None
            }
            Err(_) => {
                task.abort();
                warn!(timeout_secs = limit.as_secs(), "speech synthesis timed out");
                None
            }
        };

        if let Some(file) = &file {
            self.send_event(ChatEvent::AudioReady {
                client_id: req.client_id.clone(),
                session_id: req.session_id.clone(),
                file: file.clone(),
            });
        }
        Ok(file)
    }

    fn observe(&self, req: &GenerationRequest, result: &Result<GenerationOutcome, EngineError>) {
        let Some(metrics) = &self.metrics else { return };
        let status = match result {
            Ok(_) => "success",
            Err(EngineError::Cancelled) => "cancelled",
            Err(EngineError::StreamTimeout(_)) => "timeout",
            Err(_) => "error",
        };
        let provider = req.provider.as_str();
        metrics.counter_inc(GENERATIONS_TOTAL, &[("provider", provider), ("status", status)], 1);
        if let Ok(outcome) = result {
            let labels = [("provider", provider)];
            metrics.histogram_observe(GENERATION_DURATION_SECONDS, &labels, outcome.metrics.duration_secs);
            metrics.histogram_observe(GENERATION_TOKENS_PER_SECOND, &labels, outcome.metrics.tokens_per_second);
        }
    }
}
