//! Chat orchestrator: connects the generation runner to the server.
//!
//! `ChatOrchestrator` is what RPC handlers talk to. `EngineOrchestrator`
//! owns admission (rate limit, busy check, validation), the single
//! generation slot, and stop handling, and spawns one `GenerationRunner`
//! cycle per accepted message.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use parley_core::events::ChatEvent;
use parley_core::ids::{ClientId, GenerationId, SessionId};
use parley_core::state::LifecycleState;
use parley_engine::validation::{self, ValidationError};
use parley_engine::{EngineError, GenerationRequest, GenerationRunner, Lifecycle, RateLimiter};

/// A raw `chat.send` request, before validation.
#[derive(Debug, Clone)]
pub struct SubmitParams {
    pub client_id: ClientId,
    pub session_id: String,
    pub content: String,
    pub provider: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub generation_id: GenerationId,
    pub session_id: SessionId,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("rate limit exceeded, wait a moment before sending again")]
    RateLimited,
    #[error("a response is already being generated")]
    Busy,
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

#[async_trait]
pub trait ChatOrchestrator: Send + Sync {
    async fn submit(&self, params: SubmitParams) -> Result<Accepted, Rejection>;
    /// Cancel the live generation, if any. Idempotent.
    async fn stop(&self, client_id: &ClientId) -> bool;
    fn state(&self) -> LifecycleState;
    /// Forget a disconnected client's rate budget.
    fn release_client(&self, client_id: &ClientId);
}

struct ActiveGeneration {
    id: GenerationId,
    session_id: SessionId,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

type Slot = Arc<Mutex<Option<ActiveGeneration>>>;

/// Restores `Idle` and frees the slot when a cycle ends, however it ends.
struct CycleGuard {
    id: GenerationId,
    slot: Slot,
    lifecycle: Arc<Lifecycle>,
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        {
            let mut slot = self.slot.lock();
            if slot.as_ref().is_some_and(|active| active.id == self.id) {
                *slot = None;
            }
        }
        self.lifecycle.change_to(LifecycleState::Idle);
    }
}

pub struct EngineOrchestrator {
    runner: Arc<GenerationRunner>,
    limiter: RateLimiter,
    lifecycle: Arc<Lifecycle>,
    event_tx: broadcast::Sender<ChatEvent>,
    slot: Slot,
}

impl EngineOrchestrator {
    pub fn new(
        runner: Arc<GenerationRunner>,
        limiter: RateLimiter,
        lifecycle: Arc<Lifecycle>,
        event_tx: broadcast::Sender<ChatEvent>,
    ) -> Self {
        Self {
            runner,
            limiter,
            lifecycle,
            event_tx,
            slot: Arc::new(Mutex::new(None)),
        }
    }

    pub fn runner(&self) -> &Arc<GenerationRunner> {
        &self.runner
    }

    pub fn has_active_generation(&self) -> bool {
        self.slot.lock().is_some()
    }

    fn send_event(&self, event: ChatEvent) {
        if self.event_tx.send(event).is_err() {
            warn!("no event receivers, chat event dropped");
        }
    }

    fn reject(&self, client_id: &ClientId, rejection: Rejection) -> Rejection {
        self.send_event(ChatEvent::Error {
            client_id: client_id.clone(),
            session_id: None,
            message: rejection.to_string(),
        });
        rejection
    }

    fn validate(params: &SubmitParams) -> Result<GenerationRequest, ValidationError> {
        let content = validation::validate_message(&params.content)?;
        validation::validate_session_id(&params.session_id)?;
        let provider = validation::validate_provider(&params.provider)?;
        validation::validate_model(&params.model)?;
        Ok(GenerationRequest {
            generation_id: GenerationId::new(),
            client_id: params.client_id.clone(),
            session_id: SessionId::from_raw(&params.session_id),
            content,
            provider,
            model: params.model.trim().to_string(),
        })
    }

    fn spawn_cycle(&self, request: GenerationRequest) {
        let cancel = CancellationToken::new();
        let runner = Arc::clone(&self.runner);
        let lifecycle = Arc::clone(&self.lifecycle);
        let event_tx = self.event_tx.clone();
        let guard = CycleGuard {
            id: request.generation_id.clone(),
            slot: Arc::clone(&self.slot),
            lifecycle: Arc::clone(&self.lifecycle),
        };

        // Filled before the cycle can reach its guard.
        let mut slot = self.slot.lock();
        let task_cancel = cancel.clone();
        let task_request = request.clone();
        let task = tokio::spawn(async move {
            let _guard = guard;
            match runner.run(&task_request, &task_cancel).await {
                Ok(_) | Err(EngineError::Cancelled) => {}
                Err(e) => {
                    warn!(
                        session_id = %task_request.session_id,
                        client_id = %task_request.client_id,
                        error = %e,
                        kind = e.error_kind(),
                        "generation failed"
                    );
                    lifecycle.change_to(LifecycleState::Error);
                    let event = ChatEvent::Error {
                        client_id: task_request.client_id.clone(),
                        session_id: Some(task_request.session_id.clone()),
                        message: e.client_message(),
                    };
                    if event_tx.send(event).is_err() {
                        warn!("no event receivers, chat event dropped");
                    }
                }
            }
        });
        *slot = Some(ActiveGeneration {
            id: request.generation_id,
            session_id: request.session_id,
            cancel,
            task,
        });
    }
}

#[async_trait]
impl ChatOrchestrator for EngineOrchestrator {
    async fn submit(&self, params: SubmitParams) -> Result<Accepted, Rejection> {
        if !self.limiter.allow(&params.client_id) {
            return Err(self.reject(&params.client_id, Rejection::RateLimited));
        }

        if !self.lifecycle.is_idle() {
            return Err(Rejection::Busy);
        }

        let request = match Self::validate(&params) {
            Ok(request) => request,
            Err(e) => return Err(self.reject(&params.client_id, Rejection::Invalid(e))),
        };

        if !self
            .lifecycle
            .try_transition(LifecycleState::Idle, LifecycleState::Processing)
        {
            return Err(Rejection::Busy);
        }

        info!(
            session_id = %request.session_id,
            client_id = %request.client_id,
            generation_id = %request.generation_id,
            provider = %request.provider,
            preview = %validation::sanitize_for_log(&request.content),
            "generation accepted"
        );

        let accepted = Accepted {
            generation_id: request.generation_id.clone(),
            session_id: request.session_id.clone(),
        };
        self.spawn_cycle(request);
        Ok(accepted)
    }

    async fn stop(&self, client_id: &ClientId) -> bool {
        let active = self.slot.lock().take();
        let Some(active) = active else {
            return false;
        };

        active.cancel.cancel();
        // Idle is restored by the cycle's guard; a newer cycle may own the lifecycle by now.
        if let Err(e) = active.task.await {
            if e.is_panic() {
                warn!(generation_id = %active.id, "generation task panicked");
            }
        }

        info!(generation_id = %active.id, client_id = %client_id, "generation stopped");
        self.send_event(ChatEvent::GenerationStopped {
            client_id: client_id.clone(),
            session_id: Some(active.session_id),
        });
        true
    }

    fn state(&self) -> LifecycleState {
        self.lifecycle.current()
    }

    fn release_client(&self, client_id: &ClientId) {
        self.limiter.clear(client_id);
    }
}
