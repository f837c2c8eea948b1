use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::broadcast;
use tracing::Level;

use parley_core::events::ChatEvent;
use parley_engine::speech::{spawn_audio_pruner, AUDIO_MAX_AGE, PRUNE_INTERVAL};
use parley_engine::validation::validate_base_url;
use parley_engine::{EngineError, GenerationRunner, Lifecycle, PiperSynthesizer, RateLimiter, RunnerConfig};
use parley_llm::{ProviderConfig, ProviderRegistry};
use parley_server::event_bridge::forward_status_changes;
use parley_server::{EngineOrchestrator, HandlerState, ServerConfig};
use parley_store::Database;
use parley_telemetry::{default_data_dir, init_telemetry, TelemetryConfig};

/// Streaming chat orchestrator for local model servers.
#[derive(Parser, Debug)]
#[command(name = "parley", version)]
struct Cli {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(long, default_value_t = 5678)]
    port: u16,

    /// Defaults to ~/.parley
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[arg(long, default_value = "info")]
    log_level: Level,

    #[arg(long, default_value = "http://localhost:11434")]
    ollama_url: String,

    #[arg(long, default_value = "http://localhost:1234")]
    lmstudio_url: String,

    #[arg(long, default_value_t = 300)]
    stream_timeout_secs: u64,

    /// Directory holding the piper executable and a *.onnx voice. Speech is off when unset.
    #[arg(long)]
    piper_dir: Option<PathBuf>,

    /// Keep warnings out of logs.db.
    #[arg(long)]
    no_sqlite_logs: bool,
}

impl Cli {
    fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }

    fn telemetry_config(&self) -> TelemetryConfig {
        TelemetryConfig {
            log_level: self.log_level,
            log_to_sqlite: !self.no_sqlite_logs,
            log_db_path: self.data_dir().join("logs.db"),
            ..Default::default()
        }
    }

    fn provider_config(&self) -> Result<ProviderConfig, EngineError> {
        Ok(ProviderConfig {
            ollama_url: validate_base_url(&self.ollama_url)?,
            lmstudio_url: validate_base_url(&self.lmstudio_url)?,
        })
    }

    fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            stream_timeout: Duration::from_secs(self.stream_timeout_secs),
            ..Default::default()
        }
    }

    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.host.clone(),
            port: self.port,
            audio_dir: self.piper_dir.as_ref().map(|_| self.data_dir().join("audio")),
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let data_dir = cli.data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

    let telemetry = init_telemetry(cli.telemetry_config());
    tracing::info!(data_dir = %data_dir.display(), "starting parley");

    let db_path = data_dir.join("parley.db");
    let db = Database::open(&db_path).context("failed to open database")?;
    tracing::info!(path = %db_path.display(), "database opened");

    let providers = ProviderRegistry::from_config(&cli.provider_config()?)?;
    let lifecycle = Arc::new(Lifecycle::new());
    let (event_tx, _) = broadcast::channel::<ChatEvent>(1024);
    forward_status_changes(&lifecycle, event_tx.clone());

    let server_config = cli.server_config();
    let mut runner = GenerationRunner::new(db.clone(), providers.clone(), lifecycle.clone(), event_tx.clone())
        .with_config(cli.runner_config())
        .with_metrics(telemetry.metrics());

    let mut pruner = None;
    if let (Some(piper_dir), Some(audio_dir)) = (&cli.piper_dir, &server_config.audio_dir) {
        match PiperSynthesizer::new(piper_dir, audio_dir) {
            Ok(synth) => {
                tracing::info!(piper_dir = %piper_dir.display(), "speech enabled");
                runner = runner.with_speech(Arc::new(synth));
                pruner = Some(spawn_audio_pruner(audio_dir.clone(), PRUNE_INTERVAL, AUDIO_MAX_AGE));
            }
            Err(e) => tracing::warn!(error = %e, "speech disabled"),
        }
    }

    let orchestrator = EngineOrchestrator::new(
        Arc::new(runner),
        RateLimiter::default(),
        lifecycle,
        event_tx.clone(),
    );
    let handler_state = HandlerState::new(db, providers)
        .with_orchestrator(Arc::new(orchestrator))
        .with_metrics(telemetry.metrics());

    let handle = parley_server::start(server_config, handler_state, event_tx)
        .await
        .context("failed to start server")?;
    tracing::info!(addr = %handle.addr, "parley ready");

    tokio::select! {
        _ = handle.wait() => {}
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for ctrl+c")?;
            tracing::info!("shutting down");
        }
    }

    if let Some(pruner) = pruner {
        pruner.abort();
    }
    Ok(())
}
