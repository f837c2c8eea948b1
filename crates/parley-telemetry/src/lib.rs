mod logging;
pub mod metrics;

pub use logging::{LogEntry, LogFilter, SqliteLogLayer, SqliteLogSink};
pub use metrics::{HistogramSummary, MetricsRecorder, MetricsSummary};

use std::path::PathBuf;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. `RUST_LOG` takes precedence when set.
    pub log_level: Level,
    /// Per-module overrides, e.g. `("parley_llm", DEBUG)`.
    pub module_levels: Vec<(String, Level)>,
    /// Persist WARN+ events to `log_db_path`.
    pub log_to_sqlite: bool,
    pub log_db_path: PathBuf,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            log_to_sqlite: true,
            log_db_path: default_data_dir().join("logs.db"),
        }
    }
}

/// Keeps the log sink and the metrics recorder alive for the process.
pub struct TelemetryGuard {
    log_sink: Option<Arc<SqliteLogSink>>,
    metrics: Arc<MetricsRecorder>,
}

impl TelemetryGuard {
    pub fn metrics(&self) -> Arc<MetricsRecorder> {
        self.metrics.clone()
    }

    pub fn logs(&self) -> Option<&SqliteLogSink> {
        self.log_sink.as_deref()
    }
}

fn filter_directive(config: &TelemetryConfig) -> String {
    let mut directive = config.log_level.to_string().to_lowercase();
    for (module, level) in &config.module_levels {
        directive.push_str(&format!(",{module}={}", level.to_string().to_lowercase()));
    }
    directive
}

/// Install the global subscriber. Call once at startup.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_directive(&config)));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_target(true)
        .with_span_list(true)
        .with_filter(env_filter);

    let log_sink = if config.log_to_sqlite {
        match SqliteLogSink::open(&config.log_db_path) {
            Ok(sink) => Some(Arc::new(sink)),
            Err(e) => {
                eprintln!("parley-telemetry: failed to open log database: {e}");
                None
            }
        }
    } else {
        None
    };
    let sqlite_layer = log_sink.clone().map(SqliteLogLayer::new);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(sqlite_layer)
        .init();

    TelemetryGuard {
        log_sink,
        metrics: Arc::new(MetricsRecorder::new()),
    }
}

/// `~/.parley`, or `/tmp/.parley` when no home directory is known.
pub fn default_data_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".parley")
}
