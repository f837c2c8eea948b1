use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::field::{Field, Visit};
use tracing::span;
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

const LOG_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT NOT NULL,
        level TEXT NOT NULL,
        target TEXT NOT NULL,
        message TEXT NOT NULL,
        fields TEXT,
        session_id TEXT,
        client_id TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_logs_session ON logs(session_id);
    CREATE INDEX IF NOT EXISTS idx_logs_timestamp ON logs(timestamp);
";

/// A persisted warning or error.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: i64,
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
    pub fields: Option<String>,
    pub session_id: Option<String>,
    pub client_id: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LogFilter {
    pub level: Option<String>,
    pub session_id: Option<String>,
    pub limit: Option<u32>,
}

/// SQLite table of WARN+ log lines, for looking back at failed generations.
pub struct SqliteLogSink {
    conn: Mutex<Connection>,
}

impl SqliteLogSink {
    pub fn open(db_path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self, rusqlite::Error> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, rusqlite::Error> {
        conn.execute_batch(LOG_SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn write(&self, line: &PendingLine) {
        let _ = self.conn.lock().execute(
            "INSERT INTO logs (timestamp, level, target, message, fields, session_id, client_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                line.timestamp,
                line.level,
                line.target,
                line.message,
                line.fields,
                line.session_id,
                line.client_id,
            ],
        );
    }

    /// Newest first.
    pub fn recent(&self, filter: &LogFilter) -> Result<Vec<LogEntry>, rusqlite::Error> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, level, target, message, fields, session_id, client_id
             FROM logs
             WHERE (?1 IS NULL OR level = ?1) AND (?2 IS NULL OR session_id = ?2)
             ORDER BY id DESC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![filter.level, filter.session_id, filter.limit.unwrap_or(100)],
            |row| {
                Ok(LogEntry {
                    id: row.get(0)?,
                    timestamp: row.get(1)?,
                    level: row.get(2)?,
                    target: row.get(3)?,
                    message: row.get(4)?,
                    fields: row.get(5)?,
                    session_id: row.get(6)?,
                    client_id: row.get(7)?,
                })
            },
        )?;
        rows.collect()
    }

    pub fn count(&self) -> Result<i64, rusqlite::Error> {
        self.conn.lock().query_row("SELECT COUNT(*) FROM logs", [], |row| row.get(0))
    }
}

struct PendingLine {
    timestamp: String,
    level: String,
    target: String,
    message: String,
    fields: Option<String>,
    session_id: Option<String>,
    client_id: Option<String>,
}

/// tracing layer that forwards WARN and ERROR events to a [`SqliteLogSink`].
pub struct SqliteLogLayer {
    sink: Arc<SqliteLogSink>,
}

impl SqliteLogLayer {
    pub fn new(sink: Arc<SqliteLogSink>) -> Self {
        Self { sink }
    }
}

#[derive(Default)]
struct FieldCollector {
    message: Option<String>,
    fields: serde_json::Map<String, serde_json::Value>,
    ids: Correlation,
}

/// Ids lifted out of events and spans into their own columns.
#[derive(Clone, Default)]
struct Correlation {
    session_id: Option<String>,
    client_id: Option<String>,
}

impl Correlation {
    fn is_complete(&self) -> bool {
        self.session_id.is_some() && self.client_id.is_some()
    }

    fn fill_from(&mut self, other: &Correlation) {
        if self.session_id.is_none() {
            self.session_id.clone_from(&other.session_id);
        }
        if self.client_id.is_none() {
            self.client_id.clone_from(&other.client_id);
        }
    }
}

impl FieldCollector {
    fn put(&mut self, name: &str, value: serde_json::Value) {
        self.fields.insert(name.to_string(), value);
    }

    fn put_text(&mut self, name: &str, text: String) {
        match name {
            "message" => self.message = Some(text),
            "session_id" => self.ids.session_id = Some(text),
            "client_id" => self.ids.client_id = Some(text),
            other => self.put(other, serde_json::Value::String(text)),
        }
    }
}

impl Visit for FieldCollector {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let text = format!("{value:?}");
        let text = if field.name() == "message" {
            text
        } else {
            text.trim_matches('"').to_string()
        };
        self.put_text(field.name(), text);
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put_text(field.name(), value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field.name(), value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field.name(), value.into());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if let Some(n) = serde_json::Number::from_f64(value) {
            self.put(field.name(), serde_json::Value::Number(n));
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field.name(), value.into());
    }
}

impl<S> Layer<S> for SqliteLogLayer
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > tracing::Level::WARN {
            return;
        }

        let mut collector = FieldCollector::default();
        event.record(&mut collector);

        if !collector.ids.is_complete() {
            if let Some(scope) = ctx.event_scope(event) {
                for span in scope {
                    if let Some(ids) = span.extensions().get::<Correlation>() {
                        collector.ids.fill_from(ids);
                    }
                }
            }
        }

        let fields = (!collector.fields.is_empty())
            .then(|| serde_json::to_string(&collector.fields).unwrap_or_default());

        self.sink.write(&PendingLine {
            timestamp: Utc::now().to_rfc3339(),
            level: level.to_string(),
            target: event.metadata().target().to_string(),
            message: collector.message.unwrap_or_default(),
            fields,
            session_id: collector.ids.session_id,
            client_id: collector.ids.client_id,
        });
    }

    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut collector = FieldCollector::default();
        attrs.record(&mut collector);

        if collector.ids.session_id.is_some() || collector.ids.client_id.is_some() {
            if let Some(span) = ctx.span(id) {
                span.extensions_mut().insert(collector.ids);
            }
        }
    }
}
