use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::instrument;

use parley_core::ids::SessionId;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// One finished generation, recorded for the usage dashboard.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenerationRecord {
    pub session_id: SessionId,
    pub provider: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub latency_secs: f64,
    pub status: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub total_generations: u64,
    pub successful_generations: u64,
    pub avg_latency_secs: f64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub by_provider: BTreeMap<String, u64>,
}

#[derive(Clone)]
pub struct TelemetryRepo {
    db: Database,
}

impl TelemetryRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, record), fields(session_id = %record.session_id, provider = %record.provider))]
    pub fn record(&self, record: &GenerationRecord) -> Result<(), StoreError> {
        let now = row_helpers::now_timestamp();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO generation_metrics
                    (session_id, provider, model, input_tokens, output_tokens, latency_secs, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    record.session_id.as_str(),
                    record.provider,
                    record.model,
                    record.input_tokens as i64,
                    record.output_tokens as i64,
                    record.latency_secs,
                    record.status,
                    now,
                ],
            )?;
            Ok(())
        })
    }

    pub fn dashboard(&self) -> Result<DashboardStats, StoreError> {
        self.db.with_conn(|conn| {
            let mut stats = conn.query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(CASE WHEN status = 'success' THEN 1 ELSE 0 END), 0),
                        COALESCE(AVG(latency_secs), 0.0),
                        COALESCE(SUM(input_tokens), 0),
                        COALESCE(SUM(output_tokens), 0)
                 FROM generation_metrics",
                [],
                |row| {
                    Ok(DashboardStats {
                        total_generations: row.get::<_, i64>(0)? as u64,
                        successful_generations: row.get::<_, i64>(1)? as u64,
                        avg_latency_secs: row.get(2)?,
                        total_input_tokens: row.get::<_, i64>(3)? as u64,
                        total_output_tokens: row.get::<_, i64>(4)? as u64,
                        by_provider: BTreeMap::new(),
                    })
                },
            )?;

            let mut stmt =
                conn.prepare("SELECT provider, COUNT(*) FROM generation_metrics GROUP BY provider")?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let provider: String = row_helpers::get(row, 0, "generation_metrics", "provider")?;
                let count: i64 = row_helpers::get(row, 1, "generation_metrics", "provider")?;
                stats.by_provider.insert(provider, count as u64);
            }
            Ok(stats)
        })
    }
}
