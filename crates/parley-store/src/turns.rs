use serde::{Deserialize, Serialize};
use tracing::instrument;

use parley_core::ids::SessionId;
use parley_core::messages::{GenerationMetrics, Role};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// One immutable entry in a conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TurnRow {
    pub id: i64,
    pub session_id: SessionId,
    pub role: Role,
    pub content: String,
    pub metadata: Option<GenerationMetrics>,
    pub created_at: String,
}

#[derive(Clone)]
pub struct TurnRepo {
    db: Database,
}

impl TurnRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append a turn. Turns are never updated afterwards.
    #[instrument(skip(self, content, metadata), fields(session_id = %session_id, role = %role))]
    pub fn append(
        &self,
        session_id: &SessionId,
        role: Role,
        content: &str,
        metadata: Option<&GenerationMetrics>,
    ) -> Result<TurnRow, StoreError> {
        let now = row_helpers::now_timestamp();
        let metadata_json = metadata.map(serde_json::to_string).transpose()?;

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO turns (session_id, role, content, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![session_id.as_str(), role.as_str(), content, metadata_json, now],
            )?;

            Ok(TurnRow {
                id: conn.last_insert_rowid(),
                session_id: session_id.clone(),
                role,
                content: content.to_string(),
                metadata: metadata.copied(),
                created_at: now,
            })
        })
    }

    /// The last `limit` turns of a session in chronological order.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn recent(&self, session_id: &SessionId, limit: usize) -> Result<Vec<TurnRow>, StoreError> {
        let mut turns = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, role, content, metadata, created_at
                 FROM turns WHERE session_id = ?1
                 ORDER BY id DESC LIMIT ?2",
            )?;
            let mut rows = stmt.query(rusqlite::params![session_id.as_str(), limit as i64])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_turn(row)?);
            }
            Ok(results)
        })?;
        turns.reverse();
        Ok(turns)
    }

    /// Full history of a session, oldest first.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn history(&self, session_id: &SessionId) -> Result<Vec<TurnRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, role, content, metadata, created_at
                 FROM turns WHERE session_id = ?1
                 ORDER BY id ASC",
            )?;
            let mut rows = stmt.query([session_id.as_str()])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_turn(row)?);
            }
            Ok(results)
        })
    }

    pub fn count(&self, session_id: &SessionId) -> Result<u64, StoreError> {
        self.db.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM turns WHERE session_id = ?1",
                [session_id.as_str()],
                |row| row.get(0),
            )?;
            Ok(n as u64)
        })
    }
}

fn row_to_turn(row: &rusqlite::Row<'_>) -> Result<TurnRow, StoreError> {
    let role_str: String = row_helpers::get(row, 2, "turns", "role")?;
    let metadata = row_helpers::get_opt::<String>(row, 4, "turns", "metadata")?
        .map(|raw| row_helpers::parse_json(&raw, "turns", "metadata"))
        .transpose()?;

    Ok(TurnRow {
        id: row_helpers::get(row, 0, "turns", "id")?,
        session_id: SessionId::from_raw(row_helpers::get::<String>(row, 1, "turns", "session_id")?),
        role: row_helpers::parse_enum(&role_str, "turns", "role")?,
        content: row_helpers::get(row, 3, "turns", "content")?,
        metadata,
        created_at: row_helpers::get(row, 5, "turns", "created_at")?,
    })
}
