use serde::{Deserialize, Serialize};
use tracing::instrument;

use parley_core::ids::SessionId;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// A named conversation. Rows with `is_persistent = false` only carry an
/// early title and are never listed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRow {
    pub id: SessionId,
    pub title: Option<String>,
    pub is_persistent: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Clone)]
pub struct SessionRepo {
    db: Database,
}

impl SessionRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Whether the session has been persisted (and is therefore listed).
    #[instrument(skip(self), fields(session_id = %id))]
    pub fn exists(&self, id: &SessionId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM sessions WHERE id = ?1 AND is_persistent = 1",
                [id.as_str()],
                |row| row.get(0),
            )?;
            Ok(n > 0)
        })
    }

    /// Persist a session, or bump its ordering timestamp if it already is.
    /// A title that is already stored wins over `title`.
    #[instrument(skip(self, title), fields(session_id = %id))]
    pub fn create_or_touch(&self, id: &SessionId, title: &str) -> Result<(), StoreError> {
        let now = row_helpers::now_timestamp();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (id, title, is_persistent, created_at, updated_at)
                 VALUES (?1, ?2, 1, ?3, ?3)
                 ON CONFLICT(id) DO UPDATE SET
                    is_persistent = 1,
                    title = COALESCE(sessions.title, excluded.title),
                    updated_at = excluded.updated_at",
                rusqlite::params![id.as_str(), title, now],
            )?;
            Ok(())
        })
    }

    /// Bump the ordering timestamp. Identity and title are untouched.
    #[instrument(skip(self), fields(session_id = %id))]
    pub fn touch(&self, id: &SessionId) -> Result<(), StoreError> {
        let now = row_helpers::now_timestamp();
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE sessions SET updated_at = ?1 WHERE id = ?2",
                rusqlite::params![now, id.as_str()],
            )?;
            Ok(())
        })
    }

    /// Store a title without changing whether the session is listed.
    #[instrument(skip(self, title), fields(session_id = %id))]
    pub fn assign_title(&self, id: &SessionId, title: &str) -> Result<(), StoreError> {
        let now = row_helpers::now_timestamp();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (id, title, is_persistent, created_at, updated_at)
                 VALUES (?1, ?2, 0, ?3, ?3)
                 ON CONFLICT(id) DO UPDATE SET title = excluded.title",
                rusqlite::params![id.as_str(), title, now],
            )?;
            Ok(())
        })
    }

    #[instrument(skip(self), fields(session_id = %id))]
    pub fn get(&self, id: &SessionId) -> Result<SessionRow, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, title, is_persistent, created_at, updated_at
                 FROM sessions WHERE id = ?1",
            )?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_session(row),
                None => Err(StoreError::NotFound(format!("session {id}"))),
            }
        })
    }

    /// Persisted sessions, most recently active first.
    #[instrument(skip(self))]
    pub fn list_persistent(&self, limit: u32) -> Result<Vec<SessionRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, title, is_persistent, created_at, updated_at
                 FROM sessions WHERE is_persistent = 1
                 ORDER BY updated_at DESC LIMIT ?1",
            )?;
            let mut rows = stmt.query([limit])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_session(row)?);
            }
            Ok(results)
        })
    }

    /// Delete a session and all of its turns. Returns whether anything was removed.
    #[instrument(skip(self), fields(session_id = %id))]
    pub fn delete(&self, id: &SessionId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let turns = conn.execute("DELETE FROM turns WHERE session_id = ?1", [id.as_str()])?;
            let sessions = conn.execute("DELETE FROM sessions WHERE id = ?1", [id.as_str()])?;
            Ok(turns + sessions > 0)
        })
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> Result<SessionRow, StoreError> {
    Ok(SessionRow {
        id: SessionId::from_raw(row_helpers::get::<String>(row, 0, "sessions", "id")?),
        title: row_helpers::get_opt(row, 1, "sessions", "title")?,
        is_persistent: row_helpers::get::<i64>(row, 2, "sessions", "is_persistent")? != 0,
        created_at: row_helpers::get(row, 3, "sessions", "created_at")?,
        updated_at: row_helpers::get(row, 4, "sessions", "updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::turns::TurnRepo;
    use parley_core::messages::Role;

    fn setup() -> (Database, SessionRepo) {
        let db = Database::in_memory().unwrap();
        (db.clone(), SessionRepo::new(db))
    }

    #[test]
    fn unknown_session_does_not_exist() {
        let (_, repo) = setup();
        let id = SessionId::from_raw("nope");
        assert!(!repo.exists(&id).unwrap());
        assert!(matches!(repo.get(&id), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn create_then_touch_keeps_identity_and_title() {
        let (_, repo) = setup();
        let id = SessionId::from_raw("s1");
        repo.create_or_touch(&id, "First title").unwrap();
        let created = repo.get(&id).unwrap();
        assert!(created.is_persistent);
        assert!(repo.exists(&id).unwrap());

        std::thread::sleep(std::time::Duration::from_millis(2));
        repo.create_or_touch(&id, "Other title").unwrap();
        repo.touch(&id).unwrap();

        let after = repo.get(&id).unwrap();
        assert_eq!(after.id, created.id);
        assert_eq!(after.title.as_deref(), Some("First title"));
        assert_eq!(after.created_at, created.created_at);
        assert!(after.updated_at > created.updated_at);
    }

    #[test]
    fn assigned_title_is_unlisted_until_persisted() {
        let (_, repo) = setup();
        let id = SessionId::from_raw("s2");
        repo.assign_title(&id, "Rust lifetimes explained").unwrap();

        assert!(!repo.exists(&id).unwrap());
        assert!(repo.list_persistent(50).unwrap().is_empty());

        repo.create_or_touch(&id, "Fallback title...").unwrap();
        let row = repo.get(&id).unwrap();
        assert!(row.is_persistent);
        assert_eq!(row.title.as_deref(), Some("Rust lifetimes explained"));
    }

    #[test]
    fn assign_title_keeps_persistence() {
        let (_, repo) = setup();
        let id = SessionId::from_raw("s3");
        repo.create_or_touch(&id, "Old").unwrap();
        repo.assign_title(&id, "New").unwrap();
        let row = repo.get(&id).unwrap();
        assert!(row.is_persistent);
        assert_eq!(row.title.as_deref(), Some("New"));
    }

    #[test]
    fn listing_orders_by_activity() {
        let (_, repo) = setup();
        let a = SessionId::from_raw("a");
        let b = SessionId::from_raw("b");
        repo.create_or_touch(&a, "A").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        repo.create_or_touch(&b, "B").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        repo.touch(&a).unwrap();

        let ids: Vec<String> = repo
            .list_persistent(10)
            .unwrap()
            .into_iter()
            .map(|s| s.id.to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(repo.list_persistent(1).unwrap().len(), 1);
    }

    #[test]
    fn delete_removes_turns() {
        let (db, repo) = setup();
        let turns = TurnRepo::new(db);
        let id = SessionId::from_raw("gone");
        repo.create_or_touch(&id, "Bye").unwrap();
        turns.append(&id, Role::User, "hello", None).unwrap();

        assert!(repo.delete(&id).unwrap());
        assert!(!repo.exists(&id).unwrap());
        assert_eq!(turns.count(&id).unwrap(), 0);
        assert!(!repo.delete(&id).unwrap());
    }
}
