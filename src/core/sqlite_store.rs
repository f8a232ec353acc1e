//! SQLite-backed history store.
//!
//! Rows are ordered by an autoincrement sequence rather than by timestamp,
//! so two turns written within the same clock tick still replay in order.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::domain::{ActionStatus, Role, Turn};

use super::history_store::{HistoryError, HistoryStore};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS chat_history (
    seq         INTEGER PRIMARY KEY AUTOINCREMENT,
    id          TEXT NOT NULL UNIQUE,
    session_id  TEXT NOT NULL,
    role        TEXT NOT NULL,
    content     TEXT NOT NULL,
    action_name TEXT,
    request_id  TEXT,
    status      TEXT,
    timestamp   TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_chat_history_session ON chat_history (session_id, seq);
";

/// History store backed by a single SQLite database file
pub struct SqliteHistoryStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteHistoryStore {
    /// Open (or create) the database at `path`
    pub fn open(path: &Path) -> Result<Self, HistoryError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::from_connection(Connection::open(path)?)
    }

    /// In-memory database (tests, throwaway sessions)
    pub fn in_memory() -> Result<Self, HistoryError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, HistoryError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, HistoryError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, HistoryError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| HistoryError::Task("sqlite connection lock poisoned".to_string()))?;
            f(&mut *guard)
        })
        .await?
    }
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn append(&self, mut turn: Turn) -> Result<Turn, HistoryError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;

            let previous: Option<String> = tx
                .query_row(
                    "SELECT timestamp FROM chat_history WHERE session_id = ?1
                     ORDER BY seq DESC LIMIT 1",
                    params![turn.session_id],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(previous) = previous.as_deref().and_then(parse_timestamp) {
                if turn.timestamp < previous {
                    turn.timestamp = previous;
                }
            }

            tx.execute(
                "INSERT INTO chat_history
                    (id, session_id, role, content, action_name, request_id, status, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    turn.id.to_string(),
                    turn.session_id,
                    turn.role.as_str(),
                    turn.content,
                    turn.action_name,
                    turn.request_id,
                    turn.status.map(|s| s.as_str()),
                    turn.timestamp.to_rfc3339(),
                ],
            )?;
            tx.commit()?;
            Ok(turn)
        })
        .await
    }

    async fn replay(&self, session_id: &str) -> Result<Vec<Turn>, HistoryError> {
        self.recent(session_id, usize::MAX).await
    }

    async fn recent(&self, session_id: &str, limit: usize) -> Result<Vec<Turn>, HistoryError> {
        let session_id = session_id.to_string();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, role, content, action_name, request_id, status, timestamp
                 FROM chat_history WHERE session_id = ?1
                 ORDER BY seq DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![session_id, limit], |row| {
                Ok(RawTurn {
                    id: row.get(0)?,
                    session_id: row.get(1)?,
                    role: row.get(2)?,
                    content: row.get(3)?,
                    action_name: row.get(4)?,
                    request_id: row.get(5)?,
                    status: row.get(6)?,
                    timestamp: row.get(7)?,
                })
            })?;

            let mut turns = Vec::new();
            for row in rows {
                turns.push(row?.into_turn()?);
            }
            turns.reverse();
            Ok(turns)
        })
        .await
    }

    async fn sessions(&self) -> Result<Vec<String>, HistoryError> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT DISTINCT session_id FROM chat_history ORDER BY session_id")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            let mut sessions = Vec::new();
            for row in rows {
                sessions.push(row?);
            }
            Ok(sessions)
        })
        .await
    }
}

/// Row as stored, before text columns are parsed back into domain types
struct RawTurn {
    id: String,
    session_id: String,
    role: String,
    content: String,
    action_name: Option<String>,
    request_id: Option<String>,
    status: Option<String>,
    timestamp: String,
}

impl RawTurn {
    fn into_turn(self) -> Result<Turn, HistoryError> {
        let corrupt = |reason: String| HistoryError::Corrupt {
            path: "chat_history".into(),
            line: 0,
            reason,
        };

        let id = Uuid::parse_str(&self.id).map_err(|e| corrupt(e.to_string()))?;
        let role: Role = self.role.parse().map_err(corrupt)?;
        let status = match self.status.as_deref() {
            None => None,
            Some("ok") => Some(ActionStatus::Ok),
            Some("error") => Some(ActionStatus::Error),
            Some(other) => return Err(corrupt(format!("unknown status: {other}"))),
        };
        let timestamp = parse_timestamp(&self.timestamp)
            .ok_or_else(|| corrupt(format!("bad timestamp: {}", self.timestamp)))?;

        Ok(Turn {
            id,
            session_id: self.session_id,
            role,
            content: self.content,
            action_name: self.action_name,
            request_id: self.request_id,
            status,
            timestamp,
        })
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
