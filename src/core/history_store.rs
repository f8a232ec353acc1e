//! Append-only, session-scoped history with file-based persistence.
//!
//! Each session is one newline-delimited JSON (JSONL) file, which keeps the
//! log easy to inspect and tail. Writers take an exclusive advisory lock for
//! the duration of one append; readers take a shared lock.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tracing::debug;

use crate::domain::Turn;

/// Errors raised by a history store
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Corrupt history entry at {path}:{line}: {reason}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Background task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for HistoryError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Task(e.to_string())
    }
}

/// Append-only ordered log of turns, keyed by session.
///
/// Implementations must return turns in the order they were appended and
/// must never hand back a timestamp earlier than the session's previous one.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Backend name (for logs and `config` output)
    fn name(&self) -> &str;

    /// Persist a turn; returns the turn as written
    async fn append(&self, turn: Turn) -> Result<Turn, HistoryError>;

    /// Every turn of a session, oldest first
    async fn replay(&self, session_id: &str) -> Result<Vec<Turn>, HistoryError>;

    /// The most recent `limit` turns of a session, oldest first
    async fn recent(&self, session_id: &str, limit: usize) -> Result<Vec<Turn>, HistoryError> {
        let mut turns = self.replay(session_id).await?;
        let start = turns.len().saturating_sub(limit);
        Ok(turns.split_off(start))
    }

    /// Ids of all sessions with at least one turn
    async fn sessions(&self) -> Result<Vec<String>, HistoryError>;
}

/// File-based history store using one JSONL file per session
pub struct JsonlHistoryStore {
    /// Directory holding the session files
    sessions_dir: PathBuf,
}

impl JsonlHistoryStore {
    /// Create or open a store rooted at `sessions_dir`
    pub async fn open(sessions_dir: impl Into<PathBuf>) -> Result<Self, HistoryError> {
        let sessions_dir = sessions_dir.into();
        fs::create_dir_all(&sessions_dir).await?;
        Ok(Self { sessions_dir })
    }

    pub fn sessions_dir(&self) -> &Path {
        &self.sessions_dir
    }

    /// Path of the JSONL file for a session
    pub fn session_path(&self, session_id: &str) -> PathBuf {
        self.sessions_dir
            .join(format!("{}.jsonl", session_file_stem(session_id)))
    }
}

#[async_trait]
impl HistoryStore for JsonlHistoryStore {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn append(&self, turn: Turn) -> Result<Turn, HistoryError> {
        let path = self.session_path(&turn.session_id);
        let written = tokio::task::spawn_blocking(move || append_locked(&path, turn)).await??;
        debug!(session_id = %written.session_id, role = %written.role, "Turn appended");
        Ok(written)
    }

    async fn replay(&self, session_id: &str) -> Result<Vec<Turn>, HistoryError> {
        let path = self.session_path(session_id);
        if !fs::try_exists(&path).await? {
            return Ok(Vec::new());
        }
        tokio::task::spawn_blocking(move || read_locked(&path)).await?
    }

    async fn sessions(&self) -> Result<Vec<String>, HistoryError> {
        let mut sessions = Vec::new();
        let mut entries = fs::read_dir(&self.sessions_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            // File names may be digests, so the id comes from the first turn
            let id = tokio::task::spawn_blocking(move || first_session_id(&path)).await??;
            if let Some(id) = id {
                sessions.push(id);
            }
        }

        sessions.sort();
        Ok(sessions)
    }
}

const DIGEST_PREFIX: &str = "h-";

/// Bytes read per step when scanning a session file backwards
const TAIL_CHUNK: u64 = 4096;

/// The fields of a stored line needed without decoding the whole turn
#[derive(Deserialize)]
struct Entry {
    session_id: String,
    timestamp: DateTime<Utc>,
}

/// File stem for a session id.
///
/// Ids that are safe as file names are used verbatim; anything else is
/// replaced by a digest so arbitrary client ids cannot escape the directory.
/// Ids that already look like a digest stem are digested as well.
pub fn session_file_stem(session_id: &str) -> String {
    let safe = !session_id.is_empty()
        && session_id.len() <= 128
        && !session_id.starts_with('.')
        && !session_id.starts_with(DIGEST_PREFIX)
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

    if safe {
        session_id.to_string()
    } else {
        let digest = Sha256::digest(session_id.as_bytes());
        format!("{}{}", DIGEST_PREFIX, hex::encode(&digest[..16]))
    }
}

fn append_locked(path: &Path, mut turn: Turn) -> Result<Turn, HistoryError> {
    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)?;

    FileExt::lock_exclusive(&file)?;
    let result = write_turn(&mut file, &mut turn);
    FileExt::unlock(&file)?;

    result.map(|_| turn)
}

fn write_turn(file: &mut File, turn: &mut Turn) -> Result<(), HistoryError> {
    if let Some(line) = last_line(file)? {
        let previous: Entry = serde_json::from_slice(&line)?;
        if turn.timestamp < previous.timestamp {
            turn.timestamp = previous.timestamp;
        }
    }

    let json = serde_json::to_string(turn)?;
    file.write_all(format!("{}\n", json).as_bytes())?;
    file.flush()?;
    file.sync_data()?;
    Ok(())
}

/// Last non-empty line of the file, read backwards from the end
fn last_line(file: &mut File) -> std::io::Result<Option<Vec<u8>>> {
    let mut pos = file.seek(SeekFrom::End(0))?;
    let mut tail: Vec<u8> = Vec::new();

    loop {
        let end = tail
            .iter()
            .rposition(|b| !b.is_ascii_whitespace())
            .map_or(0, |i| i + 1);
        if let Some(newline) = tail[..end].iter().rposition(|&b| b == b'\n') {
            return Ok(Some(tail[newline + 1..end].to_vec()));
        }
        if pos == 0 {
            return Ok((end > 0).then(|| tail[..end].to_vec()));
        }

        let step = TAIL_CHUNK.min(pos);
        pos -= step;
        file.seek(SeekFrom::Start(pos))?;
        let mut chunk = vec![0u8; step as usize];
        file.read_exact(&mut chunk)?;
        chunk.extend_from_slice(&tail);
        tail = chunk;
    }
}

/// Session id recorded on the first line of a session file
fn first_session_id(path: &Path) -> Result<Option<String>, HistoryError> {
    let file = File::open(path)?;
    FileExt::lock_shared(&file)?;
    let result = read_first_entry(&file, path);
    FileExt::unlock(&file)?;
    result.map(|entry| entry.map(|e| e.session_id))
}

fn read_first_entry(file: &File, path: &Path) -> Result<Option<Entry>, HistoryError> {
    let reader = BufReader::new(file);
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let entry = serde_json::from_str(&line).map_err(|e| HistoryError::Corrupt {
            path: path.to_path_buf(),
            line: idx + 1,
            reason: e.to_string(),
        })?;
        return Ok(Some(entry));
    }
    Ok(None)
}

fn read_locked(path: &Path) -> Result<Vec<Turn>, HistoryError> {
    let file = File::open(path)?;
    FileExt::lock_shared(&file)?;
    let result = parse_lines(&file, path);
    FileExt::unlock(&file)?;
    result
}

fn parse_lines(file: &File, path: &Path) -> Result<Vec<Turn>, HistoryError> {
    let reader = BufReader::new(file);
    let mut turns = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let turn: Turn = serde_json::from_str(&line).map_err(|e| HistoryError::Corrupt {
            path: path.to_path_buf(),
            line: idx + 1,
            reason: e.to_string(),
        })?;
        turns.push(turn);
    }

    Ok(turns)
}
