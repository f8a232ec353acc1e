//! Where a turn loop records its turns.
//!
//! The supervisor records into the session's history store. Workers record
//! nowhere: only their final answer crosses back to the supervisor.

use std::sync::Arc;

use crate::domain::Turn;

use super::history_store::{HistoryError, HistoryStore};

#[derive(Clone)]
pub enum Journal {
    /// Persist every turn to the store
    Durable(Arc<dyn HistoryStore>),

    /// Keep turns in the in-memory transcript only
    Ephemeral,
}

impl Journal {
    /// Record a turn, returning it as written
    pub async fn record(&self, turn: Turn) -> Result<Turn, HistoryError> {
        match self {
            Self::Durable(store) => store.append(turn).await,
            Self::Ephemeral => Ok(turn),
        }
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Durable(store) => write!(f, "Durable({})", store.name()),
            Self::Ephemeral => f.write_str("Ephemeral"),
        }
    }
}
