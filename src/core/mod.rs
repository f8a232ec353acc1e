//! Core orchestration logic.
//!
//! This module contains:
//! - HistoryStore: Append-only session history (JSONL or SQLite)
//! - ActionRegistry: Name-to-capability mapping
//! - Dispatcher: Executes action batches and records results in order
//! - TurnLoop: The decide/act state machine
//! - WorkerRouter: Delegation actions backed by worker loops
//! - Orchestrator: Per-message session handling

pub mod dispatcher;
pub mod history_store;
pub mod journal;
pub mod orchestrator;
pub mod registry;
pub mod retry;
pub mod router;
pub mod safety;
pub mod sqlite_store;
pub mod turn_loop;

// Re-export commonly used types
pub use dispatcher::{DispatchError, DispatchOutcome, Dispatcher};
pub use history_store::{session_file_stem, HistoryError, HistoryStore, JsonlHistoryStore};
pub use journal::Journal;
pub use orchestrator::{render_message, Orchestrator, SessionError, SessionReply};
pub use registry::{Action, ActionError, ActionKind, ActionRegistry, RegistryError};
pub use retry::RetryPolicy;
pub use router::{Delegation, Worker, WorkerRouter};
pub use safety::{SafetyLimits, SafetyTracker, SafetyViolation};
pub use sqlite_store::SqliteHistoryStore;
pub use turn_loop::{LoopError, LoopOutcome, Termination, TurnLoop};
