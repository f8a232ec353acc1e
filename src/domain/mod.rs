//! Domain types for the foreman orchestrator.
//!
//! This module contains the core data structures:
//! - Turn: Immutable records of conversation history
//! - Decision: What an actor chose to do at one cycle
//! - Transcript: Turns reconstructed for a decision function

pub mod decision;
pub mod transcript;
pub mod turn;

// Re-export commonly used types
pub use decision::{
    generate_request_id, ActionRequest, ActionResult, ActionSpec, ActionStatus, Decision,
};
pub use transcript::Transcript;
pub use turn::{Role, Turn};
