//! Adapter interfaces for external systems.
//!
//! Adapters provide the two external capabilities the orchestrator relies
//! on: decision functions (language models) and action backends (builds,
//! deployments, infrastructure changes).

pub mod actions;
pub mod chat_completions;
pub mod scripted;

use async_trait::async_trait;

use crate::domain::{ActionSpec, Decision, Transcript};

pub use actions::{build_action, CommandAction, SimulatedAction, WebhookAction};
pub use chat_completions::ChatCompletionsDecision;
pub use scripted::ScriptedDecision;

/// Given a transcript and the actions on offer, decide the next step.
///
/// Each turn loop is handed its own explicitly constructed instance; there
/// is no process-wide client.
#[async_trait]
pub trait DecisionFunction: Send + Sync {
    /// Human-readable name (for logs)
    fn name(&self) -> &str;

    /// Return a final answer or a batch of action requests
    async fn decide(
        &self,
        transcript: &Transcript,
        catalog: &[ActionSpec],
    ) -> anyhow::Result<Decision>;
}
