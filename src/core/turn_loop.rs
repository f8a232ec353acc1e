//! The decide/act state machine shared by the supervisor and every worker.
//!
//! One loop invocation alternates between asking its decision function for
//! the next step and dispatching the requested actions, until the decision
//! function answers or a safety limit forces a synthetic answer.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::adapters::DecisionFunction;
use crate::domain::{Decision, Transcript, Turn};

use super::dispatcher::{DispatchError, Dispatcher};
use super::history_store::HistoryError;
use super::journal::Journal;
use super::safety::{SafetyLimits, SafetyTracker, SafetyViolation};

/// How a loop reached its terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The decision function returned a final answer
    Answered,

    /// The iteration cap forced a synthetic answer
    IterationCap,

    /// The run timeout forced a synthetic answer
    RunTimeout,
}

impl From<&SafetyViolation> for Termination {
    fn from(violation: &SafetyViolation) -> Self {
        match violation {
            SafetyViolation::MaxIterations { .. } => Self::IterationCap,
            SafetyViolation::RunTimeout { .. } => Self::RunTimeout,
        }
    }
}

/// Structural failures that abort a loop
#[derive(Debug, Error)]
pub enum LoopError {
    #[error("invalid decision from {actor}: {reason}")]
    InvalidDecision { actor: String, reason: String },

    #[error("decision function for {actor} failed: {message}")]
    Decision { actor: String, message: String },

    #[error("history store failure: {0}")]
    Persistence(#[from] HistoryError),

    #[error("failed to record action results: {0}")]
    Dispatch(#[from] DispatchError),
}

/// Terminal state of a loop
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    /// Final transcript; its last turn is the (unrecorded) terminal actor turn
    pub transcript: Transcript,

    /// Text of the terminal answer
    pub answer: String,

    pub termination: Termination,

    /// Completed decide/act cycles
    pub iterations: u32,
}

impl LoopOutcome {
    pub fn is_answered(&self) -> bool {
        self.termination == Termination::Answered
    }
}

/// A single actor's decide/act loop
#[derive(Clone)]
pub struct TurnLoop {
    actor: String,
    decision: Arc<dyn DecisionFunction>,
    dispatcher: Dispatcher,
    limits: SafetyLimits,
}

impl TurnLoop {
    pub fn new(
        actor: impl Into<String>,
        decision: Arc<dyn DecisionFunction>,
        dispatcher: Dispatcher,
        limits: SafetyLimits,
    ) -> Self {
        Self {
            actor: actor.into(),
            decision,
            dispatcher,
            limits,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Drive the loop to a terminal state.
    ///
    /// Action batches are recorded (one actor turn, then one action_result
    /// turn per request) before the next decision is computed. The terminal
    /// actor turn is appended to the returned transcript but not recorded;
    /// the caller owns that write.
    #[instrument(skip(self, transcript, journal), fields(actor = %self.actor))]
    pub async fn run(
        &self,
        session_id: &str,
        mut transcript: Transcript,
        journal: &Journal,
    ) -> Result<LoopOutcome, LoopError> {
        let mut tracker = SafetyTracker::new();
        let catalog = self.dispatcher.catalog();

        loop {
            if let Err(violation) = self.limits.check(&tracker) {
                warn!(%violation, iterations = tracker.iterations, "Safety limit reached");
                let answer = violation.synthetic_answer().to_string();
                transcript.push(Turn::actor(session_id, &answer));
                return Ok(LoopOutcome {
                    transcript,
                    answer,
                    termination: Termination::from(&violation),
                    iterations: tracker.iterations,
                });
            }

            let cycle = tracker.iterations + 1;
            debug!(cycle, turns = transcript.len(), "Requesting decision");

            let decision = self
                .decision
                .decide(&transcript, &catalog)
                .await
                .map_err(|e| LoopError::Decision {
                    actor: self.actor.clone(),
                    message: format!("{:#}", e),
                })?;

            decision
                .validate()
                .map_err(|reason| LoopError::InvalidDecision {
                    actor: self.actor.clone(),
                    reason,
                })?;

            match decision {
                Decision::FinalAnswer { text } => {
                    info!(cycle, iterations = tracker.iterations, "Actor answered");
                    transcript.push(Turn::actor(session_id, &text));
                    return Ok(LoopOutcome {
                        transcript,
                        answer: text,
                        termination: Termination::Answered,
                        iterations: tracker.iterations,
                    });
                }
                Decision::Actions { requests } => {
                    let names: Vec<&str> = requests.iter().map(|r| r.name.as_str()).collect();
                    info!(cycle, actions = ?names, "Dispatching action batch");

                    let record = journal
                        .record(Turn::actor_requests(session_id, &requests))
                        .await?;
                    transcript.push(record);

                    let outcome = self
                        .dispatcher
                        .dispatch(session_id, &requests, journal)
                        .await?;
                    for turn in outcome.turns {
                        transcript.push(turn);
                    }

                    tracker.record_cycle(requests.len());
                }
            }
        }
    }
}

impl std::fmt::Debug for TurnLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnLoop")
            .field("actor", &self.actor)
            .field("decision", &self.decision.name())
            .field("dispatcher", &self.dispatcher)
            .field("limits", &self.limits)
            .finish()
    }
}
