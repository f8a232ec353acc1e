//! Worker routing: delegation actions backed by nested worker loops.
//!
//! Each worker is offered to the supervisor as one action named after the
//! worker. Invoking it runs the worker's own turn loop on a fresh transcript
//! holding only the task description; only the worker's final text crosses
//! back as the action result.

use std::sync::Arc;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::Transcript;

use super::journal::Journal;
use super::registry::{Action, ActionKind, ActionRegistry, RegistryError};
use super::turn_loop::TurnLoop;

/// A specialised actor with its own loop and terminal-only registry
#[derive(Debug, Clone)]
pub struct Worker {
    name: String,
    description: String,
    turn_loop: TurnLoop,
}

impl Worker {
    /// Create a worker. Its registry must hold terminal actions only.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        turn_loop: TurnLoop,
    ) -> Result<Self, RegistryError> {
        let name = name.into();
        turn_loop.dispatcher().registry().ensure_terminal(&name)?;
        Ok(Self {
            name,
            description: description.into(),
            turn_loop,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Run the worker on a task and return its final answer.
    ///
    /// A worker stopped by a safety limit fails, so the supervisor sees an
    /// error result rather than a synthetic answer posing as real output.
    #[instrument(skip(self, task), fields(worker = %self.name))]
    pub async fn run(&self, task: &str) -> anyhow::Result<String> {
        let session_id = format!("worker:{}:{}", self.name, Uuid::new_v4().simple());
        let transcript = Transcript::from_task(&session_id, task);

        let outcome = self
            .turn_loop
            .run(&session_id, transcript, &Journal::Ephemeral)
            .await
            .with_context(|| format!("worker {} failed", self.name))?;

        if !outcome.is_answered() {
            warn!(termination = ?outcome.termination, "Worker stopped by safety limit");
            return Err(anyhow!("worker {}: {}", self.name, outcome.answer));
        }

        info!(iterations = outcome.iterations, "Worker answered");
        Ok(outcome.answer)
    }
}

/// Supervisor-side action that hands a task to a worker
#[derive(Debug, Clone)]
pub struct Delegation {
    worker: Arc<Worker>,
}

impl Delegation {
    pub fn new(worker: Arc<Worker>) -> Self {
        Self { worker }
    }
}

/// Extract the task text from a delegation payload.
///
/// Accepts `{"task_description": "..."}` or a bare JSON string.
pub fn task_description(arguments: &Value) -> anyhow::Result<String> {
    let task = match arguments {
        Value::String(s) => s.as_str(),
        Value::Object(map) => map
            .get("task_description")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("missing task_description"))?,
        other => return Err(anyhow!("expected task description, got {}", other)),
    };

    let task = task.trim();
    if task.is_empty() {
        return Err(anyhow!("task_description must not be empty"));
    }
    Ok(task.to_string())
}

#[async_trait]
impl Action for Delegation {
    fn name(&self) -> &str {
        self.worker.name()
    }

    fn description(&self) -> &str {
        self.worker.description()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task_description": {
                    "type": "string",
                    "description": "Complete task for the worker, including every detail it needs (repository URL, paths, image names)"
                }
            },
            "required": ["task_description"]
        })
    }

    fn kind(&self) -> ActionKind {
        ActionKind::Delegation
    }

    async fn execute(&self, arguments: Value) -> anyhow::Result<String> {
        let task = task_description(&arguments)?;
        self.worker.run(&task).await
    }
}

/// The set of workers a supervisor can delegate to
#[derive(Debug, Clone, Default)]
pub struct WorkerRouter {
    workers: Vec<Arc<Worker>>,
}

impl WorkerRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, worker: Worker) -> Result<(), RegistryError> {
        if self.get(worker.name()).is_some() {
            return Err(RegistryError::Duplicate(worker.name().to_string()));
        }
        self.workers.push(Arc::new(worker));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Worker>> {
        self.workers.iter().find(|w| w.name() == name)
    }

    pub fn workers(&self) -> &[Arc<Worker>] {
        &self.workers
    }

    /// The supervisor's registry: one delegation action per worker
    pub fn supervisor_registry(&self) -> Result<ActionRegistry, RegistryError> {
        let mut registry = ActionRegistry::new();
        for worker in &self.workers {
            registry.register(Delegation::new(Arc::clone(worker)))?;
        }
        Ok(registry)
    }
}
