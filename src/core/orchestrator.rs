//! Session orchestrator: one inbound user message in, one answer out.
//!
//! Persists the user turn, rebuilds the supervisor transcript from the
//! history store, runs the supervisor loop against the durable journal and
//! persists exactly one terminal actor turn (the answer, or a synthetic
//! failure turn).

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, instrument};

use crate::adapters::{build_action, ChatCompletionsDecision, DecisionFunction, ScriptedDecision};
use crate::config::{HistoryBackend, ResolvedConfig, WorkerConfig};
use crate::domain::{Transcript, Turn};

use super::dispatcher::Dispatcher;
use super::history_store::{HistoryError, HistoryStore, JsonlHistoryStore};
use super::journal::Journal;
use super::registry::ActionRegistry;
use super::router::{Worker, WorkerRouter};
use super::safety::SafetyLimits;
use super::sqlite_store::SqliteHistoryStore;
use super::turn_loop::{LoopError, Termination, TurnLoop};

/// Default number of prior turns fed to the supervisor
pub const DEFAULT_WINDOW: usize = 10;

/// Prefix of the synthetic terminal turn written when a request fails
pub const FAILURE_PREFIX: &str = "Request failed";

/// Answer to one user message
#[derive(Debug, Clone, Serialize)]
pub struct SessionReply {
    pub session_id: String,
    pub response_text: String,
    pub termination: Termination,
    pub iterations: u32,
}

/// Caller-facing failure of one request
#[derive(Debug, Error)]
pub enum SessionError {
    /// Rejected before anything was persisted
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The user turn could not be persisted
    #[error("failed to record user message: {0}")]
    History(#[from] HistoryError),

    /// The supervisor loop failed after the user turn was persisted.
    /// `response_text` is the synthetic terminal turn's content.
    #[error("{response_text}")]
    Failed {
        response_text: String,
        /// Whether the synthetic terminal turn reached the store
        recorded: bool,
        #[source]
        source: LoopError,
    },
}

impl SessionError {
    /// Text to show the user
    pub fn response_text(&self) -> String {
        match self {
            Self::Failed { response_text, .. } => response_text.clone(),
            other => format!("{}: {}", FAILURE_PREFIX, other),
        }
    }
}

/// Render the user message with optional request context appended
pub fn render_message(message: &str, context: &BTreeMap<String, String>) -> String {
    if context.is_empty() {
        return message.to_string();
    }

    let mut rendered = format!("{}\n\nContext:", message);
    for (key, value) in context {
        rendered.push_str(&format!("\n- {}: {}", key, value));
    }
    rendered
}

/// Coordinates the supervisor loop for every session
pub struct Orchestrator {
    store: Arc<dyn HistoryStore>,
    supervisor: TurnLoop,
    router: WorkerRouter,
    window: usize,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn HistoryStore>, supervisor: TurnLoop, router: WorkerRouter) -> Self {
        Self {
            store,
            supervisor,
            router,
            window: DEFAULT_WINDOW,
        }
    }

    /// Prior turns included in each supervisor transcript
    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window.max(1);
        self
    }

    /// Assemble store, workers and supervisor from configuration.
    ///
    /// `offline` swaps every model-backed decision function for an echo.
    pub async fn from_config(config: &ResolvedConfig, offline: bool) -> Result<Self> {
        let settings = &config.settings;

        let store: Arc<dyn HistoryStore> = match settings.history.backend {
            HistoryBackend::Jsonl => Arc::new(
                JsonlHistoryStore::open(config.sessions_dir())
                    .await
                    .context("Failed to open session directory")?,
            ),
            HistoryBackend::Sqlite => {
                tokio::fs::create_dir_all(&config.home)
                    .await
                    .with_context(|| format!("Failed to create {}", config.home.display()))?;
                Arc::new(
                    SqliteHistoryStore::open(&config.database_path())
                        .context("Failed to open history database")?,
                )
            }
        };

        let limits = settings.safety.clone();
        let decision_for = |name: &str, prompt: &str| -> Result<Arc<dyn DecisionFunction>> {
            if offline {
                Ok(Arc::new(ScriptedDecision::echo(name)))
            } else {
                Ok(Arc::new(ChatCompletionsDecision::new(name, &settings.model, prompt)?))
            }
        };

        let mut router = WorkerRouter::new();
        for worker in config.workers() {
            let decision = decision_for(&worker.name, &worker_prompt(&worker))?;
            router.add(build_worker(&worker, decision, &limits, settings.dispatch.parallel)?)?;
        }

        let registry = router.supervisor_registry()?;
        let dispatcher = Dispatcher::new(Arc::new(registry), limits.action_timeout())
            .with_parallel(settings.dispatch.parallel);
        let supervisor = TurnLoop::new(
            "supervisor",
            decision_for("supervisor", &settings.supervisor.system_prompt)?,
            dispatcher,
            limits,
        );

        info!(
            backend = store.name(),
            workers = router.workers().len(),
            offline,
            "Orchestrator ready"
        );

        Ok(Self::new(store, supervisor, router).with_window(settings.history.window))
    }

    pub fn router(&self) -> &WorkerRouter {
        &self.router
    }

    /// Handle one user message for a session.
    ///
    /// On success the answer has been persisted as the session's latest
    /// turn. On failure after the user turn was persisted, a synthetic
    /// terminal turn is written once and its text returned in the error.
    #[instrument(skip(self, message, context))]
    pub async fn handle(
        &self,
        session_id: &str,
        message: &str,
        context: &BTreeMap<String, String>,
    ) -> Result<SessionReply, SessionError> {
        if session_id.trim().is_empty() {
            return Err(SessionError::InvalidRequest("session id is empty".to_string()));
        }
        if message.trim().is_empty() {
            return Err(SessionError::InvalidRequest("message is empty".to_string()));
        }

        let user = self
            .store
            .append(Turn::user(session_id, render_message(message, context)))
            .await?;

        match self.converse(session_id, user).await {
            Ok(reply) => Ok(reply),
            Err(source) => Err(self.fail(session_id, source).await),
        }
    }

    async fn converse(&self, session_id: &str, user: Turn) -> Result<SessionReply, LoopError> {
        let prior = self.store.recent(session_id, self.window + 1).await?;
        let mut transcript =
            Transcript::from_history(prior.into_iter().filter(|t| t.id != user.id).collect());
        transcript.push(user);

        let journal = Journal::Durable(Arc::clone(&self.store));
        let outcome = self.supervisor.run(session_id, transcript, &journal).await?;

        let terminal = outcome
            .transcript
            .last()
            .cloned()
            .unwrap_or_else(|| Turn::actor(session_id, &outcome.answer));
        self.store.append(terminal).await?;

        info!(
            termination = ?outcome.termination,
            iterations = outcome.iterations,
            "Request answered"
        );

        Ok(SessionReply {
            session_id: session_id.to_string(),
            response_text: outcome.answer,
            termination: outcome.termination,
            iterations: outcome.iterations,
        })
    }

    async fn fail(&self, session_id: &str, source: LoopError) -> SessionError {
        let response_text = format!("{}: {}", FAILURE_PREFIX, source);
        error!(error = %source, "Request failed");

        let recorded = match self
            .store
            .append(Turn::actor(session_id, &response_text))
            .await
        {
            Ok(_) => true,
            Err(e) => {
                error!(error = %e, "Failed to record failure turn");
                false
            }
        };

        SessionError::Failed {
            response_text,
            recorded,
            source,
        }
    }

    /// The latest `limit` turns of a session (all when `None`), oldest first
    pub async fn history(
        &self,
        session_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Turn>, HistoryError> {
        match limit {
            Some(limit) => self.store.recent(session_id, limit).await,
            None => self.store.replay(session_id).await,
        }
    }

    pub async fn sessions(&self) -> Result<Vec<String>, HistoryError> {
        self.store.sessions().await
    }
}

fn worker_prompt(worker: &WorkerConfig) -> String {
    worker
        .system_prompt
        .clone()
        .unwrap_or_else(|| worker.description.clone())
}

/// Build a worker with its terminal actions from configuration
pub fn build_worker(
    config: &WorkerConfig,
    decision: Arc<dyn DecisionFunction>,
    limits: &SafetyLimits,
    parallel: bool,
) -> Result<Worker> {
    let mut registry = ActionRegistry::new();
    for action in &config.actions {
        registry.register_arc(
            build_action(action)
                .with_context(|| format!("Failed to build action for worker '{}'", config.name))?,
        )?;
    }

    let dispatcher = Dispatcher::new(Arc::new(registry), limits.action_timeout())
        .with_parallel(parallel);
    let turn_loop = TurnLoop::new(&config.name, decision, dispatcher, limits.clone());
    Ok(Worker::new(&config.name, &config.description, turn_loop)?)
}
