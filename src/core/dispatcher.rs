//! Executes a batch of action requests and records their results.
//!
//! Results are produced exactly once per request and always merged in
//! request order, whatever order the actions actually finish in.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};

use crate::domain::{ActionRequest, ActionResult, ActionSpec, Turn};

use super::history_store::HistoryError;
use super::journal::Journal;
use super::registry::{Action, ActionError, ActionRegistry};

/// Persistence failed part-way through recording a batch
#[derive(Debug, Error)]
#[error("Recorded {persisted} of {total} action results before failure: {source}")]
pub struct DispatchError {
    pub persisted: usize,
    pub total: usize,
    #[source]
    pub source: HistoryError,
}

/// Results of one batch, with the turns that recorded them
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    /// One result per request, in request order
    pub results: Vec<ActionResult>,

    /// The action_result turns as written, in request order
    pub turns: Vec<Turn>,
}

/// Runs action requests against a registry
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<ActionRegistry>,
    action_timeout: Duration,
    parallel: bool,
}

impl Dispatcher {
    pub fn new(registry: Arc<ActionRegistry>, action_timeout: Duration) -> Self {
        Self {
            registry,
            action_timeout,
            parallel: true,
        }
    }

    /// Run a batch's actions one after another instead of concurrently
    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    pub fn catalog(&self) -> Vec<ActionSpec> {
        self.registry.catalog()
    }

    /// Execute every request, then record each result in request order.
    ///
    /// Unknown names, failures, timeouts and panics become error results and
    /// never affect sibling requests. A recording failure is returned with the
    /// count of results that did make it into the journal.
    #[instrument(skip(self, requests, journal), fields(batch = requests.len()))]
    pub async fn dispatch(
        &self,
        session_id: &str,
        requests: &[ActionRequest],
        journal: &Journal,
    ) -> Result<DispatchOutcome, DispatchError> {
        let results = if self.parallel && requests.len() > 1 {
            self.execute_concurrently(requests).await
        } else {
            let mut results = Vec::with_capacity(requests.len());
            for request in requests {
                results.push(self.execute_isolated(request).await);
            }
            results
        };

        let mut turns = Vec::with_capacity(results.len());
        for (idx, result) in results.iter().enumerate() {
            match journal.record(Turn::action_result(session_id, result)).await {
                Ok(turn) => turns.push(turn),
                Err(source) => {
                    return Err(DispatchError {
                        persisted: idx,
                        total: results.len(),
                        source,
                    })
                }
            }
        }

        Ok(DispatchOutcome { results, turns })
    }

    /// Run one action on its own task so a panic stays inside it
    async fn execute_isolated(&self, request: &ActionRequest) -> ActionResult {
        let Some(action) = self.registry.get(&request.name) else {
            return unknown_action(request);
        };

        let task = tokio::spawn(run_action(action, request.clone(), self.action_timeout));
        match task.await {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    action = %request.name,
                    request_id = %request.id,
                    error = %e,
                    "Action task did not complete"
                );
                aborted(request)
            }
        }
    }

    async fn execute_concurrently(&self, requests: &[ActionRequest]) -> Vec<ActionResult> {
        let mut slots: Vec<Option<ActionResult>> = vec![None; requests.len()];
        let mut set = JoinSet::new();

        for (idx, request) in requests.iter().enumerate() {
            match self.registry.get(&request.name) {
                Some(action) => {
                    let request = request.clone();
                    let timeout = self.action_timeout;
                    set.spawn(async move { (idx, run_action(action, request, timeout).await) });
                }
                None => slots[idx] = Some(unknown_action(request)),
            }
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, result)) => slots[idx] = Some(result),
                Err(e) => warn!(error = %e, "Action task did not complete"),
            }
        }

        // A panicked task leaves its slot empty
        slots
            .into_iter()
            .zip(requests)
            .map(|(slot, request)| slot.unwrap_or_else(|| aborted(request)))
            .collect()
    }
}

async fn run_action(action: Arc<dyn Action>, request: ActionRequest, timeout: Duration) -> ActionResult {
    let started = Instant::now();
    let arguments: Value = request.arguments.clone();

    let result = match tokio::time::timeout(timeout, action.execute(arguments)).await {
        Ok(Ok(content)) => ActionResult::ok(&request.id, &request.name, content),
        Ok(Err(e)) => failed(&request, ActionError::Failed(format!("{:#}", e))),
        Err(_) => failed(&request, ActionError::Timeout),
    };

    let duration_ms = started.elapsed().as_millis() as u64;
    if result.is_ok() {
        info!(action = %request.name, request_id = %request.id, duration_ms, "Action completed");
    } else {
        warn!(
            action = %request.name,
            request_id = %request.id,
            duration_ms,
            error = %result.content,
            "Action failed"
        );
    }

    result
}

fn unknown_action(request: &ActionRequest) -> ActionResult {
    warn!(action = %request.name, request_id = %request.id, "Unknown action requested");
    failed(request, ActionError::Unknown(request.name.clone()))
}

fn aborted(request: &ActionRequest) -> ActionResult {
    failed(request, ActionError::Aborted("task panicked".to_string()))
}

fn failed(request: &ActionRequest, error: ActionError) -> ActionResult {
    ActionResult::error(&request.id, &request.name, error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct Upper;

    #[async_trait]
    impl Action for Upper {
        fn name(&self) -> &str {
            "upper"
        }
        fn description(&self) -> &str {
            "Uppercase the text argument"
        }
        async fn execute(&self, arguments: Value) -> anyhow::Result<String> {
            let text = arguments["text"]
                .as_str()
                .ok_or_else(|| anyhow::anyhow!("missing text"))?;
            Ok(text.to_uppercase())
        }
    }

    fn dispatcher() -> Dispatcher {
        let mut registry = ActionRegistry::new();
        registry.register(Upper).unwrap();
        Dispatcher::new(Arc::new(registry), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_mixed_batch() {
        let requests = vec![
            ActionRequest::with_id("1", "upper", json!({"text": "abc"})),
            ActionRequest::with_id("2", "frobnicate", json!({})),
            ActionRequest::with_id("3", "upper", json!({})),
        ];

        let outcome = dispatcher()
            .dispatch("s", &requests, &Journal::Ephemeral)
            .await
            .unwrap();

        let results = outcome.results;
        assert_eq!(results.len(), 3);
        assert_eq!(results[0], ActionResult::ok("1", "upper", "ABC"));
        assert_eq!(
            results[1],
            ActionResult::error("2", "frobnicate", "unknown action frobnicate")
        );
        assert_eq!(results[2], ActionResult::error("3", "upper", "missing text"));
        assert_eq!(outcome.turns.len(), 3);
    }

    #[tokio::test]
    async fn test_sequential_mode_matches_parallel() {
        let requests = vec![
            ActionRequest::with_id("a", "upper", json!({"text": "x"})),
            ActionRequest::with_id("b", "upper", json!({"text": "y"})),
        ];

        let parallel = dispatcher()
            .dispatch("s", &requests, &Journal::Ephemeral)
            .await
            .unwrap();
        let sequential = dispatcher()
            .sequential()
            .dispatch("s", &requests, &Journal::Ephemeral)
            .await
            .unwrap();

        assert_eq!(parallel.results, sequential.results);
    }
}
