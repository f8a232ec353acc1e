//! Safety Limits Integration Tests
//!
//! Iteration caps, run timeouts and per-action timeouts as seen from a
//! running turn loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use foreman::adapters::ScriptedDecision;
use foreman::config::parse_settings;
use foreman::core::{
    Action, ActionRegistry, Dispatcher, Journal, SafetyLimits, Termination, TurnLoop, Worker,
};
use foreman::domain::{ActionRequest, ActionStatus, Decision, Role, Transcript};
use serde_json::{json, Value};
use tokio_test::{assert_err, assert_ok};

struct Stall;

#[async_trait]
impl Action for Stall {
    fn name(&self) -> &str {
        "stall"
    }

    fn description(&self) -> &str {
        "Never finishes in time"
    }

    async fn execute(&self, _arguments: Value) -> anyhow::Result<String> {
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok("too late".to_string())
    }
}

fn stall_loop(script: Vec<Decision>, limits: SafetyLimits) -> (TurnLoop, Arc<ScriptedDecision>) {
    let mut registry = ActionRegistry::new();
    registry.register(Stall).unwrap();
    let decision = Arc::new(ScriptedDecision::named("docker", script));
    let dispatcher = Dispatcher::new(Arc::new(registry), Duration::from_millis(50));
    (
        TurnLoop::new("docker", decision.clone(), dispatcher, limits),
        decision,
    )
}

fn stall_request(id: &str) -> ActionRequest {
    ActionRequest::with_id(id, "stall", json!({}))
}

#[tokio::test]
async fn test_action_timeout_is_visible_to_next_decision() {
    let (turn_loop, decision) = stall_loop(
        vec![
            Decision::actions(vec![stall_request("c1")]),
            Decision::answer("gave up"),
        ],
        SafetyLimits::default(),
    );

    let outcome = turn_loop
        .run("s", Transcript::from_task("s", "build"), &Journal::Ephemeral)
        .await
        .unwrap();
    assert_eq!(outcome.answer, "gave up");

    let second = &decision.seen()[1];
    let result = second.last().unwrap();
    assert_eq!(result.role, Role::ActionResult);
    assert_eq!(result.status, Some(ActionStatus::Error));
    assert_eq!(result.content, "timeout");
}

#[tokio::test]
async fn test_zero_run_timeout_answers_without_deciding() {
    let limits = SafetyLimits {
        run_timeout_seconds: 0,
        ..Default::default()
    };
    let (turn_loop, decision) = stall_loop(vec![Decision::answer("never")], limits);

    let outcome = turn_loop
        .run("s", Transcript::from_task("s", "build"), &Journal::Ephemeral)
        .await
        .unwrap();

    assert_eq!(outcome.termination, Termination::RunTimeout);
    assert_eq!(outcome.answer, "run timeout exceeded");
    assert_eq!(outcome.iterations, 0);
    assert_eq!(decision.calls(), 0);
}

#[tokio::test]
async fn test_worker_at_iteration_cap_reports_failure() {
    let limits = SafetyLimits {
        max_iterations: 1,
        ..Default::default()
    };
    let (turn_loop, _) = stall_loop(
        vec![
            Decision::actions(vec![stall_request("c1")]),
            Decision::actions(vec![stall_request("c2")]),
        ],
        limits,
    );
    let worker = Worker::new("docker", "Builds images", turn_loop).unwrap();

    let err = assert_err!(worker.run("build repo X").await);
    assert_eq!(err.to_string(), "worker docker: max steps exceeded");
}

#[test]
fn test_safety_section_parsing() {
    let yaml = r#"
safety:
  max_iterations: 4
  run_timeout_seconds: 60
"#;

    let settings = assert_ok!(parse_settings(yaml));
    assert_eq!(settings.safety.max_iterations, 4);
    assert_eq!(settings.safety.run_timeout_seconds, 60);
    assert_eq!(settings.safety.action_timeout_seconds, 300);
}

#[test]
fn test_zero_iteration_cap_is_rejected() {
    let err = assert_err!(parse_settings("safety:\n  max_iterations: 0\n"));
    assert!(err.to_string().contains("max_iterations"));
}
