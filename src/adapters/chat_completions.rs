//! Decision function backed by an OpenAI-compatible chat completions API.
//!
//! The transcript is replayed as chat messages: user turns as `user`,
//! answers as `assistant` text, recorded action batches as `assistant`
//! tool calls, and action results as `tool` messages correlated by request
//! id. The catalog is offered as function tools.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::config::ModelConfig;
use crate::core::RetryPolicy;
use crate::domain::{generate_request_id, ActionRequest, ActionSpec, Decision, Role, Transcript};

use super::DecisionFunction;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    fn text(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.to_string()),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type", default = "function_type")]
    pub typ: String,
    pub function: FunctionCall,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded argument object
    #[serde(default)]
    pub arguments: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolDef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
}

#[derive(Debug, Serialize)]
struct ToolDef {
    #[serde(rename = "type")]
    typ: &'static str,
    function: FunctionDef,
}

#[derive(Debug, Serialize)]
struct FunctionDef {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Error)]
enum CallError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("API error {status}: {body}")]
    Status { status: u16, body: String },

    #[error("response parse error: {0}")]
    Parse(String),
}

impl CallError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Parse(_) => false,
        }
    }
}

/// Chat completions client for one actor (supervisor or worker)
pub struct ChatCompletionsDecision {
    name: String,
    endpoint: String,
    model: String,
    temperature: f32,
    api_key: Option<String>,
    system_prompt: String,
    retry_policy: RetryPolicy,
    client: reqwest::Client,
}

impl ChatCompletionsDecision {
    /// Build a client for an actor from model settings.
    ///
    /// The API key is read from the environment variable the settings name;
    /// an unset variable sends no Authorization header.
    pub fn new(
        name: impl Into<String>,
        config: &ModelConfig,
        system_prompt: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            name: name.into(),
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            temperature: config.temperature,
            api_key: std::env::var(&config.api_key_env).ok(),
            system_prompt: system_prompt.into(),
            retry_policy: config.retry_policy.clone(),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn call(&self, body: &ChatCompletionRequest<'_>) -> Result<AssistantMessage, CallError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request
            .send()
            .await
            .map_err(|e| CallError::Transport(e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| CallError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(CallError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: ChatCompletionResponse = serde_json::from_str(&text)
            .map_err(|e| CallError::Parse(format!("{}; body: {}", e, text)))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or_else(|| CallError::Parse("response has no choices".to_string()))
    }
}

/// Tool reply for a request whose result never reached the history
pub const UNRECORDED_RESULT: &str = "error: no result was recorded for this call";

/// Replay a transcript as chat messages, system prompt first.
///
/// Every replayed tool call is answered by exactly one `tool` message, in
/// request order, directly after the call. Calls without a recorded result
/// get [`UNRECORDED_RESULT`]. Results with no request in view are dropped.
pub fn to_messages(system_prompt: &str, transcript: &Transcript) -> Vec<ChatMessage> {
    let turns = transcript.turns();
    let mut messages = Vec::with_capacity(turns.len() + 1);
    messages.push(ChatMessage::text("system", system_prompt));

    let mut idx = 0;
    while idx < turns.len() {
        let turn = &turns[idx];
        idx += 1;

        match turn.role {
            Role::User => messages.push(ChatMessage::text("user", &turn.content)),
            Role::Actor => match turn.recorded_requests() {
                Some(requests) => {
                    let start = idx;
                    while turns.get(idx).is_some_and(|t| t.role == Role::ActionResult) {
                        idx += 1;
                    }
                    let results = &turns[start..idx];

                    messages.push(ChatMessage {
                        role: "assistant".to_string(),
                        content: None,
                        tool_calls: Some(requests.iter().map(to_tool_call).collect()),
                        tool_call_id: None,
                        name: None,
                    });
                    for request in &requests {
                        let content = results
                            .iter()
                            .find(|r| r.request_id.as_deref() == Some(request.id.as_str()))
                            .map_or(UNRECORDED_RESULT, |r| r.content.as_str());
                        messages.push(tool_message(request, content));
                    }
                }
                None => messages.push(ChatMessage::text("assistant", &turn.content)),
            },
            Role::ActionResult => {
                debug!(request_id = ?turn.request_id, "Dropping result without a request in view");
            }
        }
    }

    messages
}

fn tool_message(request: &ActionRequest, content: &str) -> ChatMessage {
    ChatMessage {
        role: "tool".to_string(),
        content: Some(content.to_string()),
        tool_calls: None,
        tool_call_id: Some(request.id.clone()),
        name: Some(request.name.clone()),
    }
}

fn to_tool_call(request: &ActionRequest) -> ToolCall {
    ToolCall {
        id: Some(request.id.clone()),
        typ: function_type(),
        function: FunctionCall {
            name: request.name.clone(),
            arguments: request.arguments.to_string(),
        },
    }
}

fn to_tool_defs(catalog: &[ActionSpec]) -> Vec<ToolDef> {
    catalog
        .iter()
        .map(|spec| ToolDef {
            typ: "function",
            function: FunctionDef {
                name: spec.name.clone(),
                description: spec.description.clone(),
                parameters: spec.parameters.clone(),
            },
        })
        .collect()
}

/// Tool calls become an action batch; otherwise the text is the answer.
///
/// Missing call ids are generated. Arguments that are not valid JSON are
/// passed through as a JSON string.
fn to_decision(message: AssistantMessage) -> Decision {
    let calls = message.tool_calls.unwrap_or_default();
    if calls.is_empty() {
        return Decision::answer(message.content.unwrap_or_default());
    }

    let requests = calls
        .into_iter()
        .map(|call| {
            let id = call
                .id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(generate_request_id);
            let arguments = if call.function.arguments.trim().is_empty() {
                Value::Object(Default::default())
            } else {
                serde_json::from_str(&call.function.arguments)
                    .unwrap_or(Value::String(call.function.arguments))
            };
            ActionRequest::with_id(id, call.function.name, arguments)
        })
        .collect();

    Decision::actions(requests)
}

#[async_trait]
impl DecisionFunction for ChatCompletionsDecision {
    fn name(&self) -> &str {
        &self.name
    }

    async fn decide(&self, transcript: &Transcript, catalog: &[ActionSpec]) -> Result<Decision> {
        let tools = to_tool_defs(catalog);
        let body = ChatCompletionRequest {
            model: &self.model,
            messages: to_messages(&self.system_prompt, transcript),
            temperature: self.temperature,
            tool_choice: if tools.is_empty() { None } else { Some("auto") },
            tools,
        };

        debug!(actor = %self.name, messages = body.messages.len(), "Calling chat completions");
        let message = self
            .retry_policy
            .run(&self.name, CallError::is_retryable, || self.call(&body))
            .await
            .with_context(|| format!("Chat completion for {} failed", self.name))?;

        Ok(to_decision(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ActionResult, Turn};
    use serde_json::json;

    #[test]
    fn test_transcript_replay_correlates_results() {
        let request = ActionRequest::with_id("call_1", "docker", json!({"task_description": "build"}));
        let mut transcript = Transcript::from_task("s", "deploy repo X");
        transcript.push(Turn::actor_requests("s", &[request]));
        transcript.push(Turn::action_result(
            "s",
            &ActionResult::ok("call_1", "docker", "image built: img:1"),
        ));
        transcript.push(Turn::actor("s", "Deployed img:1"));

        let messages = to_messages("be helpful", &transcript);
        let roles: Vec<&str> = messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "tool", "assistant"]);

        let calls = messages[2].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id.as_deref(), Some("call_1"));
        assert_eq!(calls[0].function.name, "docker");
        assert_eq!(messages[3].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(messages[4].content.as_deref(), Some("Deployed img:1"));
    }

    #[test]
    fn test_unrecorded_results_are_answered() {
        let a = ActionRequest::with_id("a", "docker", json!({"task_description": "build"}));
        let b = ActionRequest::with_id("b", "kubernetes", json!({"task_description": "deploy"}));

        let mut transcript = Transcript::from_task("s", "ship it");
        transcript.push(Turn::actor_requests("s", &[a, b]));
        transcript.push(Turn::action_result("s", &ActionResult::ok("a", "docker", "img:1")));
        transcript.push(Turn::actor("s", "Request failed: disk full"));
        transcript.push(Turn::user("s", "try again"));

        let messages = to_messages("be helpful", &transcript);
        let roles: Vec<&str> = messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(
            roles,
            vec!["system", "user", "assistant", "tool", "tool", "assistant", "user"]
        );

        assert_eq!(messages[3].tool_call_id.as_deref(), Some("a"));
        assert_eq!(messages[3].content.as_deref(), Some("img:1"));
        assert_eq!(messages[4].tool_call_id.as_deref(), Some("b"));
        assert_eq!(messages[4].name.as_deref(), Some("kubernetes"));
        assert_eq!(messages[4].content.as_deref(), Some(UNRECORDED_RESULT));
    }

    #[test]
    fn test_result_without_request_is_dropped() {
        let mut transcript = Transcript::from_task("s", "hello");
        transcript.push(Turn::action_result("s", &ActionResult::ok("x", "docker", "stray")));
        transcript.push(Turn::actor("s", "hi"));

        let messages = to_messages("be helpful", &transcript);
        let roles: Vec<&str> = messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant"]);
    }

    #[test]
    fn test_response_with_tool_calls() {
        let message: AssistantMessage = serde_json::from_value(json!({
            "content": null,
            "tool_calls": [
                {"id": "a", "type": "function", "function": {"name": "analysis", "arguments": "{\"task_description\":\"look\"}"}},
                {"function": {"name": "docker", "arguments": "not json"}}
            ]
        }))
        .unwrap();

        let decision = to_decision(message);
        let requests = match decision {
            Decision::Actions { requests } => requests,
            other => panic!("expected actions, got {:?}", other),
        };
        assert_eq!(requests[0].id, "a");
        assert_eq!(requests[0].arguments, json!({"task_description": "look"}));
        assert!(requests[1].id.starts_with("call_"));
        assert_eq!(requests[1].arguments, json!("not json"));
    }

    #[test]
    fn test_plain_response_is_answer() {
        let message: AssistantMessage =
            serde_json::from_value(json!({"content": "All done"})).unwrap();
        assert_eq!(to_decision(message), Decision::answer("All done"));
    }

    #[test]
    fn test_endpoint_and_retryability() {
        let config = ModelConfig {
            base_url: "http://localhost:11434/v1/".to_string(),
            ..Default::default()
        };
        let decision = ChatCompletionsDecision::new("supervisor", &config, "prompt").unwrap();
        assert_eq!(decision.endpoint(), "http://localhost:11434/v1/chat/completions");

        assert!(CallError::Status { status: 503, body: String::new() }.is_retryable());
        assert!(CallError::Status { status: 429, body: String::new() }.is_retryable());
        assert!(!CallError::Status { status: 400, body: String::new() }.is_retryable());
    }
}
