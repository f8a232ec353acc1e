//! Decisions, action requests and action results.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// What an actor chose to do at one cycle.
///
/// Tagged so a decision can never be both an answer and a request batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Decision {
    /// Terminal answer for the user (or, for a worker, for the supervisor)
    FinalAnswer { text: String },

    /// One or more actions to execute before deciding again
    Actions { requests: Vec<ActionRequest> },
}

impl Decision {
    pub fn answer(text: impl Into<String>) -> Self {
        Self::FinalAnswer { text: text.into() }
    }

    pub fn actions(requests: Vec<ActionRequest>) -> Self {
        Self::Actions { requests }
    }

    /// Check the structural contract of a decision.
    ///
    /// Returns the reason when the decision is malformed: an empty answer,
    /// an empty request batch, or duplicate request ids.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::FinalAnswer { text } => {
                if text.trim().is_empty() {
                    return Err("final answer is empty".to_string());
                }
                Ok(())
            }
            Self::Actions { requests } => {
                if requests.is_empty() {
                    return Err("action batch is empty".to_string());
                }

                let mut seen = HashSet::new();
                for request in requests {
                    if request.id.is_empty() {
                        return Err(format!("action '{}' has an empty request id", request.name));
                    }
                    if !seen.insert(request.id.as_str()) {
                        return Err(format!("duplicate request id '{}'", request.id));
                    }
                }
                Ok(())
            }
        }
    }
}

/// A request to execute one named action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    /// Unique within the decision that produced it
    pub id: String,

    /// Registry name of the action
    pub name: String,

    /// Name-specific argument payload
    #[serde(default)]
    pub arguments: Value,
}

impl ActionRequest {
    /// Create a request with a generated id
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self::with_id(generate_request_id(), name, arguments)
    }

    /// Create a request with an explicit id
    pub fn with_id(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// Generate a fresh request id for requests that arrive without one
pub fn generate_request_id() -> String {
    format!("call_{}", Uuid::new_v4().simple())
}

/// Outcome of one action request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub request_id: String,
    pub name: String,
    pub content: String,
    pub status: ActionStatus,
}

impl ActionResult {
    pub fn ok(request_id: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            name: name.into(),
            content: content.into(),
            status: ActionStatus::Ok,
        }
    }

    pub fn error(request_id: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            name: name.into(),
            content: content.into(),
            status: ActionStatus::Error,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ActionStatus::Ok
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Ok,
    Error,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
        }
    }
}

/// Declared contract of an action, as shown to a decision function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    pub name: String,
    pub description: String,

    /// JSON schema of the argument payload
    pub parameters: Value,
}

impl ActionSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}
