//! Turns: the immutable unit of conversation history.
//!
//! Every turn belongs to exactly one session. The order in which turns were
//! written is the only source of truth for transcript reconstruction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::decision::{ActionRequest, ActionResult, ActionStatus};

/// A single persisted unit of conversation or action history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Unique identifier for this turn
    pub id: Uuid,

    /// The session this turn belongs to
    pub session_id: String,

    /// Who produced the turn
    pub role: Role,

    /// Text content (request batches are stored as JSON)
    pub content: String,

    /// Action name for action results and for actor turns that requested actions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_name: Option<String>,

    /// Correlates an action result with the request that produced it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    /// Outcome of the action (action results only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ActionStatus>,

    /// When the turn was written
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    fn new(session_id: &str, role: Role, content: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id: session_id.to_string(),
            role,
            content,
            action_name: None,
            request_id: None,
            status: None,
            timestamp: Utc::now(),
        }
    }

    /// A message submitted by the user
    pub fn user(session_id: &str, content: impl Into<String>) -> Self {
        Self::new(session_id, Role::User, content.into())
    }

    /// A plain-text actor turn (final answer or synthetic terminal turn)
    pub fn actor(session_id: &str, content: impl Into<String>) -> Self {
        Self::new(session_id, Role::Actor, content.into())
    }

    /// An actor turn recording a batch of action requests for audit and replay
    pub fn actor_requests(session_id: &str, requests: &[ActionRequest]) -> Self {
        // Serializing a Vec of plain structs with a Value payload cannot fail
        let content = serde_json::to_string(requests).unwrap_or_default();
        let names: Vec<&str> = requests.iter().map(|r| r.name.as_str()).collect();

        let mut turn = Self::new(session_id, Role::Actor, content);
        turn.action_name = Some(names.join(","));
        turn
    }

    /// A turn carrying the outcome of one action request
    pub fn action_result(session_id: &str, result: &ActionResult) -> Self {
        let mut turn = Self::new(session_id, Role::ActionResult, result.content.clone());
        turn.action_name = Some(result.name.clone());
        turn.request_id = Some(result.request_id.clone());
        turn.status = Some(result.status);
        turn
    }

    /// Requests recorded by an actor turn, if this is one
    pub fn recorded_requests(&self) -> Option<Vec<ActionRequest>> {
        if self.role != Role::Actor || self.action_name.is_none() {
            return None;
        }
        serde_json::from_str(&self.content).ok()
    }

    /// Check if this turn records an action batch rather than an answer
    pub fn is_request_record(&self) -> bool {
        self.recorded_requests().is_some()
    }
}

/// Role of a turn's author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The human user
    User,

    /// The supervisor or a worker
    Actor,

    /// Output of an executed action
    ActionResult,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Actor => "actor",
            Self::ActionResult => "action_result",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "actor" => Ok(Self::Actor),
            "action_result" => Ok(Self::ActionResult),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_turn_serialization() {
        let turn = Turn::user("s1", "deploy repo X");

        let json = serde_json::to_string(&turn).unwrap();
        assert!(json.contains(r#""role":"user""#));
        assert!(!json.contains("action_name"));

        let parsed: Turn = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, turn);
    }

    #[test]
    fn test_request_record_roundtrip() {
        let requests = vec![
            ActionRequest::with_id("a", "analysis", json!({"task_description": "look"})),
            ActionRequest::with_id("b", "docker", json!("build it")),
        ];
        let turn = Turn::actor_requests("s1", &requests);

        assert_eq!(turn.role, Role::Actor);
        assert_eq!(turn.action_name.as_deref(), Some("analysis,docker"));
        assert_eq!(turn.recorded_requests().unwrap(), requests);
    }

    #[test]
    fn test_plain_actor_turn_is_not_request_record() {
        let turn = Turn::actor("s1", "[1, 2]");
        assert!(!turn.is_request_record());
    }

    #[test]
    fn test_action_result_turn() {
        let result = ActionResult::error("r1", "frobnicate", "unknown action frobnicate");
        let turn = Turn::action_result("s1", &result);

        assert_eq!(turn.role, Role::ActionResult);
        assert_eq!(turn.action_name.as_deref(), Some("frobnicate"));
        assert_eq!(turn.request_id.as_deref(), Some("r1"));
        assert_eq!(turn.status, Some(ActionStatus::Error));
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("action_result".parse::<Role>().unwrap(), Role::ActionResult);
        assert!("tool".parse::<Role>().is_err());
    }
}
