//! Transcript reconstruction from persisted turns.
//!
//! A transcript is rebuilt from the history store on every invocation and is
//! the only input a decision function sees. Nothing about a session is kept
//! in memory between invocations.

use serde::Serialize;
use sha2::{Digest, Sha256};

use super::turn::{Role, Turn};

/// Ordered sequence of turns fed to a decision function
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a transcript from a chronological window of history.
    ///
    /// A window may cut through an earlier action cycle; leading turns before
    /// the first user turn are dropped so the transcript opens on a user turn.
    pub fn from_history(turns: Vec<Turn>) -> Self {
        let start = turns
            .iter()
            .position(|t| t.role == Role::User)
            .unwrap_or(turns.len());

        Self {
            turns: turns.into_iter().skip(start).collect(),
        }
    }

    /// Transcript holding a single user turn (how a worker starts)
    pub fn from_task(session_id: &str, task: &str) -> Self {
        Self {
            turns: vec![Turn::user(session_id, task)],
        }
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Content of the most recent user turn
    pub fn last_user_message(&self) -> Option<&str> {
        self.turns
            .iter()
            .rev()
            .find(|t| t.role == Role::User)
            .map(|t| t.content.as_str())
    }

    /// Digest of the ordered (role, action_name, content) sequence.
    ///
    /// Ids and timestamps are excluded: two reconstructions of the same
    /// history must produce the same fingerprint.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for turn in &self.turns {
            hasher.update(turn.role.as_str().as_bytes());
            hasher.update([0u8]);
            hasher.update(turn.action_name.as_deref().unwrap_or("").as_bytes());
            hasher.update([0u8]);
            hasher.update(turn.content.as_bytes());
            hasher.update([0xffu8]);
        }
        hex::encode(&hasher.finalize()[..16])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::decision::{ActionRequest, ActionResult};
    use serde_json::json;

    fn sample_history() -> Vec<Turn> {
        let request = ActionRequest::with_id("r1", "analysis", json!("look at repo"));
        vec![
            Turn::action_result("s", &ActionResult::ok("r0", "docker", "orphan")),
            Turn::actor("s", "stray answer"),
            Turn::user("s", "deploy repo X"),
            Turn::actor_requests("s", &[request]),
            Turn::action_result("s", &ActionResult::ok("r1", "analysis", "Dockerfile found")),
        ]
    }

    #[test]
    fn test_window_opens_on_user_turn() {
        let transcript = Transcript::from_history(sample_history());

        assert_eq!(transcript.len(), 3);
        assert_eq!(transcript.turns()[0].role, Role::User);
        assert_eq!(transcript.last_user_message(), Some("deploy repo X"));
    }

    #[test]
    fn test_window_without_user_turn_is_empty() {
        let turns = vec![Turn::actor("s", "hello")];
        assert!(Transcript::from_history(turns).is_empty());
    }

    #[test]
    fn test_fingerprint_ignores_ids_and_timestamps() {
        let a = Transcript::from_history(sample_history());
        let b = Transcript::from_history(sample_history());

        assert_ne!(a.turns()[0].id, b.turns()[0].id);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 32);
    }

    #[test]
    fn test_fingerprint_is_order_sensitive() {
        let mut reversed = sample_history();
        reversed.reverse();

        let a = Transcript { turns: sample_history() };
        let b = Transcript { turns: reversed };
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
