//! Deterministic decision function for tests and offline runs.

use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::domain::{ActionSpec, Decision, Transcript};

use super::DecisionFunction;

enum Mode {
    /// Play back decisions in order; fail once exhausted
    Script(VecDeque<Decision>),

    /// Answer with the latest user message
    Echo,
}

/// Replays a fixed sequence of decisions and records every transcript it
/// was shown.
pub struct ScriptedDecision {
    name: String,
    mode: Mutex<Mode>,
    seen: Mutex<Vec<Transcript>>,
}

impl ScriptedDecision {
    pub fn new(script: Vec<Decision>) -> Self {
        Self::named("scripted", script)
    }

    pub fn named(name: impl Into<String>, script: Vec<Decision>) -> Self {
        Self {
            name: name.into(),
            mode: Mutex::new(Mode::Script(script.into())),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Always answers `echo: <latest user message>`
    pub fn echo(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mode: Mutex::new(Mode::Echo),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Transcripts passed to `decide`, in call order
    pub fn seen(&self) -> Vec<Transcript> {
        self.seen.lock().map(|seen| seen.clone()).unwrap_or_default()
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().map(|seen| seen.len()).unwrap_or_default()
    }

    /// Decisions not yet played back
    pub fn remaining(&self) -> usize {
        match self.mode.lock().as_deref() {
            Ok(Mode::Script(script)) => script.len(),
            _ => 0,
        }
    }
}

#[async_trait]
impl DecisionFunction for ScriptedDecision {
    fn name(&self) -> &str {
        &self.name
    }

    async fn decide(&self, transcript: &Transcript, _catalog: &[ActionSpec]) -> Result<Decision> {
        self.seen
            .lock()
            .map_err(|_| anyhow!("transcript log poisoned"))?
            .push(transcript.clone());

        let mut mode = self.mode.lock().map_err(|_| anyhow!("script poisoned"))?;
        match &mut *mode {
            Mode::Script(script) => script
                .pop_front()
                .ok_or_else(|| anyhow!("{}: script exhausted", self.name)),
            Mode::Echo => {
                let message = transcript.last_user_message().unwrap_or_default();
                Ok(Decision::answer(format!("echo: {}", message)))
            }
        }
    }
}
