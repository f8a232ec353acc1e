//! Safety limits and enforcement for turn loops.
//!
//! Prevents runaway execution through configurable limits on:
//! - Number of decide/act cycles per loop
//! - Wall-clock time per loop
//! - Time spent in a single action

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Synthetic final answer used when the iteration cap is hit
pub const MAX_STEPS_EXCEEDED: &str = "max steps exceeded";

/// Synthetic final answer used when the run timeout is hit
pub const RUN_TIMEOUT_EXCEEDED: &str = "run timeout exceeded";

/// Safety limits for one turn loop invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyLimits {
    /// Maximum decide/act cycles before a synthetic answer is forced (default: 25)
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Per-action timeout in seconds (default: 300 = 5 min)
    #[serde(default = "default_action_timeout")]
    pub action_timeout_seconds: u64,

    /// Total loop timeout in seconds (default: 3600 = 1 hour)
    #[serde(default = "default_run_timeout")]
    pub run_timeout_seconds: u64,
}

fn default_max_iterations() -> u32 {
    25
}
fn default_action_timeout() -> u64 {
    300
} // 5 min
fn default_run_timeout() -> u64 {
    3600
} // 1 hour

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            action_timeout_seconds: default_action_timeout(),
            run_timeout_seconds: default_run_timeout(),
        }
    }
}

impl SafetyLimits {
    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_seconds)
    }

    /// Check current tracker state against limits
    pub fn check(&self, tracker: &SafetyTracker) -> Result<(), SafetyViolation> {
        if tracker.iterations >= self.max_iterations {
            return Err(SafetyViolation::MaxIterations {
                actual: tracker.iterations,
                limit: self.max_iterations,
            });
        }

        let elapsed = tracker.elapsed_seconds();
        if elapsed >= self.run_timeout_seconds {
            return Err(SafetyViolation::RunTimeout {
                elapsed_seconds: elapsed,
                limit_seconds: self.run_timeout_seconds,
            });
        }

        Ok(())
    }
}

/// Tracks resource usage during one turn loop
#[derive(Debug, Clone)]
pub struct SafetyTracker {
    /// Decide/act cycles completed
    pub iterations: u32,

    /// Action requests dispatched across all cycles
    pub actions_dispatched: u64,

    /// When the loop started
    pub started_at: Instant,
}

impl Default for SafetyTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl SafetyTracker {
    pub fn new() -> Self {
        Self {
            iterations: 0,
            actions_dispatched: 0,
            started_at: Instant::now(),
        }
    }

    /// Record one completed cycle and the size of its batch
    pub fn record_cycle(&mut self, actions: usize) {
        self.iterations += 1;
        self.actions_dispatched += actions as u64;
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

/// Safety violations. These end a loop with a synthetic answer, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SafetyViolation {
    #[error("Maximum iterations exceeded: {actual} >= {limit}")]
    MaxIterations { actual: u32, limit: u32 },

    #[error("Run timeout: {elapsed_seconds}s >= {limit_seconds}s")]
    RunTimeout {
        elapsed_seconds: u64,
        limit_seconds: u64,
    },
}

impl SafetyViolation {
    /// Text of the synthetic terminal answer for this violation
    pub fn synthetic_answer(&self) -> &'static str {
        match self {
            Self::MaxIterations { .. } => MAX_STEPS_EXCEEDED,
            Self::RunTimeout { .. } => RUN_TIMEOUT_EXCEEDED,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let limits = SafetyLimits::default();
        assert_eq!(limits.max_iterations, 25);
        assert_eq!(limits.action_timeout(), Duration::from_secs(300));
        assert_eq!(limits.run_timeout_seconds, 3600);
    }

    #[test]
    fn test_tracker_iteration_counting() {
        let limits = SafetyLimits {
            max_iterations: 2,
            ..Default::default()
        };

        let mut tracker = SafetyTracker::new();
        assert!(limits.check(&tracker).is_ok());

        tracker.record_cycle(3);
        assert!(limits.check(&tracker).is_ok());

        tracker.record_cycle(1);
        let result = limits.check(&tracker);
        assert!(matches!(result, Err(SafetyViolation::MaxIterations { actual: 2, limit: 2 })));
        assert_eq!(tracker.actions_dispatched, 4);
    }

    #[test]
    fn test_zero_run_timeout_trips_immediately() {
        let limits = SafetyLimits {
            run_timeout_seconds: 0,
            ..Default::default()
        };
        let violation = limits.check(&SafetyTracker::new()).unwrap_err();
        assert_eq!(violation.synthetic_answer(), RUN_TIMEOUT_EXCEEDED);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let limits: SafetyLimits = serde_yaml::from_str("max_iterations: 5").unwrap();
        assert_eq!(limits.max_iterations, 5);
        assert_eq!(limits.action_timeout_seconds, 300);
    }
}
