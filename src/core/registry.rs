//! Action registry: maps action names to capabilities.
//!
//! Every capability implements [`Action`] with one fixed signature,
//! `(arguments) -> text or failure`. Registries are assembled at startup;
//! nothing is resolved by reflection at call time.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;

use crate::domain::ActionSpec;

/// Whether an action is an external call or a nested worker loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    /// Direct external call (build, deploy, apply, ...)
    Terminal,

    /// Runs a worker's own turn loop
    Delegation,
}

/// A named capability the dispatcher can invoke
#[async_trait]
pub trait Action: Send + Sync {
    /// Registry name (what decisions refer to)
    fn name(&self) -> &str;

    /// Description shown to the decision function
    fn description(&self) -> &str;

    /// JSON schema of the argument payload
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    fn kind(&self) -> ActionKind {
        ActionKind::Terminal
    }

    /// Execute with a name-specific argument payload
    async fn execute(&self, arguments: Value) -> anyhow::Result<String>;
}

/// Per-request failures. These become error results, never batch failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    #[error("unknown action {0}")]
    Unknown(String),

    #[error("{0}")]
    Failed(String),

    #[error("timeout")]
    Timeout,

    #[error("action terminated unexpectedly: {0}")]
    Aborted(String),
}

/// Registry assembly errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Action '{0}' is already registered")]
    Duplicate(String),

    #[error("Worker '{worker}' cannot delegate: '{action}' is a delegation action")]
    NestedDelegation { worker: String, action: String },
}

/// Name-to-capability mapping, iterated in name order
#[derive(Default, Clone)]
pub struct ActionRegistry {
    actions: BTreeMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, action: impl Action + 'static) -> Result<(), RegistryError> {
        self.register_arc(Arc::new(action))
    }

    pub fn register_arc(&mut self, action: Arc<dyn Action>) -> Result<(), RegistryError> {
        let name = action.name().to_string();
        if self.actions.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        self.actions.insert(name, action);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Action>> {
        self.actions.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.actions.keys().cloned().collect()
    }

    /// Declared contracts of every registered action
    pub fn catalog(&self) -> Vec<ActionSpec> {
        self.actions
            .values()
            .map(|a| ActionSpec::new(a.name(), a.description(), a.parameters()))
            .collect()
    }

    /// Reject delegation actions; worker registries may only hold terminal actions
    pub fn ensure_terminal(&self, worker: &str) -> Result<(), RegistryError> {
        match self
            .actions
            .values()
            .find(|a| a.kind() == ActionKind::Delegation)
        {
            Some(action) => Err(RegistryError::NestedDelegation {
                worker: worker.to_string(),
                action: action.name().to_string(),
            }),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str, ActionKind);

    #[async_trait]
    impl Action for Named {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            "test action"
        }
        fn kind(&self) -> ActionKind {
            self.1
        }
        async fn execute(&self, _arguments: Value) -> anyhow::Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = ActionRegistry::new();
        registry.register(Named("deploy", ActionKind::Terminal)).unwrap();

        let err = registry
            .register(Named("deploy", ActionKind::Terminal))
            .unwrap_err();
        assert_eq!(err, RegistryError::Duplicate("deploy".to_string()));
    }

    #[test]
    fn test_catalog_is_name_ordered() {
        let mut registry = ActionRegistry::new();
        registry.register(Named("zeta", ActionKind::Terminal)).unwrap();
        registry.register(Named("alpha", ActionKind::Terminal)).unwrap();

        let names: Vec<String> = registry.catalog().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_ensure_terminal() {
        let mut registry = ActionRegistry::new();
        registry.register(Named("apply", ActionKind::Terminal)).unwrap();
        assert!(registry.ensure_terminal("terraform").is_ok());

        registry.register(Named("docker", ActionKind::Delegation)).unwrap();
        assert!(matches!(
            registry.ensure_terminal("terraform"),
            Err(RegistryError::NestedDelegation { .. })
        ));
    }

    #[test]
    fn test_action_error_messages() {
        assert_eq!(
            ActionError::Unknown("frobnicate".into()).to_string(),
            "unknown action frobnicate"
        );
        assert_eq!(ActionError::Timeout.to_string(), "timeout");
    }
}
