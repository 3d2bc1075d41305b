//! Registry for named actions
//!
//! Tasks loaded from configuration refer to their action by name; the
//! registry resolves those names when the task is built.

use dashmap::DashMap;
use std::sync::Arc;

use crate::flow::action::{Action, EchoAction};

/// Registry for actions
#[derive(Clone, Default)]
pub struct ActionRegistry {
    actions: Arc<DashMap<String, Arc<dyn Action>>>,
}

impl ActionRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry seeded with the built-in actions
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(EchoAction));
        registry
    }

    /// Register an action under its own name
    pub fn register(&self, action: Arc<dyn Action>) {
        let name = action.name().to_string();
        self.register_as(name, action);
    }

    /// Register an action under an explicit name
    pub fn register_as(&self, name: impl Into<String>, action: Arc<dyn Action>) {
        let name = name.into();
        if self.actions.insert(name.clone(), action).is_some() {
            tracing::warn!("Action '{}' registered twice, keeping the latest", name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Action>> {
        self.actions.get(name).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    /// List all registered action names
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.actions.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }
}
