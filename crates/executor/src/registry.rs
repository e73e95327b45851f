//! Maps task type strings to handlers.

use std::collections::HashMap;
use std::sync::Arc;

use crate::handlers::{EchoHandler, SleepHandler};
use crate::{HandlerError, TaskHandler};

#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in `echo` and `sleep` handlers.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("echo", Arc::new(EchoHandler));
        registry.register("sleep", Arc::new(SleepHandler));
        registry
    }

    /// Register `handler` for `task_type`, replacing any previous handler.
    pub fn register(&mut self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) -> &mut Self {
        self.handlers.insert(task_type.into(), handler);
        self
    }

    pub fn get(&self, task_type: &str) -> Result<Arc<dyn TaskHandler>, HandlerError> {
        self.handlers
            .get(task_type)
            .cloned()
            .ok_or_else(|| HandlerError::UnknownHandler(task_type.to_string()))
    }

    pub fn task_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_registered() {
        let registry = HandlerRegistry::with_builtins();
        assert_eq!(registry.task_types(), vec!["echo", "sleep"]);
        assert!(registry.get("echo").is_ok());
    }

    #[test]
    fn unknown_type_is_an_error() {
        let registry = HandlerRegistry::new();
        assert_eq!(
            registry.get("shell").err(),
            Some(HandlerError::UnknownHandler("shell".into()))
        );
    }
}
