//! Name -> factory registry for runnable jobs.
//!
//! Task payloads name a handler; the graph builder looks the name up here and
//! instantiates the job with the payload params before any vertex runs.

use crate::types::Results;
use anyhow::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// A job a task payload can describe.
#[async_trait::async_trait]
pub trait RunnableJob: Send + Sync {
    /// Run the job against the results produced so far.
    async fn run(&self, results: Results) -> Result<Value>;

    /// Timeout the job asks for when the task row sets none.
    fn timeout(&self) -> Option<Duration> {
        None
    }
}

/// Builds a job from its payload params
pub type JobFactory = Arc<dyn Fn(&Value) -> Result<Box<dyn RunnableJob>> + Send + Sync>;

/// Registry of handler factories, populated at process start
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    factories: HashMap<String, JobFactory>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the `echo`, `sum` and `sleep` handlers.
    pub fn with_builtin_handlers() -> Self {
        let mut registry = Self::new();
        crate::handlers::register_builtins(&mut registry);
        registry
    }

    /// Register a factory under `name`, replacing any previous registration.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&Value) -> Result<Box<dyn RunnableJob>> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.factories.insert(name.clone(), Arc::new(factory)).is_some() {
            tracing::warn!("Replaced handler registration: {}", name);
        }
        self
    }

    /// Instantiate the job registered under `name`.
    ///
    /// Returns `None` for an unknown name; a factory that rejects its params
    /// yields `Some(Err(..))`.
    pub fn create(&self, name: &str, params: &Value) -> Option<Result<Box<dyn RunnableJob>>> {
        self.factories.get(name).map(|factory| factory(params))
    }

    /// Registered handler names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.names())
            .finish()
    }
}
