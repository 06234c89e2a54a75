//! Built-in handlers available to every worker.

use crate::registry::{HandlerRegistry, RunnableJob};
use crate::types::{Results, VertexKey};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

pub(crate) fn register_builtins(registry: &mut HandlerRegistry) {
    registry
        .register("echo", |params| boxed(EchoJob::from_params(params)))
        .register("sum", |params| boxed(SumJob::from_params(params)))
        .register("sleep", |params| boxed(SleepJob::from_params(params)));
}

fn boxed<J: RunnableJob + 'static>(job: Result<J>) -> Result<Box<dyn RunnableJob>> {
    Ok(Box::new(job?))
}

fn parse<T: for<'de> Deserialize<'de>>(handler: &str, params: &Value) -> Result<T> {
    // a task without params behaves like one with an empty object
    let params = if params.is_null() { json!({}) } else { params.clone() };
    serde_json::from_value(params)
        .with_context(|| format!("Invalid params for {} handler", handler))
}

/// Returns `params.value` unchanged.
#[derive(Debug, Clone, Deserialize)]
pub struct EchoJob {
    #[serde(default)]
    pub value: Value,
}

impl EchoJob {
    pub fn from_params(params: &Value) -> Result<Self> {
        parse("echo", params)
    }
}

#[async_trait::async_trait]
impl RunnableJob for EchoJob {
    async fn run(&self, _results: Results) -> Result<Value> {
        Ok(self.value.clone())
    }
}

/// Adds the integer results of `keys` and the constant `add`.
#[derive(Debug, Clone, Deserialize)]
pub struct SumJob {
    #[serde(default)]
    pub keys: Vec<VertexKey>,
    #[serde(default)]
    pub add: i64,
}

impl SumJob {
    pub fn from_params(params: &Value) -> Result<Self> {
        parse("sum", params)
    }
}

#[async_trait::async_trait]
impl RunnableJob for SumJob {
    async fn run(&self, results: Results) -> Result<Value> {
        let mut total = self.add;
        for key in &self.keys {
            let Some(value) = results.get(key) else {
                bail!("No result for vertex {}", key);
            };
            let Some(n) = value.as_i64() else {
                bail!("Result of vertex {} is not an integer: {}", key, value);
            };
            total = total.checked_add(n).context("Sum overflowed")?;
        }
        Ok(json!(total))
    }
}

/// Waits `millis` and then returns `value`.
#[derive(Debug, Clone, Deserialize)]
pub struct SleepJob {
    #[serde(default)]
    pub millis: u64,
    #[serde(default)]
    pub value: Value,
    /// Timeout in seconds the job asks for
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl SleepJob {
    pub fn from_params(params: &Value) -> Result<Self> {
        parse("sleep", params)
    }
}

#[async_trait::async_trait]
impl RunnableJob for SleepJob {
    async fn run(&self, _results: Results) -> Result<Value> {
        tokio::time::sleep(Duration::from_millis(self.millis)).await;
        Ok(self.value.clone())
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}
