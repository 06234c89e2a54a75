//! Message-driven workflow runs: decode, build, execute, report.

use crate::error::{DagError, DagResult};
use crate::events::{Event, EventLog, EventType};
use crate::metrics::MetricsCollector;
use crate::registry::HandlerRegistry;
use crate::storage::JobStore;
use crate::types::{Results, RunId, WorkflowId};
use crate::workflow::{GraphBuilder, DEFAULT_CONCURRENCY, DEFAULT_TASK_TIMEOUT};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What the transport should do with a consumed message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeResult {
    /// The message was handled, whatever the run outcome
    Ack,
    /// The message cannot be handled and should not be redelivered
    Drop,
}

/// Receives a text alert for every failed run
#[async_trait::async_trait]
pub trait Alerter: Send + Sync {
    async fn alert(&self, message: &str) -> Result<()>;
}

/// Alerter that writes alerts to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlerter;

#[async_trait::async_trait]
impl Alerter for LogAlerter {
    async fn alert(&self, message: &str) -> Result<()> {
        tracing::error!("ALERT: {}", message);
        Ok(())
    }
}

/// Scheduling settings applied to every workflow a consumer runs
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub concurrency: usize,
    pub default_timeout: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            default_timeout: DEFAULT_TASK_TIMEOUT,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Message {
    Batch(Vec<Value>),
    Object { workflow_id: Value },
    Bare(Value),
}

/// Decode a workflow id from a message body.
///
/// Accepts `[id]`, a bare `id` and `{"workflow_id": id}`, where the id is a
/// JSON integer or string.
pub fn decode_message(body: &[u8]) -> Result<WorkflowId> {
    let message: Message = serde_json::from_slice(body).context("Message body is not JSON")?;
    let id = match message {
        Message::Batch(values) => match values.as_slice() {
            [id] => id.clone(),
            _ => bail!("Expected exactly one workflow id, got {}", values.len()),
        },
        Message::Object { workflow_id } => workflow_id,
        Message::Bare(id) => id,
    };

    match id {
        Value::Number(n) => match n.as_i64() {
            Some(n) => Ok(WorkflowId::from(n)),
            None => bail!("Workflow id is not an integer: {}", n),
        },
        Value::String(s) if !s.is_empty() => Ok(WorkflowId::new(s)),
        other => bail!("Unsupported workflow id: {}", other),
    }
}

/// Runs the workflows named by incoming messages and reports their outcome
pub struct WorkflowConsumer {
    store: Arc<dyn JobStore>,
    registry: Arc<HandlerRegistry>,
    event_log: Arc<dyn EventLog>,
    metrics: MetricsCollector,
    alerter: Arc<dyn Alerter>,
    config: ConsumerConfig,
}

impl WorkflowConsumer {
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: Arc<HandlerRegistry>,
        event_log: Arc<dyn EventLog>,
    ) -> Self {
        Self {
            store,
            registry,
            event_log,
            metrics: MetricsCollector::new(),
            alerter: Arc::new(LogAlerter),
            config: ConsumerConfig::default(),
        }
    }

    pub fn with_alerter(mut self, alerter: Arc<dyn Alerter>) -> Self {
        self.alerter = alerter;
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_config(mut self, config: ConsumerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Handle one message body.
    pub async fn consume(&self, body: &[u8]) -> ConsumeResult {
        let workflow_id = match decode_message(body) {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(
                    "Dropping undecodable message: {:#} (body: {})",
                    e,
                    String::from_utf8_lossy(body)
                );
                return ConsumeResult::Drop;
            }
        };

        match self.store.workflow_edges(&workflow_id).await {
            Ok(edges) if edges.is_empty() => {
                tracing::warn!("Dropping workflow without edges: workflow_id={}", workflow_id);
                return ConsumeResult::Drop;
            }
            Ok(_) => {}
            Err(e) => {
                // the build below reports the storage failure
                tracing::warn!(
                    "Failed to check workflow edges: workflow_id={}: {:#}",
                    workflow_id,
                    e
                );
            }
        }

        // the outcome has been reported; the message is done either way
        let _ = self.run_workflow(&workflow_id).await;
        ConsumeResult::Ack
    }

    /// Build and execute one workflow, reporting the outcome to the event
    /// log, metrics and alerter.
    pub async fn run_workflow(&self, workflow_id: &WorkflowId) -> DagResult<Results> {
        let run_id = RunId::new();
        let started = Instant::now();
        tracing::info!("Workflow start: workflow_id={}, run_id={}", workflow_id, run_id);
        self.metrics.workflow_started();

        let outcome = self.build_and_execute(workflow_id, run_id).await;
        let duration = started.elapsed();
        let duration_ms = duration.as_millis() as u64;

        let event = match &outcome {
            Ok(results) => {
                tracing::info!(
                    "Workflow end: workflow_id={}, run_id={}, vertices={}, duration_ms={}",
                    workflow_id,
                    run_id,
                    results.len(),
                    duration_ms
                );
                EventType::WorkflowCompleted {
                    workflow_id: workflow_id.clone(),
                    duration_ms,
                    vertices: results.len(),
                }
            }
            Err(e) => {
                tracing::error!(
                    "Workflow failed: workflow_id={}, run_id={}, duration_ms={}: {}",
                    workflow_id,
                    run_id,
                    duration_ms,
                    e
                );
                self.send_alert(workflow_id, run_id, e).await;
                EventType::WorkflowFailed {
                    workflow_id: workflow_id.clone(),
                    error: e.to_string(),
                    vertex: e.vertex().cloned(),
                    retryable: e.is_retryable(),
                    duration_ms,
                }
            }
        };

        self.metrics.workflow_finished(outcome.is_ok(), duration);
        self.record(Event::new(run_id, event)).await;
        if let Err(e) = self.event_log.flush().await {
            tracing::error!("Failed to flush event log: run_id={}: {:#}", run_id, e);
        }

        outcome
    }

    async fn build_and_execute(
        &self,
        workflow_id: &WorkflowId,
        run_id: RunId,
    ) -> DagResult<Results> {
        let dag = GraphBuilder::new(&self.registry)
            .concurrency(self.config.concurrency)
            .default_timeout(self.config.default_timeout)
            .build_workflow(self.store.as_ref(), workflow_id)
            .await?;

        self.record(Event::new(
            run_id,
            EventType::WorkflowStarted {
                workflow_id: workflow_id.clone(),
                vertices: dag.len(),
            },
        ))
        .await;

        dag.execute(Results::new()).await
    }

    async fn record(&self, event: Event) {
        let run_id = event.run_id;
        if let Err(e) = self.event_log.append(event).await {
            tracing::error!("Failed to append event: run_id={}: {:#}", run_id, e);
        }
    }

    async fn send_alert(&self, workflow_id: &WorkflowId, run_id: RunId, error: &DagError) {
        let message = format!("workflow {} (run {}) failed: {}", workflow_id, run_id, error);
        if let Err(e) = self.alerter.alert(&message).await {
            tracing::error!("Failed to send alert: run_id={}: {:#}", run_id, e);
        }
    }
}
