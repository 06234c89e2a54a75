use crate::types::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An event in a workflow run's event log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub run_id: RunId,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
}

impl Event {
    pub fn new(run_id: RunId, event_type: EventType) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            run_id,
            timestamp: Utc::now(),
            event_type,
        }
    }
}

/// Types of events a workflow run reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventType {
    WorkflowStarted {
        workflow_id: WorkflowId,
        vertices: usize,
    },
    WorkflowCompleted {
        workflow_id: WorkflowId,
        duration_ms: u64,
        vertices: usize,
    },
    WorkflowFailed {
        workflow_id: WorkflowId,
        error: String,
        /// Vertex that caused the failure, if any
        vertex: Option<VertexKey>,
        retryable: bool,
        duration_ms: u64,
    },
}

impl EventType {
    /// Status the event leaves the run in
    pub fn status(&self) -> WorkflowStatus {
        match self {
            Self::WorkflowStarted { .. } => WorkflowStatus::Running,
            Self::WorkflowCompleted { .. } => WorkflowStatus::Succeeded,
            Self::WorkflowFailed { .. } => WorkflowStatus::Failed,
        }
    }
}

/// Event log writer trait
#[async_trait::async_trait]
pub trait EventLog: Send + Sync {
    /// Append an event to the log
    async fn append(&self, event: Event) -> anyhow::Result<()>;

    /// Get all events for a run
    async fn get_run_events(&self, run_id: RunId) -> anyhow::Result<Vec<Event>>;

    /// Persist anything still buffered
    async fn flush(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
