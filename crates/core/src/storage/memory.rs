use super::JobStore;
use crate::types::{EdgeRow, TaskRow, WorkflowId};
use anyhow::Result;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Job store kept entirely in memory, for tests and embedding
#[derive(Default)]
pub struct InMemoryJobStore {
    tasks: RwLock<HashMap<i64, TaskRow>>,
    edges: RwLock<HashMap<WorkflowId, Vec<EdgeRow>>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_task(&self, task: TaskRow) {
        self.tasks.write().await.insert(task.id, task);
    }

    /// Replace the edge rows of a workflow.
    pub async fn put_workflow(&self, workflow_id: WorkflowId, edges: Vec<EdgeRow>) {
        self.edges.write().await.insert(workflow_id, edges);
    }
}

#[async_trait::async_trait]
impl JobStore for InMemoryJobStore {
    async fn workflow_edges(&self, workflow_id: &WorkflowId) -> Result<Vec<EdgeRow>> {
        Ok(self
            .edges
            .read()
            .await
            .get(workflow_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn tasks(&self, task_ids: &[i64]) -> Result<Vec<TaskRow>> {
        let tasks = self.tasks.read().await;
        Ok(task_ids
            .iter()
            .filter_map(|id| tasks.get(id).cloned())
            .collect())
    }
}
