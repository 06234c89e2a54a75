pub mod event_log;
pub mod memory;
pub mod redb_store;

pub use event_log::JsonlEventLog;
pub use memory::InMemoryJobStore;
pub use redb_store::RedbJobStore;

use crate::types::{EdgeRow, TaskRow, WorkflowId};
use anyhow::Result;

/// Read access to the task and edge rows that describe workflows
#[async_trait::async_trait]
pub trait JobStore: Send + Sync {
    /// Edge rows of one workflow; root edges have `pid == 0`.
    async fn workflow_edges(&self, workflow_id: &WorkflowId) -> Result<Vec<EdgeRow>>;

    /// Task rows for the given ids. Unknown ids are omitted.
    async fn tasks(&self, task_ids: &[i64]) -> Result<Vec<TaskRow>>;
}
