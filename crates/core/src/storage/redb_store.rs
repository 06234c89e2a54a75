use super::JobStore;
use crate::types::{EdgeRow, TaskRow, WorkflowId};
use anyhow::{Context, Result};
use redb::{Database, ReadableTable, TableDefinition};
use std::path::PathBuf;
use std::sync::Arc;

const TASKS_TABLE: TableDefinition<i64, &[u8]> = TableDefinition::new("tasks");
const VERTEX_EDGES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("vertex_edges");

/// Job store persisted in a redb file
#[derive(Clone)]
pub struct RedbJobStore {
    db: Arc<Database>,
}

impl RedbJobStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        // Create parent directory if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create job store directory")?;
        }

        let db = Database::create(&path).context("Failed to create redb database")?;

        // Initialize tables
        let write_txn = db.begin_write().context("Failed to begin write transaction")?;
        {
            let _tasks_table = write_txn
                .open_table(TASKS_TABLE)
                .context("Failed to open tasks table")?;
            let _edges_table = write_txn
                .open_table(VERTEX_EDGES_TABLE)
                .context("Failed to open vertex edges table")?;
        }
        write_txn.commit().context("Failed to commit transaction")?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Store a task row, replacing any row with the same id
    pub fn put_task(&self, task: &TaskRow) -> Result<()> {
        let write_txn = self.db.begin_write().context("Failed to begin write")?;
        {
            let mut table = write_txn
                .open_table(TASKS_TABLE)
                .context("Failed to open table")?;

            let value = serde_json::to_vec(task).context("Failed to serialize task")?;
            table
                .insert(task.id, value.as_slice())
                .context("Failed to insert task")?;
        }
        write_txn.commit().context("Failed to commit")?;
        Ok(())
    }

    /// Replace the edge rows of a workflow
    pub fn put_workflow(&self, workflow_id: &WorkflowId, edges: &[EdgeRow]) -> Result<()> {
        let write_txn = self.db.begin_write().context("Failed to begin write")?;
        {
            let mut table = write_txn
                .open_table(VERTEX_EDGES_TABLE)
                .context("Failed to open table")?;

            let value = serde_json::to_vec(edges).context("Failed to serialize edges")?;
            table
                .insert(workflow_id.0.as_str(), value.as_slice())
                .context("Failed to insert edges")?;
        }
        write_txn.commit().context("Failed to commit")?;
        Ok(())
    }

    /// Get a task row by id
    pub fn get_task(&self, id: i64) -> Result<Option<TaskRow>> {
        let read_txn = self.db.begin_read().context("Failed to begin read")?;
        let table = read_txn.open_table(TASKS_TABLE).context("Failed to open table")?;

        match table.get(id).context("Failed to get task")? {
            Some(guard) => {
                let task: TaskRow =
                    serde_json::from_slice(guard.value()).context("Failed to deserialize task")?;
                Ok(Some(task))
            }
            None => Ok(None),
        }
    }

    /// Ids of every stored workflow
    pub fn list_workflows(&self) -> Result<Vec<WorkflowId>> {
        let read_txn = self.db.begin_read().context("Failed to begin read")?;
        let table = read_txn
            .open_table(VERTEX_EDGES_TABLE)
            .context("Failed to open table")?;

        let mut ids = Vec::new();
        for item in table.iter().context("Failed to iterate workflows")? {
            let (key, _value) = item.context("Failed to read item")?;
            ids.push(WorkflowId::new(key.value()));
        }
        Ok(ids)
    }

    fn read_edges(&self, workflow_id: &WorkflowId) -> Result<Vec<EdgeRow>> {
        let read_txn = self.db.begin_read().context("Failed to begin read")?;
        let table = read_txn
            .open_table(VERTEX_EDGES_TABLE)
            .context("Failed to open table")?;

        match table
            .get(workflow_id.0.as_str())
            .context("Failed to get edges")?
        {
            Some(guard) => {
                serde_json::from_slice(guard.value()).context("Failed to deserialize edges")
            }
            None => Ok(Vec::new()),
        }
    }

    fn read_tasks(&self, task_ids: &[i64]) -> Result<Vec<TaskRow>> {
        let read_txn = self.db.begin_read().context("Failed to begin read")?;
        let table = read_txn.open_table(TASKS_TABLE).context("Failed to open table")?;

        let mut tasks = Vec::with_capacity(task_ids.len());
        for id in task_ids {
            if let Some(guard) = table.get(*id).context("Failed to get task")? {
                let task: TaskRow =
                    serde_json::from_slice(guard.value()).context("Failed to deserialize task")?;
                tasks.push(task);
            }
        }
        Ok(tasks)
    }
}

#[async_trait::async_trait]
impl JobStore for RedbJobStore {
    async fn workflow_edges(&self, workflow_id: &WorkflowId) -> Result<Vec<EdgeRow>> {
        let store = self.clone();
        let workflow_id = workflow_id.clone();
        tokio::task::spawn_blocking(move || store.read_edges(&workflow_id))
            .await
            .context("Job store query panicked")?
    }

    async fn tasks(&self, task_ids: &[i64]) -> Result<Vec<TaskRow>> {
        let store = self.clone();
        let task_ids = task_ids.to_vec();
        tokio::task::spawn_blocking(move || store.read_tasks(&task_ids))
            .await
            .context("Job store query panicked")?
    }
}
