//! `dagworker import`: load workflow rows from a JSON file into the job store.

use anyhow::{bail, Context, Result};
use dagworker_core::storage::RedbJobStore;
use dagworker_core::types::{EdgeRow, TaskRow, WorkflowId};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

/// File format accepted by the import command
#[derive(Debug, Deserialize)]
pub struct WorkflowFile {
    pub workflow_id: WorkflowId,
    pub tasks: Vec<TaskRow>,
    pub edges: Vec<EdgeSpec>,
}

/// An edge inside a [`WorkflowFile`]; `pid` 0 marks a root
#[derive(Debug, Deserialize)]
pub struct EdgeSpec {
    pub task_id: i64,
    #[serde(default)]
    pub pid: i64,
}

impl WorkflowFile {
    pub fn parse(content: &str) -> Result<Self> {
        let file: Self = serde_json::from_str(content).context("Failed to parse workflow file")?;
        file.check()?;
        Ok(file)
    }

    /// Reject files whose edges name tasks the file does not define.
    fn check(&self) -> Result<()> {
        let ids: HashSet<i64> = self.tasks.iter().map(|t| t.id).collect();
        if ids.contains(&0) {
            bail!("Task id 0 is reserved for root edges");
        }
        for edge in &self.edges {
            if !ids.contains(&edge.task_id) {
                bail!("Edge references unknown task {}", edge.task_id);
            }
            if edge.pid != 0 && !ids.contains(&edge.pid) {
                bail!("Edge references unknown parent task {}", edge.pid);
            }
        }
        Ok(())
    }

    pub fn edge_rows(&self) -> Vec<EdgeRow> {
        self.edges
            .iter()
            .map(|e| EdgeRow {
                workflow_id: self.workflow_id.clone(),
                task_id: e.task_id,
                pid: e.pid,
            })
            .collect()
    }
}

/// Outcome of one import
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSummary {
    pub workflow_id: WorkflowId,
    pub tasks: usize,
    /// Task rows that already existed and were overwritten
    pub replaced: usize,
}

/// Import one workflow file.
pub fn import_file(store: &RedbJobStore, path: &Path) -> Result<ImportSummary> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let file = WorkflowFile::parse(&content)?;

    let mut replaced = 0;
    for task in &file.tasks {
        if let Some(existing) = store.get_task(task.id)? {
            if existing != *task {
                tracing::warn!("Replacing task: id={}, task_no={}", task.id, existing.task_no);
            }
            replaced += 1;
        }
        store.put_task(task)?;
    }
    store.put_workflow(&file.workflow_id, &file.edge_rows())?;

    tracing::info!(
        "Imported workflow: workflow_id={}, tasks={}, replaced={}, edges={}",
        file.workflow_id,
        file.tasks.len(),
        replaced,
        file.edges.len()
    );
    Ok(ImportSummary {
        workflow_id: file.workflow_id,
        tasks: file.tasks.len(),
        replaced,
    })
}
