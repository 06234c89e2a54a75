//! Turns stored task and edge rows into an executable [`Dag`].

use super::dag::{Dag, DEFAULT_CONCURRENCY};
use super::vertex::{Vertex, Work};
use crate::error::{DagError, DagResult};
use crate::registry::{HandlerRegistry, RunnableJob};
use crate::storage::JobStore;
use crate::types::{EdgeRow, Results, TaskPayload, TaskRow, VertexKey, WorkflowId};
use anyhow::Result;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// Timeout for tasks that specify none and whose handler asks for none
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(60);

/// Work of a task vertex: the job its payload describes
struct JobWork(Box<dyn RunnableJob>);

#[async_trait::async_trait]
impl Work for JobWork {
    async fn run(&self, results: Results) -> Result<Value> {
        self.0.run(results).await
    }
}

/// Builds dags from job store rows, resolving handlers through a registry
pub struct GraphBuilder<'a> {
    registry: &'a HandlerRegistry,
    default_timeout: Duration,
    concurrency: usize,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(registry: &'a HandlerRegistry) -> Self {
        Self {
            registry,
            default_timeout: DEFAULT_TASK_TIMEOUT,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Load a workflow's rows from the store and build its dag.
    ///
    /// Edge rows are read first, then the task rows they reference.
    pub async fn build_workflow(
        &self,
        store: &dyn JobStore,
        workflow_id: &WorkflowId,
    ) -> DagResult<Dag> {
        let edges = store
            .workflow_edges(workflow_id)
            .await
            .map_err(DagError::Storage)?;

        let task_ids: Vec<i64> = edges
            .iter()
            .map(|e| e.task_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let tasks = store.tasks(&task_ids).await.map_err(DagError::Storage)?;

        tracing::debug!(
            workflow_id = %workflow_id,
            tasks = tasks.len(),
            edges = edges.len(),
            "loaded workflow rows"
        );
        self.build(&tasks, &edges)
    }

    /// Build a validated dag from task and edge rows.
    ///
    /// Fails on the first unusable task payload, on an edge naming an unknown
    /// task, and on a graph without roots or with a cycle. No partial graph is
    /// ever returned.
    pub fn build(&self, tasks: &[TaskRow], edges: &[EdgeRow]) -> DagResult<Dag> {
        let mut dag = Dag::new().with_concurrency(self.concurrency);
        let mut keys: HashMap<i64, VertexKey> = HashMap::with_capacity(tasks.len());

        for task in tasks {
            let vertex = self.vertex(task)?;
            keys.entry(task.id).or_insert_with(|| vertex.key.clone());
            dag.add_vertex(vertex);
        }

        let mut children: HashMap<i64, Vec<i64>> = HashMap::new();
        for edge in edges {
            children.entry(edge.pid).or_default().push(edge.task_id);
        }

        let mut expanded = HashSet::new();
        let mut linked = HashSet::new();
        link_children(&mut dag, &keys, &children, 0, &mut expanded, &mut linked)?;

        dag.validate()?;
        Ok(dag)
    }

    fn vertex(&self, task: &TaskRow) -> DagResult<Vertex> {
        let payload: TaskPayload = serde_json::from_str(&task.content).map_err(|e| {
            DagError::configuration(&task.task_no, format!("invalid payload: {}", e))
        })?;

        let job = match self.registry.create(&payload.handler, &payload.params) {
            Some(Ok(job)) => job,
            Some(Err(e)) => {
                return Err(DagError::configuration(
                    &task.task_no,
                    format!("handler {} rejected params: {:#}", payload.handler, e),
                ))
            }
            None => {
                return Err(DagError::configuration(
                    &task.task_no,
                    format!("unknown handler: {}", payload.handler),
                ))
            }
        };

        let timeout = if task.timeout > 0 {
            Duration::from_secs(task.timeout)
        } else {
            job.timeout().unwrap_or(self.default_timeout)
        };

        Ok(Vertex::new(
            task.task_no.as_str(),
            Arc::new(JobWork(job)),
            timeout,
        ))
    }
}

/// Link every child of `pid` to it, then descend into each child once.
fn link_children(
    dag: &mut Dag,
    keys: &HashMap<i64, VertexKey>,
    children: &HashMap<i64, Vec<i64>>,
    pid: i64,
    expanded: &mut HashSet<i64>,
    linked: &mut HashSet<(i64, i64)>,
) -> DagResult<()> {
    if !expanded.insert(pid) {
        return Ok(());
    }
    let Some(child_ids) = children.get(&pid) else {
        return Ok(());
    };

    for &child_id in child_ids {
        let child = keys.get(&child_id).ok_or_else(|| missing_task(child_id))?;

        if pid != 0 && linked.insert((pid, child_id)) {
            let parent = keys.get(&pid).ok_or_else(|| missing_task(pid))?;
            dag.add_edge(parent, child)?;
        }

        link_children(dag, keys, children, child_id, expanded, linked)?;
    }

    Ok(())
}

fn missing_task(task_id: i64) -> DagError {
    DagError::configuration(task_id.to_string(), "edge references a task that does not exist")
}
