use crate::types::{Results, VertexKey};
use anyhow::Result;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// A unit of work executed for one vertex.
///
/// The work receives a snapshot of the results produced so far and returns
/// the value stored under the vertex key.
#[async_trait::async_trait]
pub trait Work: Send + Sync {
    async fn run(&self, results: Results) -> Result<Value>;
}

/// Adapter turning an async closure into [`Work`].
pub struct FnWork<F>(F);

#[async_trait::async_trait]
impl<F, Fut> Work for FnWork<F>
where
    F: Fn(Results) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    async fn run(&self, results: Results) -> Result<Value> {
        (self.0)(results).await
    }
}

/// Wrap an async closure as vertex work.
pub fn work_fn<F, Fut>(f: F) -> Arc<dyn Work>
where
    F: Fn(Results) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(FnWork(f))
}

/// A node in the dependency graph.
///
/// Edges are stored as keys into the owning [`Dag`](super::Dag); they are
/// fixed before execution starts.
#[derive(Clone)]
pub struct Vertex {
    pub key: VertexKey,
    pub work: Arc<dyn Work>,
    pub timeout: Duration,
    pub(crate) parents: Vec<VertexKey>,
    pub(crate) children: Vec<VertexKey>,
}

impl Vertex {
    pub fn new(key: impl Into<VertexKey>, work: Arc<dyn Work>, timeout: Duration) -> Self {
        Self {
            key: key.into(),
            work,
            timeout,
            parents: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn parents(&self) -> &[VertexKey] {
        &self.parents
    }

    pub fn children(&self) -> &[VertexKey] {
        &self.children
    }

    /// A vertex with no parents is a root.
    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }
}

impl std::fmt::Debug for Vertex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vertex")
            .field("key", &self.key)
            .field("timeout", &self.timeout)
            .field("parents", &self.parents)
            .field("children", &self.children)
            .finish_non_exhaustive()
    }
}
