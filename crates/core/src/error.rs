//! Error taxonomy for graph construction and execution.

use crate::types::VertexKey;
use std::time::Duration;

/// Result type for DAG operations.
pub type DagResult<T> = Result<T, DagError>;

/// Errors raised while building or executing a workflow graph.
#[derive(Debug, thiserror::Error)]
pub enum DagError {
    /// A task payload names an unusable handler. Raised during build only.
    #[error("configuration error for task {task}: {reason}")]
    Configuration { task: String, reason: String },

    /// An edge references a vertex that was never added.
    #[error("unknown vertex: {0}")]
    UnknownVertex(VertexKey),

    /// No vertex without parents exists.
    #[error("no roots can be found in dag")]
    NoRoots,

    /// The graph is not acyclic.
    #[error("dag contains a cycle through vertex {vertex}")]
    Cycle { vertex: VertexKey },

    /// A vertex's work did not finish in time.
    #[error("vertex {vertex} timed out after {timeout:?}")]
    Timeout { vertex: VertexKey, timeout: Duration },

    /// A vertex's work failed.
    #[error("vertex {vertex} failed: {source}")]
    Work {
        vertex: VertexKey,
        #[source]
        source: anyhow::Error,
    },

    /// The job store could not supply rows.
    #[error("storage error: {0}")]
    Storage(#[source] anyhow::Error),
}

impl DagError {
    pub fn configuration(task: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            task: task.into(),
            reason: reason.into(),
        }
    }

    /// Key of the vertex that caused the failure, if any.
    pub fn vertex(&self) -> Option<&VertexKey> {
        match self {
            Self::Timeout { vertex, .. } | Self::Work { vertex, .. } | Self::Cycle { vertex } => {
                Some(vertex)
            }
            Self::UnknownVertex(vertex) => Some(vertex),
            _ => None,
        }
    }

    /// Whether redelivering the same workflow could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Work { .. } | Self::Storage(_)
        )
    }
}
