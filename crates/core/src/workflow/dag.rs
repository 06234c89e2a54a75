use super::vertex::Vertex;
use crate::error::{DagError, DagResult};
use crate::types::VertexKey;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

/// Default number of vertices allowed to run at once.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Vertex/edge set of one workflow run
pub struct Dag {
    vertices: HashMap<VertexKey, Vertex>,
    // insertion order, so roots are seeded deterministically
    order: Vec<VertexKey>,
    concurrency: usize,
}

impl Dag {
    pub fn new() -> Self {
        Self {
            vertices: HashMap::new(),
            order: Vec::new(),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Add a vertex to the dag.
    ///
    /// Adding a second vertex under an existing key is ignored: the first
    /// registration wins. Returns whether the vertex was inserted.
    pub fn add_vertex(&mut self, vertex: Vertex) -> bool {
        if self.vertices.contains_key(&vertex.key) {
            tracing::debug!(vertex = %vertex.key, "ignoring duplicate vertex");
            return false;
        }

        self.order.push(vertex.key.clone());
        self.vertices.insert(vertex.key.clone(), vertex);
        true
    }

    /// Add an edge `from -> to`: `to` waits for `from` to complete.
    ///
    /// No acyclicity check happens here; see [`Dag::validate`].
    pub fn add_edge(&mut self, from: &VertexKey, to: &VertexKey) -> DagResult<()> {
        if !self.vertices.contains_key(to) {
            return Err(DagError::UnknownVertex(to.clone()));
        }
        let from_vertex = self
            .vertices
            .get_mut(from)
            .ok_or_else(|| DagError::UnknownVertex(from.clone()))?;
        from_vertex.children.push(to.clone());

        if let Some(to_vertex) = self.vertices.get_mut(to) {
            to_vertex.parents.push(from.clone());
        }

        Ok(())
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Set the maximum number of vertices running at once (at least 1).
    pub fn set_concurrency(&mut self, concurrency: usize) -> &mut Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.set_concurrency(concurrency);
        self
    }

    pub fn vertex(&self, key: &VertexKey) -> Option<&Vertex> {
        self.vertices.get(key)
    }

    /// Vertices in insertion order
    pub fn vertices(&self) -> impl Iterator<Item = &Vertex> {
        self.order.iter().filter_map(|key| self.vertices.get(key))
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Vertices with no parents, in insertion order
    pub fn roots(&self) -> Vec<&Vertex> {
        self.vertices().filter(|v| v.is_root()).collect()
    }

    /// Check that the graph can be executed: at least one root and no cycle.
    pub fn validate(&self) -> DagResult<()> {
        if self.roots().is_empty() {
            return Err(DagError::NoRoots);
        }

        let mut graph: DiGraph<&VertexKey, ()> = DiGraph::new();
        let indices: HashMap<&VertexKey, NodeIndex> = self
            .order
            .iter()
            .map(|key| (key, graph.add_node(key)))
            .collect();

        for vertex in self.vertices() {
            for child in &vertex.children {
                if let (Some(&from), Some(&to)) = (indices.get(&vertex.key), indices.get(child)) {
                    graph.add_edge(from, to, ());
                }
            }
        }

        petgraph::algo::toposort(&graph, None).map_err(|cycle| DagError::Cycle {
            vertex: graph[cycle.node_id()].clone(),
        })?;

        Ok(())
    }
}

impl Default for Dag {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Dag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dag")
            .field("vertices", &self.order)
            .field("concurrency", &self.concurrency)
            .finish()
    }
}
