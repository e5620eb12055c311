//! The DAG builder and its validation.
//!
//! Vertices live in an arena owned by the [`Dag`]; edges are pairs of arena
//! indices. Rules enforced:
//! 1. Vertex IDs are unique (`node` is get-or-create, composite vertices must
//!    be new).
//! 2. Every edge references existing vertices and is declared once.
//! 3. The graph is acyclic, non-empty and has exactly one start and one end
//!    vertex. Embedded dags obey the same rules.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use indexmap::IndexMap;
use operations::Payload;

use crate::error::BuildError;
use crate::node::{
    BranchOptions, ConditionalBranch, EdgePolicy, ForEachBranch, Node, VertexKind,
};

/// Position of a vertex in its dag's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIndex(usize);

impl NodeIndex {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A directed edge between two vertices of the same dag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub from: NodeIndex,
    pub to: NodeIndex,
}

/// A directed acyclic graph of [`Node`]s.
#[derive(Debug, Clone, Default)]
pub struct Dag {
    nodes: Vec<Node>,
    index: HashMap<String, NodeIndex>,
    edges: Vec<Edge>,
}

impl Dag {
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn index_of(&self, id: &str) -> Option<NodeIndex> {
        self.index.get(id).copied()
    }

    pub fn get(&self, id: &str) -> Option<&Node> {
        self.index_of(id).map(|idx| &self.nodes[idx.0])
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.index_of(id).map(|idx| &mut self.nodes[idx.0])
    }

    /// # Panics
    /// If `index` was not produced by this dag.
    pub fn node_at(&self, index: NodeIndex) -> &Node {
        &self.nodes[index.0]
    }

    /// Vertices in insertion order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Edges in declaration order.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn children(&self, index: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
        self.edges.iter().filter(move |e| e.from == index).map(|e| e.to)
    }

    pub fn parents(&self, index: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
        self.edges.iter().filter(move |e| e.to == index).map(|e| e.from)
    }

    // -----------------------------------------------------------------------
    // Builder
    // -----------------------------------------------------------------------

    /// Get the vertex `id`, creating a plain one if it doesn't exist yet.
    pub fn node(&mut self, id: impl Into<String>) -> &mut Node {
        let id = id.into();
        let idx = match self.index_of(&id) {
            Some(idx) => idx,
            None => self.push(Node::new(id, VertexKind::Operations)),
        };
        &mut self.nodes[idx.0]
    }

    /// Connect `from` to `to`, forwarding data unchanged.
    pub fn edge(&mut self, from: &str, to: &str) -> Result<(), BuildError> {
        self.edge_with(from, to, EdgePolicy::Forward)
    }

    /// Connect `from` to `to` with an explicit data policy.
    ///
    /// # Errors
    /// - [`BuildError::UnknownVertex`] if either endpoint is missing.
    /// - [`BuildError::CycleDetected`] for a self edge.
    /// - [`BuildError::DuplicateEdge`] if the edge already exists.
    pub fn edge_with(
        &mut self,
        from: &str,
        to: &str,
        policy: EdgePolicy,
    ) -> Result<(), BuildError> {
        let from_idx = self.index_of(from).ok_or_else(|| BuildError::UnknownVertex {
            vertex_id: from.to_owned(),
            side: "from",
        })?;
        let to_idx = self.index_of(to).ok_or_else(|| BuildError::UnknownVertex {
            vertex_id: to.to_owned(),
            side: "to",
        })?;

        if from_idx == to_idx {
            return Err(BuildError::CycleDetected);
        }
        let edge = Edge { from: from_idx, to: to_idx };
        if self.edges.contains(&edge) {
            return Err(BuildError::DuplicateEdge {
                from: from.to_owned(),
                to: to.to_owned(),
            });
        }
        self.edges.push(edge);

        let parent = &mut self.nodes[from_idx.0];
        match policy {
            EdgePolicy::Forward => {}
            EdgePolicy::Forwarder(forwarder) => {
                parent.add_forwarder(to, Some(forwarder));
            }
            EdgePolicy::NoData => {
                parent.add_forwarder(to, None);
            }
        }
        Ok(())
    }

    /// Embed `dag` as the single vertex `id`. The embedded dag is validated
    /// immediately.
    pub fn sub_dag(&mut self, id: impl Into<String>, dag: Dag) -> Result<&mut Node, BuildError> {
        let id = id.into();
        dag.validate().map_err(|source| BuildError::InvalidSubDag {
            vertex: id.clone(),
            source: Box::new(source),
        })?;
        let idx = self.insert_composite(id, VertexKind::SubDag(dag))?;
        Ok(&mut self.nodes[idx.0])
    }

    /// Add a fan-out vertex and return its template dag, to be instantiated
    /// once per item produced by `split`.
    pub fn for_each_branch<F>(
        &mut self,
        id: impl Into<String>,
        split: F,
        options: BranchOptions,
    ) -> Result<&mut Dag, BuildError>
    where
        F: Fn(&[u8]) -> anyhow::Result<Vec<Payload>> + Send + Sync + 'static,
    {
        let kind = VertexKind::ForEach(ForEachBranch {
            split: Arc::new(split),
            template: Dag::new(),
            sub_aggregator: options.aggregator,
            no_forward: options.no_forward,
        });
        let idx = self.insert_composite(id.into(), kind)?;
        match self.nodes[idx.0].kind_mut() {
            VertexKind::ForEach(branch) => Ok(&mut branch.template),
            _ => unreachable!("vertex was just created as a for-each branch"),
        }
    }

    /// Add a conditional vertex with one branch dag per key. At run time only
    /// the branches named by `classify` execute.
    ///
    /// # Errors
    /// [`BuildError::NoBranchKeys`] for an empty key set,
    /// [`BuildError::DuplicateBranchKey`] if a key repeats.
    pub fn conditional_branch<K, F>(
        &mut self,
        id: impl Into<String>,
        keys: impl IntoIterator<Item = K>,
        classify: F,
        options: BranchOptions,
    ) -> Result<BranchDags<'_>, BuildError>
    where
        K: Into<String>,
        F: Fn(&[u8]) -> Vec<String> + Send + Sync + 'static,
    {
        let id = id.into();
        let mut branches = IndexMap::new();
        for key in keys {
            let key = key.into();
            if branches.contains_key(&key) {
                return Err(BuildError::DuplicateBranchKey { vertex: id, key });
            }
            branches.insert(key, Dag::new());
        }
        if branches.is_empty() {
            return Err(BuildError::NoBranchKeys(id));
        }

        let kind = VertexKind::Conditional(ConditionalBranch {
            classify: Arc::new(classify),
            branches,
            sub_aggregator: options.aggregator,
            no_forward: options.no_forward,
        });
        let idx = self.insert_composite(id, kind)?;
        match self.nodes[idx.0].kind_mut() {
            VertexKind::Conditional(branch) => Ok(BranchDags { branches: &mut branch.branches }),
            _ => unreachable!("vertex was just created as a conditional branch"),
        }
    }

    /// Merge `other` into this dag. The two dags must not share a vertex ID.
    pub fn append(&mut self, other: Dag) -> Result<(), BuildError> {
        if let Some(shared) = other.nodes.iter().find(|n| self.contains(n.id())) {
            return Err(BuildError::NonDisjointAppend(shared.id().to_owned()));
        }

        let offset = self.nodes.len();
        for node in other.nodes {
            self.push(node);
        }
        self.edges.extend(other.edges.into_iter().map(|e| Edge {
            from: NodeIndex(e.from.0 + offset),
            to: NodeIndex(e.to.0 + offset),
        }));
        Ok(())
    }

    fn push(&mut self, node: Node) -> NodeIndex {
        let idx = NodeIndex(self.nodes.len());
        self.index.insert(node.id().to_owned(), idx);
        self.nodes.push(node);
        idx
    }

    fn insert_composite(&mut self, id: String, kind: VertexKind) -> Result<NodeIndex, BuildError> {
        if self.contains(&id) {
            return Err(BuildError::DuplicateVertex(id));
        }
        Ok(self.push(Node::new(id, kind)))
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Vertices without incoming edges, in insertion order.
    pub fn start_vertices(&self) -> Vec<NodeIndex> {
        let targets: HashSet<NodeIndex> = self.edges.iter().map(|e| e.to).collect();
        (0..self.nodes.len())
            .map(NodeIndex)
            .filter(|idx| !targets.contains(idx))
            .collect()
    }

    /// Vertices without outgoing edges, in insertion order.
    pub fn end_vertices(&self) -> Vec<NodeIndex> {
        let sources: HashSet<NodeIndex> = self.edges.iter().map(|e| e.from).collect();
        (0..self.nodes.len())
            .map(NodeIndex)
            .filter(|idx| !sources.contains(idx))
            .collect()
    }

    /// Topological execution order (Kahn's algorithm). Ties are broken by
    /// insertion order, so the result is deterministic.
    ///
    /// # Errors
    /// [`BuildError::CycleDetected`] if the graph is not acyclic.
    pub fn topological_order(&self) -> Result<Vec<NodeIndex>, BuildError> {
        let mut adjacency: Vec<Vec<NodeIndex>> = vec![Vec::new(); self.nodes.len()];
        let mut in_degree: Vec<usize> = vec![0; self.nodes.len()];

        for edge in &self.edges {
            adjacency[edge.from.0].push(edge.to);
            in_degree[edge.to.0] += 1;
        }

        // Seed the queue with vertices that have no incoming edges.
        let mut queue: VecDeque<NodeIndex> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &d)| d == 0)
            .map(|(i, _)| NodeIndex(i))
            .collect();

        let mut sorted = Vec::with_capacity(self.nodes.len());

        while let Some(idx) = queue.pop_front() {
            sorted.push(idx);

            for &child in &adjacency[idx.0] {
                let deg = &mut in_degree[child.0];
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(child);
                }
            }
        }

        // If we didn't visit every vertex the graph contains a cycle.
        if sorted.len() != self.nodes.len() {
            return Err(BuildError::CycleDetected);
        }

        Ok(sorted)
    }

    /// Check this dag and every dag embedded in it.
    pub fn validate(&self) -> Result<(), BuildError> {
        if self.is_empty() {
            return Err(BuildError::EmptyDag);
        }
        self.topological_order()?;

        let starts = self.start_vertices();
        if starts.len() != 1 {
            return Err(BuildError::MultipleStartVertices(self.ids(&starts)));
        }
        let ends = self.end_vertices();
        if ends.len() != 1 {
            return Err(BuildError::MultipleEndVertices(self.ids(&ends)));
        }

        for node in &self.nodes {
            let nested = match node.kind() {
                VertexKind::Operations => Ok(()),
                VertexKind::SubDag(dag) => dag.validate(),
                VertexKind::ForEach(branch) => branch.template.validate(),
                VertexKind::Conditional(branch) => {
                    branch.branches.values().try_for_each(Dag::validate)
                }
            };
            nested.map_err(|source| BuildError::InvalidSubDag {
                vertex: node.id().to_owned(),
                source: Box::new(source),
            })?;
        }

        Ok(())
    }

    fn ids(&self, indices: &[NodeIndex]) -> Vec<String> {
        indices.iter().map(|idx| self.nodes[idx.0].id().to_owned()).collect()
    }
}

/// The keyed branch dags of a freshly declared conditional vertex.
///
/// The key set is fixed at declaration; only the dags behind it can change.
#[derive(Debug)]
pub struct BranchDags<'a> {
    branches: &'a mut IndexMap<String, Dag>,
}

impl<'a> BranchDags<'a> {
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Dag> {
        self.branches.get_mut(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.branches.keys().map(String::as_str)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut Dag)> {
        self.branches.iter_mut().map(|(key, dag)| (key.as_str(), dag))
    }
}
