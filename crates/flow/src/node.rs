//! Graph vertices: an ordered operation chain plus branch decorations.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use operations::{
    ExecutableOperation, Function, HttpRequest, Modifier, Operation, Options, Params, Payload,
};

use crate::dag::Dag;

/// Payloads arriving at a vertex, keyed by origin (parent id, item index or
/// branch key) in arrival order.
pub type Inputs = IndexMap<String, Payload>;

/// Merges several incoming payloads into one.
pub type Aggregator = Arc<dyn Fn(&Inputs) -> anyhow::Result<Payload> + Send + Sync>;

/// Rewrites a vertex's output before it reaches one specific child.
pub type Forwarder = Arc<dyn Fn(&[u8]) -> Payload + Send + Sync>;

/// Splits a for-each vertex's input into the items fanned out to its template.
pub type SplitFn = Arc<dyn Fn(&[u8]) -> anyhow::Result<Vec<Payload>> + Send + Sync>;

/// Selects which conditional branches run for a given input.
pub type ClassifyFn = Arc<dyn Fn(&[u8]) -> Vec<String> + Send + Sync>;

/// How data crosses one edge. Exactly one policy applies per edge.
#[derive(Clone, Default)]
pub enum EdgePolicy {
    /// Forward the parent's output unchanged.
    #[default]
    Forward,
    /// Forward the parent's output through a transform.
    Forwarder(Forwarder),
    /// Order execution only; no payload crosses the edge.
    NoData,
}

impl EdgePolicy {
    pub fn forwarder<F>(forwarder: F) -> Self
    where
        F: Fn(&[u8]) -> Payload + Send + Sync + 'static,
    {
        Self::Forwarder(Arc::new(forwarder))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::Forwarder(_) => "forwarder",
            Self::NoData => "no_data",
        }
    }
}

impl fmt::Debug for EdgePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Options for fan-out and conditional vertices.
#[derive(Clone, Default)]
pub struct BranchOptions {
    pub(crate) aggregator: Option<Aggregator>,
    pub(crate) no_forward: bool,
}

impl BranchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge the branch outputs with `aggregator` instead of the default merge.
    pub fn aggregator<F>(mut self, aggregator: F) -> Self
    where
        F: Fn(&Inputs) -> anyhow::Result<Payload> + Send + Sync + 'static,
    {
        self.aggregator = Some(Arc::new(aggregator));
        self
    }

    /// Start every branch instance from an empty payload.
    pub fn no_forward(mut self) -> Self {
        self.no_forward = true;
        self
    }
}

/// A vertex running one template dag per split item.
#[derive(Clone)]
pub struct ForEachBranch {
    pub(crate) split: SplitFn,
    pub(crate) template: Dag,
    pub(crate) sub_aggregator: Option<Aggregator>,
    pub(crate) no_forward: bool,
}

impl ForEachBranch {
    pub fn split(&self) -> &SplitFn {
        &self.split
    }

    pub fn template(&self) -> &Dag {
        &self.template
    }

    pub fn sub_aggregator(&self) -> Option<&Aggregator> {
        self.sub_aggregator.as_ref()
    }

    pub fn forwards_input(&self) -> bool {
        !self.no_forward
    }
}

impl fmt::Debug for ForEachBranch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForEachBranch")
            .field("template", &self.template)
            .field("sub_aggregator", &self.sub_aggregator.is_some())
            .field("no_forward", &self.no_forward)
            .finish()
    }
}

/// A vertex running only the branches its classifier selects.
#[derive(Clone)]
pub struct ConditionalBranch {
    pub(crate) classify: ClassifyFn,
    pub(crate) branches: IndexMap<String, Dag>,
    pub(crate) sub_aggregator: Option<Aggregator>,
    pub(crate) no_forward: bool,
}

impl ConditionalBranch {
    pub fn classify(&self) -> &ClassifyFn {
        &self.classify
    }

    pub fn branch(&self, key: &str) -> Option<&Dag> {
        self.branches.get(key)
    }

    pub fn branches(&self) -> impl Iterator<Item = (&str, &Dag)> {
        self.branches.iter().map(|(key, dag)| (key.as_str(), dag))
    }

    pub fn sub_aggregator(&self) -> Option<&Aggregator> {
        self.sub_aggregator.as_ref()
    }

    pub fn forwards_input(&self) -> bool {
        !self.no_forward
    }
}

impl fmt::Debug for ConditionalBranch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionalBranch")
            .field("branches", &self.branches)
            .field("sub_aggregator", &self.sub_aggregator.is_some())
            .field("no_forward", &self.no_forward)
            .finish()
    }
}

/// What a vertex does before its own operation chain runs.
#[derive(Debug, Clone)]
pub enum VertexKind {
    /// Plain vertex: only the operation chain.
    Operations,
    /// Runs an embedded dag to completion; its terminal output is the input
    /// of the chain.
    SubDag(Dag),
    ForEach(ForEachBranch),
    Conditional(ConditionalBranch),
}

impl VertexKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Operations => "operations",
            Self::SubDag(_) => "sub_dag",
            Self::ForEach(_) => "for_each",
            Self::Conditional(_) => "conditional",
        }
    }
}

/// A vertex of a [`Dag`].
#[derive(Clone)]
pub struct Node {
    id: String,
    kind: VertexKind,
    operations: Vec<Arc<dyn ExecutableOperation>>,
    aggregator: Option<Aggregator>,
    /// child id → forwarder; `None` marks a no-data edge.
    forwarders: HashMap<String, Option<Forwarder>>,
}

impl Node {
    pub(crate) fn new(id: impl Into<String>, kind: VertexKind) -> Self {
        Self {
            id: id.into(),
            kind,
            operations: Vec::new(),
            aggregator: None,
            forwarders: HashMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> &VertexKind {
        &self.kind
    }

    pub(crate) fn kind_mut(&mut self) -> &mut VertexKind {
        &mut self.kind
    }

    /// The operation chain, in registration order.
    pub fn operations(&self) -> &[Arc<dyn ExecutableOperation>] {
        &self.operations
    }

    pub fn aggregator(&self) -> Option<&Aggregator> {
        self.aggregator.as_ref()
    }

    /// The policy of the edge towards `child`.
    pub fn edge_policy(&self, child: &str) -> EdgePolicy {
        match self.forwarders.get(child) {
            None => EdgePolicy::Forward,
            Some(None) => EdgePolicy::NoData,
            Some(Some(forwarder)) => EdgePolicy::Forwarder(forwarder.clone()),
        }
    }

    /// Template dag of a for-each vertex.
    pub fn template_mut(&mut self) -> Option<&mut Dag> {
        match self.kind_mut() {
            VertexKind::ForEach(branch) => Some(&mut branch.template),
            _ => None,
        }
    }

    /// Branch dag `key` of a conditional vertex.
    pub fn branch_mut(&mut self, key: &str) -> Option<&mut Dag> {
        match &mut self.kind {
            VertexKind::Conditional(branch) => branch.branches.get_mut(key),
            _ => None,
        }
    }

    // -----------------------------------------------------------------------
    // Builder
    // -----------------------------------------------------------------------

    /// Append `operation` to the chain.
    pub fn add_operation(&mut self, operation: Arc<dyn ExecutableOperation>) -> &mut Self {
        self.operations.push(operation);
        self
    }

    /// Merge incoming payloads with `aggregator` before the chain runs.
    pub fn add_aggregator<F>(&mut self, aggregator: F) -> &mut Self
    where
        F: Fn(&Inputs) -> anyhow::Result<Payload> + Send + Sync + 'static,
    {
        self.aggregator = Some(Arc::new(aggregator));
        self
    }

    /// Set the forwarder of the edge towards `child`; `None` stops data from
    /// crossing it.
    pub fn add_forwarder(
        &mut self,
        child: impl Into<String>,
        forwarder: Option<Forwarder>,
    ) -> &mut Self {
        self.forwarders.insert(child.into(), forwarder);
        self
    }

    /// Append a local transform.
    pub fn modify<F>(&mut self, transform: F) -> &mut Self
    where
        F: Fn(&[u8]) -> anyhow::Result<Payload> + Send + Sync + 'static,
    {
        self.add_operation(Arc::new(Operation::Modifier(Modifier::new(transform))))
    }

    /// Append a named local transform that reads option values.
    pub fn transform<F>(
        &mut self,
        id: impl Into<String>,
        transform: F,
        options: Options,
    ) -> &mut Self
    where
        F: Fn(&[u8], &Params) -> anyhow::Result<Payload> + Send + Sync + 'static,
    {
        let modifier = Modifier::from_options(id, transform, options);
        self.add_operation(Arc::new(Operation::Modifier(modifier)))
    }

    /// Append a remote function call.
    pub fn apply(&mut self, function: impl Into<String>, options: Options) -> &mut Self {
        let function = Function::from_options(function, options);
        self.add_operation(Arc::new(Operation::Function(function)))
    }

    /// Append a raw HTTP call.
    pub fn request(&mut self, url: impl Into<String>, options: Options) -> &mut Self {
        let request = HttpRequest::from_options(url, options);
        self.add_operation(Arc::new(Operation::HttpRequest(request)))
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let operations: Vec<String> = self.operations.iter().map(|op| op.id()).collect();
        let forwarders: HashMap<&str, &str> = self
            .forwarders
            .iter()
            .map(|(child, fw)| (child.as_str(), if fw.is_some() { "forwarder" } else { "no_data" }))
            .collect();

        f.debug_struct("Node")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("operations", &operations)
            .field("aggregator", &self.aggregator.is_some())
            .field("forwarders", &forwarders)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use operations::mock::MockOperation;

    #[test]
    fn chain_keeps_registration_order() {
        let mut node = Node::new("a", VertexKind::Operations);
        node.apply("resize", Options::new())
            .modify(|d| Ok(d.to_vec()))
            .request("http://a.b/c/0123456789abcdef", Options::new())
            .add_operation(Arc::new(MockOperation::returning("mock", "x")));

        let ids: Vec<String> = node.operations().iter().map(|op| op.id()).collect();
        assert_eq!(ids, vec!["resize", "modifier", "http-req-0123456789abcdef", "mock"]);
    }

    #[test]
    fn absent_forwarder_means_forward_and_none_means_no_data() {
        let mut node = Node::new("a", VertexKind::Operations);
        node.add_forwarder("quiet", None)
            .add_forwarder("loud", Some(Arc::new(|d: &[u8]| d.to_ascii_uppercase())));

        assert!(matches!(node.edge_policy("other"), EdgePolicy::Forward));
        assert!(matches!(node.edge_policy("quiet"), EdgePolicy::NoData));
        match node.edge_policy("loud") {
            EdgePolicy::Forwarder(f) => assert_eq!(f(b"hi"), b"HI"),
            other => panic!("unexpected policy {other:?}"),
        }
    }

    #[test]
    fn template_and_branch_accessors_are_kind_specific() {
        let mut plain = Node::new("a", VertexKind::Operations);
        assert!(plain.template_mut().is_none());
        assert!(plain.branch_mut("x").is_none());
    }
}
