//! Serialisable snapshot of a dag's structure, for engines that audit or
//! persist what they are about to run.

use indexmap::IndexMap;
use operations::OperationProperties;
use serde::{Deserialize, Serialize};

use crate::dag::Dag;
use crate::node::{Node, VertexKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DagDescription {
    pub vertices: Vec<VertexDescription>,
    pub edges: Vec<EdgeDescription>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VertexDescription {
    pub id: String,
    pub kind: VertexKindDescription,
    pub operations: Vec<OperationDescription>,
    pub has_aggregator: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VertexKindDescription {
    Operations,
    SubDag {
        dag: DagDescription,
    },
    ForEach {
        template: DagDescription,
        has_sub_aggregator: bool,
        no_forward: bool,
    },
    Conditional {
        branches: IndexMap<String, DagDescription>,
        has_sub_aggregator: bool,
        no_forward: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationDescription {
    pub id: String,
    #[serde(flatten)]
    pub properties: OperationProperties,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeDescription {
    pub from: String,
    pub to: String,
    /// `forward`, `forwarder` or `no_data`.
    pub policy: String,
}

impl Dag {
    /// Describe this dag and everything embedded in it.
    pub fn describe(&self) -> DagDescription {
        let vertices = self.nodes().iter().map(describe_vertex).collect();
        let edges = self
            .edges()
            .iter()
            .map(|edge| {
                let from = self.node_at(edge.from);
                let to = self.node_at(edge.to);
                EdgeDescription {
                    from: from.id().to_owned(),
                    to: to.id().to_owned(),
                    policy: from.edge_policy(to.id()).name().to_owned(),
                }
            })
            .collect();

        DagDescription { vertices, edges }
    }
}

fn describe_vertex(node: &Node) -> VertexDescription {
    let kind = match node.kind() {
        VertexKind::Operations => VertexKindDescription::Operations,
        VertexKind::SubDag(dag) => VertexKindDescription::SubDag { dag: dag.describe() },
        VertexKind::ForEach(branch) => VertexKindDescription::ForEach {
            template: branch.template().describe(),
            has_sub_aggregator: branch.sub_aggregator().is_some(),
            no_forward: !branch.forwards_input(),
        },
        VertexKind::Conditional(branch) => VertexKindDescription::Conditional {
            branches: branch
                .branches()
                .map(|(key, dag)| (key.to_owned(), dag.describe()))
                .collect(),
            has_sub_aggregator: branch.sub_aggregator().is_some(),
            no_forward: !branch.forwards_input(),
        },
    };

    VertexDescription {
        id: node.id().to_owned(),
        kind,
        operations: node
            .operations()
            .iter()
            .map(|op| OperationDescription {
                id: op.id(),
                properties: op.properties(),
            })
            .collect(),
        has_aggregator: node.aggregator().is_some(),
    }
}
