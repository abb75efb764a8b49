//! Workflow graph definition: node identities, edges, and the builder.

pub mod builder;
pub mod edges;

pub use builder::{GraphBuilder, GraphError, WorkflowGraph};
pub use edges::{ConditionalEdge, RouteSelector};

use serde::{Deserialize, Serialize};

/// Identifies a node within a workflow graph.
///
/// `Start` and `End` are virtual endpoints: they carry no executable node and
/// exist only to anchor the entry edge and the terminal sink.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeId {
    Start,
    End,
    Named(String),
}

impl NodeId {
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    /// Persisted string form, used as `node_id` on checkpoint records.
    pub fn as_str(&self) -> &str {
        match self {
            NodeId::Start => "start",
            NodeId::End => "end",
            NodeId::Named(name) => name,
        }
    }

    pub fn is_end(&self) -> bool {
        matches!(self, NodeId::End)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        match s {
            "start" => NodeId::Start,
            "end" => NodeId::End,
            other => NodeId::Named(other.to_string()),
        }
    }
}
