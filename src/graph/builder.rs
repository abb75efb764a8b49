//! Graph construction and compile-time validation.

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use thiserror::Error;

use super::edges::{ConditionalEdge, RouteSelector};
use super::NodeId;
use crate::error::EngineError;
use crate::node::Node;
use crate::state::WorkflowState;

/// Structural problems detected when compiling a graph.
#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    #[error("graph has no entry edge from Start")]
    #[diagnostic(
        code(tellerflow::graph::no_entry),
        help("Add an edge from NodeId::Start to the first node.")
    )]
    MissingEntry,

    #[error("edge from `{from}` targets unregistered node `{to}`")]
    #[diagnostic(code(tellerflow::graph::unknown_target))]
    UnknownTarget { from: String, to: String },

    #[error("node `{node}` has both an unconditional and a conditional out-edge")]
    #[diagnostic(
        code(tellerflow::graph::ambiguous_exit),
        help("A node routes either by a fixed edge or by a selector, not both.")
    )]
    AmbiguousExit { node: String },

    #[error("node `{node}` has no outgoing edge")]
    #[diagnostic(
        code(tellerflow::graph::dead_end),
        help("Every registered node must reach End through some edge.")
    )]
    DeadEnd { node: String },
}

/// Builder for workflow graphs.
///
/// Nodes are registered under a [`NodeId`]; edges are either unconditional
/// (`from -> to`) or conditional (`from -> selector -> key -> to`). `Start`
/// and `End` are virtual and never registered as nodes.
///
/// # Examples
///
/// ```
/// use tellerflow::graph::{GraphBuilder, NodeId};
/// # use tellerflow::node::{Node, NodeContext, NodeError};
/// # use tellerflow::state::WorkflowState;
/// # struct Echo;
/// # #[async_trait::async_trait]
/// # impl Node for Echo {
/// #     async fn run(&self, s: WorkflowState, _: NodeContext) -> Result<WorkflowState, NodeError> {
/// #         Ok(s)
/// #     }
/// # }
///
/// let graph = GraphBuilder::new()
///     .add_node(NodeId::named("work"), Echo)
///     .add_edge(NodeId::Start, NodeId::named("work"))
///     .add_edge(NodeId::named("work"), NodeId::End)
///     .compile()
///     .unwrap();
/// assert_eq!(graph.entry(), &NodeId::named("work"));
/// ```
pub struct GraphBuilder {
    nodes: FxHashMap<NodeId, Arc<dyn Node>>,
    edges: FxHashMap<NodeId, NodeId>,
    conditional: FxHashMap<NodeId, ConditionalEdge>,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: FxHashMap::default(),
            edges: FxHashMap::default(),
            conditional: FxHashMap::default(),
        }
    }

    /// Register an executable node. Registering `Start`/`End` is ignored with
    /// a warning; they are structural only.
    #[must_use]
    pub fn add_node(mut self, id: NodeId, node: impl Node + 'static) -> Self {
        match id {
            NodeId::Start | NodeId::End => {
                tracing::warn!(?id, "ignoring registration of virtual node");
            }
            _ => {
                self.nodes.insert(id, Arc::new(node));
            }
        }
        self
    }

    /// Add an unconditional edge. Each node has at most one; the engine is a
    /// single-path executor.
    #[must_use]
    pub fn add_edge(mut self, from: NodeId, to: NodeId) -> Self {
        if self.edges.insert(from.clone(), to).is_some() {
            tracing::warn!(%from, "replacing existing unconditional edge");
        }
        self
    }

    /// Add a conditional edge: after `from` completes, `selector` maps the
    /// state to a key and `targets` maps the key to the next node.
    #[must_use]
    pub fn add_conditional_edge(
        mut self,
        from: NodeId,
        selector: RouteSelector,
        targets: FxHashMap<String, NodeId>,
    ) -> Self {
        self.conditional
            .insert(from, ConditionalEdge { selector, targets });
        self
    }

    /// Validate the topology and produce an executable [`WorkflowGraph`].
    pub fn compile(self) -> Result<WorkflowGraph, GraphError> {
        let entry = self
            .edges
            .get(&NodeId::Start)
            .cloned()
            .ok_or(GraphError::MissingEntry)?;

        let known = |id: &NodeId| id.is_end() || self.nodes.contains_key(id);

        for (from, to) in &self.edges {
            if !known(to) {
                return Err(GraphError::UnknownTarget {
                    from: from.to_string(),
                    to: to.to_string(),
                });
            }
            if self.conditional.contains_key(from) {
                return Err(GraphError::AmbiguousExit {
                    node: from.to_string(),
                });
            }
        }
        for (from, edge) in &self.conditional {
            for to in edge.targets.values() {
                if !known(to) {
                    return Err(GraphError::UnknownTarget {
                        from: from.to_string(),
                        to: to.to_string(),
                    });
                }
            }
        }
        for id in self.nodes.keys() {
            if !self.edges.contains_key(id) && !self.conditional.contains_key(id) {
                return Err(GraphError::DeadEnd {
                    node: id.to_string(),
                });
            }
        }

        Ok(WorkflowGraph {
            nodes: self.nodes,
            edges: self.edges,
            conditional: self.conditional,
            entry,
        })
    }
}

/// A compiled, immutable workflow graph.
pub struct WorkflowGraph {
    nodes: FxHashMap<NodeId, Arc<dyn Node>>,
    edges: FxHashMap<NodeId, NodeId>,
    conditional: FxHashMap<NodeId, ConditionalEdge>,
    entry: NodeId,
}

impl WorkflowGraph {
    /// First executable node (target of the Start edge).
    pub fn entry(&self) -> &NodeId {
        &self.entry
    }

    pub fn node(&self, id: &NodeId) -> Option<Arc<dyn Node>> {
        self.nodes.get(id).cloned()
    }

    /// Route out of `from` given the post-node state.
    ///
    /// Conditional edges take precedence; an unknown selector key or a node
    /// with no out-edge is a fatal [`EngineError::Routing`].
    pub fn next(&self, from: &NodeId, state: &WorkflowState) -> Result<NodeId, EngineError> {
        if let Some(edge) = self.conditional.get(from) {
            let key = (edge.selector)(state);
            return edge
                .targets
                .get(&key)
                .cloned()
                .ok_or_else(|| EngineError::Routing {
                    node: from.to_string(),
                    key,
                });
        }
        self.edges
            .get(from)
            .cloned()
            .ok_or_else(|| EngineError::Routing {
                node: from.to_string(),
                key: "<unconditional>".to_string(),
            })
    }

    /// The unconditional successor of a node, if it has one. Used to find
    /// the post-gate node when resuming a paused session.
    pub fn successor(&self, from: &NodeId) -> Option<&NodeId> {
        self.edges.get(from)
    }
}

impl std::fmt::Debug for WorkflowGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowGraph")
            .field("entry", &self.entry)
            .field("nodes", &self.nodes.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
