//! Conditional routing.
//!
//! A conditional edge pairs a selector function with a fixed map of edge keys
//! to target nodes. Selectors receive the state by shared reference and so
//! cannot mutate it; routing decisions must be a pure function of the state.

use rustc_hash::FxHashMap;
use std::sync::Arc;

use super::NodeId;
use crate::state::WorkflowState;

/// Pure routing function: maps the post-node state to an edge key.
pub type RouteSelector = Arc<dyn Fn(&WorkflowState) -> String + Send + Sync + 'static>;

/// A conditional edge leaving a node.
#[derive(Clone)]
pub struct ConditionalEdge {
    /// Selector evaluated after the source node completes.
    pub selector: RouteSelector,
    /// Edge key to target node. Keys produced by the selector must appear
    /// here; an unknown key is a fatal routing error at runtime.
    pub targets: FxHashMap<String, NodeId>,
}

impl std::fmt::Debug for ConditionalEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionalEdge")
            .field("targets", &self.targets)
            .finish_non_exhaustive()
    }
}
