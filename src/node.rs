//! Executable workflow nodes.
//!
//! A node is one unit of work in the graph: it receives the current
//! [`WorkflowState`], does its job, and returns the post-state. Recoverable
//! failures (a downstream HTTP error, a classifier outage) belong *in* the
//! state via [`WorkflowState::record_error`]; returning `Err` aborts the turn
//! and marks the session failed, so it is reserved for storage faults and
//! broken invariants.

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

use crate::state::WorkflowState;
use crate::store::StoreError;

/// Execution context handed to a node for one invocation.
#[derive(Clone, Debug)]
pub struct NodeContext {
    /// Identifier of the node being executed.
    pub node_id: String,
    /// Session this turn belongs to.
    pub session_id: String,
    /// User driving the conversation.
    pub user_id: String,
}

/// Core trait for workflow nodes.
///
/// Implementations hold their collaborators (HTTP client, stores, predicate)
/// as owned fields; the engine only sees the trait object.
#[async_trait]
pub trait Node: Send + Sync {
    async fn run(
        &self,
        state: WorkflowState,
        ctx: NodeContext,
    ) -> Result<WorkflowState, NodeError>;
}

/// Fatal node failures that abort the current turn.
#[derive(Debug, Error, Diagnostic)]
pub enum NodeError {
    /// Required state is missing and the node cannot proceed.
    #[error("missing expected input: {what}")]
    #[diagnostic(
        code(tellerflow::node::missing_input),
        help("Check that an upstream node produced `{what}`.")
    )]
    MissingInput { what: &'static str },

    /// An engine invariant did not hold (e.g. executing past the gate
    /// without an approval decision).
    #[error("invariant violated: {0}")]
    #[diagnostic(code(tellerflow::node::invariant))]
    Invariant(String),

    /// Persistence failed mid-node; fatal for the turn.
    #[error(transparent)]
    #[diagnostic(code(tellerflow::node::storage))]
    Storage(#[from] StoreError),

    /// JSON encode/decode failure on persisted state.
    #[error(transparent)]
    #[diagnostic(code(tellerflow::node::serde))]
    Serde(#[from] serde_json::Error),
}
