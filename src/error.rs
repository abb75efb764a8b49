//! Engine-level error taxonomy.
//!
//! Every error the facade can surface maps to one of these kinds. Node
//! implementations do not raise across the engine boundary: recoverable
//! failures (downstream HTTP, classifier) are written into the workflow
//! state, and only storage and routing faults abort a turn.

use miette::Diagnostic;
use thiserror::Error;

use crate::store::StoreError;

/// Errors surfaced by the engine and the request/response facade.
#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    /// Malformed or unacceptable request input. The session is not mutated.
    #[error("validation failed: {0}")]
    #[diagnostic(
        code(tellerflow::validation),
        help("Check the request body shape and required fields.")
    )]
    Validation(String),

    /// Unknown session or approval identifier.
    #[error("not found: {0}")]
    #[diagnostic(code(tellerflow::not_found))]
    NotFound(String),

    /// Operation conflicts with the current lifecycle state (e.g. deciding
    /// an approval that is no longer pending). No state change occurs.
    #[error("conflict: {0}")]
    #[diagnostic(
        code(tellerflow::conflict),
        help("The session or approval has already moved past this transition.")
    )]
    Conflict(String),

    /// A conditional edge produced a key with no target, or a node has no
    /// outgoing edge. Fatal for the turn; the session is marked failed.
    #[error("no route out of node `{node}` for key `{key}`")]
    #[diagnostic(
        code(tellerflow::routing),
        help("Register the `{key}` target on the conditional edge leaving `{node}`.")
    )]
    Routing { node: String, key: String },

    /// Checkpoint/session/approval persistence failed. Fatal for the turn.
    #[error(transparent)]
    #[diagnostic(code(tellerflow::storage))]
    Storage(#[from] StoreError),

    /// A node aborted the turn with an unrecoverable fault.
    #[error("node `{node}` failed: {message}")]
    #[diagnostic(code(tellerflow::node))]
    Node { node: String, message: String },
}

impl EngineError {
    /// Shorthand for a [`EngineError::NotFound`] about a session id.
    pub fn unknown_session(session_id: &str) -> Self {
        Self::NotFound(format!("session {session_id}"))
    }
}
