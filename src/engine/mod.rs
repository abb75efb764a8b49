//! Execution engine: the per-node checkpoint protocol, the approval gate,
//! and the turn/resume orchestration service.

pub mod executor;
pub mod gate;
pub mod service;

pub use executor::{Engine, TurnOutcome};
pub use gate::{ApprovalGate, GatePredicate};
pub use service::{
    ApprovalDecision, ChatOutcome, ChatRequest, DecisionOutcome, PendingEnvelope, WorkflowService,
};
