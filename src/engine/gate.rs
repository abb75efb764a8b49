//! The human-in-the-loop approval gate.
//!
//! The gate is an ordinary graph node with a pause predicate. When the
//! predicate holds it creates a pending approval record, persists a `pause`
//! checkpoint carrying the full state, and raises the halt flag so the
//! executor yields the turn. When it does not hold (or the gate is set to
//! auto-approve) it stamps an automatic decision and lets execution continue.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use crate::node::{Node, NodeContext, NodeError};
use crate::state::{GateDecision, ReplyStatus, TurnReply, WorkflowState};
use crate::store::{
    ApprovalRequest, ApprovalStore, CheckpointMeta, CheckpointPhase, CheckpointStore,
};

/// Composable pause predicate over the workflow state.
///
/// Predicates are values, not subclasses: combine them with [`or`](Self::or)
/// and [`and`](Self::and) so a policy like "high amount, or flagged for
/// review" stays a single expression.
#[derive(Clone)]
pub struct GatePredicate(Arc<dyn Fn(&WorkflowState) -> bool + Send + Sync>);

impl GatePredicate {
    pub fn new(f: impl Fn(&WorkflowState) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Pause when the transfer amount reaches `threshold` (inclusive).
    pub fn amount_at_least(threshold: f64) -> Self {
        Self::new(move |state| state.amount.is_some_and(|a| a >= threshold))
    }

    /// Pause when an upstream node flagged the turn for review.
    pub fn review_flagged() -> Self {
        Self::new(|state| state.needs_approval)
    }

    /// Pause when classifier confidence fell below `minimum` (strict `<`).
    pub fn low_confidence(minimum: f64) -> Self {
        Self::new(move |state| state.confidence.is_some_and(|c| c < minimum))
    }

    #[must_use]
    pub fn or(self, other: GatePredicate) -> Self {
        Self::new(move |state| (self.0)(state) || (other.0)(state))
    }

    #[must_use]
    pub fn and(self, other: GatePredicate) -> Self {
        Self::new(move |state| (self.0)(state) && (other.0)(state))
    }

    pub fn evaluate(&self, state: &WorkflowState) -> bool {
        (self.0)(state)
    }
}

impl std::fmt::Debug for GatePredicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("GatePredicate(..)")
    }
}

/// The gate node.
pub struct ApprovalGate {
    predicate: GatePredicate,
    approval_message: String,
    auto_approve: bool,
    timeout_seconds: u64,
    workflow_type: String,
    approvals: Arc<dyn ApprovalStore>,
    checkpoints: Arc<dyn CheckpointStore>,
}

impl ApprovalGate {
    pub fn new(
        predicate: GatePredicate,
        approvals: Arc<dyn ApprovalStore>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            predicate,
            approval_message: "This request needs a human approval before it can continue."
                .to_string(),
            auto_approve: false,
            timeout_seconds: 3_600,
            workflow_type: "banking_assist".to_string(),
            approvals,
            checkpoints,
        }
    }

    #[must_use]
    pub fn with_approval_message(mut self, message: impl Into<String>) -> Self {
        self.approval_message = message.into();
        self
    }

    /// When set the gate never pauses, regardless of the predicate.
    #[must_use]
    pub fn with_auto_approve(mut self, auto_approve: bool) -> Self {
        self.auto_approve = auto_approve;
        self
    }

    #[must_use]
    pub fn with_timeout_seconds(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    #[must_use]
    pub fn with_workflow_type(mut self, workflow_type: impl Into<String>) -> Self {
        self.workflow_type = workflow_type.into();
        self
    }

    fn pause_message(&self, state: &WorkflowState) -> String {
        match (state.amount, state.recipient.as_deref()) {
            (Some(amount), Some(recipient)) => {
                format!("Transfer of {amount} to {recipient} is awaiting approval.")
            }
            _ => self.approval_message.clone(),
        }
    }
}

#[async_trait]
impl Node for ApprovalGate {
    async fn run(
        &self,
        mut state: WorkflowState,
        ctx: NodeContext,
    ) -> Result<WorkflowState, NodeError> {
        if self.auto_approve || !self.predicate.evaluate(&state) {
            if state.hil_decision.is_none() {
                state.hil_decision = Some(GateDecision::auto_approved());
            }
            tracing::debug!(session = %ctx.session_id, "gate passed without pause");
            return Ok(state);
        }

        let request_data = match &state.request_data {
            Some(order) => serde_json::to_value(order)?,
            None => Value::Null,
        };
        let approval = ApprovalRequest::new(
            &ctx.session_id,
            &self.workflow_type,
            request_data,
            state.amount,
            state.recipient.clone(),
            self.timeout_seconds,
        );
        self.approvals.create(&approval).await?;

        state.halt = true;
        state.response = Some(TurnReply {
            status: ReplyStatus::PendingApproval,
            message: self.pause_message(&state),
            data: None,
        });

        let paused_at = Utc::now();
        let meta = CheckpointMeta {
            phase: CheckpointPhase::Pause,
            approval_id: Some(approval.approval_id.clone()),
            paused_at: Some(paused_at),
        };
        let payload = serde_json::to_value(&state)?;
        self.checkpoints
            .save(&ctx.session_id, &ctx.node_id, payload, meta)
            .await?;

        tracing::info!(
            session = %ctx.session_id,
            approval = %approval.approval_id,
            amount = ?state.amount,
            "turn suspended pending approval"
        );
        Ok(state)
    }
}
