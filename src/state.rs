//! Mutable per-turn workflow state.
//!
//! The state is a schema with explicit optional fields rather than an open
//! map: every field a node may read or write is declared here, and the whole
//! struct round-trips through JSON unchanged so checkpoints can be restored
//! bit-for-bit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Recognized conversational intents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    BalanceInquiry,
    MoneyTransfer,
    AccountStatement,
    LoanInquiry,
    Fallback,
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Intent::BalanceInquiry => "balance_inquiry",
            Intent::MoneyTransfer => "money_transfer",
            Intent::AccountStatement => "account_statement",
            Intent::LoanInquiry => "loan_inquiry",
            Intent::Fallback => "fallback",
        };
        f.write_str(s)
    }
}

/// Outcome of the human-in-the-loop gate for this turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GateDecision {
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approver_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// True when the gate decided without a human (below threshold).
    #[serde(default)]
    pub auto: bool,
    pub decided_at: DateTime<Utc>,
}

impl GateDecision {
    /// Automatic pass issued by the gate or the prepare node.
    pub fn auto_approved() -> Self {
        Self {
            approved: true,
            approver_id: None,
            reason: None,
            auto: true,
            decided_at: Utc::now(),
        }
    }

    /// Human decision recorded by the approve/reject transition.
    pub fn by_human(approved: bool, approver_id: &str, reason: Option<String>) -> Self {
        Self {
            approved,
            approver_id: Some(approver_id.to_string()),
            reason,
            auto: false,
            decided_at: Utc::now(),
        }
    }
}

/// Prepared downstream transfer payload. Field names match the collaborator's
/// wire contract.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferOrder {
    pub from_account: String,
    pub to_account: String,
    pub amount: f64,
}

/// Terminal classification of a turn's reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplyStatus {
    Completed,
    PendingApproval,
    NeedsInput,
    Rejected,
}

/// The reply a terminal node leaves in the state for the facade to return.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TurnReply {
    pub status: ReplyStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl TurnReply {
    pub fn completed(message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            status: ReplyStatus::Completed,
            message: message.into(),
            data,
        }
    }

    pub fn needs_input(message: impl Into<String>) -> Self {
        Self {
            status: ReplyStatus::NeedsInput,
            message: message.into(),
            data: None,
        }
    }
}

/// The graph's mutable state for one turn (and its resume).
///
/// Only `message` is required on entry; nodes fill the rest in. The `halt`
/// flag is the engine-internal stop sentinel and serializes as `_halt` so
/// older checkpoints remain readable.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    /// Latest user utterance.
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_account: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_data: Option<TransferOrder>,

    // Carry-forward slots for multi-turn completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_recipient: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub awaiting_completion: bool,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub needs_approval: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hil_decision: Option<GateDecision>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<TurnReply>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Node identifiers entered this turn, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub execution_history: Vec<String>,

    /// Stop sentinel; when set the engine runs no further nodes.
    #[serde(rename = "_halt", default, skip_serializing_if = "std::ops::Not::not")]
    pub halt: bool,
}

impl WorkflowState {
    /// State for a fresh turn, before any node has run.
    pub fn for_message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    /// True once the gate (or the prepare node) approved this turn.
    pub fn is_approved(&self) -> bool {
        self.hil_decision.as_ref().is_some_and(|d| d.approved)
    }

    /// Record a non-fatal failure without stopping the graph.
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }

    /// Rebuild `request_data` from the individual slots when a checkpoint
    /// predates the field. Returns the order if one is now available.
    pub fn reconstruct_request_data(&mut self) -> Option<&TransferOrder> {
        if self.request_data.is_none() {
            if let (Some(amount), Some(recipient), Some(from)) =
                (self.amount, self.recipient.as_ref(), self.from_account.as_ref())
            {
                self.request_data = Some(TransferOrder {
                    from_account: from.clone(),
                    to_account: recipient.clone(),
                    amount,
                });
            }
        }
        self.request_data.as_ref()
    }
}

/// Decode the workflow state out of a checkpoint payload.
///
/// Historical checkpoints sometimes stored a session envelope with the state
/// under a `workflow_state` field; current checkpoints store the raw state.
/// Both shapes are accepted.
pub fn unwrap_checkpoint_state(payload: &Value) -> Result<WorkflowState, serde_json::Error> {
    let raw = payload.get("workflow_state").unwrap_or(payload);
    serde_json::from_value(raw.clone())
}
