//! The banking assistant's node set.
//!
//! Node flow: `validate_input` classifies the utterance and merges carried
//! context; `confidence_check` flags turns for review and opens slot-filling
//! clarifications; `route_intent` (a selector, not a node) fans out to the
//! five branches; the transfer branch runs prepare → gate → execute.
//!
//! Nodes never raise recoverable failures: downstream and classifier errors
//! land in `state.error` and the turn still completes with a reply.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::classifier::{IntentClassifier, RuleClassifier};
use super::client::BankingClient;
use crate::node::{Node, NodeContext, NodeError};
use crate::state::{GateDecision, Intent, TransferOrder, TurnReply, WorkflowState};

/// Classify the message and merge carried slots into the state.
pub struct ValidateInput {
    classifier: Arc<dyn IntentClassifier>,
    rules: RuleClassifier,
}

impl ValidateInput {
    pub fn new(classifier: Arc<dyn IntentClassifier>) -> Self {
        Self {
            classifier,
            rules: RuleClassifier::new(),
        }
    }
}

#[async_trait]
impl Node for ValidateInput {
    async fn run(
        &self,
        mut state: WorkflowState,
        _ctx: NodeContext,
    ) -> Result<WorkflowState, NodeError> {
        if state.message.trim().is_empty() {
            state.intent = Some(Intent::Fallback);
            state.record_error("empty message");
            return Ok(state);
        }

        let classification = match self.classifier.classify(&state.message).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "primary classifier failed; using rules");
                let mut fallback = self.rules.classify_rules(&state.message);
                fallback.confidence = 0.50;
                fallback
            }
        };

        state.intent = Some(classification.intent);
        state.confidence = Some(classification.confidence);
        if classification.entities.amount.is_some() {
            state.amount = classification.entities.amount;
        }
        if classification.entities.recipient.is_some() {
            state.recipient = classification.entities.recipient;
        }

        // Fill slots the current message omitted from the carried context.
        if state.awaiting_completion {
            if state.amount.is_none() {
                state.amount = state.context_amount;
            }
            if state.recipient.is_none() {
                state.recipient = state.context_recipient.clone();
            }
        }
        Ok(state)
    }
}

/// Flag low-confidence turns, detect conversational completion, and open a
/// clarification when a transfer is missing a slot.
pub struct ConfidenceCheck {
    confidence_threshold: f64,
}

impl ConfidenceCheck {
    pub fn new(confidence_threshold: f64) -> Self {
        Self {
            confidence_threshold,
        }
    }
}

#[async_trait]
impl Node for ConfidenceCheck {
    async fn run(
        &self,
        mut state: WorkflowState,
        _ctx: NodeContext,
    ) -> Result<WorkflowState, NodeError> {
        // A previous turn left a slot open; see whether this one closed it.
        if state.awaiting_completion {
            if state.amount.is_some() && state.recipient.is_some() {
                state.intent = Some(Intent::MoneyTransfer);
                state.awaiting_completion = false;
                state.context_amount = None;
                state.context_recipient = None;
                state.needs_approval = true;
                state.approval_reason = Some("conversational completion".to_string());
                return Ok(state);
            }
            // Still incomplete: remember what we have and ask again.
            if state.amount.is_some() {
                state.context_amount = state.amount;
            }
            if state.recipient.is_some() {
                state.context_recipient = state.recipient.clone();
            }
            return Ok(state);
        }

        if state
            .confidence
            .is_some_and(|c| c < self.confidence_threshold)
        {
            state.needs_approval = true;
            state.approval_reason = Some("low confidence".to_string());
            return Ok(state);
        }

        if state.intent == Some(Intent::MoneyTransfer)
            && (state.amount.is_none() || state.recipient.is_none())
        {
            state.context_amount = state.amount;
            state.context_recipient = state.recipient.clone();
            state.awaiting_completion = true;
        }
        Ok(state)
    }
}

/// Selector: pick the branch after `confidence_check`.
///
/// Review-flagged turns take the gated transfer branch regardless of intent
/// so the approval gate can pause them.
pub fn route_intent(state: &WorkflowState) -> String {
    if state.awaiting_completion {
        return "clarify".to_string();
    }
    if state.needs_approval || state.intent == Some(Intent::MoneyTransfer) {
        return "money_transfer".to_string();
    }
    match state.intent {
        Some(Intent::BalanceInquiry) => "balance_inquiry",
        Some(Intent::AccountStatement) => "account_statement",
        Some(Intent::LoanInquiry) => "loan_inquiry",
        _ => "fallback",
    }
    .to_string()
}

/// Terminal that asks for the missing transfer slot.
pub struct Clarification;

#[async_trait]
impl Node for Clarification {
    async fn run(
        &self,
        mut state: WorkflowState,
        _ctx: NodeContext,
    ) -> Result<WorkflowState, NodeError> {
        let question = match (state.context_amount, state.context_recipient.as_deref()) {
            (None, Some(recipient)) => {
                format!("How much would you like to send to {recipient}?")
            }
            (Some(amount), None) => format!("Who should receive the {amount}?"),
            _ => "Who would you like to send money to, and how much?".to_string(),
        };
        state.response = Some(TurnReply::needs_input(question));
        Ok(state)
    }
}

/// Fetch the account balance.
pub struct BalanceInquiry {
    client: Arc<BankingClient>,
}

impl BalanceInquiry {
    pub fn new(client: Arc<BankingClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Node for BalanceInquiry {
    async fn run(
        &self,
        mut state: WorkflowState,
        _ctx: NodeContext,
    ) -> Result<WorkflowState, NodeError> {
        let account = state.from_account.clone().unwrap_or_default();
        match self.client.balance(&account).await {
            Ok(payload) => {
                state.response = Some(TurnReply::completed(
                    format!(
                        "Your account {} balance is {}.",
                        payload.account_id, payload.balance
                    ),
                    Some(json!({
                        "accountId": payload.account_id,
                        "balance": payload.balance,
                    })),
                ));
            }
            Err(e) => {
                state.record_error(e.to_string());
                state.response = Some(TurnReply::completed(
                    "I couldn't reach your account right now. Please try again shortly.",
                    Some(json!({"success": false})),
                ));
            }
        }
        Ok(state)
    }
}

/// Assemble the transfer order and auto-approve low-value, unflagged turns.
pub struct TransferPrepare {
    threshold: f64,
}

impl TransferPrepare {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }
}

#[async_trait]
impl Node for TransferPrepare {
    async fn run(
        &self,
        mut state: WorkflowState,
        _ctx: NodeContext,
    ) -> Result<WorkflowState, NodeError> {
        if let (Some(amount), Some(recipient), Some(from)) = (
            state.amount,
            state.recipient.clone(),
            state.from_account.clone(),
        ) {
            state.request_data = Some(TransferOrder {
                from_account: from,
                to_account: recipient,
                amount,
            });
        }

        // The decision belongs here, in a node, where it persists; the
        // routing selector cannot write state.
        let below_threshold = state.amount.is_some_and(|a| a < self.threshold);
        if below_threshold && !state.needs_approval && state.hil_decision.is_none() {
            state.hil_decision = Some(GateDecision::auto_approved());
        }
        Ok(state)
    }
}

/// Execute the approved transfer downstream.
pub struct TransferExecute {
    client: Arc<BankingClient>,
}

impl TransferExecute {
    pub fn new(client: Arc<BankingClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Node for TransferExecute {
    async fn run(
        &self,
        mut state: WorkflowState,
        ctx: NodeContext,
    ) -> Result<WorkflowState, NodeError> {
        if !state.is_approved() {
            return Err(NodeError::Invariant(format!(
                "transfer execution reached without approval (session {})",
                ctx.session_id
            )));
        }

        // Older pause-era checkpoints may predate `request_data`.
        let Some(order) = state.reconstruct_request_data().cloned() else {
            state.response = Some(TurnReply::completed(
                "Your request was reviewed and approved, but it named no transfer to execute.",
                None,
            ));
            return Ok(state);
        };

        match self.client.transfer(&order).await {
            Ok(receipt) => {
                let message = if receipt.message.is_empty() {
                    format!(
                        "Transferred {} from {} to {}.",
                        order.amount, order.from_account, order.to_account
                    )
                } else {
                    receipt.message.clone()
                };
                state.response = Some(TurnReply::completed(
                    message,
                    Some(json!({
                        "success": receipt.success,
                        "message": receipt.message,
                        "fromAccount": order.from_account,
                        "toAccount": order.to_account,
                        "amount": order.amount,
                    })),
                ));
            }
            Err(e) => {
                state.record_error(e.to_string());
                state.response = Some(TurnReply::completed(
                    "The transfer could not be completed. No money has moved.",
                    Some(json!({"success": false})),
                ));
            }
        }
        Ok(state)
    }
}

/// Fetch the account statement.
pub struct AccountStatement {
    client: Arc<BankingClient>,
}

impl AccountStatement {
    pub fn new(client: Arc<BankingClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Node for AccountStatement {
    async fn run(
        &self,
        mut state: WorkflowState,
        _ctx: NodeContext,
    ) -> Result<WorkflowState, NodeError> {
        let account = state.from_account.clone().unwrap_or_default();
        match self.client.statement(&account).await {
            Ok(text) => {
                state.response = Some(TurnReply::completed(
                    "Here is your recent account statement.",
                    Some(json!({"accountId": account, "statement": text})),
                ));
            }
            Err(e) => {
                state.record_error(e.to_string());
                state.response = Some(TurnReply::completed(
                    "I couldn't fetch your statement right now.",
                    Some(json!({"success": false})),
                ));
            }
        }
        Ok(state)
    }
}

/// Fetch loan information.
pub struct LoanInquiry {
    client: Arc<BankingClient>,
}

impl LoanInquiry {
    pub fn new(client: Arc<BankingClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Node for LoanInquiry {
    async fn run(
        &self,
        mut state: WorkflowState,
        _ctx: NodeContext,
    ) -> Result<WorkflowState, NodeError> {
        let account = state.from_account.clone().unwrap_or_default();
        match self.client.loan(&account).await {
            Ok(text) => {
                state.response = Some(TurnReply::completed(
                    "Here is what I found about loans for your account.",
                    Some(json!({"accountId": account, "loan": text})),
                ));
            }
            Err(e) => {
                state.record_error(e.to_string());
                state.response = Some(TurnReply::completed(
                    "I couldn't fetch loan information right now.",
                    Some(json!({"success": false})),
                ));
            }
        }
        Ok(state)
    }
}

/// Canned help for anything we did not understand.
pub struct Fallback;

#[async_trait]
impl Node for Fallback {
    async fn run(
        &self,
        mut state: WorkflowState,
        _ctx: NodeContext,
    ) -> Result<WorkflowState, NodeError> {
        state.response = Some(TurnReply::completed(
            "I can help with balance inquiries, money transfers, account statements, \
             and loan questions. What would you like to do?",
            None,
        ));
        Ok(state)
    }
}
