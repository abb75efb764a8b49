//! The banking assistant graph: the concrete node set and edges wired onto
//! the general-purpose engine.

pub mod classifier;
pub mod client;
pub mod nodes;

pub use classifier::{
    Classification, ClassifierError, ExtractedEntities, IntentClassifier, RuleClassifier,
};
pub use client::{BankingClient, BalancePayload, DownstreamError, TransferReceipt};

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::config::EngineConfig;
use crate::engine::gate::{ApprovalGate, GatePredicate};
use crate::graph::{GraphBuilder, GraphError, NodeId, WorkflowGraph};
use crate::store::Stores;

pub const VALIDATE_INPUT: &str = "validate_input";
pub const CONFIDENCE_CHECK: &str = "confidence_check";
pub const CLARIFICATION: &str = "clarification";
pub const BALANCE_INQUIRY: &str = "balance_inquiry";
pub const MONEY_TRANSFER_PREPARE: &str = "money_transfer_prepare";
pub const MONEY_TRANSFER_HIL: &str = "money_transfer_hil";
pub const MONEY_TRANSFER_EXECUTE: &str = "money_transfer_execute";
pub const ACCOUNT_STATEMENT: &str = "account_statement";
pub const LOAN_INQUIRY: &str = "loan_inquiry";
pub const FALLBACK: &str = "fallback";

/// Build the banking workflow graph.
///
/// ```text
/// start -> validate_input -> confidence_check -(route_intent)->
///   balance_inquiry | account_statement | loan_inquiry | fallback |
///   clarification | money_transfer_prepare -> money_transfer_hil
///                                          -> money_transfer_execute -> end
/// ```
pub fn banking_graph(
    classifier: Arc<dyn IntentClassifier>,
    client: Arc<BankingClient>,
    stores: &Stores,
    config: &EngineConfig,
) -> Result<WorkflowGraph, GraphError> {
    let gate_predicate =
        GatePredicate::amount_at_least(config.gate.threshold).or(GatePredicate::review_flagged());
    let gate = ApprovalGate::new(
        gate_predicate,
        stores.approvals.clone(),
        stores.checkpoints.clone(),
    )
    .with_auto_approve(config.gate.auto_approve)
    .with_timeout_seconds(config.gate.timeout_seconds);

    let mut routes = FxHashMap::default();
    routes.insert("balance_inquiry".to_string(), NodeId::named(BALANCE_INQUIRY));
    routes.insert(
        "money_transfer".to_string(),
        NodeId::named(MONEY_TRANSFER_PREPARE),
    );
    routes.insert(
        "account_statement".to_string(),
        NodeId::named(ACCOUNT_STATEMENT),
    );
    routes.insert("loan_inquiry".to_string(), NodeId::named(LOAN_INQUIRY));
    routes.insert("fallback".to_string(), NodeId::named(FALLBACK));
    routes.insert("clarify".to_string(), NodeId::named(CLARIFICATION));

    GraphBuilder::new()
        .add_node(
            NodeId::named(VALIDATE_INPUT),
            nodes::ValidateInput::new(classifier),
        )
        .add_node(
            NodeId::named(CONFIDENCE_CHECK),
            nodes::ConfidenceCheck::new(config.confidence_threshold),
        )
        .add_node(NodeId::named(CLARIFICATION), nodes::Clarification)
        .add_node(
            NodeId::named(BALANCE_INQUIRY),
            nodes::BalanceInquiry::new(client.clone()),
        )
        .add_node(
            NodeId::named(MONEY_TRANSFER_PREPARE),
            nodes::TransferPrepare::new(config.gate.threshold),
        )
        .add_node(NodeId::named(MONEY_TRANSFER_HIL), gate)
        .add_node(
            NodeId::named(MONEY_TRANSFER_EXECUTE),
            nodes::TransferExecute::new(client.clone()),
        )
        .add_node(
            NodeId::named(ACCOUNT_STATEMENT),
            nodes::AccountStatement::new(client.clone()),
        )
        .add_node(NodeId::named(LOAN_INQUIRY), nodes::LoanInquiry::new(client))
        .add_node(NodeId::named(FALLBACK), nodes::Fallback)
        .add_edge(NodeId::Start, NodeId::named(VALIDATE_INPUT))
        .add_edge(
            NodeId::named(VALIDATE_INPUT),
            NodeId::named(CONFIDENCE_CHECK),
        )
        .add_conditional_edge(
            NodeId::named(CONFIDENCE_CHECK),
            Arc::new(nodes::route_intent),
            routes,
        )
        .add_edge(
            NodeId::named(MONEY_TRANSFER_PREPARE),
            NodeId::named(MONEY_TRANSFER_HIL),
        )
        .add_edge(
            NodeId::named(MONEY_TRANSFER_HIL),
            NodeId::named(MONEY_TRANSFER_EXECUTE),
        )
        .add_edge(NodeId::named(MONEY_TRANSFER_EXECUTE), NodeId::End)
        .add_edge(NodeId::named(BALANCE_INQUIRY), NodeId::End)
        .add_edge(NodeId::named(ACCOUNT_STATEMENT), NodeId::End)
        .add_edge(NodeId::named(LOAN_INQUIRY), NodeId::End)
        .add_edge(NodeId::named(FALLBACK), NodeId::End)
        .add_edge(NodeId::named(CLARIFICATION), NodeId::End)
        .compile()
}
