//! Multi-turn conversations, clarification, low confidence, and the
//! non-transfer branches.

mod common;

use std::sync::Arc;

use common::{harness, harness_with_classifier, BrokenClassifier, FixedClassifier};
use httpmock::prelude::*;
use serde_json::json;

use tellerflow::engine::{ApprovalDecision, ChatOutcome, ChatRequest, DecisionOutcome};
use tellerflow::state::{Intent, ReplyStatus};
use tellerflow::store::{CheckpointStore, SessionStatus, SessionStore};

fn chat(message: &str, session_id: Option<String>) -> ChatRequest {
    ChatRequest {
        message: message.to_string(),
        session_id,
        user_id: Some("u1".to_string()),
    }
}

#[tokio::test]
async fn conversational_completion_requires_approval() {
    let server = MockServer::start_async().await;
    let transfer = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/transfer").json_body(json!({
                "fromAccount": "123",
                "toAccount": "kiran",
                "amount": 1000.0,
            }));
            then.status(200).json_body(json!({"success": true}));
        })
        .await;

    let h = harness(&server.base_url());

    // Turn 1: recipient only. The assistant asks for the amount.
    let ChatOutcome::Completed {
        session_id, reply, ..
    } = h
        .service
        .chat(chat("send money to kiran", None))
        .await
        .unwrap()
    else {
        panic!("expected clarification reply");
    };
    assert_eq!(reply.status, ReplyStatus::NeedsInput);
    assert!(reply.message.contains("kiran"));

    let session = h.stores.sessions.get(&session_id).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Active);
    let carried = session.workflow_state.as_ref().unwrap();
    assert!(carried.awaiting_completion);
    assert_eq!(carried.context_recipient.as_deref(), Some("kiran"));

    // Turn 2: the bare amount completes the transfer from context and
    // pauses regardless of value.
    let ChatOutcome::Pending { envelope, .. } = h
        .service
        .chat(chat("1000", Some(session_id.clone())))
        .await
        .unwrap()
    else {
        panic!("expected pending approval");
    };
    assert_eq!(envelope.amount, Some(1000.0));
    assert_eq!(envelope.recipient.as_deref(), Some("kiran"));

    let session = h.stores.sessions.get(&session_id).await.unwrap().unwrap();
    assert_eq!(session.execution_count, 2);
    assert_eq!(
        session
            .workflow_state
            .as_ref()
            .unwrap()
            .approval_reason
            .as_deref(),
        Some("conversational completion")
    );

    // Approval releases the held transfer.
    let decision = h
        .service
        .decide(
            &session_id,
            ApprovalDecision {
                approver_id: "m1".to_string(),
                approved: true,
                reason: None,
            },
        )
        .await
        .unwrap();
    assert!(matches!(decision, DecisionOutcome::Approved { .. }));
    assert_eq!(transfer.hits_async().await, 1);
}

#[tokio::test]
async fn low_confidence_pauses_for_review() {
    let server = MockServer::start_async().await;
    let h = harness_with_classifier(
        &server.base_url(),
        Arc::new(FixedClassifier {
            intent: Intent::Fallback,
            confidence: 0.45,
            amount: None,
            recipient: None,
        }),
    );

    let ChatOutcome::Pending { session_id, .. } = h
        .service
        .chat(chat("wanna check something", None))
        .await
        .unwrap()
    else {
        panic!("expected pending approval");
    };

    let session = h.stores.sessions.get(&session_id).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::PendingApproval);
    assert_eq!(
        session
            .workflow_state
            .as_ref()
            .unwrap()
            .approval_reason
            .as_deref(),
        Some("low confidence")
    );
}

#[tokio::test]
async fn exact_threshold_confidence_proceeds() {
    let server = MockServer::start_async().await;
    let balance = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/balance")
                .query_param("accountId", "123");
            then.status(200)
                .json_body(json!({"accountId": "123", "balance": 5432.10}));
        })
        .await;

    let h = harness_with_classifier(
        &server.base_url(),
        Arc::new(FixedClassifier {
            intent: Intent::BalanceInquiry,
            confidence: 0.80,
            amount: None,
            recipient: None,
        }),
    );

    let outcome = h
        .service
        .chat(chat("What is my balance?", None))
        .await
        .unwrap();
    assert!(matches!(outcome, ChatOutcome::Completed { .. }));
    assert_eq!(balance.hits_async().await, 1);
}

#[tokio::test]
async fn balance_inquiry_round_trip() {
    let server = MockServer::start_async().await;
    let balance = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/balance")
                .query_param("accountId", "123");
            then.status(200)
                .json_body(json!({"accountId": "123", "balance": 5432.10}));
        })
        .await;

    let h = harness(&server.base_url());
    let ChatOutcome::Completed {
        session_id, reply, ..
    } = h
        .service
        .chat(chat("What is my balance?", None))
        .await
        .unwrap()
    else {
        panic!("expected terminal reply");
    };
    assert_eq!(reply.data.as_ref().unwrap()["balance"], json!(5432.10));

    let session = h.stores.sessions.get(&session_id).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Completed);

    // Three nodes ran: validate, confidence check, balance fetch.
    let checkpoints = h.stores.checkpoints.list(&session_id).await.unwrap();
    assert_eq!(checkpoints.len(), 6);
    assert_eq!(balance.hits_async().await, 1);
}

#[tokio::test]
async fn empty_message_falls_back_without_downstream_calls() {
    let server = MockServer::start_async().await;
    let any_call = server
        .mock_async(|when, then| {
            when.path_includes("/api/");
            then.status(200).json_body(json!({}));
        })
        .await;

    let h = harness(&server.base_url());
    let ChatOutcome::Completed {
        session_id, reply, ..
    } = h.service.chat(chat("", None)).await.unwrap()
    else {
        panic!("expected terminal reply");
    };
    assert_eq!(reply.status, ReplyStatus::Completed);

    let session = h.stores.sessions.get(&session_id).await.unwrap().unwrap();
    let state = session.workflow_state.as_ref().unwrap();
    assert_eq!(state.intent, Some(Intent::Fallback));
    assert_eq!(state.error.as_deref(), Some("empty message"));
    assert_eq!(any_call.hits_async().await, 0);
}

#[tokio::test]
async fn statement_and_loan_return_textual_payloads() {
    let server = MockServer::start_async().await;
    let statement = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/statement")
                .query_param("accountId", "123");
            then.status(200).body("3 transactions this month");
        })
        .await;
    let loan = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/loan")
                .query_param("accountId", "123");
            then.status(200).body("personal loan at 11.5%");
        })
        .await;

    let h = harness(&server.base_url());
    let ChatOutcome::Completed { reply, .. } = h
        .service
        .chat(chat("Show my account statement", None))
        .await
        .unwrap()
    else {
        panic!("expected terminal reply");
    };
    assert_eq!(
        reply.data.as_ref().unwrap()["statement"],
        json!("3 transactions this month")
    );

    let ChatOutcome::Completed { reply, .. } = h
        .service
        .chat(chat("What loan options do I have?", None))
        .await
        .unwrap()
    else {
        panic!("expected terminal reply");
    };
    assert_eq!(
        reply.data.as_ref().unwrap()["loan"],
        json!("personal loan at 11.5%")
    );

    assert_eq!(statement.hits_async().await, 1);
    assert_eq!(loan.hits_async().await, 1);
}

#[tokio::test]
async fn downstream_error_completes_with_failure_payload() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/balance");
            then.status(503).body("maintenance window");
        })
        .await;

    let h = harness(&server.base_url());
    let ChatOutcome::Completed {
        session_id, reply, ..
    } = h
        .service
        .chat(chat("What is my balance?", None))
        .await
        .unwrap()
    else {
        panic!("expected terminal reply");
    };
    assert_eq!(reply.data.as_ref().unwrap()["success"], json!(false));

    // The engine itself succeeded; the session completes rather than fails.
    let session = h.stores.sessions.get(&session_id).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert!(session.workflow_state.as_ref().unwrap().error.is_some());
}

#[tokio::test]
async fn classifier_outage_falls_back_to_rules_at_half_confidence() {
    let server = MockServer::start_async().await;
    let h = harness_with_classifier(&server.base_url(), Arc::new(BrokenClassifier));

    // The rule fallback pins confidence at 0.50, which lands the turn in
    // human review rather than failing it.
    let outcome = h
        .service
        .chat(chat("What is my balance?", None))
        .await
        .unwrap();
    let ChatOutcome::Pending { session_id, .. } = outcome else {
        panic!("expected pending approval");
    };
    let session = h.stores.sessions.get(&session_id).await.unwrap().unwrap();
    let state = session.workflow_state.as_ref().unwrap();
    assert_eq!(state.intent, Some(Intent::BalanceInquiry));
    assert_eq!(state.confidence, Some(0.50));
    assert_eq!(state.approval_reason.as_deref(), Some("low confidence"));
}
