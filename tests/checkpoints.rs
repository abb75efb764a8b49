//! Checkpoint log properties: ordering, pause/decision pairing, legacy
//! state envelopes, and resume safety.

mod common;

use std::sync::Arc;

use common::{harness, test_config};
use httpmock::prelude::*;
use proptest::prelude::*;
use serde_json::json;

use tellerflow::banking::{banking_graph, BankingClient, RuleClassifier};
use tellerflow::engine::{ApprovalDecision, ChatOutcome, ChatRequest, DecisionOutcome, Engine};
use tellerflow::error::EngineError;
use tellerflow::state::WorkflowState;
use tellerflow::store::{CheckpointMeta, CheckpointPhase, CheckpointStore, Stores};

fn chat(message: &str) -> ChatRequest {
    ChatRequest {
        message: message.to_string(),
        session_id: None,
        user_id: Some("u1".to_string()),
    }
}

async fn paused_transfer(h: &common::Harness) -> String {
    let outcome = h
        .service
        .chat(chat("Transfer 6000 to kiran"))
        .await
        .unwrap();
    match outcome {
        ChatOutcome::Pending { session_id, .. } => session_id,
        other => panic!("expected pending approval, got {other:?}"),
    }
}

#[tokio::test]
async fn checkpoint_log_is_strictly_ordered() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/balance");
            then.status(200)
                .json_body(json!({"accountId": "123", "balance": 1.0}));
        })
        .await;

    let h = harness(&server.base_url());
    let ChatOutcome::Completed { session_id, .. } = h
        .service
        .chat(chat("What is my balance?"))
        .await
        .unwrap()
    else {
        panic!("expected terminal reply");
    };

    let log = h.stores.checkpoints.list(&session_id).await.unwrap();
    assert_eq!(log.len(), 6);
    for pair in log.windows(2) {
        assert!(pair[0].seq < pair[1].seq);
        assert!(pair[0].created_at <= pair[1].created_at);
    }
    let phases: Vec<CheckpointPhase> = log.iter().map(|cp| cp.metadata.phase).collect();
    assert_eq!(
        phases,
        vec![
            CheckpointPhase::Start,
            CheckpointPhase::End,
            CheckpointPhase::Start,
            CheckpointPhase::End,
            CheckpointPhase::Start,
            CheckpointPhase::End,
        ]
    );
}

#[tokio::test]
async fn pause_is_followed_by_exactly_one_decision_checkpoint() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/transfer");
            then.status(200).json_body(json!({"success": true}));
        })
        .await;

    let h = harness(&server.base_url());
    let session_id = paused_transfer(&h).await;

    h.service
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

    let log = h.stores.checkpoints.list(&session_id).await.unwrap();
    let pause = log
        .iter()
        .find(|cp| cp.metadata.phase == CheckpointPhase::Pause)
        .expect("pause checkpoint");
    let decisions: Vec<_> = log
        .iter()
        .filter(|cp| {
            matches!(
                cp.metadata.phase,
                CheckpointPhase::Approved | CheckpointPhase::Rejected
            )
        })
        .collect();
    assert_eq!(decisions.len(), 1);
    assert!(decisions[0].seq > pause.seq);
    assert_eq!(decisions[0].metadata.approval_id, pause.metadata.approval_id);
}

#[tokio::test]
async fn saved_state_round_trips_bit_for_bit() {
    let stores = Stores::in_memory();
    let mut state = WorkflowState::for_message("Transfer 42.5 to asha");
    state.amount = Some(42.5);
    state.confidence = Some(0.9125);
    state.execution_history = vec!["validate_input".into()];
    let payload = serde_json::to_value(&state).unwrap();

    stores
        .checkpoints
        .save(
            "s1",
            "validate_input",
            payload.clone(),
            CheckpointMeta::phase(CheckpointPhase::End),
        )
        .await
        .unwrap();

    let loaded = stores.checkpoints.load_latest("s1").await.unwrap().unwrap();
    assert_eq!(loaded.state, payload);
    let decoded: WorkflowState = serde_json::from_value(loaded.state).unwrap();
    assert_eq!(decoded, state);
}

#[tokio::test]
async fn resume_handles_legacy_session_envelopes() {
    let server = MockServer::start_async().await;
    let transfer = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/transfer");
            then.status(200).json_body(json!({"success": true}));
        })
        .await;

    let h = harness(&server.base_url());
    let session_id = paused_transfer(&h).await;

    // Rewrite the newest checkpoint the way historical deployments stored
    // it: the state nested under a session envelope.
    let latest = h
        .stores
        .checkpoints
        .load_latest(&session_id)
        .await
        .unwrap()
        .unwrap();
    let enveloped = json!({
        "session_id": session_id,
        "status": "pending_approval",
        "workflow_state": latest.state,
    });
    h.stores
        .checkpoints
        .save(&session_id, &latest.node_id, enveloped, latest.metadata)
        .await
        .unwrap();

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
async fn resume_rebuilds_missing_request_data() {
    let server = MockServer::start_async().await;
    let transfer = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/transfer").json_body(json!({
                "fromAccount": "123",
                "toAccount": "kiran",
                "amount": 6000.0,
            }));
            then.status(200).json_body(json!({"success": true}));
        })
        .await;

    let h = harness(&server.base_url());
    let session_id = paused_transfer(&h).await;

    // An older pause-era checkpoint may predate `request_data`; strip it.
    let latest = h
        .stores
        .checkpoints
        .load_latest(&session_id)
        .await
        .unwrap()
        .unwrap();
    let mut stripped = latest.state.clone();
    stripped.as_object_mut().unwrap().remove("request_data");
    h.stores
        .checkpoints
        .save(&session_id, &latest.node_id, stripped, latest.metadata)
        .await
        .unwrap();

    h.service
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
    assert_eq!(transfer.hits_async().await, 1);
}

#[tokio::test]
async fn resume_without_approval_is_impossible() {
    let server = MockServer::start_async().await;
    let config = test_config(&server.base_url());
    let stores = Stores::in_memory();
    let client = Arc::new(BankingClient::new(&config.downstream).unwrap());
    let graph =
        banking_graph(Arc::new(RuleClassifier::new()), client, &stores, &config).unwrap();
    let engine = Engine::new(Arc::new(graph), stores.clone());

    // A pause checkpoint without any gate decision.
    let mut state = WorkflowState::for_message("Transfer 6000 to kiran");
    state.amount = Some(6000.0);
    state.halt = true;
    stores
        .checkpoints
        .save(
            "s1",
            "money_transfer_hil",
            serde_json::to_value(&state).unwrap(),
            CheckpointMeta::phase(CheckpointPhase::Pause),
        )
        .await
        .unwrap();

    let err = engine.resume("s1", "u1").await.unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));
}

proptest! {
    /// The workflow state schema survives JSON round-trips for arbitrary
    /// slot contents.
    #[test]
    fn workflow_state_roundtrip(
        message in ".{0,60}",
        amount in proptest::option::of(0.0f64..1.0e9),
        recipient in proptest::option::of("[a-z]{1,12}"),
        needs_approval in any::<bool>(),
        history in proptest::collection::vec("[a-z_]{1,20}", 0..6),
    ) {
        let mut state = WorkflowState::for_message(message);
        state.amount = amount;
        state.recipient = recipient;
        state.needs_approval = needs_approval;
        state.execution_history = history;

        let encoded = serde_json::to_value(&state).unwrap();
        let decoded: WorkflowState = serde_json::from_value(encoded.clone()).unwrap();
        prop_assert_eq!(&state, &decoded);
        prop_assert_eq!(encoded, serde_json::to_value(&decoded).unwrap());
    }
}
