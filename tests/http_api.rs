//! The REST surface, driven over a real listener.

mod common;

use common::harness;
use httpmock::prelude::*;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use tellerflow::server;

/// Serve the router on an ephemeral port and return its base URL.
async fn serve(h: &common::Harness) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = server::router(h.service.clone());
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn health_reports_healthy() {
    let downstream = MockServer::start_async().await;
    let h = harness(&downstream.base_url());
    let base = serve(&h).await;

    let body: Value = reqwest::get(format!("{base}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!({"status": "healthy"}));
}

#[tokio::test]
async fn chat_and_introspection_round_trip() {
    let downstream = MockServer::start_async().await;
    downstream
        .mock_async(|when, then| {
            when.method(GET).path("/api/balance");
            then.status(200)
                .json_body(json!({"accountId": "123", "balance": 250.0}));
        })
        .await;

    let h = harness(&downstream.base_url());
    let base = serve(&h).await;
    let client = reqwest::Client::new();

    let body: Value = client
        .post(format!("{base}/chat"))
        .json(&json!({"message": "What is my balance?", "user_id": "u1"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let session_id = body["session_id"].as_str().unwrap().to_string();
    assert_eq!(body["reply"]["status"], json!("COMPLETED"));
    assert_eq!(body["reply"]["data"]["balance"], json!(250.0));
    assert_eq!(body["execution_history"][0], json!("validate_input"));

    let status: Value = client
        .get(format!("{base}/workflow/{session_id}/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["status"], json!("completed"));
    assert_eq!(status["execution_count"], json!(1));
    assert_eq!(status["checkpoints"], json!(6));
    assert_eq!(status["user_id"], json!("u1"));
    assert_eq!(
        status["conversation_history"][0]["role"],
        json!("user")
    );

    let checkpoints: Value = client
        .get(format!("{base}/workflow/{session_id}/checkpoints"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(checkpoints["checkpoints"].as_array().unwrap().len(), 6);
    assert_eq!(checkpoints["checkpoints"][0]["phase"], json!("start"));

    let sessions: Value = client
        .get(format!("{base}/sessions?user_id=u1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(sessions["sessions"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn approval_flow_over_http() {
    let downstream = MockServer::start_async().await;
    let transfer = downstream
        .mock_async(|when, then| {
            when.method(POST).path("/api/transfer");
            then.status(200)
                .json_body(json!({"success": true, "message": "done"}));
        })
        .await;

    let h = harness(&downstream.base_url());
    let base = serve(&h).await;
    let client = reqwest::Client::new();

    let body: Value = client
        .post(format!("{base}/chat"))
        .json(&json!({"message": "Transfer 6000 to kiran", "user_id": "u1"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], json!("PENDING_APPROVAL"));
    assert_eq!(body["reply"]["status"], json!("PENDING_APPROVAL"));
    assert_eq!(body["reply"]["amount"], json!(6000.0));
    assert_eq!(body["reply"]["recipient"], json!("kiran"));
    let session_id = body["session_id"].as_str().unwrap().to_string();

    let pending: Value = client
        .get(format!("{base}/approvals/pending"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(pending["pending"].as_array().unwrap().len(), 1);

    let decision: Value = client
        .post(format!("{base}/workflow/{session_id}/approve"))
        .json(&json!({"approver_id": "m1", "approved": true}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(decision["status"], json!("approved"));
    assert_eq!(decision["result"]["data"]["success"], json!(true));
    assert_eq!(transfer.hits_async().await, 1);
}

#[tokio::test]
async fn rejection_over_http() {
    let downstream = MockServer::start_async().await;
    let h = harness(&downstream.base_url());
    let base = serve(&h).await;
    let client = reqwest::Client::new();

    let body: Value = client
        .post(format!("{base}/chat"))
        .json(&json!({"message": "Transfer 9000 to kiran", "user_id": "u1"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let session_id = body["session_id"].as_str().unwrap().to_string();

    let decision: Value = client
        .post(format!("{base}/workflow/{session_id}/approve"))
        .json(&json!({"approver_id": "m1", "approved": false, "reason": "risk"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(
        decision,
        json!({
            "status": "rejected",
            "session_id": session_id,
            "reason": "risk",
            "rejected_by": "m1",
        })
    );
}

#[tokio::test]
async fn unknown_session_is_404_and_double_decide_is_409() {
    let downstream = MockServer::start_async().await;
    downstream
        .mock_async(|when, then| {
            when.method(POST).path("/api/transfer");
            then.status(200).json_body(json!({"success": true}));
        })
        .await;

    let h = harness(&downstream.base_url());
    let base = serve(&h).await;
    let client = reqwest::Client::new();

    let missing = client
        .get(format!("{base}/workflow/ghost/status"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status().as_u16(), 404);

    let body: Value = client
        .post(format!("{base}/chat"))
        .json(&json!({"message": "Transfer 6000 to kiran", "user_id": "u1"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let session_id = body["session_id"].as_str().unwrap().to_string();

    let first = client
        .post(format!("{base}/workflow/{session_id}/approve"))
        .json(&json!({"approver_id": "m1", "approved": true}))
        .send()
        .await
        .unwrap();
    assert_eq!(first.status().as_u16(), 200);

    let second = client
        .post(format!("{base}/workflow/{session_id}/approve"))
        .json(&json!({"approver_id": "m2", "approved": true}))
        .send()
        .await
        .unwrap();
    assert_eq!(second.status().as_u16(), 409);
}

#[tokio::test]
async fn chat_without_a_message_field_is_400() {
    let downstream = MockServer::start_async().await;
    let h = harness(&downstream.base_url());
    let base = serve(&h).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/chat"))
        .json(&json!({"user_id": "u1"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], json!("validation"));
}

#[tokio::test]
async fn approve_with_missing_fields_is_400() {
    let downstream = MockServer::start_async().await;
    let h = harness(&downstream.base_url());
    let base = serve(&h).await;
    let client = reqwest::Client::new();

    let body: Value = client
        .post(format!("{base}/chat"))
        .json(&json!({"message": "Transfer 6000 to kiran", "user_id": "u1"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let session_id = body["session_id"].as_str().unwrap().to_string();

    // `approved` is required; its absence must not decide anything.
    let response = client
        .post(format!("{base}/workflow/{session_id}/approve"))
        .json(&json!({"approver_id": "m1"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
    let error: Value = response.json().await.unwrap();
    assert_eq!(error["error"], json!("validation"));

    let pending: Value = client
        .get(format!("{base}/approvals/pending"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(pending["pending"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn sessions_listing_requires_user_id() {
    let downstream = MockServer::start_async().await;
    let h = harness(&downstream.base_url());
    let base = serve(&h).await;

    let response = reqwest::get(format!("{base}/sessions")).await.unwrap();
    assert_eq!(response.status().as_u16(), 400);
}
