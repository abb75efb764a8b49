//! HTTP facade: the REST surface over [`WorkflowService`].

pub mod handlers;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::engine::WorkflowService;

/// Assemble the REST router.
pub fn router(service: Arc<WorkflowService>) -> Router {
    Router::new()
        .route("/chat", post(handlers::chat))
        .route("/workflow/{session_id}/approve", post(handlers::approve))
        .route("/workflow/{session_id}/status", get(handlers::status))
        .route(
            "/workflow/{session_id}/checkpoints",
            get(handlers::checkpoints),
        )
        .route("/approvals/pending", get(handlers::pending_approvals))
        .route("/sessions", get(handlers::sessions))
        .route("/health", get(handlers::health))
        .with_state(service)
}
