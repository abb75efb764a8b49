//! REST handlers and response envelopes.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::engine::{ApprovalDecision, ChatOutcome, ChatRequest, DecisionOutcome, WorkflowService};
use crate::error::EngineError;

/// `axum::Json` with its rejection remapped: a missing or malformed request
/// body is a 400 validation error, not axum's default 422.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// `EngineError` carried across the axum boundary with its HTTP mapping.
pub struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(EngineError::Validation(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self.0 {
            EngineError::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
            EngineError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            EngineError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            EngineError::Routing { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "routing"),
            EngineError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage"),
            EngineError::Node { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "node"),
        };
        let body = json!({"error": kind, "message": self.0.to_string()});
        (status, Json(body)).into_response()
    }
}

pub async fn chat(
    State(service): State<Arc<WorkflowService>>,
    ApiJson(request): ApiJson<ChatRequest>,
) -> Result<Json<Value>, ApiError> {
    match service.chat(request).await? {
        ChatOutcome::Completed {
            session_id,
            reply,
            execution_history,
        } => Ok(Json(json!({
            "reply": reply,
            "session_id": session_id,
            "execution_history": execution_history,
        }))),
        ChatOutcome::Pending {
            session_id,
            envelope,
        } => Ok(Json(json!({
            "reply": {
                "status": "PENDING_APPROVAL",
                "approval_id": envelope.approval_id,
                "checkpoint_id": envelope.checkpoint_id,
                "amount": envelope.amount,
                "recipient": envelope.recipient,
                "message": envelope.message,
                "paused_at": envelope.paused_at,
            },
            "session_id": session_id,
            "status": "PENDING_APPROVAL",
        }))),
    }
}

pub async fn approve(
    State(service): State<Arc<WorkflowService>>,
    Path(session_id): Path<String>,
    ApiJson(decision): ApiJson<ApprovalDecision>,
) -> Result<Json<Value>, ApiError> {
    match service.decide(&session_id, decision).await? {
        DecisionOutcome::Approved {
            session_id,
            result,
            execution_history,
        } => Ok(Json(json!({
            "status": "approved",
            "session_id": session_id,
            "result": result,
            "execution_history": execution_history,
        }))),
        DecisionOutcome::Rejected {
            session_id,
            reason,
            rejected_by,
        } => Ok(Json(json!({
            "status": "rejected",
            "session_id": session_id,
            "reason": reason,
            "rejected_by": rejected_by,
        }))),
    }
}

pub async fn status(
    State(service): State<Arc<WorkflowService>>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let view = service.session_view(&session_id).await?;
    let session = view.session;
    Ok(Json(json!({
        "session_id": session.session_id,
        "user_id": session.user_id,
        "status": session.status,
        "current_node": session.current_node,
        "execution_count": session.execution_count,
        "checkpoints": view.checkpoint_count,
        "conversation_history": session.conversation_history,
    })))
}

pub async fn checkpoints(
    State(service): State<Arc<WorkflowService>>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let checkpoints = service.checkpoints(&session_id).await?;
    let summaries: Vec<Value> = checkpoints
        .iter()
        .map(|cp| {
            json!({
                "checkpoint_id": cp.checkpoint_id,
                "node_id": cp.node_id,
                "phase": cp.metadata.phase,
                "created_at": cp.created_at,
            })
        })
        .collect();
    Ok(Json(json!({
        "session_id": session_id,
        "checkpoints": summaries,
    })))
}

pub async fn pending_approvals(
    State(service): State<Arc<WorkflowService>>,
) -> Result<Json<Value>, ApiError> {
    let pending = service.pending_approvals().await?;
    Ok(Json(json!({"pending": pending})))
}

#[derive(Deserialize)]
pub struct SessionsQuery {
    pub user_id: Option<String>,
}

pub async fn sessions(
    State(service): State<Arc<WorkflowService>>,
    Query(query): Query<SessionsQuery>,
) -> Result<Json<Value>, ApiError> {
    let user_id = query
        .user_id
        .ok_or_else(|| EngineError::Validation("user_id query parameter is required".into()))?;
    let sessions = service.sessions_for_user(&user_id).await?;
    let summaries: Vec<Value> = sessions
        .iter()
        .map(|s| {
            json!({
                "session_id": s.session_id,
                "status": s.status,
                "execution_count": s.execution_count,
                "updated_at": s.updated_at,
            })
        })
        .collect();
    Ok(Json(json!({"user_id": user_id, "sessions": summaries})))
}

pub async fn health() -> Json<Value> {
    Json(json!({"status": "healthy"}))
}
