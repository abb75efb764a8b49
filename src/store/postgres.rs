//! Shared-cache Postgres backend.
//!
//! Same semantics as the embedded backend, served from a networked database
//! so several engine replicas can share one set of stores. Durability is the
//! database's: there is no local disk sync to lean on.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use super::approval::{ApprovalRequest, ApprovalStatus, ApprovalStore};
use super::checkpoint::{Checkpoint, CheckpointMeta, CheckpointStore};
use super::session::{Session, SessionStatus, SessionStore};
use super::{Result, StoreError};

/// Postgres-backed stores.
pub struct PostgresStores {
    pool: PgPool,
}

impl std::fmt::Debug for PostgresStores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresStores").finish()
    }
}

impl PostgresStores {
    /// Connect to `database_url` and run migrations.
    #[instrument(skip(database_url), err)]
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .connect(database_url)
            .await
            .map_err(|e| StoreError::backend(format!("connect: {e}")))?;
        sqlx::migrate!("./migrations/postgres")
            .run(&pool)
            .await
            .map_err(|e| StoreError::backend(format!("migration: {e}")))?;
        Ok(Self { pool })
    }
}

fn encode_time(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| StoreError::backend(format!("timestamp `{s}`: {e}")))
}

fn decode_checkpoint(row: &PgRow) -> Result<Checkpoint> {
    let state_json: String = row.get("state_json");
    let metadata_json: String = row.get("metadata_json");
    let created_at: String = row.get("created_at");
    let state: Value = serde_json::from_str(&state_json)?;
    let metadata: CheckpointMeta = serde_json::from_str(&metadata_json)?;
    Ok(Checkpoint {
        checkpoint_id: row.get("checkpoint_id"),
        session_id: row.get("session_id"),
        node_id: row.get("node_id"),
        state,
        metadata,
        created_at: decode_time(&created_at)?,
        seq: row.get("seq"),
    })
}

fn decode_session(row: &PgRow) -> Result<Session> {
    let history_json: String = row.get("history_json");
    let state_json: Option<String> = row.get("state_json");
    let status: String = row.get("status");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");
    let execution_count: i64 = row.get("execution_count");
    Ok(Session {
        session_id: row.get("id"),
        user_id: row.get("user_id"),
        workflow_type: row.get("workflow_type"),
        status: SessionStatus::parse(&status)
            .ok_or_else(|| StoreError::backend(format!("unknown session status `{status}`")))?,
        current_node: row.get("current_node"),
        execution_count: execution_count as u64,
        conversation_history: serde_json::from_str(&history_json)?,
        workflow_state: state_json.as_deref().map(serde_json::from_str).transpose()?,
        created_at: decode_time(&created_at)?,
        updated_at: decode_time(&updated_at)?,
    })
}

fn decode_approval(row: &PgRow) -> Result<ApprovalRequest> {
    let request_json: String = row.get("request_json");
    let status: String = row.get("status");
    let requested_at: String = row.get("requested_at");
    let approved_at: Option<String> = row.get("approved_at");
    let timeout_seconds: i64 = row.get("timeout_seconds");
    Ok(ApprovalRequest {
        approval_id: row.get("id"),
        session_id: row.get("session_id"),
        workflow_type: row.get("workflow_type"),
        request_data: serde_json::from_str(&request_json)?,
        status: ApprovalStatus::parse(&status)
            .ok_or_else(|| StoreError::backend(format!("unknown approval status `{status}`")))?,
        amount: row.get("amount"),
        recipient: row.get("recipient"),
        requested_at: decode_time(&requested_at)?,
        timeout_seconds: timeout_seconds as u64,
        approved_at: approved_at.as_deref().map(decode_time).transpose()?,
        approver_id: row.get("approver_id"),
        rejection_reason: row.get("rejection_reason"),
    })
}

#[async_trait]
impl CheckpointStore for PostgresStores {
    #[instrument(skip(self, state, metadata), err)]
    async fn save(
        &self,
        session_id: &str,
        node_id: &str,
        state: Value,
        metadata: CheckpointMeta,
    ) -> Result<String> {
        let checkpoint_id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO checkpoints (checkpoint_id, session_id, node_id, state_json, metadata_json, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&checkpoint_id)
        .bind(session_id)
        .bind(node_id)
        .bind(serde_json::to_string(&state)?)
        .bind(serde_json::to_string(&metadata)?)
        .bind(encode_time(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::backend(format!("insert checkpoint: {e}")))?;
        Ok(checkpoint_id)
    }

    async fn load_latest(&self, session_id: &str) -> Result<Option<Checkpoint>> {
        let row = sqlx::query(
            "SELECT * FROM checkpoints WHERE session_id = $1 ORDER BY seq DESC LIMIT 1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::backend(format!("select latest checkpoint: {e}")))?;
        row.as_ref().map(decode_checkpoint).transpose()
    }

    async fn list(&self, session_id: &str) -> Result<Vec<Checkpoint>> {
        let rows = sqlx::query("SELECT * FROM checkpoints WHERE session_id = $1 ORDER BY seq ASC")
            .bind(session_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::backend(format!("list checkpoints: {e}")))?;
        rows.iter().map(decode_checkpoint).collect()
    }

    async fn clear(&self, session_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM checkpoints WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::backend(format!("clear checkpoints: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for PostgresStores {
    #[instrument(skip(self, session), fields(session = %session.session_id), err)]
    async fn create(&self, session: &Session) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO sessions (id, user_id, workflow_type, status, current_node,
                                  execution_count, history_json, state_json, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&session.session_id)
        .bind(&session.user_id)
        .bind(&session.workflow_type)
        .bind(session.status.to_string())
        .bind(&session.current_node)
        .bind(session.execution_count as i64)
        .bind(serde_json::to_string(&session.conversation_history)?)
        .bind(
            session
                .workflow_state
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(encode_time(session.created_at))
        .bind(encode_time(session.updated_at))
        .execute(&self.pool)
        .await;
        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(StoreError::conflict(
                format!("session {} already exists", session.session_id),
            )),
            Err(e) => Err(StoreError::backend(format!("insert session: {e}"))),
        }
    }

    async fn get(&self, session_id: &str) -> Result<Option<Session>> {
        let row = sqlx::query("SELECT * FROM sessions WHERE id = $1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::backend(format!("select session: {e}")))?;
        row.as_ref().map(decode_session).transpose()
    }

    async fn update(&self, session: &Session) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET status = $2, current_node = $3, execution_count = $4,
                history_json = $5, state_json = $6, updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(&session.session_id)
        .bind(session.status.to_string())
        .bind(&session.current_node)
        .bind(session.execution_count as i64)
        .bind(serde_json::to_string(&session.conversation_history)?)
        .bind(
            session
                .workflow_state
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(encode_time(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::backend(format!("update session: {e}")))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(format!(
                "session {}",
                session.session_id
            )));
        }
        Ok(())
    }

    async fn set_current_node(&self, session_id: &str, node_id: &str) -> Result<()> {
        let result =
            sqlx::query("UPDATE sessions SET current_node = $2, updated_at = $3 WHERE id = $1")
                .bind(session_id)
                .bind(node_id)
                .bind(encode_time(Utc::now()))
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::backend(format!("set current node: {e}")))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(format!("session {session_id}")));
        }
        Ok(())
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Session>> {
        let rows =
            sqlx::query("SELECT * FROM sessions WHERE user_id = $1 ORDER BY updated_at DESC")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| StoreError::backend(format!("list sessions: {e}")))?;
        rows.iter().map(decode_session).collect()
    }
}

#[async_trait]
impl ApprovalStore for PostgresStores {
    #[instrument(skip(self, approval), fields(approval = %approval.approval_id), err)]
    async fn create(&self, approval: &ApprovalRequest) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::backend(format!("tx begin: {e}")))?;

        let pending: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM approvals WHERE session_id = $1 AND status = 'pending'",
        )
        .bind(&approval.session_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| StoreError::backend(format!("count pending: {e}")))?;
        if pending > 0 {
            return Err(StoreError::conflict(format!(
                "session {} already has a pending approval",
                approval.session_id
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO approvals (id, session_id, workflow_type, request_json, status,
                                   amount, recipient, requested_at, timeout_seconds,
                                   approved_at, approver_id, rejection_reason)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(&approval.approval_id)
        .bind(&approval.session_id)
        .bind(&approval.workflow_type)
        .bind(serde_json::to_string(&approval.request_data)?)
        .bind(approval.status.to_string())
        .bind(approval.amount)
        .bind(&approval.recipient)
        .bind(encode_time(approval.requested_at))
        .bind(approval.timeout_seconds as i64)
        .bind(approval.approved_at.map(encode_time))
        .bind(&approval.approver_id)
        .bind(&approval.rejection_reason)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::backend(format!("insert approval: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| StoreError::backend(format!("tx commit: {e}")))?;
        Ok(())
    }

    async fn get(&self, approval_id: &str) -> Result<Option<ApprovalRequest>> {
        let row = sqlx::query("SELECT * FROM approvals WHERE id = $1")
            .bind(approval_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::backend(format!("select approval: {e}")))?;
        row.as_ref().map(decode_approval).transpose()
    }

    async fn approve(&self, approval_id: &str, approver_id: &str) -> Result<ApprovalRequest> {
        self.decide(approval_id, ApprovalStatus::Approved, approver_id, None)
            .await
    }

    async fn reject(
        &self,
        approval_id: &str,
        approver_id: &str,
        reason: &str,
    ) -> Result<ApprovalRequest> {
        self.decide(
            approval_id,
            ApprovalStatus::Rejected,
            approver_id,
            Some(reason),
        )
        .await
    }

    async fn list_pending(&self) -> Result<Vec<ApprovalRequest>> {
        let rows = sqlx::query(
            "SELECT * FROM approvals WHERE status = 'pending' ORDER BY requested_at ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::backend(format!("list pending: {e}")))?;
        rows.iter().map(decode_approval).collect()
    }

    async fn find_pending_for_session(
        &self,
        session_id: &str,
    ) -> Result<Option<ApprovalRequest>> {
        let row = sqlx::query(
            "SELECT * FROM approvals WHERE session_id = $1 AND status = 'pending' LIMIT 1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::backend(format!("find pending: {e}")))?;
        row.as_ref().map(decode_approval).transpose()
    }
}

impl PostgresStores {
    /// Guarded transition out of `pending`; leaves the row untouched on
    /// conflict.
    async fn decide(
        &self,
        approval_id: &str,
        status: ApprovalStatus,
        approver_id: &str,
        reason: Option<&str>,
    ) -> Result<ApprovalRequest> {
        let result = sqlx::query(
            r#"
            UPDATE approvals
            SET status = $2, approver_id = $3, approved_at = $4, rejection_reason = $5
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(approval_id)
        .bind(status.to_string())
        .bind(approver_id)
        .bind(encode_time(Utc::now()))
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::backend(format!("decide approval: {e}")))?;

        if result.rows_affected() == 0 {
            return match ApprovalStore::get(self, approval_id).await? {
                Some(existing) => Err(StoreError::conflict(format!(
                    "approval {approval_id} already {}",
                    existing.status
                ))),
                None => Err(StoreError::not_found(format!("approval {approval_id}"))),
            };
        }
        ApprovalStore::get(self, approval_id)
            .await?
            .ok_or_else(|| StoreError::not_found(format!("approval {approval_id}")))
    }
}
