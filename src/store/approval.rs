//! Approval requests raised by the human-in-the-loop gate.
//!
//! An approval is created `pending` when a turn suspends and is decided
//! exactly once: the transition out of `pending` is terminal, and a session
//! holds at most one pending approval at a time.

use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::{Result, StoreError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Timeout,
}

impl ApprovalStatus {
    /// Inverse of [`Display`](std::fmt::Display); used by the SQL backends.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "timeout" => Some(Self::Timeout),
            _ => None,
        }
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

/// A pending or decided human approval.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub approval_id: String,
    pub session_id: String,
    pub workflow_type: String,
    /// The prepared downstream payload at pause time, serialized.
    pub request_data: Value,
    pub status: ApprovalStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    pub requested_at: DateTime<Utc>,
    /// Advisory decision window for external sweepers; never enforced here.
    pub timeout_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approver_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
}

impl ApprovalRequest {
    pub fn new(
        session_id: &str,
        workflow_type: &str,
        request_data: Value,
        amount: Option<f64>,
        recipient: Option<String>,
        timeout_seconds: u64,
    ) -> Self {
        Self {
            approval_id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            workflow_type: workflow_type.to_string(),
            request_data,
            status: ApprovalStatus::Pending,
            amount,
            recipient,
            requested_at: Utc::now(),
            timeout_seconds,
            approved_at: None,
            approver_id: None,
            rejection_reason: None,
        }
    }

    fn decide(
        &mut self,
        status: ApprovalStatus,
        approver_id: &str,
        reason: Option<&str>,
    ) -> Result<()> {
        if self.status != ApprovalStatus::Pending {
            return Err(StoreError::conflict(format!(
                "approval {} already {}",
                self.approval_id, self.status
            )));
        }
        self.status = status;
        self.approver_id = Some(approver_id.to_string());
        self.approved_at = Some(Utc::now());
        if status == ApprovalStatus::Rejected {
            self.rejection_reason = reason.map(str::to_string);
        }
        Ok(())
    }
}

/// Persistent approval storage.
#[async_trait]
pub trait ApprovalStore: Send + Sync {
    /// Persist a new pending approval. Fails with `Conflict` if the session
    /// already has a pending one.
    async fn create(&self, approval: &ApprovalRequest) -> Result<()>;

    async fn get(&self, approval_id: &str) -> Result<Option<ApprovalRequest>>;

    /// Transition a pending approval to `approved`. Deciding a non-pending
    /// approval is a `Conflict` and leaves the record untouched.
    async fn approve(&self, approval_id: &str, approver_id: &str) -> Result<ApprovalRequest>;

    /// Transition a pending approval to `rejected` with a reason.
    async fn reject(
        &self,
        approval_id: &str,
        approver_id: &str,
        reason: &str,
    ) -> Result<ApprovalRequest>;

    async fn list_pending(&self) -> Result<Vec<ApprovalRequest>>;

    /// The session's single pending approval, if one exists.
    async fn find_pending_for_session(&self, session_id: &str) -> Result<Option<ApprovalRequest>>;
}

/// Volatile approval store.
#[derive(Default)]
pub struct InMemoryApprovalStore {
    inner: RwLock<FxHashMap<String, ApprovalRequest>>,
}

impl InMemoryApprovalStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_err(e: impl std::fmt::Display) -> StoreError {
        StoreError::backend(format!("lock poisoned: {e}"))
    }

    fn decide(
        &self,
        approval_id: &str,
        status: ApprovalStatus,
        approver_id: &str,
        reason: Option<&str>,
    ) -> Result<ApprovalRequest> {
        let mut map = self.inner.write().map_err(Self::lock_err)?;
        let approval = map
            .get_mut(approval_id)
            .ok_or_else(|| StoreError::not_found(format!("approval {approval_id}")))?;
        approval.decide(status, approver_id, reason)?;
        Ok(approval.clone())
    }
}

#[async_trait]
impl ApprovalStore for InMemoryApprovalStore {
    async fn create(&self, approval: &ApprovalRequest) -> Result<()> {
        let mut map = self.inner.write().map_err(Self::lock_err)?;
        let clash = map.values().any(|a| {
            a.session_id == approval.session_id && a.status == ApprovalStatus::Pending
        });
        if clash {
            return Err(StoreError::conflict(format!(
                "session {} already has a pending approval",
                approval.session_id
            )));
        }
        map.insert(approval.approval_id.clone(), approval.clone());
        Ok(())
    }

    async fn get(&self, approval_id: &str) -> Result<Option<ApprovalRequest>> {
        let map = self.inner.read().map_err(Self::lock_err)?;
        Ok(map.get(approval_id).cloned())
    }

    async fn approve(&self, approval_id: &str, approver_id: &str) -> Result<ApprovalRequest> {
        self.decide(approval_id, ApprovalStatus::Approved, approver_id, None)
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
    }

    async fn list_pending(&self) -> Result<Vec<ApprovalRequest>> {
        let map = self.inner.read().map_err(Self::lock_err)?;
        let mut pending: Vec<ApprovalRequest> = map
            .values()
            .filter(|a| a.status == ApprovalStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.requested_at.cmp(&b.requested_at));
        Ok(pending)
    }

    async fn find_pending_for_session(
        &self,
        session_id: &str,
    ) -> Result<Option<ApprovalRequest>> {
        let map = self.inner.read().map_err(Self::lock_err)?;
        Ok(map
            .values()
            .find(|a| a.session_id == session_id && a.status == ApprovalStatus::Pending)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pending(session: &str) -> ApprovalRequest {
        ApprovalRequest::new(
            session,
            "banking_assist",
            json!({"amount": 6000.0}),
            Some(6000.0),
            Some("kiran".into()),
            3600,
        )
    }

    #[tokio::test]
    async fn approve_stamps_audit_fields() {
        let store = InMemoryApprovalStore::new();
        let req = pending("s1");
        store.create(&req).await.unwrap();

        let decided = store.approve(&req.approval_id, "m1").await.unwrap();
        assert_eq!(decided.status, ApprovalStatus::Approved);
        assert_eq!(decided.approver_id.as_deref(), Some("m1"));
        assert!(decided.approved_at.is_some());
    }

    #[tokio::test]
    async fn deciding_twice_conflicts_and_preserves_the_record() {
        let store = InMemoryApprovalStore::new();
        let req = pending("s1");
        store.create(&req).await.unwrap();

        let first = store.approve(&req.approval_id, "m1").await.unwrap();
        let err = store.reject(&req.approval_id, "m2", "late").await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));

        let record = store.get(&req.approval_id).await.unwrap().unwrap();
        assert_eq!(record, first);
    }

    #[tokio::test]
    async fn one_pending_per_session() {
        let store = InMemoryApprovalStore::new();
        store.create(&pending("s1")).await.unwrap();
        let err = store.create(&pending("s1")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));

        // A decided approval frees the slot.
        let open = store.find_pending_for_session("s1").await.unwrap().unwrap();
        store.approve(&open.approval_id, "m1").await.unwrap();
        store.create(&pending("s1")).await.unwrap();
    }

    #[tokio::test]
    async fn list_pending_orders_by_request_time() {
        let store = InMemoryApprovalStore::new();
        let a = pending("s1");
        store.create(&a).await.unwrap();
        let mut b = pending("s2");
        b.requested_at = Utc::now() + chrono::Duration::seconds(2);
        store.create(&b).await.unwrap();

        let listed = store.list_pending().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].approval_id, a.approval_id);
    }
}
