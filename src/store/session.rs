//! Session records and the status state machine.

use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::{Result, StoreError};
use crate::state::WorkflowState;

/// Session lifecycle status.
///
/// Transitions are validated by [`Session::transition`]:
///
/// ```text
/// active           -> pending_approval | completed | failed
/// pending_approval -> approved | rejected | timeout
/// approved         -> completed | failed
/// completed        -> active        (a new chat turn re-enters the session)
/// rejected / failed / timeout: terminal
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    PendingApproval,
    Approved,
    Rejected,
    Completed,
    Failed,
    Timeout,
}

impl SessionStatus {
    pub fn can_transition(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Active, PendingApproval)
                | (Active, Completed)
                | (Active, Failed)
                | (PendingApproval, Approved)
                | (PendingApproval, Rejected)
                | (PendingApproval, Timeout)
                | (Approved, Completed)
                | (Approved, Failed)
                | (Completed, Active)
        )
    }

    /// Inverse of [`Display`](std::fmt::Display); used by the SQL backends.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "pending_approval" => Some(Self::PendingApproval),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "timeout" => Some(Self::Timeout),
            _ => None,
        }
    }

    /// Statuses that accept no further chat turns.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Rejected | SessionStatus::Failed | SessionStatus::Timeout
        )
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionStatus::Active => "active",
            SessionStatus::PendingApproval => "pending_approval",
            SessionStatus::Approved => "approved",
            SessionStatus::Rejected => "rejected",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

/// Role of a conversation turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
    System,
}

/// One entry in a session's conversation history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// The per-conversation container: status, history, counters, and the last
/// known workflow state. Created on the first chat turn; never deleted by
/// the engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    pub workflow_type: String,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_node: Option<String>,
    /// Incremented once per accepted chat turn (not on resume); the
    /// idempotency indicator for replay detection.
    pub execution_count: u64,
    #[serde(default)]
    pub conversation_history: Vec<ConversationTurn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_state: Option<WorkflowState>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            workflow_type: "banking_assist".to_string(),
            status: SessionStatus::Active,
            current_node: None,
            execution_count: 0,
            conversation_history: Vec::new(),
            workflow_state: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_generated_id(user_id: impl Into<String>) -> Self {
        Self::new(Uuid::new_v4().to_string(), user_id)
    }

    /// Move to `next`, failing with `Conflict` on an illegal transition.
    pub fn transition(&mut self, next: SessionStatus) -> Result<()> {
        if self.status == next {
            return Ok(());
        }
        if !self.status.can_transition(next) {
            return Err(StoreError::conflict(format!(
                "session {} cannot move {} -> {}",
                self.session_id, self.status, next
            )));
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn push_turn(&mut self, role: TurnRole, content: impl Into<String>) {
        self.conversation_history.push(ConversationTurn {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: None,
        });
        self.updated_at = Utc::now();
    }

    /// The most recent user turn, if any.
    pub fn last_user_turn(&self) -> Option<&ConversationTurn> {
        self.conversation_history
            .iter()
            .rev()
            .find(|t| t.role == TurnRole::User)
    }

    /// The most recent assistant turn, if any.
    pub fn last_assistant_turn(&self) -> Option<&ConversationTurn> {
        self.conversation_history
            .iter()
            .rev()
            .find(|t| t.role == TurnRole::Assistant)
    }
}

/// Persistent session storage.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, session: &Session) -> Result<()>;

    async fn get(&self, session_id: &str) -> Result<Option<Session>>;

    /// Persist the full session record (status, history, state, counters).
    async fn update(&self, session: &Session) -> Result<()>;

    /// Cheap pointer update used by the executor on every node entry.
    async fn set_current_node(&self, session_id: &str, node_id: &str) -> Result<()>;

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Session>>;
}

/// Volatile session store.
#[derive(Default)]
pub struct InMemorySessionStore {
    inner: RwLock<FxHashMap<String, Session>>,
}

impl InMemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_err(e: impl std::fmt::Display) -> StoreError {
        StoreError::backend(format!("lock poisoned: {e}"))
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, session: &Session) -> Result<()> {
        let mut map = self.inner.write().map_err(Self::lock_err)?;
        if map.contains_key(&session.session_id) {
            return Err(StoreError::conflict(format!(
                "session {} already exists",
                session.session_id
            )));
        }
        map.insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<Session>> {
        let map = self.inner.read().map_err(Self::lock_err)?;
        Ok(map.get(session_id).cloned())
    }

    async fn update(&self, session: &Session) -> Result<()> {
        let mut map = self.inner.write().map_err(Self::lock_err)?;
        if !map.contains_key(&session.session_id) {
            return Err(StoreError::not_found(format!(
                "session {}",
                session.session_id
            )));
        }
        map.insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn set_current_node(&self, session_id: &str, node_id: &str) -> Result<()> {
        let mut map = self.inner.write().map_err(Self::lock_err)?;
        let session = map
            .get_mut(session_id)
            .ok_or_else(|| StoreError::not_found(format!("session {session_id}")))?;
        session.current_node = Some(node_id.to_string());
        session.updated_at = Utc::now();
        Ok(())
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Session>> {
        let map = self.inner.read().map_err(Self::lock_err)?;
        let mut sessions: Vec<Session> = map
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }
}
