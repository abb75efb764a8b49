//! Append-only checkpoint log.
//!
//! Every node boundary persists a checkpoint: the full serialized workflow
//! state plus a small metadata record tagging the phase (node start/end,
//! pause, approved, rejected). Records are never overwritten; `load_latest`
//! returns the newest record for a session and `list` the whole ordered log.

use std::sync::RwLock;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::{Result, StoreError};

/// Where in the node protocol a checkpoint was taken.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointPhase {
    /// Saved on node entry, before the node runs.
    Start,
    /// Saved after the node returned.
    End,
    /// Saved by the approval gate when suspending the turn.
    Pause,
    /// Saved when a human approved a paused turn, just before resume.
    Approved,
    /// Saved when a human rejected a paused turn.
    Rejected,
}

impl std::fmt::Display for CheckpointPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CheckpointPhase::Start => "start",
            CheckpointPhase::End => "end",
            CheckpointPhase::Pause => "pause",
            CheckpointPhase::Approved => "approved",
            CheckpointPhase::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// Free-form checkpoint metadata; `phase` is always present.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub phase: CheckpointPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_at: Option<DateTime<Utc>>,
}

impl CheckpointMeta {
    pub fn phase(phase: CheckpointPhase) -> Self {
        Self {
            phase,
            approval_id: None,
            paused_at: None,
        }
    }
}

/// One durable snapshot of workflow state at a node boundary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub checkpoint_id: String,
    pub session_id: String,
    pub node_id: String,
    /// Serialized workflow state (raw, or a legacy session envelope).
    pub state: Value,
    pub metadata: CheckpointMeta,
    pub created_at: DateTime<Utc>,
    /// Store-assigned monotonic sequence; breaks `created_at` ties so a
    /// session's log has one total order.
    pub seq: i64,
}

/// Durable, append-only checkpoint storage.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Append a new checkpoint with a server-assigned id and timestamp.
    /// Returns the new checkpoint id.
    async fn save(
        &self,
        session_id: &str,
        node_id: &str,
        state: Value,
        metadata: CheckpointMeta,
    ) -> Result<String>;

    /// Newest checkpoint for a session, or `None` if the session has none.
    async fn load_latest(&self, session_id: &str) -> Result<Option<Checkpoint>>;

    /// All checkpoints for a session, oldest first.
    async fn list(&self, session_id: &str) -> Result<Vec<Checkpoint>>;

    /// Remove every checkpoint for a session. Admin tooling only; the
    /// engine never calls this.
    async fn clear(&self, session_id: &str) -> Result<()>;
}

/// Volatile checkpoint log kept in process memory.
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    inner: RwLock<FxHashMap<String, Vec<Checkpoint>>>,
    seq: AtomicI64,
}

impl InMemoryCheckpointStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(
        &self,
        session_id: &str,
        node_id: &str,
        state: Value,
        metadata: CheckpointMeta,
    ) -> Result<String> {
        let checkpoint = Checkpoint {
            checkpoint_id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            node_id: node_id.to_string(),
            state,
            metadata,
            created_at: Utc::now(),
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
        };
        let id = checkpoint.checkpoint_id.clone();
        let mut map = self
            .inner
            .write()
            .map_err(|e| StoreError::backend(format!("lock poisoned: {e}")))?;
        map.entry(session_id.to_string()).or_default().push(checkpoint);
        Ok(id)
    }

    async fn load_latest(&self, session_id: &str) -> Result<Option<Checkpoint>> {
        let map = self
            .inner
            .read()
            .map_err(|e| StoreError::backend(format!("lock poisoned: {e}")))?;
        Ok(map.get(session_id).and_then(|log| log.last().cloned()))
    }

    async fn list(&self, session_id: &str) -> Result<Vec<Checkpoint>> {
        let map = self
            .inner
            .read()
            .map_err(|e| StoreError::backend(format!("lock poisoned: {e}")))?;
        Ok(map.get(session_id).cloned().unwrap_or_default())
    }

    async fn clear(&self, session_id: &str) -> Result<()> {
        let mut map = self
            .inner
            .write()
            .map_err(|e| StoreError::backend(format!("lock poisoned: {e}")))?;
        map.remove(session_id);
        Ok(())
    }
}
