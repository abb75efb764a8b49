//! Persistent stores: checkpoints, sessions, approvals.
//!
//! Each store is a trait with three interchangeable backends: a volatile
//! in-memory implementation (tests, demo runs), an embedded SQLite database,
//! and a networked Postgres store shared between replicas. The stores are
//! process-wide singletons, injected by constructor so tests can substitute
//! their own.

pub mod approval;
pub mod checkpoint;
pub mod postgres;
pub mod session;
pub mod sqlite;

pub use approval::{ApprovalRequest, ApprovalStatus, ApprovalStore, InMemoryApprovalStore};
pub use checkpoint::{
    Checkpoint, CheckpointMeta, CheckpointPhase, CheckpointStore, InMemoryCheckpointStore,
};
pub use session::{
    ConversationTurn, InMemorySessionStore, Session, SessionStatus, SessionStore, TurnRole,
};

use std::sync::Arc;

use miette::Diagnostic;
use thiserror::Error;

use crate::config::{EngineConfig, StorageBackend};

/// Errors from any of the three stores.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    /// The requested record does not exist.
    #[error("record not found: {what}")]
    #[diagnostic(code(tellerflow::store::not_found))]
    NotFound { what: String },

    /// The mutation conflicts with the record's current state; nothing was
    /// changed.
    #[error("conflict: {message}")]
    #[diagnostic(code(tellerflow::store::conflict))]
    Conflict { message: String },

    /// Backend failure (database, network, lock poisoning).
    #[error("backend error: {message}")]
    #[diagnostic(
        code(tellerflow::store::backend),
        help("Check backend connectivity and permissions; backend message: {message}.")
    )]
    Backend { message: String },

    /// Persisted payload could not be encoded or decoded.
    #[error("serialization failed: {source}")]
    #[diagnostic(code(tellerflow::store::serde))]
    Serde {
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(source: serde_json::Error) -> Self {
        Self::Serde { source }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Bundle of the three process-wide stores.
#[derive(Clone)]
pub struct Stores {
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub approvals: Arc<dyn ApprovalStore>,
}

impl Stores {
    /// Volatile stores for tests and no-persistence runs.
    pub fn in_memory() -> Self {
        Self {
            checkpoints: Arc::new(InMemoryCheckpointStore::new()),
            sessions: Arc::new(InMemorySessionStore::new()),
            approvals: Arc::new(InMemoryApprovalStore::new()),
        }
    }

    /// Connect the backend selected by configuration.
    pub async fn connect(config: &EngineConfig) -> Result<Self> {
        match config.storage_backend {
            StorageBackend::InMemory => Ok(Self::in_memory()),
            StorageBackend::Embedded => {
                let store =
                    Arc::new(sqlite::SqliteStores::connect(&config.storage_path_or_url).await?);
                Ok(Self {
                    checkpoints: store.clone(),
                    sessions: store.clone(),
                    approvals: store,
                })
            }
            StorageBackend::SharedCache => {
                let store =
                    Arc::new(postgres::PostgresStores::connect(&config.storage_path_or_url).await?);
                Ok(Self {
                    checkpoints: store.clone(),
                    sessions: store.clone(),
                    approvals: store,
                })
            }
        }
    }
}
