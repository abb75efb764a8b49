//! # Tellerflow: durable conversational workflows
//!
//! Tellerflow executes a directed graph of nodes over a mutable per-session
//! state, persisting a checkpoint at every node boundary. A workflow turn can
//! suspend indefinitely at a human-in-the-loop approval gate and resume from
//! its latest checkpoint once a decision arrives — across process restarts.
//!
//! The crate ships a banking assistant instance (intent classification and
//! routed account actions, with the money-transfer branch gated behind
//! approval), but graph execution, checkpointing, session lifecycle, and
//! approval bookkeeping are general-purpose.
//!
//! ## Core concepts
//!
//! - **Node**: one async unit of work over the [`state::WorkflowState`]
//! - **Graph**: nodes plus unconditional and selector-routed edges
//! - **Checkpoint**: durable state snapshot at a node boundary
//! - **Gate**: a node whose predicate may pause the turn for approval
//! - **Session**: the per-conversation container (status, history, counters)
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use tellerflow::banking::{banking_graph, BankingClient, RuleClassifier};
//! use tellerflow::config::EngineConfig;
//! use tellerflow::engine::{ChatRequest, Engine, WorkflowService};
//! use tellerflow::store::Stores;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig::default();
//! let stores = Stores::in_memory();
//! let client = Arc::new(BankingClient::new(&config.downstream)?);
//! let graph = banking_graph(Arc::new(RuleClassifier::new()), client, &stores, &config)?;
//!
//! let engine = Engine::new(Arc::new(graph), stores.clone());
//! let service = WorkflowService::new(engine, stores, config);
//!
//! let outcome = service
//!     .chat(ChatRequest {
//!         message: "What is my balance?".into(),
//!         session_id: None,
//!         user_id: Some("u1".into()),
//!     })
//!     .await?;
//! # let _ = outcome;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module guide
//!
//! - [`graph`] — graph definition and compilation
//! - [`engine`] — executor, approval gate, orchestration service
//! - [`store`] — checkpoint/session/approval stores (memory, SQLite, Postgres)
//! - [`banking`] — the banking graph instance and its collaborators
//! - [`server`] — the axum REST facade
//! - [`state`] — the workflow state schema

pub mod banking;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod node;
pub mod server;
pub mod state;
pub mod store;
pub mod telemetry;
