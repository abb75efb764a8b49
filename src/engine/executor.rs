//! The graph executor.
//!
//! One execution is a *turn*: starting from the entry node (or, on resume,
//! from the node after the approval gate), the executor runs one node at a
//! time, checkpointing around each invocation and routing along the graph's
//! edges until it reaches `End` or a node raises the halt flag.
//!
//! Per-node protocol:
//! 1. stop immediately if the halt flag is set;
//! 2. record the node in `execution_history` and save a `start` checkpoint;
//! 3. invoke the node;
//! 4. if the node halted the turn (the gate pausing), yield without an `end`
//!    checkpoint so the pause record stays the newest checkpoint;
//! 5. otherwise save an `end` checkpoint and route to the next node.

use std::sync::Arc;

use tracing::instrument;

use crate::error::EngineError;
use crate::graph::{NodeId, WorkflowGraph};
use crate::node::{NodeContext, NodeError};
use crate::state::{unwrap_checkpoint_state, WorkflowState};
use crate::store::{CheckpointMeta, CheckpointPhase, CheckpointStore, SessionStore, StoreError, Stores};

/// How a turn ended.
#[derive(Debug)]
pub enum TurnOutcome {
    /// The graph reached `End`; the state carries the terminal reply.
    Completed(WorkflowState),
    /// A gate suspended the turn; the newest checkpoint is the pause record.
    Paused(WorkflowState),
}

/// Session-scoped graph executor.
#[derive(Clone)]
pub struct Engine {
    graph: Arc<WorkflowGraph>,
    stores: Stores,
}

impl Engine {
    pub fn new(graph: Arc<WorkflowGraph>, stores: Stores) -> Self {
        Self { graph, stores }
    }

    pub fn graph(&self) -> &WorkflowGraph {
        &self.graph
    }

    /// Execute a fresh turn from the graph entry.
    #[instrument(skip(self, state), err)]
    pub async fn run_turn(
        &self,
        state: WorkflowState,
        session_id: &str,
        user_id: &str,
    ) -> Result<TurnOutcome, EngineError> {
        let entry = self.graph.entry().clone();
        self.run_from(entry, state, session_id, user_id).await
    }

    /// Resume a paused session from its latest checkpoint.
    ///
    /// The checkpoint's node is the gate that paused; execution continues at
    /// its successor. Resuming without an approved gate decision is refused.
    #[instrument(skip(self), err)]
    pub async fn resume(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> Result<TurnOutcome, EngineError> {
        let checkpoint = self
            .stores
            .checkpoints
            .load_latest(session_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("checkpoint for session {session_id}")))?;

        let mut state =
            unwrap_checkpoint_state(&checkpoint.state).map_err(StoreError::from)?;
        if !state.is_approved() {
            return Err(EngineError::Conflict(format!(
                "session {session_id} cannot resume without an approved gate decision"
            )));
        }
        state.halt = false;

        let gate = NodeId::from(checkpoint.node_id.as_str());
        let next = self
            .graph
            .successor(&gate)
            .cloned()
            .ok_or_else(|| EngineError::Routing {
                node: gate.to_string(),
                key: "<resume>".to_string(),
            })?;
        if next.is_end() {
            return Ok(TurnOutcome::Completed(state));
        }
        self.run_from(next, state, session_id, user_id).await
    }

    async fn run_from(
        &self,
        start: NodeId,
        mut state: WorkflowState,
        session_id: &str,
        user_id: &str,
    ) -> Result<TurnOutcome, EngineError> {
        let mut current = start;
        loop {
            if state.halt {
                return Ok(TurnOutcome::Paused(state));
            }

            let node = self
                .graph
                .node(&current)
                .ok_or_else(|| EngineError::Routing {
                    node: current.to_string(),
                    key: "<unregistered>".to_string(),
                })?;

            state.execution_history.push(current.as_str().to_string());
            self.stores
                .sessions
                .set_current_node(session_id, current.as_str())
                .await?;
            self.checkpoint(session_id, &current, &state, CheckpointPhase::Start)
                .await?;

            let ctx = NodeContext {
                node_id: current.as_str().to_string(),
                session_id: session_id.to_string(),
                user_id: user_id.to_string(),
            };
            tracing::debug!(node = %current, session = session_id, "running node");
            state = node.run(state, ctx).await.map_err(|e| match e {
                NodeError::Storage(inner) => EngineError::Storage(inner),
                other => EngineError::Node {
                    node: current.to_string(),
                    message: other.to_string(),
                },
            })?;

            if state.halt {
                // The gate already persisted the pause record; an `end`
                // checkpoint here would bury it.
                return Ok(TurnOutcome::Paused(state));
            }
            self.checkpoint(session_id, &current, &state, CheckpointPhase::End)
                .await?;

            let next = self.graph.next(&current, &state)?;
            if next.is_end() {
                return Ok(TurnOutcome::Completed(state));
            }
            current = next;
        }
    }

    async fn checkpoint(
        &self,
        session_id: &str,
        node: &NodeId,
        state: &WorkflowState,
        phase: CheckpointPhase,
    ) -> Result<(), EngineError> {
        let payload = serde_json::to_value(state).map_err(StoreError::from)?;
        self.stores
            .checkpoints
            .save(session_id, node.as_str(), payload, CheckpointMeta::phase(phase))
            .await?;
        Ok(())
    }
}
