//! Turn and approval orchestration.
//!
//! `WorkflowService` is the seam between the transport layer and the engine:
//! it owns session lifecycle (load-or-create, status transitions, history),
//! serializes execution per session with an async lock, detects replayed
//! messages, and drives approve/reject plus the checkpointed resume.

use chrono::{DateTime, Duration, Utc};
use rustc_hash::FxHashMap;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::instrument;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::engine::executor::{Engine, TurnOutcome};
use crate::error::EngineError;
use crate::state::{GateDecision, ReplyStatus, TurnReply, WorkflowState};
use crate::store::{
    ApprovalRequest, ApprovalStore, Checkpoint, CheckpointMeta, CheckpointPhase, CheckpointStore,
    Session, SessionStatus, SessionStore, StoreError, Stores, TurnRole,
};

/// Two identical consecutive user messages inside this window are treated as
/// a replay of one turn.
const REPLAY_WINDOW_SECONDS: i64 = 60;

/// Inbound chat request, transport-agnostic.
#[derive(Clone, Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Inbound approval decision.
#[derive(Clone, Debug, Deserialize)]
pub struct ApprovalDecision {
    pub approver_id: String,
    pub approved: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Pending-approval envelope returned when a turn suspends.
#[derive(Clone, Debug)]
pub struct PendingEnvelope {
    pub approval_id: String,
    pub checkpoint_id: String,
    pub amount: Option<f64>,
    pub recipient: Option<String>,
    pub message: String,
    pub paused_at: DateTime<Utc>,
}

/// Outcome of one chat turn.
#[derive(Debug)]
pub enum ChatOutcome {
    Completed {
        session_id: String,
        reply: TurnReply,
        execution_history: Vec<String>,
    },
    Pending {
        session_id: String,
        envelope: PendingEnvelope,
    },
}

/// Outcome of an approval decision.
#[derive(Debug)]
pub enum DecisionOutcome {
    Approved {
        session_id: String,
        result: TurnReply,
        execution_history: Vec<String>,
    },
    Rejected {
        session_id: String,
        reason: String,
        rejected_by: String,
    },
}

/// Read-only session view for the status endpoint.
#[derive(Debug)]
pub struct SessionView {
    pub session: Session,
    pub checkpoint_count: usize,
}

/// The orchestration facade over engine and stores.
pub struct WorkflowService {
    engine: Engine,
    stores: Stores,
    config: EngineConfig,
    locks: Mutex<FxHashMap<String, Arc<Mutex<()>>>>,
}

impl WorkflowService {
    pub fn new(engine: Engine, stores: Stores, config: EngineConfig) -> Self {
        Self {
            engine,
            stores,
            config,
            locks: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// One lock per session; held for the whole turn or resume.
    async fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut map = self.locks.lock().await;
        map.entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Handle one inbound chat message.
    #[instrument(skip(self, request), fields(session = ?request.session_id), err)]
    pub async fn chat(&self, request: ChatRequest) -> Result<ChatOutcome, EngineError> {
        let (session_id, is_new) = match &request.session_id {
            Some(id) => (id.clone(), false),
            None => (Uuid::new_v4().to_string(), true),
        };
        let lock = self.session_lock(&session_id).await;
        let _guard = lock.lock().await;

        let mut session = if is_new {
            let owner = request
                .user_id
                .clone()
                .unwrap_or_else(|| "guest".to_string());
            let session = Session::new(session_id.clone(), owner);
            self.stores.sessions.create(&session).await?;
            session
        } else {
            self.stores
                .sessions
                .get(&session_id)
                .await?
                .ok_or_else(|| EngineError::unknown_session(&session_id))?
        };
        let user_id = request
            .user_id
            .clone()
            .unwrap_or_else(|| session.user_id.clone());

        match session.status {
            SessionStatus::Active | SessionStatus::Completed => {
                if let Some((reply, execution_history)) =
                    self.replayed_reply(&session, &request.message)
                {
                    tracing::info!(session = %session_id, "duplicate message; replaying last result");
                    return Ok(ChatOutcome::Completed {
                        session_id,
                        reply,
                        execution_history,
                    });
                }
                if session.status == SessionStatus::Completed {
                    session.transition(SessionStatus::Active)?;
                }
            }
            SessionStatus::PendingApproval => {
                return Err(EngineError::Conflict(format!(
                    "session {session_id} is awaiting an approval decision"
                )));
            }
            status => {
                return Err(EngineError::Conflict(format!(
                    "session {session_id} is {status} and accepts no further messages"
                )));
            }
        }

        session.execution_count += 1;
        session.push_turn(TurnRole::User, request.message.as_str());
        self.stores.sessions.update(&session).await?;

        let state = self.state_for_turn(&request.message, &session, &user_id);
        match self.engine.run_turn(state, &session_id, &user_id).await {
            Ok(TurnOutcome::Completed(state)) => {
                self.finish_turn(&mut session, state).await
            }
            Ok(TurnOutcome::Paused(state)) => {
                self.suspend_turn(&mut session, state).await
            }
            Err(err) => {
                self.fail_session(&mut session).await;
                Err(err)
            }
        }
    }

    /// Approve or reject the session's pending gate.
    #[instrument(skip(self, decision), err)]
    pub async fn decide(
        &self,
        session_id: &str,
        decision: ApprovalDecision,
    ) -> Result<DecisionOutcome, EngineError> {
        let lock = self.session_lock(session_id).await;
        let _guard = lock.lock().await;

        let mut session = self
            .stores
            .sessions
            .get(session_id)
            .await?
            .ok_or_else(|| EngineError::unknown_session(session_id))?;
        if session.status != SessionStatus::PendingApproval {
            return Err(EngineError::Conflict(format!(
                "session {session_id} is {} and has nothing to approve",
                session.status
            )));
        }

        let approval = self
            .stores
            .approvals
            .find_pending_for_session(session_id)
            .await?
            .ok_or_else(|| {
                EngineError::NotFound(format!("pending approval for session {session_id}"))
            })?;

        if decision.approved {
            self.approve(&mut session, &approval, &decision).await
        } else {
            self.reject(&mut session, &approval, &decision).await
        }
    }

    async fn approve(
        &self,
        session: &mut Session,
        approval: &ApprovalRequest,
        decision: &ApprovalDecision,
    ) -> Result<DecisionOutcome, EngineError> {
        self.stores
            .approvals
            .approve(&approval.approval_id, &decision.approver_id)
            .await
            .map_err(store_conflict_to_engine)?;

        let mut state = self.paused_state(&session.session_id).await?;
        state.hil_decision = Some(GateDecision::by_human(
            true,
            &decision.approver_id,
            decision.reason.clone(),
        ));
        state.halt = false;
        self.append_decision_checkpoint(session, &state, approval, CheckpointPhase::Approved)
            .await?;

        session.transition(SessionStatus::Approved)?;
        self.stores.sessions.update(session).await?;

        let user_id = session.user_id.clone();
        match self.engine.resume(&session.session_id, &user_id).await {
            Ok(TurnOutcome::Completed(state)) => {
                let outcome = self.finish_turn(session, state).await?;
                match outcome {
                    ChatOutcome::Completed {
                        session_id,
                        reply,
                        execution_history,
                    } => Ok(DecisionOutcome::Approved {
                        session_id,
                        result: reply,
                        execution_history,
                    }),
                    ChatOutcome::Pending { .. } => unreachable!("finish_turn never pends"),
                }
            }
            Ok(TurnOutcome::Paused(_)) => Err(EngineError::Conflict(format!(
                "session {} paused again after resume; nested gates are not supported",
                session.session_id
            ))),
            Err(err) => {
                self.fail_session(session).await;
                Err(err)
            }
        }
    }

    async fn reject(
        &self,
        session: &mut Session,
        approval: &ApprovalRequest,
        decision: &ApprovalDecision,
    ) -> Result<DecisionOutcome, EngineError> {
        let reason = decision
            .reason
            .clone()
            .unwrap_or_else(|| "rejected".to_string());
        self.stores
            .approvals
            .reject(&approval.approval_id, &decision.approver_id, &reason)
            .await
            .map_err(store_conflict_to_engine)?;

        let mut state = self.paused_state(&session.session_id).await?;
        state.hil_decision = Some(GateDecision::by_human(
            false,
            &decision.approver_id,
            Some(reason.clone()),
        ));
        state.response = Some(TurnReply {
            status: ReplyStatus::Rejected,
            message: format!("The request was rejected: {reason}"),
            data: None,
        });
        self.append_decision_checkpoint(session, &state, approval, CheckpointPhase::Rejected)
            .await?;

        session.transition(SessionStatus::Rejected)?;
        session.push_turn(TurnRole::Assistant, format!("The request was rejected: {reason}"));
        session.workflow_state = Some(state);
        self.stores.sessions.update(session).await?;

        Ok(DecisionOutcome::Rejected {
            session_id: session.session_id.clone(),
            reason,
            rejected_by: decision.approver_id.clone(),
        })
    }

    /// Session view with checkpoint count for the status endpoint.
    pub async fn session_view(&self, session_id: &str) -> Result<SessionView, EngineError> {
        let session = self
            .stores
            .sessions
            .get(session_id)
            .await?
            .ok_or_else(|| EngineError::unknown_session(session_id))?;
        let checkpoint_count = self.stores.checkpoints.list(session_id).await?.len();
        Ok(SessionView {
            session,
            checkpoint_count,
        })
    }

    /// Ordered checkpoint log for a session.
    pub async fn checkpoints(&self, session_id: &str) -> Result<Vec<Checkpoint>, EngineError> {
        self.stores
            .sessions
            .get(session_id)
            .await?
            .ok_or_else(|| EngineError::unknown_session(session_id))?;
        Ok(self.stores.checkpoints.list(session_id).await?)
    }

    pub async fn pending_approvals(&self) -> Result<Vec<ApprovalRequest>, EngineError> {
        Ok(self.stores.approvals.list_pending().await?)
    }

    pub async fn sessions_for_user(&self, user_id: &str) -> Result<Vec<Session>, EngineError> {
        Ok(self.stores.sessions.list_by_user(user_id).await?)
    }

    // ------------------------------------------------------------------
    // internals
    // ------------------------------------------------------------------

    fn state_for_turn(&self, message: &str, session: &Session, user_id: &str) -> WorkflowState {
        let mut state = WorkflowState::for_message(message);
        state.user_id = Some(user_id.to_string());
        state.session_id = Some(session.session_id.clone());
        state.from_account = Some(self.config.default_account.clone());
        if let Some(previous) = &session.workflow_state {
            state.context_amount = previous.context_amount;
            state.context_recipient = previous.context_recipient.clone();
            state.awaiting_completion = previous.awaiting_completion;
        }
        state
    }

    /// Previous reply for an identical message inside the replay window.
    fn replayed_reply(
        &self,
        session: &Session,
        message: &str,
    ) -> Option<(TurnReply, Vec<String>)> {
        let last = session.last_user_turn()?;
        if last.content != message {
            return None;
        }
        if Utc::now() - last.timestamp > Duration::seconds(REPLAY_WINDOW_SECONDS) {
            return None;
        }
        let previous = session.workflow_state.as_ref()?;
        let reply = previous.response.clone()?;
        Some((reply, previous.execution_history.clone()))
    }

    async fn finish_turn(
        &self,
        session: &mut Session,
        state: WorkflowState,
    ) -> Result<ChatOutcome, EngineError> {
        let reply = state
            .response
            .clone()
            .unwrap_or_else(|| TurnReply::completed("Done.", None));

        // A clarification question keeps the session conversationally open.
        if reply.status != ReplyStatus::NeedsInput {
            session.transition(SessionStatus::Completed)?;
        }
        session.push_turn(TurnRole::Assistant, reply.message.as_str());
        session.current_node = state.execution_history.last().cloned();
        let execution_history = state.execution_history.clone();
        session.workflow_state = Some(state);
        self.stores.sessions.update(session).await?;

        Ok(ChatOutcome::Completed {
            session_id: session.session_id.clone(),
            reply,
            execution_history,
        })
    }

    async fn suspend_turn(
        &self,
        session: &mut Session,
        state: WorkflowState,
    ) -> Result<ChatOutcome, EngineError> {
        session.transition(SessionStatus::PendingApproval)?;

        let approval = self
            .stores
            .approvals
            .find_pending_for_session(&session.session_id)
            .await?
            .ok_or_else(|| {
                EngineError::Conflict(format!(
                    "session {} halted without a pending approval",
                    session.session_id
                ))
            })?;
        let pause_checkpoint = self
            .stores
            .checkpoints
            .load_latest(&session.session_id)
            .await?
            .ok_or_else(|| {
                EngineError::NotFound(format!(
                    "pause checkpoint for session {}",
                    session.session_id
                ))
            })?;

        let message = state
            .response
            .as_ref()
            .map(|r| r.message.clone())
            .unwrap_or_else(|| "This request is awaiting approval.".to_string());
        session.push_turn(TurnRole::Assistant, message.as_str());
        session.current_node = state.execution_history.last().cloned();
        session.workflow_state = Some(state);
        self.stores.sessions.update(session).await?;

        Ok(ChatOutcome::Pending {
            session_id: session.session_id.clone(),
            envelope: PendingEnvelope {
                approval_id: approval.approval_id,
                checkpoint_id: pause_checkpoint.checkpoint_id,
                amount: approval.amount,
                recipient: approval.recipient,
                message,
                paused_at: pause_checkpoint
                    .metadata
                    .paused_at
                    .unwrap_or(pause_checkpoint.created_at),
            },
        })
    }

    /// State snapshot from the session's pause checkpoint.
    async fn paused_state(&self, session_id: &str) -> Result<WorkflowState, EngineError> {
        let checkpoint = self
            .stores
            .checkpoints
            .load_latest(session_id)
            .await?
            .ok_or_else(|| {
                EngineError::NotFound(format!("checkpoint for session {session_id}"))
            })?;
        Ok(crate::state::unwrap_checkpoint_state(&checkpoint.state).map_err(StoreError::from)?)
    }

    async fn append_decision_checkpoint(
        &self,
        session: &Session,
        state: &WorkflowState,
        approval: &ApprovalRequest,
        phase: CheckpointPhase,
    ) -> Result<(), EngineError> {
        let latest = self
            .stores
            .checkpoints
            .load_latest(&session.session_id)
            .await?
            .ok_or_else(|| {
                EngineError::NotFound(format!(
                    "pause checkpoint for session {}",
                    session.session_id
                ))
            })?;
        let payload = serde_json::to_value(state).map_err(StoreError::from)?;
        self.stores
            .checkpoints
            .save(
                &session.session_id,
                &latest.node_id,
                payload,
                CheckpointMeta {
                    phase,
                    approval_id: Some(approval.approval_id.clone()),
                    paused_at: None,
                },
            )
            .await?;
        Ok(())
    }

    /// Best-effort failure transition; storage faults here are logged, not
    /// surfaced, because the original error is already on its way out.
    async fn fail_session(&self, session: &mut Session) {
        if session.transition(SessionStatus::Failed).is_ok() {
            if let Err(e) = self.stores.sessions.update(session).await {
                tracing::error!(session = %session.session_id, error = %e, "failed to persist failed status");
            }
        }
    }
}

fn store_conflict_to_engine(err: StoreError) -> EngineError {
    match err {
        StoreError::Conflict { message } => EngineError::Conflict(message),
        StoreError::NotFound { what } => EngineError::NotFound(what),
        other => EngineError::Storage(other),
    }
}
