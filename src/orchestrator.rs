//! The orchestrator service: the one entry point callers use.
//!
//! Owns one session actor per live session. Every operation resolves the
//! actor by id and sends it a message; the actor serializes the work.

use crate::agents::{AgentClients, CancelSignal};
use crate::config::OrchestratorConfig;
use crate::domain::actor::{Reply, SessionActor, SessionActorArgs, SessionMessage};
use crate::domain::context::SessionContext;
use crate::domain::errors::OrchestratorError;
use crate::domain::output::PhaseOutput;
use crate::domain::plan::PlanRecord;
use crate::domain::services::OrchestratorServices;
use crate::domain::session::{Session, SessionPatch};
use crate::domain::types::SessionId;
use crate::plan_store::{activate_plan, complete_plan};
use crate::preferences::{load_preferences, save_preferences, SkipPreferences};
use crate::progress::ProgressUpdate;
use crate::review::{review_with_command, Adjustment, ReviewOutcome};
use crate::state_machine::{SessionSnapshot, SessionStateMachine};
use crate::structured_logger::StructuredLogger;
use chrono::NaiveDate;
use ractor::{Actor, ActorRef};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, watch, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

struct SessionHandle {
    actor: ActorRef<SessionMessage>,
    join: JoinHandle<()>,
    cancel_tx: watch::Sender<bool>,
    snapshots: watch::Receiver<SessionSnapshot>,
    state: watch::Receiver<Session>,
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    services: OrchestratorServices,
    clients: AgentClients,
    sessions: RwLock<HashMap<SessionId, SessionHandle>>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, services: OrchestratorServices) -> Self {
        let clients = AgentClients::new(services.backend.clone(), config.retry.clone());
        Self {
            config,
            services,
            clients,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn services(&self) -> &OrchestratorServices {
        &self.services
    }

    /// Validates the context, loads the team's preferences and starts a
    /// session in `organizing.dialogue`.
    pub async fn create_session(&self, context: SessionContext) -> Result<SessionId, OrchestratorError> {
        context.validate()?;
        let prefs = load_preferences(
            self.services.preferences.as_ref(),
            &context.team.user_id,
            &context.team.team_id,
            self.config.auto_continue_bounds,
        )?;

        let session = Session::new(SessionId::new(), context, prefs);
        let id = session.id;
        self.services.sessions.save(&session)?;
        self.spawn_actor(session, false).await?;

        tracing::info!(session_id = %id, "Session created");
        Ok(id)
    }

    /// Runs the current sub-state, and any approved follow-ups.
    pub async fn advance(&self, id: SessionId) -> Result<PhaseOutput, OrchestratorError> {
        self.call(id, SessionMessage::Advance).await
    }

    /// Last committed state. Does not wait behind an agent call in flight.
    pub async fn get_session(&self, id: SessionId) -> Result<Session, OrchestratorError> {
        let sessions = self.sessions.read().await;
        sessions
            .get(&id)
            .map(|h| h.state.borrow().clone())
            .ok_or(OrchestratorError::SessionNotFound { id })
    }

    /// Latest snapshot without a round trip through the actor.
    pub async fn watch_session(
        &self,
        id: SessionId,
    ) -> Result<watch::Receiver<SessionSnapshot>, OrchestratorError> {
        let sessions = self.sessions.read().await;
        sessions
            .get(&id)
            .map(|h| h.snapshots.clone())
            .ok_or(OrchestratorError::SessionNotFound { id })
    }

    pub async fn update_session_state(
        &self,
        id: SessionId,
        patch: SessionPatch,
    ) -> Result<Session, OrchestratorError> {
        self.call(id, |reply| SessionMessage::UpdateState(Box::new(patch), reply))
            .await
    }

    /// Moves a non-terminal session to `failed`. Idempotent.
    ///
    /// The cancellation flag is raised before the message is queued so an
    /// agent call running inside the actor stops at its next checkpoint.
    pub async fn abort(&self, id: SessionId) -> Result<Session, OrchestratorError> {
        {
            let sessions = self.sessions.read().await;
            let handle = sessions
                .get(&id)
                .ok_or(OrchestratorError::SessionNotFound { id })?;
            if !handle.snapshots.borrow().phase.is_terminal() {
                handle.cancel_tx.send_replace(true);
            }
        }
        let session = self.call(id, SessionMessage::Abort).await?;
        tracing::info!(session_id = %id, "Session aborted");
        Ok(session)
    }

    /// Records an external error. A pending auto-continue timer is cancelled
    /// and the gate waits for a human.
    pub async fn record_error(
        &self,
        id: SessionId,
        message: impl Into<String>,
    ) -> Result<Session, OrchestratorError> {
        let message = message.into();
        self.call(id, |reply| SessionMessage::RecordError(message, reply))
            .await
    }

    /// Asks for a manual review at the current or next gate. Returns `false`
    /// when on-demand review is disabled for the session.
    pub async fn request_review(&self, id: SessionId) -> Result<bool, OrchestratorError> {
        let session = self.get_session(id).await?;
        if !session.preferences.re_enable.on_demand {
            tracing::debug!(session_id = %id, "On-demand review disabled");
            return Ok(false);
        }
        self.call(id, SessionMessage::RequestReview).await?;
        Ok(true)
    }

    /// Continues a session failed by an agent, using `payload` as the
    /// agent's response for the failed sub-state.
    pub async fn resume_with_payload(
        &self,
        id: SessionId,
        payload: impl Into<String>,
    ) -> Result<PhaseOutput, OrchestratorError> {
        let payload = payload.into();
        self.call(id, |reply| SessionMessage::ResumeWithPayload(payload, reply))
            .await
    }

    pub async fn subscribe_progress(
        &self,
        id: SessionId,
    ) -> Result<watch::Receiver<Option<ProgressUpdate>>, OrchestratorError> {
        self.actor(id).await?;
        self.services
            .progress
            .subscribe(id)
            .ok_or_else(|| OrchestratorError::ActorUnavailable {
                id,
                message: "progress channel unavailable".to_string(),
            })
    }

    /// Previews a review pass against the session's current gate. Nothing is
    /// committed; pass the result to `update_session_state` to commit it.
    pub async fn review_session(
        &self,
        id: SessionId,
        manual: Option<&Adjustment>,
        command: Option<&str>,
    ) -> Result<ReviewOutcome, OrchestratorError> {
        let session = self.get_session(id).await?;
        let Some(gate) = &session.gate else {
            return Err(OrchestratorError::InvalidTransition {
                from: session.phase,
                message: "session is not paused at a review gate".to_string(),
            });
        };
        review_with_command(
            id,
            &gate.review,
            manual,
            command,
            self.clients.interpreter(),
            &session.context,
        )
        .await
    }

    /// Respawns actors for persisted sessions that have not been retired.
    pub async fn restore_sessions(&self) -> Result<Vec<SessionId>, OrchestratorError> {
        let mut restored = Vec::new();
        for session in self.services.sessions.list()? {
            if session.retired || self.sessions.read().await.contains_key(&session.id) {
                continue;
            }
            let id = session.id;
            self.spawn_actor(session, true).await?;
            restored.push(id);
        }
        if !restored.is_empty() {
            tracing::info!(count = restored.len(), "Restored sessions");
        }
        Ok(restored)
    }

    /// Stops every session actor and waits for them to exit. Persisted
    /// state is left as is.
    pub async fn shutdown(&self) {
        let handles: Vec<(SessionId, SessionHandle)> = self.sessions.write().await.drain().collect();
        let mut joins = Vec::with_capacity(handles.len());
        for (id, handle) in handles {
            tracing::debug!(session_id = %id, "Stopping session actor");
            handle.actor.stop(None);
            self.services.progress.remove(id);
            joins.push(handle.join);
        }
        for result in futures::future::join_all(joins).await {
            if let Err(err) = result {
                tracing::warn!("Session actor did not stop cleanly: {}", err);
            }
        }
    }

    pub fn preferences(&self, user_id: &str, team_id: &str) -> Result<SkipPreferences, OrchestratorError> {
        load_preferences(
            self.services.preferences.as_ref(),
            user_id,
            team_id,
            self.config.auto_continue_bounds,
        )
    }

    /// Validates and stores preferences. Running sessions keep the
    /// preferences they were created with.
    pub fn set_preferences(
        &self,
        user_id: &str,
        team_id: &str,
        prefs: &SkipPreferences,
    ) -> Result<(), OrchestratorError> {
        save_preferences(
            self.services.preferences.as_ref(),
            user_id,
            team_id,
            prefs,
            self.config.auto_continue_bounds,
        )
    }

    /// Parses a JSON preferences record, then validates and stores it.
    pub fn set_preferences_json(
        &self,
        user_id: &str,
        team_id: &str,
        raw: &str,
    ) -> Result<SkipPreferences, OrchestratorError> {
        let prefs = SkipPreferences::from_json(raw, self.config.auto_continue_bounds)?;
        self.set_preferences(user_id, team_id, &prefs)?;
        Ok(prefs)
    }

    pub fn activate_plan(&self, plan_id: Uuid, week_start: NaiveDate) -> Result<PlanRecord, OrchestratorError> {
        activate_plan(self.services.plans.as_ref(), plan_id, week_start)
    }

    pub fn complete_plan(&self, plan_id: Uuid) -> Result<PlanRecord, OrchestratorError> {
        complete_plan(self.services.plans.as_ref(), plan_id)
    }

    async fn spawn_actor(&self, session: Session, restored: bool) -> Result<(), OrchestratorError> {
        let id = session.id;
        let logger = Arc::new(self.logger_for(id));
        if restored {
            logger.increment_run_id();
        }
        let (machine, snapshots) = SessionStateMachine::new(session, logger);
        let state = machine.watch_session();
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let args = SessionActorArgs {
            machine,
            clients: self.clients.clone(),
            services: self.services.clone(),
            cancel: CancelSignal::new(cancel_rx),
        };
        let (actor, join) = SessionActor::spawn(None, SessionActor, args)
            .await
            .map_err(|e| OrchestratorError::ActorUnavailable {
                id,
                message: e.to_string(),
            })?;

        self.sessions.write().await.insert(
            id,
            SessionHandle {
                actor,
                join,
                cancel_tx,
                snapshots,
                state,
            },
        );
        Ok(())
    }

    /// Structured log for the session, or a disabled logger when logs are
    /// off or the log directory cannot be created.
    fn logger_for(&self, id: SessionId) -> StructuredLogger {
        let session_id = id.to_string();
        if !self.config.logs {
            return StructuredLogger::disabled(&session_id);
        }
        let logger = self
            .config
            .storage_paths()
            .and_then(|paths| paths.session_logs_dir(id))
            .and_then(|dir| StructuredLogger::new(&session_id, &dir));
        match logger {
            Ok(logger) => logger,
            Err(err) => {
                tracing::warn!(session_id = %id, "Structured log unavailable: {:#}", err);
                StructuredLogger::disabled(&session_id)
            }
        }
    }

    async fn actor(&self, id: SessionId) -> Result<ActorRef<SessionMessage>, OrchestratorError> {
        let sessions = self.sessions.read().await;
        sessions
            .get(&id)
            .map(|h| h.actor.clone())
            .ok_or(OrchestratorError::SessionNotFound { id })
    }

    async fn call<T>(
        &self,
        id: SessionId,
        message: impl FnOnce(Reply<T>) -> SessionMessage,
    ) -> Result<T, OrchestratorError> {
        let actor = self.actor(id).await?;
        let (tx, rx) = oneshot::channel();
        actor
            .send_message(message(tx))
            .map_err(|e| unavailable(id, e))?;
        rx.await.map_err(|_| OrchestratorError::ActorUnavailable {
            id,
            message: "actor stopped before replying".to_string(),
        })?
    }
}

fn unavailable(id: SessionId, err: impl std::fmt::Display) -> OrchestratorError {
    OrchestratorError::ActorUnavailable {
        id,
        message: err.to_string(),
    }
}
