//! Session actor: one per session, serializing every mutation.
//!
//! Agent calls run inside the actor's message handler, so `advance`,
//! `update_session_state`, `abort` and timer firings for one session never
//! interleave. Different sessions run on different actors in parallel.

use crate::agents::client::parse_phase_output;
use crate::agents::{AgentClients, AgentRequest, AgentResult, CancelSignal};
use crate::domain::errors::{AgentError, OrchestratorError};
use crate::domain::failure::SessionFailure;
use crate::domain::output::{PhaseOutput, PhasePayload};
use crate::domain::phase::SessionPhase;
use crate::domain::plan::{ConversationBlob, PlanRecord};
use crate::domain::services::OrchestratorServices;
use crate::domain::session::{ConversationExchange, ExchangeOutcome, Session, SessionPatch};
use crate::domain::types::{AgentKind, TimestampUtc};
use crate::state_machine::{SessionCommand, SessionEvent, SessionStateMachine};
use async_trait::async_trait;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub type Reply<T> = oneshot::Sender<Result<T, OrchestratorError>>;

/// Messages that can be sent to a session actor.
pub enum SessionMessage {
    /// Run the current sub-state (and any approved follow-ups).
    Advance(Reply<PhaseOutput>),
    UpdateState(Box<SessionPatch>, Reply<Session>),
    RecordError(String, Reply<Session>),
    RequestReview(Reply<Session>),
    /// Raw payload for the sub-state an agent failed in.
    ResumeWithPayload(String, Reply<PhaseOutput>),
    Abort(Reply<Session>),
    /// Sent by the auto-continue timer task.
    AutoContinueFired(u64),
}

/// Arguments for spawning a session actor.
pub struct SessionActorArgs {
    pub machine: SessionStateMachine,
    pub clients: AgentClients,
    pub services: OrchestratorServices,
    /// Flipped by the orchestrator on abort; observed by retries and timers.
    pub cancel: CancelSignal,
}

pub struct SessionActorState {
    machine: SessionStateMachine,
    clients: AgentClients,
    services: OrchestratorServices,
    cancel: CancelSignal,
    timer: Option<(u64, JoinHandle<()>)>,
}

pub struct SessionActor;

#[async_trait]
impl Actor for SessionActor {
    type Msg = SessionMessage;
    type State = SessionActorState;
    type Arguments = SessionActorArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let mut state = SessionActorState {
            machine: args.machine,
            clients: args.clients,
            services: args.services,
            cancel: args.cancel,
            timer: None,
        };

        // A restored session may have been paused with a running timer.
        if let Some(pending) = state.session().pending_timer().cloned() {
            let elapsed = (TimestampUtc::now().0 - pending.armed_at.0)
                .to_std()
                .unwrap_or_default();
            let remaining = Duration::from_secs(pending.delay_secs).saturating_sub(elapsed);
            tracing::info!(
                session_id = %state.session().id,
                generation = pending.generation,
                remaining_secs = remaining.as_secs(),
                "Re-arming auto-continue timer"
            );
            state.arm_timer(&myself, pending.generation, remaining);
        }
        Ok(state)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SessionMessage::Advance(reply) => {
                let result = state.advance(&myself).await;
                send_reply(reply, result);
            }
            SessionMessage::UpdateState(patch, reply) => {
                let result = state
                    .apply(SessionCommand::UpdateState { patch: *patch })
                    .map(|_| state.session().clone());
                send_reply(reply, result);
            }
            SessionMessage::RecordError(message, reply) => {
                let result = state
                    .apply(SessionCommand::RecordError { message })
                    .map(|_| state.session().clone());
                send_reply(reply, result);
            }
            SessionMessage::RequestReview(reply) => {
                let result = state
                    .apply(SessionCommand::RequestReview)
                    .map(|_| state.session().clone());
                send_reply(reply, result);
            }
            SessionMessage::ResumeWithPayload(payload, reply) => {
                let result = state.resume_with_payload(payload);
                send_reply(reply, result);
            }
            SessionMessage::Abort(reply) => {
                let result = state
                    .apply(SessionCommand::Abort)
                    .map(|_| state.session().clone());
                send_reply(reply, result);
            }
            SessionMessage::AutoContinueFired(generation) => {
                if state.timer.as_ref().is_some_and(|(g, _)| *g == generation) {
                    state.timer = None;
                }
                match state.apply(SessionCommand::AutoContinueFired { generation }) {
                    Ok(events) => {
                        let committed = events
                            .iter()
                            .any(|e| matches!(e, SessionEvent::GateCommitted { .. }));
                        if committed {
                            state.continue_after_gate(&myself).await;
                        }
                    }
                    Err(err) => tracing::warn!(
                        session_id = %state.session().id,
                        "Auto-continue failed: {}",
                        err
                    ),
                }
            }
        }

        // Timer events are handled after the fact so the timer task gets a
        // handle to this actor.
        state.sync_timer(&myself);
        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        state.cancel_timer();
        Ok(())
    }
}

fn send_reply<T>(reply: Reply<T>, result: Result<T, OrchestratorError>) {
    if reply.send(result).is_err() {
        tracing::debug!("Session reply channel closed");
    }
}

fn progress_message(session: &Session, events: &[SessionEvent]) -> String {
    for event in events.iter().rev() {
        match event {
            SessionEvent::SessionCompleted => return "plan complete".to_string(),
            SessionEvent::SessionRetired { .. } => return "plan saved as draft".to_string(),
            SessionEvent::SessionFailed { kind } => return format!("session failed: {:?}", kind),
            SessionEvent::TimerArmed {
                gate, delay_secs, ..
            } => {
                return format!("{} review passes automatically in {}s", gate, delay_secs)
            }
            SessionEvent::GatePaused { gate, .. } => {
                return format!("waiting for {} review", gate)
            }
            SessionEvent::GateCommitted { gate, .. } => {
                return format!("{} review committed", gate)
            }
            _ => {}
        }
    }
    format!("at {}", session.phase)
}

impl SessionActorState {
    fn session(&self) -> &Session {
        self.machine.session()
    }

    /// Applies a command, persists the session and publishes progress.
    ///
    /// The machine commits before the save, so `Unpersisted` means the live
    /// session has moved on while the stored copy is one step behind.
    fn apply(&mut self, command: SessionCommand) -> Result<Vec<SessionEvent>, OrchestratorError> {
        let events = self.machine.apply(command)?;
        if events.is_empty() {
            return Ok(events);
        }

        let session = self.machine.session();
        if let Err(source) = self.services.sessions.save(session) {
            tracing::warn!(
                session_id = %session.id,
                phase = %session.phase,
                "Failed to persist session: {}",
                source
            );
            return Err(OrchestratorError::Unpersisted {
                id: session.id,
                phase: session.phase,
                source,
            });
        }
        let snapshot = self.machine.subscribe().borrow().clone();
        self.services.progress.publish(
            session.id,
            session.phase.agent(),
            session.phase,
            progress_message(session, &events),
            snapshot.progress_percent,
        );
        if session.retired || session.failure.as_ref().is_some_and(|f| !f.is_agent_failure()) {
            // Nothing more will be published; receivers keep the last value.
            self.services.progress.remove(session.id);
        }
        Ok(events)
    }

    fn arm_timer(&mut self, myself: &ActorRef<SessionMessage>, generation: u64, delay: Duration) {
        self.cancel_timer();
        let actor = myself.clone();
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    if let Err(err) = actor.send_message(SessionMessage::AutoContinueFired(generation)) {
                        tracing::debug!("Auto-continue target gone: {}", err);
                    }
                }
                _ = cancel.cancelled() => {}
            }
        });
        self.timer = Some((generation, handle));
    }

    fn cancel_timer(&mut self) {
        if let Some((generation, handle)) = self.timer.take() {
            tracing::debug!(generation, "Cancelling auto-continue timer task");
            handle.abort();
        }
    }

    /// Makes the running timer task match the session's pending timer.
    fn sync_timer(&mut self, myself: &ActorRef<SessionMessage>) {
        let pending = self
            .session()
            .pending_timer()
            .map(|t| (t.generation, t.delay_secs));
        let running = self.timer.as_ref().map(|(g, _)| *g);
        match pending {
            Some((generation, delay_secs)) if running != Some(generation) => {
                self.arm_timer(myself, generation, Duration::from_secs(delay_secs));
            }
            None if running.is_some() => self.cancel_timer(),
            _ => {}
        }
    }

    /// Runs the sub-states a timer-committed gate leads into, the same way a
    /// caller's `advance` would.
    async fn continue_after_gate(&mut self, myself: &ActorRef<SessionMessage>) {
        let id = self.session().id;
        match self.advance(myself).await {
            Ok(output) => tracing::info!(
                session_id = %id,
                phase = %output.phase,
                "Auto-continue ran to the next stop"
            ),
            Err(err) => tracing::warn!(session_id = %id, "Auto-continue stopped: {}", err),
        }
    }

    async fn advance(&mut self, myself: &ActorRef<SessionMessage>) -> Result<PhaseOutput, OrchestratorError> {
        let session = self.session();
        if session.phase == SessionPhase::Completed && !session.retired {
            // The plan hand-off failed earlier; retry it.
            self.retire()?;
            return self.final_output();
        }

        let mut last = None;
        loop {
            let session = self.session();
            if let Some(gate) = session.paused_gate() {
                return last.ok_or(OrchestratorError::AwaitingReview { gate });
            }
            if session.is_terminal() {
                return last.ok_or_else(|| OrchestratorError::InvalidTransition {
                    from: session.phase,
                    message: "session is terminal".to_string(),
                });
            }

            let (output, approved) = self.step().await?;
            last = Some(output);

            if self.session().phase == SessionPhase::Completed {
                self.retire()?;
                break;
            }
            if !approved {
                break;
            }
            // Timers armed while chaining must be live before the next agent call.
            self.sync_timer(myself);
        }
        last.ok_or_else(|| OrchestratorError::InvalidTransition {
            from: self.session().phase,
            message: "no sub-state ran".to_string(),
        })
    }

    /// Runs the agent for the current sub-state once (with retries).
    async fn step(&mut self) -> Result<(PhaseOutput, bool), OrchestratorError> {
        let session = self.session();
        let id = session.id;
        let Some(request) = AgentRequest::for_session(session) else {
            return Err(OrchestratorError::InvalidTransition {
                from: session.phase,
                message: "sub-state has no agent".to_string(),
            });
        };
        let agent = request.agent();
        let phase = request.phase;

        self.services.progress.publish(
            id,
            Some(agent),
            phase,
            format!("{} agent working on {}", agent, phase),
            phase.progress_percent(),
        );
        let logger = self.machine.logger().clone();
        logger.log_agent_invocation(agent.as_str(), phase.label());
        tracing::info!(session_id = %id, %agent, %phase, "Running agent");

        let result = self
            .clients
            .for_agent(agent)
            .invoke(&request, &self.cancel)
            .await;
        logger.log_agent_complete(agent.as_str(), result.is_ok());

        match result {
            Ok(AgentResult {
                output,
                prompt,
                response,
            }) => {
                let exchange = ConversationExchange::new(
                    agent,
                    phase,
                    prompt,
                    ExchangeOutcome::Response { response },
                );
                let events = self.apply(SessionCommand::RecordOutput {
                    output: output.clone(),
                    exchange,
                })?;
                let approved = events
                    .iter()
                    .any(|e| matches!(e, SessionEvent::OutputApproved { .. }));
                Ok((output, approved))
            }
            Err(AgentError::Cancelled { .. }) => {
                self.apply(SessionCommand::Abort)?;
                Err(OrchestratorError::SessionAborted { id })
            }
            Err(err) => {
                if let Some(failure) = SessionFailure::from_agent(phase, &err) {
                    let exchange = ConversationExchange::new(
                        agent,
                        phase,
                        request.prompt(),
                        ExchangeOutcome::Failed {
                            message: err.to_string(),
                            attempts: err.attempts().to_vec(),
                        },
                    );
                    self.apply(SessionCommand::RecordFailure { exchange, failure })?;
                }
                Err(OrchestratorError::from_agent(id, err))
            }
        }
    }

    fn resume_with_payload(&mut self, payload: String) -> Result<PhaseOutput, OrchestratorError> {
        let session = self.session();
        let failed_phase = match &session.failure {
            Some(failure) if session.phase == SessionPhase::Failed => failure.phase,
            _ => {
                return Err(OrchestratorError::InvalidTransition {
                    from: session.phase,
                    message: "only failed sessions can be resumed".to_string(),
                })
            }
        };
        let agent = failed_phase.agent().unwrap_or(AgentKind::Editing);
        let output = parse_phase_output(failed_phase, &payload, &session.context)
            .map_err(|message| OrchestratorError::InvalidResponse { agent, message })?;
        let prompt = session
            .exchanges
            .iter()
            .rev()
            .find(|e| e.phase == failed_phase)
            .map(|e| e.prompt.clone())
            .unwrap_or_default();
        let exchange = ConversationExchange::new(
            agent,
            failed_phase,
            prompt,
            ExchangeOutcome::ManualPayload { response: payload },
        );

        self.apply(SessionCommand::ResumeWithPayload {
            output: output.clone(),
            exchange,
        })?;
        tracing::info!(session_id = %self.session().id, phase = %failed_phase, "Session resumed with manual payload");
        if self.session().phase == SessionPhase::Completed {
            self.retire()?;
        }
        Ok(output)
    }

    fn final_output(&self) -> Result<PhaseOutput, OrchestratorError> {
        self.session()
            .latest_output(AgentKind::Editing)
            .cloned()
            .ok_or_else(|| OrchestratorError::InvalidTransition {
                from: self.session().phase,
                message: "completed session has no editing output".to_string(),
            })
    }

    /// Persists the final plan as a draft and retires the session.
    fn retire(&mut self) -> Result<(), OrchestratorError> {
        let session = self.session();
        let final_plan = match session.latest_output(AgentKind::Editing).map(|o| &o.payload) {
            Some(PhasePayload::Editing { plan, .. }) => plan.clone(),
            _ => {
                return Err(OrchestratorError::InvalidTransition {
                    from: session.phase,
                    message: "completed session has no final plan".to_string(),
                })
            }
        };
        let record = PlanRecord::draft(
            &session.context.team.team_id,
            ConversationBlob {
                exchanges: session.exchanges.clone(),
                final_plan,
            },
        );
        self.services.plans.put(&record)?;
        self.apply(SessionCommand::Retire { plan_id: record.id })?;
        tracing::info!(session_id = %self.session().id, plan_id = %record.id, "Session retired");
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/actor_tests.rs"]
mod tests;
