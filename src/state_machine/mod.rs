//! Centralized state machine for planning sessions.
//!
//! This module is the only place session state changes. The machine owns the
//! `Session`, validates commands, emits events, and broadcasts snapshots to
//! subscribers via a watch channel. A rejected command leaves the session
//! untouched.

mod commands;
mod events;
mod snapshot;

pub use commands::SessionCommand;
pub use events::SessionEvent;
pub use snapshot::SessionSnapshot;

use crate::domain::errors::OrchestratorError;
use crate::domain::failure::{RecordedError, SessionFailure, MAX_ERROR_HISTORY};
use crate::domain::output::PhaseOutput;
use crate::domain::phase::{ReviewGate, SessionPhase};
use crate::domain::session::{
    ConversationExchange, GateState, PauseReason, PendingAutoContinue, Session, SessionPatch,
};
use crate::domain::types::{ItemId, TimestampUtc};
use crate::review::{transform_for_review, ReviewData, ReviewItem};
use crate::skip::{forced_review, should_auto_advance, ReEnableInputs, ReviewReason};
use crate::structured_logger::StructuredLogger;
use std::sync::Arc;
use tokio::sync::watch;

type ApplyResult = Result<Vec<SessionEvent>, OrchestratorError>;

pub struct SessionStateMachine {
    session: Session,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    session_tx: watch::Sender<Session>,
    logger: Arc<StructuredLogger>,
    seq: u64,
}

impl SessionStateMachine {
    /// Creates a machine owning `session`, plus a receiver for its snapshots.
    pub fn new(
        session: Session,
        logger: Arc<StructuredLogger>,
    ) -> (Self, watch::Receiver<SessionSnapshot>) {
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::from(&session));
        let (session_tx, _) = watch::channel(session.clone());
        let machine = Self {
            session,
            snapshot_tx,
            session_tx,
            logger,
            seq: 0,
        };
        (machine, snapshot_rx)
    }

    /// All mutations go through this single method.
    /// Returns the emitted events; broadcasts a snapshot on success.
    pub fn apply(&mut self, command: SessionCommand) -> ApplyResult {
        self.seq += 1;
        self.logger.log_command(self.seq, &command);

        let events = match self.apply_internal(command) {
            Ok(events) => events,
            Err(err) => {
                self.logger.log_rejected(self.seq, &err.to_string());
                return Err(err);
            }
        };

        for event in &events {
            self.logger.log_event(self.seq, event);
        }

        if !events.is_empty() {
            self.session.updated_at = TimestampUtc::now();
            self.session_tx.send_replace(self.session.clone());
        }
        self.snapshot_tx
            .send_replace(SessionSnapshot::from(&self.session));
        Ok(events)
    }

    /// Current session (for persistence and queries).
    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Receiver for the full session, updated after every accepted command.
    pub fn watch_session(&self) -> watch::Receiver<Session> {
        self.session_tx.subscribe()
    }

    pub fn logger(&self) -> &Arc<StructuredLogger> {
        &self.logger
    }

    fn apply_internal(&mut self, command: SessionCommand) -> ApplyResult {
        match command {
            SessionCommand::RecordOutput { output, exchange } => {
                self.ensure_runnable()?;
                if output.phase != self.session.phase {
                    return Err(self.invalid(format!(
                        "output for {} does not match the current sub-state",
                        output.phase
                    )));
                }
                Ok(self.accept_output(output, exchange))
            }

            SessionCommand::RecordFailure { exchange, failure } => {
                self.ensure_runnable()?;
                Ok(self.fail(exchange, failure))
            }

            SessionCommand::ResumeWithPayload { output, exchange } => {
                self.resume(output, exchange)
            }

            SessionCommand::UpdateState { patch } => self.update_state(patch),

            SessionCommand::AutoContinueFired { generation } => {
                Ok(self.auto_continue_fired(generation))
            }

            SessionCommand::RecordError { message } => self.record_error(message),

            SessionCommand::RequestReview => self.request_review(),

            SessionCommand::Abort => Ok(self.abort()),

            SessionCommand::Retire { plan_id } => {
                if self.session.phase != SessionPhase::Completed {
                    return Err(self.invalid("only completed sessions can be retired"));
                }
                if self.session.retired {
                    return Ok(vec![]);
                }
                self.session.retired = true;
                self.session.plan_id = Some(plan_id);
                Ok(vec![SessionEvent::SessionRetired { plan_id }])
            }
        }
    }

    fn invalid(&self, message: impl Into<String>) -> OrchestratorError {
        OrchestratorError::InvalidTransition {
            from: self.session.phase,
            message: message.into(),
        }
    }

    /// An agent may run: not terminal and not halted at a gate.
    fn ensure_runnable(&self) -> Result<(), OrchestratorError> {
        if self.session.is_terminal() {
            return Err(self.invalid("session is terminal"));
        }
        if let Some(gate) = self.session.paused_gate() {
            return Err(OrchestratorError::AwaitingReview { gate });
        }
        Ok(())
    }

    fn move_to(&mut self, to: SessionPhase, events: &mut Vec<SessionEvent>) {
        let from = self.session.phase;
        if from == to {
            return;
        }
        debug_assert!(
            from == SessionPhase::Failed || from.can_transition_to(to),
            "illegal transition {} -> {}",
            from,
            to
        );
        self.session.phase = to;
        events.push(SessionEvent::PhaseChanged { from, to });
    }

    /// Stores the output and applies the transition rule.
    fn accept_output(
        &mut self,
        output: PhaseOutput,
        exchange: ConversationExchange,
    ) -> Vec<SessionEvent> {
        let mut events = vec![SessionEvent::OutputRecorded {
            phase: output.phase,
            agent: output.agent,
            task_count: output.metrics.task_count,
            warnings: output.warnings.len(),
        }];
        self.session.exchanges.push(exchange);
        self.session.outputs.push(output.clone());

        let phase = output.phase;
        if phase == SessionPhase::EditingFinalizing {
            self.move_to(SessionPhase::Completed, &mut events);
            events.push(SessionEvent::SessionCompleted);
            return events;
        }

        match phase.gate_after() {
            Some(gate) => self.reach_gate(gate, &output, &mut events),
            None => {
                if let Some(next) = phase.next() {
                    self.move_to(next, &mut events);
                }
                if should_auto_advance(&output, &self.session.preferences) {
                    events.push(SessionEvent::OutputApproved { phase });
                }
            }
        }
        events
    }

    fn reach_gate(&mut self, gate: ReviewGate, output: &PhaseOutput, events: &mut Vec<SessionEvent>) {
        let review = transform_for_review(output);
        let inputs = ReEnableInputs {
            errors_in_phase: self.session.errors_for(gate.agent()),
            task_count: output.metrics.task_count,
            previous_task_count: self.session.context.previous_week.len(),
            run_number: self.session.context.run_number,
            review_requested: self.session.review_requested,
        };
        self.session.review_requested = false;

        let prefs = &self.session.preferences;
        let approved = should_auto_advance(output, prefs);
        let forced = forced_review(&inputs, &prefs.re_enable);
        let auto_continue = prefs.auto_continue.clone();

        let reason = match forced {
            Some(reason) => Some(PauseReason::Forced { reason }),
            None if !approved => Some(PauseReason::ConditionsNotMet),
            None if auto_continue.enabled
                && auto_continue.pause_on_warnings
                && output.has_warnings() =>
            {
                Some(PauseReason::WarningsPresent)
            }
            None if auto_continue.enabled => Some(PauseReason::AutoContinue),
            None => None,
        };

        let Some(reason) = reason else {
            self.commit_gate(gate, review, true, events);
            events.push(SessionEvent::OutputApproved { phase: output.phase });
            return;
        };

        let timer = if reason == PauseReason::AutoContinue {
            self.session.timer_generation += 1;
            Some(PendingAutoContinue {
                generation: self.session.timer_generation,
                delay_secs: auto_continue.delay_seconds,
                armed_at: TimestampUtc::now(),
            })
        } else {
            None
        };

        self.move_to(gate.paused_phase(), events);
        events.push(SessionEvent::GatePaused {
            gate,
            reason: reason.clone(),
        });
        if let Some(timer) = &timer {
            events.push(SessionEvent::TimerArmed {
                gate,
                generation: timer.generation,
                delay_secs: timer.delay_secs,
            });
        }
        tracing::info!(
            session_id = %self.session.id,
            gate = %gate,
            ?reason,
            "Session paused at review gate"
        );
        self.session.gate = Some(GateState {
            gate,
            review,
            reason,
            auto_continue: timer,
        });
    }

    /// Stores the reviewed data and moves past the gate.
    fn commit_gate(
        &mut self,
        gate: ReviewGate,
        mut review: ReviewData,
        automatic: bool,
        events: &mut Vec<SessionEvent>,
    ) {
        review.normalize();
        match gate {
            ReviewGate::Assignment => {
                // The reviewed assignment becomes the candidate set for selection.
                self.session.context.candidates = review
                    .selected_tasks
                    .iter()
                    .chain(review.available_tasks.iter())
                    .map(ReviewItem::to_task)
                    .collect();
                self.session.reviewed_assignment = Some(review);
            }
            ReviewGate::Selection => self.session.reviewed_selection = Some(review),
        }
        self.session.gate = None;
        events.push(SessionEvent::GateCommitted { gate, automatic });
        self.move_to(gate.resumes_at(), events);
    }

    /// Cancels a pending timer and records why the gate now needs a human.
    fn force_review(&mut self, reason: ReviewReason, events: &mut Vec<SessionEvent>) {
        let Some(state) = self.session.gate.as_mut() else {
            return;
        };
        let Some(timer) = state.auto_continue.take() else {
            return;
        };
        state.reason = PauseReason::Forced { reason };
        events.push(SessionEvent::TimerCancelled {
            generation: timer.generation,
        });
        events.push(SessionEvent::GatePaused {
            gate: state.gate,
            reason: state.reason.clone(),
        });
        tracing::info!(
            session_id = %self.session.id,
            generation = timer.generation,
            "Auto-continue cancelled"
        );
    }

    fn fail(&mut self, exchange: ConversationExchange, failure: SessionFailure) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        self.session.exchanges.push(exchange);
        self.push_error(failure.message.clone(), &mut events);
        let kind = failure.kind.clone();
        tracing::warn!(
            session_id = %self.session.id,
            phase = %failure.phase,
            kind = ?kind,
            "Session failed"
        );
        self.session.failure = Some(failure);
        self.move_to(SessionPhase::Failed, &mut events);
        events.push(SessionEvent::SessionFailed { kind });
        events
    }

    fn resume(&mut self, output: PhaseOutput, exchange: ConversationExchange) -> ApplyResult {
        if self.session.phase != SessionPhase::Failed {
            return Err(self.invalid("only failed sessions can be resumed"));
        }
        let failed_phase = match &self.session.failure {
            Some(failure) if failure.is_agent_failure() => failure.phase,
            Some(_) => return Err(self.invalid("an aborted session cannot be resumed")),
            None => return Err(self.invalid("session has no failure record")),
        };
        if output.phase != failed_phase {
            return Err(self.invalid(format!(
                "payload is for {} but the session failed in {}",
                output.phase, failed_phase
            )));
        }

        let mut events = vec![SessionEvent::SessionResumed {
            phase: failed_phase,
        }];
        self.session.failure = None;
        self.move_to(failed_phase, &mut events);
        events.extend(self.accept_output(output, exchange));
        Ok(events)
    }

    fn update_state(&mut self, patch: SessionPatch) -> ApplyResult {
        if self.session.is_terminal() {
            return Err(self.invalid("session is terminal"));
        }

        let commits = patch.commits();
        if commits.len() > 1 {
            return Err(self.invalid("a patch may commit one gate at a time"));
        }
        let commit = match commits.first() {
            Some((gate, review)) => {
                let current = self.session.gate.as_ref();
                let Some(state) = current.filter(|state| state.gate == *gate) else {
                    return Err(OrchestratorError::GateMismatch {
                        expected: *gate,
                        actual: self.session.paused_gate(),
                    });
                };
                let unknown: Vec<ItemId> = review
                    .selected_tasks
                    .iter()
                    .chain(review.available_tasks.iter())
                    .filter(|item| !state.review.contains(&item.id))
                    .map(|item| item.id.clone())
                    .collect();
                if !unknown.is_empty() {
                    return Err(OrchestratorError::UnknownReference { ids: unknown });
                }
                if let Some(reason) = review.commit_problem() {
                    return Err(OrchestratorError::InvalidAdjustment { reason });
                }
                Some((*gate, (*review).clone()))
            }
            None => None,
        };

        let mut events = Vec::new();
        if !patch.notes.is_empty() {
            let count = patch.notes.len();
            self.session.context.notes.extend(patch.notes);
            events.push(SessionEvent::NotesAdded { count });
        }
        if let Some((gate, review)) = commit {
            if let Some(timer) = self.session.pending_timer() {
                events.push(SessionEvent::TimerCancelled {
                    generation: timer.generation,
                });
            }
            self.commit_gate(gate, review, false, &mut events);
        }
        Ok(events)
    }

    fn auto_continue_fired(&mut self, generation: u64) -> Vec<SessionEvent> {
        let live = self
            .session
            .pending_timer()
            .is_some_and(|timer| timer.generation == generation);
        if !live {
            tracing::debug!(
                session_id = %self.session.id,
                generation,
                "Ignoring stale auto-continue timer"
            );
            return vec![];
        }
        let mut events = Vec::new();
        if let Some(state) = self.session.gate.take() {
            self.commit_gate(state.gate, state.review, true, &mut events);
        }
        events
    }

    fn push_error(&mut self, message: String, events: &mut Vec<SessionEvent>) {
        self.session.errors.push(RecordedError {
            phase: self.session.phase,
            message: message.clone(),
            at: TimestampUtc::now(),
        });
        if self.session.errors.len() > MAX_ERROR_HISTORY {
            let excess = self.session.errors.len() - MAX_ERROR_HISTORY;
            self.session.errors.drain(..excess);
        }
        events.push(SessionEvent::ErrorRecorded { message });
    }

    fn record_error(&mut self, message: String) -> ApplyResult {
        if self.session.is_terminal() {
            return Err(self.invalid("session is terminal"));
        }
        let mut events = Vec::new();
        self.push_error(message, &mut events);
        self.force_review(ReviewReason::ErrorRecorded, &mut events);
        Ok(events)
    }

    fn request_review(&mut self) -> ApplyResult {
        if self.session.is_terminal() {
            return Err(self.invalid("session is terminal"));
        }
        let mut events = vec![SessionEvent::ReviewRequested];
        if self.session.gate.is_some() {
            self.force_review(ReviewReason::OnDemand, &mut events);
        } else {
            self.session.review_requested = true;
        }
        Ok(events)
    }

    /// Idempotent: terminal sessions are left as they are.
    fn abort(&mut self) -> Vec<SessionEvent> {
        if self.session.is_terminal() {
            return vec![];
        }
        let mut events = Vec::new();
        if let Some(timer) = self.session.gate.take().and_then(|g| g.auto_continue) {
            events.push(SessionEvent::TimerCancelled {
                generation: timer.generation,
            });
        }
        let failure = SessionFailure::aborted(self.session.phase);
        let kind = failure.kind.clone();
        self.session.failure = Some(failure);
        self.move_to(SessionPhase::Failed, &mut events);
        events.push(SessionEvent::SessionFailed { kind });
        events
    }
}

#[cfg(test)]
mod tests;
