//! Tests for the session state machine.

use super::*;
use crate::domain::context::fixtures::{context, task};
use crate::domain::failure::{AttemptFailure, AttemptRecord, SessionFailureKind};
use crate::domain::errors::AgentError;
use crate::domain::output::PhasePayload;
use crate::domain::plan::{PlanDay, PlanTask, VibePlanFile};
use crate::domain::session::ExchangeOutcome;
use crate::domain::types::{AgentKind, SessionId, TaskItem};
use crate::preferences::SkipPreferences;
use crate::review::{apply_adjustments, Adjustment};
use std::collections::BTreeMap;
use tempfile::TempDir;

fn machine_with(prefs: SkipPreferences) -> (SessionStateMachine, watch::Receiver<SessionSnapshot>) {
    let session = Session::new(SessionId::new(), context(), prefs);
    let logger = Arc::new(StructuredLogger::disabled("test-session"));
    SessionStateMachine::new(session, logger)
}

fn machine() -> (SessionStateMachine, watch::Receiver<SessionSnapshot>) {
    machine_with(SkipPreferences::default())
}

fn assigned(count: usize) -> Vec<TaskItem> {
    (1..=count)
        .map(|i| {
            let mut t = task(&format!("T{}", i), 3, 2, 4.0);
            t.assignee = Some(if i % 2 == 0 { "bo" } else { "ana" }.to_string());
            t
        })
        .collect()
}

fn organizing(phase: SessionPhase, count: usize) -> PhaseOutput {
    PhaseOutput::new(
        phase,
        PhasePayload::Organizing {
            summary: "proposal".to_string(),
            tasks: assigned(count),
            backlog: vec![task("T10", 1, 1, 2.0)],
            questions: Vec::new(),
        },
        Vec::new(),
        40.0,
    )
}

fn selection(phase: SessionPhase, count: usize, warnings: Vec<String>) -> PhaseOutput {
    PhaseOutput::new(
        phase,
        PhasePayload::Selection {
            selected: assigned(count),
            deferred: vec![task("T10", 1, 1, 2.0)],
            rationale: "fits".to_string(),
        },
        warnings,
        40.0,
    )
}

fn editing(phase: SessionPhase) -> PhaseOutput {
    let mut days = BTreeMap::new();
    days.insert(
        PlanDay::Monday,
        vec![PlanTask {
            description: "task T1".to_string(),
            importance: 3,
            urgency: 2,
            estimate_hours: Some(4.0),
        }],
    );
    let mut assignments = BTreeMap::new();
    assignments.insert("ana".to_string(), days);
    PhaseOutput::new(
        phase,
        PhasePayload::Editing {
            plan: VibePlanFile { assignments },
            summary: "plan".to_string(),
        },
        Vec::new(),
        40.0,
    )
}

fn output_for(phase: SessionPhase) -> PhaseOutput {
    match phase.agent() {
        Some(AgentKind::Organizing) => organizing(phase, 8),
        Some(AgentKind::Selection) => selection(phase, 8, Vec::new()),
        _ => editing(phase),
    }
}

fn exchange(phase: SessionPhase) -> ConversationExchange {
    ConversationExchange::new(
        phase.agent().unwrap_or(AgentKind::Editing),
        phase,
        format!("prompt for {}", phase),
        ExchangeOutcome::Response {
            response: "{}".to_string(),
        },
    )
}

fn record(machine: &mut SessionStateMachine, output: PhaseOutput) -> ApplyResult {
    let exchange = exchange(output.phase);
    machine.apply(SessionCommand::RecordOutput { output, exchange })
}

/// Records outputs until the session halts at a gate or reaches editing.
fn run_until_paused(machine: &mut SessionStateMachine) {
    while machine.session().gate.is_none()
        && !machine.session().is_terminal()
        && machine.session().phase.agent() != Some(AgentKind::Editing)
    {
        let phase = machine.session().phase;
        record(machine, output_for(phase)).unwrap();
    }
}

fn approving_prefs() -> SkipPreferences {
    let mut prefs = SkipPreferences::default();
    prefs.skip_assignment_review = true;
    prefs.skip_selection_review = true;
    prefs
}

fn has_event(events: &[SessionEvent], wanted: impl Fn(&SessionEvent) -> bool) -> bool {
    events.iter().any(wanted)
}

#[test]
fn test_default_preferences_pause_at_assignment_gate() {
    let (mut machine, snapshot_rx) = machine();

    let events = record(&mut machine, output_for(SessionPhase::OrganizingDialogue)).unwrap();
    assert!(has_event(&events, |e| matches!(
        e,
        SessionEvent::PhaseChanged {
            from: SessionPhase::OrganizingDialogue,
            to: SessionPhase::OrganizingProposing
        }
    )));
    // Toggles are off by default, so nothing is approved.
    assert!(!has_event(&events, |e| matches!(e, SessionEvent::OutputApproved { .. })));

    run_until_paused(&mut machine);
    let session = machine.session();
    assert_eq!(session.phase, SessionPhase::OrganizingAssignment);
    assert_eq!(session.paused_gate(), Some(ReviewGate::Assignment));
    assert_eq!(
        session.gate.as_ref().map(|g| g.reason.clone()),
        Some(PauseReason::ConditionsNotMet)
    );
    assert_eq!(session.outputs.len(), 4);
    assert_eq!(session.exchanges.len(), 4);

    let snapshot = snapshot_rx.borrow();
    assert!(snapshot.is_paused());
    assert_eq!(snapshot.output_count, 4);
}

#[test]
fn test_commit_assignment_moves_to_selection() {
    let (mut machine, _rx) = machine();
    run_until_paused(&mut machine);

    let review = machine.session().gate.as_ref().unwrap().review.clone();
    let adjusted = apply_adjustments(&review, &Adjustment::manual().remove("T1")).unwrap();
    let events = machine
        .apply(SessionCommand::UpdateState {
            patch: SessionPatch::commit(ReviewGate::Assignment, adjusted.clone()),
        })
        .unwrap();

    assert!(has_event(&events, |e| matches!(
        e,
        SessionEvent::GateCommitted {
            gate: ReviewGate::Assignment,
            automatic: false
        }
    )));
    let session = machine.session();
    assert_eq!(session.phase, SessionPhase::SelectionAnalyzing);
    assert!(session.gate.is_none());
    assert_eq!(session.reviewed_assignment.as_ref(), Some(&adjusted));
    // Selected and available items of the reviewed assignment become the candidates.
    assert_eq!(session.context.candidates.len(), 9);
}

#[test]
fn test_commit_at_wrong_gate_is_gate_mismatch() {
    let (mut machine, _rx) = machine();
    run_until_paused(&mut machine);
    let review = machine.session().gate.as_ref().unwrap().review.clone();
    let before = machine.session().clone();

    let err = machine
        .apply(SessionCommand::UpdateState {
            patch: SessionPatch::commit(ReviewGate::Selection, review),
        })
        .unwrap_err();

    assert!(matches!(
        err,
        OrchestratorError::GateMismatch {
            expected: ReviewGate::Selection,
            actual: Some(ReviewGate::Assignment)
        }
    ));
    assert_eq!(machine.session(), &before);
}

#[test]
fn test_commit_when_not_paused_is_gate_mismatch() {
    let (mut machine, _rx) = machine();
    let review = transform_for_review(&output_for(SessionPhase::OrganizingAssignment));
    let err = machine
        .apply(SessionCommand::UpdateState {
            patch: SessionPatch::commit(ReviewGate::Assignment, review),
        })
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::GateMismatch { actual: None, .. }));
}

#[test]
fn test_commit_with_unknown_item_is_rejected() {
    let (mut machine, _rx) = machine();
    run_until_paused(&mut machine);
    let mut review = machine.session().gate.as_ref().unwrap().review.clone();
    let mut stranger = review.selected_tasks[0].clone();
    stranger.id = ItemId::from("T99");
    review.selected_tasks.push(stranger);

    let err = machine
        .apply(SessionCommand::UpdateState {
            patch: SessionPatch::commit(ReviewGate::Assignment, review),
        })
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::UnknownReference { ref ids } if ids == &vec![ItemId::from("T99")]));
    assert_eq!(machine.session().paused_gate(), Some(ReviewGate::Assignment));
}

#[test]
fn test_commit_with_duplicated_item_is_rejected() {
    let (mut machine, _rx) = machine();
    run_until_paused(&mut machine);
    let mut review = machine.session().gate.as_ref().unwrap().review.clone();
    let twin = review.selected_tasks[0].clone();
    review.available_tasks.push(twin);
    let before = machine.session().clone();

    let err = machine
        .apply(SessionCommand::UpdateState {
            patch: SessionPatch::commit(ReviewGate::Assignment, review),
        })
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::InvalidAdjustment { ref reason } if reason.contains("more than once")));
    assert_eq!(machine.session(), &before);
}

#[test]
fn test_notes_merge_without_a_gate() {
    let (mut machine, _rx) = machine();
    let events = machine
        .apply(SessionCommand::UpdateState {
            patch: SessionPatch {
                notes: vec!["ana is out friday".to_string()],
                ..SessionPatch::default()
            },
        })
        .unwrap();
    assert_eq!(events, vec![SessionEvent::NotesAdded { count: 1 }]);
    assert_eq!(machine.session().context.notes, vec!["ana is out friday".to_string()]);
}

#[test]
fn test_approved_output_chains_and_passes_gate_without_auto_continue() {
    let (mut machine, _rx) = machine_with(approving_prefs());

    let events = record(&mut machine, output_for(SessionPhase::OrganizingDialogue)).unwrap();
    assert!(has_event(&events, |e| matches!(
        e,
        SessionEvent::OutputApproved {
            phase: SessionPhase::OrganizingDialogue
        }
    )));

    for phase in [
        SessionPhase::OrganizingProposing,
        SessionPhase::OrganizingExecution,
    ] {
        record(&mut machine, output_for(phase)).unwrap();
    }
    let events = record(&mut machine, output_for(SessionPhase::OrganizingAssignment)).unwrap();

    assert!(has_event(&events, |e| matches!(
        e,
        SessionEvent::GateCommitted {
            gate: ReviewGate::Assignment,
            automatic: true
        }
    )));
    assert!(has_event(&events, |e| matches!(e, SessionEvent::OutputApproved { .. })));
    assert_eq!(machine.session().phase, SessionPhase::SelectionAnalyzing);
    assert!(machine.session().reviewed_assignment.is_some());
}

#[test]
fn test_selection_gate_pauses_in_review_selection() {
    let (mut machine, _rx) = machine_with(approving_prefs());
    run_until_paused(&mut machine);
    assert_eq!(machine.session().phase, SessionPhase::EditingCreating);

    let mut prefs = SkipPreferences::default();
    prefs.skip_assignment_review = true;
    let (mut machine, _rx) = machine_with(prefs);
    run_until_paused(&mut machine);
    assert_eq!(machine.session().phase, SessionPhase::ReviewSelection);
    assert_eq!(machine.session().paused_gate(), Some(ReviewGate::Selection));
}

#[test]
fn test_auto_continue_arms_timer_and_ignores_stale_generation() {
    let mut prefs = approving_prefs();
    prefs.auto_continue.enabled = true;
    prefs.auto_continue.delay_seconds = 15;
    let (mut machine, _rx) = machine_with(prefs);

    let mut armed = None;
    while machine.session().gate.is_none() {
        let phase = machine.session().phase;
        let events = record(&mut machine, output_for(phase)).unwrap();
        for event in events {
            if let SessionEvent::TimerArmed {
                generation,
                delay_secs,
                ..
            } = event
            {
                assert_eq!(delay_secs, 15);
                armed = Some(generation);
            }
        }
    }
    let generation = armed.unwrap();
    assert_eq!(
        machine.session().gate.as_ref().unwrap().reason,
        PauseReason::AutoContinue
    );

    let events = machine
        .apply(SessionCommand::AutoContinueFired {
            generation: generation + 1,
        })
        .unwrap();
    assert!(events.is_empty());
    assert_eq!(machine.session().paused_gate(), Some(ReviewGate::Assignment));

    let events = machine
        .apply(SessionCommand::AutoContinueFired { generation })
        .unwrap();
    assert!(has_event(&events, |e| matches!(
        e,
        SessionEvent::GateCommitted { automatic: true, .. }
    )));
    assert_eq!(machine.session().phase, SessionPhase::SelectionAnalyzing);
}

#[test]
fn test_record_error_cancels_pending_timer() {
    let mut prefs = approving_prefs();
    prefs.auto_continue.enabled = true;
    let (mut machine, _rx) = machine_with(prefs);
    run_until_paused(&mut machine);
    let generation = machine.session().pending_timer().unwrap().generation;

    let events = machine
        .apply(SessionCommand::RecordError {
            message: "calendar sync failed".to_string(),
        })
        .unwrap();

    assert!(has_event(&events, |e| matches!(
        e,
        SessionEvent::TimerCancelled { generation: g } if *g == generation
    )));
    let gate = machine.session().gate.as_ref().unwrap();
    assert!(gate.auto_continue.is_none());
    assert_eq!(
        gate.reason,
        PauseReason::Forced {
            reason: ReviewReason::ErrorRecorded
        }
    );

    // The timer task may still deliver its message; it must do nothing.
    let events = machine
        .apply(SessionCommand::AutoContinueFired { generation })
        .unwrap();
    assert!(events.is_empty());
    assert_eq!(machine.session().paused_gate(), Some(ReviewGate::Assignment));
}

#[test]
fn test_warnings_hold_approved_output_when_configured() {
    let mut prefs = approving_prefs();
    prefs.skip_assignment_review = false;
    prefs.selection_conditions.no_warnings = false;
    prefs.auto_continue.enabled = true;
    let (mut machine, _rx) = machine_with(prefs);
    run_until_paused(&mut machine);
    let review = machine.session().gate.as_ref().unwrap().review.clone();
    machine
        .apply(SessionCommand::UpdateState {
            patch: SessionPatch::commit(ReviewGate::Assignment, review),
        })
        .unwrap();

    for phase in [
        SessionPhase::SelectionAnalyzing,
        SessionPhase::SelectionPrioritizing,
        SessionPhase::SelectionOptimizing,
    ] {
        record(&mut machine, output_for(phase)).unwrap();
    }
    let events = record(
        &mut machine,
        selection(
            SessionPhase::SelectionSelecting,
            8,
            vec!["T3 depends on T9".to_string()],
        ),
    )
    .unwrap();

    assert!(!has_event(&events, |e| matches!(e, SessionEvent::TimerArmed { .. })));
    assert_eq!(
        machine.session().gate.as_ref().unwrap().reason,
        PauseReason::WarningsPresent
    );
}

#[test]
fn test_every_nth_run_forces_review() {
    let mut prefs = approving_prefs();
    prefs.re_enable.every_nth_run = Some(3);
    let session = {
        let mut ctx = context();
        ctx.run_number = 6;
        Session::new(SessionId::new(), ctx, prefs)
    };
    let (mut machine, _rx) =
        SessionStateMachine::new(session, Arc::new(StructuredLogger::disabled("nth")));
    run_until_paused(&mut machine);

    assert_eq!(
        machine.session().gate.as_ref().unwrap().reason,
        PauseReason::Forced {
            reason: ReviewReason::NthRun {
                run_number: 6,
                interval: 3
            }
        }
    );
}

#[test]
fn test_review_requested_before_gate_forces_pause() {
    let (mut machine, _rx) = machine_with(approving_prefs());
    record(&mut machine, output_for(SessionPhase::OrganizingDialogue)).unwrap();

    let events = machine.apply(SessionCommand::RequestReview).unwrap();
    assert_eq!(events, vec![SessionEvent::ReviewRequested]);
    assert!(machine.session().review_requested);

    run_until_paused(&mut machine);
    let session = machine.session();
    assert!(!session.review_requested);
    assert_eq!(
        session.gate.as_ref().unwrap().reason,
        PauseReason::Forced {
            reason: ReviewReason::OnDemand
        }
    );
}

#[test]
fn test_output_for_other_sub_state_is_rejected() {
    let (mut machine, _rx) = machine();
    let err = record(&mut machine, output_for(SessionPhase::SelectionAnalyzing)).unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidTransition { .. }));
    assert!(machine.session().outputs.is_empty());
}

#[test]
fn test_output_while_paused_is_awaiting_review() {
    let (mut machine, _rx) = machine();
    run_until_paused(&mut machine);
    let err = record(&mut machine, output_for(SessionPhase::OrganizingAssignment)).unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::AwaitingReview {
            gate: ReviewGate::Assignment
        }
    ));
}

#[test]
fn test_abort_is_idempotent_and_cancels_timer() {
    let mut prefs = approving_prefs();
    prefs.auto_continue.enabled = true;
    let (mut machine, _rx) = machine_with(prefs);
    run_until_paused(&mut machine);

    let events = machine.apply(SessionCommand::Abort).unwrap();
    assert!(has_event(&events, |e| matches!(e, SessionEvent::TimerCancelled { .. })));
    assert!(has_event(&events, |e| matches!(
        e,
        SessionEvent::SessionFailed {
            kind: SessionFailureKind::Aborted
        }
    )));
    assert_eq!(machine.session().phase, SessionPhase::Failed);
    assert!(machine.session().gate.is_none());
    // Prior outputs survive.
    assert_eq!(machine.session().outputs.len(), 4);

    assert!(machine.apply(SessionCommand::Abort).unwrap().is_empty());
    let err = record(&mut machine, output_for(SessionPhase::OrganizingAssignment)).unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidTransition { .. }));
}

#[test]
fn test_failure_then_resume_with_payload() {
    let (mut machine, _rx) = machine();
    record(&mut machine, output_for(SessionPhase::OrganizingDialogue)).unwrap();

    let attempts = vec![
        AttemptRecord::new(1, AttemptFailure::Timeout),
        AttemptRecord::new(2, AttemptFailure::Timeout),
        AttemptRecord::new(3, AttemptFailure::Timeout),
    ];
    let err = AgentError::Timeout {
        agent: AgentKind::Organizing,
        attempts: attempts.clone(),
    };
    let failure = SessionFailure::from_agent(SessionPhase::OrganizingProposing, &err).unwrap();
    let failed_exchange = ConversationExchange::new(
        AgentKind::Organizing,
        SessionPhase::OrganizingProposing,
        "prompt".to_string(),
        ExchangeOutcome::Failed {
            message: err.to_string(),
            attempts,
        },
    );
    machine
        .apply(SessionCommand::RecordFailure {
            exchange: failed_exchange,
            failure,
        })
        .unwrap();

    let session = machine.session();
    assert_eq!(session.phase, SessionPhase::Failed);
    assert_eq!(session.errors.len(), 1);
    assert_eq!(session.outputs.len(), 1);
    assert_eq!(
        session.failure.as_ref().map(|f| f.attempts.len()),
        Some(3)
    );

    // Payload for the wrong sub-state is rejected.
    let wrong = output_for(SessionPhase::OrganizingExecution);
    let err = machine
        .apply(SessionCommand::ResumeWithPayload {
            exchange: exchange(wrong.phase),
            output: wrong,
        })
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidTransition { .. }));

    let output = output_for(SessionPhase::OrganizingProposing);
    let events = machine
        .apply(SessionCommand::ResumeWithPayload {
            exchange: exchange(output.phase),
            output,
        })
        .unwrap();
    assert_eq!(
        events.first(),
        Some(&SessionEvent::SessionResumed {
            phase: SessionPhase::OrganizingProposing
        })
    );
    let session = machine.session();
    assert_eq!(session.phase, SessionPhase::OrganizingExecution);
    assert!(session.failure.is_none());
    assert_eq!(session.exchanges.len(), 3);
}

#[test]
fn test_aborted_session_cannot_be_resumed() {
    let (mut machine, _rx) = machine();
    machine.apply(SessionCommand::Abort).unwrap();
    let output = output_for(SessionPhase::OrganizingDialogue);
    let err = machine
        .apply(SessionCommand::ResumeWithPayload {
            exchange: exchange(output.phase),
            output,
        })
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidTransition { .. }));
}

#[test]
fn test_full_pipeline_completes_and_retires() {
    let (mut machine, snapshot_rx) = machine_with(approving_prefs());
    run_until_paused(&mut machine);
    assert_eq!(machine.session().phase, SessionPhase::EditingCreating);

    let mut completed = false;
    while !machine.session().is_terminal() {
        let phase = machine.session().phase;
        let events = record(&mut machine, output_for(phase)).unwrap();
        // Editing never auto-advances.
        assert!(!has_event(&events, |e| matches!(e, SessionEvent::OutputApproved { .. })));
        completed |= has_event(&events, |e| matches!(e, SessionEvent::SessionCompleted));
    }
    assert!(completed);
    assert_eq!(machine.session().phase, SessionPhase::Completed);
    assert_eq!(snapshot_rx.borrow().progress_percent, 100);

    let plan_id = uuid::Uuid::new_v4();
    let events = machine.apply(SessionCommand::Retire { plan_id }).unwrap();
    assert_eq!(events, vec![SessionEvent::SessionRetired { plan_id }]);
    assert!(machine.session().retired);
    assert!(machine
        .apply(SessionCommand::Retire { plan_id })
        .unwrap()
        .is_empty());
}

#[test]
fn test_retire_requires_completion() {
    let (mut machine, _rx) = machine();
    let err = machine
        .apply(SessionCommand::Retire {
            plan_id: uuid::Uuid::new_v4(),
        })
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidTransition { .. }));
}

#[test]
fn test_error_history_is_capped() {
    let (mut machine, _rx) = machine();
    for i in 0..(MAX_ERROR_HISTORY + 5) {
        machine
            .apply(SessionCommand::RecordError {
                message: format!("error {}", i),
            })
            .unwrap();
    }
    let errors = &machine.session().errors;
    assert_eq!(errors.len(), MAX_ERROR_HISTORY);
    assert_eq!(errors[0].message, "error 5");
}

#[test]
fn test_commands_and_events_are_logged() {
    let temp_dir = TempDir::new().unwrap();
    let logger = Arc::new(StructuredLogger::new("logged", temp_dir.path()).unwrap());
    let session = Session::new(SessionId::new(), context(), SkipPreferences::default());
    let (mut machine, _rx) = SessionStateMachine::new(session, logger.clone());

    record(&mut machine, output_for(SessionPhase::OrganizingDialogue)).unwrap();
    let _ = record(&mut machine, output_for(SessionPhase::EditingCreating));

    let content = std::fs::read_to_string(logger.path().unwrap()).unwrap();
    let lines: Vec<serde_json::Value> = content
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert!(lines
        .iter()
        .any(|l| l["event"]["command"] == "RecordOutput"));
    assert!(lines
        .iter()
        .any(|l| l["event"]["event"]["type"] == "PhaseChanged"));
    assert!(lines
        .iter()
        .any(|l| l["event"]["type"] == "CommandRejected"));
}
