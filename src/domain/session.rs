//! The session record owned by the session state machine.

use crate::domain::context::SessionContext;
use crate::domain::failure::{AttemptRecord, RecordedError, SessionFailure};
use crate::domain::output::PhaseOutput;
use crate::domain::phase::{ReviewGate, SessionPhase};
use crate::domain::types::{AgentKind, SessionId, TimestampUtc};
use crate::preferences::SkipPreferences;
use crate::review::ReviewData;
use crate::skip::ReviewReason;
use serde::{Deserialize, Serialize};

/// What happened to one agent call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExchangeOutcome {
    Response { response: String },
    Failed {
        message: String,
        attempts: Vec<AttemptRecord>,
    },
    /// The caller supplied the payload after the agent failed.
    ManualPayload { response: String },
}

/// One prompt/response pair, appended per agent call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationExchange {
    pub agent: AgentKind,
    pub phase: SessionPhase,
    pub prompt: String,
    #[serde(flatten)]
    pub outcome: ExchangeOutcome,
    pub at: TimestampUtc,
}

impl ConversationExchange {
    pub fn new(
        agent: AgentKind,
        phase: SessionPhase,
        prompt: String,
        outcome: ExchangeOutcome,
    ) -> Self {
        Self {
            agent,
            phase,
            prompt,
            outcome,
            at: TimestampUtc::now(),
        }
    }
}

/// A timer that will pass the gate unless cancelled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAutoContinue {
    /// Matches the timer message to the arming that created it.
    pub generation: u64,
    pub delay_secs: u64,
    pub armed_at: TimestampUtc,
}

/// Why the session is paused at its gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PauseReason {
    /// The evaluator did not approve the output.
    ConditionsNotMet,
    /// Approved, but the output carries warnings and auto-continue pauses on them.
    WarningsPresent,
    /// Approved; waiting for the auto-continue timer.
    AutoContinue,
    /// A re-enable condition forced manual review.
    Forced { reason: ReviewReason },
}

/// Review gate the session is currently halted at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateState {
    pub gate: ReviewGate,
    pub review: ReviewData,
    pub reason: PauseReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_continue: Option<PendingAutoContinue>,
}

/// One planning run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub phase: SessionPhase,
    pub exchanges: Vec<ConversationExchange>,
    pub context: SessionContext,
    pub preferences: SkipPreferences,
    /// Every output produced, oldest first. Never edited.
    pub outputs: Vec<PhaseOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate: Option<GateState>,
    #[serde(default)]
    pub reviewed_assignment: Option<ReviewData>,
    #[serde(default)]
    pub reviewed_selection: Option<ReviewData>,
    #[serde(default)]
    pub errors: Vec<RecordedError>,
    #[serde(default)]
    pub failure: Option<SessionFailure>,
    /// Manual review was requested before the next gate was reached.
    #[serde(default)]
    pub review_requested: bool,
    /// Set once the final plan has been handed to the plan store.
    #[serde(default)]
    pub retired: bool,
    #[serde(default)]
    pub plan_id: Option<uuid::Uuid>,
    /// Monotonic counter for auto-continue timers.
    #[serde(default)]
    pub timer_generation: u64,
    pub created_at: TimestampUtc,
    pub updated_at: TimestampUtc,
}

impl Session {
    pub fn new(id: SessionId, context: SessionContext, preferences: SkipPreferences) -> Self {
        let now = TimestampUtc::now();
        Self {
            id,
            phase: SessionPhase::OrganizingDialogue,
            exchanges: Vec::new(),
            context,
            preferences,
            outputs: Vec::new(),
            gate: None,
            reviewed_assignment: None,
            reviewed_selection: None,
            errors: Vec::new(),
            failure: None,
            review_requested: false,
            retired: false,
            plan_id: None,
            timer_generation: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    pub fn paused_gate(&self) -> Option<ReviewGate> {
        self.gate.as_ref().map(|g| g.gate)
    }

    pub fn pending_timer(&self) -> Option<&PendingAutoContinue> {
        self.gate.as_ref().and_then(|g| g.auto_continue.as_ref())
    }

    /// Most recent output produced by `agent`.
    pub fn latest_output(&self, agent: AgentKind) -> Option<&PhaseOutput> {
        self.outputs.iter().rev().find(|o| o.agent == agent)
    }

    /// Errors recorded while `agent` was the active agent.
    pub fn errors_for(&self, agent: AgentKind) -> usize {
        self.errors
            .iter()
            .filter(|e| e.phase.agent() == Some(agent))
            .count()
    }
}

/// Partial update merged by `update_session_state`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionPatch {
    /// Commits the assignment gate.
    pub reviewed_assignment: Option<ReviewData>,
    /// Commits the selection gate.
    pub reviewed_selection: Option<ReviewData>,
    /// Appended to the context notes.
    pub notes: Vec<String>,
}

impl SessionPatch {
    pub fn commit(gate: ReviewGate, review: ReviewData) -> Self {
        match gate {
            ReviewGate::Assignment => Self {
                reviewed_assignment: Some(review),
                ..Self::default()
            },
            ReviewGate::Selection => Self {
                reviewed_selection: Some(review),
                ..Self::default()
            },
        }
    }

    /// Gates this patch commits, assignment first.
    pub fn commits(&self) -> Vec<(ReviewGate, &ReviewData)> {
        let mut commits = Vec::new();
        if let Some(review) = &self.reviewed_assignment {
            commits.push((ReviewGate::Assignment, review));
        }
        if let Some(review) = &self.reviewed_selection {
            commits.push((ReviewGate::Selection, review));
        }
        commits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::context::fixtures::context;

    #[test]
    fn new_session_starts_in_first_organizing_sub_state() {
        let session = Session::new(SessionId::new(), context(), SkipPreferences::default());
        assert_eq!(session.phase, SessionPhase::OrganizingDialogue);
        assert!(session.gate.is_none());
        assert!(!session.retired);
    }

    #[test]
    fn exchange_outcome_flattens_into_exchange() {
        let exchange = ConversationExchange::new(
            AgentKind::Organizing,
            SessionPhase::OrganizingDialogue,
            "prompt".to_string(),
            ExchangeOutcome::Response {
                response: "{}".to_string(),
            },
        );
        let json = serde_json::to_value(&exchange).unwrap();
        assert_eq!(json["outcome"], "response");
        assert_eq!(json["response"], "{}");
        let back: ConversationExchange = serde_json::from_value(json).unwrap();
        assert_eq!(back, exchange);
    }

    #[test]
    fn session_round_trips_through_json() {
        let session = Session::new(SessionId::new(), context(), SkipPreferences::default());
        let raw = serde_json::to_string(&session).unwrap();
        let back: Session = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, session);
    }
}
