//! Commands that can mutate a session.
//!
//! All session changes go through `SessionStateMachine::apply()`.

use crate::domain::failure::SessionFailure;
use crate::domain::output::PhaseOutput;
use crate::domain::session::{ConversationExchange, SessionPatch};

#[derive(Debug, Clone)]
pub enum SessionCommand {
    /// Store an agent output for the current sub-state and run the transition rule.
    RecordOutput {
        output: PhaseOutput,
        exchange: ConversationExchange,
    },
    /// The agent for the current sub-state gave up; the session fails.
    RecordFailure {
        exchange: ConversationExchange,
        failure: SessionFailure,
    },
    /// Recover an agent failure with a caller-supplied output for the failed sub-state.
    ResumeWithPayload {
        output: PhaseOutput,
        exchange: ConversationExchange,
    },
    /// Merge a partial update, possibly committing the paused gate.
    UpdateState { patch: SessionPatch },
    /// An auto-continue timer elapsed. Stale generations are ignored.
    AutoContinueFired { generation: u64 },
    /// Caller-reported error. Cancels a pending auto-continue timer.
    RecordError { message: String },
    /// Force manual review at the current or next gate.
    RequestReview,
    Abort,
    /// The final plan was persisted under `plan_id`.
    Retire { plan_id: uuid::Uuid },
}

impl SessionCommand {
    /// Stable name used in structured logs.
    pub fn name(&self) -> &'static str {
        match self {
            SessionCommand::RecordOutput { .. } => "RecordOutput",
            SessionCommand::RecordFailure { .. } => "RecordFailure",
            SessionCommand::ResumeWithPayload { .. } => "ResumeWithPayload",
            SessionCommand::UpdateState { .. } => "UpdateState",
            SessionCommand::AutoContinueFired { .. } => "AutoContinueFired",
            SessionCommand::RecordError { .. } => "RecordError",
            SessionCommand::RequestReview => "RequestReview",
            SessionCommand::Abort => "Abort",
            SessionCommand::Retire { .. } => "Retire",
        }
    }
}
