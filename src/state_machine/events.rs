//! Events emitted by the state machine after processing commands.
//!
//! Events are for logging and for the session actor to react to (chaining
//! the next sub-state, arming timers). Observers read state through the
//! snapshot channel instead.

use crate::domain::failure::SessionFailureKind;
use crate::domain::phase::{ReviewGate, SessionPhase};
use crate::domain::session::PauseReason;
use crate::domain::types::AgentKind;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum SessionEvent {
    OutputRecorded {
        phase: SessionPhase,
        agent: AgentKind,
        task_count: usize,
        warnings: usize,
    },
    PhaseChanged {
        from: SessionPhase,
        to: SessionPhase,
    },
    /// The evaluator approved the output; the next sub-state may run now.
    OutputApproved { phase: SessionPhase },
    GatePaused {
        gate: ReviewGate,
        reason: PauseReason,
    },
    /// The actor must schedule `AutoContinueFired { generation }` after the delay.
    TimerArmed {
        gate: ReviewGate,
        generation: u64,
        delay_secs: u64,
    },
    TimerCancelled { generation: u64 },
    GateCommitted { gate: ReviewGate, automatic: bool },
    NotesAdded { count: usize },
    ErrorRecorded { message: String },
    ReviewRequested,
    SessionFailed { kind: SessionFailureKind },
    SessionResumed { phase: SessionPhase },
    SessionCompleted,
    SessionRetired { plan_id: uuid::Uuid },
}
