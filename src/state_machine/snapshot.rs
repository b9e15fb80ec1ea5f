//! Read-only summary of a session, broadcast after every command.

use crate::domain::failure::SessionFailureKind;
use crate::domain::phase::{ReviewGate, SessionPhase};
use crate::domain::session::{PauseReason, PendingAutoContinue, Session};
use crate::domain::types::{SessionId, TimestampUtc};

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub phase: SessionPhase,
    /// Gate the session is halted at, if paused.
    pub gate: Option<ReviewGate>,
    pub pause_reason: Option<PauseReason>,
    pub auto_continue: Option<PendingAutoContinue>,
    pub progress_percent: u8,
    pub output_count: usize,
    pub failure: Option<SessionFailureKind>,
    pub retired: bool,
    pub updated_at: TimestampUtc,
}

impl SessionSnapshot {
    pub fn is_paused(&self) -> bool {
        self.gate.is_some()
    }
}

impl From<&Session> for SessionSnapshot {
    fn from(session: &Session) -> Self {
        // A failed session reports how far it got, not 100%.
        let progress_phase = match &session.failure {
            Some(failure) if session.phase == SessionPhase::Failed => failure.phase,
            _ => session.phase,
        };
        Self {
            id: session.id,
            phase: session.phase,
            gate: session.paused_gate(),
            pause_reason: session.gate.as_ref().map(|g| g.reason.clone()),
            auto_continue: session.pending_timer().cloned(),
            progress_percent: progress_phase.progress_percent(),
            output_count: session.outputs.len(),
            failure: session.failure.as_ref().map(|f| f.kind.clone()),
            retired: session.retired,
            updated_at: session.updated_at,
        }
    }
}
