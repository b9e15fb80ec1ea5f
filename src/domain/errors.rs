//! Error types for the orchestration domain.
//!
//! - `OrchestratorError` is what callers of the orchestrator service see.
//! - `AgentError` is the terminal outcome of an agent call after retries.
//! - `TransportError` classifies a single failed backend call.
//! - `StoreError` and `DecodeError` cover the persistence boundary.

use crate::domain::failure::AttemptRecord;
use crate::domain::phase::{ReviewGate, SessionPhase};
use crate::domain::plan::PlanStatus;
use crate::domain::types::{AgentKind, ItemId, SessionId};
use crate::preferences::PreferencesError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

fn join_ids(ids: &[ItemId]) -> String {
    ids.iter()
        .map(ItemId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

fn gate_name(gate: &Option<ReviewGate>) -> String {
    match gate {
        Some(gate) => gate.to_string(),
        None => "none".to_string(),
    }
}

/// Errors returned by the orchestrator service.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("session {id} not found")]
    SessionNotFound { id: SessionId },

    #[error("invalid session context: {reason}")]
    InvalidContext { reason: String },

    #[error("{agent} agent timed out on all {} attempts", .attempts.len())]
    AgentTimeout {
        agent: AgentKind,
        attempts: Vec<AttemptRecord>,
    },

    #[error("{agent} agent gave up after {} attempts", .attempts.len())]
    AgentExhausted {
        agent: AgentKind,
        attempts: Vec<AttemptRecord>,
    },

    #[error("{agent} agent is rate limited")]
    RateLimited {
        agent: AgentKind,
        retry_after: Option<Duration>,
    },

    #[error("{agent} agent returned an invalid response: {message}")]
    InvalidResponse { agent: AgentKind, message: String },

    #[error("unknown item reference(s): {}", join_ids(.ids))]
    UnknownReference { ids: Vec<ItemId> },

    #[error("item(s) both added and removed: {}", join_ids(.ids))]
    ConflictingAdjustment { ids: Vec<ItemId> },

    #[error("invalid adjustment: {reason}")]
    InvalidAdjustment { reason: String },

    #[error(transparent)]
    InvalidPreferences(#[from] PreferencesError),

    #[error("invalid transition from {from}: {message}")]
    InvalidTransition { from: SessionPhase, message: String },

    #[error("session is not paused at the {expected} gate (current gate: {})", gate_name(.actual))]
    GateMismatch {
        expected: ReviewGate,
        actual: Option<ReviewGate>,
    },

    #[error("session is awaiting {gate} review")]
    AwaitingReview { gate: ReviewGate },

    #[error("session {id} was aborted")]
    SessionAborted { id: SessionId },

    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error("session {id} moved to {phase} but could not be saved: {source}")]
    Unpersisted {
        id: SessionId,
        phase: SessionPhase,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("session actor for {id} is unavailable: {message}")]
    ActorUnavailable { id: SessionId, message: String },
}

impl OrchestratorError {
    /// Maps a terminal agent outcome for the given session.
    pub fn from_agent(id: SessionId, err: AgentError) -> Self {
        match err {
            AgentError::Timeout { agent, attempts } => Self::AgentTimeout { agent, attempts },
            AgentError::Exhausted { agent, attempts } => Self::AgentExhausted { agent, attempts },
            AgentError::RateLimited { agent, retry_after } => {
                Self::RateLimited { agent, retry_after }
            }
            AgentError::InvalidResponse { agent, message } => {
                Self::InvalidResponse { agent, message }
            }
            AgentError::Cancelled { .. } => Self::SessionAborted { id },
        }
    }
}

/// Terminal outcome of an agent invocation.
#[derive(Debug, Clone, Error)]
pub enum AgentError {
    #[error("{agent} agent timed out on all {} attempts", .attempts.len())]
    Timeout {
        agent: AgentKind,
        attempts: Vec<AttemptRecord>,
    },

    #[error("{agent} agent is rate limited")]
    RateLimited {
        agent: AgentKind,
        retry_after: Option<Duration>,
    },

    #[error("{agent} agent returned an invalid response: {message}")]
    InvalidResponse { agent: AgentKind, message: String },

    #[error("{agent} agent gave up after {} attempts", .attempts.len())]
    Exhausted {
        agent: AgentKind,
        attempts: Vec<AttemptRecord>,
    },

    #[error("{agent} agent call cancelled")]
    Cancelled { agent: AgentKind },
}

impl AgentError {
    /// Attempt history, empty for single-shot outcomes.
    pub fn attempts(&self) -> &[AttemptRecord] {
        match self {
            AgentError::Timeout { attempts, .. } | AgentError::Exhausted { attempts, .. } => {
                attempts
            }
            _ => &[],
        }
    }
}

/// A single backend call failure, before retry policy is applied.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("transient failure: {message}")]
    Transient { message: String },

    #[error("fatal failure: {message}")]
    Fatal { message: String },
}

/// Persistence failures for sessions, plans and preferences.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode {what}: {source}")]
    Encode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("corrupt {what} at {path}: {source}")]
    Corrupt {
        what: &'static str,
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{what} at {path} has unsupported format version {version}")]
    UnsupportedVersion {
        what: &'static str,
        path: PathBuf,
        version: u32,
    },

    #[error("store lock poisoned")]
    LockPoisoned,

    #[error("{what} {id} not found")]
    NotFound { what: &'static str, id: String },
}

/// Failures parsing persisted blobs into typed records.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed {what}: {source}")]
    Malformed {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("plan status cannot move from {from:?} to {to:?}")]
    InvalidStatus { from: PlanStatus, to: PlanStatus },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_reference_lists_ids() {
        let err = OrchestratorError::UnknownReference {
            ids: vec![ItemId::from("T42"), ItemId::from("T43")],
        };
        assert_eq!(err.to_string(), "unknown item reference(s): T42, T43");
    }

    #[test]
    fn cancelled_agent_maps_to_aborted_session() {
        let id = SessionId::new();
        let err = OrchestratorError::from_agent(
            id,
            AgentError::Cancelled {
                agent: AgentKind::Selection,
            },
        );
        assert!(matches!(err, OrchestratorError::SessionAborted { id: got } if got == id));
    }

    #[test]
    fn gate_mismatch_reports_missing_gate() {
        let err = OrchestratorError::GateMismatch {
            expected: ReviewGate::Selection,
            actual: None,
        };
        assert!(err.to_string().contains("current gate: none"));
    }
}
