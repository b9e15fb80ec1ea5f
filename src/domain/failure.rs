//! Structured failure records for agent calls and sessions.
//!
//! Attempt records are kept on the session so a failed session still shows
//! exactly what was tried, and in what order.

use crate::domain::errors::{AgentError, TransportError};
use crate::domain::phase::SessionPhase;
use crate::domain::types::{AgentKind, TimestampUtc};
use serde::{Deserialize, Serialize};

/// Maximum number of recorded errors kept per session.
pub const MAX_ERROR_HISTORY: usize = 50;

/// Regex for classifying network errors from agent stderr.
pub const NETWORK_ERROR_PATTERN: &str =
    r"(?i)connect|network|ECONNREFUSED|ETIMEDOUT|connection\s+refused|name\s+resolution|DNS|socket";

/// Regex for classifying rate limiting from agent stderr.
pub const RATE_LIMIT_PATTERN: &str = r"(?i)rate.?limit|too\s+many\s+requests|\b429\b|overloaded";

/// Why a single attempt failed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum AttemptFailure {
    /// The attempt exceeded its time bound.
    Timeout,
    RateLimited { retry_after_ms: Option<u64> },
    Transient { message: String },
    /// The response failed structural validation.
    InvalidResponse { message: String },
    Fatal { message: String },
}

impl AttemptFailure {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, AttemptFailure::Fatal { .. })
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            AttemptFailure::Timeout => "Timeout",
            AttemptFailure::RateLimited { .. } => "Rate Limited",
            AttemptFailure::Transient { .. } => "Transient",
            AttemptFailure::InvalidResponse { .. } => "Invalid Response",
            AttemptFailure::Fatal { .. } => "Fatal",
        }
    }
}

impl From<&TransportError> for AttemptFailure {
    fn from(err: &TransportError) -> Self {
        match err {
            TransportError::RateLimited { retry_after } => AttemptFailure::RateLimited {
                retry_after_ms: retry_after.map(|d| d.as_millis() as u64),
            },
            TransportError::Transient { message } => AttemptFailure::Transient {
                message: message.clone(),
            },
            TransportError::Fatal { message } => AttemptFailure::Fatal {
                message: message.clone(),
            },
        }
    }
}

/// One entry of an agent call's retry history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttemptRecord {
    /// 1-based attempt number.
    pub attempt: u32,
    pub failure: AttemptFailure,
    pub at: TimestampUtc,
}

impl AttemptRecord {
    pub fn new(attempt: u32, failure: AttemptFailure) -> Self {
        Self {
            attempt,
            failure,
            at: TimestampUtc::now(),
        }
    }
}

/// Classified reason a session moved to `failed`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum SessionFailureKind {
    AgentTimeout,
    AgentExhausted,
    RateLimited,
    InvalidResponse,
    Aborted,
}

/// Failure context persisted on a failed session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionFailure {
    pub kind: SessionFailureKind,
    /// Sub-state that was running when the session failed.
    pub phase: SessionPhase,
    pub agent: Option<AgentKind>,
    pub message: String,
    pub attempts: Vec<AttemptRecord>,
    pub failed_at: TimestampUtc,
}

impl SessionFailure {
    pub fn aborted(phase: SessionPhase) -> Self {
        Self {
            kind: SessionFailureKind::Aborted,
            phase,
            agent: phase.agent(),
            message: "session aborted".to_string(),
            attempts: Vec::new(),
            failed_at: TimestampUtc::now(),
        }
    }

    /// Builds the failure for an agent outcome. `None` for cancellation,
    /// which is recorded separately as an abort.
    pub fn from_agent(phase: SessionPhase, err: &AgentError) -> Option<Self> {
        let (kind, agent) = match err {
            AgentError::Timeout { agent, .. } => (SessionFailureKind::AgentTimeout, *agent),
            AgentError::Exhausted { agent, .. } => (SessionFailureKind::AgentExhausted, *agent),
            AgentError::RateLimited { agent, .. } => (SessionFailureKind::RateLimited, *agent),
            AgentError::InvalidResponse { agent, .. } => {
                (SessionFailureKind::InvalidResponse, *agent)
            }
            AgentError::Cancelled { .. } => return None,
        };
        Some(Self {
            kind,
            phase,
            agent: Some(agent),
            message: err.to_string(),
            attempts: err.attempts().to_vec(),
            failed_at: TimestampUtc::now(),
        })
    }

    /// Whether `resume_with_payload` may recover this failure.
    pub fn is_agent_failure(&self) -> bool {
        !matches!(self.kind, SessionFailureKind::Aborted)
    }
}

/// An error reported against a session by the caller or an agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordedError {
    pub phase: SessionPhase,
    pub message: String,
    pub at: TimestampUtc,
}
