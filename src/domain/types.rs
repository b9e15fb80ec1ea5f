//! Strongly typed domain primitives for planning sessions.
//!
//! These newtypes give identifiers and timestamps their own types so that a
//! session id can never be confused with a task id at a call site.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a planning session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Creates a new random session ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses a session ID from its string form.
    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a task item inside a phase output (e.g. `T9`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub String);

impl ItemId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ItemId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The three AI capabilities driven by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Organizing,
    Selection,
    Editing,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Organizing => "organizing",
            AgentKind::Selection => "selection",
            AgentKind::Editing => "editing",
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// UTC timestamp wrapper used across persisted records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimestampUtc(pub DateTime<Utc>);

impl TimestampUtc {
    /// Creates a timestamp for the current moment.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Returns the timestamp as an RFC3339 string.
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339()
    }
}

impl Default for TimestampUtc {
    fn default() -> Self {
        Self::now()
    }
}

/// A task as it flows between agents: candidate, selected, or assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskItem {
    pub id: ItemId,
    pub description: String,
    /// 1 (low) to 5 (high).
    pub importance: u8,
    /// 1 (low) to 5 (high).
    pub urgency: u8,
    #[serde(default)]
    pub estimate_hours: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
}

impl TaskItem {
    /// Default priority score: importance × urgency (1..=25).
    pub fn base_priority(&self) -> u32 {
        u32::from(self.importance) * u32::from(self.urgency)
    }

    /// Returns a description of the first structural problem, if any.
    pub fn structural_problem(&self) -> Option<String> {
        if self.id.as_str().trim().is_empty() {
            return Some("task id is empty".to_string());
        }
        if self.description.trim().is_empty() {
            return Some(format!("task {} has an empty description", self.id));
        }
        if !(1..=5).contains(&self.importance) {
            return Some(format!(
                "task {} importance {} outside 1..=5",
                self.id, self.importance
            ));
        }
        if !(1..=5).contains(&self.urgency) {
            return Some(format!(
                "task {} urgency {} outside 1..=5",
                self.id, self.urgency
            ));
        }
        if !self.estimate_hours.is_finite() || self.estimate_hours < 0.0 {
            return Some(format!(
                "task {} estimate {} is not a non-negative number",
                self.id, self.estimate_hours
            ));
        }
        None
    }
}
