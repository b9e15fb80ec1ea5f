//! Accumulated planning context for a session.

use crate::domain::errors::OrchestratorError;
use crate::domain::types::{ItemId, TaskItem};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamMember {
    pub name: String,
    /// Hours available to this member during the planned week.
    pub capacity_hours: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamInfo {
    pub team_id: String,
    pub team_name: String,
    /// User driving the planning run; preferences are keyed by (user, team).
    pub user_id: String,
    pub members: Vec<TeamMember>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub week_start: Option<NaiveDate>,
}

/// Team metadata, prior-week history and the evolving candidate set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    pub team: TeamInfo,
    #[serde(default)]
    pub previous_week: Vec<TaskItem>,
    #[serde(default)]
    pub candidates: Vec<TaskItem>,
    /// How many planning runs this team has done, including this one.
    #[serde(default = "default_run_number")]
    pub run_number: u32,
    #[serde(default)]
    pub notes: Vec<String>,
}

fn default_run_number() -> u32 {
    1
}

impl SessionContext {
    /// Sum of member capacity for the week.
    pub fn capacity_hours(&self) -> f64 {
        self.team.members.iter().map(|m| m.capacity_hours).sum()
    }

    pub fn member_names(&self) -> Vec<&str> {
        self.team.members.iter().map(|m| m.name.as_str()).collect()
    }

    pub fn candidate(&self, id: &ItemId) -> Option<&TaskItem> {
        self.candidates.iter().find(|t| &t.id == id)
    }

    /// Checks the required team/user data and the shape of supplied tasks.
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        let invalid = |reason: String| Err(OrchestratorError::InvalidContext { reason });

        if self.team.team_id.trim().is_empty() {
            return invalid("team id is missing".to_string());
        }
        if self.team.user_id.trim().is_empty() {
            return invalid("user id is missing".to_string());
        }
        if self.team.members.is_empty() {
            return invalid(format!("team {} has no members", self.team.team_id));
        }

        let mut names = HashSet::new();
        for member in &self.team.members {
            if member.name.trim().is_empty() {
                return invalid("team member with an empty name".to_string());
            }
            if !names.insert(member.name.as_str()) {
                return invalid(format!("duplicate team member {}", member.name));
            }
            if !member.capacity_hours.is_finite() || member.capacity_hours <= 0.0 {
                return invalid(format!(
                    "member {} has non-positive capacity {}",
                    member.name, member.capacity_hours
                ));
            }
        }

        let mut ids = HashSet::new();
        for task in self.previous_week.iter().chain(self.candidates.iter()) {
            if let Some(problem) = task.structural_problem() {
                return invalid(problem);
            }
        }
        for task in &self.candidates {
            if !ids.insert(&task.id) {
                return invalid(format!("duplicate candidate task id {}", task.id));
            }
        }

        if self.run_number == 0 {
            return invalid("run number starts at 1".to_string());
        }
        Ok(())
    }
}
