//! Persisted plan shapes shared with the storage collaborator.
//!
//! The conversation blob and plan file are parsed into these tagged types at
//! the storage boundary; malformed blobs become `DecodeError` instead of
//! loosely typed JSON flowing into orchestration code.

use crate::domain::errors::DecodeError;
use crate::domain::session::ConversationExchange;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Buckets a task can be scheduled into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanDay {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
    AnytimeThisWeek,
}

impl PlanDay {
    pub const ALL: [PlanDay; 8] = [
        PlanDay::Monday,
        PlanDay::Tuesday,
        PlanDay::Wednesday,
        PlanDay::Thursday,
        PlanDay::Friday,
        PlanDay::Saturday,
        PlanDay::Sunday,
        PlanDay::AnytimeThisWeek,
    ];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanTask {
    pub description: String,
    pub importance: u8,
    pub urgency: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimate_hours: Option<f64>,
}

/// The final plan: member name → day → tasks.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VibePlanFile {
    pub assignments: BTreeMap<String, BTreeMap<PlanDay, Vec<PlanTask>>>,
}

impl VibePlanFile {
    /// Iterates `(member, day, index, task)` in a stable order.
    pub fn tasks(&self) -> impl Iterator<Item = (&str, PlanDay, usize, &PlanTask)> {
        self.assignments.iter().flat_map(|(member, days)| {
            days.iter().flat_map(move |(day, tasks)| {
                tasks
                    .iter()
                    .enumerate()
                    .map(move |(i, task)| (member.as_str(), *day, i, task))
            })
        })
    }

    pub fn task_count(&self) -> usize {
        self.tasks().count()
    }

    /// Returns a description of the first structural problem, if any.
    pub fn structural_problem(&self) -> Option<String> {
        for (member, day, index, task) in self.tasks() {
            if task.description.trim().is_empty() {
                return Some(format!(
                    "{} {:?} task #{} has an empty description",
                    member, day, index
                ));
            }
            if !(1..=5).contains(&task.importance) || !(1..=5).contains(&task.urgency) {
                return Some(format!(
                    "{} {:?} task #{} has scores outside 1..=5",
                    member, day, index
                ));
            }
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Draft,
    Active,
    Completed,
}

/// Opaque conversation blob stored with a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationBlob {
    pub exchanges: Vec<ConversationExchange>,
    pub final_plan: VibePlanFile,
}

impl ConversationBlob {
    /// Parses a stored blob, rejecting anything that is not the expected shape.
    pub fn from_json(raw: &str) -> Result<Self, DecodeError> {
        serde_json::from_str(raw).map_err(|source| DecodeError::Malformed {
            what: "conversation blob",
            source,
        })
    }

    pub fn to_json(&self) -> Result<String, DecodeError> {
        serde_json::to_string(self).map_err(|source| DecodeError::Malformed {
            what: "conversation blob",
            source,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanRecord {
    pub id: uuid::Uuid,
    pub team_id: String,
    pub status: PlanStatus,
    /// `None` while the plan is a draft.
    pub week_start_date: Option<NaiveDate>,
    pub conversation: ConversationBlob,
}

impl PlanRecord {
    pub fn draft(team_id: &str, conversation: ConversationBlob) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            team_id: team_id.to_string(),
            status: PlanStatus::Draft,
            week_start_date: None,
            conversation,
        }
    }

    /// Draft → Active, pinning the plan to a week.
    pub fn activate(&mut self, week_start: NaiveDate) -> Result<(), DecodeError> {
        if self.status != PlanStatus::Draft {
            return Err(DecodeError::InvalidStatus {
                from: self.status,
                to: PlanStatus::Active,
            });
        }
        self.status = PlanStatus::Active;
        self.week_start_date = Some(week_start);
        Ok(())
    }

    /// Active → Completed.
    pub fn complete(&mut self) -> Result<(), DecodeError> {
        if self.status != PlanStatus::Active {
            return Err(DecodeError::InvalidStatus {
                from: self.status,
                to: PlanStatus::Completed,
            });
        }
        self.status = PlanStatus::Completed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan() -> VibePlanFile {
        let mut days = BTreeMap::new();
        days.insert(
            PlanDay::Monday,
            vec![PlanTask {
                description: "ship release".to_string(),
                importance: 5,
                urgency: 4,
                estimate_hours: Some(3.0),
            }],
        );
        days.insert(
            PlanDay::AnytimeThisWeek,
            vec![PlanTask {
                description: "triage inbox".to_string(),
                importance: 2,
                urgency: 2,
                estimate_hours: None,
            }],
        );
        let mut assignments = BTreeMap::new();
        assignments.insert("ana".to_string(), days);
        VibePlanFile { assignments }
    }

    #[test]
    fn plan_day_uses_snake_case_keys() {
        let json = serde_json::to_value(plan()).unwrap();
        assert!(json["assignments"]["ana"]["anytime_this_week"].is_array());
        assert!(json["assignments"]["ana"]["monday"].is_array());
    }

    #[test]
    fn conversation_blob_uses_final_plan_key() {
        let blob = ConversationBlob {
            exchanges: Vec::new(),
            final_plan: plan(),
        };
        let raw = blob.to_json().unwrap();
        assert!(raw.contains("\"finalPlan\""));
        assert_eq!(ConversationBlob::from_json(&raw).unwrap(), blob);
    }

    #[test]
    fn malformed_blob_is_a_decode_error() {
        let err = ConversationBlob::from_json(r#"{"exchanges": 3}"#).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed { .. }));

        let err =
            ConversationBlob::from_json(r#"{"exchanges": [], "finalPlan": {"assignments": {"ana": {"someday": []}}}}"#)
                .unwrap_err();
        assert!(matches!(err, DecodeError::Malformed { .. }));
    }

    #[test]
    fn plan_status_moves_forward_only() {
        let blob = ConversationBlob {
            exchanges: Vec::new(),
            final_plan: plan(),
        };
        let mut record = PlanRecord::draft("team-1", blob);
        assert!(record.week_start_date.is_none());
        assert!(record.complete().is_err());

        let monday = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        record.activate(monday).unwrap();
        assert_eq!(record.week_start_date, Some(monday));
        assert!(record.activate(monday).is_err());
        record.complete().unwrap();
        assert_eq!(record.status, PlanStatus::Completed);
    }

    #[test]
    fn structural_problem_flags_bad_scores() {
        let mut bad = plan();
        if let Some(days) = bad.assignments.get_mut("ana") {
            if let Some(tasks) = days.get_mut(&PlanDay::Monday) {
                tasks[0].urgency = 0;
            }
        }
        assert!(bad.structural_problem().is_some());
        assert!(plan().structural_problem().is_none());
        assert_eq!(plan().task_count(), 2);
    }
}
