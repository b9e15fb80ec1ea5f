//! Phase outputs: the structured result of one agent invocation.

use crate::domain::phase::SessionPhase;
use crate::domain::plan::VibePlanFile;
use crate::domain::types::{AgentKind, ItemId, TaskItem, TimestampUtc};
use serde::{Deserialize, Serialize};

/// Aggregate numbers derived from an item set.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    pub task_count: usize,
    pub total_estimate_hours: f64,
    /// Percent of team capacity consumed by the estimates.
    pub capacity_utilization: f64,
}

impl Metrics {
    /// Derives metrics from per-item estimates against a team capacity.
    pub fn from_estimates<I>(estimates: I, capacity_hours: f64) -> Self
    where
        I: IntoIterator<Item = f64>,
    {
        let mut task_count = 0;
        let mut total_estimate_hours = 0.0;
        for hours in estimates {
            task_count += 1;
            total_estimate_hours += hours;
        }
        let capacity_utilization = if capacity_hours > 0.0 {
            total_estimate_hours * 100.0 / capacity_hours
        } else {
            0.0
        };
        Self {
            task_count,
            total_estimate_hours,
            capacity_utilization,
        }
    }
}

/// Discriminated agent result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PhasePayload {
    Organizing {
        summary: String,
        /// Proposed tasks, with assignees once the assignment sub-state ran.
        tasks: Vec<TaskItem>,
        /// Tasks the agent left out of the proposal.
        #[serde(default)]
        backlog: Vec<TaskItem>,
        #[serde(default)]
        questions: Vec<String>,
    },
    Selection {
        selected: Vec<TaskItem>,
        #[serde(default)]
        deferred: Vec<TaskItem>,
        rationale: String,
    },
    Editing {
        plan: VibePlanFile,
        summary: String,
    },
}

impl PhasePayload {
    pub fn agent(&self) -> AgentKind {
        match self {
            PhasePayload::Organizing { .. } => AgentKind::Organizing,
            PhasePayload::Selection { .. } => AgentKind::Selection,
            PhasePayload::Editing { .. } => AgentKind::Editing,
        }
    }

    /// Items the output puts forward for the week.
    pub fn selected_items(&self) -> Vec<TaskItem> {
        match self {
            PhasePayload::Organizing { tasks, .. } => tasks.clone(),
            PhasePayload::Selection { selected, .. } => selected.clone(),
            PhasePayload::Editing { plan, .. } => plan_items(plan),
        }
    }

    /// Items considered but not put forward.
    pub fn available_items(&self) -> Vec<TaskItem> {
        match self {
            PhasePayload::Organizing { backlog, .. } => backlog.clone(),
            PhasePayload::Selection { deferred, .. } => deferred.clone(),
            PhasePayload::Editing { .. } => Vec::new(),
        }
    }

    /// Returns a description of the first structural problem, if any.
    pub fn structural_problem(&self) -> Option<String> {
        let check_items = |items: &[TaskItem]| -> Option<String> {
            let mut seen = std::collections::HashSet::new();
            for item in items {
                if let Some(problem) = item.structural_problem() {
                    return Some(problem);
                }
                if !seen.insert(&item.id) {
                    return Some(format!("task id {} appears twice", item.id));
                }
            }
            None
        };
        match self {
            PhasePayload::Organizing { tasks, backlog, .. } => {
                let all: Vec<TaskItem> = tasks.iter().chain(backlog.iter()).cloned().collect();
                check_items(&all)
            }
            PhasePayload::Selection {
                selected, deferred, ..
            } => {
                let all: Vec<TaskItem> = selected.iter().chain(deferred.iter()).cloned().collect();
                check_items(&all)
            }
            PhasePayload::Editing { plan, .. } => plan.structural_problem(),
        }
    }
}

/// Flattens a plan into items with ids of the form `member/day/index`.
fn plan_items(plan: &VibePlanFile) -> Vec<TaskItem> {
    plan.tasks()
        .map(|(member, day, index, task)| {
            let day_key = serde_json::to_value(day)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            TaskItem {
                id: ItemId(format!("{}/{}/{}", member, day_key, index)),
                description: task.description.clone(),
                importance: task.importance,
                urgency: task.urgency,
                estimate_hours: task.estimate_hours.unwrap_or(0.0),
                assignee: Some(member.to_string()),
            }
        })
        .collect()
}

/// Result of one agent invocation for one sub-state. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseOutput {
    pub phase: SessionPhase,
    pub agent: AgentKind,
    pub payload: PhasePayload,
    pub warnings: Vec<String>,
    pub metrics: Metrics,
    /// Team capacity the metrics were derived against.
    pub capacity_hours: f64,
    pub produced_at: TimestampUtc,
}

impl PhaseOutput {
    pub fn new(
        phase: SessionPhase,
        payload: PhasePayload,
        warnings: Vec<String>,
        capacity_hours: f64,
    ) -> Self {
        let metrics = Metrics::from_estimates(
            payload
                .selected_items()
                .iter()
                .map(|item| item.estimate_hours),
            capacity_hours,
        );
        Self {
            phase,
            agent: payload.agent(),
            payload,
            warnings,
            metrics,
            capacity_hours,
            produced_at: TimestampUtc::now(),
        }
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}
