//! Review and adjustment of phase outputs.
//!
//! A phase output is projected into `ReviewData`, the shape a human reviews.
//! Adjustments move items between the selected and available lists and
//! override values; items are never created or deleted, so the set of known
//! ids is fixed for the lifetime of a review.

use crate::domain::context::SessionContext;
use crate::domain::errors::{AgentError, OrchestratorError};
use crate::domain::output::{Metrics, PhaseOutput};
use crate::domain::phase::SessionPhase;
use crate::domain::types::{ItemId, SessionId, TaskItem};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentSource {
    Manual,
    AiCommand,
}

/// One line of a review's audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub source: AdjustmentSource,
    pub note: String,
}

/// A task as presented for review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewItem {
    pub id: ItemId,
    pub description: String,
    pub importance: u8,
    pub urgency: u8,
    /// importance × urgency unless overridden.
    pub priority: u32,
    pub estimate_hours: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default)]
    pub overridden: bool,
}

impl From<&TaskItem> for ReviewItem {
    fn from(task: &TaskItem) -> Self {
        Self {
            id: task.id.clone(),
            description: task.description.clone(),
            importance: task.importance,
            urgency: task.urgency,
            priority: task.base_priority(),
            estimate_hours: task.estimate_hours,
            assignee: task.assignee.clone(),
            overridden: false,
        }
    }
}

impl ReviewItem {
    pub fn to_task(&self) -> TaskItem {
        TaskItem {
            id: self.id.clone(),
            description: self.description.clone(),
            importance: self.importance,
            urgency: self.urgency,
            estimate_hours: self.estimate_hours,
            assignee: self.assignee.clone(),
        }
    }
}

/// Human-facing projection of a phase output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewData {
    /// Sub-state whose output is under review.
    pub phase: SessionPhase,
    pub selected_tasks: Vec<ReviewItem>,
    pub available_tasks: Vec<ReviewItem>,
    pub metrics: Metrics,
    pub warnings: Vec<String>,
    pub audit_trail: Vec<AuditEntry>,
    pub capacity_hours: f64,
}

impl ReviewData {
    pub fn contains(&self, id: &ItemId) -> bool {
        self.selected_tasks
            .iter()
            .chain(self.available_tasks.iter())
            .any(|item| &item.id == id)
    }

    /// First reason a reviewed copy of this data cannot be committed: a
    /// duplicated id, a malformed item or a priority outside 1..=25.
    pub fn commit_problem(&self) -> Option<String> {
        let mut seen = BTreeSet::new();
        for item in self.selected_tasks.iter().chain(self.available_tasks.iter()) {
            if !seen.insert(&item.id) {
                return Some(format!("task {} appears more than once", item.id));
            }
            if let Some(problem) = item.to_task().structural_problem() {
                return Some(problem);
            }
            if !(1..=25).contains(&item.priority) {
                return Some(format!(
                    "priority {} for {} is outside 1..=25",
                    item.priority, item.id
                ));
            }
        }
        None
    }

    pub(crate) fn normalize(&mut self) {
        sort_canonical(&mut self.selected_tasks);
        sort_canonical(&mut self.available_tasks);
        self.metrics = Metrics::from_estimates(
            self.selected_tasks.iter().map(|i| i.estimate_hours),
            self.capacity_hours,
        );
    }
}

/// Priority descending, then id ascending.
fn sort_canonical(items: &mut [ReviewItem]) {
    items.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
}

/// Overridden values for one item. `None` keeps the current value.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimate_hours: Option<f64>,
}

impl ValueOverride {
    /// Field-wise merge where `later` wins.
    fn then(self, later: ValueOverride) -> ValueOverride {
        ValueOverride {
            priority: later.priority.or(self.priority),
            estimate_hours: later.estimate_hours.or(self.estimate_hours),
        }
    }
}

/// A delta against a review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adjustment {
    pub source: AdjustmentSource,
    #[serde(default)]
    pub added: BTreeSet<ItemId>,
    #[serde(default)]
    pub removed: BTreeSet<ItemId>,
    #[serde(default)]
    pub overrides: BTreeMap<ItemId, ValueOverride>,
    #[serde(default)]
    pub notes: Vec<AuditEntry>,
}

impl Adjustment {
    pub fn new(source: AdjustmentSource) -> Self {
        Self {
            source,
            added: BTreeSet::new(),
            removed: BTreeSet::new(),
            overrides: BTreeMap::new(),
            notes: Vec::new(),
        }
    }

    pub fn manual() -> Self {
        Self::new(AdjustmentSource::Manual)
    }

    pub fn add(mut self, id: impl Into<ItemId>) -> Self {
        self.added.insert(id.into());
        self
    }

    pub fn remove(mut self, id: impl Into<ItemId>) -> Self {
        self.removed.insert(id.into());
        self
    }

    pub fn override_value(mut self, id: impl Into<ItemId>, value: ValueOverride) -> Self {
        self.overrides.insert(id.into(), value);
        self
    }

    /// Adds a note tagged with this adjustment's source.
    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(AuditEntry {
            source: self.source,
            note: note.into(),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.overrides.is_empty()
            && self.notes.is_empty()
    }

    /// Every id this adjustment references.
    pub fn referenced_ids(&self) -> BTreeSet<&ItemId> {
        self.added
            .iter()
            .chain(self.removed.iter())
            .chain(self.overrides.keys())
            .collect()
    }

    /// The single adjustment equivalent to applying `self` then `later`.
    ///
    /// Membership changes in `later` win over those in `self`; overrides merge
    /// field by field. Notes keep their own source tags. The composite takes
    /// `self.source`.
    pub fn compose(&self, later: &Adjustment) -> Adjustment {
        let mut added = self.added.clone();
        let mut removed = self.removed.clone();
        for id in &later.added {
            removed.remove(id);
            added.insert(id.clone());
        }
        for id in &later.removed {
            added.remove(id);
            removed.insert(id.clone());
        }
        let mut overrides = self.overrides.clone();
        for (id, value) in &later.overrides {
            let merged = overrides.get(id).copied().unwrap_or_default().then(*value);
            overrides.insert(id.clone(), merged);
        }
        let mut notes = self.notes.clone();
        notes.extend(later.notes.iter().cloned());
        Adjustment {
            source: self.source,
            added,
            removed,
            overrides,
            notes,
        }
    }
}

/// Projects a phase output into the reviewable shape.
pub fn transform_for_review(output: &PhaseOutput) -> ReviewData {
    let mut review = ReviewData {
        phase: output.phase,
        selected_tasks: output
            .payload
            .selected_items()
            .iter()
            .map(ReviewItem::from)
            .collect(),
        available_tasks: output
            .payload
            .available_items()
            .iter()
            .map(ReviewItem::from)
            .collect(),
        metrics: output.metrics,
        warnings: output.warnings.clone(),
        audit_trail: Vec::new(),
        capacity_hours: output.capacity_hours,
    };
    review.normalize();
    review
}

/// Validates and applies `adjustment`, returning a new review.
///
/// Fails without touching `review` when any referenced id is unknown, when an
/// id is both added and removed, or when an override value is out of range.
pub fn apply_adjustments(
    review: &ReviewData,
    adjustment: &Adjustment,
) -> Result<ReviewData, OrchestratorError> {
    let unknown: Vec<ItemId> = adjustment
        .referenced_ids()
        .into_iter()
        .filter(|id| !review.contains(id))
        .cloned()
        .collect();
    if !unknown.is_empty() {
        return Err(OrchestratorError::UnknownReference { ids: unknown });
    }

    let conflicting: Vec<ItemId> = adjustment
        .added
        .intersection(&adjustment.removed)
        .cloned()
        .collect();
    if !conflicting.is_empty() {
        return Err(OrchestratorError::ConflictingAdjustment { ids: conflicting });
    }

    for (id, value) in &adjustment.overrides {
        if let Some(priority) = value.priority {
            if !(1..=25).contains(&priority) {
                return Err(OrchestratorError::InvalidAdjustment {
                    reason: format!("priority {} for {} is outside 1..=25", priority, id),
                });
            }
        }
        if let Some(hours) = value.estimate_hours {
            if !hours.is_finite() || hours < 0.0 {
                return Err(OrchestratorError::InvalidAdjustment {
                    reason: format!("estimate {} for {} is not a non-negative number", hours, id),
                });
            }
        }
    }

    let mut next = review.clone();

    let (moving, staying): (Vec<ReviewItem>, Vec<ReviewItem>) = next
        .available_tasks
        .into_iter()
        .partition(|item| adjustment.added.contains(&item.id));
    next.available_tasks = staying;
    next.selected_tasks.extend(moving);

    let (moving, staying): (Vec<ReviewItem>, Vec<ReviewItem>) = next
        .selected_tasks
        .into_iter()
        .partition(|item| adjustment.removed.contains(&item.id));
    next.selected_tasks = staying;
    next.available_tasks.extend(moving);

    for item in next
        .selected_tasks
        .iter_mut()
        .chain(next.available_tasks.iter_mut())
    {
        if let Some(value) = adjustment.overrides.get(&item.id) {
            if let Some(priority) = value.priority {
                item.priority = priority;
            }
            if let Some(hours) = value.estimate_hours {
                item.estimate_hours = hours;
            }
            item.overridden = true;
        }
    }

    next.audit_trail.extend(adjustment.notes.iter().cloned());
    next.normalize();
    Ok(next)
}

/// Result of interpreting a free-text review command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandInterpretation {
    pub interpretation: String,
    /// Always tagged `ai_command`.
    pub changes: Adjustment,
    pub explanation: String,
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Turns a natural-language command into an adjustment. Must not mutate any
/// session; the result is only ever applied as a regular adjustment.
#[async_trait]
pub trait CommandInterpreter: Send + Sync {
    async fn interpret_adjustment_command(
        &self,
        command: &str,
        review: &ReviewData,
        context: &SessionContext,
    ) -> Result<CommandInterpretation, AgentError>;
}

/// Outcome of a combined manual + command review pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewOutcome {
    pub review: ReviewData,
    pub interpretation: Option<CommandInterpretation>,
}

/// Applies the manual adjustment first, then interprets `command` against the
/// adjusted data and applies the result second, tagged `ai_command`.
pub async fn review_with_command(
    session_id: SessionId,
    review: &ReviewData,
    manual: Option<&Adjustment>,
    command: Option<&str>,
    interpreter: &dyn CommandInterpreter,
    context: &SessionContext,
) -> Result<ReviewOutcome, OrchestratorError> {
    let adjusted = match manual {
        Some(adjustment) => apply_adjustments(review, adjustment)?,
        None => review.clone(),
    };

    let Some(command) = command.map(str::trim).filter(|c| !c.is_empty()) else {
        return Ok(ReviewOutcome {
            review: adjusted,
            interpretation: None,
        });
    };

    let mut interpretation = interpreter
        .interpret_adjustment_command(command, &adjusted, context)
        .await
        .map_err(|err| OrchestratorError::from_agent(session_id, err))?;

    retag(&mut interpretation.changes, AdjustmentSource::AiCommand);
    if interpretation.changes.notes.is_empty() {
        interpretation.changes.notes.push(AuditEntry {
            source: AdjustmentSource::AiCommand,
            note: format!("{}: {}", command, interpretation.interpretation),
        });
    }

    let review = apply_adjustments(&adjusted, &interpretation.changes)?;
    tracing::debug!(
        command,
        added = interpretation.changes.added.len(),
        removed = interpretation.changes.removed.len(),
        "Applied command adjustment"
    );
    Ok(ReviewOutcome {
        review,
        interpretation: Some(interpretation),
    })
}

fn retag(adjustment: &mut Adjustment, source: AdjustmentSource) {
    adjustment.source = source;
    for entry in &mut adjustment.notes {
        entry.source = source;
    }
}

#[cfg(test)]
#[path = "tests/review_tests.rs"]
mod tests;
