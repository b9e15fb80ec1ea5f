//! Skip-condition evaluation.
//!
//! Both functions here are pure: the result depends only on the arguments.

use crate::domain::output::{Metrics, PhaseOutput};
use crate::domain::phase::ReviewGate;
use crate::preferences::{ReEnableConditions, SkipConditions, SkipPreferences};
use serde::{Deserialize, Serialize};

/// Whether `output` may pass its review gate without a human.
///
/// The gate's skip toggle must be on and every configured condition must
/// hold. Outputs without a gate (editing) never auto-advance.
pub fn should_auto_advance(output: &PhaseOutput, prefs: &SkipPreferences) -> bool {
    let Some(gate) = ReviewGate::for_agent(output.agent) else {
        return false;
    };
    let (enabled, conditions) = match gate {
        ReviewGate::Selection => (prefs.skip_selection_review, &prefs.selection_conditions),
        ReviewGate::Assignment => (prefs.skip_assignment_review, &prefs.assignment_conditions),
    };
    enabled && conditions_hold(&output.metrics, &output.warnings, conditions)
}

/// Logical AND of the configured thresholds.
pub fn conditions_hold(metrics: &Metrics, warnings: &[String], conditions: &SkipConditions) -> bool {
    if let Some(max) = conditions.max_tasks {
        if metrics.task_count > max {
            return false;
        }
    }
    if let Some(min) = conditions.min_capacity_utilization {
        if metrics.capacity_utilization < min {
            return false;
        }
    }
    !(conditions.no_warnings && !warnings.is_empty())
}

/// Why a review was forced despite an approving evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ReviewReason {
    ErrorRecorded,
    MajorChange { change_percent: f64 },
    NthRun { run_number: u32, interval: u32 },
    OnDemand,
}

/// Session facts the re-enable conditions are checked against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReEnableInputs {
    /// Errors recorded during the phase that produced the output.
    pub errors_in_phase: usize,
    pub task_count: usize,
    pub previous_task_count: usize,
    pub run_number: u32,
    pub review_requested: bool,
}

/// Percent change of `current` against `previous`. `None` without a baseline.
pub fn task_count_change_percent(current: usize, previous: usize) -> Option<f64> {
    if previous == 0 {
        return None;
    }
    let delta = current.abs_diff(previous) as f64;
    Some(delta / previous as f64 * 100.0)
}

/// First re-enable condition that forces a manual review, in priority order.
pub fn forced_review(inputs: &ReEnableInputs, conditions: &ReEnableConditions) -> Option<ReviewReason> {
    if conditions.on_demand && inputs.review_requested {
        return Some(ReviewReason::OnDemand);
    }
    if conditions.after_error && inputs.errors_in_phase > 0 {
        return Some(ReviewReason::ErrorRecorded);
    }
    if conditions.after_major_change {
        if let Some(change) = task_count_change_percent(inputs.task_count, inputs.previous_task_count)
        {
            if change > conditions.major_change_percent {
                return Some(ReviewReason::MajorChange {
                    change_percent: change,
                });
            }
        }
    }
    if let Some(interval) = conditions.every_nth_run {
        if interval > 0 && inputs.run_number % interval == 0 {
            return Some(ReviewReason::NthRun {
                run_number: inputs.run_number,
                interval,
            });
        }
    }
    None
}

#[cfg(test)]
#[path = "tests/skip_tests.rs"]
mod tests;
