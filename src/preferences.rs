//! Skip-review preferences and their persistence.
//!
//! Preferences are keyed by (user, team) and read/written as a single JSON
//! record. Absent records yield the defaults below. Out-of-range values are
//! rejected when decoded or saved, never clamped.

use crate::domain::errors::StoreError;
use crate::persist::{file_stem, read_json, write_json_atomic};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use thiserror::Error;

/// Invalid preference values.
#[derive(Debug, Error)]
pub enum PreferencesError {
    #[error("auto-continue delay {secs}s is outside [{min}, {max}] seconds")]
    DelayOutOfRange { secs: u64, min: u64, max: u64 },

    #[error("invalid preferences: {reason}")]
    InvalidValue { reason: String },

    #[error("malformed preferences record: {0}")]
    Malformed(#[source] serde_json::Error),
}

/// Allowed range for the auto-continue delay, inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayBounds {
    pub min_secs: u64,
    pub max_secs: u64,
}

impl Default for DelayBounds {
    fn default() -> Self {
        Self {
            min_secs: 10,
            max_secs: 120,
        }
    }
}

/// Thresholds that must all hold for a gate to be skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SkipConditions {
    /// Task count ceiling.
    pub max_tasks: Option<usize>,
    /// Minimum capacity utilization, in percent.
    pub min_capacity_utilization: Option<f64>,
    pub no_warnings: bool,
}

impl Default for SkipConditions {
    fn default() -> Self {
        Self {
            max_tasks: Some(20),
            min_capacity_utilization: Some(70.0),
            no_warnings: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AutoContinue {
    pub enabled: bool,
    pub delay_seconds: u64,
    /// Hold an approved output at its gate when it carries warnings.
    pub pause_on_warnings: bool,
}

impl Default for AutoContinue {
    fn default() -> Self {
        Self {
            enabled: false,
            delay_seconds: 30,
            pause_on_warnings: true,
        }
    }
}

/// Conditions that force a manual review even when skipping is approved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReEnableConditions {
    pub after_error: bool,
    pub after_major_change: bool,
    /// Change in task count versus last week, in percent, that counts as major.
    pub major_change_percent: f64,
    pub every_nth_run: Option<u32>,
    pub on_demand: bool,
}

impl Default for ReEnableConditions {
    fn default() -> Self {
        Self {
            after_error: true,
            after_major_change: false,
            major_change_percent: 50.0,
            every_nth_run: None,
            on_demand: true,
        }
    }
}

/// Per user/team skip-review configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SkipPreferences {
    pub skip_selection_review: bool,
    pub selection_conditions: SkipConditions,
    pub skip_assignment_review: bool,
    pub assignment_conditions: SkipConditions,
    pub auto_continue: AutoContinue,
    pub re_enable: ReEnableConditions,
}

impl SkipPreferences {
    /// Checks every bounded value. The delay must lie within `bounds`.
    pub fn validate(&self, bounds: DelayBounds) -> Result<(), PreferencesError> {
        let secs = self.auto_continue.delay_seconds;
        if secs < bounds.min_secs || secs > bounds.max_secs {
            return Err(PreferencesError::DelayOutOfRange {
                secs,
                min: bounds.min_secs,
                max: bounds.max_secs,
            });
        }
        for (gate, conditions) in [
            ("selection", &self.selection_conditions),
            ("assignment", &self.assignment_conditions),
        ] {
            if let Some(min) = conditions.min_capacity_utilization {
                if !min.is_finite() || min < 0.0 {
                    return Err(PreferencesError::InvalidValue {
                        reason: format!("{} minCapacityUtilization {} is not >= 0", gate, min),
                    });
                }
            }
        }
        let percent = self.re_enable.major_change_percent;
        if !percent.is_finite() || percent <= 0.0 {
            return Err(PreferencesError::InvalidValue {
                reason: format!("majorChangePercent {} must be positive", percent),
            });
        }
        if self.re_enable.every_nth_run == Some(0) {
            return Err(PreferencesError::InvalidValue {
                reason: "everyNthRun must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Parses and validates a JSON preferences record.
    pub fn from_json(raw: &str, bounds: DelayBounds) -> Result<Self, PreferencesError> {
        let prefs: SkipPreferences =
            serde_json::from_str(raw).map_err(PreferencesError::Malformed)?;
        prefs.validate(bounds)?;
        Ok(prefs)
    }
}

/// Storage collaborator for preferences, keyed by (user, team).
pub trait PreferencesStore: Send + Sync {
    fn load(&self, user_id: &str, team_id: &str) -> Result<Option<SkipPreferences>, StoreError>;
    fn save(&self, user_id: &str, team_id: &str, prefs: &SkipPreferences)
        -> Result<(), StoreError>;
}

/// Loads preferences, falling back to defaults, and validates them.
pub fn load_preferences(
    store: &dyn PreferencesStore,
    user_id: &str,
    team_id: &str,
    bounds: DelayBounds,
) -> Result<SkipPreferences, crate::domain::errors::OrchestratorError> {
    let prefs = store.load(user_id, team_id)?.unwrap_or_default();
    prefs.validate(bounds)?;
    Ok(prefs)
}

/// Validates, then saves preferences.
pub fn save_preferences(
    store: &dyn PreferencesStore,
    user_id: &str,
    team_id: &str,
    prefs: &SkipPreferences,
    bounds: DelayBounds,
) -> Result<(), crate::domain::errors::OrchestratorError> {
    prefs.validate(bounds)?;
    store.save(user_id, team_id, prefs)?;
    Ok(())
}

#[derive(Debug, Default)]
pub struct MemoryPreferencesStore {
    records: RwLock<HashMap<(String, String), SkipPreferences>>,
}

impl MemoryPreferencesStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferencesStore for MemoryPreferencesStore {
    fn load(&self, user_id: &str, team_id: &str) -> Result<Option<SkipPreferences>, StoreError> {
        let records = self.records.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(records
            .get(&(user_id.to_string(), team_id.to_string()))
            .cloned())
    }

    fn save(
        &self,
        user_id: &str,
        team_id: &str,
        prefs: &SkipPreferences,
    ) -> Result<(), StoreError> {
        let mut records = self.records.write().map_err(|_| StoreError::LockPoisoned)?;
        records.insert((user_id.to_string(), team_id.to_string()), prefs.clone());
        Ok(())
    }
}

/// Stores one JSON file per (user, team) under `dir`.
#[derive(Debug, Clone)]
pub struct FilePreferencesStore {
    dir: PathBuf,
}

impl FilePreferencesStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, user_id: &str, team_id: &str) -> PathBuf {
        self.dir.join(format!(
            "{}--{}.json",
            file_stem(user_id),
            file_stem(team_id)
        ))
    }
}

impl PreferencesStore for FilePreferencesStore {
    fn load(&self, user_id: &str, team_id: &str) -> Result<Option<SkipPreferences>, StoreError> {
        read_json(&self.path_for(user_id, team_id), "preferences")
    }

    fn save(
        &self,
        user_id: &str,
        team_id: &str,
        prefs: &SkipPreferences,
    ) -> Result<(), StoreError> {
        write_json_atomic(&self.path_for(user_id, team_id), "preferences", prefs)
    }
}

#[cfg(test)]
#[path = "tests/preferences_tests.rs"]
mod tests;
