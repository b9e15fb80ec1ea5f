//! Plan record persistence.
//!
//! Completed sessions hand their final plan over as a draft record. Activating
//! a plan pins it to a week; completing it closes it.

use crate::domain::errors::{OrchestratorError, StoreError};
use crate::domain::plan::PlanRecord;
use crate::persist::{list_json_files, read_json, write_json_atomic};
use chrono::NaiveDate;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use uuid::Uuid;

/// Storage collaborator for plan records.
pub trait PlanStore: Send + Sync {
    /// Inserts or replaces a record.
    fn put(&self, record: &PlanRecord) -> Result<(), StoreError>;
    fn get(&self, id: Uuid) -> Result<Option<PlanRecord>, StoreError>;
    fn list_for_team(&self, team_id: &str) -> Result<Vec<PlanRecord>, StoreError>;
}

fn require(store: &dyn PlanStore, id: Uuid) -> Result<PlanRecord, StoreError> {
    store.get(id)?.ok_or_else(|| StoreError::NotFound {
        what: "plan",
        id: id.to_string(),
    })
}

/// Draft → Active for the given week.
pub fn activate_plan(
    store: &dyn PlanStore,
    id: Uuid,
    week_start: NaiveDate,
) -> Result<PlanRecord, OrchestratorError> {
    let mut record = require(store, id)?;
    record.activate(week_start)?;
    store.put(&record)?;
    tracing::info!(plan_id = %id, %week_start, "Plan activated");
    Ok(record)
}

/// Active → Completed.
pub fn complete_plan(store: &dyn PlanStore, id: Uuid) -> Result<PlanRecord, OrchestratorError> {
    let mut record = require(store, id)?;
    record.complete()?;
    store.put(&record)?;
    tracing::info!(plan_id = %id, "Plan completed");
    Ok(record)
}

#[derive(Debug, Default)]
pub struct MemoryPlanStore {
    records: RwLock<HashMap<Uuid, PlanRecord>>,
}

impl MemoryPlanStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PlanStore for MemoryPlanStore {
    fn put(&self, record: &PlanRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().map_err(|_| StoreError::LockPoisoned)?;
        records.insert(record.id, record.clone());
        Ok(())
    }

    fn get(&self, id: Uuid) -> Result<Option<PlanRecord>, StoreError> {
        let records = self.records.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(records.get(&id).cloned())
    }

    fn list_for_team(&self, team_id: &str) -> Result<Vec<PlanRecord>, StoreError> {
        let records = self.records.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(records
            .values()
            .filter(|r| r.team_id == team_id)
            .cloned()
            .collect())
    }
}

/// One JSON file per plan under `dir`.
#[derive(Debug, Clone)]
pub struct FilePlanStore {
    dir: PathBuf,
}

impl FilePlanStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }
}

impl PlanStore for FilePlanStore {
    fn put(&self, record: &PlanRecord) -> Result<(), StoreError> {
        write_json_atomic(&self.path_for(record.id), "plan", record)
    }

    fn get(&self, id: Uuid) -> Result<Option<PlanRecord>, StoreError> {
        read_json(&self.path_for(id), "plan")
    }

    fn list_for_team(&self, team_id: &str) -> Result<Vec<PlanRecord>, StoreError> {
        let mut plans = Vec::new();
        for path in list_json_files(&self.dir)? {
            if let Some(record) = read_json::<PlanRecord>(&path, "plan")? {
                if record.team_id == team_id {
                    plans.push(record);
                }
            }
        }
        Ok(plans)
    }
}

#[cfg(test)]
#[path = "tests/plan_store_tests.rs"]
mod tests;
