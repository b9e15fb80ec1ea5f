//! External collaborators shared by every session.
//!
//! The orchestrator is built from one `OrchestratorServices` value; nothing
//! here is a global.

use crate::agents::AgentBackend;
use crate::plan_store::{FilePlanStore, MemoryPlanStore, PlanStore};
use crate::planning_paths::StoragePaths;
use crate::preferences::{FilePreferencesStore, MemoryPreferencesStore, PreferencesStore};
use crate::progress::ProgressPublisher;
use crate::session_store::{FileSessionStore, MemorySessionStore, SessionStore};
use std::sync::Arc;

#[derive(Clone)]
pub struct OrchestratorServices {
    pub backend: Arc<dyn AgentBackend>,
    pub sessions: Arc<dyn SessionStore>,
    pub plans: Arc<dyn PlanStore>,
    pub preferences: Arc<dyn PreferencesStore>,
    pub progress: Arc<ProgressPublisher>,
}

impl OrchestratorServices {
    /// Everything in memory. Used by tests and one-shot runs.
    pub fn in_memory(backend: Arc<dyn AgentBackend>) -> Self {
        Self {
            backend,
            sessions: Arc::new(MemorySessionStore::new()),
            plans: Arc::new(MemoryPlanStore::new()),
            preferences: Arc::new(MemoryPreferencesStore::new()),
            progress: Arc::new(ProgressPublisher::new()),
        }
    }

    /// File-backed stores under `paths`.
    pub fn file_backed(paths: &StoragePaths, backend: Arc<dyn AgentBackend>) -> anyhow::Result<Self> {
        Ok(Self {
            backend,
            sessions: Arc::new(FileSessionStore::new(paths.sessions_dir()?)),
            plans: Arc::new(FilePlanStore::new(paths.plans_dir()?)),
            preferences: Arc::new(FilePreferencesStore::new(paths.preferences_dir()?)),
            progress: Arc::new(ProgressPublisher::new()),
        })
    }
}
