//! Storage layout for all weekplan persistence.
//!
//! Everything lives under one root, `~/.weekplan/` unless configured:
//! - `sessions/` - Session snapshots
//! - `plans/` - Plan records
//! - `preferences/` - Skip preferences per (user, team)
//! - `logs/<session-id>/` - Structured session logs

use crate::domain::types::SessionId;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// The name of the weekplan directory under the home directory.
const WEEKPLAN_DIR: &str = ".weekplan";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePaths {
    root: PathBuf,
}

impl StoragePaths {
    /// Uses `~/.weekplan/`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Home directory cannot be determined
    /// - Directory creation fails
    pub fn home() -> Result<Self> {
        let home = dirs::home_dir().context("Could not determine home directory for plan storage")?;
        Self::at(home.join(WEEKPLAN_DIR))
    }

    /// Uses `root`, creating it if needed.
    pub fn at(root: PathBuf) -> Result<Self> {
        ensure_dir(&root, "storage")?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sessions_dir(&self) -> Result<PathBuf> {
        self.subdir("sessions")
    }

    pub fn plans_dir(&self) -> Result<PathBuf> {
        self.subdir("plans")
    }

    pub fn preferences_dir(&self) -> Result<PathBuf> {
        self.subdir("preferences")
    }

    /// Returns `logs/<session-id>/`.
    pub fn session_logs_dir(&self, id: SessionId) -> Result<PathBuf> {
        let dir = self.root.join("logs").join(id.to_string());
        ensure_dir(&dir, "session logs")?;
        Ok(dir)
    }

    fn subdir(&self, name: &str) -> Result<PathBuf> {
        let dir = self.root.join(name);
        ensure_dir(&dir, name)?;
        Ok(dir)
    }
}

fn ensure_dir(dir: &Path, what: &str) -> Result<()> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {} directory: {}", what, dir.display()))
}

#[cfg(test)]
#[path = "tests/planning_paths_tests.rs"]
mod tests;
