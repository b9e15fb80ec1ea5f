//! Session persistence for stop/resume.
//!
//! The orchestrator saves the session after every transition, so a process
//! restart loses at most the agent call that was in flight.
//!
//! - **One file per session**: `<sessions_dir>/<session-id>.json`
//! - **Versioned format**: records carry a version for future migrations.

use crate::domain::errors::StoreError;
use crate::domain::session::Session;
use crate::domain::types::{SessionId, TimestampUtc};
use crate::persist::{list_json_files, read_json, write_json_atomic};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::RwLock;

/// Current session record format version.
/// Increment this when making breaking changes to the record format.
pub const SESSION_FORMAT_VERSION: u32 = 1;

/// A session as written to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedSession {
    pub version: u32,
    /// When this record was written (RFC3339).
    pub saved_at: String,
    pub session: Session,
}

impl PersistedSession {
    pub fn new(session: &Session) -> Self {
        Self {
            version: SESSION_FORMAT_VERSION,
            saved_at: TimestampUtc::now().to_rfc3339(),
            session: session.clone(),
        }
    }
}

/// Storage collaborator for sessions.
pub trait SessionStore: Send + Sync {
    fn save(&self, session: &Session) -> Result<(), StoreError>;
    fn load(&self, id: SessionId) -> Result<Option<Session>, StoreError>;
    /// Every stored session, most recently updated first.
    fn list(&self) -> Result<Vec<Session>, StoreError>;
    fn delete(&self, id: SessionId) -> Result<(), StoreError>;
}

fn newest_first(sessions: &mut [Session]) {
    sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
}

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn save(&self, session: &Session) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().map_err(|_| StoreError::LockPoisoned)?;
        sessions.insert(session.id, session.clone());
        Ok(())
    }

    fn load(&self, id: SessionId) -> Result<Option<Session>, StoreError> {
        let sessions = self.sessions.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(sessions.get(&id).cloned())
    }

    fn list(&self) -> Result<Vec<Session>, StoreError> {
        let sessions = self.sessions.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut all: Vec<Session> = sessions.values().cloned().collect();
        newest_first(&mut all);
        Ok(all)
    }

    fn delete(&self, id: SessionId) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().map_err(|_| StoreError::LockPoisoned)?;
        sessions.remove(&id);
        Ok(())
    }
}

/// Stores one JSON record per session under `dir`.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, id: SessionId) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    fn read(&self, path: &std::path::Path) -> Result<Option<Session>, StoreError> {
        let Some(record) = read_json::<PersistedSession>(path, "session")? else {
            return Ok(None);
        };
        if record.version > SESSION_FORMAT_VERSION {
            return Err(StoreError::UnsupportedVersion {
                what: "session",
                path: path.to_path_buf(),
                version: record.version,
            });
        }
        Ok(Some(record.session))
    }
}

impl SessionStore for FileSessionStore {
    fn save(&self, session: &Session) -> Result<(), StoreError> {
        write_json_atomic(
            &self.path_for(session.id),
            "session",
            &PersistedSession::new(session),
        )
    }

    fn load(&self, id: SessionId) -> Result<Option<Session>, StoreError> {
        self.read(&self.path_for(id))
    }

    /// Unreadable records are skipped with a warning so one corrupt file
    /// does not hide every other session.
    fn list(&self) -> Result<Vec<Session>, StoreError> {
        let mut sessions = Vec::new();
        for path in list_json_files(&self.dir)? {
            match self.read(&path) {
                Ok(Some(session)) => sessions.push(session),
                Ok(None) => {}
                Err(err) => tracing::warn!("Skipping session record: {}", err),
            }
        }
        newest_first(&mut sessions);
        Ok(sessions)
    }

    fn delete(&self, id: SessionId) -> Result<(), StoreError> {
        let path = self.path_for(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }
}

#[cfg(test)]
#[path = "tests/session_store_tests.rs"]
mod tests;
