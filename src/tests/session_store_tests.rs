use super::*;
use crate::domain::context::fixtures::context;
use crate::domain::phase::SessionPhase;
use crate::preferences::SkipPreferences;
use tempfile::TempDir;

fn session() -> Session {
    Session::new(SessionId::new(), context(), SkipPreferences::default())
}

#[test]
fn test_memory_store_round_trip() {
    let store = MemorySessionStore::new();
    let mut s = session();
    store.save(&s).unwrap();

    s.phase = SessionPhase::OrganizingProposing;
    store.save(&s).unwrap();

    assert_eq!(store.load(s.id).unwrap(), Some(s.clone()));
    assert_eq!(store.list().unwrap().len(), 1);

    store.delete(s.id).unwrap();
    assert!(store.load(s.id).unwrap().is_none());
}

#[test]
fn test_file_store_persists_versioned_records() {
    let dir = TempDir::new().unwrap();
    let store = FileSessionStore::new(dir.path());
    let s = session();
    store.save(&s).unwrap();

    let raw = std::fs::read_to_string(dir.path().join(format!("{}.json", s.id))).unwrap();
    let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(value["version"], SESSION_FORMAT_VERSION);
    assert_eq!(value["session"]["phase"], "organizing.dialogue");

    // A fresh store over the same directory sees the record.
    let reopened = FileSessionStore::new(dir.path());
    assert_eq!(reopened.load(s.id).unwrap(), Some(s));
}

#[test]
fn test_file_store_lists_newest_first_and_skips_corrupt_records() {
    let dir = TempDir::new().unwrap();
    let store = FileSessionStore::new(dir.path());

    let older = session();
    let mut newer = session();
    newer.updated_at = TimestampUtc(older.updated_at.0 + chrono::Duration::seconds(5));
    store.save(&older).unwrap();
    store.save(&newer).unwrap();
    std::fs::write(dir.path().join("garbage.json"), "{oops").unwrap();

    let listed = store.list().unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, newer.id);
    assert_eq!(listed[1].id, older.id);
}

#[test]
fn test_file_store_rejects_future_versions() {
    let dir = TempDir::new().unwrap();
    let store = FileSessionStore::new(dir.path());
    let s = session();
    let mut record = PersistedSession::new(&s);
    record.version = SESSION_FORMAT_VERSION + 1;
    std::fs::write(
        dir.path().join(format!("{}.json", s.id)),
        serde_json::to_string(&record).unwrap(),
    )
    .unwrap();

    assert!(matches!(
        store.load(s.id),
        Err(StoreError::UnsupportedVersion { version, .. }) if version == SESSION_FORMAT_VERSION + 1
    ));
}

#[test]
fn test_file_store_delete_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let store = FileSessionStore::new(dir.path());
    let s = session();
    store.save(&s).unwrap();
    store.delete(s.id).unwrap();
    store.delete(s.id).unwrap();
    assert!(store.load(s.id).unwrap().is_none());
    assert!(store.list().unwrap().is_empty());
}
