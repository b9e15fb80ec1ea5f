use super::*;
use serial_test::serial;
use tempfile::tempdir;

#[test]
fn test_subdirectories_are_created_under_root() {
    let dir = tempdir().unwrap();
    let paths = StoragePaths::at(dir.path().to_path_buf()).unwrap();

    let sessions = paths.sessions_dir().unwrap();
    let plans = paths.plans_dir().unwrap();
    let prefs = paths.preferences_dir().unwrap();

    assert_eq!(sessions, dir.path().join("sessions"));
    assert_eq!(plans, dir.path().join("plans"));
    assert_eq!(prefs, dir.path().join("preferences"));
    assert!(sessions.is_dir() && plans.is_dir() && prefs.is_dir());
}

#[test]
fn test_session_logs_dir_is_keyed_by_session() {
    let dir = tempdir().unwrap();
    let paths = StoragePaths::at(dir.path().to_path_buf()).unwrap();
    let id = SessionId::new();

    let logs = paths.session_logs_dir(id).unwrap();
    assert_eq!(logs, dir.path().join("logs").join(id.to_string()));
    assert!(logs.is_dir());
}

#[test]
#[serial]
fn test_home_paths_follow_home_env() {
    let dir = tempdir().unwrap();
    let original = std::env::var_os("HOME");
    std::env::set_var("HOME", dir.path());

    let result = StoragePaths::home();

    match original {
        Some(home) => std::env::set_var("HOME", home),
        None => std::env::remove_var("HOME"),
    }
    let paths = result.unwrap();
    assert_eq!(paths.root(), dir.path().join(".weekplan"));
}
