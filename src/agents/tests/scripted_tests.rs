use super::*;
use serde_json::json;
use tempfile::tempdir;

#[tokio::test]
async fn replies_are_served_in_order_per_agent() {
    let backend = ScriptedBackend::new()
        .with(AgentKind::Organizing, ScriptedReply::Raw("one".to_string()))
        .with(AgentKind::Organizing, ScriptedReply::Raw("two".to_string()))
        .with(AgentKind::Selection, ScriptedReply::Respond(json!({"a": 1})));

    assert_eq!(backend.complete(AgentKind::Organizing, "p1").await.unwrap(), "one");
    assert_eq!(backend.complete(AgentKind::Selection, "p2").await.unwrap(), "{\"a\":1}");
    assert_eq!(backend.complete(AgentKind::Organizing, "p3").await.unwrap(), "two");

    let calls = backend.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[1], (AgentKind::Selection, "p2".to_string()));
}

#[tokio::test]
async fn empty_queue_is_fatal_unless_a_fallback_is_set() {
    let backend = ScriptedBackend::new();
    assert!(matches!(
        backend.complete(AgentKind::Editing, "p").await,
        Err(TransportError::Fatal { .. })
    ));

    let backend = backend.with_fallback(AgentKind::Editing, ScriptedReply::Raw("again".to_string()));
    assert_eq!(backend.complete(AgentKind::Editing, "p").await.unwrap(), "again");
    assert_eq!(backend.complete(AgentKind::Editing, "p").await.unwrap(), "again");
}

#[tokio::test]
async fn failure_replies_map_to_transport_errors() {
    let backend = ScriptedBackend::new()
        .with(
            AgentKind::Selection,
            ScriptedReply::RateLimited {
                retry_after_ms: Some(250),
            },
        )
        .with(AgentKind::Selection, ScriptedReply::Transient("reset".to_string()));

    assert_eq!(
        backend.complete(AgentKind::Selection, "p").await.unwrap_err(),
        TransportError::RateLimited {
            retry_after: Some(Duration::from_millis(250))
        }
    );
    assert_eq!(
        backend.complete(AgentKind::Selection, "p").await.unwrap_err(),
        TransportError::Transient {
            message: "reset".to_string()
        }
    );
}

#[test]
fn replay_file_loads_queues() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("replay.json");
    std::fs::write(
        &path,
        r#"{
  "organizing": [{"respond": {"summary": "s", "tasks": []}}, {"transient": "flaky"}],
  "editing": ["hang"]
}"#,
    )
    .unwrap();

    let backend = ScriptedBackend::from_file(&path).unwrap();
    assert_eq!(backend.remaining(AgentKind::Organizing), 2);
    assert_eq!(backend.remaining(AgentKind::Selection), 0);
    assert_eq!(backend.remaining(AgentKind::Editing), 1);
}

#[test]
fn malformed_replay_file_is_an_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("replay.json");
    std::fs::write(&path, "{\"planning\": []}").unwrap();
    assert!(ScriptedBackend::from_file(&path).is_err());
}
