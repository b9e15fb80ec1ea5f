//! Shared fixtures for orchestrator integration tests.
#![allow(dead_code)]

use serde_json::{json, Value};
use std::sync::Arc;
use weekplan::agents::{RetryPolicy, ScriptedBackend, ScriptedReply};
use weekplan::domain::{AgentKind, OrchestratorServices, SessionContext, SessionId};
use weekplan::preferences::SkipPreferences;
use weekplan::{Orchestrator, OrchestratorConfig};

pub const USER: &str = "user-1";
pub const TEAM: &str = "team-1";

pub fn context() -> SessionContext {
    let candidates: Vec<Value> = (1..=10)
        .map(|i| {
            json!({
                "id": format!("T{}", i),
                "description": format!("task T{}", i),
                "importance": 3,
                "urgency": 2,
                "estimate_hours": 4.0
            })
        })
        .collect();
    serde_json::from_value(json!({
        "team": {
            "team_id": TEAM,
            "team_name": "Platform",
            "user_id": USER,
            "members": [
                {"name": "ana", "capacity_hours": 20.0},
                {"name": "bo", "capacity_hours": 20.0}
            ]
        },
        "previous_week": [
            {"id": "P1", "description": "last week", "importance": 3, "urgency": 3, "estimate_hours": 4.0}
        ],
        "candidates": candidates
    }))
    .unwrap()
}

/// Tasks T1..=`count`, 4h each, alternating between the two members.
pub fn tasks(count: usize) -> Vec<Value> {
    (1..=count)
        .map(|i| {
            json!({
                "id": format!("T{}", i),
                "description": format!("task T{}", i),
                "importance": 3,
                "urgency": 2,
                "estimate_hours": 4.0,
                "assignee": if i % 2 == 0 { "bo" } else { "ana" }
            })
        })
        .collect()
}

pub fn organizing(count: usize) -> Value {
    json!({
        "summary": "proposal",
        "tasks": tasks(count),
        "backlog": [
            {"id": "T10", "description": "task T10", "importance": 1, "urgency": 1, "estimate_hours": 2.0}
        ]
    })
}

pub fn selection(count: usize) -> Value {
    json!({"selected": tasks(count), "rationale": "fits the week"})
}

pub fn editing() -> Value {
    json!({
        "plan": {"assignments": {
            "ana": {"monday": [{"description": "task T1", "importance": 3, "urgency": 2, "estimate_hours": 4.0}]},
            "bo": {"anytime_this_week": [{"description": "task T2", "importance": 3, "urgency": 2}]}
        }},
        "summary": "plan for the week"
    })
}

/// Every agent answers with a valid response, 8 tasks at 80% capacity.
pub fn happy_backend() -> ScriptedBackend {
    ScriptedBackend::new()
        .with_fallback(AgentKind::Organizing, ScriptedReply::Respond(organizing(8)))
        .with_fallback(AgentKind::Selection, ScriptedReply::Respond(selection(8)))
        .with_fallback(AgentKind::Editing, ScriptedReply::Respond(editing()))
}

pub fn config() -> OrchestratorConfig {
    OrchestratorConfig {
        retry: RetryPolicy {
            max_attempts: 3,
            base_backoff_ms: 10,
            max_backoff_ms: 40,
            attempt_timeout_secs: 2,
            jitter: 0.0,
        },
        logs: false,
        ..OrchestratorConfig::default()
    }
}

pub fn orchestrator(backend: ScriptedBackend) -> (Orchestrator, Arc<ScriptedBackend>) {
    let backend = Arc::new(backend);
    let services = OrchestratorServices::in_memory(backend.clone());
    (Orchestrator::new(config(), services), backend)
}

pub fn approving() -> SkipPreferences {
    let mut prefs = SkipPreferences::default();
    prefs.skip_assignment_review = true;
    prefs.skip_selection_review = true;
    prefs
}

pub async fn session_with(orchestrator: &Orchestrator, prefs: &SkipPreferences) -> SessionId {
    orchestrator.set_preferences(USER, TEAM, prefs).unwrap();
    orchestrator.create_session(context()).await.unwrap()
}
