//! Deterministic backend that replays queued replies per agent.
//!
//! Used by tests and by `weekplan run --replay`. Replay files are JSON:
//! `{"organizing": [reply, ...], "selection": [...], "editing": [...]}`.

use crate::agents::AgentBackend;
use crate::domain::errors::TransportError;
use crate::domain::types::AgentKind;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

/// One queued reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptedReply {
    /// Responds with the JSON document, serialized.
    Respond(serde_json::Value),
    /// Responds with raw text.
    Raw(String),
    RateLimited { retry_after_ms: Option<u64> },
    Transient(String),
    Fatal(String),
    /// Never responds; only an attempt timeout or cancellation ends the call.
    Hang,
    /// Responds with the JSON document after a delay.
    Delayed { delay_ms: u64, response: serde_json::Value },
}

#[derive(Debug, Default)]
struct Script {
    queues: HashMap<AgentKind, VecDeque<ScriptedReply>>,
    /// Used once a queue is empty.
    fallback: HashMap<AgentKind, ScriptedReply>,
    calls: Vec<(AgentKind, String)>,
}

#[derive(Debug, Default)]
pub struct ScriptedBackend {
    script: Mutex<Script>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a replay file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read replay file: {}", path.display()))?;
        let queues: HashMap<AgentKind, Vec<ScriptedReply>> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse replay file: {}", path.display()))?;
        let backend = Self::new();
        for (agent, replies) in queues {
            for reply in replies {
                backend.push(agent, reply);
            }
        }
        Ok(backend)
    }

    pub fn push(&self, agent: AgentKind, reply: ScriptedReply) {
        if let Ok(mut script) = self.script.lock() {
            script.queues.entry(agent).or_default().push_back(reply);
        }
    }

    /// Builder form of [`push`](Self::push).
    pub fn with(self, agent: AgentKind, reply: ScriptedReply) -> Self {
        self.push(agent, reply);
        self
    }

    /// Reply used for `agent` whenever its queue is empty.
    pub fn with_fallback(self, agent: AgentKind, reply: ScriptedReply) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.fallback.insert(agent, reply);
        }
        self
    }

    /// Prompts received so far, in call order.
    pub fn calls(&self) -> Vec<(AgentKind, String)> {
        self.script
            .lock()
            .map(|script| script.calls.clone())
            .unwrap_or_default()
    }

    pub fn call_count(&self, agent: AgentKind) -> usize {
        self.calls().iter().filter(|(a, _)| *a == agent).count()
    }

    pub fn remaining(&self, agent: AgentKind) -> usize {
        self.script
            .lock()
            .map(|script| script.queues.get(&agent).map_or(0, VecDeque::len))
            .unwrap_or(0)
    }

    fn next_reply(&self, agent: AgentKind, prompt: &str) -> Option<ScriptedReply> {
        let mut script = self.script.lock().ok()?;
        script.calls.push((agent, prompt.to_string()));
        match script.queues.get_mut(&agent).and_then(VecDeque::pop_front) {
            Some(reply) => Some(reply),
            None => script.fallback.get(&agent).cloned(),
        }
    }
}

#[async_trait]
impl AgentBackend for ScriptedBackend {
    async fn complete(&self, agent: AgentKind, prompt: &str) -> Result<String, TransportError> {
        let reply = self
            .next_reply(agent, prompt)
            .ok_or_else(|| TransportError::Fatal {
                message: format!("no scripted reply left for the {} agent", agent),
            })?;
        match reply {
            ScriptedReply::Respond(value) => Ok(value.to_string()),
            ScriptedReply::Raw(text) => Ok(text),
            ScriptedReply::RateLimited { retry_after_ms } => Err(TransportError::RateLimited {
                retry_after: retry_after_ms.map(Duration::from_millis),
            }),
            ScriptedReply::Transient(message) => Err(TransportError::Transient { message }),
            ScriptedReply::Fatal(message) => Err(TransportError::Fatal { message }),
            ScriptedReply::Hang => {
                std::future::pending::<()>().await;
                Err(TransportError::Transient {
                    message: "scripted hang ended".to_string(),
                })
            }
            ScriptedReply::Delayed { delay_ms, response } => {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                Ok(response.to_string())
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/scripted_tests.rs"]
mod tests;
