//! Role clients: one retry-wrapped invocation boundary per agent.

use crate::agents::prompt;
use crate::agents::retry::{run_with_retry, CancelSignal, RetryPolicy};
use crate::agents::{AgentBackend, AgentRequest};
use crate::domain::context::SessionContext;
use crate::domain::errors::{AgentError, TransportError};
use crate::domain::failure::{AttemptFailure, AttemptRecord};
use crate::domain::output::{PhaseOutput, PhasePayload};
use crate::domain::phase::SessionPhase;
use crate::domain::types::{AgentKind, ItemId};
use crate::review::{
    Adjustment, AdjustmentSource, CommandInterpretation, CommandInterpreter, ReviewData,
    ValueOverride,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// A successful agent call.
#[derive(Debug, Clone)]
pub struct AgentResult {
    pub output: PhaseOutput,
    pub prompt: String,
    /// Raw response text the output was parsed from.
    pub response: String,
}

#[derive(Clone)]
pub struct AgentClient {
    kind: AgentKind,
    backend: Arc<dyn AgentBackend>,
    policy: RetryPolicy,
}

impl std::fmt::Debug for AgentClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentClient")
            .field("kind", &self.kind)
            .field("policy", &self.policy)
            .finish()
    }
}

impl AgentClient {
    pub fn new(kind: AgentKind, backend: Arc<dyn AgentBackend>, policy: RetryPolicy) -> Self {
        Self {
            kind,
            backend,
            policy,
        }
    }

    /// Runs the request's sub-state under the retry policy.
    pub async fn invoke(
        &self,
        request: &AgentRequest,
        cancel: &CancelSignal,
    ) -> Result<AgentResult, AgentError> {
        let prompt = request.prompt();
        let kind = self.kind;
        let backend = &self.backend;

        tracing::debug!(agent = %kind, phase = %request.phase, "Invoking agent");
        let (output, response) = run_with_retry(kind, &self.policy, cancel, |attempt| {
            let prompt = prompt.as_str();
            async move {
                let raw = backend
                    .complete(kind, prompt)
                    .await
                    .map_err(|err| AttemptFailure::from(&err))?;
                let output = parse_phase_output(request.phase, &raw, &request.context)
                    .map_err(|message| {
                        tracing::debug!(agent = %kind, attempt, "Invalid response: {}", message);
                        AttemptFailure::InvalidResponse { message }
                    })?;
                Ok((output, raw))
            }
        })
        .await?;

        Ok(AgentResult {
            output,
            prompt,
            response,
        })
    }
}

#[async_trait]
impl CommandInterpreter for AgentClient {
    /// Single attempt bounded by the attempt timeout. No retries.
    async fn interpret_adjustment_command(
        &self,
        command: &str,
        review: &ReviewData,
        context: &SessionContext,
    ) -> Result<CommandInterpretation, AgentError> {
        let agent = self.kind;
        let prompt = prompt::command_prompt(command, review, context).render();
        let outcome =
            tokio::time::timeout(self.policy.attempt_timeout(), self.backend.complete(agent, &prompt))
                .await;

        let raw = match outcome {
            Err(_) => {
                return Err(AgentError::Timeout {
                    agent,
                    attempts: vec![AttemptRecord::new(1, AttemptFailure::Timeout)],
                })
            }
            Ok(Err(TransportError::RateLimited { retry_after })) => {
                return Err(AgentError::RateLimited { agent, retry_after })
            }
            Ok(Err(err)) => {
                return Err(AgentError::Exhausted {
                    agent,
                    attempts: vec![AttemptRecord::new(1, AttemptFailure::from(&err))],
                })
            }
            Ok(Ok(raw)) => raw,
        };

        parse_interpretation(&raw).map_err(|message| AgentError::InvalidResponse { agent, message })
    }
}

/// The three role clients sharing one backend and policy.
#[derive(Debug, Clone)]
pub struct AgentClients {
    organizing: AgentClient,
    selection: AgentClient,
    editing: AgentClient,
}

impl AgentClients {
    pub fn new(backend: Arc<dyn AgentBackend>, policy: RetryPolicy) -> Self {
        Self {
            organizing: AgentClient::new(AgentKind::Organizing, backend.clone(), policy.clone()),
            selection: AgentClient::new(AgentKind::Selection, backend.clone(), policy.clone()),
            editing: AgentClient::new(AgentKind::Editing, backend, policy),
        }
    }

    pub fn for_agent(&self, agent: AgentKind) -> &AgentClient {
        match agent {
            AgentKind::Organizing => &self.organizing,
            AgentKind::Selection => &self.selection,
            AgentKind::Editing => &self.editing,
        }
    }

    /// The client that interprets review commands.
    pub fn interpreter(&self) -> &AgentClient {
        &self.organizing
    }
}

/// Returns the outermost `{...}` span, skipping any prose or code fences.
fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    raw.get(start..=end)
}

/// Parses a raw response into a validated output for `phase`.
pub fn parse_phase_output(
    phase: SessionPhase,
    raw: &str,
    context: &SessionContext,
) -> Result<PhaseOutput, String> {
    let agent = phase
        .agent()
        .ok_or_else(|| format!("{} has no agent", phase))?;
    let json = extract_json_object(raw).ok_or_else(|| "response has no JSON object".to_string())?;
    let mut value: serde_json::Value =
        serde_json::from_str(json).map_err(|e| format!("response is not valid JSON: {}", e))?;
    let object = value
        .as_object_mut()
        .ok_or_else(|| "response is not a JSON object".to_string())?;

    let warnings: Vec<String> = match object.remove("warnings") {
        Some(serde_json::Value::Null) | None => Vec::new(),
        Some(raw_warnings) => serde_json::from_value(raw_warnings)
            .map_err(|e| format!("warnings must be a list of strings: {}", e))?,
    };
    object.insert(
        "type".to_string(),
        serde_json::Value::String(agent.as_str().to_string()),
    );

    let payload: PhasePayload = serde_json::from_value(value)
        .map_err(|e| format!("response does not match the {} shape: {}", agent, e))?;
    if let Some(problem) = payload.structural_problem() {
        return Err(problem);
    }
    check_against_context(phase, &payload, context)?;

    Ok(PhaseOutput::new(
        phase,
        payload,
        warnings,
        context.capacity_hours(),
    ))
}

fn check_against_context(
    phase: SessionPhase,
    payload: &PhasePayload,
    context: &SessionContext,
) -> Result<(), String> {
    let members: HashSet<&str> = context.member_names().into_iter().collect();
    match payload {
        PhasePayload::Organizing { tasks, .. } => {
            for task in tasks {
                match task.assignee.as_deref() {
                    Some(name) if !members.contains(name) => {
                        return Err(format!(
                            "task {} is assigned to unknown member {}",
                            task.id, name
                        ));
                    }
                    None if phase == SessionPhase::OrganizingAssignment => {
                        return Err(format!("task {} has no assignee", task.id));
                    }
                    _ => {}
                }
            }
        }
        PhasePayload::Selection {
            selected, deferred, ..
        } => {
            if !context.candidates.is_empty() {
                if let Some(unknown) = selected
                    .iter()
                    .chain(deferred.iter())
                    .find(|task| context.candidate(&task.id).is_none())
                {
                    return Err(format!("task {} is not a candidate", unknown.id));
                }
            }
        }
        PhasePayload::Editing { plan, .. } => {
            if let Some(member) = plan
                .assignments
                .keys()
                .find(|member| !members.contains(member.as_str()))
            {
                return Err(format!("plan assigns work to unknown member {}", member));
            }
        }
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct InterpretationWire {
    interpretation: String,
    #[serde(default)]
    changes: ChangesWire,
    #[serde(default)]
    explanation: String,
    #[serde(default)]
    warnings: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ChangesWire {
    added: Vec<ItemId>,
    removed: Vec<ItemId>,
    overrides: BTreeMap<ItemId, ValueOverride>,
    notes: Vec<String>,
}

/// Parses a command interpretation. Changes are always tagged `ai_command`.
pub fn parse_interpretation(raw: &str) -> Result<CommandInterpretation, String> {
    let json = extract_json_object(raw).ok_or_else(|| "response has no JSON object".to_string())?;
    let wire: InterpretationWire = serde_json::from_str(json)
        .map_err(|e| format!("response does not match the interpretation shape: {}", e))?;

    let mut changes = Adjustment::new(AdjustmentSource::AiCommand);
    changes.added.extend(wire.changes.added);
    changes.removed.extend(wire.changes.removed);
    changes.overrides = wire.changes.overrides;
    for note in wire.changes.notes {
        changes = changes.note(note);
    }

    Ok(CommandInterpretation {
        interpretation: wire.interpretation,
        changes,
        explanation: wire.explanation,
        warnings: wire.warnings,
    })
}

#[cfg(test)]
#[path = "tests/client_tests.rs"]
mod tests;
