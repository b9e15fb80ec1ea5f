//! Prompt assembly for agent calls.
//!
//! Prompts are XML-structured: the role and response contract go in a
//! `<system-context>` block, followed by the phase, the session context and
//! the conversation so far. Content is intentionally minimal; agents are
//! expected to carry their own domain instructions.

use crate::agents::AgentRequest;
use crate::domain::context::SessionContext;
use crate::domain::phase::SessionPhase;
use crate::domain::session::ExchangeOutcome;
use crate::domain::types::AgentKind;
use crate::review::ReviewData;
use serde::Serialize;

/// A prompt before rendering.
#[derive(Debug, Clone)]
pub struct PromptRequest {
    pub user_prompt: String,
    pub system_prompt: Option<String>,
}

impl PromptRequest {
    pub fn new(user_prompt: String) -> Self {
        Self {
            user_prompt,
            system_prompt: None,
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: String) -> Self {
        self.system_prompt = Some(system_prompt);
        self
    }

    /// Merges the system prompt into the user prompt.
    pub fn render(self) -> String {
        match self.system_prompt {
            Some(sys) => format!(
                "<system-context>\n{}\n</system-context>\n\n{}",
                sys, self.user_prompt
            ),
            None => self.user_prompt,
        }
    }
}

fn json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "null".to_string())
}

/// One-line instruction for a sub-state.
pub fn phase_instruction(phase: SessionPhase) -> &'static str {
    match phase {
        SessionPhase::OrganizingDialogue => {
            "Review last week's work and the candidate tasks. List open questions."
        }
        SessionPhase::OrganizingProposing => "Propose the set of tasks the team should consider.",
        SessionPhase::OrganizingExecution => {
            "Refine the proposal into concrete tasks with estimates in hours."
        }
        SessionPhase::OrganizingAssignment => {
            "Assign every proposed task to exactly one team member."
        }
        SessionPhase::SelectionAnalyzing => "Analyze the candidate tasks against team capacity.",
        SessionPhase::SelectionPrioritizing => "Prioritize the candidates by importance and urgency.",
        SessionPhase::SelectionOptimizing => {
            "Optimize the selection so planned hours fit the team's capacity."
        }
        SessionPhase::SelectionSelecting => "Select the tasks for this week; defer the rest.",
        SessionPhase::ReviewSelection => "The selection is under human review.",
        SessionPhase::EditingCreating => "Create a day-by-day plan for the selected tasks.",
        SessionPhase::EditingModifying => "Rebalance the plan across members and days.",
        SessionPhase::EditingGenerating => "Generate the complete plan file.",
        SessionPhase::EditingFinalizing => "Finalize the plan file. Do not add new tasks.",
        SessionPhase::Completed | SessionPhase::Failed => "The session is finished.",
    }
}

fn response_contract(agent: AgentKind) -> &'static str {
    match agent {
        AgentKind::Organizing => {
            r#"Respond with one JSON object:
{"summary": string, "tasks": [task], "backlog": [task], "questions": [string], "warnings": [string]}
where task is {"id": string, "description": string, "importance": 1-5, "urgency": 1-5, "estimate_hours": number, "assignee": string?}"#
        }
        AgentKind::Selection => {
            r#"Respond with one JSON object:
{"selected": [task], "deferred": [task], "rationale": string, "warnings": [string]}
where task is {"id": string, "description": string, "importance": 1-5, "urgency": 1-5, "estimate_hours": number}
Only use ids from <candidates>."#
        }
        AgentKind::Editing => {
            r#"Respond with one JSON object:
{"plan": {"assignments": {member: {day: [{"description": string, "importance": 1-5, "urgency": 1-5, "estimate_hours": number}]}}}, "summary": string, "warnings": [string]}
where day is one of monday..sunday or anytime_this_week."#
        }
    }
}

fn role_line(agent: AgentKind) -> &'static str {
    match agent {
        AgentKind::Organizing => "You are the organizing agent for a team's weekly plan.",
        AgentKind::Selection => "You are the selection agent for a team's weekly plan.",
        AgentKind::Editing => "You are the editing agent for a team's weekly plan.",
    }
}

fn push_context(prompt: &mut String, context: &SessionContext) {
    prompt.push_str(&format!(
        "<team id=\"{}\" name=\"{}\" capacity-hours=\"{}\">\n{}\n</team>\n",
        context.team.team_id,
        context.team.team_name,
        context.capacity_hours(),
        json(&context.team.members)
    ));
    if let Some(week) = context.team.week_start {
        prompt.push_str(&format!("<week-start>{}</week-start>\n", week));
    }
    prompt.push_str(&format!("<run-number>{}</run-number>\n", context.run_number));
    prompt.push_str(&format!(
        "<previous-week>\n{}\n</previous-week>\n",
        json(&context.previous_week)
    ));
    prompt.push_str(&format!(
        "<candidates>\n{}\n</candidates>\n",
        json(&context.candidates)
    ));
    if !context.notes.is_empty() {
        prompt.push_str("<notes>\n");
        for note in &context.notes {
            prompt.push_str(&format!("- {}\n", note));
        }
        prompt.push_str("</notes>\n");
    }
}

/// Builds the prompt for one sub-state call.
pub fn phase_prompt(request: &AgentRequest) -> PromptRequest {
    let agent = request.agent();
    let mut user = String::new();
    user.push_str(&format!(
        "<phase name=\"{}\">\n{}\n</phase>\n",
        request.phase,
        phase_instruction(request.phase)
    ));
    push_context(&mut user, &request.context);
    if let Some(reviewed) = &request.reviewed {
        user.push_str(&format!(
            "<reviewed phase=\"{}\">\n{}\n</reviewed>\n",
            reviewed.phase,
            json(&reviewed.selected_tasks)
        ));
    }

    let responses: Vec<_> = request
        .history
        .iter()
        .filter_map(|exchange| match &exchange.outcome {
            ExchangeOutcome::Response { response }
            | ExchangeOutcome::ManualPayload { response } => Some((exchange, response)),
            ExchangeOutcome::Failed { .. } => None,
        })
        .collect();
    if !responses.is_empty() {
        user.push_str("<history>\n");
        for (exchange, response) in responses {
            user.push_str(&format!(
                "<exchange agent=\"{}\" phase=\"{}\">\n{}\n</exchange>\n",
                exchange.agent,
                exchange.phase,
                response.trim()
            ));
        }
        user.push_str("</history>\n");
    }

    PromptRequest::new(user).with_system_prompt(format!(
        "{}\n{}",
        role_line(agent),
        response_contract(agent)
    ))
}

/// Builds the prompt for interpreting a free-text review command.
pub fn command_prompt(command: &str, review: &ReviewData, context: &SessionContext) -> PromptRequest {
    let mut user = String::new();
    user.push_str(&format!("<command>{}</command>\n", command));
    push_context(&mut user, context);
    user.push_str(&format!(
        "<review phase=\"{}\">\n<selected>\n{}\n</selected>\n<available>\n{}\n</available>\n</review>\n",
        review.phase,
        json(&review.selected_tasks),
        json(&review.available_tasks)
    ));

    PromptRequest::new(user).with_system_prompt(format!(
        "{}\n{}",
        role_line(AgentKind::Organizing),
        r#"Translate the reviewer's command into changes to the review. Respond with one JSON object:
{"interpretation": string, "changes": {"added": [id], "removed": [id], "overrides": {id: {"priority": 1-25?, "estimateHours": number?}}, "notes": [string]}, "explanation": string, "warnings": [string]}
Only reference ids present in <review>."#
    ))
}

#[cfg(test)]
#[path = "tests/prompt_tests.rs"]
mod tests;
