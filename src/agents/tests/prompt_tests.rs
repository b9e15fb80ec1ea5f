use super::*;
use crate::domain::context::fixtures::context;
use crate::domain::session::ConversationExchange;

fn request(phase: SessionPhase) -> AgentRequest {
    AgentRequest {
        phase,
        context: context(),
        history: Vec::new(),
        reviewed: None,
    }
}

#[test]
fn test_render_without_system_prompt() {
    let rendered = PromptRequest::new("user text".to_string()).render();
    assert_eq!(rendered, "user text");
}

#[test]
fn test_render_merges_system_prompt() {
    let rendered = PromptRequest::new("user text".to_string())
        .with_system_prompt("system text".to_string())
        .render();
    assert!(rendered.starts_with("<system-context>\nsystem text\n</system-context>"));
    assert!(rendered.ends_with("user text"));
}

#[test]
fn test_phase_prompt_carries_phase_context_and_contract() {
    let rendered = phase_prompt(&request(SessionPhase::SelectionPrioritizing)).render();
    assert!(rendered.contains("<phase name=\"selection.prioritizing\">"));
    assert!(rendered.contains("capacity-hours=\"40\""));
    assert!(rendered.contains("\"T10\""));
    assert!(rendered.contains("\"deferred\""));
    assert!(!rendered.contains("<history>"));
}

#[test]
fn test_phase_prompt_includes_successful_history_only() {
    let mut req = request(SessionPhase::OrganizingProposing);
    req.history.push(ConversationExchange::new(
        AgentKind::Organizing,
        SessionPhase::OrganizingDialogue,
        "p".to_string(),
        ExchangeOutcome::Response {
            response: "{\"summary\": \"first\"}".to_string(),
        },
    ));
    req.history.push(ConversationExchange::new(
        AgentKind::Organizing,
        SessionPhase::OrganizingDialogue,
        "p".to_string(),
        ExchangeOutcome::Failed {
            message: "timed out".to_string(),
            attempts: Vec::new(),
        },
    ));

    let rendered = phase_prompt(&req).render();
    assert!(rendered.contains("<history>"));
    assert!(rendered.contains("\"first\""));
    assert!(!rendered.contains("timed out"));
}

#[test]
fn test_every_agent_phase_has_an_instruction() {
    for phase in crate::domain::phase::PIPELINE {
        if phase.agent().is_some() {
            assert!(!phase_instruction(phase).is_empty());
        }
    }
}

#[test]
fn test_command_prompt_lists_review_items() {
    let ctx = context();
    let review = ReviewData {
        phase: SessionPhase::SelectionSelecting,
        selected_tasks: Vec::new(),
        available_tasks: ctx.candidates.iter().map(Into::into).collect(),
        metrics: Default::default(),
        warnings: Vec::new(),
        audit_trail: Vec::new(),
        capacity_hours: 40.0,
    };
    let rendered = command_prompt("add T4", &review, &ctx).render();
    assert!(rendered.contains("<command>add T4</command>"));
    assert!(rendered.contains("<available>"));
    assert!(rendered.contains("\"T4\""));
}
