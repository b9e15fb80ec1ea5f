//! Session phases and review gates.
//!
//! `SessionPhase` is the state of the session state machine. The ordering of
//! variants is the pipeline order; `Failed` sits outside it and is reachable
//! from any state.

use crate::domain::types::AgentKind;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionPhase {
    #[serde(rename = "organizing.dialogue")]
    OrganizingDialogue,
    #[serde(rename = "organizing.proposing")]
    OrganizingProposing,
    #[serde(rename = "organizing.execution")]
    OrganizingExecution,
    #[serde(rename = "organizing.assignment")]
    OrganizingAssignment,
    #[serde(rename = "selection.analyzing")]
    SelectionAnalyzing,
    #[serde(rename = "selection.prioritizing")]
    SelectionPrioritizing,
    #[serde(rename = "selection.optimizing")]
    SelectionOptimizing,
    #[serde(rename = "selection.selecting")]
    SelectionSelecting,
    #[serde(rename = "review.selection")]
    ReviewSelection,
    #[serde(rename = "editing.creating")]
    EditingCreating,
    #[serde(rename = "editing.modifying")]
    EditingModifying,
    #[serde(rename = "editing.generating")]
    EditingGenerating,
    #[serde(rename = "editing.finalizing")]
    EditingFinalizing,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
}

/// Pipeline order, excluding `Failed`.
pub const PIPELINE: [SessionPhase; 14] = [
    SessionPhase::OrganizingDialogue,
    SessionPhase::OrganizingProposing,
    SessionPhase::OrganizingExecution,
    SessionPhase::OrganizingAssignment,
    SessionPhase::SelectionAnalyzing,
    SessionPhase::SelectionPrioritizing,
    SessionPhase::SelectionOptimizing,
    SessionPhase::SelectionSelecting,
    SessionPhase::ReviewSelection,
    SessionPhase::EditingCreating,
    SessionPhase::EditingModifying,
    SessionPhase::EditingGenerating,
    SessionPhase::EditingFinalizing,
    SessionPhase::Completed,
];

impl SessionPhase {
    /// Dotted label used in logs and persisted blobs.
    pub fn label(&self) -> &'static str {
        match self {
            SessionPhase::OrganizingDialogue => "organizing.dialogue",
            SessionPhase::OrganizingProposing => "organizing.proposing",
            SessionPhase::OrganizingExecution => "organizing.execution",
            SessionPhase::OrganizingAssignment => "organizing.assignment",
            SessionPhase::SelectionAnalyzing => "selection.analyzing",
            SessionPhase::SelectionPrioritizing => "selection.prioritizing",
            SessionPhase::SelectionOptimizing => "selection.optimizing",
            SessionPhase::SelectionSelecting => "selection.selecting",
            SessionPhase::ReviewSelection => "review.selection",
            SessionPhase::EditingCreating => "editing.creating",
            SessionPhase::EditingModifying => "editing.modifying",
            SessionPhase::EditingGenerating => "editing.generating",
            SessionPhase::EditingFinalizing => "editing.finalizing",
            SessionPhase::Completed => "completed",
            SessionPhase::Failed => "failed",
        }
    }

    /// The agent that runs this sub-state, if it is an agent sub-state.
    pub fn agent(&self) -> Option<AgentKind> {
        match self {
            SessionPhase::OrganizingDialogue
            | SessionPhase::OrganizingProposing
            | SessionPhase::OrganizingExecution
            | SessionPhase::OrganizingAssignment => Some(AgentKind::Organizing),
            SessionPhase::SelectionAnalyzing
            | SessionPhase::SelectionPrioritizing
            | SessionPhase::SelectionOptimizing
            | SessionPhase::SelectionSelecting => Some(AgentKind::Selection),
            SessionPhase::EditingCreating
            | SessionPhase::EditingModifying
            | SessionPhase::EditingGenerating
            | SessionPhase::EditingFinalizing => Some(AgentKind::Editing),
            SessionPhase::ReviewSelection | SessionPhase::Completed | SessionPhase::Failed => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionPhase::Completed | SessionPhase::Failed)
    }

    /// The review gate that follows this sub-state, if it closes a major phase.
    pub fn gate_after(&self) -> Option<ReviewGate> {
        match self {
            SessionPhase::OrganizingAssignment => Some(ReviewGate::Assignment),
            SessionPhase::SelectionSelecting => Some(ReviewGate::Selection),
            _ => None,
        }
    }

    /// Next state in pipeline order. `None` for terminal states.
    pub fn next(&self) -> Option<SessionPhase> {
        let index = PIPELINE.iter().position(|p| p == self)?;
        PIPELINE.get(index + 1).copied()
    }

    /// Whether `self -> to` is a legal transition.
    pub fn can_transition_to(&self, to: SessionPhase) -> bool {
        if self.is_terminal() {
            return false;
        }
        if to == SessionPhase::Failed {
            return true;
        }
        // Committing a gate jumps from the gate's sub-state to the first
        // sub-state after the gate.
        match self.gate_after() {
            Some(gate) if to == gate.resumes_at() || to == gate.paused_phase() => true,
            _ => self.next() == Some(to),
        }
    }

    /// Coarse progress through the pipeline, 0..=100.
    pub fn progress_percent(&self) -> u8 {
        match PIPELINE.iter().position(|p| p == self) {
            Some(index) => {
                let last = PIPELINE.len() - 1;
                ((index * 100) / last) as u8
            }
            None => 100,
        }
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Halt points where a human confirms or adjusts an output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewGate {
    /// After the organizing agent proposes task assignments.
    Assignment,
    /// After the selection agent picks the week's tasks.
    Selection,
}

impl ReviewGate {
    /// Phase the session sits in while paused at this gate.
    pub fn paused_phase(&self) -> SessionPhase {
        match self {
            ReviewGate::Assignment => SessionPhase::OrganizingAssignment,
            ReviewGate::Selection => SessionPhase::ReviewSelection,
        }
    }

    /// First sub-state once the gate is committed.
    pub fn resumes_at(&self) -> SessionPhase {
        match self {
            ReviewGate::Assignment => SessionPhase::SelectionAnalyzing,
            ReviewGate::Selection => SessionPhase::EditingCreating,
        }
    }

    /// The agent whose output this gate reviews.
    pub fn agent(&self) -> AgentKind {
        match self {
            ReviewGate::Assignment => AgentKind::Organizing,
            ReviewGate::Selection => AgentKind::Selection,
        }
    }

    /// Gate whose skip toggle governs outputs of the given agent.
    pub fn for_agent(agent: AgentKind) -> Option<ReviewGate> {
        match agent {
            AgentKind::Organizing => Some(ReviewGate::Assignment),
            AgentKind::Selection => Some(ReviewGate::Selection),
            AgentKind::Editing => None,
        }
    }
}

impl std::fmt::Display for ReviewGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReviewGate::Assignment => f.write_str("assignment"),
            ReviewGate::Selection => f.write_str("selection"),
        }
    }
}
