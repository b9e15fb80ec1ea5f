pub mod client;
pub mod command;
pub mod prompt;
pub mod retry;
pub mod scripted;

use crate::domain::context::SessionContext;
use crate::domain::errors::TransportError;
use crate::domain::phase::SessionPhase;
use crate::domain::session::{ConversationExchange, Session};
use crate::domain::types::AgentKind;
use crate::review::ReviewData;
use async_trait::async_trait;

pub use client::{AgentClient, AgentClients, AgentResult};
pub use command::CommandBackend;
pub use retry::{CancelSignal, RetryPolicy};
pub use scripted::{ScriptedBackend, ScriptedReply};

/// Transport for a single model call. One call per attempt.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    async fn complete(&self, agent: AgentKind, prompt: &str) -> Result<String, TransportError>;
}

/// Everything an agent sees for one sub-state.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub phase: SessionPhase,
    pub context: SessionContext,
    /// Exchanges so far, oldest first.
    pub history: Vec<ConversationExchange>,
    /// Review committed at the preceding gate.
    pub reviewed: Option<ReviewData>,
}

impl AgentRequest {
    /// Builds the request for the session's current sub-state.
    /// `None` when the sub-state has no agent.
    pub fn for_session(session: &Session) -> Option<Self> {
        let agent = session.phase.agent()?;
        let reviewed = match agent {
            AgentKind::Organizing => None,
            AgentKind::Selection => session.reviewed_assignment.clone(),
            AgentKind::Editing => session.reviewed_selection.clone(),
        };
        Some(Self {
            phase: session.phase,
            context: session.context.clone(),
            history: session.exchanges.clone(),
            reviewed,
        })
    }

    /// Agent responsible for the request's sub-state.
    pub fn agent(&self) -> AgentKind {
        self.phase.agent().unwrap_or(AgentKind::Editing)
    }

    pub fn prompt(&self) -> String {
        prompt::phase_prompt(self).render()
    }
}
