//! Domain model for weekly planning sessions.
//!
//! - `context`, `types`: what a session plans over (team, tasks, members).
//! - `phase`: the sub-state graph and review gates.
//! - `output`, `plan`: what agents produce and what a finished session hands off.
//! - `session`: the persisted session record.
//! - `actor`: the per-session actor that serializes every mutation.

pub mod actor;
pub mod context;
pub mod errors;
pub mod failure;
pub mod output;
pub mod phase;
pub mod plan;
pub mod services;
pub mod session;
pub mod types;

pub use actor::{SessionActor, SessionActorArgs, SessionMessage};
pub use context::{SessionContext, TeamInfo, TeamMember};
pub use errors::{AgentError, OrchestratorError, StoreError};
pub use failure::{SessionFailure, SessionFailureKind};
pub use output::{Metrics, PhaseOutput, PhasePayload};
pub use phase::{ReviewGate, SessionPhase};
pub use plan::{ConversationBlob, PlanRecord, PlanStatus, VibePlanFile};
pub use services::OrchestratorServices;
pub use session::{Session, SessionPatch};
pub use types::{AgentKind, ItemId, SessionId, TaskItem, TimestampUtc};
