//! Weekly team plan orchestration.
//!
//! A session walks three agents (organizing, selection, editing) through
//! fourteen sub-states. Two review gates sit between the agents; skip
//! preferences decide whether a gate waits for a human, passes on a timer,
//! or passes immediately. The [`orchestrator::Orchestrator`] is the entry
//! point.

pub mod agents;
pub mod cli;
pub mod config;
pub mod domain;
pub mod orchestrator;
pub mod persist;
pub mod plan_store;
pub mod planning_paths;
pub mod preferences;
pub mod progress;
pub mod review;
pub mod session_store;
pub mod skip;
pub mod state_machine;
pub mod structured_logger;

pub use config::OrchestratorConfig;
pub use orchestrator::Orchestrator;
