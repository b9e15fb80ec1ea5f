//! Command-line surface of the `weekplan` binary.

use crate::agents::{AgentBackend, CommandBackend, ScriptedBackend};
use crate::config::OrchestratorConfig;
use crate::domain::context::SessionContext;
use crate::domain::errors::OrchestratorError;
use crate::domain::output::PhaseOutput;
use crate::domain::services::OrchestratorServices;
use crate::domain::session::SessionPatch;
use crate::domain::types::SessionId;
use crate::orchestrator::Orchestrator;
use crate::preferences::{PreferencesStore, SkipPreferences};
use crate::review::{Adjustment, ReviewData};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "weekplan")]
#[command(about = "Weekly team plan orchestrator with review gates")]
#[command(version)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Config file (YAML). Defaults to the embedded configuration.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Replay agent responses from a JSON file instead of running agent CLIs.
    #[arg(long, global = true)]
    pub replay: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start a session and advance it until completion or a review gate.
    Run {
        /// Session context (JSON).
        #[arg(long)]
        context: PathBuf,

        /// Enable both skip toggles for this run only.
        #[arg(long)]
        approve_all: bool,
    },
    /// Show, adjust or commit the review at the session's gate.
    Review {
        #[command(flatten)]
        session: SessionArg,

        /// Task id to add to the selection (repeatable).
        #[arg(long)]
        add: Vec<String>,

        /// Task id to remove from the selection (repeatable).
        #[arg(long)]
        remove: Vec<String>,

        /// Note recorded in the audit trail.
        #[arg(long)]
        note: Option<String>,

        /// Free-text adjustment, interpreted by the organizing agent.
        #[arg(long)]
        command: Option<String>,

        /// Commit the adjusted review and pass the gate.
        #[arg(long)]
        commit: bool,
    },
    /// Advance a persisted session.
    Resume {
        #[command(flatten)]
        session: SessionArg,

        /// Manual response for the sub-state a failed agent left behind.
        #[arg(long)]
        payload: Option<PathBuf>,
    },
    /// Print a session as JSON.
    Show {
        #[command(flatten)]
        session: SessionArg,
    },
    /// Abort a session.
    Abort {
        #[command(flatten)]
        session: SessionArg,
    },
    /// Read or write skip preferences.
    Prefs {
        #[command(subcommand)]
        action: PrefsAction,
    },
    /// Move a plan record through its lifecycle.
    Plan {
        #[command(subcommand)]
        action: PlanAction,
    },
}

#[derive(Args, Debug)]
pub struct SessionArg {
    #[arg(long = "session")]
    pub id: String,
}

#[derive(Args, Debug)]
pub struct PrefsKey {
    #[arg(long)]
    pub user: String,
    #[arg(long)]
    pub team: String,
}

#[derive(Subcommand, Debug)]
pub enum PrefsAction {
    Get {
        #[command(flatten)]
        key: PrefsKey,
    },
    Set {
        #[command(flatten)]
        key: PrefsKey,
        /// Preferences record (JSON).
        #[arg(long)]
        file: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
pub enum PlanAction {
    /// Draft → active for the week starting at `week`.
    Activate {
        #[arg(long)]
        plan: uuid::Uuid,
        #[arg(long)]
        week: NaiveDate,
    },
    /// Active → completed.
    Complete {
        #[arg(long)]
        plan: uuid::Uuid,
    },
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = OrchestratorConfig::load_or_default(cli.config.as_deref())?;
    let approve_all = matches!(cli.command, Command::Run { approve_all: true, .. });
    let orchestrator = open(config, cli.replay.as_deref(), approve_all)?;

    let result = dispatch(&orchestrator, cli.command).await;
    orchestrator.shutdown().await;
    result
}

fn open(config: OrchestratorConfig, replay: Option<&Path>, approve_all: bool) -> Result<Orchestrator> {
    let backend: Arc<dyn AgentBackend> = match replay {
        Some(path) => Arc::new(ScriptedBackend::from_file(path)?),
        None => {
            let cwd = std::env::current_dir().context("Failed to get current directory")?;
            Arc::new(CommandBackend::new(config.agents.clone(), cwd))
        }
    };
    let paths = config.storage_paths()?;
    let mut services = OrchestratorServices::file_backed(&paths, backend)?;
    if approve_all {
        services.preferences = Arc::new(ApproveAll {
            inner: services.preferences.clone(),
        });
    }
    Ok(Orchestrator::new(config, services))
}

/// Preferences view that turns both skip toggles on without saving them.
struct ApproveAll {
    inner: Arc<dyn PreferencesStore>,
}

impl PreferencesStore for ApproveAll {
    fn load(
        &self,
        user_id: &str,
        team_id: &str,
    ) -> Result<Option<SkipPreferences>, crate::domain::errors::StoreError> {
        let mut prefs = self.inner.load(user_id, team_id)?.unwrap_or_default();
        prefs.skip_assignment_review = true;
        prefs.skip_selection_review = true;
        Ok(Some(prefs))
    }

    fn save(
        &self,
        user_id: &str,
        team_id: &str,
        prefs: &SkipPreferences,
    ) -> Result<(), crate::domain::errors::StoreError> {
        self.inner.save(user_id, team_id, prefs)
    }
}

async fn dispatch(orchestrator: &Orchestrator, command: Command) -> Result<()> {
    match command {
        Command::Run { context, .. } => {
            let raw = std::fs::read_to_string(&context)
                .with_context(|| format!("Failed to read context file: {}", context.display()))?;
            let context: SessionContext = serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse context file: {}", context.display()))?;
            let id = orchestrator.create_session(context).await?;
            println!("Session {}", id);
            drive(orchestrator, id).await
        }
        Command::Review {
            session,
            add,
            remove,
            note,
            command,
            commit,
        } => {
            let id = restore(orchestrator, &session).await?;
            let mut manual = Adjustment::manual();
            for item in add {
                manual = manual.add(item);
            }
            for item in remove {
                manual = manual.remove(item);
            }
            if let Some(note) = note {
                manual = manual.note(note);
            }
            let manual = (!manual.is_empty()).then_some(manual);

            let outcome = orchestrator
                .review_session(id, manual.as_ref(), command.as_deref())
                .await?;
            if let Some(interpretation) = &outcome.interpretation {
                println!("Interpreted: {}", interpretation.interpretation);
                println!("{}", interpretation.explanation);
                for warning in &interpretation.warnings {
                    println!("  warning: {}", warning);
                }
            }
            print_review(&outcome.review);

            if commit {
                let session = orchestrator.get_session(id).await?;
                let gate = session.paused_gate().context("Session is not paused at a gate")?;
                orchestrator
                    .update_session_state(id, SessionPatch::commit(gate, outcome.review))
                    .await?;
                println!("Committed {} review", gate);
            }
            Ok(())
        }
        Command::Resume { session, payload } => {
            let id = restore(orchestrator, &session).await?;
            if let Some(path) = payload {
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read payload file: {}", path.display()))?;
                let output = orchestrator.resume_with_payload(id, raw).await?;
                print_output(&output);
            }
            drive(orchestrator, id).await
        }
        Command::Show { session } => {
            // Read straight from the store so retired sessions show too.
            let id = SessionId::from_string(&session.id)
                .with_context(|| format!("Invalid session id: {}", session.id))?;
            let session = orchestrator
                .services()
                .sessions
                .load(id)?
                .with_context(|| format!("Session {} not found", id))?;
            println!("{}", serde_json::to_string_pretty(&session)?);
            Ok(())
        }
        Command::Abort { session } => {
            let id = restore(orchestrator, &session).await?;
            let session = orchestrator.abort(id).await?;
            println!("Session {} is {}", id, session.phase);
            Ok(())
        }
        Command::Prefs { action } => match action {
            PrefsAction::Get { key } => {
                let prefs = orchestrator.preferences(&key.user, &key.team)?;
                println!("{}", serde_json::to_string_pretty(&prefs)?);
                Ok(())
            }
            PrefsAction::Set { key, file } => {
                let raw = std::fs::read_to_string(&file)
                    .with_context(|| format!("Failed to read preferences file: {}", file.display()))?;
                orchestrator
                    .set_preferences_json(&key.user, &key.team, &raw)
                    .with_context(|| format!("Invalid preferences file: {}", file.display()))?;
                println!("Saved preferences for {} / {}", key.user, key.team);
                Ok(())
            }
        },
        Command::Plan { action } => {
            let record = match action {
                PlanAction::Activate { plan, week } => orchestrator.activate_plan(plan, week)?,
                PlanAction::Complete { plan } => orchestrator.complete_plan(plan)?,
            };
            println!("Plan {} is {:?}", record.id, record.status);
            Ok(())
        }
    }
}

async fn restore(orchestrator: &Orchestrator, session: &SessionArg) -> Result<SessionId> {
    let id = SessionId::from_string(&session.id)
        .with_context(|| format!("Invalid session id: {}", session.id))?;
    orchestrator.restore_sessions().await?;
    // Fails with SessionNotFound for unknown or retired sessions.
    orchestrator.get_session(id).await?;
    Ok(id)
}

/// Advances until the session completes or waits for a human.
async fn drive(orchestrator: &Orchestrator, id: SessionId) -> Result<()> {
    loop {
        match orchestrator.advance(id).await {
            Ok(output) => {
                print_output(&output);
                let session = orchestrator.get_session(id).await?;
                if let Some(plan_id) = session.plan_id.filter(|_| session.retired) {
                    println!("Plan saved as draft {}", plan_id);
                    return Ok(());
                }
            }
            Err(OrchestratorError::AwaitingReview { gate }) => {
                let mut snapshots = orchestrator.watch_session(id).await?;
                let timed = snapshots.borrow().auto_continue.clone();
                if let Some(timer) = timed {
                    println!("{} review passes automatically in {}s", gate, timer.delay_secs);
                    snapshots
                        .wait_for(|s| !s.is_paused() || s.auto_continue.is_none())
                        .await?;
                    continue;
                }

                let session = orchestrator.get_session(id).await?;
                if let Some(state) = &session.gate {
                    print_review(&state.review);
                }
                println!(
                    "Waiting for {} review: weekplan review --session {} --commit",
                    gate, id
                );
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        }
    }
}

fn print_output(output: &PhaseOutput) {
    println!(
        "{}: {} tasks, {:.1}h, {:.0}% of capacity",
        output.phase,
        output.metrics.task_count,
        output.metrics.total_estimate_hours,
        output.metrics.capacity_utilization
    );
    for warning in &output.warnings {
        println!("  warning: {}", warning);
    }
}

fn print_review(review: &ReviewData) {
    println!("Review of {}", review.phase);
    for item in &review.selected_tasks {
        let assignee = item.assignee.as_deref().unwrap_or("-");
        println!(
            "  [x] {:<8} p{:<2} {:>5.1}h {:<10} {}",
            item.id, item.priority, item.estimate_hours, assignee, item.description
        );
    }
    for item in &review.available_tasks {
        println!(
            "  [ ] {:<8} p{:<2} {:>5.1}h {:<10} {}",
            item.id, item.priority, item.estimate_hours, "-", item.description
        );
    }
    println!(
        "  {} tasks, {:.1}h, {:.0}% of capacity",
        review.metrics.task_count,
        review.metrics.total_estimate_hours,
        review.metrics.capacity_utilization
    );
    for warning in &review.warnings {
        println!("  warning: {}", warning);
    }
}
