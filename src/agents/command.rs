//! Agent backend that shells out to a configured CLI per agent kind.
//!
//! The prompt is written to the agent's stdin. Stdout is the response;
//! stderr is only used to classify failures.

use crate::agents::AgentBackend;
use crate::config::{AgentCommandConfig, AgentCommands};
use crate::domain::errors::TransportError;
use crate::domain::failure::{NETWORK_ERROR_PATTERN, RATE_LIMIT_PATTERN};
use crate::domain::types::AgentKind;
use async_trait::async_trait;
use regex::Regex;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};

/// Timeout for waiting for the process to exit after streams close.
pub const PROCESS_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Lines of stderr kept for failure messages.
const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Clone)]
pub struct CommandBackend {
    commands: AgentCommands,
    working_dir: PathBuf,
}

impl CommandBackend {
    pub fn new(commands: AgentCommands, working_dir: PathBuf) -> Self {
        Self {
            commands,
            working_dir,
        }
    }

    fn build_command(&self, config: &AgentCommandConfig) -> Result<Command, TransportError> {
        let program = which::which(&config.command).map_err(|e| TransportError::Fatal {
            message: format!("agent command '{}' not found: {}", config.command, e),
        })?;
        let mut command = Command::new(program);
        command
            .args(&config.args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        Ok(command)
    }
}

#[async_trait]
impl AgentBackend for CommandBackend {
    async fn complete(&self, agent: AgentKind, prompt: &str) -> Result<String, TransportError> {
        let config = self.commands.for_agent(agent);
        let command = self.build_command(config)?;
        run_process(agent, command, Some(prompt)).await
    }
}

/// Runs a prepared command to completion and returns its stdout.
///
/// `input` is written to stdin when the command was configured with a piped
/// stdin.
pub async fn run_process(
    agent: AgentKind,
    mut command: Command,
    input: Option<&str>,
) -> Result<String, TransportError> {
    let mut child = command.spawn().map_err(|e| TransportError::Fatal {
        message: format!("failed to spawn {} agent: {}", agent, e),
    })?;
    tracing::debug!(agent = %agent, pid = ?child.id(), "Agent process started");

    if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
        let bytes = input.as_bytes().to_vec();
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(&bytes).await {
                tracing::debug!("agent stdin closed early: {}", e);
            }
        });
    }

    let stdout = child.stdout.take().ok_or_else(|| TransportError::Fatal {
        message: "failed to capture agent stdout".to_string(),
    })?;
    let stderr = child.stderr.take().ok_or_else(|| TransportError::Fatal {
        message: "failed to capture agent stderr".to_string(),
    })?;

    let mut stdout_reader = BufReader::new(stdout).lines();
    let mut stderr_reader = BufReader::new(stderr).lines();
    let mut output = String::new();
    let mut stderr_tail: Vec<String> = Vec::new();
    let mut stderr_open = true;

    loop {
        tokio::select! {
            line = stdout_reader.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        output.push_str(&line);
                        output.push('\n');
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = child.kill().await;
                        return Err(TransportError::Transient {
                            message: format!("failed to read agent stdout: {}", e),
                        });
                    }
                }
            }
            line = stderr_reader.next_line(), if stderr_open => {
                match line {
                    Ok(Some(line)) => {
                        tracing::trace!(agent = %agent, "stderr: {}", line);
                        stderr_tail.push(line);
                        if stderr_tail.len() > STDERR_TAIL_LINES {
                            stderr_tail.remove(0);
                        }
                    }
                    _ => stderr_open = false,
                }
            }
        }
    }

    // Drain whatever stderr is left so failures can be classified.
    while stderr_open {
        match stderr_reader.next_line().await {
            Ok(Some(line)) => {
                stderr_tail.push(line);
                if stderr_tail.len() > STDERR_TAIL_LINES {
                    stderr_tail.remove(0);
                }
            }
            _ => stderr_open = false,
        }
    }

    let status = wait_for_process(agent, &mut child).await?;
    let stderr_text = stderr_tail.join("\n");

    if !status.success() {
        tracing::debug!(agent = %agent, %status, "Agent process failed");
        return Err(classify_failure(&stderr_text, status.code()));
    }
    if output.trim().is_empty() {
        return Err(TransportError::Transient {
            message: format!("{} agent produced no output", agent),
        });
    }
    Ok(output)
}

async fn wait_for_process(
    agent: AgentKind,
    child: &mut Child,
) -> Result<std::process::ExitStatus, TransportError> {
    match tokio::time::timeout(PROCESS_WAIT_TIMEOUT, child.wait()).await {
        Ok(Ok(status)) => Ok(status),
        Ok(Err(e)) => Err(TransportError::Transient {
            message: format!("failed to wait for {} agent: {}", agent, e),
        }),
        Err(_) => {
            tracing::warn!(
                agent = %agent,
                "Process did not exit within {:?} after stream closed, force killing",
                PROCESS_WAIT_TIMEOUT
            );
            let _ = child.kill().await;
            Err(TransportError::Transient {
                message: format!(
                    "{} agent did not exit within {:?} after stream closed",
                    agent, PROCESS_WAIT_TIMEOUT
                ),
            })
        }
    }
}

/// Maps a failed process's stderr to a transport error.
pub fn classify_failure(stderr: &str, exit_code: Option<i32>) -> TransportError {
    let message = if stderr.trim().is_empty() {
        match exit_code {
            Some(code) => format!("agent exited with status {}", code),
            None => "agent terminated by signal".to_string(),
        }
    } else {
        stderr.trim().to_string()
    };

    if matches_pattern(RATE_LIMIT_PATTERN, stderr) {
        return TransportError::RateLimited {
            retry_after: parse_retry_after(stderr),
        };
    }
    if matches_pattern(NETWORK_ERROR_PATTERN, stderr) {
        return TransportError::Transient { message };
    }
    // Killed by a signal: treat as transient, the next attempt may succeed.
    if exit_code.is_none() {
        return TransportError::Transient { message };
    }
    TransportError::Fatal { message }
}

fn matches_pattern(pattern: &str, text: &str) -> bool {
    match Regex::new(pattern) {
        Ok(re) => re.is_match(text),
        Err(_) => false,
    }
}

/// Extracts a `retry after N` hint, in seconds, from agent stderr.
pub fn parse_retry_after(stderr: &str) -> Option<Duration> {
    let re = Regex::new(r"(?i)retry[-_ ]?after[:=\s]*(\d+)\s*(ms|s|sec|seconds)?").ok()?;
    let captures = re.captures(stderr)?;
    let value: u64 = captures.get(1)?.as_str().parse().ok()?;
    match captures.get(2).map(|m| m.as_str().to_ascii_lowercase()) {
        Some(unit) if unit == "ms" => Some(Duration::from_millis(value)),
        _ => Some(Duration::from_secs(value)),
    }
}

#[cfg(test)]
#[path = "tests/command_tests.rs"]
mod tests;
