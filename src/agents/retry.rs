//! Retry envelope around a single agent call.
//!
//! Each attempt is bounded by the attempt timeout. Between attempts the loop
//! sleeps with exponential backoff and ±jitter. A cancellation signal is
//! observed before each attempt, during an attempt and during backoff.

use crate::domain::errors::AgentError;
use crate::domain::failure::{AttemptFailure, AttemptRecord};
use crate::domain::types::AgentKind;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;

/// Retry and timeout configuration for agent calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
    /// Fraction of the backoff applied as random jitter in both directions.
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    8_000
}

fn default_attempt_timeout_secs() -> u64 {
    120
}

fn default_jitter() -> f64 {
    0.25
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
            jitter: default_jitter(),
        }
    }
}

impl RetryPolicy {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be at least 1");
        }
        if self.attempt_timeout_secs == 0 {
            anyhow::bail!("retry.attempt_timeout_secs must be at least 1");
        }
        if self.max_backoff_ms < self.base_backoff_ms {
            anyhow::bail!(
                "retry.max_backoff_ms ({}) is below retry.base_backoff_ms ({})",
                self.max_backoff_ms,
                self.base_backoff_ms
            );
        }
        if !(0.0..1.0).contains(&self.jitter) {
            anyhow::bail!("retry.jitter must lie in [0, 1), got {}", self.jitter);
        }
        Ok(())
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    /// Backoff before attempt `attempt + 1`, without jitter.
    pub fn base_backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self.base_backoff_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.max_backoff_ms))
    }

    /// Backoff before attempt `attempt + 1`, with jitter applied.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.base_backoff(attempt).as_millis() as f64;
        let jitter = base * self.jitter * (rand::random::<f64>() * 2.0 - 1.0);
        Duration::from_millis((base + jitter).max(10.0) as u64)
    }
}

/// Cooperative cancellation flag shared with the session's owner.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the flag is set. Pends forever if the owner is gone.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Runs `attempt_fn` under `policy` until it succeeds or the policy gives up.
///
/// `RateLimited`, `Transient` and `Timeout` failures are retried.
/// `InvalidResponse` is retried once; a second one ends the loop.
/// `Fatal` ends the loop immediately. When every recorded attempt timed out
/// the result is `Timeout`, otherwise `Exhausted`.
pub async fn run_with_retry<T, F, Fut>(
    agent: AgentKind,
    policy: &RetryPolicy,
    cancel: &CancelSignal,
    mut attempt_fn: F,
) -> Result<T, AgentError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AttemptFailure>>,
{
    let mut attempts: Vec<AttemptRecord> = Vec::new();
    let mut invalid_responses = 0u32;

    for attempt in 1..=policy.max_attempts {
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled { agent });
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AgentError::Cancelled { agent }),
            outcome = tokio::time::timeout(policy.attempt_timeout(), attempt_fn(attempt)) => outcome,
        };

        let failure = match outcome {
            Ok(Ok(value)) => {
                if attempt > 1 {
                    tracing::info!(agent = %agent, attempt, "Agent call succeeded after retry");
                }
                return Ok(value);
            }
            Ok(Err(failure)) => failure,
            Err(_) => AttemptFailure::Timeout,
        };

        tracing::warn!(
            agent = %agent,
            attempt,
            max_attempts = policy.max_attempts,
            failure = failure.display_name(),
            "Agent attempt failed"
        );
        attempts.push(AttemptRecord::new(attempt, failure.clone()));

        match &failure {
            AttemptFailure::Fatal { .. } => {
                return Err(AgentError::Exhausted { agent, attempts });
            }
            AttemptFailure::InvalidResponse { .. } => {
                invalid_responses += 1;
                if invalid_responses >= 2 {
                    return Err(AgentError::Exhausted { agent, attempts });
                }
            }
            _ => {}
        }

        if attempt == policy.max_attempts {
            break;
        }

        let mut delay = policy.backoff(attempt);
        if let AttemptFailure::RateLimited {
            retry_after_ms: Some(ms),
        } = failure
        {
            delay = delay.max(Duration::from_millis(ms));
        }
        tracing::debug!(agent = %agent, delay_ms = delay.as_millis() as u64, "Backing off");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AgentError::Cancelled { agent }),
            _ = tokio::time::sleep(delay) => {}
        }
    }

    let all_timed_out = !attempts.is_empty()
        && attempts
            .iter()
            .all(|record| record.failure == AttemptFailure::Timeout);
    if all_timed_out {
        Err(AgentError::Timeout { agent, attempts })
    } else {
        Err(AgentError::Exhausted { agent, attempts })
    }
}

#[cfg(test)]
#[path = "tests/retry_tests.rs"]
mod tests;
