//! Readiness probe
//!
//! Polls a condition until it holds, the window elapses, or the run is
//! cancelled. Poll errors count as not-ready observations; only the window
//! or cancellation end the wait.

pub mod conditions;

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::StageError;

pub use conditions::{DeploymentReplicasCondition, HttpHealthCondition, PodHealthCondition};

/// A single observation of a condition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionState {
    pub ready: bool,
    pub detail: String,
}

impl ConditionState {
    pub fn ready(detail: impl Into<String>) -> Self {
        Self {
            ready: true,
            detail: detail.into(),
        }
    }

    pub fn not_ready(detail: impl Into<String>) -> Self {
        Self {
            ready: false,
            detail: detail.into(),
        }
    }
}

/// An externally observable state the pipeline waits on
#[async_trait]
pub trait ReadinessCondition: Send + Sync {
    /// Human readable name used in logs and errors
    fn describe(&self) -> String;

    async fn check(&self) -> Result<ConditionState, StageError>;
}

/// How a wait ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Ready {
        polls: u32,
        elapsed: Duration,
        detail: String,
    },
    TimedOut {
        polls: u32,
        last_observed: Option<String>,
    },
    Cancelled {
        polls: u32,
        last_observed: Option<String>,
    },
}

impl ProbeOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, ProbeOutcome::Ready { .. })
    }

    /// Maps a non-ready outcome onto the stage error taxonomy
    pub fn into_result(self, what: &str) -> Result<String, StageError> {
        match self {
            ProbeOutcome::Ready { detail, .. } => Ok(detail),
            ProbeOutcome::TimedOut { last_observed, .. } => Err(StageError::TimedOut(format!(
                "{} not ready: {}",
                what,
                last_observed.as_deref().unwrap_or("no observation")
            ))),
            ProbeOutcome::Cancelled { last_observed, .. } => Err(StageError::Cancelled(format!(
                "wait for {} cancelled (last observed: {})",
                what,
                last_observed.as_deref().unwrap_or("nothing")
            ))),
        }
    }
}

/// Polls a condition with a fixed interval inside a bounded window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessProbe {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl ReadinessProbe {
    pub fn new(poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            poll_interval,
            timeout,
        }
    }

    pub async fn wait(
        &self,
        condition: &dyn ReadinessCondition,
        cancel: &CancellationToken,
    ) -> ProbeOutcome {
        let what = condition.describe();
        let started = Instant::now();
        let deadline = started + self.timeout;
        let mut polls = 0u32;
        let mut last_observed: Option<String> = None;

        loop {
            if cancel.is_cancelled() {
                return ProbeOutcome::Cancelled {
                    polls,
                    last_observed,
                };
            }

            polls += 1;
            let observation = tokio::select! {
                _ = cancel.cancelled() => {
                    return ProbeOutcome::Cancelled { polls, last_observed };
                }
                result = condition.check() => result,
            };

            match observation {
                Ok(state) if state.ready => {
                    debug!("{} ready after {} poll(s): {}", what, polls, state.detail);
                    return ProbeOutcome::Ready {
                        polls,
                        elapsed: started.elapsed(),
                        detail: state.detail,
                    };
                }
                Ok(state) => {
                    debug!("{} not ready (poll {}): {}", what, polls, state.detail);
                    last_observed = Some(state.detail);
                }
                Err(e) => {
                    warn!("{} poll {} failed: {}", what, polls, e);
                    last_observed = Some(format!("poll error: {}", e.message()));
                }
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(
                    "{} not ready after {:?} ({} polls)",
                    what, self.timeout, polls
                );
                return ProbeOutcome::TimedOut {
                    polls,
                    last_observed,
                };
            }

            let pause = self.poll_interval.min(deadline - now);
            tokio::select! {
                _ = cancel.cancelled() => {
                    return ProbeOutcome::Cancelled { polls, last_observed };
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }
}
