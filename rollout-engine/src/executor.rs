//! Stage executor
//!
//! Runs one stage: dependency gate, per-attempt timeout, bounded retry with
//! exponential backoff, cleanup between attempts and cancellation. The
//! executor never aborts the pipeline itself; it only reports the result.

use async_trait::async_trait;
use rollout_core::domain::result::{
    CacheOutcome, ErrorDetail, ErrorKind, InvalidTransition, StageResult, StageStatus,
};
use rollout_core::domain::stage::{RetryClass, Stage};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::context::StageContext;
use crate::error::StageError;

/// What a successful attempt reports back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutput {
    pub cache: CacheOutcome,
}

impl StageOutput {
    pub fn done() -> Self {
        Self {
            cache: CacheOutcome::NotApplicable,
        }
    }

    pub fn cached(cache: CacheOutcome) -> Self {
        Self { cache }
    }
}

/// The work behind a stage
#[async_trait]
pub trait StageAction: Send + Sync {
    /// Runs one attempt
    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, StageError>;

    /// Undoes partial effects of a failed attempt (retry-with-cleanup stages)
    async fn cleanup(&self, _ctx: &StageContext) -> Result<(), StageError> {
        Ok(())
    }
}

/// Delay between attempts: `initial * 2^(n-1)`, capped at `max`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl BackoffPolicy {
    const MULTIPLIER: u32 = 2;

    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }

    /// Delay after the given failed attempt (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let mut delay = self.initial;
        for _ in 1..attempt {
            delay = (delay * Self::MULTIPLIER).min(self.max);
        }
        delay.min(self.max)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(1000), Duration::from_millis(30_000))
    }
}

/// Runs stages one at a time; cheap to copy into spawned tasks
#[derive(Debug, Clone, Copy, Default)]
pub struct StageExecutor {
    backoff: BackoffPolicy,
}

enum AttemptEnd {
    Succeeded(StageOutput),
    Failed(StageError),
    Cancelled(String),
}

impl StageExecutor {
    pub fn new(backoff: BackoffPolicy) -> Self {
        Self { backoff }
    }

    /// Runs `stage` and returns its terminal result
    ///
    /// `prior` holds the results of stages that finished earlier in the run.
    pub async fn run(
        &self,
        stage: &Stage,
        action: &dyn StageAction,
        ctx: &StageContext,
        prior: &[StageResult],
    ) -> StageResult {
        let mut result = StageResult::for_stage(stage);

        let unmet = unmet_dependencies(stage, prior);
        if !unmet.is_empty() {
            let reason = format!("dependency-not-met: {}", unmet.join(", "));
            info!("Skipping stage {} ({})", stage.name, reason);
            log_transition(result.mark_skipped(ctx.clock.now(), reason));
            return result;
        }

        log_transition(result.mark_running(ctx.clock.now()));

        let max_attempts = stage.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            info!(
                "Running stage {} (attempt {}/{})",
                stage.name, attempt, max_attempts
            );

            match self.attempt(stage, action, ctx).await {
                AttemptEnd::Succeeded(output) => {
                    info!(
                        "Stage {} succeeded after {} attempt(s) (cache: {})",
                        stage.name, attempt, output.cache
                    );
                    log_transition(result.mark_succeeded(ctx.clock.now(), attempt, output.cache));
                    return result;
                }
                AttemptEnd::Cancelled(message) => {
                    warn!("Stage {} cancelled: {}", stage.name, message);
                    log_transition(result.mark_cancelled(
                        ctx.clock.now(),
                        attempt,
                        ErrorDetail::new(ErrorKind::Cancelled, message),
                    ));
                    return result;
                }
                AttemptEnd::Failed(err)
                    if err.is_retryable()
                        && stage.retry_class.allows_retry()
                        && attempt < max_attempts =>
                {
                    let delay = self.backoff.delay_after(attempt);
                    warn!(
                        "Stage {} attempt {}/{} failed: {}. Retrying in {:?}",
                        stage.name, attempt, max_attempts, err, delay
                    );

                    if stage.retry_class == RetryClass::RetryWithCleanup {
                        if let Err(e) = action.cleanup(ctx).await {
                            warn!("Cleanup for stage {} failed: {}", stage.name, e);
                        }
                    }

                    tokio::select! {
                        _ = ctx.cancel.cancelled() => {
                            warn!("Stage {} cancelled during backoff", stage.name);
                            log_transition(result.mark_cancelled(
                                ctx.clock.now(),
                                attempt,
                                ErrorDetail::new(ErrorKind::Cancelled, "cancelled during retry backoff"),
                            ));
                            return result;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                AttemptEnd::Failed(err) => {
                    error!(
                        "Stage {} failed after {} attempt(s): {}",
                        stage.name, attempt, err
                    );
                    log_transition(result.mark_failed(ctx.clock.now(), attempt, err.to_detail()));
                    return result;
                }
            }
        }
    }

    /// One attempt bounded by the stage timeout and the run's cancellation
    async fn attempt(&self, stage: &Stage, action: &dyn StageAction, ctx: &StageContext) -> AttemptEnd {
        let outcome = tokio::select! {
            _ = ctx.cancel.cancelled() => {
                return AttemptEnd::Cancelled("cancellation requested".to_string());
            }
            outcome = tokio::time::timeout(stage.timeout(), action.execute(ctx)) => outcome,
        };

        match outcome {
            Ok(Ok(output)) => AttemptEnd::Succeeded(output),
            Ok(Err(StageError::Cancelled(message))) => AttemptEnd::Cancelled(message),
            Ok(Err(err)) => AttemptEnd::Failed(err),
            Err(_) => AttemptEnd::Failed(StageError::TimedOut(format!(
                "attempt exceeded {}s",
                stage.timeout_seconds
            ))),
        }
    }
}

/// Dependencies of `stage` without a `Succeeded` result in `prior`
pub fn unmet_dependencies(stage: &Stage, prior: &[StageResult]) -> Vec<String> {
    stage
        .depends_on
        .iter()
        .filter(|dep| {
            !prior
                .iter()
                .any(|r| &r.stage == *dep && r.status == StageStatus::Succeeded)
        })
        .cloned()
        .collect()
}

fn log_transition(outcome: Result<(), InvalidTransition>) {
    if let Err(e) = outcome {
        error!("Invalid stage transition: {}", e);
    }
}
