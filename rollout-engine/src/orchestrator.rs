//! Pipeline orchestrator
//!
//! Runs a stage plan in dependency order, at most `max_parallel` stages at a
//! time, and aggregates the results into the run's report. The orchestrator
//! never retries; it only decides what starts next and when to abort.
//!
//! A run aborts on a failed required `no-retry` stage, on a `Fatal` error, or
//! on cancellation. Stages that had not started by then are `Skipped` with
//! reason `pipeline-aborted`.

use rollout_core::domain::profile::EnvironmentProfile;
use rollout_core::domain::report::{PipelineReport, PipelineStatus, RunOutcome};
use rollout_core::domain::result::{ErrorDetail, ErrorKind, StageResult, StageStatus};
use rollout_core::domain::stage::{RetryClass, Stage};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::context::StageContext;
use crate::executor::{BackoffPolicy, StageAction, StageExecutor};
use crate::plan::{PlanError, StagePlan};
use crate::probe::ReadinessProbe;

pub const ABORT_REASON: &str = "pipeline-aborted";

/// Lifecycle of one orchestrated run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    NotStarted,
    Running,
    Completed,
    Aborted,
}

impl RunState {
    pub fn can_transition_to(&self, next: RunState) -> bool {
        matches!(
            (self, next),
            (RunState::NotStarted, RunState::Running)
                | (RunState::Running, RunState::Completed)
                | (RunState::Running, RunState::Aborted)
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::NotStarted => write!(f, "not-started"),
            RunState::Running => write!(f, "running"),
            RunState::Completed => write!(f, "completed"),
            RunState::Aborted => write!(f, "aborted"),
        }
    }
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("invalid stage plan: {0}")]
    Plan(#[from] PlanError),

    #[error("no action registered for stage '{0}'")]
    MissingAction(String),

    #[error("orchestrator already used (state: {0})")]
    AlreadyStarted(RunState),
}

/// Stage name to action mapping
#[derive(Default, Clone)]
pub struct StageRegistry {
    actions: HashMap<String, Arc<dyn StageAction>>,
    rollback: Option<Arc<dyn StageAction>>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, name: impl Into<String>, action: Arc<dyn StageAction>) -> Self {
        self.actions.insert(name.into(), action);
        self
    }

    /// Action run after a failed pipeline
    pub fn with_rollback(mut self, action: Arc<dyn StageAction>) -> Self {
        self.rollback = Some(action);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn StageAction>> {
        self.actions.get(name).cloned()
    }
}

/// Runs one pipeline; create a new orchestrator per run
pub struct PipelineOrchestrator {
    config: EngineConfig,
    registry: StageRegistry,
    executor: StageExecutor,
    cancel: CancellationToken,
    state: Mutex<RunState>,
}

impl PipelineOrchestrator {
    pub fn new(config: EngineConfig, registry: StageRegistry, cancel: CancellationToken) -> Self {
        let executor = StageExecutor::new(BackoffPolicy::new(
            config.backoff_initial,
            config.backoff_max,
        ));
        Self {
            config,
            registry,
            executor,
            cancel,
            state: Mutex::new(RunState::NotStarted),
        }
    }

    pub fn state(&self) -> RunState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn advance(&self, next: RunState) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.can_transition_to(next) {
            info!("Pipeline {} -> {}", *state, next);
            *state = next;
        } else {
            error!("Invalid pipeline transition {} -> {}", *state, next);
        }
    }

    /// Builds the plan for `profile` and runs it
    pub async fn run_pipeline(
        &self,
        profile: EnvironmentProfile,
    ) -> Result<PipelineReport, OrchestratorError> {
        let plan = StagePlan::for_profile(&profile, &self.config)?;
        self.run_plan(profile, &plan).await
    }

    /// Runs an already validated plan
    pub async fn run_plan(
        &self,
        profile: EnvironmentProfile,
        plan: &StagePlan,
    ) -> Result<PipelineReport, OrchestratorError> {
        let state = self.state();
        if state != RunState::NotStarted {
            return Err(OrchestratorError::AlreadyStarted(state));
        }

        let mut actions = Vec::with_capacity(plan.len());
        for stage in plan.stages() {
            let action = self
                .registry
                .get(&stage.name)
                .ok_or_else(|| OrchestratorError::MissingAction(stage.name.clone()))?;
            actions.push(action);
        }

        let run_id = Uuid::new_v4();
        let ctx = StageContext::new(
            run_id,
            Arc::new(profile),
            self.cancel.clone(),
            ReadinessProbe::new(self.config.poll_interval, self.config.readiness_timeout),
        );
        let started_at = ctx.clock.now();

        info!(
            "Starting pipeline {} for {} ({} stages: {})",
            run_id,
            ctx.profile.environment,
            plan.len(),
            plan.names().join(" -> ")
        );
        self.advance(RunState::Running);

        let (mut results, aborted) = self.execute_stages(plan, &actions, &ctx).await;
        let outcome = if aborted {
            self.advance(RunState::Aborted);
            RunOutcome::Aborted
        } else {
            self.advance(RunState::Completed);
            RunOutcome::Completed
        };

        if PipelineReport::overall_status(&results, outcome) == PipelineStatus::Failed {
            if let Some(result) = self.rollback(plan, &ctx, &results).await {
                results.push(result);
            }
        }

        let report = PipelineReport::finalize(
            run_id,
            &ctx.profile,
            started_at,
            results,
            outcome,
            ctx.clock.now(),
        );

        match report.status {
            PipelineStatus::Succeeded => info!("Pipeline {} succeeded", run_id),
            PipelineStatus::Failed => error!("Pipeline {} failed ({})", run_id, outcome),
        }
        Ok(report)
    }

    /// Returns the results in plan order and whether the run aborted
    async fn execute_stages(
        &self,
        plan: &StagePlan,
        actions: &[Arc<dyn StageAction>],
        ctx: &StageContext,
    ) -> (Vec<StageResult>, bool) {
        let stages = plan.stages();
        let index: HashMap<&str, usize> = stages
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.as_str(), i))
            .collect();

        let mut results: Vec<StageResult> = stages.iter().map(StageResult::for_stage).collect();
        let mut started = vec![false; stages.len()];
        let mut running: JoinSet<(usize, Result<StageResult, JoinError>)> = JoinSet::new();
        let max_parallel = self.config.max_parallel_stages.max(1);
        let mut aborted = false;

        loop {
            if !aborted && self.cancel.is_cancelled() {
                warn!("Cancellation requested, aborting pipeline");
                aborted = true;
            }

            if !aborted {
                for (i, stage) in stages.iter().enumerate() {
                    if running.len() >= max_parallel {
                        break;
                    }
                    if started[i] || !dependencies_settled(stage, &results, &index) {
                        continue;
                    }

                    started[i] = true;
                    let executor = self.executor;
                    let stage = stage.clone();
                    let action = actions[i].clone();
                    let stage_ctx = ctx.clone();
                    let prior: Vec<StageResult> =
                        results.iter().filter(|r| r.is_terminal()).cloned().collect();

                    // Inner task so a panicking stage still reports its slot
                    running.spawn(async move {
                        let task = tokio::spawn(async move {
                            executor.run(&stage, action.as_ref(), &stage_ctx, &prior).await
                        });
                        (i, task.await)
                    });
                }
            }

            let (i, result) = match running.join_next().await {
                None => break,
                Some(Ok((i, Ok(result)))) => (i, result),
                Some(Ok((i, Err(join_error)))) => {
                    error!("Stage {} task failed: {}", stages[i].name, join_error);
                    (i, crashed(&stages[i], ctx, &join_error.to_string()))
                }
                Some(Err(join_error)) => {
                    error!("Stage supervisor task failed: {}", join_error);
                    continue;
                }
            };

            if !aborted && should_abort(&stages[i], &result) {
                warn!(
                    "Stage {} ended {}; skipping stages not yet started",
                    stages[i].name, result.status
                );
                aborted = true;
            }
            results[i] = result;
        }

        if aborted {
            for result in results.iter_mut().filter(|r| r.status == StageStatus::Pending) {
                if let Err(e) = result.mark_skipped(ctx.clock.now(), ABORT_REASON) {
                    error!("Invalid stage transition: {}", e);
                }
            }
        }

        (results, aborted)
    }

    /// Runs the rollback action after a failed run, if one is configured
    async fn rollback(
        &self,
        plan: &StagePlan,
        ctx: &StageContext,
        results: &[StageResult],
    ) -> Option<StageResult> {
        if !self.config.rollback.is_enabled() {
            return None;
        }
        let action = self.registry.rollback.clone()?;
        if self.cancel.is_cancelled() {
            info!("Run was cancelled, not rolling back");
            return None;
        }

        warn!("Run failed, rolling back ({})", self.config.rollback);
        let stage = plan.rollback_stage();
        Some(self.executor.run(&stage, action.as_ref(), ctx, results).await)
    }
}

/// Every dependency has reached a terminal status
fn dependencies_settled(stage: &Stage, results: &[StageResult], index: &HashMap<&str, usize>) -> bool {
    stage.depends_on.iter().all(|dep| {
        index
            .get(dep.as_str())
            .map(|&i| results[i].is_terminal())
            .unwrap_or(true)
    })
}

fn should_abort(stage: &Stage, result: &StageResult) -> bool {
    match result.status {
        StageStatus::Cancelled => true,
        StageStatus::Failed => {
            let fatal = result
                .error
                .as_ref()
                .map(|e| e.kind == ErrorKind::Fatal)
                .unwrap_or(false);
            stage.required && (fatal || stage.retry_class == RetryClass::NoRetry)
        }
        _ => false,
    }
}

fn crashed(stage: &Stage, ctx: &StageContext, message: &str) -> StageResult {
    let mut result = StageResult::for_stage(stage);
    let now = ctx.clock.now();
    let marked = result.mark_running(now).and_then(|_| {
        result.mark_failed(
            now,
            1,
            ErrorDetail::new(ErrorKind::Fatal, format!("stage task crashed: {}", message)),
        )
    });
    if let Err(e) = marked {
        error!("Invalid stage transition: {}", e);
    }
    result
}
