//! Rollout Engine
//!
//! Runs the deployment pipeline for one environment profile.
//!
//! Architecture:
//! - Configuration: engine settings and profile overrides from the environment
//! - Plan: the stage DAG for a profile, validated and ordered
//! - Executor: one stage with timeout, retry, backoff and cleanup
//! - Orchestrator: runs the plan, applies the abort rules, builds the report
//! - Cache: content-addressed keys for dependency layers and build artifacts
//! - Probe: bounded readiness polling against the cluster or HTTP endpoints
//! - Stages: the actions behind provision, build, test, deploy and verify
//!
//! A run is cancelled through a shared [`CancellationToken`](tokio_util::sync::CancellationToken);
//! stages observe it during attempts, backoff sleeps and readiness waits.

pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod launch;
pub mod orchestrator;
pub mod plan;
pub mod probe;
pub mod report;
pub mod stages;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{CacheKeyResolver, CacheLookup, FsCacheStore, InMemoryCacheStore};
pub use config::{EngineConfig, ProfileOverrides, RollbackPolicy};
pub use context::StageContext;
pub use error::StageError;
pub use executor::{BackoffPolicy, StageAction, StageExecutor, StageOutput};
pub use launch::{Toolchain, plan_for, run_environment};
pub use orchestrator::{PipelineOrchestrator, RunState, StageRegistry};
pub use plan::StagePlan;
pub use probe::{ProbeOutcome, ReadinessProbe};
pub use report::{ReportWriter, load_report};
