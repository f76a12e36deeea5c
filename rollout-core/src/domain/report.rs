//! Pipeline report domain types
//!
//! The report is the one artifact emitted on every run, success or failure.
//! Once finalized it is never modified.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::profile::{Environment, EnvironmentProfile};
use crate::domain::result::{StageResult, StageStatus};

/// Aggregate status of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineStatus {
    Succeeded,
    Failed,
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineStatus::Succeeded => write!(f, "Succeeded"),
            PipelineStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// How the run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    /// Every stage reached a terminal status through normal execution
    Completed,
    /// A fatal failure or cancellation stopped the run early
    Aborted,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Completed => write!(f, "Completed"),
            RunOutcome::Aborted => write!(f, "Aborted"),
        }
    }
}

/// Finalized record of a pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub environment: Environment,
    pub namespace: String,
    pub status: PipelineStatus,
    pub outcome: RunOutcome,
    /// Stage results in plan order
    pub stages: Vec<StageResult>,
    pub started_at: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
}

impl PipelineReport {
    /// Builds the final report and derives its overall status
    pub fn finalize(
        run_id: Uuid,
        profile: &EnvironmentProfile,
        started_at: DateTime<Utc>,
        stages: Vec<StageResult>,
        outcome: RunOutcome,
        generated_at: DateTime<Utc>,
    ) -> Self {
        let status = Self::overall_status(&stages, outcome);
        Self {
            run_id,
            environment: profile.environment,
            namespace: profile.namespace.clone(),
            status,
            outcome,
            stages,
            started_at,
            generated_at,
        }
    }

    /// Succeeded only if the run completed and every required stage succeeded
    pub fn overall_status(stages: &[StageResult], outcome: RunOutcome) -> PipelineStatus {
        let required_ok = stages
            .iter()
            .filter(|s| s.required)
            .all(|s| s.status == StageStatus::Succeeded);

        if outcome == RunOutcome::Completed && required_ok && !stages.is_empty() {
            PipelineStatus::Succeeded
        } else {
            PipelineStatus::Failed
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == PipelineStatus::Succeeded
    }

    /// Process exit code for the run: 0 on success, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.succeeded() { 0 } else { 1 }
    }

    pub fn stage(&self, name: &str) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.stage == name)
    }

    pub fn stages_with_status(&self, status: StageStatus) -> impl Iterator<Item = &StageResult> {
        self.stages.iter().filter(move |s| s.status == status)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::result::{CacheOutcome, ErrorDetail, ErrorKind};

    fn succeeded(name: &str) -> StageResult {
        let now = Utc::now();
        let mut result = StageResult::pending(name);
        result.mark_running(now).unwrap();
        result.mark_succeeded(now, 1, CacheOutcome::NotApplicable).unwrap();
        result
    }

    #[test]
    fn test_all_required_succeeded() {
        let stages = vec![succeeded("provision"), succeeded("build")];
        assert_eq!(
            PipelineReport::overall_status(&stages, RunOutcome::Completed),
            PipelineStatus::Succeeded
        );
        assert_eq!(
            PipelineReport::overall_status(&stages, RunOutcome::Aborted),
            PipelineStatus::Failed
        );
    }

    #[test]
    fn test_optional_stage_does_not_fail_run() {
        let now = Utc::now();
        let mut optional = StageResult::pending("ha-verify");
        optional.required = false;
        optional.mark_running(now).unwrap();
        optional
            .mark_failed(now, 1, ErrorDetail::new(ErrorKind::Transient, "flaky"))
            .unwrap();

        let stages = vec![succeeded("deploy"), optional];
        assert_eq!(
            PipelineReport::overall_status(&stages, RunOutcome::Completed),
            PipelineStatus::Succeeded
        );
    }

    #[test]
    fn test_skipped_required_stage_fails_run() {
        let mut skipped = StageResult::pending("verify");
        skipped.mark_skipped(Utc::now(), "dependency-not-met: deploy").unwrap();

        let stages = vec![succeeded("deploy"), skipped];
        assert_eq!(
            PipelineReport::overall_status(&stages, RunOutcome::Completed),
            PipelineStatus::Failed
        );
    }

    #[test]
    fn test_report_json_roundtrip_and_exit_code() {
        let profile = EnvironmentProfile::development();
        let now = Utc::now();
        let report = PipelineReport::finalize(
            Uuid::new_v4(),
            &profile,
            now,
            vec![succeeded("provision")],
            RunOutcome::Completed,
            now,
        );

        assert_eq!(report.exit_code(), 0);
        let json = report.to_json_pretty().unwrap();
        assert!(json.contains("\"environment\": \"development\""));
        let parsed = PipelineReport::from_json(&json).unwrap();
        assert_eq!(parsed, report);
    }
}
