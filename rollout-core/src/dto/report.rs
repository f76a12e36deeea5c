//! Report summary DTO

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::profile::Environment;
use crate::domain::report::{PipelineReport, PipelineStatus, RunOutcome};
use crate::domain::result::StageStatus;

/// Condensed view of a report for listings and one-line status output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub run_id: Uuid,
    pub environment: Environment,
    pub status: PipelineStatus,
    pub outcome: RunOutcome,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub skipped: usize,
    /// Attempts across all stages; more attempts than stages means retries happened
    pub total_attempts: u32,
    pub retries: u32,
    pub duration_ms: i64,
    pub generated_at: DateTime<Utc>,
}

impl From<&PipelineReport> for ReportSummary {
    fn from(report: &PipelineReport) -> Self {
        let count = |status: StageStatus| report.stages_with_status(status).count();
        let total_attempts: u32 = report.stages.iter().map(|s| s.attempts).sum();
        let retries: u32 = report
            .stages
            .iter()
            .map(|s| s.attempts.saturating_sub(1))
            .sum();

        Self {
            run_id: report.run_id,
            environment: report.environment,
            status: report.status,
            outcome: report.outcome,
            total: report.stages.len(),
            succeeded: count(StageStatus::Succeeded),
            failed: count(StageStatus::Failed),
            cancelled: count(StageStatus::Cancelled),
            skipped: count(StageStatus::Skipped),
            total_attempts,
            retries,
            duration_ms: (report.generated_at - report.started_at).num_milliseconds(),
            generated_at: report.generated_at,
        }
    }
}
