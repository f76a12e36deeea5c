//! Stage result domain types
//!
//! A `StageResult` is created `Pending` when the stage list is built and only
//! ever moves forward: `Pending -> Running -> {Succeeded, Failed, Cancelled}`
//! or `Pending -> Skipped`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::stage::Stage;

/// Stage execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    Skipped,
}

impl StageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StageStatus::Succeeded
                | StageStatus::Failed
                | StageStatus::Cancelled
                | StageStatus::Skipped
        )
    }

    fn can_transition_to(&self, next: StageStatus) -> bool {
        match (self, next) {
            (StageStatus::Pending, StageStatus::Running) => true,
            (StageStatus::Pending, StageStatus::Skipped) => true,
            (StageStatus::Running, StageStatus::Succeeded) => true,
            (StageStatus::Running, StageStatus::Failed) => true,
            (StageStatus::Running, StageStatus::Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageStatus::Pending => write!(f, "Pending"),
            StageStatus::Running => write!(f, "Running"),
            StageStatus::Succeeded => write!(f, "Succeeded"),
            StageStatus::Failed => write!(f, "Failed"),
            StageStatus::Cancelled => write!(f, "Cancelled"),
            StageStatus::Skipped => write!(f, "Skipped"),
        }
    }
}

/// Outcome of the cache lookup performed by a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheOutcome {
    Hit,
    /// A restore-key prefix matched but the exact key did not
    PartialHit,
    Miss,
    NotApplicable,
}

impl fmt::Display for CacheOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheOutcome::Hit => write!(f, "hit"),
            CacheOutcome::PartialHit => write!(f, "partial-hit"),
            CacheOutcome::Miss => write!(f, "miss"),
            CacheOutcome::NotApplicable => write!(f, "n/a"),
        }
    }
}

/// Error classification recorded in the report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    DependencyUnmet,
    Transient,
    Fatal,
    TimedOut,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::DependencyUnmet => write!(f, "DependencyUnmet"),
            ErrorKind::Transient => write!(f, "Transient"),
            ErrorKind::Fatal => write!(f, "Fatal"),
            ErrorKind::TimedOut => write!(f, "TimedOut"),
            ErrorKind::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Last error observed for a stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorDetail {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Rejected attempt to move a result backwards or sideways
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTransition {
    pub stage: String,
    pub from: StageStatus,
    pub to: StageStatus,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "stage '{}' cannot move from {} to {}",
            self.stage, self.from, self.to
        )
    }
}

impl std::error::Error for InvalidTransition {}

/// Outcome of one stage within a pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: String,
    pub status: StageStatus,
    /// Whether this stage counts toward the overall pipeline status
    #[serde(default = "default_required")]
    pub required: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub error: Option<ErrorDetail>,
    pub skip_reason: Option<String>,
    pub cache: CacheOutcome,
}

fn default_required() -> bool {
    true
}

impl StageResult {
    pub fn pending(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            status: StageStatus::Pending,
            required: true,
            started_at: None,
            finished_at: None,
            attempts: 0,
            error: None,
            skip_reason: None,
            cache: CacheOutcome::NotApplicable,
        }
    }

    /// Pending result for a planned stage
    pub fn for_stage(stage: &Stage) -> Self {
        Self {
            required: stage.required,
            ..Self::pending(stage.name.clone())
        }
    }

    fn transition(&mut self, next: StageStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                stage: self.stage.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn mark_running(&mut self, at: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.transition(StageStatus::Running)?;
        self.started_at = Some(at);
        Ok(())
    }

    pub fn mark_succeeded(
        &mut self,
        at: DateTime<Utc>,
        attempts: u32,
        cache: CacheOutcome,
    ) -> Result<(), InvalidTransition> {
        self.transition(StageStatus::Succeeded)?;
        self.finished_at = Some(at);
        self.attempts = attempts;
        self.cache = cache;
        Ok(())
    }

    pub fn mark_failed(
        &mut self,
        at: DateTime<Utc>,
        attempts: u32,
        error: ErrorDetail,
    ) -> Result<(), InvalidTransition> {
        self.transition(StageStatus::Failed)?;
        self.finished_at = Some(at);
        self.attempts = attempts;
        self.error = Some(error);
        Ok(())
    }

    pub fn mark_cancelled(
        &mut self,
        at: DateTime<Utc>,
        attempts: u32,
        error: ErrorDetail,
    ) -> Result<(), InvalidTransition> {
        self.transition(StageStatus::Cancelled)?;
        self.finished_at = Some(at);
        self.attempts = attempts;
        self.error = Some(error);
        Ok(())
    }

    pub fn mark_skipped(
        &mut self,
        at: DateTime<Utc>,
        reason: impl Into<String>,
    ) -> Result<(), InvalidTransition> {
        self.transition(StageStatus::Skipped)?;
        self.finished_at = Some(at);
        self.skip_reason = Some(reason.into());
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Wall time spent running, if the stage ran
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        let now = Utc::now();
        let mut result = StageResult::pending("build");
        result.mark_running(now).unwrap();
        result.mark_succeeded(now, 2, CacheOutcome::Hit).unwrap();

        assert_eq!(result.status, StageStatus::Succeeded);
        assert_eq!(result.attempts, 2);
        assert_eq!(result.cache, CacheOutcome::Hit);
        assert!(result.is_terminal());
    }

    #[test]
    fn test_backward_transition_rejected() {
        let now = Utc::now();
        let mut result = StageResult::pending("deploy");
        result.mark_running(now).unwrap();
        result
            .mark_failed(now, 1, ErrorDetail::new(ErrorKind::Fatal, "denied"))
            .unwrap();

        let err = result.mark_running(now).unwrap_err();
        assert_eq!(err.from, StageStatus::Failed);
        assert_eq!(err.to, StageStatus::Running);
        assert_eq!(result.status, StageStatus::Failed);
    }

    #[test]
    fn test_skip_only_from_pending() {
        let now = Utc::now();
        let mut result = StageResult::pending("verify");
        result.mark_skipped(now, "dependency-not-met: deploy").unwrap();
        assert_eq!(result.status, StageStatus::Skipped);
        assert!(result.started_at.is_none());

        let mut running = StageResult::pending("verify");
        running.mark_running(now).unwrap();
        assert!(running.mark_skipped(now, "late").is_err());
    }

    #[test]
    fn test_duration_requires_both_timestamps() {
        let start = Utc::now();
        let mut result = StageResult::pending("test");
        assert!(result.duration().is_none());

        result.mark_running(start).unwrap();
        let end = start + chrono::Duration::seconds(5);
        result.mark_succeeded(end, 1, CacheOutcome::Miss).unwrap();
        assert_eq!(result.duration(), Some(chrono::Duration::seconds(5)));
    }
}
