//! Stage domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Well-known stage names
pub mod names {
    pub const PROVISION: &str = "provision";
    pub const BUILD: &str = "build";
    pub const TEST: &str = "test";
    pub const DEPLOY: &str = "deploy";
    pub const VERIFY: &str = "verify";
    pub const BACKUP_RETENTION: &str = "backup-retention";
    pub const HA_VERIFY: &str = "ha-verify";
    pub const ROLLBACK: &str = "rollback";
}

/// Idempotency classification of a stage
///
/// Decides whether a failed attempt may be re-run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetryClass {
    /// Re-running the stage converges to the same state
    SafeToRetry,
    /// Re-running is safe once the stage's cleanup has removed partial state
    RetryWithCleanup,
    /// A failure is final and aborts the pipeline
    NoRetry,
}

impl RetryClass {
    pub fn allows_retry(&self) -> bool {
        !matches!(self, RetryClass::NoRetry)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RetryClass::SafeToRetry => "safe-to-retry",
            RetryClass::RetryWithCleanup => "retry-with-cleanup",
            RetryClass::NoRetry => "no-retry",
        }
    }
}

impl fmt::Display for RetryClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One discrete, orderable unit of pipeline work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,

    /// Position in the pipeline; consistent with the dependency graph
    pub ordinal: u32,

    /// Stages that must have succeeded before this one runs
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Upper bound for a single attempt, readiness waits included
    pub timeout_seconds: u64,

    /// Maximum number of attempts (the first run counts as one)
    pub max_retries: u32,

    pub retry_class: RetryClass,

    /// Required stages decide the overall pipeline status
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl Stage {
    /// Creates a required stage with no dependencies, a single attempt and
    /// a ten minute timeout
    pub fn new(name: impl Into<String>, ordinal: u32) -> Self {
        Self {
            name: name.into(),
            ordinal,
            depends_on: Vec::new(),
            timeout_seconds: 600,
            max_retries: 1,
            retry_class: RetryClass::NoRetry,
            required: true,
        }
    }

    pub fn depends_on(mut self, stage: impl Into<String>) -> Self {
        self.depends_on.push(stage.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_seconds = timeout.as_secs().max(1);
        self
    }

    pub fn with_retries(mut self, class: RetryClass, max_retries: u32) -> Self {
        self.retry_class = class;
        self.max_retries = max_retries;
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Total attempts the executor may make for this stage
    pub fn max_attempts(&self) -> u32 {
        if self.retry_class.allows_retry() {
            self.max_retries.max(1)
        } else {
            1
        }
    }
}
