//! Engine configuration
//!
//! Defines every tunable of a pipeline run: readiness polling, retry backoff,
//! stage parallelism, on-disk locations and the rollback policy. Values come
//! from `ROLLOUT_*` environment variables with defaults for everything.

use anyhow::Context as _;
use rollout_core::domain::profile::{Environment, EnvironmentProfile};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// What to do after a failed run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RollbackPolicy {
    /// Leave everything as the failed run left it
    #[default]
    Disabled,
    /// Delete the application deployment, keep infrastructure
    UndoDeployment,
    /// Destroy the environment's infrastructure (refused under deletion protection)
    DestroyInfrastructure,
}

impl RollbackPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RollbackPolicy::Disabled => "disabled",
            RollbackPolicy::UndoDeployment => "undo-deployment",
            RollbackPolicy::DestroyInfrastructure => "destroy-infrastructure",
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, RollbackPolicy::Disabled)
    }
}

impl fmt::Display for RollbackPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RollbackPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "disabled" | "none" => Ok(RollbackPolicy::Disabled),
            "undo-deployment" => Ok(RollbackPolicy::UndoDeployment),
            "destroy-infrastructure" => Ok(RollbackPolicy::DestroyInfrastructure),
            other => anyhow::bail!(
                "unknown rollback policy '{}' (expected disabled, undo-deployment or destroy-infrastructure)",
                other
            ),
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How often readiness conditions are polled
    pub poll_interval: Duration,

    /// How long a readiness wait may take before it times out
    pub readiness_timeout: Duration,

    /// First delay between attempts of a retried stage
    pub backoff_initial: Duration,

    /// Upper bound for the retry delay
    pub backoff_max: Duration,

    /// Independent stages allowed to run at the same time
    pub max_parallel_stages: usize,

    /// Where run reports are written
    pub report_dir: PathBuf,

    /// Where cache entries are stored
    pub cache_dir: PathBuf,

    /// Terraform working directory
    pub infra_dir: PathBuf,

    /// Directory holding the Kubernetes manifest templates
    pub manifests_dir: PathBuf,

    /// Docker build context (also the source tree that is fingerprinted)
    pub build_context: PathBuf,

    /// Health endpoint path of the application
    pub health_path: String,

    /// Overrides the profile's application port
    pub app_port: Option<u16>,

    /// External URL for an outside-in health check
    pub public_url: Option<String>,

    pub rollback: RollbackPolicy,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            readiness_timeout: Duration::from_secs(300), // 5 minutes
            backoff_initial: Duration::from_millis(1000),
            backoff_max: Duration::from_millis(30_000),
            max_parallel_stages: 1,
            report_dir: PathBuf::from("reports"),
            cache_dir: PathBuf::from(".rollout/cache"),
            infra_dir: PathBuf::from("terraform"),
            manifests_dir: PathBuf::from("k8s"),
            build_context: PathBuf::from("."),
            health_path: "/health".to_string(),
            app_port: None,
            public_url: None,
            rollback: RollbackPolicy::Disabled,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables (all optional):
    /// - ROLLOUT_POLL_INTERVAL (seconds, default: 10)
    /// - ROLLOUT_READINESS_TIMEOUT (seconds, default: 300)
    /// - ROLLOUT_BACKOFF_INITIAL_MS (default: 1000)
    /// - ROLLOUT_BACKOFF_MAX_MS (default: 30000)
    /// - ROLLOUT_MAX_PARALLEL_STAGES (default: 1)
    /// - ROLLOUT_REPORT_DIR, ROLLOUT_CACHE_DIR, ROLLOUT_INFRA_DIR,
    ///   ROLLOUT_MANIFESTS_DIR, ROLLOUT_BUILD_CONTEXT
    /// - ROLLOUT_HEALTH_PATH (default: /health)
    /// - ROLLOUT_APP_PORT, ROLLOUT_PUBLIC_URL
    /// - ROLLOUT_ROLLBACK (disabled | undo-deployment | destroy-infrastructure)
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`EngineConfig::from_env`] with an explicit variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::new();

        let secs = |name: &str, default: Duration| {
            lookup(name)
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        };
        let millis = |name: &str, default: Duration| {
            lookup(name)
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(default)
        };
        let path = |name: &str, default: PathBuf| lookup(name).map(PathBuf::from).unwrap_or(default);

        let max_parallel_stages = lookup("ROLLOUT_MAX_PARALLEL_STAGES")
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(defaults.max_parallel_stages);

        let app_port = match lookup("ROLLOUT_APP_PORT") {
            Some(raw) => Some(
                raw.parse::<u16>()
                    .with_context(|| format!("ROLLOUT_APP_PORT is not a valid port: {}", raw))?,
            ),
            None => None,
        };

        let rollback = match lookup("ROLLOUT_ROLLBACK") {
            Some(raw) => raw.parse()?,
            None => RollbackPolicy::Disabled,
        };

        Ok(Self {
            poll_interval: secs("ROLLOUT_POLL_INTERVAL", defaults.poll_interval),
            readiness_timeout: secs("ROLLOUT_READINESS_TIMEOUT", defaults.readiness_timeout),
            backoff_initial: millis("ROLLOUT_BACKOFF_INITIAL_MS", defaults.backoff_initial),
            backoff_max: millis("ROLLOUT_BACKOFF_MAX_MS", defaults.backoff_max),
            max_parallel_stages,
            report_dir: path("ROLLOUT_REPORT_DIR", defaults.report_dir),
            cache_dir: path("ROLLOUT_CACHE_DIR", defaults.cache_dir),
            infra_dir: path("ROLLOUT_INFRA_DIR", defaults.infra_dir),
            manifests_dir: path("ROLLOUT_MANIFESTS_DIR", defaults.manifests_dir),
            build_context: path("ROLLOUT_BUILD_CONTEXT", defaults.build_context),
            health_path: lookup("ROLLOUT_HEALTH_PATH").unwrap_or(defaults.health_path),
            app_port,
            public_url: lookup("ROLLOUT_PUBLIC_URL").filter(|s| !s.is_empty()),
            rollback,
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval.is_zero() {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        if self.readiness_timeout < self.poll_interval {
            anyhow::bail!("readiness_timeout must be at least one poll_interval");
        }

        if self.backoff_initial.is_zero() {
            anyhow::bail!("backoff_initial must be greater than 0");
        }

        if self.backoff_max < self.backoff_initial {
            anyhow::bail!("backoff_max must not be smaller than backoff_initial");
        }

        if self.max_parallel_stages == 0 {
            anyhow::bail!("max_parallel_stages must be greater than 0");
        }

        if !self.health_path.starts_with('/') {
            anyhow::bail!("health_path must start with '/'");
        }

        if self.app_port == Some(0) {
            anyhow::bail!("app_port must be between 1 and 65535");
        }

        if let Some(url) = &self.public_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("public_url must start with http:// or https://");
            }
        }

        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Profile values that may be overridden before a run starts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileOverrides {
    pub namespace: Option<String>,
    pub replicas: Option<u32>,
    pub image_tag: Option<String>,
    pub backup_retention_days: Option<u32>,
    pub app_port: Option<u16>,
}

impl ProfileOverrides {
    /// Reads ROLLOUT_NAMESPACE, ROLLOUT_REPLICAS, ROLLOUT_IMAGE_TAG and
    /// ROLLOUT_BACKUP_RETENTION_DAYS
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let number = |name: &str| -> anyhow::Result<Option<u32>> {
            match lookup(name) {
                Some(raw) => Ok(Some(
                    raw.parse::<u32>()
                        .with_context(|| format!("{} is not a number: {}", name, raw))?,
                )),
                None => Ok(None),
            }
        };

        Ok(Self {
            namespace: lookup("ROLLOUT_NAMESPACE").filter(|s| !s.is_empty()),
            replicas: number("ROLLOUT_REPLICAS")?,
            image_tag: lookup("ROLLOUT_IMAGE_TAG").filter(|s| !s.is_empty()),
            backup_retention_days: number("ROLLOUT_BACKUP_RETENTION_DAYS")?,
            app_port: None,
        })
    }

    pub fn apply(&self, mut profile: EnvironmentProfile) -> EnvironmentProfile {
        if let Some(namespace) = &self.namespace {
            profile.namespace = namespace.clone();
        }
        if let Some(replicas) = self.replicas {
            profile.sizing.replicas = replicas;
        }
        if let Some(tag) = &self.image_tag {
            profile.image_tag = tag.clone();
        }
        if let Some(days) = self.backup_retention_days {
            profile.retention.backup_days = days;
        }
        if let Some(port) = self.app_port {
            profile.app_port = port;
        }
        profile
    }
}

/// Resolves an environment name to a validated profile
///
/// Unknown names are rejected rather than falling back to development.
pub fn load_profile(
    environment: &str,
    overrides: &ProfileOverrides,
) -> anyhow::Result<EnvironmentProfile> {
    let environment: Environment = environment
        .parse()
        .with_context(|| format!("cannot select a profile for '{}'", environment))?;

    let profile = overrides.apply(EnvironmentProfile::for_environment(environment));
    profile
        .validate()
        .with_context(|| format!("invalid {} profile", environment))?;

    Ok(profile)
}
