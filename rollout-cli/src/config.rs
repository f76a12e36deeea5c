//! Configuration module
//!
//! Engine settings come from `ROLLOUT_*` environment variables; flags given
//! on the command line take precedence over them.

use anyhow::{Context, Result};
use clap::Args;
use rollout_engine::{EngineConfig, ProfileOverrides, RollbackPolicy};
use std::path::PathBuf;

/// Flags shared by commands that need the engine configuration
#[derive(Args, Debug, Clone, Default)]
pub struct Settings {
    /// Directory run reports are written to
    #[arg(long)]
    pub report_dir: Option<PathBuf>,

    /// Directory holding cache entries
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Directory holding the Kubernetes manifest templates
    #[arg(long)]
    pub manifests_dir: Option<PathBuf>,

    /// Terraform working directory
    #[arg(long)]
    pub infra_dir: Option<PathBuf>,

    /// Docker build context
    #[arg(long)]
    pub build_context: Option<PathBuf>,

    /// Independent stages allowed to run at the same time
    #[arg(long)]
    pub max_parallel: Option<usize>,

    /// Rollback after a failed run (disabled, undo-deployment, destroy-infrastructure)
    #[arg(long)]
    pub rollback: Option<String>,

    /// External URL checked after the in-cluster health check
    #[arg(long)]
    pub public_url: Option<String>,

    /// Overrides the profile's namespace
    #[arg(long)]
    pub namespace: Option<String>,

    /// Overrides the profile's replica count
    #[arg(long)]
    pub replicas: Option<u32>,

    /// Overrides the profile's image tag
    #[arg(long)]
    pub image_tag: Option<String>,
}

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub engine: EngineConfig,
    pub overrides: ProfileOverrides,
}

impl Config {
    /// Loads the configuration from the process environment
    pub fn load(settings: &Settings) -> Result<Self> {
        Self::from_lookup(settings, |name| std::env::var(name).ok())
    }

    pub fn from_lookup(
        settings: &Settings,
        lookup: impl Fn(&str) -> Option<String> + Copy,
    ) -> Result<Self> {
        let mut engine =
            EngineConfig::from_lookup(lookup).context("Failed to load engine configuration")?;
        let mut overrides =
            ProfileOverrides::from_lookup(lookup).context("Failed to load profile overrides")?;

        if let Some(dir) = &settings.report_dir {
            engine.report_dir = dir.clone();
        }
        if let Some(dir) = &settings.cache_dir {
            engine.cache_dir = dir.clone();
        }
        if let Some(dir) = &settings.manifests_dir {
            engine.manifests_dir = dir.clone();
        }
        if let Some(dir) = &settings.infra_dir {
            engine.infra_dir = dir.clone();
        }
        if let Some(dir) = &settings.build_context {
            engine.build_context = dir.clone();
        }
        if let Some(n) = settings.max_parallel {
            engine.max_parallel_stages = n;
        }
        if let Some(raw) = &settings.rollback {
            engine.rollback = raw
                .parse::<RollbackPolicy>()
                .with_context(|| format!("Invalid --rollback value: {}", raw))?;
        }
        if let Some(url) = &settings.public_url {
            engine.public_url = Some(url.clone());
        }

        if settings.namespace.is_some() {
            overrides.namespace = settings.namespace.clone();
        }
        if settings.replicas.is_some() {
            overrides.replicas = settings.replicas;
        }
        if settings.image_tag.is_some() {
            overrides.image_tag = settings.image_tag.clone();
        }

        engine.validate()?;
        Ok(Self { engine, overrides })
    }
}
