//! Container image builder
//!
//! Drives `docker build` for the multi-stage application Dockerfile. The
//! engine decides how much of the dependency install can be reused and passes
//! that decision in the request; the builder only forwards it.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::info;

use crate::command::run_checked;
use crate::error::Result;

/// How the dependency layer should be produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyInstall {
    /// Dependencies unchanged: reuse the cached layer as-is
    Reuse,
    /// Restore an older cache, then install only what changed
    Restore { from_key: String },
    /// Install everything from scratch
    Full,
}

impl DependencyInstall {
    pub fn as_build_arg(&self) -> &'static str {
        match self {
            DependencyInstall::Reuse => "reuse",
            DependencyInstall::Restore { .. } => "restore",
            DependencyInstall::Full => "full",
        }
    }
}

/// A single image build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    /// Dockerfile target stage (e.g., "production", "test")
    pub target: String,

    /// Image reference to tag the result with
    pub image: String,

    pub build_args: BTreeMap<String, String>,

    /// Cache key the resulting layers are published under
    pub cache_key: Option<String>,

    pub install: DependencyInstall,

    pub context_dir: PathBuf,

    pub dockerfile: PathBuf,
}

/// Capability set for building container images
#[async_trait]
pub trait ContainerBuilder: Send + Sync {
    /// Builds the requested target and returns the image reference
    async fn build(&self, request: &BuildRequest) -> Result<String>;
}

/// Docker CLI backed builder
#[derive(Debug, Clone)]
pub struct DockerBuilder {
    binary: String,
}

impl DockerBuilder {
    pub fn new() -> Self {
        Self {
            binary: "docker".to_string(),
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }
}

impl Default for DockerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Assembles the `docker build` argument list for a request
pub fn docker_build_args(request: &BuildRequest) -> Vec<String> {
    let mut argv = vec![
        "build".to_string(),
        "--target".to_string(),
        request.target.clone(),
        "--file".to_string(),
        request.dockerfile.display().to_string(),
        "--tag".to_string(),
        request.image.clone(),
    ];

    for (name, value) in &request.build_args {
        argv.push("--build-arg".to_string());
        argv.push(format!("{}={}", name, value));
    }

    argv.push("--build-arg".to_string());
    argv.push(format!(
        "DEPENDENCY_INSTALL={}",
        request.install.as_build_arg()
    ));

    match &request.install {
        DependencyInstall::Full => {}
        DependencyInstall::Reuse | DependencyInstall::Restore { .. } => {
            argv.push("--cache-from".to_string());
            argv.push(request.image.clone());
        }
    }

    if let Some(key) = &request.cache_key {
        argv.push("--label".to_string());
        argv.push(format!("rollout.cache-key={}", key));
    }

    argv.push(request.context_dir.display().to_string());
    argv
}

#[async_trait]
impl ContainerBuilder for DockerBuilder {
    async fn build(&self, request: &BuildRequest) -> Result<String> {
        info!(
            "Building target '{}' as {} (dependencies: {})",
            request.target,
            request.image,
            request.install.as_build_arg()
        );

        run_checked(&self.binary, &docker_build_args(request), None, None).await?;

        info!("Built image {}", request.image);
        Ok(request.image.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(install: DependencyInstall) -> BuildRequest {
        let mut build_args = BTreeMap::new();
        build_args.insert("APP_ENV".to_string(), "development".to_string());
        BuildRequest {
            target: "production".to_string(),
            image: "devops-demo:dev".to_string(),
            build_args,
            cache_key: Some("layers-abc".to_string()),
            install,
            context_dir: PathBuf::from("."),
            dockerfile: PathBuf::from("Dockerfile"),
        }
    }

    #[test]
    fn test_full_install_skips_cache_from() {
        let argv = docker_build_args(&request(DependencyInstall::Full));
        assert!(!argv.contains(&"--cache-from".to_string()));
        assert!(argv.contains(&"DEPENDENCY_INSTALL=full".to_string()));
        assert_eq!(argv.last().map(String::as_str), Some("."));
    }

    #[test]
    fn test_reuse_uses_cache_from_and_label() {
        let argv = docker_build_args(&request(DependencyInstall::Reuse));
        assert!(argv.contains(&"--cache-from".to_string()));
        assert!(argv.contains(&"DEPENDENCY_INSTALL=reuse".to_string()));
        assert!(argv.contains(&"rollout.cache-key=layers-abc".to_string()));
        assert!(argv.contains(&"APP_ENV=development".to_string()));
    }
}
