//! Rollout Tools
//!
//! Narrow interfaces to the external tools a deployment pipeline drives, and
//! CLI/HTTP backed implementations of them:
//! - [`InfraProvisioner`] (terraform)
//! - [`ContainerBuilder`] (docker)
//! - [`ClusterClient`] (kubectl)
//! - [`HealthClient`] for external HTTP health checks
//!
//! The engine depends only on the traits, so tests can substitute fakes.

pub mod builder;
pub mod cluster;
pub mod command;
pub mod error;
pub mod http;
pub mod provisioner;

// Re-export commonly used types
pub use builder::{BuildRequest, ContainerBuilder, DependencyInstall, DockerBuilder};
pub use cluster::{
    ClusterClient, ExecOutput, KubectlClient, PodRef, ResourceRef, ResourceSpec, ResourceState,
};
pub use error::{Result, ToolError};
pub use http::{HealthClient, HealthResponse};
pub use provisioner::{InfraProvisioner, ResourceEndpoints, TerraformProvisioner};
