//! Infrastructure provisioner
//!
//! Drives `terraform` to converge an environment's infrastructure. Every
//! environment lives in its own terraform workspace and variable file, so
//! re-applying an unchanged profile is a no-op plan.

use async_trait::async_trait;
use rollout_core::domain::profile::EnvironmentProfile;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::info;

use crate::command::{args, run_checked};
use crate::error::{Result, ToolError};

/// Outputs published by the provisioner (cluster endpoint, registry URL, ...)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceEndpoints {
    pub values: BTreeMap<String, String>,
}

impl ResourceEndpoints {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn cluster_endpoint(&self) -> Option<&str> {
        self.get("cluster_endpoint")
    }

    pub fn registry_url(&self) -> Option<&str> {
        self.get("ecr_repository_url")
            .or_else(|| self.get("registry_url"))
    }
}

/// Capability set for provisioning an environment's infrastructure
///
/// Implementations must be idempotent: applying an already-applied profile
/// converges without creating duplicates.
#[async_trait]
pub trait InfraProvisioner: Send + Sync {
    async fn apply(&self, profile: &EnvironmentProfile) -> Result<ResourceEndpoints>;

    async fn destroy(&self, profile: &EnvironmentProfile) -> Result<()>;
}

/// Terraform-backed provisioner
#[derive(Debug, Clone)]
pub struct TerraformProvisioner {
    binary: String,
    working_dir: PathBuf,
}

impl TerraformProvisioner {
    /// # Arguments
    /// * `working_dir` - Directory holding the terraform root module and
    ///   one `<environment>.tfvars` file per environment
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: "terraform".to_string(),
            working_dir: working_dir.into(),
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    fn chdir(&self) -> String {
        format!("-chdir={}", self.working_dir.display())
    }

    async fn terraform(&self, mut rest: Vec<String>) -> Result<String> {
        let mut argv = vec![self.chdir()];
        argv.append(&mut rest);
        let output = run_checked(&self.binary, &argv, None, None).await?;
        Ok(output.stdout)
    }

    async fn prepare(&self, profile: &EnvironmentProfile) -> Result<()> {
        self.terraform(args(["init", "-input=false", "-no-color"]))
            .await?;
        self.terraform(args([
            "workspace",
            "select",
            "-or-create",
            profile.environment.as_str(),
        ]))
        .await?;
        Ok(())
    }
}

/// Variables passed to terraform for a profile
pub fn terraform_vars(profile: &EnvironmentProfile) -> Vec<String> {
    let vars = [
        ("environment", profile.environment.as_str().to_string()),
        ("namespace", profile.namespace.clone()),
        (
            "node_instance_type",
            profile.sizing.node_instance_class.clone(),
        ),
        ("node_count", profile.sizing.node_count.to_string()),
        (
            "multi_az",
            profile.sizing.high_availability.to_string(),
        ),
        (
            "backup_retention_days",
            profile.retention.backup_days.to_string(),
        ),
        ("log_retention_days", profile.retention.log_days.to_string()),
        (
            "deletion_protection",
            profile.deletion_protection.to_string(),
        ),
    ];

    vars.iter()
        .map(|(name, value)| format!("-var={}={}", name, value))
        .collect()
}

/// Parses `terraform output -json`, dropping sensitive values
pub fn parse_terraform_outputs(json: &str) -> Result<ResourceEndpoints> {
    let parsed: BTreeMap<String, JsonValue> =
        serde_json::from_str(json).map_err(|e| ToolError::parse_error("terraform outputs", e))?;

    let mut values = BTreeMap::new();
    for (name, output) in parsed {
        if output.get("sensitive").and_then(JsonValue::as_bool) == Some(true) {
            continue;
        }
        let value = match output.get("value") {
            Some(JsonValue::String(s)) => s.clone(),
            Some(JsonValue::Null) | None => continue,
            Some(other) => other.to_string(),
        };
        values.insert(name, value);
    }

    Ok(ResourceEndpoints { values })
}

#[async_trait]
impl InfraProvisioner for TerraformProvisioner {
    async fn apply(&self, profile: &EnvironmentProfile) -> Result<ResourceEndpoints> {
        info!(
            "Applying infrastructure for {} in {}",
            profile.environment,
            self.working_dir.display()
        );

        self.prepare(profile).await?;

        let mut apply = args([
            "apply",
            "-auto-approve",
            "-input=false",
            "-no-color",
        ]);
        apply.push(format!("-var-file={}.tfvars", profile.environment));
        apply.extend(terraform_vars(profile));
        self.terraform(apply).await?;

        let outputs = self.terraform(args(["output", "-json"])).await?;
        let endpoints = parse_terraform_outputs(&outputs)?;

        info!(
            "Infrastructure for {} converged ({} outputs)",
            profile.environment,
            endpoints.values.len()
        );
        Ok(endpoints)
    }

    async fn destroy(&self, profile: &EnvironmentProfile) -> Result<()> {
        info!("Destroying infrastructure for {}", profile.environment);

        self.prepare(profile).await?;

        let mut destroy = args(["destroy", "-auto-approve", "-input=false", "-no-color"]);
        destroy.push(format!("-var-file={}.tfvars", profile.environment));
        destroy.extend(terraform_vars(profile));
        self.terraform(destroy).await?;

        Ok(())
    }
}
