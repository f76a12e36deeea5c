//! Cluster client
//!
//! Drives `kubectl` for manifest application, resource inspection and
//! in-pod command execution. Manifests are templates with `${NAME}`
//! placeholders, rendered locally and piped to `kubectl apply -f -`.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::command::{run, run_checked};
use crate::error::{Result, ToolError};

/// Reference to a namespaced Kubernetes resource
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    /// Lowercase kind as understood by kubectl (e.g., "deployment")
    pub kind: String,
    pub name: String,
    pub namespace: String,
}

impl ResourceRef {
    pub fn new(
        kind: impl Into<String>,
        name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into().to_lowercase(),
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Cluster-scoped kinds take no `-n` flag
    pub fn is_cluster_scoped(&self) -> bool {
        matches!(
            self.kind.as_str(),
            "namespace" | "clusterrole" | "clusterrolebinding" | "storageclass"
        )
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_cluster_scoped() {
            write!(f, "{}/{}", self.kind, self.name)
        } else {
            write!(f, "{}/{} (ns {})", self.kind, self.name, self.namespace)
        }
    }
}

/// A manifest to apply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSpec {
    pub resource: ResourceRef,

    /// Path to the manifest template
    pub manifest: PathBuf,

    /// Template text of this resource's document; the whole file is applied when unset
    pub template: Option<String>,

    /// Values substituted for `${NAME}` placeholders
    pub variables: BTreeMap<String, String>,
}

/// Observed state of a resource
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceState {
    pub exists: bool,
    pub desired_replicas: u32,
    pub ready_replicas: u32,
    pub available_replicas: u32,
    /// Replicas already running the latest pod template
    pub updated_replicas: u32,
    /// `status.observedGeneration` has caught up with `metadata.generation`
    pub generation_observed: bool,
}

impl ResourceState {
    pub fn absent() -> Self {
        Self::default()
    }

    /// Existing workload whose latest spec has been observed and rolled out
    /// to every replica; `ready` and `available` are reported as given
    pub fn replicas(desired: u32, ready: u32, available: u32) -> Self {
        Self {
            exists: true,
            desired_replicas: desired,
            ready_replicas: ready,
            available_replicas: available,
            updated_replicas: desired,
            generation_observed: true,
        }
    }

    /// The latest spec is fully rolled out and every desired replica is available
    pub fn is_rolled_out(&self) -> bool {
        self.exists
            && self.generation_observed
            && self.desired_replicas > 0
            && self.updated_replicas >= self.desired_replicas
            && self.available_replicas >= self.desired_replicas
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.exists {
            return write!(f, "not found");
        }
        if !self.generation_observed {
            return write!(f, "new spec not yet observed");
        }
        if self.updated_replicas < self.desired_replicas {
            return write!(
                f,
                "{}/{} replicas updated, {} available",
                self.updated_replicas, self.desired_replicas, self.available_replicas
            );
        }
        write!(
            f,
            "{}/{} replicas available ({} ready)",
            self.available_replicas, self.desired_replicas, self.ready_replicas
        )
    }
}

/// Pod (or workload whose pod should be picked) for `exec`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodRef {
    pub namespace: String,
    /// `pod/<name>` or a workload such as `deployment/app`
    pub target: String,
    pub container: Option<String>,
}

/// Output of a command executed inside a pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Capability set for talking to the cluster
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn apply_manifest(&self, spec: &ResourceSpec) -> Result<()>;

    /// Current state of a resource; a missing resource is `exists = false`
    async fn get_condition(&self, resource: &ResourceRef) -> Result<ResourceState>;

    /// Runs a command in a pod; a non-zero exit is reported, not raised
    async fn exec_in_pod(&self, pod: &PodRef, command: &[String]) -> Result<ExecOutput>;

    /// Deletes a resource, succeeding if it is already gone
    async fn delete_resource(&self, resource: &ResourceRef) -> Result<()>;
}

/// kubectl backed cluster client
#[derive(Debug, Clone)]
pub struct KubectlClient {
    binary: String,
    context: Option<String>,
}

impl KubectlClient {
    pub fn new() -> Self {
        Self {
            binary: "kubectl".to_string(),
            context: None,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    fn base_args(&self) -> Vec<String> {
        match &self.context {
            Some(ctx) => vec!["--context".to_string(), ctx.clone()],
            None => Vec::new(),
        }
    }

    fn namespace_args(resource: &ResourceRef) -> Vec<String> {
        if resource.is_cluster_scoped() {
            Vec::new()
        } else {
            vec!["-n".to_string(), resource.namespace.clone()]
        }
    }
}

impl Default for KubectlClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Substitutes `${NAME}` placeholders
///
/// Unknown placeholders are left untouched so kubectl validation reports them.
pub fn render_manifest(template: &str, variables: &BTreeMap<String, String>) -> String {
    let mut rendered = template.to_string();
    for (name, value) in variables {
        rendered = rendered.replace(&format!("${{{}}}", name), value);
    }
    rendered
}

/// Parses `kubectl get -o json` output into a resource state
///
/// Workloads report replica counts; other kinds only report existence.
pub fn parse_resource_state(json: &str) -> Result<ResourceState> {
    let value: JsonValue =
        serde_json::from_str(json).map_err(|e| ToolError::parse_error("resource JSON", e))?;

    let count = |v: Option<&JsonValue>| v.and_then(JsonValue::as_u64).unwrap_or(0) as u32;

    let spec = value.get("spec");
    let status = value.get("status");

    // Kinds without a controller status have nothing left to observe
    let generation = value
        .get("metadata")
        .and_then(|m| m.get("generation"))
        .and_then(JsonValue::as_u64);
    let observed = status
        .and_then(|s| s.get("observedGeneration"))
        .and_then(JsonValue::as_u64);
    let generation_observed = match (generation, observed, status) {
        (Some(generation), Some(observed), _) => observed >= generation,
        (Some(_), None, Some(_)) => false,
        _ => true,
    };

    Ok(ResourceState {
        exists: true,
        desired_replicas: count(spec.and_then(|s| s.get("replicas"))),
        ready_replicas: count(status.and_then(|s| s.get("readyReplicas"))),
        available_replicas: count(status.and_then(|s| s.get("availableReplicas"))),
        updated_replicas: count(status.and_then(|s| s.get("updatedReplicas"))),
        generation_observed,
    })
}

#[async_trait]
impl ClusterClient for KubectlClient {
    async fn apply_manifest(&self, spec: &ResourceSpec) -> Result<()> {
        let template = match &spec.template {
            Some(template) => template.clone(),
            None => tokio::fs::read_to_string(&spec.manifest)
                .await
                .map_err(|e| {
                    ToolError::InvalidConfig(format!(
                        "cannot read manifest {}: {}",
                        spec.manifest.display(),
                        e
                    ))
                })?,
        };
        let rendered = render_manifest(&template, &spec.variables);

        let mut argv = self.base_args();
        argv.extend(["apply".to_string(), "-f".to_string(), "-".to_string()]);
        argv.extend(Self::namespace_args(&spec.resource));

        run_checked(&self.binary, &argv, Some(&rendered), None).await?;

        info!("Applied {}", spec.resource);
        Ok(())
    }

    async fn get_condition(&self, resource: &ResourceRef) -> Result<ResourceState> {
        let mut argv = self.base_args();
        argv.extend([
            "get".to_string(),
            resource.kind.clone(),
            resource.name.clone(),
            "-o".to_string(),
            "json".to_string(),
        ]);
        argv.extend(Self::namespace_args(resource));

        match run_checked(&self.binary, &argv, None, None).await {
            Ok(output) => parse_resource_state(&output.stdout),
            Err(e) if e.is_not_found() => {
                debug!("{} not found yet", resource);
                Ok(ResourceState::absent())
            }
            Err(e) => Err(e),
        }
    }

    async fn exec_in_pod(&self, pod: &PodRef, command: &[String]) -> Result<ExecOutput> {
        let mut argv = self.base_args();
        argv.extend([
            "exec".to_string(),
            "-n".to_string(),
            pod.namespace.clone(),
            pod.target.clone(),
        ]);
        if let Some(container) = &pod.container {
            argv.push("-c".to_string());
            argv.push(container.clone());
        }
        argv.push("--".to_string());
        argv.extend(command.iter().cloned());

        let output = run(&self.binary, &argv, None, None).await?;

        Ok(ExecOutput {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.exit_code,
        })
    }

    async fn delete_resource(&self, resource: &ResourceRef) -> Result<()> {
        let mut argv = self.base_args();
        argv.extend([
            "delete".to_string(),
            resource.kind.clone(),
            resource.name.clone(),
            "--ignore-not-found".to_string(),
        ]);
        argv.extend(Self::namespace_args(resource));

        run_checked(&self.binary, &argv, None, None).await?;

        info!("Deleted {}", resource);
        Ok(())
    }
}
