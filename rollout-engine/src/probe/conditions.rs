//! Readiness conditions backed by the cluster client and HTTP

use async_trait::async_trait;
use rollout_tools::http::parse_health_response;
use rollout_tools::{ClusterClient, HealthClient, PodRef, ResourceRef};
use std::sync::Arc;

use super::{ConditionState, ReadinessCondition};
use crate::error::StageError;

/// Deployment's latest spec is rolled out and every desired replica is available
pub struct DeploymentReplicasCondition {
    cluster: Arc<dyn ClusterClient>,
    resource: ResourceRef,
}

impl DeploymentReplicasCondition {
    pub fn new(cluster: Arc<dyn ClusterClient>, resource: ResourceRef) -> Self {
        Self { cluster, resource }
    }
}

#[async_trait]
impl ReadinessCondition for DeploymentReplicasCondition {
    fn describe(&self) -> String {
        self.resource.to_string()
    }

    async fn check(&self) -> Result<ConditionState, StageError> {
        let state = self.cluster.get_condition(&self.resource).await?;
        Ok(ConditionState {
            ready: state.is_rolled_out(),
            detail: state.to_string(),
        })
    }
}

/// Health endpoint answers from inside one of the application's pods
pub struct PodHealthCondition {
    cluster: Arc<dyn ClusterClient>,
    pod: PodRef,
    port: u16,
    path: String,
}

impl PodHealthCondition {
    pub fn new(cluster: Arc<dyn ClusterClient>, pod: PodRef, port: u16, path: impl Into<String>) -> Self {
        Self {
            cluster,
            pod,
            port,
            path: path.into(),
        }
    }

    pub fn command(&self) -> Vec<String> {
        vec![
            "curl".to_string(),
            "-fsS".to_string(),
            format!(
                "http://localhost:{}/{}",
                self.port,
                self.path.trim_start_matches('/')
            ),
        ]
    }
}

#[async_trait]
impl ReadinessCondition for PodHealthCondition {
    fn describe(&self) -> String {
        format!("health of {} in {}", self.pod.target, self.pod.namespace)
    }

    async fn check(&self) -> Result<ConditionState, StageError> {
        let output = self.cluster.exec_in_pod(&self.pod, &self.command()).await?;

        if output.exit_code != 0 {
            return Ok(ConditionState::not_ready(format!(
                "health command exited with {}: {}",
                output.exit_code,
                output.stderr.trim()
            )));
        }

        let health = parse_health_response(&output.stdout)?;
        if health.is_healthy() {
            Ok(ConditionState::ready(format!("status {}", health.status)))
        } else {
            Ok(ConditionState::not_ready(format!("status {}", health.status)))
        }
    }
}

/// Public health endpoint returns 200 with a healthy body
pub struct HttpHealthCondition {
    client: HealthClient,
    path: String,
}

impl HttpHealthCondition {
    pub fn new(client: HealthClient, path: impl Into<String>) -> Self {
        Self {
            client,
            path: path.into(),
        }
    }
}

#[async_trait]
impl ReadinessCondition for HttpHealthCondition {
    fn describe(&self) -> String {
        self.client.url(&self.path)
    }

    async fn check(&self) -> Result<ConditionState, StageError> {
        let health = self.client.check(&self.path).await?;
        if health.is_healthy() {
            Ok(ConditionState::ready(format!("status {}", health.status)))
        } else {
            Ok(ConditionState::not_ready(format!("status {}", health.status)))
        }
    }
}
