//! Post-deploy verification
//!
//! `verify` checks the application's health endpoint from inside a pod and,
//! when a public URL is configured, from outside the cluster. `ha-verify`
//! checks that a production deployment really runs redundantly.

use async_trait::async_trait;
use rollout_tools::{ClusterClient, HealthClient, PodRef, ResourceRef};
use std::sync::Arc;
use tracing::info;

use crate::context::StageContext;
use crate::error::StageError;
use crate::executor::{StageAction, StageOutput};
use crate::probe::{HttpHealthCondition, PodHealthCondition};

/// Minimum available replicas for a deployment to count as highly available
pub const HA_MIN_REPLICAS: u32 = 2;

pub struct VerifyStage {
    cluster: Arc<dyn ClusterClient>,
    deployment: String,
    health_path: String,
    public: Option<HealthClient>,
}

impl VerifyStage {
    pub fn new(cluster: Arc<dyn ClusterClient>, deployment: impl Into<String>, health_path: impl Into<String>) -> Self {
        Self {
            cluster,
            deployment: deployment.into(),
            health_path: health_path.into(),
            public: None,
        }
    }

    /// Also check the health endpoint through the public URL
    pub fn with_public_check(mut self, client: HealthClient) -> Self {
        self.public = Some(client);
        self
    }
}

#[async_trait]
impl StageAction for VerifyStage {
    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        let pod = PodRef {
            namespace: ctx.profile.namespace.clone(),
            target: format!("deployment/{}", self.deployment),
            container: None,
        };
        let in_cluster =
            PodHealthCondition::new(self.cluster.clone(), pod, ctx.profile.app_port, &self.health_path);
        let detail = ctx
            .probe
            .wait(&in_cluster, &ctx.cancel)
            .await
            .into_result("in-cluster health check")?;
        info!("In-cluster health check passed: {}", detail);

        if let Some(client) = &self.public {
            let external = HttpHealthCondition::new(client.clone(), &self.health_path);
            let detail = ctx
                .probe
                .wait(&external, &ctx.cancel)
                .await
                .into_result(&format!("public health check {}", client.base_url()))?;
            info!("Public health check passed: {}", detail);
        }

        Ok(StageOutput::done())
    }
}

pub struct HaVerifyStage {
    cluster: Arc<dyn ClusterClient>,
    deployment: String,
}

impl HaVerifyStage {
    pub fn new(cluster: Arc<dyn ClusterClient>, deployment: impl Into<String>) -> Self {
        Self {
            cluster,
            deployment: deployment.into(),
        }
    }
}

#[async_trait]
impl StageAction for HaVerifyStage {
    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        let profile = &ctx.profile;
        let resource = ResourceRef::new("deployment", &self.deployment, &profile.namespace);
        let state = self.cluster.get_condition(&resource).await?;

        if !state.exists {
            return Err(StageError::transient(format!("{} not found", resource)));
        }

        if state.desired_replicas < profile.sizing.replicas {
            return Err(StageError::fatal(format!(
                "{} desires {} replicas but the {} profile requires {}",
                resource, state.desired_replicas, profile.environment, profile.sizing.replicas
            )));
        }

        let required = profile.sizing.replicas.max(HA_MIN_REPLICAS);
        if state.available_replicas < required {
            return Err(StageError::transient(format!(
                "{}: {}, need {} available",
                resource, state, required
            )));
        }

        info!("{} is highly available: {}", resource, state);
        Ok(StageOutput::done())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeCluster, context, context_for};
    use rollout_core::domain::profile::EnvironmentProfile;
    use rollout_tools::{ExecOutput, ResourceState};

    #[tokio::test(start_paused = true)]
    async fn test_verify_passes_with_healthy_pod() {
        let cluster = Arc::new(FakeCluster::healthy(1));
        let stage = VerifyStage::new(cluster.clone(), "devops-demo", "/health");

        stage.execute(&context()).await.unwrap();
        assert_eq!(cluster.exec_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_verify_times_out_on_degraded_app() {
        let cluster = Arc::new(FakeCluster::healthy(1));
        cluster.set_exec(ExecOutput {
            stdout: r#"{"status": "degraded"}"#.to_string(),
            stderr: String::new(),
            exit_code: 0,
        });
        let stage = VerifyStage::new(cluster, "devops-demo", "/health");

        let err = stage.execute(&context()).await.unwrap_err();
        assert!(matches!(err, StageError::TimedOut(_)));
    }

    #[tokio::test]
    async fn test_ha_verify_requires_redundancy() {
        let ctx = context_for(EnvironmentProfile::production());

        let healthy = HaVerifyStage::new(Arc::new(FakeCluster::healthy(3)), "devops-demo");
        healthy.execute(&ctx).await.unwrap();

        let degraded = Arc::new(FakeCluster::healthy(3));
        degraded.set_state(ResourceState::replicas(3, 3, 1));
        let err = HaVerifyStage::new(degraded, "devops-demo")
            .execute(&ctx)
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        let undersized = HaVerifyStage::new(Arc::new(FakeCluster::healthy(1)), "devops-demo");
        let err = undersized.execute(&ctx).await.unwrap_err();
        assert!(matches!(err, StageError::Fatal(_)));
    }
}
