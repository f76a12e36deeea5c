//! Deploy stage
//!
//! Applies the application manifests in kind order, then waits for every
//! deployment to report all desired replicas available. The readiness wait
//! runs inside the attempt, so the stage timeout bounds it too.

use async_trait::async_trait;
use rollout_tools::{ClusterClient, ResourceRef};
use std::sync::Arc;
use tracing::info;

use super::manifests::{ManifestFile, manifest_variables, order_manifests};
use crate::context::StageContext;
use crate::error::StageError;
use crate::executor::{StageAction, StageOutput};
use crate::probe::DeploymentReplicasCondition;

pub struct DeployStage {
    cluster: Arc<dyn ClusterClient>,
    manifests: Vec<ManifestFile>,
}

impl DeployStage {
    /// CronJob manifests are left to the backup stage
    pub fn new(cluster: Arc<dyn ClusterClient>, manifests: Vec<ManifestFile>) -> Self {
        let mut manifests: Vec<ManifestFile> = manifests
            .into_iter()
            .filter(|m| !m.is_kind("cronjob"))
            .collect();
        order_manifests(&mut manifests);
        Self { cluster, manifests }
    }

    fn deployments(&self, ctx: &StageContext) -> Vec<ResourceRef> {
        let vars = manifest_variables(ctx);
        self.manifests
            .iter()
            .filter(|m| m.is_kind("deployment"))
            .map(|m| m.resource(&ctx.profile.namespace, &vars))
            .collect()
    }
}

#[async_trait]
impl StageAction for DeployStage {
    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        if self.manifests.is_empty() {
            return Err(StageError::fatal("no manifests to deploy"));
        }

        let vars = manifest_variables(ctx);
        info!(
            "Deploying {} to {} ({} manifests)",
            ctx.image(),
            ctx.profile.namespace,
            self.manifests.len()
        );

        for manifest in &self.manifests {
            let spec = manifest.to_spec(&ctx.profile.namespace, &vars);
            self.cluster.apply_manifest(&spec).await?;
        }

        for deployment in self.deployments(ctx) {
            let condition = DeploymentReplicasCondition::new(self.cluster.clone(), deployment.clone());
            let detail = ctx
                .probe
                .wait(&condition, &ctx.cancel)
                .await
                .into_result(&deployment.to_string())?;
            info!("{} ready: {}", deployment, detail);
        }

        Ok(StageOutput::done())
    }

    /// Removes the deployments so the next attempt starts from a clean rollout
    async fn cleanup(&self, ctx: &StageContext) -> Result<(), StageError> {
        for deployment in self.deployments(ctx) {
            info!("Cleaning up {}", deployment);
            self.cluster.delete_resource(&deployment).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeCluster, context};
    use rollout_tools::ResourceState;
    use std::time::Duration;
    use tokio::time::Instant;

    fn manifests() -> Vec<ManifestFile> {
        vec![
            ManifestFile::new("Service", "devops-demo", "k8s/service.yaml"),
            ManifestFile::new("CronJob", "backup", "k8s/backup-cronjob.yaml"),
            ManifestFile::new("Deployment", "devops-demo", "k8s/deployment.yaml"),
            ManifestFile::new("Namespace", "${NAMESPACE}", "k8s/namespace.yaml"),
        ]
    }

    #[tokio::test(start_paused = true)]
    async fn test_applies_in_kind_order_and_waits() {
        let cluster = Arc::new(FakeCluster::healthy(1));
        let stage = DeployStage::new(cluster.clone(), manifests());

        stage.execute(&context()).await.unwrap();

        assert_eq!(
            cluster.applied_kinds(),
            vec!["namespace", "deployment", "service"]
        );
        let applied = cluster.applied.lock().unwrap();
        assert_eq!(applied[0].resource.name, "devops-demo-dev");
        assert_eq!(
            applied[1].variables.get("IMAGE").map(String::as_str),
            Some("devops-demo:dev")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_rollout_times_out() {
        let cluster = Arc::new(FakeCluster::stuck(1));
        let stage = DeployStage::new(cluster.clone(), manifests());

        let started = Instant::now();
        let err = stage.execute(&context()).await.unwrap_err();

        assert_eq!(started.elapsed(), Duration::from_secs(300));
        match err {
            StageError::TimedOut(message) => assert!(message.contains("0/1 replicas available")),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_becomes_ready_mid_wait() {
        let cluster = Arc::new(FakeCluster::stuck(1));
        let stage = DeployStage::new(cluster.clone(), manifests());

        let flip = cluster.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(45)).await;
            flip.set_state(ResourceState::replicas(1, 1, 1));
        });

        stage.execute(&context()).await.unwrap();
    }

    #[tokio::test]
    async fn test_cleanup_deletes_deployments() {
        let cluster = Arc::new(FakeCluster::default());
        let stage = DeployStage::new(cluster.clone(), manifests());

        stage.cleanup(&context()).await.unwrap();

        let deleted = cluster.deleted.lock().unwrap();
        assert_eq!(deleted.len(), 1);
        assert_eq!(deleted[0].kind, "deployment");
        assert_eq!(deleted[0].namespace, "devops-demo-dev");
    }

    #[tokio::test]
    async fn test_nothing_to_deploy_is_fatal() {
        let stage = DeployStage::new(Arc::new(FakeCluster::default()), vec![]);
        assert!(matches!(
            stage.execute(&context()).await,
            Err(StageError::Fatal(_))
        ));
    }
}
