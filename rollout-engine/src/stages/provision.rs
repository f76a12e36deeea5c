use async_trait::async_trait;
use rollout_tools::InfraProvisioner;
use std::sync::Arc;
use tracing::info;

use crate::context::{StageContext, keys};
use crate::error::StageError;
use crate::executor::{StageAction, StageOutput};

/// Converges the environment's infrastructure
pub struct ProvisionStage {
    provisioner: Arc<dyn InfraProvisioner>,
}

impl ProvisionStage {
    pub fn new(provisioner: Arc<dyn InfraProvisioner>) -> Self {
        Self { provisioner }
    }
}

#[async_trait]
impl StageAction for ProvisionStage {
    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        let endpoints = self.provisioner.apply(&ctx.profile).await?;

        if let Some(endpoint) = endpoints.cluster_endpoint() {
            info!("Cluster endpoint: {}", endpoint);
            ctx.outputs.publish(keys::CLUSTER_ENDPOINT, endpoint);
        }
        if let Some(registry) = endpoints.registry_url() {
            info!("Image registry: {}", registry);
            ctx.outputs.publish(keys::REGISTRY_URL, registry);
        }

        Ok(StageOutput::done())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeProvisioner, context};
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_publishes_endpoints() {
        let provisioner = Arc::new(FakeProvisioner::default());
        let stage = ProvisionStage::new(provisioner.clone());
        let ctx = context();

        stage.execute(&ctx).await.unwrap();

        assert_eq!(provisioner.applies.load(Ordering::SeqCst), 1);
        assert_eq!(
            ctx.outputs.get(keys::CLUSTER_ENDPOINT).as_deref(),
            Some("https://devops-demo-dev.eks.local")
        );
        assert!(ctx.outputs.get(keys::REGISTRY_URL).is_some());
    }

    #[tokio::test]
    async fn test_reapply_leaves_endpoints_unchanged() {
        let provisioner = Arc::new(FakeProvisioner::default());
        let stage = ProvisionStage::new(provisioner.clone());
        let ctx = context();

        stage.execute(&ctx).await.unwrap();
        let endpoint = ctx.outputs.get(keys::CLUSTER_ENDPOINT);
        let registry = ctx.outputs.get(keys::REGISTRY_URL);

        stage.execute(&ctx).await.unwrap();

        assert_eq!(provisioner.applies.load(Ordering::SeqCst), 2);
        assert_eq!(provisioner.destroys.load(Ordering::SeqCst), 0);
        assert_eq!(ctx.outputs.get(keys::CLUSTER_ENDPOINT), endpoint);
        assert_eq!(ctx.outputs.get(keys::REGISTRY_URL), registry);
        assert!(endpoint.is_some());
    }

    #[tokio::test]
    async fn test_expired_credentials_are_fatal() {
        let stage = ProvisionStage::new(Arc::new(FakeProvisioner::unauthorized()));
        let err = stage.execute(&context()).await.unwrap_err();
        assert!(matches!(err, StageError::Fatal(_)));
    }
}
