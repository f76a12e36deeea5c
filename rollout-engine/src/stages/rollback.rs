//! Explicit rollback after a failed run
//!
//! Never runs on its own: the orchestrator only schedules it when a rollback
//! policy other than `disabled` is configured and the run failed.

use async_trait::async_trait;
use rollout_tools::{ClusterClient, InfraProvisioner, ResourceRef};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::RollbackPolicy;
use crate::context::StageContext;
use crate::error::StageError;
use crate::executor::{StageAction, StageOutput};

pub struct RollbackStage {
    policy: RollbackPolicy,
    cluster: Arc<dyn ClusterClient>,
    provisioner: Arc<dyn InfraProvisioner>,
    deployments: Vec<String>,
}

impl RollbackStage {
    pub fn new(
        policy: RollbackPolicy,
        cluster: Arc<dyn ClusterClient>,
        provisioner: Arc<dyn InfraProvisioner>,
        deployments: Vec<String>,
    ) -> Self {
        Self {
            policy,
            cluster,
            provisioner,
            deployments,
        }
    }

    pub fn policy(&self) -> RollbackPolicy {
        self.policy
    }
}

#[async_trait]
impl StageAction for RollbackStage {
    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        let profile = &ctx.profile;

        match self.policy {
            RollbackPolicy::Disabled => {
                info!("Rollback disabled, leaving {} as is", profile.namespace);
            }
            RollbackPolicy::UndoDeployment => {
                for name in &self.deployments {
                    let resource = ResourceRef::new("deployment", name, &profile.namespace);
                    warn!("Rolling back {}", resource);
                    self.cluster.delete_resource(&resource).await?;
                }
            }
            RollbackPolicy::DestroyInfrastructure => {
                if profile.deletion_protection {
                    return Err(StageError::fatal(format!(
                        "refusing to destroy {} infrastructure: deletion protection is enabled",
                        profile.environment
                    )));
                }
                warn!("Destroying {} infrastructure", profile.environment);
                self.provisioner.destroy(profile).await?;
            }
        }

        Ok(StageOutput::done())
    }
}
