//! Backup retention stage (production)
//!
//! Applies the backup CronJob manifests with the profile's retention window
//! and checks the CronJobs exist afterwards.

use async_trait::async_trait;
use rollout_tools::ClusterClient;
use std::sync::Arc;
use tracing::info;

use super::manifests::{ManifestFile, manifest_variables};
use crate::context::StageContext;
use crate::error::StageError;
use crate::executor::{StageAction, StageOutput};

pub struct BackupRetentionStage {
    cluster: Arc<dyn ClusterClient>,
    manifests: Vec<ManifestFile>,
}

impl BackupRetentionStage {
    /// Keeps only the CronJob manifests
    pub fn new(cluster: Arc<dyn ClusterClient>, manifests: Vec<ManifestFile>) -> Self {
        let manifests = manifests
            .into_iter()
            .filter(|m| m.is_kind("cronjob"))
            .collect();
        Self { cluster, manifests }
    }
}

#[async_trait]
impl StageAction for BackupRetentionStage {
    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        let retention = &ctx.profile.retention;
        if retention.backup_days == 0 {
            return Err(StageError::fatal("backup retention must be at least one day"));
        }
        if self.manifests.is_empty() {
            return Err(StageError::fatal("no backup CronJob manifest found"));
        }

        let vars = manifest_variables(ctx);
        for manifest in &self.manifests {
            let spec = manifest.to_spec(&ctx.profile.namespace, &vars);
            self.cluster.apply_manifest(&spec).await?;

            let state = self.cluster.get_condition(&spec.resource).await?;
            if !state.exists {
                return Err(StageError::transient(format!(
                    "{} not found after apply",
                    spec.resource
                )));
            }
            info!(
                "{} scheduled, keeping backups for {} days",
                spec.resource, retention.backup_days
            );
        }

        Ok(StageOutput::done())
    }
}
