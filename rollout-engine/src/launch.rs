//! Wiring for a complete run
//!
//! Resolves the profile, opens the cache, discovers manifests, connects the
//! stage actions to the external tools and persists the report.

use anyhow::Context as _;
use rollout_core::domain::profile::EnvironmentProfile;
use rollout_core::domain::report::PipelineReport;
use rollout_core::domain::stage::names;
use rollout_tools::{
    ClusterClient, ContainerBuilder, DockerBuilder, HealthClient, InfraProvisioner, KubectlClient,
    TerraformProvisioner,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cache::{CacheKeyResolver, FsCacheStore};
use crate::config::{EngineConfig, ProfileOverrides, load_profile};
use crate::orchestrator::{PipelineOrchestrator, StageRegistry};
use crate::plan::StagePlan;
use crate::report::ReportWriter;
use crate::stages::manifests::manifest_variables_for;
use crate::stages::{
    BackupRetentionStage, BuildSources, BuildStage, DeployStage, HaVerifyStage, ManifestFile,
    ProvisionStage, RollbackStage, TestStage, VerifyStage, discover_manifests,
};

/// The external tools a run drives
#[derive(Clone)]
pub struct Toolchain {
    pub provisioner: Arc<dyn InfraProvisioner>,
    pub builder: Arc<dyn ContainerBuilder>,
    pub cluster: Arc<dyn ClusterClient>,
    pub public_health: Option<HealthClient>,
}

impl Toolchain {
    /// terraform, docker and kubectl from `PATH`
    pub fn from_config(config: &EngineConfig) -> anyhow::Result<Self> {
        let public_health = match &config.public_url {
            Some(url) => {
                let client = reqwest::Client::builder()
                    .timeout(Duration::from_secs(10))
                    .build()
                    .context("cannot create HTTP client")?;
                Some(HealthClient::with_client(url.clone(), client))
            }
            None => None,
        };

        Ok(Self {
            provisioner: Arc::new(TerraformProvisioner::new(&config.infra_dir)),
            builder: Arc::new(DockerBuilder::new()),
            cluster: Arc::new(KubectlClient::new()),
            public_health,
        })
    }
}

/// Name of the application deployment among the manifests
fn deployment_name(profile: &EnvironmentProfile, manifests: &[ManifestFile]) -> String {
    let vars = manifest_variables_for(profile, &profile.image());
    manifests
        .iter()
        .find(|m| m.is_kind("deployment"))
        .map(|m| m.resource(&profile.namespace, &vars).name)
        .unwrap_or_else(|| profile.image_repository.clone())
}

/// Connects every stage of the plan to its action
pub fn build_registry(
    config: &EngineConfig,
    profile: &EnvironmentProfile,
    tools: &Toolchain,
    manifests: Vec<ManifestFile>,
    cache: CacheKeyResolver,
) -> StageRegistry {
    let sources = BuildSources::new(&config.build_context);
    let deployment = deployment_name(profile, &manifests);

    let mut verify = VerifyStage::new(tools.cluster.clone(), &deployment, &config.health_path);
    if let Some(client) = &tools.public_health {
        verify = verify.with_public_check(client.clone());
    }

    let mut registry = StageRegistry::new()
        .register(
            names::PROVISION,
            Arc::new(ProvisionStage::new(tools.provisioner.clone())),
        )
        .register(
            names::BUILD,
            Arc::new(BuildStage::new(
                tools.builder.clone(),
                cache.clone(),
                sources.clone(),
            )),
        )
        .register(
            names::TEST,
            Arc::new(TestStage::new(tools.builder.clone(), cache, sources)),
        )
        .register(
            names::DEPLOY,
            Arc::new(DeployStage::new(tools.cluster.clone(), manifests.clone())),
        )
        .register(names::VERIFY, Arc::new(verify))
        .register(
            names::HA_VERIFY,
            Arc::new(HaVerifyStage::new(tools.cluster.clone(), &deployment)),
        )
        .register(
            names::BACKUP_RETENTION,
            Arc::new(BackupRetentionStage::new(tools.cluster.clone(), manifests)),
        );

    if config.rollback.is_enabled() {
        registry = registry.with_rollback(Arc::new(RollbackStage::new(
            config.rollback,
            tools.cluster.clone(),
            tools.provisioner.clone(),
            vec![deployment],
        )));
    }

    registry
}

/// Resolves the profile for an environment name, applying overrides
pub fn resolve_profile(
    environment: &str,
    config: &EngineConfig,
    overrides: &ProfileOverrides,
) -> anyhow::Result<EnvironmentProfile> {
    let overrides = ProfileOverrides {
        app_port: overrides.app_port.or(config.app_port),
        ..overrides.clone()
    };
    load_profile(environment, &overrides)
}

/// The plan a run of `environment` would execute
pub fn plan_for(
    environment: &str,
    config: &EngineConfig,
    overrides: &ProfileOverrides,
) -> anyhow::Result<(EnvironmentProfile, StagePlan)> {
    let profile = resolve_profile(environment, config, overrides)?;
    let plan = StagePlan::for_profile(&profile, config)?;
    Ok((profile, plan))
}

/// Runs a pipeline with the given tools and writes its report
pub async fn run_with(
    profile: EnvironmentProfile,
    config: &EngineConfig,
    tools: &Toolchain,
    cancel: CancellationToken,
) -> anyhow::Result<(PipelineReport, PathBuf)> {
    let manifests = match discover_manifests(&config.manifests_dir) {
        Ok(found) => found,
        Err(e) => {
            warn!(
                "Cannot read manifests from {}: {}",
                config.manifests_dir.display(),
                e
            );
            Vec::new()
        }
    };
    info!(
        "Found {} manifests in {}",
        manifests.len(),
        config.manifests_dir.display()
    );

    let cache = match FsCacheStore::new(&config.cache_dir) {
        Ok(store) => CacheKeyResolver::new(Arc::new(store)),
        Err(e) => {
            warn!(
                "Cannot open cache in {}, caching in memory for this run: {}",
                config.cache_dir.display(),
                e
            );
            CacheKeyResolver::in_memory()
        }
    };

    let registry = build_registry(config, &profile, tools, manifests, cache);
    let orchestrator = PipelineOrchestrator::new(config.clone(), registry, cancel);
    let report = orchestrator.run_pipeline(profile).await?;

    let path = ReportWriter::new(&config.report_dir).persist(&report)?;
    Ok((report, path))
}

/// Runs the pipeline for an environment name with the real tools
pub async fn run_environment(
    environment: &str,
    config: &EngineConfig,
    overrides: &ProfileOverrides,
    cancel: CancellationToken,
) -> anyhow::Result<(PipelineReport, PathBuf)> {
    config.validate()?;
    let profile = resolve_profile(environment, config, overrides)?;
    let tools = Toolchain::from_config(config)?;
    run_with(profile, config, &tools, cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::build::tests::source_tree;
    use crate::testing::{FakeBuilder, FakeCluster, FakeProvisioner};
    use rollout_core::domain::report::{PipelineStatus, RunOutcome};
    use rollout_core::domain::result::{CacheOutcome, StageStatus};
    use std::fs;

    struct Workspace {
        root: PathBuf,
        config: EngineConfig,
    }

    impl Workspace {
        fn new() -> Self {
            let root = source_tree();
            let k8s = root.join("k8s");
            fs::create_dir_all(&k8s).unwrap();
            fs::write(
                k8s.join("namespace.yaml"),
                "apiVersion: v1\nkind: Namespace\nmetadata:\n  name: ${NAMESPACE}\n",
            )
            .unwrap();
            fs::write(
                k8s.join("deployment.yaml"),
                "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: devops-demo\n  namespace: ${NAMESPACE}\nspec:\n  replicas: ${REPLICAS}\n",
            )
            .unwrap();
            fs::write(
                k8s.join("service.yaml"),
                "apiVersion: v1\nkind: Service\nmetadata:\n  name: devops-demo\n",
            )
            .unwrap();
            fs::write(
                k8s.join("backup-cronjob.yaml"),
                "apiVersion: batch/v1\nkind: CronJob\nmetadata:\n  name: devops-demo-backup\n",
            )
            .unwrap();

            let config = EngineConfig {
                report_dir: root.join("reports"),
                cache_dir: root.join(".rollout/cache"),
                manifests_dir: k8s,
                build_context: root.clone(),
                backoff_initial: Duration::from_millis(10),
                backoff_max: Duration::from_millis(40),
                ..EngineConfig::default()
            };
            Self { root, config }
        }

        fn tools(&self, replicas: u32) -> (Toolchain, Arc<FakeBuilder>, Arc<FakeCluster>) {
            let builder = Arc::new(FakeBuilder::default());
            let cluster = Arc::new(FakeCluster::healthy(replicas));
            let tools = Toolchain {
                provisioner: Arc::new(FakeProvisioner::default()),
                builder: builder.clone(),
                cluster: cluster.clone(),
                public_health: None,
            };
            (tools, builder, cluster)
        }
    }

    impl Drop for Workspace {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.root);
        }
    }

    #[tokio::test]
    async fn test_development_run_end_to_end() {
        let ws = Workspace::new();
        let (tools, builder, cluster) = ws.tools(1);
        let profile = resolve_profile("development", &ws.config, &ProfileOverrides::default()).unwrap();

        let (report, path) = run_with(profile, &ws.config, &tools, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.status, PipelineStatus::Succeeded);
        assert_eq!(report.outcome, RunOutcome::Completed);
        assert!(report.stages.iter().all(|r| r.status == StageStatus::Succeeded));
        assert!(report.stages.iter().all(|r| r.attempts == 1));
        assert!(path.exists());
        assert!(ws.config.report_dir.join("latest-development.json").exists());

        // build + test image
        assert_eq!(builder.builds(), 2);
        // CronJob left to the production backup stage
        assert_eq!(
            cluster.applied_kinds(),
            vec!["namespace", "deployment", "service"]
        );
    }

    #[tokio::test]
    async fn test_unusable_cache_dir_still_reports() {
        let mut ws = Workspace::new();
        let blocker = ws.root.join("cache-is-a-file");
        fs::write(&blocker, "not a directory").unwrap();
        ws.config.cache_dir = blocker.join("cache");
        let (tools, builder, _) = ws.tools(1);
        let profile = resolve_profile("development", &ws.config, &ProfileOverrides::default()).unwrap();

        let (report, _) = run_with(profile, &ws.config, &tools, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.status, PipelineStatus::Succeeded);
        assert!(ws.config.report_dir.join("latest-development.json").exists());
        assert_eq!(report.stage("build").unwrap().cache, CacheOutcome::Miss);
        assert_eq!(builder.builds(), 2);
    }

    #[tokio::test]
    async fn test_second_run_hits_every_cache() {
        let ws = Workspace::new();
        let (tools, builder, _) = ws.tools(1);

        for _ in 0..2 {
            let profile =
                resolve_profile("development", &ws.config, &ProfileOverrides::default()).unwrap();
            run_with(profile, &ws.config, &tools, CancellationToken::new())
                .await
                .unwrap();
        }

        let latest = crate::report::load_report(&ws.config.report_dir.join("latest-development.json"))
            .unwrap();
        assert_eq!(latest.stage("build").unwrap().cache, CacheOutcome::Hit);
        assert_eq!(latest.stage("test").unwrap().cache, CacheOutcome::Hit);
        assert_eq!(builder.builds(), 2);
    }

    #[tokio::test]
    async fn test_production_run_applies_backups() {
        let ws = Workspace::new();
        let (tools, _, cluster) = ws.tools(3);
        let profile = resolve_profile("production", &ws.config, &ProfileOverrides::default()).unwrap();

        let (report, _) = run_with(profile, &ws.config, &tools, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.status, PipelineStatus::Succeeded);
        assert_eq!(report.stages.len(), 7);
        assert!(cluster.applied_kinds().contains(&"cronjob".to_string()));
    }

    #[test]
    fn test_plan_for_environment() {
        let (profile, plan) =
            plan_for("prod", &EngineConfig::default(), &ProfileOverrides::default()).unwrap();
        assert!(profile.is_production());
        assert_eq!(plan.len(), 7);
        assert!(plan_for("qa", &EngineConfig::default(), &ProfileOverrides::default()).is_err());
    }

    #[test]
    fn test_config_port_overrides_profile() {
        let config = EngineConfig {
            app_port: Some(5000),
            ..EngineConfig::default()
        };
        let profile = resolve_profile("dev", &config, &ProfileOverrides::default()).unwrap();
        assert_eq!(profile.app_port, 5000);
    }
}
