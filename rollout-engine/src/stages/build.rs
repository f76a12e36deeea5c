//! Image build with dependency and layer caching
//!
//! Two keys are consulted before building:
//! - the build-layer key (dependency manifest, Dockerfile, sources, target
//!   image): an exact hit reuses the recorded image and skips the builder
//! - the dependency key (dependency manifest only): decides whether the
//!   dependency install is reused, restored from an older entry, or redone

use async_trait::async_trait;
use rollout_core::domain::cache::CacheScope;
use rollout_core::domain::result::CacheOutcome;
use rollout_core::domain::stage::names;
use rollout_tools::{BuildRequest, ContainerBuilder, DependencyInstall};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::cache::{CacheInput, CacheKeyResolver, CacheLookup, fingerprint};
use crate::context::{StageContext, keys};
use crate::error::StageError;
use crate::executor::{StageAction, StageOutput};

/// Files and directories that feed the image build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSources {
    pub context_dir: PathBuf,
    /// Relative to `context_dir`
    pub dockerfile: PathBuf,
    /// Relative to `context_dir`
    pub dependency_manifest: PathBuf,
    /// Application source directories, relative to `context_dir`
    pub source_dirs: Vec<PathBuf>,
    /// Test source directories, relative to `context_dir`
    pub test_dirs: Vec<PathBuf>,
}

impl BuildSources {
    pub fn new(context_dir: impl Into<PathBuf>) -> Self {
        Self {
            context_dir: context_dir.into(),
            dockerfile: PathBuf::from("Dockerfile"),
            dependency_manifest: PathBuf::from("requirements.txt"),
            source_dirs: vec![PathBuf::from("src")],
            test_dirs: vec![PathBuf::from("tests")],
        }
    }

    pub fn dockerfile_path(&self) -> PathBuf {
        self.context_dir.join(&self.dockerfile)
    }

    fn file_input(&self, relative: &Path) -> Result<CacheInput, StageError> {
        let path = self.context_dir.join(relative);
        let fp = fingerprint::of_file(&path)
            .map_err(|e| StageError::fatal(format!("cannot read {}: {}", path.display(), e)))?;
        Ok(CacheInput::new(input_name(relative), fp))
    }

    fn tree_inputs(&self, dirs: &[PathBuf]) -> Result<Vec<CacheInput>, StageError> {
        let mut inputs = Vec::new();
        for relative in dirs {
            let path = self.context_dir.join(relative);
            if !path.is_dir() {
                debug!("Source directory {} not present", path.display());
                continue;
            }
            let fp = fingerprint::of_tree(&path)
                .map_err(|e| StageError::fatal(format!("cannot read {}: {}", path.display(), e)))?;
            inputs.push(CacheInput::new(format!("{}/", input_name(relative)), fp));
        }
        Ok(inputs)
    }

    /// Inputs of the dependency cache key
    pub fn dependency_inputs(&self) -> Result<Vec<CacheInput>, StageError> {
        Ok(vec![self.file_input(&self.dependency_manifest)?])
    }

    /// Inputs of the build-layer cache key for a given target image
    pub fn layer_inputs(&self, image: &str) -> Result<Vec<CacheInput>, StageError> {
        let mut inputs = self.dependency_inputs()?;
        inputs.push(self.file_input(&self.dockerfile)?);
        inputs.extend(self.tree_inputs(&self.source_dirs)?);
        inputs.push(CacheInput::new("image", fingerprint::of_bytes(image.as_bytes())));
        Ok(inputs)
    }

    /// Inputs of the test-artifact cache key
    pub fn test_inputs(&self, image: &str) -> Result<Vec<CacheInput>, StageError> {
        let mut inputs = self.layer_inputs(image)?;
        inputs.extend(self.tree_inputs(&self.test_dirs)?);
        Ok(inputs)
    }
}

fn input_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// Image reference for this run: registry-qualified once provisioning
/// published a registry
pub(crate) fn target_image(ctx: &StageContext) -> String {
    match ctx.outputs.get(keys::REGISTRY_URL) {
        Some(registry) => format!("{}:{}", registry.trim_end_matches('/'), ctx.profile.image_tag),
        None => ctx.profile.image(),
    }
}

pub(crate) fn build_args(ctx: &StageContext) -> BTreeMap<String, String> {
    let mut args = BTreeMap::new();
    args.insert("APP_ENV".to_string(), ctx.profile.environment.to_string());
    args.insert("APP_PORT".to_string(), ctx.profile.app_port.to_string());
    args
}

/// Builds the production image
pub struct BuildStage {
    builder: Arc<dyn ContainerBuilder>,
    cache: CacheKeyResolver,
    sources: BuildSources,
}

impl BuildStage {
    pub fn new(builder: Arc<dyn ContainerBuilder>, cache: CacheKeyResolver, sources: BuildSources) -> Self {
        Self {
            builder,
            cache,
            sources,
        }
    }
}

#[async_trait]
impl StageAction for BuildStage {
    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        let image = target_image(ctx);

        let layer_key = self
            .cache
            .resolve(CacheScope::BuildLayer, &self.sources.layer_inputs(&image)?)?;
        if let CacheLookup::Hit(entry) = self.cache.lookup(&layer_key)? {
            info!("Image layers unchanged ({}), reusing {}", layer_key, entry.artifact_ref);
            ctx.outputs.publish(keys::IMAGE, entry.artifact_ref);
            return Ok(StageOutput::cached(CacheOutcome::Hit));
        }

        let dep_key = self
            .cache
            .resolve(CacheScope::Dependency, &self.sources.dependency_inputs()?)?;
        let dependencies = self.cache.lookup(&dep_key)?;
        let install = match &dependencies {
            CacheLookup::Hit(_) => DependencyInstall::Reuse,
            CacheLookup::PartialHit(entry) => DependencyInstall::Restore {
                from_key: entry.key.to_string(),
            },
            CacheLookup::Miss => DependencyInstall::Full,
        };
        info!(
            "Dependency cache {} for {}: install mode {}",
            dependencies.outcome(),
            dep_key,
            install.as_build_arg()
        );

        let request = BuildRequest {
            target: "production".to_string(),
            image,
            build_args: build_args(ctx),
            cache_key: Some(layer_key.to_string()),
            install,
            context_dir: self.sources.context_dir.clone(),
            dockerfile: self.sources.dockerfile_path(),
        };
        let built = self.builder.build(&request).await?;

        let now = ctx.clock.now();
        self.cache.record_artifact(
            &dep_key,
            names::BUILD,
            "dependency manifest changed",
            &built,
            now,
        )?;
        self.cache.record_artifact(
            &layer_key,
            names::BUILD,
            "dependency manifest, Dockerfile, sources or image tag changed",
            &built,
            now,
        )?;

        ctx.outputs.publish(keys::IMAGE, built);
        Ok(StageOutput::cached(dependencies.outcome()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::testing::{FakeBuilder, context};
    use std::fs;

    pub(crate) fn source_tree() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("rollout-build-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(dir.join("src")).unwrap();
        fs::create_dir_all(dir.join("tests")).unwrap();
        fs::write(dir.join("Dockerfile"), "FROM python:3.11-slim AS production\n").unwrap();
        fs::write(dir.join("requirements.txt"), "flask==3.0.0\ngunicorn==21.2.0\n").unwrap();
        fs::write(dir.join("src/app.py"), "app = Flask(__name__)\n").unwrap();
        fs::write(dir.join("tests/test_app.py"), "def test_health(): pass\n").unwrap();
        dir
    }

    #[tokio::test]
    async fn test_first_build_installs_everything() {
        let dir = source_tree();
        let builder = Arc::new(FakeBuilder::default());
        let stage = BuildStage::new(builder.clone(), CacheKeyResolver::in_memory(), BuildSources::new(&dir));
        let ctx = context();

        let output = stage.execute(&ctx).await.unwrap();

        assert_eq!(output.cache, CacheOutcome::Miss);
        let request = builder.last_request().unwrap();
        assert_eq!(request.install, DependencyInstall::Full);
        assert_eq!(request.target, "production");
        assert!(ctx.image().starts_with("devops-demo:dev@sha256:"));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_unchanged_dependencies_reuse_install() {
        let dir = source_tree();
        let builder = Arc::new(FakeBuilder::default());
        let cache = CacheKeyResolver::in_memory();
        let stage = BuildStage::new(builder.clone(), cache, BuildSources::new(&dir));

        stage.execute(&context()).await.unwrap();

        // Source change: new layers, same dependency manifest
        fs::write(dir.join("src/app.py"), "app = Flask('demo')\n").unwrap();
        let output = stage.execute(&context()).await.unwrap();

        assert_eq!(output.cache, CacheOutcome::Hit);
        assert_eq!(builder.builds(), 2);
        assert_eq!(builder.last_request().unwrap().install, DependencyInstall::Reuse);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_unchanged_layers_skip_the_builder() {
        let dir = source_tree();
        let builder = Arc::new(FakeBuilder::default());
        let stage = BuildStage::new(builder.clone(), CacheKeyResolver::in_memory(), BuildSources::new(&dir));

        stage.execute(&context()).await.unwrap();
        let ctx = context();
        let output = stage.execute(&ctx).await.unwrap();

        assert_eq!(output.cache, CacheOutcome::Hit);
        assert_eq!(builder.builds(), 1);
        assert!(ctx.image().starts_with("devops-demo:dev@sha256:"));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_changed_dependencies_restore_older_cache() {
        let dir = source_tree();
        let builder = Arc::new(FakeBuilder::default());
        let stage = BuildStage::new(builder.clone(), CacheKeyResolver::in_memory(), BuildSources::new(&dir));

        stage.execute(&context()).await.unwrap();
        fs::write(dir.join("requirements.txt"), "flask==3.0.0\ngunicorn==22.0.0\n").unwrap();
        let output = stage.execute(&context()).await.unwrap();

        assert_eq!(output.cache, CacheOutcome::PartialHit);
        assert!(matches!(
            builder.last_request().unwrap().install,
            DependencyInstall::Restore { .. }
        ));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_missing_dependency_manifest_is_fatal() {
        let dir = source_tree();
        fs::remove_file(dir.join("requirements.txt")).unwrap();
        let stage = BuildStage::new(
            Arc::new(FakeBuilder::default()),
            CacheKeyResolver::in_memory(),
            BuildSources::new(&dir),
        );

        let err = stage.execute(&context()).await.unwrap_err();
        assert!(matches!(err, StageError::Fatal(_)));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_registry_qualifies_the_image() {
        let ctx = context();
        assert_eq!(target_image(&ctx), "devops-demo:dev");
        ctx.outputs.publish(keys::REGISTRY_URL, "registry.local/devops-demo/");
        assert_eq!(target_image(&ctx), "registry.local/devops-demo:dev");
    }
}
