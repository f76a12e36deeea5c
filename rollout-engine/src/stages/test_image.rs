//! Test stage
//!
//! Builds the Dockerfile's `test` target, which runs the test suite as part
//! of the build. A passing run is recorded in the test-artifact cache; the
//! same inputs later are a hit and nothing is rebuilt.

use async_trait::async_trait;
use rollout_core::domain::cache::CacheScope;
use rollout_core::domain::result::CacheOutcome;
use rollout_core::domain::stage::names;
use rollout_tools::{BuildRequest, ContainerBuilder, DependencyInstall};
use std::sync::Arc;
use tracing::info;

use super::build::{BuildSources, build_args, target_image};
use crate::cache::{CacheKeyResolver, CacheLookup};
use crate::context::StageContext;
use crate::error::StageError;
use crate::executor::{StageAction, StageOutput};

pub struct TestStage {
    builder: Arc<dyn ContainerBuilder>,
    cache: CacheKeyResolver,
    sources: BuildSources,
}

impl TestStage {
    pub fn new(builder: Arc<dyn ContainerBuilder>, cache: CacheKeyResolver, sources: BuildSources) -> Self {
        Self {
            builder,
            cache,
            sources,
        }
    }
}

#[async_trait]
impl StageAction for TestStage {
    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        let image = target_image(ctx);
        let key = self
            .cache
            .resolve(CacheScope::TestArtifact, &self.sources.test_inputs(&image)?)?;

        if let CacheLookup::Hit(entry) = self.cache.lookup(&key)? {
            info!(
                "Tests already passed for these inputs ({}, {})",
                key, entry.created_at
            );
            return Ok(StageOutput::cached(CacheOutcome::Hit));
        }

        let request = BuildRequest {
            target: "test".to_string(),
            image: format!("{}-test", image),
            build_args: build_args(ctx),
            cache_key: Some(key.to_string()),
            install: DependencyInstall::Reuse,
            context_dir: self.sources.context_dir.clone(),
            dockerfile: self.sources.dockerfile_path(),
        };
        let test_image = self.builder.build(&request).await?;
        info!("Test suite passed in {}", test_image);

        self.cache.record_artifact(
            &key,
            names::TEST,
            "sources, tests, dependencies or Dockerfile changed",
            &test_image,
            ctx.clock.now(),
        )?;

        Ok(StageOutput::cached(CacheOutcome::Miss))
    }
}
