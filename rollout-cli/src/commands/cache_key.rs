//! Cache key command

use anyhow::{Context, Result};
use clap::ValueEnum;
use colored::*;
use rollout_core::domain::cache::{CacheKey, CacheScope};
use rollout_engine::cache::{CacheInput, CacheLookup, fingerprint, resolve_key};
use rollout_engine::{CacheKeyResolver, FsCacheStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{Config, Settings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ScopeArg {
    Deps,
    Layers,
    Tests,
}

impl From<ScopeArg> for CacheScope {
    fn from(scope: ScopeArg) -> Self {
        match scope {
            ScopeArg::Deps => CacheScope::Dependency,
            ScopeArg::Layers => CacheScope::BuildLayer,
            ScopeArg::Tests => CacheScope::TestArtifact,
        }
    }
}

fn fingerprint_input(name: &str, path: &Path) -> Result<CacheInput> {
    let fp = if path.is_dir() {
        fingerprint::of_tree(path)
    } else {
        fingerprint::of_file(path)
    }
    .with_context(|| format!("Failed to fingerprint {}", path.display()))?;
    Ok(CacheInput::new(name, fp))
}

fn compute_key(scope: ScopeArg, inputs: &[(String, PathBuf)]) -> Result<CacheKey> {
    let inputs = inputs
        .iter()
        .map(|(name, path)| fingerprint_input(name, path))
        .collect::<Result<Vec<_>>>()?;
    Ok(resolve_key(scope.into(), &inputs)?)
}

/// Print the key for the given inputs, optionally with its cache status
pub fn show_cache_key(
    scope: ScopeArg,
    inputs: &[(String, PathBuf)],
    lookup: bool,
    settings: &Settings,
) -> Result<()> {
    let key = compute_key(scope, inputs)?;
    println!("{}", key.to_string().cyan());

    if lookup {
        let config = Config::load(settings)?;
        let store = FsCacheStore::new(&config.engine.cache_dir)?;
        let resolver = CacheKeyResolver::new(Arc::new(store));

        match resolver.lookup(&key)? {
            CacheLookup::Hit(entry) => println!(
                "  {} {} (from {})",
                "hit".green().bold(),
                entry.artifact_ref,
                entry.producing_stage
            ),
            CacheLookup::PartialHit(entry) => println!(
                "  {} restore from {}",
                "partial-hit".yellow().bold(),
                entry.key
            ),
            CacheLookup::Miss => println!("  {}", "miss".dimmed()),
        }
    }

    Ok(())
}
