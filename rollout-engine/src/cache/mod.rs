//! Cache key resolution
//!
//! Keys are a pure function of their declared inputs: the inputs are sorted
//! by name and hashed as `tag NUL (name NUL fingerprint NUL)*`. Reordering
//! the inputs never changes the key; changing any fingerprint always does.

pub mod fingerprint;
pub mod store;

use chrono::{DateTime, Utc};
use rollout_core::domain::cache::{CacheEntry, CacheKey, CacheScope, Fingerprint};
use rollout_core::domain::result::CacheOutcome;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

pub use store::{CacheStore, FsCacheStore, InMemoryCacheStore};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("duplicate cache input '{0}'")]
    DuplicateInput(String),

    #[error("cache key for scope '{0}' has no inputs")]
    EmptyInputs(CacheScope),

    #[error("cache store error: {0}")]
    Store(String),
}

impl CacheError {
    pub(crate) fn io(path: &Path, err: std::io::Error) -> Self {
        CacheError::Store(format!("{}: {}", path.display(), err))
    }
}

/// One named input of a cache key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheInput {
    pub name: String,
    pub fingerprint: Fingerprint,
}

impl CacheInput {
    pub fn new(name: impl Into<String>, fingerprint: Fingerprint) -> Self {
        Self {
            name: name.into(),
            fingerprint,
        }
    }
}

/// Result of looking a key up in the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    Hit(CacheEntry),
    /// Exact key missed but an older entry of the same scope can be restored
    PartialHit(CacheEntry),
    Miss,
}

impl CacheLookup {
    pub fn outcome(&self) -> CacheOutcome {
        match self {
            CacheLookup::Hit(_) => CacheOutcome::Hit,
            CacheLookup::PartialHit(_) => CacheOutcome::PartialHit,
            CacheLookup::Miss => CacheOutcome::Miss,
        }
    }

    pub fn entry(&self) -> Option<&CacheEntry> {
        match self {
            CacheLookup::Hit(entry) | CacheLookup::PartialHit(entry) => Some(entry),
            CacheLookup::Miss => None,
        }
    }
}

/// Derives the key for `inputs` in `scope`
pub fn resolve_key(scope: CacheScope, inputs: &[CacheInput]) -> Result<CacheKey, CacheError> {
    if inputs.is_empty() {
        return Err(CacheError::EmptyInputs(scope));
    }

    let mut sorted: Vec<&CacheInput> = inputs.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    if let Some(pair) = sorted.windows(2).find(|pair| pair[0].name == pair[1].name) {
        return Err(CacheError::DuplicateInput(pair[0].name.clone()));
    }

    let mut hasher = Sha256::new();
    hasher.update(scope.tag().as_bytes());
    hasher.update([0u8]);
    for input in sorted {
        hasher.update(input.name.as_bytes());
        hasher.update([0u8]);
        hasher.update(input.fingerprint.as_str().as_bytes());
        hasher.update([0u8]);
    }

    Ok(CacheKey {
        scope,
        digest: hex::encode(hasher.finalize()),
    })
}

/// Resolves keys and decides Hit / PartialHit / Miss against a store
#[derive(Clone)]
pub struct CacheKeyResolver {
    store: Arc<dyn CacheStore>,
}

impl CacheKeyResolver {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryCacheStore::new()))
    }

    pub fn resolve(&self, scope: CacheScope, inputs: &[CacheInput]) -> Result<CacheKey, CacheError> {
        resolve_key(scope, inputs)
    }

    pub fn lookup(&self, key: &CacheKey) -> Result<CacheLookup, CacheError> {
        if let Some(entry) = self.store.get(&key.to_string())? {
            debug!("Cache hit for {}", key);
            return Ok(CacheLookup::Hit(entry));
        }

        if key.scope.supports_partial_restore() {
            if let Some(entry) = self.store.latest_with_prefix(&key.restore_prefix())? {
                debug!("Partial cache hit for {} via {}", key, entry.key);
                return Ok(CacheLookup::PartialHit(entry));
            }
        }

        debug!("Cache miss for {}", key);
        Ok(CacheLookup::Miss)
    }

    /// Records an entry; returns `false` if the key was already present
    pub fn record(&self, entry: &CacheEntry) -> Result<bool, CacheError> {
        self.store.put_if_absent(entry)
    }

    /// Convenience for stages recording the artifact they just produced
    pub fn record_artifact(
        &self,
        key: &CacheKey,
        producing_stage: &str,
        invalidation_trigger: &str,
        artifact_ref: &str,
        created_at: DateTime<Utc>,
    ) -> Result<bool, CacheError> {
        self.record(&CacheEntry {
            key: key.clone(),
            producing_stage: producing_stage.to_string(),
            invalidation_trigger: invalidation_trigger.to_string(),
            artifact_ref: artifact_ref.to_string(),
            created_at,
        })
    }
}

impl std::fmt::Debug for CacheKeyResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheKeyResolver").finish_non_exhaustive()
    }
}
