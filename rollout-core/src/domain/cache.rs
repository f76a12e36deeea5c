//! Build cache domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which cache a key belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheScope {
    /// Installed dependencies (keyed by the dependency manifest)
    Dependency,
    /// Container image layers (keyed by manifest, Dockerfile and sources)
    BuildLayer,
    /// Results of a passing test run
    TestArtifact,
}

impl CacheScope {
    /// Tag mixed into every key of this scope and used as its restore prefix
    pub fn tag(&self) -> &'static str {
        match self {
            CacheScope::Dependency => "deps",
            CacheScope::BuildLayer => "layers",
            CacheScope::TestArtifact => "tests",
        }
    }

    /// Only dependency caches can be partially restored
    pub fn supports_partial_restore(&self) -> bool {
        matches!(self, CacheScope::Dependency)
    }
}

impl fmt::Display for CacheScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Content digest (lowercase hex sha256) of a cache input
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wraps an already computed hex digest
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Deterministic identifier of a cached artifact
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub scope: CacheScope,
    pub digest: String,
}

impl CacheKey {
    /// Prefix shared by every key in the same scope
    pub fn restore_prefix(&self) -> String {
        format!("{}-", self.scope.tag())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.scope.tag(), self.digest)
    }
}

/// A stored cache record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,

    /// Stage that produced the artifact
    pub producing_stage: String,

    /// Human description of what invalidates this entry
    pub invalidation_trigger: String,

    /// Reference to the cached artifact (image ref, layer id, report id)
    pub artifact_ref: String,

    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_display_includes_scope_tag() {
        let key = CacheKey {
            scope: CacheScope::Dependency,
            digest: "abc123".to_string(),
        };
        assert_eq!(key.to_string(), "deps-abc123");
        assert!(key.to_string().starts_with(&key.restore_prefix()));
    }

    #[test]
    fn test_partial_restore_only_for_dependencies() {
        assert!(CacheScope::Dependency.supports_partial_restore());
        assert!(!CacheScope::BuildLayer.supports_partial_restore());
        assert!(!CacheScope::TestArtifact.supports_partial_restore());
    }

    #[test]
    fn test_fingerprint_is_lowercased() {
        assert_eq!(Fingerprint::from_hex("ABCDEF").as_str(), "abcdef");
    }
}
