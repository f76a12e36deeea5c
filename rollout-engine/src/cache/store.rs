//! Cache entry stores
//!
//! The cache store is the only state shared between concurrent pipeline
//! runs. Writes are create-if-absent: a second writer for the same key is a
//! no-op and never replaces or corrupts the first entry.

use rollout_core::domain::cache::CacheEntry;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use super::CacheError;

/// Storage backend for cache entries
pub trait CacheStore: Send + Sync {
    /// Exact lookup by rendered key
    fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;

    /// Newest entry whose rendered key starts with `prefix`
    fn latest_with_prefix(&self, prefix: &str) -> Result<Option<CacheEntry>, CacheError>;

    /// Stores the entry unless its key already exists
    ///
    /// Returns `true` if this call created the entry.
    fn put_if_absent(&self, entry: &CacheEntry) -> Result<bool, CacheError>;
}

/// In-memory cache store
///
/// Uses Arc<Mutex<HashMap>> so clones share one map across tasks.
#[derive(Clone, Default)]
pub struct InMemoryCacheStore {
    entries: Arc<Mutex<HashMap<String, CacheEntry>>>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> CacheError {
    CacheError::Store("cache store lock poisoned".to_string())
}

impl CacheStore for InMemoryCacheStore {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let entries = self.entries.lock().map_err(poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn latest_with_prefix(&self, prefix: &str) -> Result<Option<CacheEntry>, CacheError> {
        let entries = self.entries.lock().map_err(poisoned)?;
        Ok(entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(_, entry)| entry)
            .max_by_key(|entry| entry.created_at)
            .cloned())
    }

    fn put_if_absent(&self, entry: &CacheEntry) -> Result<bool, CacheError> {
        let mut entries = self.entries.lock().map_err(poisoned)?;
        let key = entry.key.to_string();
        if entries.contains_key(&key) {
            return Ok(false);
        }
        entries.insert(key, entry.clone());
        Ok(true)
    }
}

/// Filesystem cache store: one JSON document per key
///
/// Entries are written to a unique temporary file and then hard-linked to
/// their final name. Linking fails if the name exists, which makes the
/// create-if-absent check atomic across processes.
#[derive(Debug, Clone)]
pub struct FsCacheStore {
    dir: PathBuf,
}

impl FsCacheStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| CacheError::io(&dir, e))?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    fn read_entry(&self, path: &PathBuf) -> Result<Option<CacheEntry>, CacheError> {
        match fs::read_to_string(path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(entry) => Ok(Some(entry)),
                Err(e) => {
                    warn!("Ignoring unreadable cache entry {}: {}", path.display(), e);
                    Ok(None)
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::io(path, e)),
        }
    }
}

impl CacheStore for FsCacheStore {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        self.read_entry(&self.path_for(key))
    }

    fn latest_with_prefix(&self, prefix: &str) -> Result<Option<CacheEntry>, CacheError> {
        let mut latest: Option<CacheEntry> = None;

        for item in fs::read_dir(&self.dir).map_err(|e| CacheError::io(&self.dir, e))? {
            let item = item.map_err(|e| CacheError::io(&self.dir, e))?;
            let name = item.file_name().to_string_lossy().to_string();
            if !name.starts_with(prefix) || !name.ends_with(".json") {
                continue;
            }

            if let Some(entry) = self.read_entry(&item.path())? {
                let newer = latest
                    .as_ref()
                    .map(|current| entry.created_at > current.created_at)
                    .unwrap_or(true);
                if newer {
                    latest = Some(entry);
                }
            }
        }

        Ok(latest)
    }

    fn put_if_absent(&self, entry: &CacheEntry) -> Result<bool, CacheError> {
        let key = entry.key.to_string();
        let target = self.path_for(&key);
        let temp = self
            .dir
            .join(format!(".{}.{}.tmp", key, uuid::Uuid::new_v4()));

        let json = serde_json::to_vec_pretty(entry)
            .map_err(|e| CacheError::Store(format!("cannot serialize cache entry: {}", e)))?;
        fs::write(&temp, json).map_err(|e| CacheError::io(&temp, e))?;

        let created = match fs::hard_link(&temp, &target) {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!("Cache entry {} already present", key);
                false
            }
            Err(e) => {
                let _ = fs::remove_file(&temp);
                return Err(CacheError::io(&target, e));
            }
        };

        let _ = fs::remove_file(&temp);
        Ok(created)
    }
}
