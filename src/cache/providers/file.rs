//! File-backed LRU cache provider
//!
//! Layout: one `<fingerprint>.json` file per [`CacheEntry`] plus a
//! `cache_index.json` manifest holding the recency order (least recent first)
//! and a last-updated timestamp. Every mutation of the index or of an entry
//! happens under one lock, and files are replaced atomically via temp file +
//! rename so a crash never leaves a half-written record.

use crate::cache::entry::CacheEntry;
use crate::cache::errors::{CacheError, CacheResult};
use crate::cache::traits::CacheService;
use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Manifest file name inside the cache directory
pub const INDEX_FILE: &str = "cache_index.json";

const ENTRY_EXTENSION: &str = "json";
const TMP_EXTENSION: &str = "tmp";

/// On-disk form of the recency index
#[derive(Debug, Serialize, Deserialize)]
struct IndexManifest {
    entries: Vec<String>,
    last_updated: DateTime<Utc>,
}

/// In-memory recency index; front is least recently used
#[derive(Debug, Default)]
struct CacheIndex {
    order: IndexSet<String>,
}

impl CacheIndex {
    fn touch(&mut self, key: &str) {
        self.order.shift_remove(key);
        self.order.insert(key.to_string());
    }
}

/// Counters specific to the file backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCacheStats {
    pub entries: usize,
    pub evictions: u64,
    pub expirations: u64,
}

/// LRU cache persisted to a local directory
#[derive(Debug)]
pub struct FileCacheService {
    directory: PathBuf,
    max_entries: usize,
    index: Mutex<CacheIndex>,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl FileCacheService {
    /// Open (or create) a cache directory and reconcile its manifest with the
    /// entry files actually present
    pub async fn open(directory: impl Into<PathBuf>, max_entries: usize) -> CacheResult<Self> {
        let directory = directory.into();
        tokio::fs::create_dir_all(&directory).await?;

        let service = Self {
            directory,
            max_entries: max_entries.max(1),
            index: Mutex::new(CacheIndex::default()),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        };

        service.reconcile().await?;
        Ok(service)
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Keys in recency order, least recently used first
    pub async fn keys(&self) -> Vec<String> {
        self.index.lock().await.order.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.index.lock().await.order.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> FileCacheStats {
        FileCacheStats {
            entries: self.len().await,
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }

    // ========================================================================
    // Startup reconciliation
    // ========================================================================

    async fn reconcile(&self) -> CacheResult<()> {
        let mut index = self.index.lock().await;

        let manifest_order = match self.read_manifest().await {
            Ok(order) => order,
            Err(e) => {
                warn!(
                    directory = %self.directory.display(),
                    error = %e,
                    "Cache manifest unreadable, rebuilding from entry files"
                );
                Vec::new()
            }
        };

        let mut on_disk = HashSet::new();
        let mut dir = tokio::fs::read_dir(&self.directory).await?;
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if file_name == INDEX_FILE {
                continue;
            }
            match path.extension().and_then(|e| e.to_str()) {
                Some(TMP_EXTENSION) => {
                    debug!(path = %path.display(), "Removing leftover temp file");
                    remove_if_exists(&path).await?;
                }
                Some(ENTRY_EXTENSION) => {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        on_disk.insert(stem.to_string());
                    }
                }
                _ => {}
            }
        }

        let mut dropped = 0usize;
        for key in manifest_order {
            if on_disk.contains(&key) {
                index.order.insert(key);
            } else {
                dropped += 1;
            }
        }

        let mut orphans = 0usize;
        for key in on_disk.iter().filter(|k| !index.order.contains(*k)) {
            remove_if_exists(&self.entry_path(key)).await?;
            orphans += 1;
        }

        let evicted = self.enforce_capacity(&mut index).await?;
        self.write_manifest(&index).await?;

        info!(
            directory = %self.directory.display(),
            entries = index.order.len(),
            max_entries = self.max_entries,
            dropped_index_entries = dropped,
            orphan_files_removed = orphans,
            evicted,
            "File cache opened"
        );
        Ok(())
    }

    async fn read_manifest(&self) -> CacheResult<Vec<String>> {
        match tokio::fs::read(self.directory.join(INDEX_FILE)).await {
            Ok(bytes) => {
                let manifest: IndexManifest = serde_json::from_slice(&bytes)?;
                Ok(manifest.entries)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    // ========================================================================
    // Helpers (callers hold the index lock)
    // ========================================================================

    fn entry_path(&self, key: &str) -> PathBuf {
        self.directory.join(format!("{key}.{ENTRY_EXTENSION}"))
    }

    async fn write_manifest(&self, index: &CacheIndex) -> CacheResult<()> {
        let manifest = IndexManifest {
            entries: index.order.iter().cloned().collect(),
            last_updated: Utc::now(),
        };
        let bytes = serde_json::to_vec_pretty(&manifest)?;
        write_atomic(&self.directory.join(INDEX_FILE), &bytes).await
    }

    async fn read_entry(&self, key: &str) -> CacheResult<Option<CacheEntry>> {
        match tokio::fs::read(self.entry_path(key)).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(entry) => Ok(Some(entry)),
                Err(e) => {
                    warn!(key, error = %e, "Corrupt cache entry, treating as missing");
                    Ok(None)
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Drop a key from the index and disk
    async fn purge(&self, index: &mut CacheIndex, key: &str) -> CacheResult<bool> {
        let was_indexed = index.order.shift_remove(key);
        remove_if_exists(&self.entry_path(key)).await?;
        Ok(was_indexed)
    }

    /// Evict least recently used entries until within capacity
    async fn enforce_capacity(&self, index: &mut CacheIndex) -> CacheResult<usize> {
        let mut evicted = 0;
        while index.order.len() > self.max_entries {
            let Some(oldest) = index.order.shift_remove_index(0) else {
                break;
            };
            remove_if_exists(&self.entry_path(&oldest)).await?;
            self.evictions.fetch_add(1, Ordering::Relaxed);
            evicted += 1;
            debug!(key = %oldest, "Evicted least recently used cache entry");
        }
        Ok(evicted)
    }

    /// Load a live entry, purging it when missing, corrupt or expired
    async fn load_live(&self, index: &mut CacheIndex, key: &str) -> CacheResult<Option<CacheEntry>> {
        match self.read_entry(key).await? {
            Some(entry) if entry.is_valid() => Ok(Some(entry)),
            Some(_) => {
                self.purge(index, key).await?;
                self.expirations.fetch_add(1, Ordering::Relaxed);
                self.write_manifest(index).await?;
                debug!(key, "Cache entry expired");
                Ok(None)
            }
            None => {
                if self.purge(index, key).await? {
                    self.write_manifest(index).await?;
                }
                Ok(None)
            }
        }
    }
}

impl CacheService for FileCacheService {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        validate_key(key)?;
        let mut index = self.index.lock().await;

        let Some(entry) = self.load_live(&mut index, key).await? else {
            return Ok(None);
        };

        index.touch(key);
        self.write_manifest(&index).await?;
        debug!(key, "Cache HIT");
        Ok(Some(entry.value))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        validate_key(key)?;
        let entry = CacheEntry::new(value, ttl);
        let bytes = serde_json::to_vec(&entry)?;

        let mut index = self.index.lock().await;
        write_atomic(&self.entry_path(key), &bytes).await?;
        index.touch(key);
        self.enforce_capacity(&mut index).await?;
        self.write_manifest(&index).await?;

        debug!(key, ttl_seconds = ttl.as_secs(), "Cache SET");
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        validate_key(key)?;
        let mut index = self.index.lock().await;
        self.purge(&mut index, key).await?;
        self.write_manifest(&index).await?;
        debug!(key, "Cache DEL");
        Ok(())
    }

    async fn clear(&self) -> CacheResult<u64> {
        let mut index = self.index.lock().await;
        let keys: Vec<String> = index.order.drain(..).collect();
        for key in &keys {
            remove_if_exists(&self.entry_path(key)).await?;
        }
        self.write_manifest(&index).await?;

        debug!(deleted = keys.len(), "Cache cleared");
        Ok(keys.len() as u64)
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        validate_key(key)?;
        let mut index = self.index.lock().await;
        Ok(self.load_live(&mut index, key).await?.is_some())
    }

    async fn health_check(&self) -> CacheResult<bool> {
        Ok(tokio::fs::metadata(&self.directory).await?.is_dir())
    }

    fn provider_name(&self) -> &'static str {
        "file"
    }
}

/// Keys become file names, so only plain fingerprint characters are accepted
fn validate_key(key: &str) -> CacheResult<()> {
    let ok = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(CacheError::BackendError(format!("invalid cache key '{key}'")))
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> CacheResult<()> {
    let tmp = path.with_extension(TMP_EXTENSION);
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

async fn remove_if_exists(path: &Path) -> CacheResult<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
