//! Cache manager with one-time backend selection
//!
//! Uses enum dispatch over the concrete providers. The backend is chosen once
//! when the manager is built (Redis if the handshake succeeds, otherwise the file
//! cache, otherwise NoOp) and kept for the life of the process. Backend errors
//! are logged and absorbed here: `get` degrades to a miss, writes to a no-op.

use super::errors::CacheResult;
use super::fingerprint::Fingerprint;
use super::providers::{FileCacheService, NoOpCacheService};
use super::traits::CacheService;
use crate::config::{CacheBackendKind, CacheConfig};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};

#[cfg(feature = "cache-redis")]
use super::providers::RedisCacheService;

/// Internal cache backend enum for zero-cost dispatch
#[derive(Debug)]
enum CacheBackend {
    #[cfg(feature = "cache-redis")]
    Redis(Box<RedisCacheService>),
    File(Box<FileCacheService>),
    NoOp(NoOpCacheService),
}

impl CacheBackend {
    fn provider_name(&self) -> &'static str {
        match self {
            #[cfg(feature = "cache-redis")]
            Self::Redis(s) => s.provider_name(),
            Self::File(s) => s.provider_name(),
            Self::NoOp(s) => s.provider_name(),
        }
    }

    fn is_distributed(&self) -> bool {
        match self {
            #[cfg(feature = "cache-redis")]
            Self::Redis(s) => s.is_distributed(),
            Self::File(s) => s.is_distributed(),
            Self::NoOp(s) => s.is_distributed(),
        }
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        match self {
            #[cfg(feature = "cache-redis")]
            Self::Redis(s) => s.get(key).await,
            Self::File(s) => s.get(key).await,
            Self::NoOp(s) => s.get(key).await,
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        match self {
            #[cfg(feature = "cache-redis")]
            Self::Redis(s) => s.set(key, value, ttl).await,
            Self::File(s) => s.set(key, value, ttl).await,
            Self::NoOp(s) => s.set(key, value, ttl).await,
        }
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        match self {
            #[cfg(feature = "cache-redis")]
            Self::Redis(s) => s.delete(key).await,
            Self::File(s) => s.delete(key).await,
            Self::NoOp(s) => s.delete(key).await,
        }
    }

    async fn clear(&self) -> CacheResult<u64> {
        match self {
            #[cfg(feature = "cache-redis")]
            Self::Redis(s) => s.clear().await,
            Self::File(s) => s.clear().await,
            Self::NoOp(s) => s.clear().await,
        }
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        match self {
            #[cfg(feature = "cache-redis")]
            Self::Redis(s) => s.exists(key).await,
            Self::File(s) => s.exists(key).await,
            Self::NoOp(s) => s.exists(key).await,
        }
    }

    async fn health_check(&self) -> CacheResult<bool> {
        match self {
            #[cfg(feature = "cache-redis")]
            Self::Redis(s) => s.health_check().await,
            Self::File(s) => s.health_check().await,
            Self::NoOp(s) => s.health_check().await,
        }
    }
}

/// Counters kept by the manager
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub invalidations: u64,
    /// Backend errors logged and downgraded to a miss or no-op
    pub absorbed_errors: u64,
}

#[derive(Debug, Default)]
struct AtomicCacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    invalidations: AtomicU64,
    absorbed_errors: AtomicU64,
}

/// Exclusive hold on one job key; released on drop
#[derive(Debug)]
pub struct KeyGuard {
    key: Fingerprint,
    locks: Arc<DashMap<Fingerprint, Arc<Mutex<()>>>>,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        // The map and this guard's mutex are the only holders when uncontended
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) <= 2);
    }
}

/// Cache front-end used by the orchestrator
///
/// Callers pass job keys; fingerprinting happens here and raw fingerprints are
/// never exposed.
#[derive(Debug)]
pub struct CacheManager {
    backend: CacheBackend,
    default_ttl: Duration,
    stats: AtomicCacheStats,
    key_locks: Arc<DashMap<Fingerprint, Arc<Mutex<()>>>>,
}

impl CacheManager {
    /// Build the manager from configuration; never fails
    pub async fn from_config(config: &CacheConfig) -> Self {
        let backend = Self::create_backend(config).await;
        info!(
            backend = backend.provider_name(),
            distributed = backend.is_distributed(),
            ttl_seconds = config.ttl_seconds,
            "Cache manager initialized"
        );
        Self::with_backend(backend, config.ttl())
    }

    /// Manager over an already opened file cache
    pub fn file(service: FileCacheService, default_ttl: Duration) -> Self {
        Self::with_backend(CacheBackend::File(Box::new(service)), default_ttl)
    }

    /// Manager that never caches
    pub fn disabled() -> Self {
        Self::with_backend(CacheBackend::NoOp(NoOpCacheService::new()), Duration::ZERO)
    }

    fn with_backend(backend: CacheBackend, default_ttl: Duration) -> Self {
        Self {
            backend,
            default_ttl,
            stats: AtomicCacheStats::default(),
            key_locks: Arc::new(DashMap::new()),
        }
    }

    async fn create_backend(config: &CacheConfig) -> CacheBackend {
        if !config.enabled {
            info!("Result cache disabled by configuration");
            return CacheBackend::NoOp(NoOpCacheService::new());
        }

        match config.backend {
            CacheBackendKind::None => CacheBackend::NoOp(NoOpCacheService::new()),
            CacheBackendKind::Redis => Self::create_redis_backend(config).await,
            CacheBackendKind::File => Self::create_file_backend(config).await,
        }
    }

    /// Attempt a Redis handshake, falling back to the file cache for this process
    #[cfg(feature = "cache-redis")]
    async fn create_redis_backend(config: &CacheConfig) -> CacheBackend {
        match RedisCacheService::from_config(&config.redis).await {
            Ok(service) => {
                info!(backend = "redis", "Remote cache provider initialized successfully");
                CacheBackend::Redis(Box::new(service))
            }
            Err(e) => {
                warn!(
                    error = %e,
                    "Failed to connect to Redis, falling back to file cache for this process"
                );
                Self::create_file_backend(config).await
            }
        }
    }

    /// Fallback when cache-redis feature is not enabled
    #[cfg(not(feature = "cache-redis"))]
    async fn create_redis_backend(config: &CacheConfig) -> CacheBackend {
        warn!("Redis cache backend requested but 'cache-redis' feature not enabled, using file cache");
        Self::create_file_backend(config).await
    }

    async fn create_file_backend(config: &CacheConfig) -> CacheBackend {
        match FileCacheService::open(&config.directory, config.max_entries).await {
            Ok(service) => CacheBackend::File(Box::new(service)),
            Err(e) => {
                warn!(
                    directory = %config.directory.display(),
                    error = %e,
                    "Failed to open file cache, caching disabled for this process"
                );
                CacheBackend::NoOp(NoOpCacheService::new())
            }
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.provider_name()
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self.backend, CacheBackend::NoOp(_))
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Cached value for `job_key`, or `None` on miss, expiry or backend error
    pub async fn get(&self, job_key: &str) -> Option<serde_json::Value> {
        let fingerprint = Fingerprint::today(job_key);

        let raw = match self.backend.get(fingerprint.as_str()).await {
            Ok(raw) => raw,
            Err(e) => {
                self.absorb("get", job_key, &e);
                None
            }
        };

        let value = raw.and_then(|raw| match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                self.absorb("decode", job_key, &e);
                None
            }
        });

        let counter = if value.is_some() {
            &self.stats.hits
        } else {
            &self.stats.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        value
    }

    /// Store `value` for `job_key`; `ttl` defaults to the configured TTL
    pub async fn set(&self, job_key: &str, value: &serde_json::Value, ttl: Option<Duration>) {
        let fingerprint = Fingerprint::today(job_key);
        let ttl = ttl.unwrap_or(self.default_ttl);

        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                self.absorb("encode", job_key, &e);
                return;
            }
        };

        match self.backend.set(fingerprint.as_str(), &raw, ttl).await {
            Ok(()) => {
                self.stats.writes.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => self.absorb("set", job_key, &e),
        }
    }

    pub async fn invalidate(&self, job_key: &str) {
        let fingerprint = Fingerprint::today(job_key);
        match self.backend.delete(fingerprint.as_str()).await {
            Ok(()) => {
                self.stats.invalidations.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => self.absorb("invalidate", job_key, &e),
        }
    }

    /// Drop every entry; returns how many were removed (0 on error)
    pub async fn invalidate_all(&self) -> u64 {
        match self.backend.clear().await {
            Ok(removed) => {
                self.stats
                    .invalidations
                    .fetch_add(removed, Ordering::Relaxed);
                info!(removed, "Cache invalidated");
                removed
            }
            Err(e) => {
                self.absorb("invalidate_all", "*", &e);
                0
            }
        }
    }

    pub async fn exists(&self, job_key: &str) -> bool {
        let fingerprint = Fingerprint::today(job_key);
        match self.backend.exists(fingerprint.as_str()).await {
            Ok(exists) => exists,
            Err(e) => {
                self.absorb("exists", job_key, &e);
                false
            }
        }
    }

    pub async fn health_check(&self) -> bool {
        match self.backend.health_check().await {
            Ok(healthy) => healthy,
            Err(e) => {
                self.absorb("health_check", "-", &e);
                false
            }
        }
    }

    /// Serialize work on one job key within this process
    ///
    /// Held across check-compute-store so concurrent workers never compute the
    /// same fingerprint twice.
    pub async fn lock_key(&self, job_key: &str) -> KeyGuard {
        let key = Fingerprint::today(job_key);
        let lock = self
            .key_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let guard = lock.lock_owned().await;
        KeyGuard {
            key,
            locks: Arc::clone(&self.key_locks),
            _guard: guard,
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            writes: self.stats.writes.load(Ordering::Relaxed),
            invalidations: self.stats.invalidations.load(Ordering::Relaxed),
            absorbed_errors: self.stats.absorbed_errors.load(Ordering::Relaxed),
        }
    }

    fn absorb(&self, operation: &str, job_key: &str, error: &dyn std::fmt::Display) {
        self.stats.absorbed_errors.fetch_add(1, Ordering::Relaxed);
        warn!(
            backend = self.backend.provider_name(),
            operation,
            job_key,
            error = %error,
            "Cache operation failed, continuing without cache"
        );
    }

    #[cfg(test)]
    fn tracked_key_locks(&self) -> usize {
        self.key_locks.len()
    }
}
