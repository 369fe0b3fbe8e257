//! Cache service trait definition

use super::errors::CacheResult;
use std::time::Duration;

/// Trait defining backend cache operations
///
/// Implemented by concrete cache providers (File, Redis, NoOp). Keys are
/// fingerprints produced by [`crate::cache::Fingerprint`]; values are opaque
/// serialized payloads.
pub trait CacheService: Send + Sync {
    /// Get a value from the cache by key
    ///
    /// Returns `Ok(Some(value))` on cache hit, `Ok(None)` on a miss or an
    /// expired entry.
    fn get(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = CacheResult<Option<String>>> + Send;

    /// Set a value in the cache with a TTL
    fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> impl std::future::Future<Output = CacheResult<()>> + Send;

    /// Delete a specific key from the cache
    fn delete(&self, key: &str) -> impl std::future::Future<Output = CacheResult<()>> + Send;

    /// Delete every entry owned by this cache, returning how many were removed
    fn clear(&self) -> impl std::future::Future<Output = CacheResult<u64>> + Send;

    /// Whether a live (unexpired) entry exists for the key
    fn exists(&self, key: &str) -> impl std::future::Future<Output = CacheResult<bool>> + Send;

    /// Check if the cache backend is healthy
    fn health_check(&self) -> impl std::future::Future<Output = CacheResult<bool>> + Send;

    /// Get the name of the cache provider
    fn provider_name(&self) -> &'static str;

    /// Whether state is shared with other processes
    fn is_distributed(&self) -> bool {
        false
    }
}
