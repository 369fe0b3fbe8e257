//! Redis cache provider
//!
//! Uses `redis::aio::ConnectionManager` for async multiplexed connections.
//! Every key is namespaced as `{key_prefix}:{fingerprint}` and TTL is enforced
//! by the server. Requires the `cache-redis` feature flag.

use crate::cache::errors::{CacheError, CacheResult};
use crate::cache::traits::CacheService;
use crate::config::loader::redact_url;
use crate::config::RedisConfig;
use std::time::Duration;
use tracing::debug;

/// Redis-backed cache service using ConnectionManager
///
/// Provides async multiplexed connections with automatic reconnection.
/// Uses SCAN for namespace deletion to avoid blocking the server.
#[derive(Clone)]
pub struct RedisCacheService {
    connection_manager: redis::aio::ConnectionManager,
    key_prefix: String,
}

impl std::fmt::Debug for RedisCacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCacheService")
            .field("connection_manager", &"ConnectionManager")
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

impl RedisCacheService {
    /// Connect and handshake (PING) within the configured timeout
    pub async fn from_config(config: &RedisConfig) -> CacheResult<Self> {
        let client = redis::Client::open(config.url.as_str()).map_err(|e| {
            CacheError::ConnectionError(format!("Failed to create Redis client: {e}"))
        })?;

        let timeout = config.connection_timeout();
        let connection_manager =
            tokio::time::timeout(timeout, redis::aio::ConnectionManager::new(client))
                .await
                .map_err(|_| {
                    CacheError::Timeout(format!(
                        "Redis connection not established within {}s",
                        timeout.as_secs()
                    ))
                })?
                .map_err(|e| {
                    CacheError::ConnectionError(format!("Failed to connect to Redis: {e}"))
                })?;

        let service = Self {
            connection_manager,
            key_prefix: config.key_prefix.clone(),
        };

        let healthy = tokio::time::timeout(timeout, service.health_check())
            .await
            .map_err(|_| CacheError::Timeout("Redis PING timed out".to_string()))??;
        if !healthy {
            return Err(CacheError::ConnectionError(
                "Redis PING returned unexpected reply".to_string(),
            ));
        }

        debug!(url = %redact_url(&config.url), prefix = %config.key_prefix, "Redis cache service connected");
        Ok(service)
    }

    fn namespaced(&self, key: &str) -> String {
        namespaced_key(&self.key_prefix, key)
    }

    /// SCAN pattern matching every key this service owns
    pub fn namespace_pattern(&self) -> String {
        format!("{}:*", self.key_prefix)
    }
}

impl CacheService for RedisCacheService {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.connection_manager.clone();
        let result: Option<String> = redis::cmd("GET")
            .arg(self.namespaced(key))
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::BackendError(format!("Redis GET failed: {e}")))?;

        if result.is_some() {
            debug!(key, "Cache HIT");
        } else {
            debug!(key, "Cache MISS");
        }

        Ok(result)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        let mut conn = self.connection_manager.clone();
        let ttl_millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);

        let _: () = redis::cmd("SET")
            .arg(self.namespaced(key))
            .arg(value)
            .arg("PX")
            .arg(ttl_millis)
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::BackendError(format!("Redis SET failed: {e}")))?;

        debug!(key, ttl_millis, "Cache SET");
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.connection_manager.clone();

        let _: () = redis::cmd("DEL")
            .arg(self.namespaced(key))
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::BackendError(format!("Redis DEL failed: {e}")))?;

        debug!(key, "Cache DEL");
        Ok(())
    }

    async fn clear(&self) -> CacheResult<u64> {
        let mut conn = self.connection_manager.clone();
        let pattern = self.namespace_pattern();
        let mut deleted: u64 = 0;
        let mut cursor: u64 = 0;

        // Use SCAN to iterate without blocking the server
        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .map_err(|e| CacheError::BackendError(format!("Redis SCAN failed: {e}")))?;

            if !keys.is_empty() {
                let count: u64 = redis::cmd("DEL")
                    .arg(&keys)
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| {
                        CacheError::BackendError(format!("Redis DEL (batch) failed: {e}"))
                    })?;
                deleted += count;
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        debug!(pattern = %pattern, deleted, "Cache namespace cleared");
        Ok(deleted)
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.connection_manager.clone();
        let count: u64 = redis::cmd("EXISTS")
            .arg(self.namespaced(key))
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::BackendError(format!("Redis EXISTS failed: {e}")))?;
        Ok(count > 0)
    }

    async fn health_check(&self) -> CacheResult<bool> {
        let mut conn = self.connection_manager.clone();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::BackendError(format!("Redis PING failed: {e}")))?;

        Ok(pong == "PONG")
    }

    fn provider_name(&self) -> &'static str {
        "redis"
    }

    fn is_distributed(&self) -> bool {
        true
    }
}

fn namespaced_key(prefix: &str, key: &str) -> String {
    format!("{prefix}:{key}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespaced_key() {
        assert_eq!(namespaced_key("speedaudit", "ab12"), "speedaudit:ab12");
    }

    #[tokio::test]
    async fn test_unreachable_server_fails_handshake() {
        let config = RedisConfig {
            // Port 1 is reserved and refuses connections
            url: "redis://127.0.0.1:1".to_string(),
            key_prefix: "test".to_string(),
            connection_timeout_seconds: 1,
        };
        assert!(RedisCacheService::from_config(&config).await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_url_is_connection_error() {
        let config = RedisConfig {
            url: "not-a-url".to_string(),
            ..RedisConfig::default()
        };
        assert!(matches!(
            RedisCacheService::from_config(&config).await,
            Err(CacheError::ConnectionError(_))
        ));
    }
}
