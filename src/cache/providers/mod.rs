//! Cache provider implementations

pub mod file;
pub mod noop;

#[cfg(feature = "cache-redis")]
pub mod redis;

pub use file::{FileCacheService, FileCacheStats};
pub use noop::NoOpCacheService;

#[cfg(feature = "cache-redis")]
pub use self::redis::RedisCacheService;
