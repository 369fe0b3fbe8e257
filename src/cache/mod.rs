//! # Result Cache Module
//!
//! Caches audit results per job key for the current day so repeated runs skip
//! the expensive external operation.
//!
//! ## Architecture
//!
//! ```text
//! CacheManager                      <- fingerprints keys, absorbs backend errors
//!   └── CacheBackend (enum)         <- chosen once at startup, no vtable
//!         ├── Redis(RedisCacheService)  <- server-side TTL, `prefix:*` namespace
//!         ├── File(FileCacheService)    <- entry files + LRU manifest
//!         └── NoOp(NoOpCacheService)    <- always-miss fallback
//! ```
//!
//! ## Design Decisions
//!
//! - **One-time selection**: Redis handshake failure falls back to the file
//!   cache for the whole process, never per call
//! - **Best-effort**: cache errors are logged and never propagated
//! - **SCAN for namespace clears**: never uses KEYS

pub mod entry;
pub mod errors;
pub mod fingerprint;
pub mod manager;
pub mod providers;
pub mod traits;

pub use entry::CacheEntry;
pub use errors::{CacheError, CacheResult};
pub use fingerprint::Fingerprint;
pub use manager::{CacheManager, CacheStats, KeyGuard};
pub use providers::{FileCacheService, FileCacheStats, NoOpCacheService};
pub use traits::CacheService;

#[cfg(feature = "cache-redis")]
pub use providers::RedisCacheService;
