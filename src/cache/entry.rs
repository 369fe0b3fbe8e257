//! Self-contained cache record persisted by the file backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One cached value with its lifetime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub value: String,
    pub created_at: DateTime<Utc>,
    pub expiry: DateTime<Utc>,
}

impl CacheEntry {
    /// Entry created now, expiring after `ttl`
    pub fn new(value: impl Into<String>, ttl: Duration) -> Self {
        Self::created_at(value, Utc::now(), ttl)
    }

    pub fn created_at(value: impl Into<String>, created_at: DateTime<Utc>, ttl: Duration) -> Self {
        let expiry = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| created_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Self {
            value: value.into(),
            created_at,
            expiry,
        }
    }

    /// Valid iff `now < expiry`
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expiry
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_is_created_plus_ttl() {
        let created = Utc::now();
        let entry = CacheEntry::created_at("{}", created, Duration::from_secs(90));
        assert_eq!(entry.expiry - entry.created_at, chrono::Duration::seconds(90));
        assert!(entry.is_valid_at(created));
        assert!(entry.is_valid_at(created + chrono::Duration::seconds(89)));
        assert!(!entry.is_valid_at(created + chrono::Duration::seconds(90)));
    }

    #[test]
    fn test_huge_ttl_saturates() {
        let entry = CacheEntry::new("v", Duration::MAX);
        assert_eq!(entry.expiry, DateTime::<Utc>::MAX_UTC);
        assert!(entry.is_valid());
    }
}
