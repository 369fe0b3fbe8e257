//! Cache key derivation.
//!
//! A fingerprint is the SHA-256 of `job_key|YYYY-MM-DD` (UTC calendar day), hex
//! encoded. Results therefore stay cached for at most one calendar day even when
//! the TTL is longer.

use chrono::{NaiveDate, Utc};
use sha2::{Digest, Sha256};
use std::fmt;

/// Length of a fingerprint in hex characters
pub const FINGERPRINT_LEN: usize = 64;

/// Stable cache key for a job within a day bucket
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint for `job_key` in today's (UTC) bucket
    pub fn today(job_key: &str) -> Self {
        Self::for_day(job_key, Utc::now().date_naive())
    }

    /// Fingerprint for `job_key` in the given day bucket
    pub fn for_day(job_key: &str, day: NaiveDate) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(job_key.as_bytes());
        hasher.update(b"|");
        hasher.update(day.format("%Y-%m-%d").to_string().as_bytes());
        Self(hex::encode(hasher.finalize()))
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

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
