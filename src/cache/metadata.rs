use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Persisted next to every cached body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub version: u64,
    pub sensitive_fingerprint: Option<String>,
    /// Milliseconds since the Unix epoch
    pub created_at_millis: i64,
    pub encoding: String,
    pub client_version: Option<String>,
}

impl CacheMetadata {
    /// Milliseconds elapsed since the entry was written.
    ///
    /// Negative when the entry is dated in the future.
    pub fn age_millis(&self, now_millis: i64) -> i64 {
        now_millis - self.created_at_millis
    }
}

pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or_default()
}
