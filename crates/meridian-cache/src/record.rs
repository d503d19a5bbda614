//! The `CacheRecord` entity (§3) and the policy knobs that govern it
//! (§6 `cache.*` configuration surface).

use std::time::Duration;

use meridian_fingerprint::Fingerprint;
use time::OffsetDateTime;

/// A stored response payload plus enough bookkeeping to serve it from either
/// cache tier and to invalidate it later.
#[derive(Debug, Clone)]
pub struct CacheRecord {
    pub fingerprint: Fingerprint,
    pub content_type: String,
    pub payload: Vec<u8>,
    pub created_at: OffsetDateTime,
    pub ttl: Duration,
    /// Tag keys this record can be invalidated by (`cache.invalidate_by_tag`).
    pub tags: Vec<String>,
}

impl CacheRecord {
    pub fn new(fingerprint: Fingerprint, content_type: impl Into<String>, payload: Vec<u8>, ttl: Duration) -> Self {
        Self {
            fingerprint,
            content_type: content_type.into(),
            payload,
            created_at: OffsetDateTime::now_utc(),
            ttl,
            tags: Vec::new(),
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn is_expired(&self) -> bool {
        OffsetDateTime::now_utc() > self.created_at + self.ttl
    }
}

/// The `cache.*` knobs (§6 configuration surface).
#[derive(Debug, Clone)]
pub struct CachePolicy {
    pub enabled: bool,
    pub direct_capacity: u64,
    pub direct_ttl: Duration,
    pub vector_threshold: f32,
    pub vector_dimension: usize,
    pub single_flight_deadline: Duration,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            direct_capacity: 10_000,
            direct_ttl: Duration::from_secs(600),
            vector_threshold: 0.92,
            vector_dimension: 1536,
            single_flight_deadline: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_fingerprint::Fingerprint;

    fn dummy_fingerprint() -> Fingerprint {
        Fingerprint::from_bytes([7u8; 32])
    }

    #[test]
    fn fresh_record_is_not_expired() {
        let record = CacheRecord::new(dummy_fingerprint(), "application/json", vec![1, 2, 3], Duration::from_secs(60));
        assert!(!record.is_expired());
    }

    #[test]
    fn zero_ttl_record_is_immediately_expired() {
        let record = CacheRecord::new(dummy_fingerprint(), "application/json", vec![], Duration::ZERO);
        std::thread::sleep(Duration::from_millis(5));
        assert!(record.is_expired());
    }
}
