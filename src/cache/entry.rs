use crate::compression::CompressedPayload;
use crate::registry::ModuleId;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Cache entry with metadata
#[derive(Debug)]
pub struct CacheEntry {
    pub module_id: ModuleId,
    pub content_hash: String,
    pub payload: Arc<CompressedPayload>,
    pub created_at: DateTime<Utc>,
    pub ttl: Duration,
    pub dependency_fingerprint: String,
    last_access: AtomicU64,
    size_bytes: usize,
}

impl CacheEntry {
    pub fn new(
        module_id: ModuleId,
        content_hash: String,
        payload: CompressedPayload,
        ttl: Duration,
        dependency_fingerprint: String,
        tick: u64,
    ) -> Self {
        Self::with_created_at(
            module_id,
            content_hash,
            payload,
            Utc::now(),
            ttl,
            dependency_fingerprint,
            tick,
        )
    }

    pub(crate) fn with_created_at(
        module_id: ModuleId,
        content_hash: String,
        payload: CompressedPayload,
        created_at: DateTime<Utc>,
        ttl: Duration,
        dependency_fingerprint: String,
        tick: u64,
    ) -> Self {
        let size_bytes = payload.compressed_size() + module_id.len() + content_hash.len();
        Self {
            module_id,
            content_hash,
            payload: Arc::new(payload),
            created_at,
            ttl,
            dependency_fingerprint,
            last_access: AtomicU64::new(tick),
            size_bytes,
        }
    }

    pub fn ttl_seconds(&self) -> u64 {
        self.ttl.as_secs()
    }

    /// Valid only while `now < created_at + ttl`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match (now - self.created_at).to_std() {
            Ok(age) => age >= self.ttl,
            // created_at in the future (clock skew): treat as fresh
            Err(_) => false,
        }
    }

    pub fn size(&self) -> usize {
        self.size_bytes
    }

    pub(crate) fn touch(&self, tick: u64) {
        self.last_access.store(tick, Ordering::Relaxed);
    }

    pub(crate) fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::CompressionMode;

    fn entry(ttl: Duration) -> CacheEntry {
        CacheEntry::new(
            "m".into(),
            "h".into(),
            CompressedPayload::raw("body".into(), CompressionMode::Bypassed),
            ttl,
            "fp".into(),
            1,
        )
    }

    #[test]
    fn test_expiry() {
        let fresh = entry(Duration::from_secs(60));
        assert!(!fresh.is_expired(Utc::now()));
        assert!(fresh.is_expired(Utc::now() + chrono::Duration::seconds(61)));

        let zero = entry(Duration::ZERO);
        assert!(zero.is_expired(Utc::now()));
    }

    #[test]
    fn test_size_and_access() {
        let e = entry(Duration::from_secs(1));
        assert_eq!(e.size(), 4 + 1 + 1);
        assert_eq!(e.last_access(), 1);
        e.touch(9);
        assert_eq!(e.last_access(), 9);
        assert_eq!(e.ttl_seconds(), 1);
    }
}
