use std::num::NonZeroUsize;

use lru::LruCache;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

pub const DEFAULT_DEDUP_CAPACITY: usize = 1000;

/// Digest of a raw post payload.
///
/// Computed over the serialized payload rather than the message text, so two
/// posts with the same text still differ (ids and timestamps are embedded).
pub fn fingerprint(payload: &str) -> String {
    format!("{:x}", Sha256::digest(payload.as_bytes()))
}

/// Bounded recency set of fingerprints used to drop redelivered events.
pub struct DedupFilter {
    seen: Mutex<LruCache<String, ()>>,
}

impl DedupFilter {
    /// A capacity of zero falls back to [`DEFAULT_DEDUP_CAPACITY`].
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity)
            .or_else(|| NonZeroUsize::new(DEFAULT_DEDUP_CAPACITY))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            seen: Mutex::new(LruCache::new(cap)),
        }
    }

    /// Returns whether `fingerprint` was already present, marking it as seen.
    ///
    /// A hit does not refresh the entry's recency; eviction order is the
    /// order of first sight.
    pub async fn seen(&self, fingerprint: &str) -> bool {
        let mut cache = self.seen.lock().await;
        if cache.contains(fingerprint) {
            return true;
        }
        cache.put(fingerprint.to_string(), ());
        false
    }

    pub async fn len(&self) -> usize {
        self.seen.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.seen.lock().await.is_empty()
    }
}

impl Default for DedupFilter {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_CAPACITY)
    }
}
