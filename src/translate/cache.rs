//! In-memory LRU translation cache bounded by entry count and UTF-8 bytes,
//! with optional TTL.
//! Map key: blake3 digest of the normalized text. The byte footprint still
//! counts the full key text so the bound reflects what the entry stands for.

use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

use super::normalize::normalize;

/// Normalized cache key plus its digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TranslationKey {
    text: String,
    digest: [u8; 32],
}

impl TranslationKey {
    /// Normalize `raw` and derive its key.
    pub fn from_raw(raw: &str) -> Self {
        Self::from_normalized(normalize(raw))
    }

    pub fn from_normalized(text: String) -> Self {
        let digest = *blake3::hash(text.as_bytes()).as_bytes();
        Self { text, digest }
    }

    /// The normalized text; this is what is sent to the backend.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

struct CacheEntry {
    translated_text: String,
    size_bytes: usize,
    inserted_at: Instant,
}

struct Inner {
    entries: LruCache<[u8; 32], CacheEntry>,
    total_bytes: usize,
}

impl Inner {
    fn remove(&mut self, digest: &[u8; 32]) {
        if let Some(old) = self.entries.pop(digest) {
            self.total_bytes -= old.size_bytes;
        }
    }
}

/// Process-wide translation cache. Share it behind an `Arc`.
pub struct TranslationCache {
    inner: Mutex<Inner>,
    max_entries: usize,
    max_bytes: usize,
    /// `None` disables age-based expiry.
    ttl: Option<Duration>,
}

impl TranslationCache {
    pub fn new(max_entries: usize, max_bytes: usize, ttl: Option<Duration>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::unbounded(),
                total_bytes: 0,
            }),
            max_entries: max_entries.max(1),
            max_bytes,
            ttl: ttl.filter(|t| !t.is_zero()),
        }
    }

    /// Look up a cached translation. A hit becomes most-recently-used;
    /// an expired entry is dropped and reported as a miss.
    pub fn get(&self, key: &TranslationKey) -> Option<String> {
        let mut inner = self.inner.lock();
        let expired = match inner.entries.get(&key.digest) {
            Some(entry) => match self.ttl {
                Some(ttl) if entry.inserted_at.elapsed() >= ttl => true,
                _ => return Some(entry.translated_text.clone()),
            },
            None => return None,
        };
        if expired {
            debug!(key_len = key.text.len(), "cache entry expired");
            inner.remove(&key.digest);
        }
        None
    }

    /// Insert or overwrite, then evict least-recently-used entries until both
    /// the entry and byte bounds hold.
    pub fn put(&self, key: &TranslationKey, translated_text: String) {
        let size_bytes = key.text.len() + translated_text.len();
        let mut inner = self.inner.lock();
        inner.remove(&key.digest);
        inner.entries.put(
            key.digest,
            CacheEntry {
                translated_text,
                size_bytes,
                inserted_at: Instant::now(),
            },
        );
        inner.total_bytes += size_bytes;

        let mut evicted = 0usize;
        while inner.entries.len() > self.max_entries || inner.total_bytes > self.max_bytes {
            match inner.entries.pop_lru() {
                Some((_, old)) => {
                    inner.total_bytes -= old.size_bytes;
                    evicted += 1;
                }
                None => break,
            }
        }
        if evicted > 0 {
            debug!(
                evicted,
                entries = inner.entries.len(),
                total_bytes = inner.total_bytes,
                "cache evicted"
            );
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_bytes(&self) -> usize {
        self.inner.lock().total_bytes
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.total_bytes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> TranslationKey {
        TranslationKey::from_raw(s)
    }

    #[test]
    fn hit_and_miss() {
        let cache = TranslationCache::new(4, 1024, None);
        assert_eq!(cache.get(&key("кот")), None);
        cache.put(&key("кот"), "cat".into());
        assert_eq!(cache.get(&key("  кот ")), Some("cat".into()));
    }

    #[test]
    fn evicts_oldest_beyond_entry_cap() {
        let cache = TranslationCache::new(3, 1 << 20, None);
        for i in 0..5 {
            cache.put(&key(&format!("k{i}")), format!("v{i}"));
        }
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get(&key("k0")), None);
        assert_eq!(cache.get(&key("k1")), None);
        for i in 2..5 {
            assert_eq!(cache.get(&key(&format!("k{i}"))), Some(format!("v{i}")));
        }
    }

    #[test]
    fn get_promotes_entry() {
        let cache = TranslationCache::new(2, 1 << 20, None);
        cache.put(&key("a"), "1".into());
        cache.put(&key("b"), "2".into());
        assert!(cache.get(&key("a")).is_some());
        cache.put(&key("c"), "3".into());
        assert_eq!(cache.get(&key("b")), None);
        assert_eq!(cache.get(&key("a")), Some("1".into()));
    }

    #[test]
    fn byte_bound_holds_after_every_put() {
        let cache = TranslationCache::new(100, 40, None);
        for i in 0..20 {
            cache.put(&key(&format!("ключ{i}")), "значение".into());
            assert!(cache.total_bytes() <= 40);
        }
        assert!(!cache.is_empty());
    }

    #[test]
    fn overwrite_recounts_bytes() {
        let cache = TranslationCache::new(10, 1000, None);
        cache.put(&key("ab"), "xyz".into());
        assert_eq!(cache.total_bytes(), 5);
        cache.put(&key("ab"), "x".into());
        assert_eq!(cache.total_bytes(), 3);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn oversized_entry_is_not_retained() {
        let cache = TranslationCache::new(10, 4, None);
        cache.put(&key("long key"), "long value".into());
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.total_bytes(), 0);
    }

    #[test]
    fn zero_entry_cap_is_clamped() {
        let cache = TranslationCache::new(0, 1000, None);
        cache.put(&key("a"), "1".into());
        cache.put(&key("b"), "2".into());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&key("b")), Some("2".into()));
    }

    #[test]
    fn expired_entries_miss() {
        let cache = TranslationCache::new(10, 1000, Some(Duration::from_millis(20)));
        cache.put(&key("a"), "1".into());
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.get(&key("a")), None);
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.total_bytes(), 0);
    }
}
