use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Option<Instant>,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |deadline| now >= deadline)
    }
}

/// Ограниченный LRU-кэш с TTL на каждую запись.
///
/// Просроченные записи удаляются лениво, только при обращении через `get`,
/// поэтому `size()` может временно учитывать уже истёкшие записи.
pub struct ExpiringLruCache<K: Hash + Eq, V> {
    entries: Mutex<LruCache<K, CacheEntry<V>>>,
    default_ttl: Option<Duration>,
}

impl<K: Hash + Eq + Clone, V: Clone> ExpiringLruCache<K, V> {
    pub fn new(max_size: usize, default_ttl: Option<Duration>) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(Self::non_zero(max_size))),
            default_ttl,
        }
    }

    fn non_zero(size: usize) -> NonZeroUsize {
        NonZeroUsize::new(size.max(1)).unwrap_or(NonZeroUsize::MIN)
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let expired = entries.peek(key)?.is_expired(now);
        if expired {
            entries.pop(key);
            return None;
        }

        // get() переносит ключ в хвост (most-recently-used)
        entries.get(key).map(|entry| entry.value.clone())
    }

    pub fn set(&self, key: K, value: V) -> V {
        self.set_with_ttl(key, value, self.default_ttl)
    }

    /// `ttl = None` означает запись без срока жизни
    pub fn set_with_ttl(&self, key: K, value: V, ttl: Option<Duration>) -> V {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        let mut entries = self.entries.lock();

        if !entries.contains(&key) && entries.len() >= entries.cap().get() {
            if entries.pop_lru().is_some() {
                debug!("🗑️ Cache full ({} entries), evicted least recently used key", entries.cap());
            }
        }

        entries.put(key, CacheEntry {
            value: value.clone(),
            expires_at,
        });

        value
    }

    pub fn remove(&self, key: &K) {
        self.entries.lock().pop(key);
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn size(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }

    /// Проверка наличия без изменения порядка вытеснения
    pub fn contains(&self, key: &K) -> bool {
        let now = Instant::now();
        self.entries
            .lock()
            .peek(key)
            .map_or(false, |entry| !entry.is_expired(now))
    }

    /// Изменить ёмкость; при уменьшении вытесняются самые старые записи
    pub fn resize(&self, max_size: usize) {
        let mut entries = self.entries.lock();
        let new_cap = Self::non_zero(max_size);
        if entries.cap() != new_cap {
            debug!("📐 Cache resized {} -> {}", entries.cap(), new_cap);
            entries.resize(new_cap);
        }
    }
}
