use dashmap::DashMap;
use std::{
    hash::Hash,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tracing::debug;

/// Cache entry con TTL desde la inserción
#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    created_at: Instant,
    last_access: AtomicU64,
}

impl<V> CacheEntry<V> {
    fn new(value: V, tick: u64) -> Self {
        Self {
            value,
            created_at: Instant::now(),
            last_access: AtomicU64::new(tick),
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() >= ttl
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expired_removals: AtomicU64,
    clock: AtomicU64,
}

/// Cache LRU acotado por tamaño y por tiempo de vida.
///
/// Las entradas expiran `ttl` después de insertarse, sin importar cuántas
/// veces se lean. Con el cache lleno, insertar una clave nueva elimina
/// primero las expiradas y luego la menos usada.
#[derive(Debug)]
pub struct LRUCache<K: Clone + Eq + Hash, V> {
    data: Arc<DashMap<K, CacheEntry<V>>>,
    counters: Arc<Counters>,
    capacity: usize,
    ttl: Duration,
}

impl<K, V> LRUCache<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            data: Arc::new(DashMap::new()),
            counters: Arc::new(Counters::default()),
            capacity: capacity.max(1),
            ttl,
        }
    }

    fn tick(&self) -> u64 {
        self.counters.clock.fetch_add(1, Ordering::Relaxed)
    }

    pub fn insert(&self, key: K, value: V) -> Option<V> {
        if !self.data.contains_key(&key) && self.data.len() >= self.capacity {
            self.make_room();
        }
        let entry = CacheEntry::new(value, self.tick());
        self.data.insert(key, entry).map(|old| old.value)
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let expired = match self.data.get(key) {
            Some(entry) if !entry.is_expired(self.ttl) => {
                entry.last_access.store(self.tick(), Ordering::Relaxed);
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired && self.data.remove(key).is_some() {
            self.counters.expired_removals.fetch_add(1, Ordering::Relaxed);
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    fn make_room(&self) {
        if self.cleanup_expired() > 0 && self.data.len() < self.capacity {
            return;
        }

        let oldest = self
            .data
            .iter()
            .min_by_key(|entry| entry.value().last_access.load(Ordering::Relaxed))
            .map(|entry| entry.key().clone());

        if let Some(key) = oldest {
            if self.data.remove(&key).is_some() {
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                debug!("Entrada menos usada expulsada del cache");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Limpia entradas expiradas y retorna el número de elementos removidos
    pub fn cleanup_expired(&self) -> usize {
        let keys_to_remove: Vec<K> = self
            .data
            .iter()
            .filter(|entry| entry.value().is_expired(self.ttl))
            .map(|entry| entry.key().clone())
            .collect();

        let removed = keys_to_remove
            .into_iter()
            .filter(|key| self.data.remove(key).is_some())
            .count();

        if removed > 0 {
            self.counters
                .expired_removals
                .fetch_add(removed as u64, Ordering::Relaxed);
            debug!("Limpiadas {} entradas expiradas del cache", removed);
        }

        removed
    }

    pub fn metrics(&self) -> CacheMetrics {
        CacheMetrics {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            expired_removals: self.counters.expired_removals.load(Ordering::Relaxed),
        }
    }
}

impl<K, V> Clone for LRUCache<K, V>
where
    K: Clone + Eq + Hash,
{
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            counters: self.counters.clone(),
            capacity: self.capacity,
            ttl: self.ttl,
        }
    }
}

/// Métricas básicas del cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expired_removals: u64,
}

impl CacheMetrics {
    pub fn hit_rate(&self) -> f64 {
        if self.hits + self.misses == 0 {
            0.0
        } else {
            self.hits as f64 / (self.hits + self.misses) as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn cache(capacity: usize) -> LRUCache<String, u32> {
        LRUCache::new(capacity, Duration::from_secs(60))
    }

    #[test]
    fn get_returns_inserted_value() {
        let cache = cache(4);
        assert_eq!(cache.insert("a".into(), 1), None);
        assert_eq!(cache.insert("a".into(), 2), Some(1));
        assert_eq!(cache.get(&"a".to_string()), Some(2));
        assert_eq!(cache.get(&"missing".to_string()), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn full_cache_evicts_least_recently_used() {
        let cache = cache(2);
        cache.insert("a".into(), 1);
        cache.insert("b".into(), 2);
        // leer "a" deja a "b" como la más antigua
        assert_eq!(cache.get(&"a".to_string()), Some(1));

        cache.insert("c".into(), 3);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"b".to_string()), None);
        assert_eq!(cache.get(&"a".to_string()), Some(1));
        assert_eq!(cache.get(&"c".to_string()), Some(3));
        assert_eq!(cache.metrics().evictions, 1);
    }

    #[test]
    fn entries_expire_after_ttl_even_when_read() {
        let cache: LRUCache<String, u32> = LRUCache::new(8, Duration::from_millis(30));
        cache.insert("a".into(), 1);
        assert_eq!(cache.get(&"a".to_string()), Some(1));

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(cache.get(&"a".to_string()), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn cleanup_removes_only_expired_entries() {
        let cache: LRUCache<String, u32> = LRUCache::new(8, Duration::from_millis(30));
        cache.insert("old".into(), 1);
        std::thread::sleep(Duration::from_millis(50));
        cache.insert("new".into(), 2);

        assert_eq!(cache.cleanup_expired(), 1);
        assert_eq!(cache.get(&"new".to_string()), Some(2));
        assert_eq!(cache.metrics().expired_removals, 1);
    }

    #[test]
    fn metrics_track_hits_and_misses() {
        let cache = cache(4);
        cache.insert("a".into(), 1);
        cache.get(&"a".to_string());
        cache.get(&"a".to_string());
        cache.get(&"b".to_string());

        let metrics = cache.metrics();
        assert_eq!((metrics.hits, metrics.misses), (2, 1));
        assert!((metrics.hit_rate() - 2.0 / 3.0).abs() < 1e-9);
    }
}
