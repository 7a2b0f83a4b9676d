use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use crate::models::CacheStats;

/// Anything that can report cache statistics to the `/stats` endpoint.
#[async_trait]
pub trait CacheStatsProvider: Send + Sync {
    async fn cache_stats(&self) -> CacheStats;
}

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

struct Partition<K, V> {
    generation: u64,
    entries: HashMap<K, Entry<V>>,
}

struct Partitions<S, K, V> {
    /// Bumped on every invalidation; scopes without a partition report it as
    /// their generation.
    epoch: u64,
    scopes: HashMap<S, Partition<K, V>>,
}

impl<S, K, V> Partitions<S, K, V>
where
    S: Eq + Hash,
{
    fn generation(&self, scope: &S) -> u64 {
        self.scopes
            .get(scope)
            .map(|partition| partition.generation)
            .unwrap_or(self.epoch)
    }
}

/// TTL cache whose keys are grouped under a scope that can be dropped as a unit.
///
/// Readers take the scope's generation before computing a value and fill with
/// `insert_if_current`, so a value computed against pre-invalidation state
/// never lands in the cache. Invalidation removes the scope's partition and
/// moves the cache-wide epoch forward, so only cached scopes hold memory.
pub struct TtlCache<S, K, V> {
    ttl: Duration,
    partitions: RwLock<Partitions<S, K, V>>,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
}

impl<S, K, V> TtlCache<S, K, V>
where
    S: Eq + Hash + Clone + Send + Sync,
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            partitions: RwLock::new(Partitions { epoch: 0, scopes: HashMap::new() }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    pub async fn get(&self, scope: &S, key: &K) -> Option<V> {
        let partitions = self.partitions.read().await;
        let fresh = partitions
            .scopes
            .get(scope)
            .and_then(|partition| partition.entries.get(key))
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.value.clone());

        match fresh {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Current generation of a scope; pass it back to `insert_if_current`.
    pub async fn generation(&self, scope: &S) -> u64 {
        self.partitions.read().await.generation(scope)
    }

    /// Stores the value only if the scope was not invalidated since `generation` was read.
    pub async fn insert_if_current(&self, scope: S, key: K, value: V, generation: u64) -> bool {
        let mut partitions = self.partitions.write().await;

        if partitions.generation(&scope) != generation {
            debug!("Discarding cache fill computed at stale generation {}", generation);
            return false;
        }

        let now = Instant::now();
        let partition = partitions
            .scopes
            .entry(scope)
            .or_insert_with(|| Partition { generation, entries: HashMap::new() });
        partition.entries.retain(|_, entry| entry.expires_at > now);
        partition.entries.insert(key, Entry { value, expires_at: now + self.ttl });
        true
    }

    pub async fn invalidate_scope(&self, scope: &S) {
        let mut partitions = self.partitions.write().await;
        partitions.epoch += 1;
        partitions.scopes.remove(scope);
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    #[cfg(test)]
    async fn scope_count(&self) -> usize {
        self.partitions.read().await.scopes.len()
    }

    pub async fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let total_entries = self
            .partitions
            .read()
            .await
            .scopes
            .values()
            .map(|partition| {
                partition
                    .entries
                    .values()
                    .filter(|entry| entry.expires_at > now)
                    .count() as u64
            })
            .sum();

        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;

        CacheStats {
            hit_rate: if lookups == 0 { 0.0 } else { hits as f64 / lookups as f64 },
            hits,
            misses,
            invalidations: self.invalidations.load(Ordering::Relaxed),
            total_entries,
            ttl_seconds: self.ttl.as_secs(),
        }
    }
}

#[async_trait]
impl<S, K, V> CacheStatsProvider for TtlCache<S, K, V>
where
    S: Eq + Hash + Clone + Send + Sync,
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    async fn cache_stats(&self) -> CacheStats {
        self.stats().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache: TtlCache<u32, &str, i32> = TtlCache::new(Duration::from_secs(60));
        let generation = cache.generation(&1).await;
        assert!(cache.insert_if_current(1, "a", 10, generation).await);

        assert_eq!(cache.get(&1, &"a").await, Some(10));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.get(&1, &"a").await, None);
    }

    #[tokio::test]
    async fn invalidation_drops_every_key_in_scope_only() {
        let cache: TtlCache<u32, &str, i32> = TtlCache::new(Duration::from_secs(60));
        for (scope, key) in [(1, "a"), (1, "b"), (2, "a")] {
            let generation = cache.generation(&scope).await;
            cache.insert_if_current(scope, key, 1, generation).await;
        }

        cache.invalidate_scope(&1).await;

        assert_eq!(cache.get(&1, &"a").await, None);
        assert_eq!(cache.get(&1, &"b").await, None);
        assert_eq!(cache.get(&2, &"a").await, Some(1));
    }

    #[tokio::test]
    async fn fill_from_before_invalidation_is_rejected() {
        let cache: TtlCache<u32, &str, i32> = TtlCache::new(Duration::from_secs(60));
        let stale_generation = cache.generation(&1).await;

        cache.invalidate_scope(&1).await;

        assert!(!cache.insert_if_current(1, "a", 99, stale_generation).await);
        assert_eq!(cache.get(&1, &"a").await, None);
    }

    #[tokio::test]
    async fn invalidating_uncached_scopes_holds_no_memory() {
        let cache: TtlCache<u32, &str, i32> = TtlCache::new(Duration::from_secs(60));
        for scope in 0..100 {
            cache.invalidate_scope(&scope).await;
        }
        assert_eq!(cache.scope_count().await, 0);

        let generation = cache.generation(&7).await;
        assert!(cache.insert_if_current(7, "a", 1, generation).await);
        cache.invalidate_scope(&7).await;
        assert_eq!(cache.scope_count().await, 0);
    }

    #[tokio::test]
    async fn stale_fill_is_rejected_after_partition_is_dropped() {
        let cache: TtlCache<u32, &str, i32> = TtlCache::new(Duration::from_secs(60));
        let generation = cache.generation(&1).await;
        assert!(cache.insert_if_current(1, "a", 1, generation).await);

        let stale = cache.generation(&1).await;
        cache.invalidate_scope(&1).await;

        assert!(!cache.insert_if_current(1, "b", 2, stale).await);
        let fresh = cache.generation(&1).await;
        assert!(cache.insert_if_current(1, "b", 2, fresh).await);
        assert_eq!(cache.get(&1, &"b").await, Some(2));
    }

    #[tokio::test]
    async fn stats_count_hits_and_misses() {
        let cache: TtlCache<u32, &str, i32> = TtlCache::new(Duration::from_secs(60));
        cache.insert_if_current(1, "a", 1, 0).await;

        cache.get(&1, &"a").await;
        cache.get(&1, &"missing").await;
        cache.invalidate_scope(&1).await;

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.invalidations, 1);
        assert_eq!(stats.total_entries, 0);
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
    }
}
