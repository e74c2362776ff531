//! In-process cache with per-entry TTL and LRU eviction.
//!
//! Entries are spread over independently locked shards, so eviction in one
//! shard never blocks readers of keys living in another. Capacity is divided
//! evenly across shards and LRU order is tracked per shard.
//!
//! Two logical namespaces share this implementation (see [`CacheLayer`]):
//! embeddings keyed by content hash + embedder id, and retrieval results keyed
//! by the normalized query.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{RagError, Result};
use crate::types::RetrievalResult;

/// Cache contract used by the embedder and the retrieval engine.
///
/// `put` may fail; callers treat writes as best-effort and never propagate
/// the error into the embed or retrieve call that triggered them.
pub trait CacheStore<K, V>: Send + Sync {
    fn get(&self, key: &K) -> Option<V>;
    fn put(&self, key: K, value: V) -> Result<()>;
    fn invalidate_all(&self);
}

struct Entry<V> {
    value: V,
    expires_at: Instant,
    tick: u64,
}

struct Shard<K, V> {
    entries: HashMap<K, Entry<V>>,
    order: BTreeMap<u64, K>,
    next_tick: u64,
}

impl<K: Hash + Eq + Clone, V> Shard<K, V> {
    fn new() -> Self {
        Self { entries: HashMap::new(), order: BTreeMap::new(), next_tick: 0 }
    }

    fn bump(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }

    fn remove(&mut self, key: &K) {
        if let Some(old) = self.entries.remove(key) {
            self.order.remove(&old.tick);
        }
    }
}

pub struct TtlLruCache<K, V> {
    shards: Vec<Mutex<Shard<K, V>>>,
    capacity_per_shard: usize,
    ttl: Duration,
}

impl<K, V> TtlLruCache<K, V>
where
    K: Hash + Eq + Clone + Send,
    V: Clone + Send,
{
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self::with_shards(capacity, ttl, 16)
    }

    /// `shards` is clamped to `[1, capacity]`; a single shard gives exact LRU.
    pub fn with_shards(capacity: usize, ttl: Duration, shards: usize) -> Self {
        let capacity = capacity.max(1);
        let shard_count = shards.clamp(1, capacity);
        let capacity_per_shard = capacity.div_ceil(shard_count);
        let shards = (0..shard_count).map(|_| Mutex::new(Shard::new())).collect();
        Self { shards, capacity_per_shard, ttl }
    }

    fn shard(&self, key: &K) -> &Mutex<Shard<K, V>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.shards.len();
        &self.shards[idx]
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn remove(&self, key: &K) {
        self.shard(key).lock().remove(key);
    }

    fn lookup(&self, key: &K) -> Option<V> {
        let mut shard = self.shard(key).lock();
        let now = Instant::now();
        let (expired, old_tick) = match shard.entries.get(key) {
            None => return None,
            Some(e) => (e.expires_at <= now, e.tick),
        };
        if expired {
            shard.remove(key);
            return None;
        }
        let tick = shard.bump();
        shard.order.remove(&old_tick);
        shard.order.insert(tick, key.clone());
        let entry = shard.entries.get_mut(key)?;
        entry.tick = tick;
        Some(entry.value.clone())
    }

    fn insert(&self, key: K, value: V) {
        let mut shard = self.shard(&key).lock();
        shard.remove(&key);
        let tick = shard.bump();
        shard.order.insert(tick, key.clone());
        shard.entries.insert(key, Entry { value, expires_at: Instant::now() + self.ttl, tick });

        let now = Instant::now();
        let expired: Vec<K> =
            shard.entries.iter().filter(|(_, e)| e.expires_at <= now).map(|(k, _)| k.clone()).collect();
        for k in expired {
            shard.remove(&k);
        }
        while shard.entries.len() > self.capacity_per_shard {
            let Some((&oldest, _)) = shard.order.iter().next() else { break };
            if let Some(k) = shard.order.remove(&oldest) {
                shard.entries.remove(&k);
            }
        }
    }
}

impl<K, V> CacheStore<K, V> for TtlLruCache<K, V>
where
    K: Hash + Eq + Clone + Send,
    V: Clone + Send,
{
    fn get(&self, key: &K) -> Option<V> {
        self.lookup(key)
    }

    fn put(&self, key: K, value: V) -> Result<()> {
        if self.ttl.is_zero() {
            return Err(RagError::config("cache ttl is zero; entries would expire immediately"));
        }
        self.insert(key, value);
        Ok(())
    }

    fn invalidate_all(&self) {
        for shard in &self.shards {
            let mut s = shard.lock();
            s.entries.clear();
            s.order.clear();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub embedding_capacity: usize,
    pub embedding_ttl_secs: u64,
    pub query_capacity: usize,
    pub query_ttl_secs: u64,
    pub shards: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            embedding_capacity: 50_000,
            embedding_ttl_secs: 24 * 3600,
            query_capacity: 1_000,
            query_ttl_secs: 60,
            shards: 16,
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<()> {
        if self.embedding_capacity == 0 || self.query_capacity == 0 {
            return Err(RagError::config("cache capacities must be > 0"));
        }
        if self.embedding_ttl_secs == 0 || self.query_ttl_secs == 0 {
            return Err(RagError::config("cache ttl values must be > 0"));
        }
        if self.shards == 0 {
            return Err(RagError::config("cache.shards must be > 0"));
        }
        Ok(())
    }
}

pub type EmbeddingCache = dyn CacheStore<String, Arc<Vec<f32>>>;
pub type QueryCache = dyn CacheStore<String, RetrievalResult>;

/// The two cache namespaces used by the pipeline.
#[derive(Clone)]
pub struct CacheLayer {
    pub embeddings: Arc<EmbeddingCache>,
    pub queries: Arc<QueryCache>,
}

impl CacheLayer {
    pub fn new(config: &CacheConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            embeddings: Arc::new(TtlLruCache::with_shards(
                config.embedding_capacity,
                Duration::from_secs(config.embedding_ttl_secs),
                config.shards,
            )),
            queries: Arc::new(TtlLruCache::with_shards(
                config.query_capacity,
                Duration::from_secs(config.query_ttl_secs),
                config.shards,
            )),
        })
    }
}
