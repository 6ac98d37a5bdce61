/// Response cache module
///
/// Serialized API responses keyed by a fingerprint of the request. Entries
/// expire after a fixed TTL and the least recently used entry is evicted
/// once `max_entries` is reached.
///
/// # Fingerprint
///
/// `lexiquery:` + hex(sha256(path || client || canonical JSON of the query)),
/// where the query is the request parameters minus `cache`, with the default
/// `limit` and `offset` filled in so equivalent requests share an entry.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::config::ServerConfig;

const KEY_PREFIX: &str = "lexiquery:";

/// Cached entry with metadata
#[derive(Debug, Clone)]
struct CacheEntry {
    /// Serialized response body
    payload: String,
    expires_at: Instant,
    /// Access sequence number, for LRU
    last_accessed: u64,
    access_count: u64,
}

/// Configuration for the response cache
#[derive(Debug, Clone)]
pub struct ResponseCacheConfig {
    pub enabled: bool,
    pub ttl: Duration,
    /// Maximum number of entries (LRU eviction)
    pub max_entries: usize,
}

impl Default for ResponseCacheConfig {
    fn default() -> Self {
        ResponseCacheConfig {
            enabled: true,
            ttl: Duration::from_secs(60 * 60 * 24),
            max_entries: 100_000,
        }
    }
}

impl From<&ServerConfig> for ResponseCacheConfig {
    fn from(config: &ServerConfig) -> Self {
        ResponseCacheConfig {
            enabled: config.cache_enabled,
            ttl: Duration::from_secs(config.cache_ttl_secs),
            max_entries: config.cache_max_entries,
        }
    }
}

/// Response cache with TTL expiry and LRU eviction
pub struct ResponseCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    config: ResponseCacheConfig,
    clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ResponseCache {
    pub fn new(config: ResponseCacheConfig) -> Self {
        ResponseCache {
            entries: Mutex::new(HashMap::new()),
            config,
            clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ResponseCacheConfig::default())
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.get_at(key, Instant::now())
    }

    /// Look up `key` as of `now`. Expired entries are dropped.
    pub fn get_at(&self, key: &str, now: Instant) -> Option<String> {
        if !self.config.enabled {
            return None;
        }

        let tick = self.tick();
        let mut entries = self.lock();
        let payload = match entries.get_mut(key) {
            Some(entry) if entry.expires_at > now => {
                entry.last_accessed = tick;
                entry.access_count += 1;
                Some(entry.payload.clone())
            }
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        };

        if payload.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        payload
    }

    pub fn insert(&self, key: String, payload: String) {
        self.insert_at(key, payload, Instant::now())
    }

    /// Store `payload` under `key`, expiring one TTL after `now`.
    pub fn insert_at(&self, key: String, payload: String, now: Instant) {
        if !self.config.enabled {
            return;
        }

        let entry = CacheEntry {
            payload,
            expires_at: now + self.config.ttl,
            last_accessed: self.tick(),
            access_count: 0,
        };

        let mut entries = self.lock();
        if !entries.contains_key(&key) && entries.len() >= self.config.max_entries {
            entries.retain(|_, e| e.expires_at > now);
            if entries.len() >= self.config.max_entries {
                self.evict_lru(&mut entries);
            }
        }
        entries.insert(key, entry);
    }

    /// Evict least recently used entry
    fn evict_lru(&self, entries: &mut HashMap<String, CacheEntry>) {
        let oldest = entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_accessed)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            entries.remove(&key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn metrics(&self) -> CacheMetrics {
        let entries = self.lock();
        CacheMetrics {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            size: entries.len(),
            max_entries: self.config.max_entries,
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheEntry>> {
        // A panic while holding the lock leaves the map itself consistent.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Cache metrics for monitoring
#[derive(Debug, Clone)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
    pub max_entries: usize,
}

impl CacheMetrics {
    /// Calculate cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// The parameters a cached response is keyed on.
pub fn cached_query(params: &Map<String, Value>, response_max: i64) -> Map<String, Value> {
    let mut query = Map::new();
    query.insert("limit".to_string(), Value::from(response_max));
    query.insert("offset".to_string(), Value::from(0));
    for (k, v) in params {
        if k != "cache" {
            query.insert(k.clone(), v.clone());
        }
    }
    query
}

/// Cache key for a request.
pub fn fingerprint(path: &str, client: &str, query: &Map<String, Value>) -> String {
    let canonical = canonical_json(&Value::Object(query.clone()));
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    hasher.update(b"||");
    hasher.update(client.as_bytes());
    hasher.update(b"||");
    hasher.update(canonical.to_string().as_bytes());
    format!("{}{}", KEY_PREFIX, hex::encode(hasher.finalize()))
}

/// Copy of `value` with object keys in sorted order at every level.
fn canonical_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for k in keys {
                sorted.insert(k.clone(), canonical_json(&map[k]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical_json).collect()),
        other => other.clone(),
    }
}
