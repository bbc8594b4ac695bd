//! Cache Layer - bounded, eviction-aware key/value stores
//!
//! Every hot lookup in the gateway (tool catalogs, auth decisions, session
//! metadata, backend server records) goes through one of four independently
//! configured [`TtlCache`] instances. Each instance is a fixed-capacity LRU
//! with per-entry TTL behind its own mutex; a `set` past capacity evicts the
//! least-recently-used entry first, and a `get` on an expired entry counts as
//! a miss and lazily removes it.
//!
//! Invalidation contract: components that mutate authoritative state behind a
//! cached key must `delete` the corresponding entries themselves. The cache
//! performs no cross-invalidation.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

use unigate_core::{
    AuthorizationContext, BackendServerRecord, CacheConfig, GatewayConfig, ToolDescriptor,
};

/// A cached value with its lifecycle timestamps.
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    #[allow(dead_code)]
    inserted_at: Instant,
    expires_at: Instant,
}

/// Counters reported by [`TtlCache::stats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub evictions: u64,
}

struct Inner<K: Hash + Eq, V> {
    entries: LruCache<K, CacheEntry<V>>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Bounded LRU cache with per-entry TTL.
///
/// The mutex is the per-instance mutual-exclusion discipline: reads and
/// writes to the same key never interleave destructively, on any runtime.
pub struct TtlCache<K: Hash + Eq, V: Clone> {
    default_ttl: Duration,
    inner: Mutex<Inner<K, V>>,
}

impl<K: Hash + Eq, V: Clone> TtlCache<K, V> {
    pub fn new(config: CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.capacity.max(1)).expect("capacity >= 1");
        Self {
            default_ttl: config.ttl,
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
        }
    }

    /// Look up a key, promoting it to most-recently-used on a hit. Expired
    /// entries are removed here rather than by a background task.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        match inner.entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                inner.hits += 1;
                Some(entry.value.clone())
            }
            Some(_) => {
                inner.entries.pop(key);
                inner.misses += 1;
                None
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Insert with the instance default TTL.
    pub fn set(&self, key: K, value: V) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    /// Insert with an explicit TTL. Evicts the least-recently-used entry
    /// first when the cache is at capacity.
    pub fn set_with_ttl(&self, key: K, value: V, ttl: Duration) {
        let now = Instant::now();
        let entry = CacheEntry {
            value,
            inserted_at: now,
            expires_at: now + ttl,
        };
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        // push returns the displaced pair: either this key's previous value
        // (an overwrite, not an eviction) or the evicted LRU entry.
        if let Some((evicted_key, _)) = inner.entries.push(key, entry) {
            if inner.entries.peek(&evicted_key).is_none() {
                inner.evictions += 1;
            }
        }
    }

    pub fn delete(&self, key: &K) -> bool {
        self.inner.lock().entries.pop(key).is_some()
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            size: inner.entries.len(),
            evictions: inner.evictions,
        }
    }
}

/// The four cache instances, constructed once at startup and injected into
/// every component that needs them.
pub struct GatewayCaches {
    /// Backend server id -> that server's tool catalog.
    pub tool_catalogs: TtlCache<Uuid, Arc<Vec<ToolDescriptor>>>,
    /// Credential fingerprint + target server -> resolved context.
    pub auth_decisions: TtlCache<String, AuthorizationContext>,
    /// Session id -> resolved context for follow-up requests on the session.
    pub session_meta: TtlCache<Uuid, AuthorizationContext>,
    /// Backend server id -> configuration record.
    pub server_records: TtlCache<Uuid, BackendServerRecord>,
}

impl GatewayCaches {
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            tool_catalogs: TtlCache::new(config.tool_catalog_cache),
            auth_decisions: TtlCache::new(config.auth_decision_cache),
            session_meta: TtlCache::new(config.session_meta_cache),
            server_records: TtlCache::new(config.data_cache),
        }
    }

    /// Drop every entry derived from one backend server record. Called when
    /// a record turns out to be deleted or otherwise changes underneath the
    /// gateway.
    pub fn invalidate_server(&self, server_id: Uuid) {
        self.server_records.delete(&server_id);
        self.tool_catalogs.delete(&server_id);
    }
}
