//! Filter-join result cache
//!
//! Process-wide store mapping a lookup fingerprint to its computed value
//! set. Shared by every in-flight request, so two guarantees matter:
//!
//! - **single-flight**: for a given fingerprint, the compute closure runs
//!   in at most one caller at a time; concurrent callers for the same
//!   fingerprint await the in-flight result over a broadcast channel
//!   instead of duplicating the lookup.
//! - **bounded memory**: completed entries are evicted least-recently-used
//!   once `max_entries` is reached. An entry whose computation is still
//!   in flight is never evicted.
//!
//! Entries are immutable once published; they disappear only through LRU
//! eviction or the administrative [`FilterJoinCache::clear`]. The mutex
//! is held only for claim/publish bookkeeping, never across an await.
//!
//! Configuration (environment):
//! - `FILTERJOIN_CACHE_ENABLED` (default: true)
//! - `FILTERJOIN_CACHE_MAX_ENTRIES` (default: 1000)

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::broadcast;

use crate::search::SearchError;

/// Deterministic fingerprint of a lookup's inputs. Two lookups with the
/// same fingerprint are guaranteed to produce the same value set and may
/// share one computation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn from_lookup(
        indices: &[String],
        field: &str,
        filter: Option<&Value>,
        size_bound: usize,
    ) -> Self {
        let mut hasher = Sha256::new();
        for index in indices {
            hasher.update(index.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update(field.as_bytes());
        hasher.update([0u8]);
        match filter {
            // Key order inside the filter is preserved from the source
            // document, so the serialization is deterministic.
            Some(filter) => {
                hasher.update([1u8]);
                hasher.update(filter.to_string().as_bytes());
            }
            None => hasher.update([0u8]),
        }
        hasher.update((size_bound as u64).to_le_bytes());
        CacheKey(hex::encode(hasher.finalize()))
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The first bytes are plenty for log correlation.
        write!(f, "{}", &self.0[..16.min(self.0.len())])
    }
}

/// Completed entry: immutable value set plus how long it took to compute.
struct CacheEntry {
    values: Arc<Vec<Value>>,
    computed_in: Duration,
    last_accessed: u64,
    access_count: u64,
}

impl CacheEntry {
    fn new(values: Arc<Vec<Value>>, computed_in: Duration) -> Self {
        CacheEntry {
            values,
            computed_in,
            last_accessed: current_timestamp(),
            access_count: 0,
        }
    }

    fn touch(&mut self) {
        self.last_accessed = current_timestamp();
        self.access_count += 1;
    }
}

enum Slot {
    Ready(CacheEntry),
    /// A computation for this key is in flight; waiters subscribe here.
    InFlight(broadcast::Sender<Result<Arc<Vec<Value>>, SearchError>>),
}

/// What a cache consultation produced.
#[derive(Debug)]
pub struct LookupOutcome {
    pub values: Arc<Vec<Value>>,
    /// True when the value set came from a completed entry or from an
    /// in-flight computation claimed by another caller.
    pub cache_hit: bool,
    /// Time spent in the lookup by this caller. Zero on a cache hit.
    pub lookup_time: Duration,
}

/// Cache configuration.
#[derive(Debug, Clone)]
pub struct FilterJoinCacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
}

impl Default for FilterJoinCacheConfig {
    fn default() -> Self {
        FilterJoinCacheConfig {
            enabled: true,
            max_entries: 1000,
        }
    }
}

impl FilterJoinCacheConfig {
    pub fn from_env() -> Self {
        let enabled = std::env::var("FILTERJOIN_CACHE_ENABLED")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(true);
        let max_entries = std::env::var("FILTERJOIN_CACHE_MAX_ENTRIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1000);
        FilterJoinCacheConfig {
            enabled,
            max_entries,
        }
    }
}

/// Snapshot of cache counters for the admin stats endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
    pub in_flight: usize,
    pub max_entries: usize,
}

impl CacheMetrics {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// The process-wide filter-join result cache. Constructed explicitly and
/// injected (`Arc<FilterJoinCache>`); tests build isolated instances.
pub struct FilterJoinCache {
    entries: Mutex<HashMap<CacheKey, Slot>>,
    config: FilterJoinCacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl FilterJoinCache {
    pub fn new(config: FilterJoinCacheConfig) -> Self {
        FilterJoinCache {
            entries: Mutex::new(HashMap::new()),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(FilterJoinCacheConfig::default())
    }

    pub fn from_env() -> Self {
        Self::new(FilterJoinCacheConfig::from_env())
    }

    /// Return the value set for `key`, computing it with `compute` if it
    /// is not cached. For a given key, `compute` runs in at most one
    /// caller at a time; every other concurrent caller awaits that
    /// caller's result. A failed computation is reported to all waiters
    /// and the key is not published.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: CacheKey,
        compute: F,
    ) -> Result<LookupOutcome, SearchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<Value>, SearchError>>,
    {
        if !self.config.enabled {
            let started = Instant::now();
            let values = compute().await?;
            return Ok(LookupOutcome {
                values: Arc::new(values),
                cache_hit: false,
                lookup_time: started.elapsed(),
            });
        }

        let waiter = {
            let mut entries = self.entries.lock().unwrap();
            match entries.get_mut(&key) {
                Some(Slot::Ready(entry)) => {
                    entry.touch();
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    log::debug!(
                        "Cache hit for {} (originally computed in {:?}, {} accesses)",
                        key,
                        entry.computed_in,
                        entry.access_count
                    );
                    return Ok(LookupOutcome {
                        values: entry.values.clone(),
                        cache_hit: true,
                        lookup_time: Duration::ZERO,
                    });
                }
                Some(Slot::InFlight(tx)) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    log::debug!("Awaiting in-flight lookup for {}", key);
                    Some(tx.subscribe())
                }
                None => {
                    let (tx, _) = broadcast::channel(1);
                    entries.insert(key.clone(), Slot::InFlight(tx));
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    None
                }
            }
        };

        if let Some(mut rx) = waiter {
            return match rx.recv().await {
                Ok(Ok(values)) => Ok(LookupOutcome {
                    values,
                    cache_hit: true,
                    lookup_time: Duration::ZERO,
                }),
                Ok(Err(e)) => Err(e),
                // The claiming task was dropped before publishing.
                Err(_) => Err(SearchError::Cancelled),
            };
        }

        // This caller claimed the key. If the surrounding task is
        // dropped mid-computation, the guard unpublishes the claim so
        // waiters fail instead of hanging on a dead channel.
        let mut claim = ClaimGuard {
            cache: self,
            key: &key,
            armed: true,
        };
        let started = Instant::now();
        let result = compute().await;
        let lookup_time = started.elapsed();
        claim.armed = false;

        let mut entries = self.entries.lock().unwrap();
        let claimed = entries.remove(&key);
        match result {
            Ok(values) => {
                let values = Arc::new(values);
                if ready_count(&entries) >= self.config.max_entries {
                    self.evict_lru(&mut entries);
                }
                entries.insert(
                    key.clone(),
                    Slot::Ready(CacheEntry::new(values.clone(), lookup_time)),
                );
                if let Some(Slot::InFlight(tx)) = claimed {
                    let _ = tx.send(Ok(values.clone()));
                }
                log::debug!("Cached lookup {} ({} values, {:?})", key, values.len(), lookup_time);
                Ok(LookupOutcome {
                    values,
                    cache_hit: false,
                    lookup_time,
                })
            }
            Err(e) => {
                if let Some(Slot::InFlight(tx)) = claimed {
                    let _ = tx.send(Err(e.clone()));
                }
                Err(e)
            }
        }
    }

    /// Administrative clear: drops every completed entry. Computations
    /// still in flight keep their claim and publish normally.
    pub fn clear(&self) {
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|_, slot| matches!(slot, Slot::InFlight(_)));
        log::info!("Filter-join cache cleared");
    }

    pub fn metrics(&self) -> CacheMetrics {
        let entries = self.entries.lock().unwrap();
        let ready = ready_count(&entries);
        CacheMetrics {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: ready,
            in_flight: entries.len() - ready,
            max_entries: self.config.max_entries,
        }
    }

    /// Evict the least recently used completed entry. In-flight slots
    /// are not eligible.
    fn evict_lru(&self, entries: &mut HashMap<CacheKey, Slot>) {
        let victim = entries
            .iter()
            .filter_map(|(key, slot)| match slot {
                Slot::Ready(entry) => Some((key, entry.last_accessed)),
                Slot::InFlight(_) => None,
            })
            .min_by_key(|(_, last_accessed)| *last_accessed)
            .map(|(key, _)| key.clone());
        if let Some(key) = victim {
            entries.remove(&key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn ready_count(entries: &HashMap<CacheKey, Slot>) -> usize {
    entries
        .values()
        .filter(|slot| matches!(slot, Slot::Ready(_)))
        .count()
}

struct ClaimGuard<'a> {
    cache: &'a FilterJoinCache,
    key: &'a CacheKey,
    armed: bool,
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut entries = self.cache.entries.lock().unwrap();
        if matches!(entries.get(self.key), Some(Slot::InFlight(_))) {
            entries.remove(self.key);
        }
    }
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}
