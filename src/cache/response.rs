//! TTL response cache.
//!
//! # Responsibilities
//! - Map fingerprints to responses with an expiry
//! - Never return an entry past `stored_at + ttl`
//! - Bound the number of entries, evicting the least recently used
//! - Purge expired entries periodically when a sweeper is running
//!
//! # Design Decisions
//! - Reads only bump an atomic access tick; they never touch the recency
//!   index
//! - The index is reordered lazily at eviction time: a popped entry that was
//!   read since it was indexed is moved to its current tick instead of
//!   being evicted, so eviction is O(log n) amortized

use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::cache::Fingerprint;
use crate::config::CacheConfig;
use crate::observability::metrics;
use crate::routing::Response;

#[derive(Debug)]
struct CacheEntry {
    response: Response,
    stored_at: Instant,
    ttl: Duration,
    /// Logical clock value of the last read or write.
    last_access: AtomicU64,
    /// Tick under which the entry currently sits in the recency index.
    indexed: AtomicU64,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.stored_at + self.ttl
    }
}

/// Cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// In-memory response cache keyed by request fingerprint.
#[derive(Debug)]
pub struct ResponseCache {
    entries: DashMap<Fingerprint, CacheEntry>,
    default_ttl: Duration,
    max_entries: Option<usize>,
    /// Tick → fingerprint, oldest first. Only kept when `max_entries` is set.
    recency: Mutex<BTreeMap<u64, Fingerprint>>,
    tick: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ResponseCache {
    pub fn new(default_ttl: Duration, max_entries: Option<usize>) -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl,
            max_entries,
            recency: Mutex::new(BTreeMap::new()),
            tick: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(Duration::from_secs(config.default_ttl_secs), config.max_entries)
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    fn next_tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::Relaxed)
    }

    fn recency(&self) -> MutexGuard<'_, BTreeMap<u64, Fingerprint>> {
        self.recency.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop the index records of entries removed from the map.
    fn unindex(&self, ticks: impl IntoIterator<Item = u64>) {
        if self.max_entries.is_some() {
            let mut recency = self.recency();
            for tick in ticks {
                recency.remove(&tick);
            }
        }
    }

    /// Look up a live entry. An expired entry is removed and reported as a miss.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<Response> {
        let now = Instant::now();
        let expired = match self.entries.get(fingerprint) {
            Some(entry) if !entry.is_expired(now) => {
                entry.last_access.store(self.next_tick(), Ordering::Relaxed);
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.response.clone());
            }
            Some(_) => true,
            None => false,
        };

        let removed = if expired {
            self.entries.remove_if(fingerprint, |_, e| e.is_expired(now))
        } else {
            None
        };
        if let Some((_, entry)) = removed {
            self.unindex([entry.indexed.load(Ordering::Relaxed)]);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            metrics::record_cache_size(self.entries.len());
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store `response` for `ttl`, or the default TTL.
    pub fn put(&self, fingerprint: Fingerprint, response: Response, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        if ttl.is_zero() {
            return;
        }

        let tick = self.next_tick();
        let replaced = self.entries.insert(
            fingerprint,
            CacheEntry {
                response,
                stored_at: Instant::now(),
                ttl,
                last_access: AtomicU64::new(tick),
                indexed: AtomicU64::new(tick),
            },
        );

        if let Some(max) = self.max_entries {
            let mut recency = self.recency();
            if let Some(old) = replaced {
                recency.remove(&old.indexed.load(Ordering::Relaxed));
            }
            recency.insert(tick, fingerprint);
            while self.entries.len() > max {
                if !self.evict_lru(&mut recency, &fingerprint) {
                    break;
                }
            }
        }
        metrics::record_cache_size(self.entries.len());
    }

    /// Remove the least recently used entry other than `keep`.
    fn evict_lru(&self, recency: &mut BTreeMap<u64, Fingerprint>, keep: &Fingerprint) -> bool {
        while let Some((tick, key)) = recency.pop_first() {
            if key == *keep {
                recency.insert(tick, key);
                return false;
            }

            let last = match self.entries.get(&key) {
                // Records left behind by a replaced or removed entry.
                None => continue,
                Some(entry) if entry.indexed.load(Ordering::Relaxed) != tick => continue,
                Some(entry) => entry.last_access.load(Ordering::Relaxed),
            };

            if last == tick
                && self
                    .entries
                    .remove_if(&key, |_, e| e.last_access.load(Ordering::Relaxed) == tick)
                    .is_some()
            {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                return true;
            }

            // Read since it was indexed: move it to its latest access.
            let entry = self.entries.get(&key);
            if let Some(entry) = entry.filter(|e| e.indexed.load(Ordering::Relaxed) == tick) {
                let latest = entry.last_access.load(Ordering::Relaxed);
                entry.indexed.store(latest, Ordering::Relaxed);
                recency.insert(latest, key);
            }
        }
        false
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut dropped = Vec::new();
        self.entries.retain(|_, e| {
            let live = !e.is_expired(now);
            if !live {
                dropped.push(e.indexed.load(Ordering::Relaxed));
            }
            live
        });
        let removed = dropped.len();
        self.unindex(dropped);
        if removed > 0 {
            self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
            metrics::record_cache_size(self.entries.len());
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
        self.recency().clear();
        metrics::record_cache_size(0);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Purge expired entries every `interval` until shutdown.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = self.purge_expired();
                        if removed > 0 {
                            tracing::debug!(removed, remaining = self.len(), "Cache sweep");
                        }
                    }
                    _ = shutdown.recv() => {
                        tracing::info!("Cache sweeper received shutdown signal, exiting loop");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
impl ResponseCache {
    fn index_len(&self) -> usize {
        self.recency().len()
    }
}
