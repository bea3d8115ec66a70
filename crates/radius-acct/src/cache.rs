//! Retransmission detection
//!
//! RFC 2866 Section 2 lets a NAS resend an Accounting-Request that was not
//! answered in time, keeping the same Identifier and Request Authenticator.
//! The cache remembers recently processed requests so a resent copy is
//! dropped instead of being accounted twice.

use crate::record::{format_authenticator, format_identifier};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Default time a request stays in the cache
pub const DEFAULT_ENTRY_LIFETIME: Duration = Duration::from_secs(300);
/// Default interval of the background sweep
pub const DEFAULT_CLEAN_CYCLE: Duration = Duration::from_secs(10);

/// Fingerprint of a request for retransmission detection
///
/// Rendered as `<identifier>_<authenticator>`, e.g. `0x1_83aa46a7...`, which
/// is also the `key` field handed to accounting handlers.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct RetransmissionKey(String);

impl RetransmissionKey {
    pub fn new(identifier: u8, authenticator: &[u8; 16]) -> Self {
        RetransmissionKey(format!(
            "{}_{}",
            format_identifier(identifier),
            format_authenticator(authenticator)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RetransmissionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<RetransmissionKey> for String {
    fn from(key: RetransmissionKey) -> Self {
        key.0
    }
}

/// Store used by the server to recognise retransmitted requests
///
/// All methods may be called concurrently from any number of tasks. The
/// local [`LocalRetransmissionCache`] is the default implementation; a store
/// shared between several servers can be plugged in through this trait.
pub trait RetransmissionHandler: Send + Sync {
    /// Returns true if `key` is currently cached
    fn is_retransmission(&self, key: &RetransmissionKey) -> bool;

    /// Insert `key`, refreshing its timestamp if already present
    fn add_to_cache(&self, key: RetransmissionKey);

    /// Remove `key`; no-op if absent
    fn remove_from_cache(&self, key: &RetransmissionKey);

    /// Change the interval between expiry sweeps
    fn set_clean_cycle_seconds(&self, seconds: u64);

    /// Change how long an entry lives before a sweep may remove it
    fn set_entry_lifetime_seconds(&self, seconds: u64);

    /// Returns true if `key` was already cached, otherwise caches it
    ///
    /// Implementations should make this a single atomic step so that two
    /// concurrent copies of the same request cannot both be treated as new.
    fn check_and_insert(&self, key: RetransmissionKey) -> bool {
        if self.is_retransmission(&key) {
            return true;
        }
        self.add_to_cache(key);
        false
    }
}

/// Cached request entry with timestamp
#[derive(Debug, Clone)]
struct CacheEntry {
    /// When this entry was created or last refreshed
    inserted_at: Instant,
}

impl CacheEntry {
    fn now() -> Self {
        CacheEntry {
            inserted_at: Instant::now(),
        }
    }
}

/// Sweep timing, adjustable while the sweep task runs
#[derive(Debug)]
struct SweepTiming {
    clean_cycle_ms: AtomicU64,
    entry_lifetime_ms: AtomicU64,
}

impl SweepTiming {
    fn new(clean_cycle: Duration, entry_lifetime: Duration) -> Self {
        SweepTiming {
            clean_cycle_ms: AtomicU64::new(clean_cycle.as_millis() as u64),
            entry_lifetime_ms: AtomicU64::new(entry_lifetime.as_millis() as u64),
        }
    }

    fn clean_cycle(&self) -> Duration {
        // A zero interval would turn the sweep into a busy loop
        Duration::from_millis(self.clean_cycle_ms.load(Ordering::Relaxed).max(1))
    }

    fn entry_lifetime(&self) -> Duration {
        Duration::from_millis(self.entry_lifetime_ms.load(Ordering::Relaxed))
    }
}

/// In-process retransmission cache
///
/// Entries live in a sharded concurrent map: lookups take shard read locks,
/// inserts and removals take shard write locks, and an insert is visible to
/// every other task as soon as it returns. A background task wakes every
/// clean cycle and removes entries older than the entry lifetime. The sweep
/// first collects expired keys and then removes them one at a time, so it
/// never holds a lock across the whole map.
pub struct LocalRetransmissionCache {
    entries: Arc<DashMap<RetransmissionKey, CacheEntry>>,
    timing: Arc<SweepTiming>,
    sweeper: CancellationToken,
}

impl LocalRetransmissionCache {
    /// Create a cache with the default timing (10 s sweep, 300 s lifetime)
    ///
    /// Must be called from within a Tokio runtime, since it spawns the sweep task.
    pub fn new() -> Self {
        Self::with_timing(DEFAULT_CLEAN_CYCLE, DEFAULT_ENTRY_LIFETIME)
    }

    /// Create a cache with explicit sweep interval and entry lifetime
    pub fn with_timing(clean_cycle: Duration, entry_lifetime: Duration) -> Self {
        Self::new_internal(clean_cycle, entry_lifetime, true)
    }

    /// Create a cache without background cleanup (for testing)
    #[cfg(test)]
    fn new_no_background(entry_lifetime: Duration) -> Self {
        Self::new_internal(DEFAULT_CLEAN_CYCLE, entry_lifetime, false)
    }

    fn new_internal(clean_cycle: Duration, entry_lifetime: Duration, start_background: bool) -> Self {
        let entries: Arc<DashMap<RetransmissionKey, CacheEntry>> = Arc::new(DashMap::new());
        let timing = Arc::new(SweepTiming::new(clean_cycle, entry_lifetime));
        let sweeper = CancellationToken::new();

        if start_background {
            let entries = Arc::clone(&entries);
            let timing = Arc::clone(&timing);
            let token = sweeper.clone();

            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = time::sleep(timing.clean_cycle()) => {}
                    }

                    let removed = Self::sweep_entries(&entries, timing.entry_lifetime());
                    if removed > 0 {
                        debug!(
                            removed = removed,
                            remaining = entries.len(),
                            "Retransmission cache sweep completed"
                        );
                    }
                }

                debug!("Retransmission cache sweep task stopped");
            });
        }

        LocalRetransmissionCache {
            entries,
            timing,
            sweeper,
        }
    }

    fn sweep_entries(
        entries: &DashMap<RetransmissionKey, CacheEntry>,
        entry_lifetime: Duration,
    ) -> usize {
        let now = Instant::now();
        let is_expired =
            |entry: &CacheEntry| now.saturating_duration_since(entry.inserted_at) > entry_lifetime;

        let expired_keys: Vec<RetransmissionKey> = entries
            .iter()
            .filter(|entry| is_expired(entry.value()))
            .map(|entry| entry.key().clone())
            .collect();

        // Re-check on removal: the key may have been refreshed since the snapshot
        expired_keys
            .into_iter()
            .filter(|key| entries.remove_if(key, |_, entry| is_expired(entry)).is_some())
            .count()
    }

    /// Remove expired entries now, returning how many were removed
    pub fn sweep(&self) -> usize {
        Self::sweep_entries(&self.entries, self.timing.entry_lifetime())
    }

    /// Get the number of entries in the cache
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clear all entries from the cache
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            clean_cycle: self.timing.clean_cycle(),
            entry_lifetime: self.timing.entry_lifetime(),
        }
    }
}

impl Default for LocalRetransmissionCache {
    fn default() -> Self {
        Self::new()
    }
}

impl RetransmissionHandler for LocalRetransmissionCache {
    fn is_retransmission(&self, key: &RetransmissionKey) -> bool {
        self.entries.contains_key(key)
    }

    fn add_to_cache(&self, key: RetransmissionKey) {
        self.entries.insert(key, CacheEntry::now());
    }

    fn remove_from_cache(&self, key: &RetransmissionKey) {
        self.entries.remove(key);
    }

    fn set_clean_cycle_seconds(&self, seconds: u64) {
        self.timing
            .clean_cycle_ms
            .store(seconds.saturating_mul(1000), Ordering::Relaxed);
    }

    fn set_entry_lifetime_seconds(&self, seconds: u64) {
        self.timing
            .entry_lifetime_ms
            .store(seconds.saturating_mul(1000), Ordering::Relaxed);
    }

    fn check_and_insert(&self, key: RetransmissionKey) -> bool {
        match self.entries.entry(key) {
            Entry::Occupied(_) => true,
            Entry::Vacant(vacant) => {
                vacant.insert(CacheEntry::now());
                false
            }
        }
    }
}

impl Drop for LocalRetransmissionCache {
    fn drop(&mut self) {
        self.sweeper.cancel();
    }
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Current number of entries
    pub entries: usize,
    /// Interval between sweeps
    pub clean_cycle: Duration,
    /// Lifetime of an entry
    pub entry_lifetime: Duration,
}
