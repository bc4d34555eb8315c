//! Shared counter table.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::trace;

use super::counter::{CounterRecord, CounterSnapshot};
use super::key::RateLimitKey;

/// Concurrent table of counter records keyed by [`RateLimitKey`].
///
/// The store is a cheap handle: clones share the same table, while two stores
/// created with [`CounterStore::new`] never share state. Every read-modify-write
/// of a record runs under the write lock of the shard holding the key, so
/// updates to one key are serialized and keys on other shards proceed in
/// parallel.
#[derive(Debug, Clone, Default)]
pub struct CounterStore {
    counters: Arc<DashMap<RateLimitKey, CounterRecord>>,
}

impl CounterStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a hit for `key` at `now` and return the resulting counter state.
    ///
    /// A missing record or one whose window expired before `now` is replaced by
    /// a fresh window with a count of one.
    pub fn record_hit(&self, key: RateLimitKey, now: u64, window: Duration) -> CounterSnapshot {
        match self.counters.entry(key) {
            Entry::Occupied(mut entry) => entry.get_mut().hit(now, window),
            Entry::Vacant(entry) => {
                trace!(key = %entry.key(), "Opening rate limit window");
                entry.insert(CounterRecord::open(now, window)).snapshot()
            }
        }
    }

    /// Count recorded for `key` in its current window.
    ///
    /// Returns `None` if there is no record or its window has expired.
    pub fn count(&self, key: &RateLimitKey, now: u64) -> Option<u64> {
        self.counters
            .get(key)
            .filter(|record| !record.is_expired(now))
            .map(|record| record.count())
    }

    /// Remove the record for `key`. Returns whether one existed.
    pub fn remove(&self, key: &RateLimitKey) -> bool {
        self.counters.remove(key).is_some()
    }

    /// Remove every record belonging to `client`, across all segments.
    pub fn remove_client(&self, client: &str) -> usize {
        let mut removed = 0;
        self.counters.retain(|key, _| {
            if key.client == client {
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }

    /// Remove all records whose window had expired by `now`.
    ///
    /// Dropping an expired record is equivalent to the lazy reset performed by
    /// [`record_hit`](Self::record_hit): the next hit opens a fresh window.
    pub fn sweep(&self, now: u64) -> usize {
        let mut removed = 0;
        self.counters.retain(|_, record| {
            if record.is_expired(now) {
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }

    /// Number of records in the store.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Number of records in one segment.
    pub fn segment_len(&self, segment: &str) -> usize {
        self.counters
            .iter()
            .filter(|entry| entry.key().segment == segment)
            .count()
    }

    /// Number of records per segment.
    pub fn segment_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for entry in self.counters.iter() {
            *counts.entry(entry.key().segment.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Remove all records.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.counters.clear();
    }
}
