//! Message-id cache that makes redundant forwarding paths loop-safe.
//!
//! Ids live in a sharded map with their expiry. A separate insertion log
//! drives eviction: expired entries go first, then the oldest live ones
//! once the cache is over capacity.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Mint an identifier for a newly originated event.
pub fn new_message_id() -> String {
    Uuid::new_v4().simple().to_string()
}

#[derive(Debug)]
pub struct DedupCache {
    entries: DashMap<String, Instant>,
    /// `(id, expiry)` in insertion order. May hold stale records for ids
    /// that were re-inserted after expiring; those are skipped on eviction.
    order: Mutex<VecDeque<(String, Instant)>>,
    ttl: Duration,
    max_entries: usize,
}

impl DedupCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    /// Record `id` if it has not been seen within the TTL.
    ///
    /// Returns true for a first sighting (process the event) and false for
    /// a duplicate (drop it). Check and insert are one atomic step per id.
    pub fn check_and_insert(&self, id: &str) -> bool {
        let now = Instant::now();
        let expiry = now + self.ttl;
        match self.entries.entry(id.to_string()) {
            Entry::Occupied(mut e) => {
                if *e.get() > now {
                    return false;
                }
                e.insert(expiry);
            }
            Entry::Vacant(slot) => {
                slot.insert(expiry);
            }
        }
        self.order.lock().push_back((id.to_string(), expiry));
        self.evict(now);
        true
    }

    /// Whether `id` is present and unexpired.
    pub fn contains(&self, id: &str) -> bool {
        self.entries
            .get(id)
            .is_some_and(|expiry| *expiry > Instant::now())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict(&self, now: Instant) {
        let mut order = self.order.lock();
        while let Some((_, expiry)) = order.front() {
            if *expiry > now {
                break;
            }
            if let Some((id, expiry)) = order.pop_front() {
                self.entries.remove_if(&id, |_, current| *current == expiry);
            }
        }
        while self.entries.len() > self.max_entries {
            let Some((id, expiry)) = order.pop_front() else {
                break;
            };
            self.entries.remove_if(&id, |_, current| *current == expiry);
        }
    }
}
