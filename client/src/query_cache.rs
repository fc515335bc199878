//! Per-Account Query Cache
//!
//! Caches resolver answers per account using `DashMap`. Each key carries a
//! generation counter and an in-flight marker:
//!
//! - [`QueryCache::begin`] hands out at most one [`Ticket`] per key at a time,
//!   so overlapping refreshes for the same account coalesce into one query.
//! - [`QueryCache::cancel_in_flight`] bumps the generation, so a query
//!   orphaned that way cannot write its answer back when it lands.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use larder_common::UserId;
use std::time::Duration;
use tokio::time::Instant;

/// A cached answer and when it was obtained.
#[derive(Debug, Clone)]
pub struct CachedValue<V> {
    pub value: V,
    /// Monotonic fetch time, used for staleness.
    pub fetched_at: Instant,
    /// Wall-clock fetch time, reported to callers.
    pub checked_at: DateTime<Utc>,
}

/// Permission to run one query for a key.
///
/// Must be handed back through [`QueryCache::complete`].
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a ticket that is never completed blocks further queries for its key"]
pub struct Ticket {
    key: UserId,
    generation: u64,
}

impl Ticket {
    /// Account the query is for.
    pub const fn key(&self) -> UserId {
        self.key
    }
}

/// Thread-safe cache of per-account answers.
pub struct QueryCache<V> {
    entries: DashMap<UserId, CachedValue<V>>,
    /// Incremented on cancellation so orphaned answers are dropped.
    generations: DashMap<UserId, u64>,
    /// Generation each in-flight query was started at.
    in_flight: DashMap<UserId, u64>,
}

impl<V: Clone> Default for QueryCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> QueryCache<V> {
    /// Create a new empty cache.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            generations: DashMap::new(),
            in_flight: DashMap::new(),
        }
    }

    fn generation(&self, key: UserId) -> u64 {
        self.generations.get(&key).map_or(0, |g| *g)
    }

    /// Cached answer for `key`, fresh or not.
    pub fn get(&self, key: UserId) -> Option<CachedValue<V>> {
        self.entries.get(&key).map(|e| e.clone())
    }

    /// Whether `key` has an answer younger than `stale_after`.
    pub fn is_fresh(&self, key: UserId, stale_after: Duration) -> bool {
        self.entries
            .get(&key)
            .is_some_and(|e| e.fetched_at.elapsed() < stale_after)
    }

    /// Whether a query for `key` is outstanding.
    #[cfg(test)]
    pub(crate) fn is_in_flight(&self, key: UserId) -> bool {
        self.in_flight.contains_key(&key)
    }

    /// Claim the right to query `key`. Returns `None` while another query for
    /// the same key is outstanding.
    pub fn begin(&self, key: UserId) -> Option<Ticket> {
        let generation = self.generation(key);
        match self.in_flight.entry(key) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(generation);
                Some(Ticket { key, generation })
            }
        }
    }

    /// Hand a ticket back, storing `value` when given.
    ///
    /// Returns `false` if the query was cancelled after the ticket was issued;
    /// in that case nothing is stored.
    pub fn complete(&self, ticket: Ticket, value: Option<V>) -> bool {
        let Ticket { key, generation } = ticket;
        self.in_flight.remove_if(&key, |_, started| *started == generation);

        if self.generation(key) != generation {
            return false;
        }
        if let Some(value) = value {
            self.entries.insert(
                key,
                CachedValue {
                    value,
                    fetched_at: Instant::now(),
                    checked_at: Utc::now(),
                },
            );
        }
        true
    }

    /// Orphan any outstanding query for `key`, keeping the cached answer.
    ///
    /// Returns whether a query was outstanding.
    pub fn cancel_in_flight(&self, key: UserId) -> bool {
        if self.in_flight.remove(&key).is_none() {
            return false;
        }
        *self.generations.entry(key).or_insert(0) += 1;
        true
    }
}
