//! Quote cache — the single shared store of the latest known quote per
//! outcome.
//!
//! Adapters and the optional push feed write concurrently through
//! `upsert`; the detection pipeline reads through `snapshot`, which
//! returns a consistent copy filtered by staleness. Quotes are inserted
//! whole under the write lock, so a snapshot never observes a torn
//! entry.

use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

use crate::types::{OutcomeKey, Quote};

/// Concurrent quote store. Cheap to clone — clones share the same
/// underlying map, which is what lets the push feed and the scanner
/// write through the same contract.
#[derive(Clone, Default)]
pub struct QuoteCache {
    inner: Arc<RwLock<HashMap<OutcomeKey, Quote>>>,
}

impl QuoteCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the quote for one outcome.
    ///
    /// The quote is assumed already validated (`Quote::new` rejects
    /// malformed prices before they can reach the cache).
    pub fn upsert(&self, key: OutcomeKey, quote: Quote) {
        let mut map = self.inner.write().expect("quote cache lock poisoned");
        map.insert(key, quote);
    }

    /// Consistent copy of every quote no older than `max_age`.
    ///
    /// Stale entries are excluded rather than returned with a flag:
    /// detection must never run on prices that may no longer exist.
    pub fn snapshot(&self, max_age: Duration) -> HashMap<OutcomeKey, Quote> {
        let map = self.inner.read().expect("quote cache lock poisoned");
        let now = Utc::now();
        map.iter()
            .filter(|(_, q)| now - q.fetched_at <= max_age)
            .map(|(k, q)| (k.clone(), q.clone()))
            .collect()
    }

    /// Total entries currently held, stale or not.
    pub fn len(&self) -> usize {
        self.inner.read().expect("quote cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop entries older than `max_age` to keep the map from growing
    /// without bound across long runs.
    pub fn evict_stale(&self, max_age: Duration) {
        let mut map = self.inner.write().expect("quote cache lock poisoned");
        let now = Utc::now();
        let before = map.len();
        map.retain(|_, q| now - q.fetched_at <= max_age);
        if map.len() < before {
            debug!(evicted = before - map.len(), "Evicted stale quotes");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
