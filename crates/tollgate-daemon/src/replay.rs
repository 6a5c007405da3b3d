// SPDX-License-Identifier: MIT OR Apache-2.0
//! Short-TTL replay suppression, single node.
//!
//! A concurrent map from fingerprint to expiry deadline. The map is only
//! consulted when the caller supplied an idempotency header; expiry is
//! lazy (reaped on touch and when the map grows past a bound).

use dashmap::DashMap;

/// Reap pass threshold; keeps the lazy scan amortised.
const PURGE_THRESHOLD: usize = 4096;

/// Concurrent set of seen fingerprints with per-entry deadlines.
#[derive(Debug, Default)]
pub struct ReplayStore {
    entries: DashMap<String, u64>,
}

impl ReplayStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// True when `fingerprint` was remembered and its deadline has not
    /// passed.
    pub fn seen(&self, fingerprint: &str, now_ms: u64) -> bool {
        self.entries
            .get(fingerprint)
            .map(|deadline| *deadline > now_ms)
            .unwrap_or(false)
    }

    /// Remember `fingerprint` for `ttl_ms`. Idempotent; re-remembering
    /// extends the deadline.
    pub fn remember(&self, fingerprint: &str, now_ms: u64, ttl_ms: u64) {
        self.entries
            .insert(fingerprint.to_string(), now_ms.saturating_add(ttl_ms));
        self.maybe_purge(now_ms);
    }

    /// Atomic check-and-insert: for any pair of concurrent calls with the
    /// same fingerprint, exactly one observes `false` and proceeds.
    ///
    /// Returns `true` when the fingerprint was already live (a replay).
    pub fn check_and_remember(&self, fingerprint: &str, now_ms: u64, ttl_ms: u64) -> bool {
        let deadline = now_ms.saturating_add(ttl_ms);
        let replayed = match self.entries.entry(fingerprint.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                if *entry.get() > now_ms {
                    true
                } else {
                    // Expired entry; this call claims the window.
                    entry.insert(deadline);
                    false
                }
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(deadline);
                false
            }
        };
        self.maybe_purge(now_ms);
        replayed
    }

    /// Live entry count (expired entries may linger until a purge).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the store holds nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn maybe_purge(&self, now_ms: u64) {
        if self.entries.len() > PURGE_THRESHOLD {
            self.entries.retain(|_, deadline| *deadline > now_ms);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remember_then_seen_within_ttl() {
        let store = ReplayStore::new();
        store.remember("fp", 1_000, 500);
        assert!(store.seen("fp", 1_000));
        assert!(store.seen("fp", 1_499));
        assert!(!store.seen("fp", 1_500));
        assert!(!store.seen("other", 1_000));
    }

    #[test]
    fn check_and_remember_claims_exactly_once() {
        let store = ReplayStore::new();
        assert!(!store.check_and_remember("fp", 1_000, 500));
        assert!(store.check_and_remember("fp", 1_200, 500));
    }

    #[test]
    fn expired_fingerprints_can_be_claimed_again() {
        let store = ReplayStore::new();
        assert!(!store.check_and_remember("fp", 1_000, 500));
        assert!(!store.check_and_remember("fp", 2_000, 500));
        assert!(store.check_and_remember("fp", 2_100, 500));
    }

    #[test]
    fn concurrent_claims_admit_one() {
        use std::sync::Arc;

        let store = Arc::new(ReplayStore::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                u32::from(!store.check_and_remember("fp", 1_000, 500))
            }));
        }

        let admitted: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 1);
    }

    #[test]
    fn purge_drops_expired_entries() {
        let store = ReplayStore::new();
        for i in 0..(PURGE_THRESHOLD + 10) {
            store.remember(&format!("fp-{i}"), 1_000, 10);
        }
        // Everything above is long expired by now_ms = 10_000.
        store.remember("fresh", 10_000, 500);
        assert!(store.len() <= 2);
        assert!(store.seen("fresh", 10_000));
    }
}
