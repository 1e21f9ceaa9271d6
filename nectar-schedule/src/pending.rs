// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::FetcherId;

use nectar_key::RoutingKey;

use hashbrown::{HashMap, HashSet};

use std::sync::Mutex;

/// Outcome of removing a subscription, used by callers to decide whether
/// offered-key records for the key can be evicted.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Removal {
    /// Whether the subscription existed.
    pub existed: bool,
    /// Whether the key has no subscribers left.
    pub key_now_empty: bool,
}

#[derive(Default)]
struct Inner {
    by_key: HashMap<RoutingKey, HashSet<FetcherId>>,
    by_fetcher: HashMap<FetcherId, HashSet<RoutingKey>>,
}

/// Maps routing keys to the fetchers waiting for them.
///
/// Any arriving block, solicited or not, is matched against this map so a
/// single arrival satisfies every waiting request at once. The fetcher →
/// keys reverse index is the source of truth for unsubscription sweeps.
#[derive(Default)]
pub struct PendingKeys {
    inner: Mutex<Inner>,
}

impl PendingKeys {
    /// Creates a new, empty [`PendingKeys`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes `fetcher` to `key`. Adding the same pair twice is a no-op.
    pub fn add(&self, key: RoutingKey, fetcher: FetcherId) {
        let mut inner = self.inner.lock().expect("poisoned pending lock");

        inner.by_key.entry(key).or_default().insert(fetcher);
        inner.by_fetcher.entry(fetcher).or_default().insert(key);
    }

    /// Unsubscribes `fetcher` from `key`.
    pub fn remove(&self, key: &RoutingKey, fetcher: FetcherId) -> Removal {
        let mut inner = self.inner.lock().expect("poisoned pending lock");

        let (existed, key_now_empty) = match inner.by_key.get_mut(key) {
            Some(subscribers) => {
                let existed = subscribers.remove(&fetcher);
                (existed, subscribers.is_empty())
            }
            None => (false, true),
        };

        if key_now_empty {
            inner.by_key.remove(key);
        }

        if existed {
            if let Some(keys) = inner.by_fetcher.get_mut(&fetcher) {
                keys.remove(key);
                if keys.is_empty() {
                    inner.by_fetcher.remove(&fetcher);
                }
            }
        }

        Removal { existed, key_now_empty }
    }

    /// Atomically removes and returns all subscribers of `key`.
    pub fn take(&self, key: &RoutingKey) -> Vec<FetcherId> {
        let mut inner = self.inner.lock().expect("poisoned pending lock");

        let subscribers = match inner.by_key.remove(key) {
            Some(subscribers) => subscribers,
            None => return Vec::new(),
        };

        for fetcher in &subscribers {
            if let Some(keys) = inner.by_fetcher.get_mut(fetcher) {
                keys.remove(key);
                if keys.is_empty() {
                    inner.by_fetcher.remove(fetcher);
                }
            }
        }

        subscribers.into_iter().collect()
    }

    /// Returns a snapshot of the subscribers of `key` without removing them.
    pub fn subscribers(&self, key: &RoutingKey) -> Vec<FetcherId> {
        self.inner
            .lock()
            .expect("poisoned pending lock")
            .by_key
            .get(key)
            .map(|subscribers| subscribers.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Whether any fetcher wants `key`. Probe for offered-key gossip.
    pub fn any_want(&self, key: &RoutingKey) -> bool {
        self.inner
            .lock()
            .expect("poisoned pending lock")
            .by_key
            .contains_key(key)
    }

    /// Unsubscribes `fetcher` from every key it was waiting for, returning
    /// the keys.
    pub fn remove_fetcher(&self, fetcher: FetcherId) -> Vec<RoutingKey> {
        let mut inner = self.inner.lock().expect("poisoned pending lock");

        let keys = match inner.by_fetcher.remove(&fetcher) {
            Some(keys) => keys,
            None => return Vec::new(),
        };

        for key in &keys {
            if let Some(subscribers) = inner.by_key.get_mut(key) {
                subscribers.remove(&fetcher);
                if subscribers.is_empty() {
                    inner.by_key.remove(key);
                }
            }
        }

        keys.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use nectar_key::rand::key::rand_routing_key;

    #[test]
    fn add_is_idempotent() {
        let pending = PendingKeys::new();
        let key = rand_routing_key();
        let fetcher = FetcherId::new(1);

        pending.add(key, fetcher);
        pending.add(key, fetcher);

        assert_eq!(pending.take(&key), [fetcher]);
    }

    #[test]
    fn remove_reports_emptiness() {
        let pending = PendingKeys::new();
        let key = rand_routing_key();

        pending.add(key, FetcherId::new(1));
        pending.add(key, FetcherId::new(2));

        let removal = pending.remove(&key, FetcherId::new(1));
        assert!(removal.existed);
        assert!(!removal.key_now_empty);

        let removal = pending.remove(&key, FetcherId::new(2));
        assert!(removal.existed);
        assert!(removal.key_now_empty);

        let removal = pending.remove(&key, FetcherId::new(2));
        assert!(!removal.existed);
    }

    #[test]
    fn take_clears_subscribers() {
        let pending = PendingKeys::new();
        let key = rand_routing_key();

        pending.add(key, FetcherId::new(1));
        pending.add(key, FetcherId::new(2));

        let mut taken = pending.take(&key);
        taken.sort();
        assert_eq!(taken, [FetcherId::new(1), FetcherId::new(2)]);
        assert!(!pending.any_want(&key));
    }

    #[test]
    fn remove_fetcher_sweeps_every_key() {
        let pending = PendingKeys::new();
        let (a, b) = (rand_routing_key(), rand_routing_key());
        let fetcher = FetcherId::new(7);

        pending.add(a, fetcher);
        pending.add(b, fetcher);
        pending.add(b, FetcherId::new(8));

        let mut keys = pending.remove_fetcher(fetcher);
        keys.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(keys, expected);

        assert!(!pending.any_want(&a));
        assert!(pending.any_want(&b));
    }
}
