// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::{Error, FetcherId};

use nectar_key::RoutingKey;

use priority_queue::PriorityQueue;

use std::{cmp::Reverse, sync::Mutex};

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
struct Entry {
    key: RoutingKey,
    fetcher: FetcherId,
}

/// Time-ordered store of keys parked after repeated failures.
///
/// Entries live until their wakeup passes or the key is fetched through
/// another path; earlier wakeups always drain before later ones.
pub struct CooldownQueue {
    queue: Mutex<PriorityQueue<Entry, Reverse<u64>>>,
    cooldown_time: u64,
}

impl CooldownQueue {
    /// Creates a new [`CooldownQueue`] parking keys for `cooldown_time`
    /// milliseconds.
    pub fn new(cooldown_time: u64) -> Self {
        Self {
            queue: Mutex::new(PriorityQueue::new()),
            cooldown_time,
        }
    }

    /// Parks `key` for `fetcher`, returning the wakeup time.
    ///
    /// Fails with [`Error::AlreadyQueued`] when the same pair is already
    /// parked for a wakeup in the future; callers log and move on.
    pub fn enqueue(&self, key: RoutingKey, fetcher: FetcherId, now: u64) -> Result<u64, Error> {
        let mut queue = self.queue.lock().expect("poisoned cooldown lock");
        let entry = Entry { key, fetcher };

        if let Some(Reverse(wakeup)) = queue.get_priority(&entry).copied() {
            if wakeup > now {
                return Err(Error::AlreadyQueued { key, fetcher, wakeup });
            }
        }

        let wakeup = now + self.cooldown_time;
        queue.push(entry, Reverse(wakeup));

        Ok(wakeup)
    }

    /// Removes every entry for `key` whose wakeup is before `before`.
    /// Returns the owning fetchers of the removed entries.
    pub fn remove(&self, key: &RoutingKey, before: u64) -> Vec<FetcherId> {
        let mut queue = self.queue.lock().expect("poisoned cooldown lock");

        let matching: Vec<Entry> = queue
            .iter()
            .filter(|(entry, Reverse(wakeup))| entry.key == *key && *wakeup < before)
            .map(|(entry, _)| *entry)
            .collect();

        matching
            .into_iter()
            .filter_map(|entry| queue.remove(&entry).map(|(e, _)| e.fetcher))
            .collect()
    }

    /// Removes the entry of a specific (key, fetcher) pair, if present.
    pub fn remove_entry(&self, key: &RoutingKey, fetcher: FetcherId) -> bool {
        self.queue
            .lock()
            .expect("poisoned cooldown lock")
            .remove(&Entry { key: *key, fetcher })
            .is_some()
    }

    /// Removes every entry owned by `fetcher`.
    pub fn remove_fetcher(&self, fetcher: FetcherId) {
        let mut queue = self.queue.lock().expect("poisoned cooldown lock");

        let matching: Vec<Entry> = queue
            .iter()
            .filter(|(entry, _)| entry.fetcher == fetcher)
            .map(|(entry, _)| *entry)
            .collect();

        for entry in matching {
            queue.remove(&entry);
        }
    }

    /// Pops up to `max` entries whose wakeup has passed, earliest first.
    pub fn drain_before(&self, now: u64, max: usize) -> Vec<(RoutingKey, FetcherId)> {
        let mut queue = self.queue.lock().expect("poisoned cooldown lock");
        let mut drained = Vec::new();

        while drained.len() < max {
            match queue.peek() {
                Some((_, Reverse(wakeup))) if *wakeup <= now => {
                    let (entry, _) = queue.pop().expect("peeked entry vanished");
                    drained.push((entry.key, entry.fetcher));
                }
                _ => break,
            }
        }

        drained
    }

    /// Returns the number of parked entries.
    pub fn len(&self) -> usize {
        self.queue.lock().expect("poisoned cooldown lock").len()
    }

    /// Whether no entry is parked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the wakeup time of a parked (key, fetcher) pair.
    pub fn wakeup(&self, key: &RoutingKey, fetcher: FetcherId) -> Option<u64> {
        self.queue
            .lock()
            .expect("poisoned cooldown lock")
            .get_priority(&Entry { key: *key, fetcher })
            .map(|Reverse(wakeup)| *wakeup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use nectar_key::rand::key::rand_routing_key;

    const COOLDOWN: u64 = 1000;

    #[test]
    fn enqueue_returns_wakeup() {
        let queue = CooldownQueue::new(COOLDOWN);
        let wakeup = queue.enqueue(rand_routing_key(), FetcherId::new(1), 5000).unwrap();

        assert_eq!(wakeup, 6000);
    }

    #[test]
    fn double_enqueue_rejected_while_future() {
        let queue = CooldownQueue::new(COOLDOWN);
        let key = rand_routing_key();

        queue.enqueue(key, FetcherId::new(1), 0).unwrap();

        assert!(matches!(
            queue.enqueue(key, FetcherId::new(1), 10),
            Err(Error::AlreadyQueued { wakeup: 1000, .. })
        ));

        // Past its wakeup the pair may be parked again.
        assert_eq!(queue.enqueue(key, FetcherId::new(1), 1000).unwrap(), 2000);
    }

    #[test]
    fn drain_is_time_ordered() {
        let queue = CooldownQueue::new(COOLDOWN);
        let (a, b, c) = (rand_routing_key(), rand_routing_key(), rand_routing_key());

        queue.enqueue(b, FetcherId::new(2), 200).unwrap();
        queue.enqueue(a, FetcherId::new(1), 100).unwrap();
        queue.enqueue(c, FetcherId::new(3), 300).unwrap();

        let drained = queue.drain_before(1200, 10);
        assert_eq!(drained, [(a, FetcherId::new(1)), (b, FetcherId::new(2))]);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn drain_respects_max() {
        let queue = CooldownQueue::new(COOLDOWN);

        for i in 0..5 {
            queue.enqueue(rand_routing_key(), FetcherId::new(i), i).unwrap();
        }

        assert_eq!(queue.drain_before(u64::MAX, 3).len(), 3);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn remove_by_key_and_deadline() {
        let queue = CooldownQueue::new(COOLDOWN);
        let key = rand_routing_key();

        queue.enqueue(key, FetcherId::new(1), 0).unwrap();
        queue.enqueue(rand_routing_key(), FetcherId::new(2), 0).unwrap();

        assert_eq!(queue.remove(&key, u64::MAX), [FetcherId::new(1)]);
        assert!(queue.remove(&key, u64::MAX).is_empty());
        assert_eq!(queue.len(), 1);
    }
}
