// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::{
    priority::{soft_pick, PriorityPolicy},
    ClientId, FetcherId, PriorityClass,
};

use hashbrown::HashMap;
use rand::{seq::SliceRandom, thread_rng, Rng};

use std::{
    collections::{BTreeMap, VecDeque},
    sync::Mutex,
};

/// Retry counts below this floor are scheduled as if untried, so fresh
/// requests do not starve lightly-retried ones.
pub const MIN_RETRY_COUNT: u32 = 3;

/// Projects a raw retry count onto its scheduling bucket.
pub fn effective_retry(raw: u32) -> u32 {
    raw.saturating_sub(MIN_RETRY_COUNT)
}

const RECENT_SUCCESSES: usize = 8;

/// Where a request sits inside the grab array.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct GrabCoords {
    /// The priority class level.
    pub class: PriorityClass,
    /// The effective retry bucket.
    pub retry: u32,
    /// The client sector.
    pub client: ClientId,
}

#[derive(Default)]
struct GrabBag {
    items: Vec<FetcherId>,
    index: HashMap<FetcherId, usize>,
}

impl GrabBag {
    fn insert(&mut self, fetcher: FetcherId) -> bool {
        if self.index.contains_key(&fetcher) {
            return false;
        }

        self.index.insert(fetcher, self.items.len());
        self.items.push(fetcher);
        true
    }

    fn remove(&mut self, fetcher: FetcherId) -> bool {
        match self.index.remove(&fetcher) {
            Some(at) => {
                let last = self.items.pop().expect("indexed bag is empty");
                if last != fetcher {
                    self.items[at] = last;
                    self.index.insert(last, at);
                }
                true
            }
            None => false,
        }
    }

    fn pick(&self) -> Option<FetcherId> {
        self.items.choose(&mut thread_rng()).copied()
    }

    fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Default)]
struct ClientSector {
    clients: Vec<ClientId>,
    client_index: HashMap<ClientId, usize>,
    bags: HashMap<ClientId, GrabBag>,
}

impl ClientSector {
    fn insert(&mut self, client: ClientId, fetcher: FetcherId) -> bool {
        if !self.client_index.contains_key(&client) {
            self.client_index.insert(client, self.clients.len());
            self.clients.push(client);
        }

        self.bags.entry(client).or_default().insert(fetcher)
    }

    fn remove(&mut self, client: ClientId, fetcher: FetcherId) -> bool {
        let removed = match self.bags.get_mut(&client) {
            Some(bag) => bag.remove(fetcher),
            None => false,
        };

        let bag_empty = self.bags.get(&client).map_or(false, GrabBag::is_empty);
        if removed && bag_empty {
            self.bags.remove(&client);
            if let Some(at) = self.client_index.remove(&client) {
                let last = self.clients.pop().expect("indexed sector is empty");
                if last != client {
                    self.clients[at] = last;
                    self.client_index.insert(last, at);
                }
            }
        }

        removed
    }

    fn pick_client(&self) -> Option<ClientId> {
        self.clients.choose(&mut thread_rng()).copied()
    }

    fn bag(&self, client: ClientId) -> Option<&GrabBag> {
        self.bags.get(&client)
    }

    fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[derive(Default)]
struct Inner {
    classes: [BTreeMap<u32, ClientSector>; PriorityClass::COUNT],
    recent: VecDeque<GrabCoords>,
}

impl Inner {
    fn coords_nonempty(&self, coords: &GrabCoords) -> bool {
        self.classes[coords.class.index()]
            .get(&coords.retry)
            .and_then(|sector| sector.bag(coords.client))
            .map_or(false, |bag| !bag.is_empty())
    }

    fn pick_class(&self, policy: PriorityPolicy) -> Option<PriorityClass> {
        let nonempty = |class: PriorityClass| !self.classes[class.index()].is_empty();

        match policy {
            PriorityPolicy::Hard => PriorityClass::ALL.into_iter().find(|class| nonempty(*class)),
            PriorityPolicy::Soft => {
                let start = soft_pick(thread_rng().gen()).index();
                (0..PriorityClass::COUNT)
                    .map(|step| PriorityClass::ALL[(start + step) % PriorityClass::COUNT])
                    .find(|class| nonempty(*class))
            }
        }
    }
}

/// The structure runnable requests are drawn from.
///
/// Three levels deep: priority class, then effective retry count (lowest
/// bucket first), then a per-client random grab so every client at the same
/// level gets an equal draw regardless of how many requests it queued.
#[derive(Default)]
pub struct PriorityGrabArray {
    inner: Mutex<Inner>,
}

impl PriorityGrabArray {
    /// Creates a new, empty [`PriorityGrabArray`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `fetcher` at the given coordinates. Re-adding at the same
    /// coordinates is a no-op.
    pub fn insert(&self, fetcher: FetcherId, coords: GrabCoords) {
        let mut inner = self.inner.lock().expect("poisoned grab lock");

        inner.classes[coords.class.index()]
            .entry(coords.retry)
            .or_default()
            .insert(coords.client, fetcher);
    }

    /// Removes `fetcher` from the given coordinates.
    pub fn remove(&self, fetcher: FetcherId, coords: GrabCoords) -> bool {
        let mut inner = self.inner.lock().expect("poisoned grab lock");

        let removed = match inner.classes[coords.class.index()].get_mut(&coords.retry) {
            Some(sector) => sector.remove(coords.client, fetcher),
            None => false,
        };

        if removed {
            let prune = inner.classes[coords.class.index()]
                .get(&coords.retry)
                .map_or(false, ClientSector::is_empty);
            if prune {
                inner.classes[coords.class.index()].remove(&coords.retry);
            }
        }

        removed
    }

    /// Draws a request: a class per `policy`, the lowest nonempty retry
    /// bucket, a uniform random client, a uniform random request — with the
    /// recent-success bias applied on top.
    pub fn remove_random(&self, policy: PriorityPolicy) -> Option<(FetcherId, GrabCoords)> {
        let mut inner = self.inner.lock().expect("poisoned grab lock");

        let class = inner.pick_class(policy)?;
        let (&retry, sector) = inner.classes[class.index()].iter().next()?;
        let client = sector.pick_client()?;
        let mut coords = GrabCoords { class, retry, client };

        // With probability one half, prefer a sector that recently produced a
        // success, provided it is no worse in class or retry bucket.
        if thread_rng().gen::<bool>() {
            if let Some(better) = inner
                .recent
                .iter()
                .find(|recent| recent.class <= coords.class && recent.retry <= coords.retry && inner.coords_nonempty(recent))
                .copied()
            {
                coords = better;
            }
        }

        let fetcher = inner.classes[coords.class.index()]
            .get(&coords.retry)
            .and_then(|sector| sector.bag(coords.client))
            .and_then(GrabBag::pick)?;

        let mut prune = false;
        if let Some(sector) = inner.classes[coords.class.index()].get_mut(&coords.retry) {
            sector.remove(coords.client, fetcher);
            prune = sector.is_empty();
        }
        if prune {
            inner.classes[coords.class.index()].remove(&coords.retry);
        }

        Some((fetcher, coords))
    }

    /// Records that a request drawn from `coords` completed successfully.
    pub fn succeeded(&self, coords: GrabCoords) {
        let mut inner = self.inner.lock().expect("poisoned grab lock");

        inner.recent.retain(|recent| *recent != coords);
        inner.recent.push_front(coords);
        inner.recent.truncate(RECENT_SUCCESSES);
    }

    /// Returns the number of queued requests.
    pub fn len(&self) -> usize {
        let inner = self.inner.lock().expect("poisoned grab lock");

        inner
            .classes
            .iter()
            .flat_map(|retries| retries.values())
            .flat_map(|sector| sector.bags.values())
            .map(|bag| bag.items.len())
            .sum()
    }

    /// Whether no request is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
