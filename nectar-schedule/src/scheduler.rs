// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::{
    grab::{effective_retry, GrabCoords},
    ClientId, CooldownQueue, Error, FetcherId, KeyListener, PendingKeys, PriorityClass, PriorityGrabArray,
    SchedulerConfig,
};

use nectar_key::{Block, ClientKey, RoutingKey};
use nectar_runtime::{Executor, KeyStore};

use hashbrown::HashMap;
use rand::{thread_rng, Rng};
use tokio::sync::Notify;

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};

struct FetcherEntry {
    listener: Arc<dyn KeyListener>,
    // Present while the fetcher is queued in the grab array.
    coords: Option<GrabCoords>,
}

/// What the node layer should send next.
pub enum NextRequest {
    /// A scheduled block request.
    Fetch {
        /// The owning fetcher.
        id: FetcherId,
        /// The key to route.
        key: ClientKey,
        /// The listener outcomes are delivered to.
        listener: Arc<dyn KeyListener>,
        /// Where the request was drawn from, recorded back on success.
        coords: GrabCoords,
    },
    /// A fetch of a key a peer offered unsolicited.
    Offered {
        /// The offered routing key.
        key: RoutingKey,
    },
}

/// The single point deciding which block request goes out next.
///
/// Owns the table of live fetchers; pending-key subscriptions, cooldown
/// entries and grab-array positions all refer to fetchers by id. Every
/// operation takes the internal locks briefly and never invokes a listener
/// callback under them.
pub struct Scheduler {
    pending: PendingKeys,
    cooldown: CooldownQueue,
    grab: PriorityGrabArray,
    fetchers: Mutex<HashMap<FetcherId, FetcherEntry>>,
    offered: Mutex<Vec<(RoutingKey, PriorityClass)>>,
    key_store: Arc<dyn KeyStore>,
    executor: Arc<dyn Executor>,
    notify: Notify,
    config: SchedulerConfig,
    next_id: AtomicU64,
    next_client_id: AtomicU64,
}

impl Scheduler {
    /// Creates a new [`Scheduler`].
    pub fn new(config: SchedulerConfig, key_store: Arc<dyn KeyStore>, executor: Arc<dyn Executor>) -> Self {
        Self {
            pending: PendingKeys::new(),
            cooldown: CooldownQueue::new(config.cooldown_time_ms),
            grab: PriorityGrabArray::new(),
            fetchers: Mutex::new(HashMap::new()),
            offered: Mutex::new(Vec::new()),
            key_store,
            executor,
            notify: Notify::new(),
            config,
            next_id: AtomicU64::new(0),
            next_client_id: AtomicU64::new(0),
        }
    }

    /// Returns the scheduler configuration.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Allocates an id for a fetcher about to be created.
    pub fn allocate_fetcher_id(&self) -> FetcherId {
        FetcherId::new(self.next_id.fetch_add(1, Ordering::AcqRel))
    }

    /// Allocates the identity of a new client request, the unit of
    /// scheduling fairness.
    pub fn allocate_client_id(&self) -> ClientId {
        ClientId::new(self.next_client_id.fetch_add(1, Ordering::AcqRel))
    }

    /// Registers a single fetcher: consults the local store first and only
    /// subscribes the key for network scheduling on a miss.
    pub async fn register(&self, listener: Arc<dyn KeyListener>) -> Result<(), Error> {
        self.register_all(&[listener], true).await
    }

    /// Registers a batch of fetchers.
    ///
    /// With `check_store`, each key is first looked up locally; hits are
    /// delivered immediately with `from_store` set and are not enqueued. The
    /// loop yields between store hits for priorities below
    /// [`PriorityClass::ImmediateSplitfile`] so a long run of local hits does
    /// not starve the reactor. Registration is transactional in the weak
    /// sense: a store error mid-batch leaves the already registered fetchers
    /// standing.
    pub async fn register_all(&self, listeners: &[Arc<dyn KeyListener>], check_store: bool) -> Result<(), Error> {
        let mut registered_any = false;

        for listener in listeners {
            if listener.is_finished() {
                continue;
            }

            let key = listener.client_key();
            let routing_key = *key.routing_key();

            if check_store {
                if let Some(block) = self.key_store.fetch(&routing_key, false).await? {
                    listener.on_got_block(&routing_key, &block, true);

                    if listener.priority() > PriorityClass::ImmediateSplitfile {
                        tokio::task::yield_now().await;
                    }
                    continue;
                }
            }

            self.enqueue(listener.clone());
            registered_any = true;
        }

        if registered_any {
            self.notify.notify_one();
        }

        Ok(())
    }

    fn enqueue(&self, listener: Arc<dyn KeyListener>) {
        let id = listener.id();
        let routing_key = *listener.client_key().routing_key();
        let coords = GrabCoords {
            class: listener.priority(),
            retry: effective_retry(listener.retry_count()),
            client: listener.client(),
        };

        // Lock order: pending before grab; the fetcher table is taken last.
        self.pending.add(routing_key, id);
        self.grab.insert(id, coords);

        let mut fetchers = self.fetchers.lock().expect("poisoned fetcher table lock");
        fetchers.insert(
            id,
            FetcherEntry {
                listener,
                coords: Some(coords),
            },
        );
    }

    /// Requeues a fetcher after a retryable failure, at its current retry
    /// count. The pending-key subscription is kept.
    pub fn requeue(&self, id: FetcherId) -> Result<(), Error> {
        let mut fetchers = self.fetchers.lock().expect("poisoned fetcher table lock");
        let entry = fetchers.get_mut(&id).ok_or(Error::UnknownFetcher(id))?;

        if let Some(coords) = entry.coords.take() {
            self.grab.remove(id, coords);
        }

        let coords = GrabCoords {
            class: entry.listener.priority(),
            retry: effective_retry(entry.listener.retry_count()),
            client: entry.listener.client(),
        };
        self.grab.insert(id, coords);
        entry.coords = Some(coords);

        drop(fetchers);
        self.notify.notify_one();

        Ok(())
    }

    /// Parks a fetcher's key in the cooldown queue. The fetcher stays
    /// subscribed in the pending-key map so an unsolicited arrival still
    /// satisfies it. Returns the wakeup time.
    pub fn enter_cooldown(&self, id: FetcherId, now: u64) -> Result<u64, Error> {
        let key = {
            let mut fetchers = self.fetchers.lock().expect("poisoned fetcher table lock");
            let entry = fetchers.get_mut(&id).ok_or(Error::UnknownFetcher(id))?;

            if let Some(coords) = entry.coords.take() {
                self.grab.remove(id, coords);
            }

            *entry.listener.client_key().routing_key()
        };

        self.cooldown.enqueue(key, id, now)
    }

    /// Unregisters a fetcher from every structure. Idempotent.
    pub fn unregister(&self, id: FetcherId) {
        let entry = {
            let mut fetchers = self.fetchers.lock().expect("poisoned fetcher table lock");
            fetchers.remove(&id)
        };

        self.pending.remove_fetcher(id);
        self.cooldown.remove_fetcher(id);

        if let Some(entry) = entry {
            if let Some(coords) = entry.coords {
                self.grab.remove(id, coords);
            }
        }
    }

    /// Records an offered key if any fetcher wants it.
    pub fn offer_key(&self, key: RoutingKey) {
        if !self.pending.any_want(&key) {
            return;
        }

        let priority = self
            .pending
            .subscribers(&key)
            .into_iter()
            .filter_map(|id| self.listener(id))
            .map(|listener| listener.priority())
            .min()
            .unwrap_or(PriorityClass::Min);

        let mut offered = self.offered.lock().expect("poisoned offered lock");
        if !offered.iter().any(|(offered_key, _)| *offered_key == key) {
            offered.push((key, priority));
            drop(offered);
            self.notify.notify_one();
        }
    }

    /// Picks the next request to send, if any.
    ///
    /// Draws from the grab array, skipping entries whose fetcher finished or
    /// whose priority changed underneath (those are re-inserted at their
    /// current priority). When offered keys are queued at a priority no
    /// worse than the drawn request, a coin decides between the two.
    pub fn remove_first(&self) -> Option<NextRequest> {
        loop {
            let drawn = self.grab.remove_random(self.config.priority_policy);

            let (id, coords) = match drawn {
                Some(drawn) => drawn,
                None => return self.pop_offered(),
            };

            let listener = {
                let mut fetchers = self.fetchers.lock().expect("poisoned fetcher table lock");
                match fetchers.get_mut(&id) {
                    Some(entry) => {
                        entry.coords = None;
                        entry.listener.clone()
                    }
                    None => continue,
                }
            };

            if listener.is_finished() {
                self.unregister(id);
                continue;
            }

            // The priority may have been changed since the entry was queued.
            let current = GrabCoords {
                class: listener.priority(),
                retry: coords.retry,
                client: coords.client,
            };
            if current.class != coords.class {
                self.grab.insert(id, current);
                let mut fetchers = self.fetchers.lock().expect("poisoned fetcher table lock");
                if let Some(entry) = fetchers.get_mut(&id) {
                    entry.coords = Some(current);
                }
                continue;
            }

            if let Some(offered) = self.maybe_offered(coords.class) {
                // Not this draw's turn: put the request back where it was.
                self.grab.insert(id, coords);
                let mut fetchers = self.fetchers.lock().expect("poisoned fetcher table lock");
                if let Some(entry) = fetchers.get_mut(&id) {
                    entry.coords = Some(coords);
                }
                return Some(offered);
            }

            return Some(NextRequest::Fetch {
                id,
                key: listener.client_key(),
                listener,
                coords,
            });
        }
    }

    fn maybe_offered(&self, drawn_class: PriorityClass) -> Option<NextRequest> {
        let best = {
            let offered = self.offered.lock().expect("poisoned offered lock");
            offered.iter().map(|(_, priority)| *priority).min()?
        };

        if best > drawn_class {
            return None;
        }
        if best == drawn_class && thread_rng().gen::<bool>() {
            return None;
        }

        self.pop_offered()
    }

    fn pop_offered(&self) -> Option<NextRequest> {
        let mut offered = self.offered.lock().expect("poisoned offered lock");

        let best_at = offered
            .iter()
            .enumerate()
            .min_by_key(|(_, (_, priority))| *priority)
            .map(|(at, _)| at)?;

        let (key, _) = offered.swap_remove(best_at);

        Some(NextRequest::Offered { key })
    }

    /// Records a successful draw into the recent-success history.
    pub fn succeeded(&self, coords: GrabCoords) {
        self.grab.succeeded(coords);
    }

    /// Delivers an arriving block to every fetcher waiting for its key.
    ///
    /// Subscriptions are removed atomically, cooldown entries for the key are
    /// discarded, and delivery happens on a spawned task in priority order —
    /// never under the scheduler locks. A fetcher that already reached a
    /// terminal state ignores the delivery.
    pub fn trip_pending(&self, key: RoutingKey, block: Block) {
        let subscribers = self.pending.take(&key);
        self.cooldown.remove(&key, u64::MAX);

        let mut listeners: Vec<Arc<dyn KeyListener>> =
            subscribers.into_iter().filter_map(|id| self.listener(id)).collect();

        if listeners.is_empty() {
            return;
        }

        listeners.sort_by_key(|listener| listener.priority());

        self.executor.spawn(Box::pin(async move {
            for listener in listeners {
                listener.on_got_block(&key, &block, false);
            }
        }));
    }

    /// Pumps the cooldown queue: every entry whose wakeup passed is removed
    /// and its key's subscribers get `requeue_after_cooldown`.
    pub fn move_keys_from_cooldown(&self, now: u64) {
        loop {
            let drained = self.cooldown.drain_before(now, self.config.cooldown_drain_max);
            if drained.is_empty() {
                return;
            }

            for (key, _fetcher) in drained {
                for listener in self
                    .pending
                    .subscribers(&key)
                    .into_iter()
                    .filter_map(|id| self.listener(id))
                {
                    listener.requeue_after_cooldown(&key, now);
                }
            }
        }
    }

    /// Whether any fetcher currently waits for `key`.
    pub fn any_want(&self, key: &RoutingKey) -> bool {
        self.pending.any_want(key)
    }

    /// Waits until new work may be available.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }

    pub(crate) fn listener(&self, id: FetcherId) -> Option<Arc<dyn KeyListener>> {
        self.fetchers
            .lock()
            .expect("poisoned fetcher table lock")
            .get(&id)
            .map(|entry| entry.listener.clone())
    }

    /// Returns the number of queued (not running, not cooling) requests.
    pub fn queued_requests(&self) -> usize {
        self.grab.len()
    }

    /// Returns the number of cooldown entries.
    pub fn cooling_keys(&self) -> usize {
        self.cooldown.len()
    }

    /// Returns the wakeup time of a parked (key, fetcher) pair, for
    /// diagnostics and tests.
    pub fn cooldown_wakeup(&self, key: &RoutingKey, id: FetcherId) -> Option<u64> {
        self.cooldown.wakeup(key, id)
    }
}
