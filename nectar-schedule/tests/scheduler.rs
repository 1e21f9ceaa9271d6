// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

use nectar_key::{rand::key::rand_content_block, Block, ClientKey, RoutingKey};
use nectar_runtime::{GetFailure, KeyStore, StoreError, TokioExecutor};
use nectar_schedule::{
    ClientId, FetcherId, KeyListener, NextRequest, PriorityClass, Scheduler, SchedulerConfig,
};

use async_trait::async_trait;

use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc, Mutex,
};

struct EmptyStore;

#[async_trait]
impl KeyStore for EmptyStore {
    async fn fetch(&self, _key: &RoutingKey, _dont_promote: bool) -> Result<Option<Block>, StoreError> {
        Ok(None)
    }

    async fn has(&self, _key: &RoutingKey) -> Result<bool, StoreError> {
        Ok(false)
    }

    async fn put(&self, _key: &RoutingKey, _block: &Block) -> Result<(), StoreError> {
        Ok(())
    }
}

struct PrefilledStore {
    key: RoutingKey,
    block: Block,
}

#[async_trait]
impl KeyStore for PrefilledStore {
    async fn fetch(&self, key: &RoutingKey, _dont_promote: bool) -> Result<Option<Block>, StoreError> {
        Ok((*key == self.key).then(|| self.block.clone()))
    }

    async fn has(&self, key: &RoutingKey) -> Result<bool, StoreError> {
        Ok(*key == self.key)
    }

    async fn put(&self, _key: &RoutingKey, _block: &Block) -> Result<(), StoreError> {
        Ok(())
    }
}

struct StubListener {
    id: FetcherId,
    client: ClientId,
    key: ClientKey,
    priority: PriorityClass,
    deliveries: AtomicU32,
    from_store_deliveries: AtomicU32,
    requeues: AtomicU32,
    finished: Mutex<bool>,
}

impl StubListener {
    fn new(scheduler: &Scheduler, key: ClientKey, priority: PriorityClass) -> Arc<Self> {
        Arc::new(Self {
            id: scheduler.allocate_fetcher_id(),
            client: scheduler.allocate_client_id(),
            key,
            priority,
            deliveries: AtomicU32::new(0),
            from_store_deliveries: AtomicU32::new(0),
            requeues: AtomicU32::new(0),
            finished: Mutex::new(false),
        })
    }
}

impl KeyListener for StubListener {
    fn id(&self) -> FetcherId {
        self.id
    }

    fn client(&self) -> ClientId {
        self.client
    }

    fn client_key(&self) -> ClientKey {
        self.key.clone()
    }

    fn priority(&self) -> PriorityClass {
        self.priority
    }

    fn retry_count(&self) -> u32 {
        0
    }

    fn is_finished(&self) -> bool {
        *self.finished.lock().unwrap()
    }

    fn on_got_block(&self, _key: &RoutingKey, _block: &Block, from_store: bool) {
        // At-most-once delivery is the listener's contract: terminal state
        // is claimed under the lock, exactly as the real fetcher does it.
        let mut finished = self.finished.lock().unwrap();
        if *finished {
            return;
        }
        *finished = true;

        self.deliveries.fetch_add(1, Ordering::SeqCst);
        if from_store {
            self.from_store_deliveries.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn on_failure(&self, _failure: GetFailure) {}

    fn requeue_after_cooldown(&self, _key: &RoutingKey, _now: u64) {
        self.requeues.fetch_add(1, Ordering::SeqCst);
    }
}

fn scheduler_over(store: Arc<dyn KeyStore>) -> Arc<Scheduler> {
    Arc::new(Scheduler::new(
        SchedulerConfig::build().cooldown_time_ms(1_000).finish(),
        store,
        Arc::new(TokioExecutor),
    ))
}

#[tokio::test]
async fn store_hit_is_delivered_without_enqueueing() {
    let (key, block) = rand_content_block(1_024);
    let key = ClientKey::from(key);

    let scheduler = scheduler_over(Arc::new(PrefilledStore {
        key: *key.routing_key(),
        block,
    }));

    let listener = StubListener::new(&scheduler, key, PriorityClass::Interactive);
    scheduler.register(listener.clone()).await.unwrap();

    assert_eq!(listener.deliveries.load(Ordering::SeqCst), 1);
    assert_eq!(listener.from_store_deliveries.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.queued_requests(), 0);
    assert!(scheduler.remove_first().is_none());
}

#[tokio::test]
async fn register_then_remove_first_yields_the_request() {
    let (key, _) = rand_content_block(64);
    let key = ClientKey::from(key);
    let scheduler = scheduler_over(Arc::new(EmptyStore));

    let listener = StubListener::new(&scheduler, key.clone(), PriorityClass::Interactive);
    scheduler.register(listener.clone()).await.unwrap();

    assert_eq!(scheduler.queued_requests(), 1);
    assert!(scheduler.any_want(key.routing_key()));

    match scheduler.remove_first() {
        Some(NextRequest::Fetch { id, key: drawn, .. }) => {
            assert_eq!(id, listener.id);
            assert_eq!(drawn, key);
        }
        _ => panic!("expected a fetch request"),
    }

    assert!(scheduler.remove_first().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn trip_pending_satisfies_every_waiter_once() {
    let (content_key, block) = rand_content_block(512);
    let key = ClientKey::from(content_key);
    let scheduler = scheduler_over(Arc::new(EmptyStore));

    let first = StubListener::new(&scheduler, key.clone(), PriorityClass::Interactive);
    let second = StubListener::new(&scheduler, key.clone(), PriorityClass::BulkSplitfile);
    scheduler.register(first.clone()).await.unwrap();
    scheduler.register(second.clone()).await.unwrap();

    // Both a direct reply and an unsolicited arrival race in.
    scheduler.trip_pending(*key.routing_key(), block.clone());
    scheduler.trip_pending(*key.routing_key(), block);

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    assert_eq!(first.deliveries.load(Ordering::SeqCst), 1);
    assert_eq!(second.deliveries.load(Ordering::SeqCst), 1);
    assert!(!scheduler.any_want(key.routing_key()));
}

#[tokio::test]
async fn cooldown_holds_key_until_wakeup() {
    let (key, _) = rand_content_block(64);
    let key = ClientKey::from(key);
    let scheduler = scheduler_over(Arc::new(EmptyStore));

    let listener = StubListener::new(&scheduler, key.clone(), PriorityClass::Interactive);
    scheduler.register(listener.clone()).await.unwrap();

    // Simulate the starter drawing it and the fetch failing into cooldown.
    assert!(scheduler.remove_first().is_some());
    let wakeup = scheduler.enter_cooldown(listener.id, 10_000).unwrap();
    assert_eq!(wakeup, 11_000);
    assert_eq!(scheduler.cooldown_wakeup(key.routing_key(), listener.id), Some(11_000));

    // Before the wakeup nothing may be drawn for the key.
    scheduler.move_keys_from_cooldown(wakeup - 1);
    assert!(scheduler.remove_first().is_none());
    assert_eq!(listener.requeues.load(Ordering::SeqCst), 0);

    // At wakeup + 1 the subscribers are told to requeue.
    scheduler.move_keys_from_cooldown(wakeup + 1);
    assert_eq!(listener.requeues.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.cooling_keys(), 0);
}

#[tokio::test]
async fn unregister_clears_every_structure() {
    let (key, _) = rand_content_block(64);
    let key = ClientKey::from(key);
    let scheduler = scheduler_over(Arc::new(EmptyStore));

    let listener = StubListener::new(&scheduler, key.clone(), PriorityClass::Prefetch);
    scheduler.register(listener.clone()).await.unwrap();

    scheduler.unregister(listener.id);

    assert_eq!(scheduler.queued_requests(), 0);
    assert!(!scheduler.any_want(key.routing_key()));
    assert!(scheduler.remove_first().is_none());
}
