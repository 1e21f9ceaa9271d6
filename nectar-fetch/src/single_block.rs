// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::{FetchError, FetchErrorKind};

use nectar_key::{Block, ClientKey, RoutingKey};
use nectar_runtime::{time, GetFailure};
use nectar_schedule::{ClientId, Error as ScheduleError, FetcherId, KeyListener, PriorityClass, Scheduler};
use nectar_splitfile::SplitfileStore;

use tokio::sync::oneshot;

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

type DeliverySlot = Mutex<Option<oneshot::Sender<Result<Vec<u8>, FetchError>>>>;

/// What a fetcher does with its decoded block — one struct covers leaf
/// content fetches, metadata fetches and splitfile children instead of a
/// hierarchy of fetcher types.
pub(crate) enum SuccessAction {
    /// The block is final content, delivered to the awaiting request.
    Leaf(DeliverySlot),
    /// The block is a metadata document; the walker re-enters with it.
    Walker(DeliverySlot),
    /// The block belongs to a splitfile slot.
    SplitfileChild {
        store: Arc<SplitfileStore>,
        segment: usize,
        slot: usize,
    },
}

impl SuccessAction {
    pub(crate) fn delivery() -> (SuccessAction, oneshot::Receiver<Result<Vec<u8>, FetchError>>) {
        let (tx, rx) = oneshot::channel();
        (SuccessAction::Walker(Mutex::new(Some(tx))), rx)
    }

    pub(crate) fn leaf() -> (SuccessAction, oneshot::Receiver<Result<Vec<u8>, FetchError>>) {
        let (tx, rx) = oneshot::channel();
        (SuccessAction::Leaf(Mutex::new(Some(tx))), rx)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Phase {
    Fresh,
    Registered,
    Cooldown,
    Succeeded,
    PermanentlyFailed,
    Cancelled,
}

struct FetchState {
    phase: Phase,
    retry_count: u32,
    cooldown_wakeup: Option<u64>,
}

/// The per-key fetch state machine: one key, driven through registration,
/// retries and cooldowns until it succeeds, fails for good or is cancelled.
pub struct SingleBlockFetcher {
    id: FetcherId,
    client: ClientId,
    key: ClientKey,
    priority: AtomicUsize,
    max_retries: i32,
    cooldown_retries: u32,
    scheduler: Arc<Scheduler>,
    state: Mutex<FetchState>,
    action: SuccessAction,
}

impl SingleBlockFetcher {
    pub(crate) fn new(
        scheduler: Arc<Scheduler>,
        client: ClientId,
        key: ClientKey,
        priority: PriorityClass,
        max_retries: i32,
        initial_retries: u32,
        action: SuccessAction,
    ) -> Arc<Self> {
        let cooldown_retries = scheduler.config().cooldown_retries();

        Arc::new(Self {
            id: scheduler.allocate_fetcher_id(),
            client,
            key,
            priority: AtomicUsize::new(priority.index()),
            max_retries,
            cooldown_retries,
            scheduler,
            state: Mutex::new(FetchState {
                phase: Phase::Fresh,
                retry_count: initial_retries,
                cooldown_wakeup: None,
            }),
            action,
        })
    }

    /// Registers this fetcher with the scheduler, probing the local store
    /// first.
    pub(crate) async fn schedule(self: Arc<Self>) -> Result<(), ScheduleError> {
        self.lock().phase = Phase::Registered;
        let scheduler = self.scheduler.clone();
        scheduler.register(self).await
    }

    /// Cancels this fetcher: it is unregistered everywhere and a successful
    /// arrival after this point is discarded.
    pub(crate) fn cancel(&self) {
        {
            let mut state = self.lock();
            if is_terminal(state.phase) {
                return;
            }
            state.phase = Phase::Cancelled;
        }

        self.scheduler.unregister(self.id);

        // A splitfile child's store is cancelled as a whole by the owning
        // request; only direct awaiters need to be released here.
        if let SuccessAction::Leaf(slot) | SuccessAction::Walker(slot) = &self.action {
            if let Some(tx) = slot.lock().expect("poisoned delivery lock").take() {
                let _ = tx.send(Err(FetchError::new(FetchErrorKind::Cancelled)));
            }
        }
    }

    /// Raises or lowers the scheduling priority; the grab array re-sorts the
    /// entry on its next draw.
    pub fn set_priority(&self, priority: PriorityClass) {
        self.priority.store(priority.index(), Ordering::Release);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FetchState> {
        self.state.lock().expect("poisoned fetcher lock")
    }

    fn deliver_data(&self, data: Vec<u8>) {
        match &self.action {
            SuccessAction::Leaf(slot) | SuccessAction::Walker(slot) => {
                if let Some(tx) = slot.lock().expect("poisoned delivery lock").take() {
                    let _ = tx.send(Ok(data));
                }
            }
            SuccessAction::SplitfileChild { store, segment, slot } => {
                store.on_block(*segment, *slot, data);
            }
        }
    }

    fn deliver_error(&self, error: FetchError) {
        match &self.action {
            SuccessAction::Leaf(slot) | SuccessAction::Walker(slot) => {
                if let Some(tx) = slot.lock().expect("poisoned delivery lock").take() {
                    let _ = tx.send(Err(error));
                }
            }
            SuccessAction::SplitfileChild { store, segment, slot } => {
                let failure = match error.kind() {
                    FetchErrorKind::BlockDecodeError => GetFailure::VerifyFailed,
                    FetchErrorKind::Cancelled => GetFailure::Cancelled,
                    _ => GetFailure::Internal,
                };
                store.on_block_failed(*segment, *slot, failure, true);
            }
        }
    }

    fn notify_splitfile_failure(&self, failure: GetFailure, permanent: bool) {
        if let SuccessAction::SplitfileChild { store, segment, slot } = &self.action {
            store.on_block_failed(*segment, *slot, failure, permanent);
        }
    }

    fn notify_splitfile_cooldown(&self) {
        if let SuccessAction::SplitfileChild { store, segment, slot } = &self.action {
            store.on_block_cooldown(*segment, *slot);
        }
    }

    fn notify_splitfile_fetching(&self) {
        if let SuccessAction::SplitfileChild { store, segment, slot } = &self.action {
            store.on_block_fetching(*segment, *slot);
        }
    }
}

fn is_terminal(phase: Phase) -> bool {
    matches!(phase, Phase::Succeeded | Phase::PermanentlyFailed | Phase::Cancelled)
}

impl KeyListener for SingleBlockFetcher {
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
        PriorityClass::from_index(self.priority.load(Ordering::Acquire)).expect("priority index in range")
    }

    fn retry_count(&self) -> u32 {
        self.lock().retry_count
    }

    fn is_finished(&self) -> bool {
        is_terminal(self.lock().phase)
    }

    fn on_got_block(&self, key: &RoutingKey, block: &Block, from_store: bool) {
        if key != self.key.routing_key() {
            // A key can legitimately be tripped for a routing key this
            // fetcher never asked for when bloom filters over-report.
            log::debug!("Fetcher {} ignoring mis-delivered key {}.", self.id, key);
            return;
        }

        let decoded = self.key.decode(block);

        {
            let mut state = self.lock();
            if is_terminal(state.phase) {
                // Happens legitimately: a direct reply and an unsolicited
                // arrival can both carry the same key.
                log::trace!("Fetcher {} already finished, dropping block for {}.", self.id, key);
                return;
            }
            state.phase = match decoded {
                Ok(_) => Phase::Succeeded,
                Err(_) => Phase::PermanentlyFailed,
            };
        }

        self.scheduler.unregister(self.id);

        match decoded {
            Ok(data) => {
                log::trace!(
                    "Fetcher {} got {} ({} bytes, from_store={}).",
                    self.id,
                    key,
                    data.len(),
                    from_store
                );
                self.deliver_data(data);
            }
            Err(e) => {
                log::info!("Fetcher {} failed to decode block for {}: {}.", self.id, key, e);
                self.deliver_error(FetchError::new(FetchErrorKind::BlockDecodeError).with_message(e.to_string()));
            }
        }
    }

    fn on_failure(&self, failure: GetFailure) {
        enum Next {
            Ignore,
            Fatal,
            Cooldown,
            Requeue,
        }

        let next = {
            let mut state = self.lock();

            if is_terminal(state.phase) {
                Next::Ignore
            } else if failure.is_fatal() {
                state.phase = Phase::PermanentlyFailed;
                Next::Fatal
            } else {
                state.retry_count += 1;

                if self.max_retries >= 0 && state.retry_count > self.max_retries as u32 {
                    state.phase = Phase::PermanentlyFailed;
                    Next::Fatal
                } else if self.cooldown_retries > 0 && state.retry_count % self.cooldown_retries == 0 {
                    state.phase = Phase::Cooldown;
                    Next::Cooldown
                } else {
                    Next::Requeue
                }
            }
        };

        match next {
            Next::Ignore => {}
            Next::Fatal => {
                self.scheduler.unregister(self.id);
                self.notify_splitfile_failure(failure, true);
                if !matches!(self.action, SuccessAction::SplitfileChild { .. }) {
                    self.deliver_error(FetchError::from(failure));
                }
            }
            Next::Cooldown => {
                self.notify_splitfile_failure(failure, false);

                match self.scheduler.enter_cooldown(self.id, time::now_millis()) {
                    Ok(wakeup) => {
                        self.lock().cooldown_wakeup = Some(wakeup);
                        self.notify_splitfile_cooldown();
                        log::debug!("Fetcher {} cooling down until {}.", self.id, wakeup);
                    }
                    Err(e) => {
                        // Harmless: the key is already parked.
                        log::debug!("Fetcher {} cooldown enqueue: {}.", self.id, e);
                    }
                }
            }
            Next::Requeue => {
                self.notify_splitfile_failure(failure, false);
                self.notify_splitfile_fetching();

                if let Err(e) = self.scheduler.requeue(self.id) {
                    log::warn!("Requeueing fetcher {} failed: {}.", self.id, e);
                }
            }
        }
    }

    fn requeue_after_cooldown(&self, key: &RoutingKey, now: u64) {
        {
            let mut state = self.lock();

            if state.phase != Phase::Cooldown || key != self.key.routing_key() {
                return;
            }
            if state.cooldown_wakeup.map_or(false, |wakeup| wakeup > now) {
                return;
            }

            state.phase = Phase::Registered;
            state.cooldown_wakeup = None;
        }

        self.notify_splitfile_fetching();

        if let Err(e) = self.scheduler.requeue(self.id) {
            log::warn!("Requeueing fetcher {} after cooldown failed: {}.", self.id, e);
        }
    }
}
