// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::{ClientId, FetcherId, PriorityClass};

use nectar_key::{Block, ClientKey, RoutingKey};
use nectar_runtime::GetFailure;

/// A registered request for one key, driven by the scheduler.
///
/// Implementations own their retry state; the scheduler only consults the
/// projections below when queueing and delivers outcomes through the
/// callbacks. Callbacks are never invoked under a scheduler lock, and
/// implementations must not call back into the scheduler reentrantly from
/// one.
pub trait KeyListener: Send + Sync {
    /// The id this listener was allocated when it was created.
    fn id(&self) -> FetcherId;

    /// The client this request is scheduled under, for fairness.
    fn client(&self) -> ClientId;

    /// The key this listener wants.
    fn client_key(&self) -> ClientKey;

    /// The current priority class.
    fn priority(&self) -> PriorityClass;

    /// The current retry count.
    fn retry_count(&self) -> u32;

    /// Whether this listener already reached a terminal state.
    fn is_finished(&self) -> bool;

    /// A block for `key` arrived, from the store or from the network.
    ///
    /// May be called more than once across arrival paths; implementations
    /// deliver to their parent at most once.
    fn on_got_block(&self, key: &RoutingKey, block: &Block, from_store: bool);

    /// The network attempt for this listener's key failed.
    fn on_failure(&self, failure: GetFailure);

    /// A cooldown period for `key` expired at `now`.
    fn requeue_after_cooldown(&self, key: &RoutingKey, now: u64);
}
