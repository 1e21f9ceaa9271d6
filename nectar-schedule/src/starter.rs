// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::{KeyListener, NextRequest, Scheduler};

use nectar_runtime::{time, KeyStore, NodeLayer};

use tokio::sync::{oneshot, Semaphore};

use std::{sync::Arc, time::Duration};

/// Shutdown signal receiver of a [`RequestStarter`].
pub type ShutdownRx = oneshot::Receiver<()>;

/// Pulls requests off the scheduler and routes them into the node layer.
///
/// One long-lived task: it draws with `remove_first`, caps the number of
/// in-flight gets, dispatches each on its own task and feeds the outcome
/// back — successes through `trip_pending` so coalesced waiters are
/// satisfied too, failures to the owning listener. A periodic tick sweeps
/// the cooldown queue.
pub struct RequestStarter {
    scheduler: Arc<Scheduler>,
    node: Arc<dyn NodeLayer>,
    key_store: Arc<dyn KeyStore>,
}

impl RequestStarter {
    /// Creates a new [`RequestStarter`].
    pub fn new(scheduler: Arc<Scheduler>, node: Arc<dyn NodeLayer>, key_store: Arc<dyn KeyStore>) -> Self {
        Self {
            scheduler,
            node,
            key_store,
        }
    }

    /// Spawns the starter loop. It stops when the shutdown signal fires.
    pub fn spawn(self, mut shutdown: ShutdownRx) {
        tokio::spawn(async move {
            log::info!("Running request starter.");

            let running = Arc::new(Semaphore::new(self.scheduler.config().max_running_requests()));
            let mut sweep = tokio::time::interval(Duration::from_millis(self.scheduler.config().sweep_interval_ms()));

            loop {
                let permit = tokio::select! {
                    _ = &mut shutdown => break,
                    permit = running.clone().acquire_owned() => permit.expect("request semaphore closed"),
                };

                let next = loop {
                    if let Some(next) = self.scheduler.remove_first() {
                        break next;
                    }

                    tokio::select! {
                        _ = &mut shutdown => {
                            log::info!("Stopping request starter.");
                            return;
                        }
                        _ = self.scheduler.notified() => {}
                        _ = sweep.tick() => {
                            self.scheduler.move_keys_from_cooldown(time::now_millis());
                        }
                    }
                };

                let scheduler = self.scheduler.clone();
                let node = self.node.clone();
                let key_store = self.key_store.clone();

                tokio::spawn(async move {
                    let _permit = permit;

                    match next {
                        NextRequest::Fetch { id, key, listener, coords } => {
                            let routing_key = *key.routing_key();

                            match node.real_get(&key, false, false).await {
                                Ok(block) => {
                                    if scheduler.config().cache_local_requests() {
                                        if let Err(e) = key_store.put(&routing_key, &block).await {
                                            log::warn!("Caching fetched block {} failed: {}.", routing_key, e);
                                        }
                                    }

                                    scheduler.succeeded(coords);
                                    scheduler.trip_pending(routing_key, block);
                                }
                                Err(failure) => {
                                    log::debug!("Get for {} of fetcher {} failed: {}.", routing_key, id, failure);
                                    listener.on_failure(failure);
                                }
                            }
                        }
                        NextRequest::Offered { key } => match node.offered_get(&key).await {
                            Ok(block) => scheduler.trip_pending(key, block),
                            Err(failure) => {
                                log::debug!("Offered get for {} failed: {}.", key, failure);
                            }
                        },
                    }
                });
            }

            log::info!("Stopping request starter.");
        });
    }
}
