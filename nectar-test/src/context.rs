// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::{MemoryKeyStore, ScriptedNode};

use nectar_fetch::{FetchConfig, FetchContext};
use nectar_runtime::{BucketFactory, ChannelHealingQueue, MemoryLimitedRunner, TokioExecutor};
use nectar_schedule::{RequestStarter, Scheduler, SchedulerConfig};
use nectar_splitfile::ReedSolomonCodec;

use tokio::sync::{mpsc, oneshot};

use std::sync::{Arc, Mutex};

/// The bloom filter salt used by test environments.
pub const TEST_SALT: [u8; 8] = [0x42; 8];

/// A complete fetch environment over scripted collaborators: scheduler,
/// request starter, scripted node, in-memory store and healing channel.
pub struct TestEnv {
    /// The scripted node layer.
    pub node: Arc<ScriptedNode>,
    /// The in-memory local store.
    pub key_store: Arc<MemoryKeyStore>,
    /// The scheduler under test.
    pub scheduler: Arc<Scheduler>,
    /// The assembled fetch context.
    pub ctx: Arc<FetchContext>,
    /// Receives healing offers.
    pub healing_rx: Mutex<mpsc::Receiver<Vec<u8>>>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
}

impl TestEnv {
    /// Creates an environment with quick test timings: a fast cooldown
    /// sweep and a short cooldown period.
    pub fn new() -> Arc<Self> {
        Self::with_configs(
            SchedulerConfig::build()
                .cooldown_time_ms(400)
                .sweep_interval_ms(50)
                .cache_local_requests(true)
                .finish(),
            FetchConfig::default(),
        )
    }

    /// Creates an environment with explicit configurations.
    pub fn with_configs(scheduler_config: SchedulerConfig, fetch_config: FetchConfig) -> Arc<Self> {
        let node = Arc::new(ScriptedNode::new());
        let key_store = Arc::new(MemoryKeyStore::new());
        let executor = Arc::new(TokioExecutor);

        let scheduler = Arc::new(Scheduler::new(scheduler_config, key_store.clone(), executor.clone()));

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        RequestStarter::new(scheduler.clone(), node.clone(), key_store.clone()).spawn(shutdown_rx);

        let (healing, healing_rx) = ChannelHealingQueue::new(64);

        let ctx = Arc::new(FetchContext {
            scheduler: scheduler.clone(),
            bucket_factory: Arc::new(BucketFactory::new(std::env::temp_dir(), None)),
            healing: Arc::new(healing),
            fec: Arc::new(ReedSolomonCodec::new()),
            fec_runner: Arc::new(MemoryLimitedRunner::new(2, 64 * 1024 * 1024)),
            executor,
            salt: TEST_SALT,
            config: fetch_config,
        });

        Arc::new(Self {
            node,
            key_store,
            scheduler,
            ctx,
            healing_rx: Mutex::new(healing_rx),
            shutdown: Mutex::new(Some(shutdown_tx)),
        })
    }

    /// Stops the request starter.
    pub fn shutdown(&self) {
        if let Some(tx) = self.shutdown.lock().expect("poisoned shutdown lock").take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for TestEnv {
    fn drop(&mut self) {
        self.shutdown();
    }
}
