// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

use nectar_key::{Block, ClientKey, RoutingKey};
use nectar_runtime::{GetFailure, NodeLayer};

use async_trait::async_trait;
use hashbrown::HashMap;

use std::{
    collections::VecDeque,
    sync::Mutex,
    time::Duration,
};

/// A node layer answering from a per-key script.
///
/// Each `real_get` pops the next scripted response for the key; an
/// exhausted or missing script answers `DataNotFound`. Requests are counted
/// per key so tests can assert on retry progressions.
#[derive(Default)]
pub struct ScriptedNode {
    scripts: Mutex<HashMap<RoutingKey, VecDeque<Result<Block, GetFailure>>>>,
    request_counts: Mutex<HashMap<RoutingKey, u32>>,
    latency: Option<Duration>,
}

impl ScriptedNode {
    /// Creates a new, empty [`ScriptedNode`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a [`ScriptedNode`] that delays every answer by `latency`.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Appends scripted responses for `key`.
    pub fn script(&self, key: &RoutingKey, responses: impl IntoIterator<Item = Result<Block, GetFailure>>) {
        self.scripts
            .lock()
            .expect("poisoned script lock")
            .entry(*key)
            .or_default()
            .extend(responses);
    }

    /// Scripts `failures` failed attempts followed by the block itself.
    pub fn script_failures_then_block(&self, key: &RoutingKey, failure: GetFailure, failures: usize, block: Block) {
        let responses: Vec<_> = (0..failures)
            .map(|_| Err(failure))
            .chain(std::iter::once(Ok(block)))
            .collect();
        self.script(key, responses);
    }

    /// Returns how many gets were issued for `key`.
    pub fn request_count(&self, key: &RoutingKey) -> u32 {
        self.request_counts
            .lock()
            .expect("poisoned count lock")
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Returns the total number of gets issued.
    pub fn total_requests(&self) -> u32 {
        self.request_counts.lock().expect("poisoned count lock").values().sum()
    }

    fn answer(&self, key: &RoutingKey) -> Result<Block, GetFailure> {
        *self.request_counts.lock().expect("poisoned count lock").entry(*key).or_insert(0) += 1;

        self.scripts
            .lock()
            .expect("poisoned script lock")
            .get_mut(key)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Err(GetFailure::DataNotFound))
    }
}

#[async_trait]
impl NodeLayer for ScriptedNode {
    async fn real_get(&self, key: &ClientKey, _dont_cache: bool, _ignore_store: bool) -> Result<Block, GetFailure> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.answer(key.routing_key())
    }

    async fn offered_get(&self, key: &RoutingKey) -> Result<Block, GetFailure> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.answer(key)
    }
}
