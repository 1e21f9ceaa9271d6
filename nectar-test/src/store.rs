// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

use nectar_key::{Block, RoutingKey};
use nectar_runtime::{KeyStore, StoreError};

use async_trait::async_trait;
use hashbrown::HashMap;

use std::sync::Mutex;

/// An in-memory block store.
#[derive(Default)]
pub struct MemoryKeyStore {
    blocks: Mutex<HashMap<RoutingKey, Block>>,
}

impl MemoryKeyStore {
    /// Creates a new, empty [`MemoryKeyStore`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a block directly, bypassing the async interface.
    pub fn insert(&self, key: RoutingKey, block: Block) {
        self.blocks.lock().expect("poisoned store lock").insert(key, block);
    }

    /// Returns the number of stored blocks.
    pub fn len(&self) -> usize {
        self.blocks.lock().expect("poisoned store lock").len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn fetch(&self, key: &RoutingKey, _dont_promote: bool) -> Result<Option<Block>, StoreError> {
        Ok(self.blocks.lock().expect("poisoned store lock").get(key).cloned())
    }

    async fn has(&self, key: &RoutingKey) -> Result<bool, StoreError> {
        Ok(self.blocks.lock().expect("poisoned store lock").contains_key(key))
    }

    async fn put(&self, key: &RoutingKey, block: &Block) -> Result<(), StoreError> {
        self.blocks.lock().expect("poisoned store lock").insert(*key, block.clone());
        Ok(())
    }
}
