// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

use nectar_key::{Block, RoutingKey};

use async_trait::async_trait;
use thiserror::Error;

/// Error occurring when accessing the local block store.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// An I/O error happened.
    #[error("I/O error happened: {0}")]
    Io(#[from] std::io::Error),
    /// The backend failed.
    #[error("Store backend error: {0}")]
    Backend(Box<dyn std::error::Error + Send + Sync + 'static>),
}

/// The local block store, consulted before any network request is issued.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Fetches a block by routing key. `dont_promote` leaves the store's
    /// replacement state untouched.
    async fn fetch(&self, key: &RoutingKey, dont_promote: bool) -> Result<Option<Block>, StoreError>;

    /// Probes for a key without fetching its data.
    async fn has(&self, key: &RoutingKey) -> Result<bool, StoreError>;

    /// Stores a block under its routing key.
    async fn put(&self, key: &RoutingKey, block: &Block) -> Result<(), StoreError>;
}
