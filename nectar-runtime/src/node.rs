// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

use nectar_key::{Block, ClientKey, RoutingKey};

use async_trait::async_trait;
use thiserror::Error;

/// Failure of a single low-level get, as surfaced by the node layer.
///
/// Retryable kinds are counted against a request's retry budget; fatal kinds
/// terminate the request immediately.
#[derive(Clone, Copy, Debug, Eq, Error, Hash, PartialEq)]
#[non_exhaustive]
pub enum GetFailure {
    /// No route towards the key could be found.
    #[error("Route not found")]
    RouteNotFound,
    /// Routing gave up early; the network is unlikely to have the key nearby.
    #[error("Route really not found")]
    RouteReallyNotFound,
    /// A peer on the path rejected the request due to load.
    #[error("Rejected: overload")]
    RejectedOverload,
    /// The block transfer started but did not complete.
    #[error("Transfer failed")]
    TransferFailed,
    /// The key failed recently on the same path and was short-circuited.
    #[error("Recently failed")]
    RecentlyFailed,
    /// The request timed out at the node layer.
    #[error("Timeout")]
    Timeout,
    /// The network answered authoritatively that the data is not available.
    #[error("Data not found")]
    DataNotFound,
    /// A block arrived but failed key verification.
    #[error("Verify failed")]
    VerifyFailed,
    /// The request was cancelled below the client layer.
    #[error("Cancelled")]
    Cancelled,
    /// An internal node error.
    #[error("Internal node error")]
    Internal,
}

impl GetFailure {
    /// Whether this failure terminates the request regardless of the
    /// remaining retry budget.
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Internal)
    }
}

/// The node layer: routes a single block request into the network.
///
/// One call maps to one network attempt; retries, cooldown and coalescing all
/// happen above this interface.
#[async_trait]
pub trait NodeLayer: Send + Sync {
    /// Routes a get for `key` and resolves with the fetched block.
    async fn real_get(&self, key: &ClientKey, dont_cache: bool, ignore_store: bool) -> Result<Block, GetFailure>;

    /// Fetches a key a peer has offered unsolicited.
    async fn offered_get(&self, key: &RoutingKey) -> Result<Block, GetFailure>;
}
