// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::FetcherId;

use nectar_key::RoutingKey;

use thiserror::Error;

/// Error occurring when scheduling requests.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The same (key, fetcher) pair is already parked for a future wakeup.
    #[error("{key} is already in cooldown for fetcher {fetcher} until {wakeup}")]
    AlreadyQueued {
        /// The routing key of the parked entry.
        key: RoutingKey,
        /// The owning fetcher.
        fetcher: FetcherId,
        /// The existing wakeup time, in unix milliseconds.
        wakeup: u64,
    },
    /// A fetcher id is not present in the scheduler's table.
    #[error("Unknown fetcher: {0}")]
    UnknownFetcher(FetcherId),
    /// The local store failed during register.
    #[error("Store error: {0}")]
    Store(#[from] nectar_runtime::StoreError),
}
