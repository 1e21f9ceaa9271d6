// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

//! Runtime interfaces between the nectar client layer and its node
//! environment.
//!
//! The client layer never talks to the wire, the datastore or the disk
//! directly; it goes through the traits defined here. The node hosting the
//! client constructs concrete implementations and threads them through the
//! fetch context, so there is no process-wide state.

#![deny(missing_docs)]

mod bucket;
mod executor;
mod healing;
mod key_store;
mod memory_limit;
mod node;
mod random_access;

pub mod time;

pub use bucket::{Bucket, BucketError, BucketFactory, FileBucket, MemoryBucket};
pub use executor::{Executor, TokioExecutor};
pub use healing::{ChannelHealingQueue, HealingQueue, NullHealingQueue};
pub use key_store::{KeyStore, StoreError};
pub use memory_limit::MemoryLimitedRunner;
pub use node::{GetFailure, NodeLayer};
pub use random_access::{FileAccess, MemoryAccess, RandomAccess};
