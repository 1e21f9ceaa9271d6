// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

//! Test utilities for nectar: a scripted node layer, an in-memory key
//! store, a channel-backed fetch callback and a ready-made fetch context.

#![deny(missing_docs)]

/// Module providing a channel-backed fetch callback.
pub mod callback;
/// Module providing a ready-made fetch context over scripted collaborators.
pub mod context;
/// Module providing a stdout logger for test diagnostics.
pub mod logger;
/// Module providing a scripted node layer.
pub mod node;
/// Module providing an in-memory key store.
pub mod store;

pub use callback::{ChannelCallback, FetchEvent};
pub use context::TestEnv;
pub use node::ScriptedNode;
pub use store::MemoryKeyStore;
