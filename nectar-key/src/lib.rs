// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

//! Key, block and URI types for the nectar client layer.
//!
//! A [`RoutingKey`] is the opaque 32-byte identifier a block is routed and
//! looked up by. A [`ClientKey`] adds the material needed to turn a fetched
//! [`Block`] back into plaintext. Sealing and verification are delegated to
//! `iota-crypto` primitives; this crate only fixes their input/output
//! contract.

#![deny(missing_docs)]

mod block;
mod client_key;
mod error;
mod routing_key;
mod uri;

/// Module providing random generation utilities for tests and tools.
#[cfg(feature = "rand")]
pub mod rand;

pub use block::{Block, BlockKind};
pub use client_key::{ClientKey, ContentKey, SignedKey};
pub use error::Error;
pub use routing_key::RoutingKey;
pub use uri::KeyUri;
