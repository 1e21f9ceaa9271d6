// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

//! Fetchers and metadata interpretation for the nectar client layer.
//!
//! This crate turns a [`KeyUri`](nectar_key::KeyUri) into a complete file:
//! the single-block fetcher state machine drives one key through retries and
//! cooldowns, the metadata walker interprets fetched documents (manifests,
//! redirects, archives, splitfiles) and spawns the next fetcher, and the
//! client request root ties everything to exactly one terminal callback.

#![deny(missing_docs)]

mod archive;
mod callback;
mod compression;
mod context;
mod error;
mod metadata;
mod request;
mod single_block;
mod splitfile;
mod walker;

pub use callback::{FetchCallback, FetchResult};
pub use compression::CompressionCodec;
pub use context::{FetchConfig, FetchConfigBuilder, FetchContext};
pub use error::{FetchError, FetchErrorKind};
pub use metadata::{ContainerType, Metadata, SplitfileMetadata, METADATA_MAGIC};
pub use request::{ClientRequest, Getter};
pub use single_block::SingleBlockFetcher;
