// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

//! Resumable, FEC-protected on-disk splitfile storage for the nectar client
//! layer.
//!
//! A splitfile is a file too large for one block, split into `k` data blocks
//! plus `n − k` check blocks per segment; any `k` of the `n` recover the
//! segment. This crate owns everything between "a decoded block arrived" and
//! "the reassembled file is in the output bucket": the per-segment slot
//! tables, the FEC decode/encode pipeline, healing reinserts, the bloom
//! filters over outstanding keys, and the single on-disk file the whole
//! download lives in — laid out so that a crashed node resumes exactly where
//! it stopped.

#![deny(missing_docs)]

mod bloom;
mod checksum;
mod error;
mod fec;
mod gf256;
mod keys;
mod layout;
mod persist;
mod segment;
mod status;
mod storage;

pub use bloom::{BinaryBloom, CountingBloom, SALT_LENGTH};
pub use checksum::ChecksumKind;
pub use error::{Error, FailureTally};
pub use fec::{FecCodec, ReedSolomonCodec};
pub use keys::SegmentKeys;
pub use layout::{Footer, GeneralProgress, SegmentShape, StoreLayout, END_MAGIC, FOOTER_LENGTH, STORE_VERSION};
pub use persist::Persister;
pub use segment::{Segment, SegmentStage};
pub use status::{SlotState, SlotStatus};
pub use storage::{SplitfileParams, SplitfileStore, StoreListener};
