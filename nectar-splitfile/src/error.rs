// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

use nectar_runtime::GetFailure;

use hashbrown::HashMap;
use thiserror::Error;

use core::fmt;

/// Per-kind counts of the block failures that sank a splitfile.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FailureTally {
    counts: HashMap<GetFailure, u32>,
}

impl FailureTally {
    /// Creates an empty tally.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one failure of the given kind.
    pub fn record(&mut self, failure: GetFailure) {
        *self.counts.entry(failure).or_insert(0) += 1;
    }

    /// Returns the count recorded for a kind.
    pub fn count(&self, failure: GetFailure) -> u32 {
        self.counts.get(&failure).copied().unwrap_or(0)
    }

    /// Returns the total number of recorded failures.
    pub fn total(&self) -> u32 {
        self.counts.values().sum()
    }

    /// Merges another tally into this one.
    pub fn merge(&mut self, other: &FailureTally) {
        for (failure, count) in &other.counts {
            *self.counts.entry(*failure).or_insert(0) += count;
        }
    }
}

impl fmt::Display for FailureTally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (failure, count) in &self.counts {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", failure, count)?;
            first = false;
        }
        Ok(())
    }
}

/// Error occurring in splitfile storage.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The file does not end with the store magic.
    #[error("Not a splitfile store")]
    WrongFormat,
    /// The store was written by an unsupported version.
    #[error("Unsupported store version: {0}")]
    UnsupportedVersion(u32),
    /// A checksummed section failed verification.
    #[error("Checksum failed on {0}")]
    ChecksumFailed(&'static str),
    /// An unknown checksum kind tag was read.
    #[error("Unknown checksum kind: {0}")]
    UnknownChecksumKind(u16),
    /// The store layout is internally inconsistent.
    #[error("Malformed store: {0}")]
    StorageFormat(String),
    /// A segment has more blocks than the codec supports.
    #[error("Too many blocks in segment: {0}")]
    TooManyBlocks(usize),
    /// Not enough blocks survived to decode a segment.
    #[error("Insufficient blocks: needed {needed}, have {have}")]
    InsufficientBlocks {
        /// Blocks required for decode.
        needed: usize,
        /// Blocks available.
        have: usize,
    },
    /// Codec input blocks have differing lengths.
    #[error("Mismatched block length: expected {expected}, got {actual}")]
    MismatchedBlockLength {
        /// The length of the first block seen.
        expected: usize,
        /// The offending length.
        actual: usize,
    },
    /// Too many blocks of a segment failed permanently.
    #[error("Splitfile failed: {tally}")]
    SplitfileFailed {
        /// Per-kind counts of the children's failures.
        tally: FailureTally,
    },
    /// The underlying storage failed.
    #[error("Bucket error: {0}")]
    Bucket(#[from] nectar_runtime::BucketError),
    /// A key failed to deserialize.
    #[error("Key error: {0}")]
    Key(#[from] nectar_key::Error),
    /// An I/O error happened.
    #[error("I/O error happened: {0}")]
    Io(#[from] std::io::Error),
}
