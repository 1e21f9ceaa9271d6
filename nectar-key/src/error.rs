// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

/// Error occurring when handling keys, blocks or URIs.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// An hexadecimal string contains a non-hexadecimal character.
    #[error("Invalid hexadecimal character in: {0}")]
    InvalidHexadecimalChar(String),
    /// An hexadecimal string has an unexpected length.
    #[error("Invalid hexadecimal length: expected {expected}, got {actual}")]
    InvalidHexadecimalLength {
        /// Expected length, in characters.
        expected: usize,
        /// Actual length, in characters.
        actual: usize,
    },
    /// A serialized block has an unexpected length.
    #[error("Invalid block length: {0}")]
    InvalidBlockLength(usize),
    /// A block header declares more plaintext than a block can carry.
    #[error("Invalid block data length: {0}")]
    InvalidDataLength(u32),
    /// A serialized block or key has an unknown kind tag.
    #[error("Invalid key kind: {0}")]
    InvalidKeyKind(u16),
    /// A serialized block has an unsupported version.
    #[error("Unsupported block version: {0}")]
    UnsupportedBlockVersion(u16),
    /// A serialized client key has an unexpected length.
    #[error("Invalid client key length: {0}")]
    InvalidKeyLength(usize),
    /// The routing key derived from a block does not match the expected one.
    #[error("Routing key verification failed")]
    VerificationFailed,
    /// Opening the seal of a block failed.
    #[error("Block seal verification failed")]
    SealFailed,
    /// The signature of a signed block does not verify.
    #[error("Invalid block signature")]
    InvalidSignature,
    /// Plaintext does not fit into a single block.
    #[error("Data too large for a single block: {0}")]
    DataTooLarge(usize),
    /// A URI does not follow the `<kind>:<key hex>/<path>` shape.
    #[error("Invalid key URI: {0}")]
    InvalidUri(String),
    /// A cryptographic primitive failed.
    #[error("Crypto error: {0}")]
    Crypto(#[from] crypto::Error),
}
