// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::Error;

use core::fmt;

/// The kind of key a block was sealed for.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u16)]
pub enum BlockKind {
    /// A block addressed by the hash of its sealed payload.
    Content = 0,
    /// A block addressed by a public key and document hash, carrying a signature.
    Signed = 1,
}

impl TryFrom<u16> for BlockKind {
    type Error = Error;

    fn try_from(kind: u16) -> Result<Self, Self::Error> {
        Ok(match kind {
            0 => BlockKind::Content,
            1 => BlockKind::Signed,
            k => return Err(Error::InvalidKeyKind(k)),
        })
    }
}

/// A fixed-size unit of sealed data: a fixed header followed by exactly
/// [`Block::DATA_LENGTH`] bytes of sealed payload.
///
/// The header carries the format version, the key kind, the plaintext length
/// (the last block of a file may carry less than a full block), the seal tag
/// and, for signed blocks, an ed25519 signature (zeroed otherwise).
#[derive(Clone, Eq, PartialEq)]
pub struct Block {
    kind: BlockKind,
    data_length: u32,
    tag: [u8; Self::TAG_LENGTH],
    auth: [u8; Self::AUTH_LENGTH],
    payload: Box<[u8]>,
}

impl Block {
    /// The format version of serialized blocks.
    pub const VERSION: u16 = 1;
    /// The length, in bytes, of the sealed payload of a block.
    pub const DATA_LENGTH: usize = 32_768;
    /// The length, in bytes, of the seal tag.
    pub const TAG_LENGTH: usize = 16;
    /// The length, in bytes, of the signature field.
    pub const AUTH_LENGTH: usize = 64;
    /// The length, in bytes, of the fixed block header.
    pub const HEADER_LENGTH: usize = 2 + 2 + 4 + Self::TAG_LENGTH + Self::AUTH_LENGTH;
    /// The length, in bytes, of a whole serialized block.
    pub const LENGTH: usize = Self::HEADER_LENGTH + Self::DATA_LENGTH;

    pub(crate) fn new(
        kind: BlockKind,
        data_length: u32,
        tag: [u8; Self::TAG_LENGTH],
        auth: [u8; Self::AUTH_LENGTH],
        payload: Box<[u8]>,
    ) -> Result<Self, Error> {
        if payload.len() != Self::DATA_LENGTH {
            return Err(Error::InvalidBlockLength(payload.len()));
        }
        if data_length as usize > Self::DATA_LENGTH {
            return Err(Error::InvalidDataLength(data_length));
        }

        Ok(Self {
            kind,
            data_length,
            tag,
            auth,
            payload,
        })
    }

    /// Returns the kind of a [`Block`].
    pub fn kind(&self) -> BlockKind {
        self.kind
    }

    /// Returns the plaintext length declared by the header.
    pub fn data_length(&self) -> u32 {
        self.data_length
    }

    /// Returns the seal tag.
    pub fn tag(&self) -> &[u8; Self::TAG_LENGTH] {
        &self.tag
    }

    /// Returns the signature field.
    pub fn auth(&self) -> &[u8; Self::AUTH_LENGTH] {
        &self.auth
    }

    /// Returns the sealed payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Serializes a [`Block`] into bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::LENGTH);

        bytes.extend_from_slice(&Self::VERSION.to_be_bytes());
        bytes.extend_from_slice(&(self.kind as u16).to_be_bytes());
        bytes.extend_from_slice(&self.data_length.to_be_bytes());
        bytes.extend_from_slice(&self.tag);
        bytes.extend_from_slice(&self.auth);
        bytes.extend_from_slice(&self.payload);

        bytes
    }

    /// Deserializes a [`Block`] from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != Self::LENGTH {
            return Err(Error::InvalidBlockLength(bytes.len()));
        }

        // Safe to unwrap because the length was checked above.
        let version = u16::from_be_bytes(bytes[0..2].try_into().unwrap());
        if version != Self::VERSION {
            return Err(Error::UnsupportedBlockVersion(version));
        }

        let kind = BlockKind::try_from(u16::from_be_bytes(bytes[2..4].try_into().unwrap()))?;
        let data_length = u32::from_be_bytes(bytes[4..8].try_into().unwrap());

        let mut tag = [0u8; Self::TAG_LENGTH];
        tag.copy_from_slice(&bytes[8..8 + Self::TAG_LENGTH]);

        let mut auth = [0u8; Self::AUTH_LENGTH];
        auth.copy_from_slice(&bytes[8 + Self::TAG_LENGTH..Self::HEADER_LENGTH]);

        Self::new(
            kind,
            data_length,
            tag,
            auth,
            bytes[Self::HEADER_LENGTH..].to_vec().into_boxed_slice(),
        )
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("kind", &self.kind)
            .field("data_length", &self.data_length)
            .finish()
    }
}
