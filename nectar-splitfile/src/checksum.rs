// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::Error;

/// The checksum algorithm protecting a section of the store file.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[repr(u16)]
pub enum ChecksumKind {
    /// No checksum; the section is trusted as read.
    None = 0,
    /// CRC32 appended at the section's end.
    #[default]
    Crc32 = 1,
}

impl ChecksumKind {
    /// The length, in bytes, of a checksum of this kind.
    pub fn length(self) -> usize {
        match self {
            Self::None => 0,
            Self::Crc32 => 4,
        }
    }

    /// Computes the checksum of `data`.
    pub fn checksum(self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::None => Vec::new(),
            Self::Crc32 => crc32fast::hash(data).to_be_bytes().to_vec(),
        }
    }

    /// Appends the checksum of `data` to it.
    pub fn append(self, data: &mut Vec<u8>) {
        let checksum = self.checksum(data);
        data.extend_from_slice(&checksum);
    }

    /// Splits a checksummed section into its payload, verifying the
    /// trailing checksum.
    pub fn verify<'a>(self, section: &'a [u8], what: &'static str) -> Result<&'a [u8], Error> {
        let length = self.length();
        if section.len() < length {
            return Err(Error::ChecksumFailed(what));
        }

        let (payload, stored) = section.split_at(section.len() - length);
        if self.checksum(payload) != stored {
            return Err(Error::ChecksumFailed(what));
        }

        Ok(payload)
    }
}

impl TryFrom<u16> for ChecksumKind {
    type Error = Error;

    fn try_from(kind: u16) -> Result<Self, Error> {
        Ok(match kind {
            0 => Self::None,
            1 => Self::Crc32,
            kind => return Err(Error::UnknownChecksumKind(kind)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc32_round_trip() {
        let mut section = b"checksummed payload".to_vec();
        ChecksumKind::Crc32.append(&mut section);

        assert_eq!(
            ChecksumKind::Crc32.verify(&section, "test").unwrap(),
            b"checksummed payload"
        );
    }

    #[test]
    fn corruption_detected() {
        let mut section = b"checksummed payload".to_vec();
        ChecksumKind::Crc32.append(&mut section);
        section[3] ^= 0x40;

        assert!(matches!(
            ChecksumKind::Crc32.verify(&section, "test"),
            Err(Error::ChecksumFailed("test"))
        ));
    }

    #[test]
    fn none_kind_accepts_anything() {
        assert_eq!(ChecksumKind::None.verify(b"anything", "test").unwrap(), b"anything");
    }
}
