// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::{ChecksumKind, Error};

use nectar_key::{ClientKey, RoutingKey};

/// The ordered keys of one segment: data block keys first, then check block
/// keys.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SegmentKeys {
    data: Vec<ClientKey>,
    check: Vec<ClientKey>,
}

impl SegmentKeys {
    /// Creates new [`SegmentKeys`].
    pub fn new(data: Vec<ClientKey>, check: Vec<ClientKey>) -> Self {
        Self { data, check }
    }

    /// Returns the data block keys.
    pub fn data(&self) -> &[ClientKey] {
        &self.data
    }

    /// Returns the check block keys.
    pub fn check(&self) -> &[ClientKey] {
        &self.check
    }

    /// Returns the total number of keys.
    pub fn total(&self) -> usize {
        self.data.len() + self.check.len()
    }

    /// Returns the key of logical slot `slot` (data blocks first).
    pub fn key(&self, slot: usize) -> Option<&ClientKey> {
        if slot < self.data.len() {
            self.data.get(slot)
        } else {
            self.check.get(slot - self.data.len())
        }
    }

    /// Returns the logical slot whose key routes to `routing_key`.
    pub fn slot_of(&self, routing_key: &RoutingKey) -> Option<usize> {
        self.data
            .iter()
            .chain(self.check.iter())
            .position(|key| key.routing_key() == routing_key)
    }

    /// The serialized length of a segment with the given block counts.
    pub fn serialized_length(data_blocks: usize, check_blocks: usize, checksum: ChecksumKind) -> usize {
        (data_blocks + check_blocks) * ClientKey::SERIALIZED_LENGTH + checksum.length()
    }

    /// Serializes the keys, appending a checksum.
    pub fn to_bytes(&self, checksum: ChecksumKind) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::serialized_length(self.data.len(), self.check.len(), checksum));

        for key in self.data.iter().chain(self.check.iter()) {
            bytes.extend_from_slice(&key.to_bytes());
        }
        checksum.append(&mut bytes);

        bytes
    }

    /// Deserializes the keys of a segment with the given block counts.
    ///
    /// A checksum failure here is fatal for the whole store: without keys
    /// there is nothing left to fetch.
    pub fn from_bytes(
        bytes: &[u8],
        data_blocks: usize,
        check_blocks: usize,
        checksum: ChecksumKind,
    ) -> Result<Self, Error> {
        let payload = checksum.verify(bytes, "segment keys")?;

        if payload.len() != (data_blocks + check_blocks) * ClientKey::SERIALIZED_LENGTH {
            return Err(Error::StorageFormat(format!(
                "segment keys section has {} bytes for {} blocks",
                payload.len(),
                data_blocks + check_blocks
            )));
        }

        let mut keys = payload
            .chunks_exact(ClientKey::SERIALIZED_LENGTH)
            .map(ClientKey::from_bytes)
            .collect::<Result<Vec<_>, _>>()?;

        let check = keys.split_off(data_blocks);

        Ok(Self { data: keys, check })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use nectar_key::rand::key::rand_client_key;

    #[test]
    fn round_trip() {
        let keys = SegmentKeys::new(
            (0..4).map(|_| rand_client_key()).collect(),
            (0..2).map(|_| rand_client_key()).collect(),
        );

        let bytes = keys.to_bytes(ChecksumKind::Crc32);
        assert_eq!(bytes.len(), SegmentKeys::serialized_length(4, 2, ChecksumKind::Crc32));

        let reparsed = SegmentKeys::from_bytes(&bytes, 4, 2, ChecksumKind::Crc32).unwrap();
        assert_eq!(reparsed, keys);
    }

    #[test]
    fn corruption_is_fatal() {
        let keys = SegmentKeys::new(vec![rand_client_key()], vec![rand_client_key()]);

        let mut bytes = keys.to_bytes(ChecksumKind::Crc32);
        bytes[10] ^= 0x01;

        assert!(matches!(
            SegmentKeys::from_bytes(&bytes, 1, 1, ChecksumKind::Crc32),
            Err(Error::ChecksumFailed("segment keys"))
        ));
    }

    #[test]
    fn slot_lookup() {
        let keys = SegmentKeys::new(
            (0..3).map(|_| rand_client_key()).collect(),
            (0..3).map(|_| rand_client_key()).collect(),
        );

        for slot in 0..6 {
            let key = keys.key(slot).unwrap().clone();
            assert_eq!(keys.slot_of(key.routing_key()), Some(slot));
        }
        assert!(keys.key(6).is_none());
    }
}
