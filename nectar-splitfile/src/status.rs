// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::{ChecksumKind, Error};

use byteorder::{BigEndian, ByteOrder};

/// Fetch state of one slot of a segment.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[repr(u8)]
pub enum SlotState {
    /// Nothing fetched yet.
    #[default]
    Empty = 0,
    /// A request for the slot's key is scheduled or running.
    Fetching = 1,
    /// The slot's key is parked in the cooldown queue.
    Cooldown = 2,
    /// The block arrived and is stored.
    Succeeded = 3,
    /// The retry budget is exhausted or the failure was fatal.
    PermanentlyFailed = 4,
}

impl TryFrom<u8> for SlotState {
    type Error = Error;

    fn try_from(state: u8) -> Result<Self, Error> {
        Ok(match state {
            0 => Self::Empty,
            1 => Self::Fetching,
            2 => Self::Cooldown,
            3 => Self::Succeeded,
            4 => Self::PermanentlyFailed,
            state => return Err(Error::StorageFormat(format!("unknown slot state {}", state))),
        })
    }
}

/// Persistent per-slot record: state, retry count and, once succeeded, the
/// physical slot the block body lives in.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SlotStatus {
    /// Fetch state of the slot.
    pub state: SlotState,
    /// Consecutive failed attempts so far.
    pub retry_count: u32,
    /// Physical slot index holding the block body, valid when succeeded.
    pub found_slot: u16,
}

impl SlotStatus {
    /// The serialized length, in bytes, of one slot record.
    pub const LENGTH: usize = 1 + 4 + 2;
}

/// Serializes the slot records of one segment, checksummed and padded to
/// `record_length` so every segment's record is the same size on disk.
pub fn encode_status(slots: &[SlotStatus], checksum: ChecksumKind, record_length: usize) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(record_length);

    for slot in slots {
        bytes.push(slot.state as u8);
        let mut retry = [0u8; 4];
        BigEndian::write_u32(&mut retry, slot.retry_count);
        bytes.extend_from_slice(&retry);
        let mut found = [0u8; 2];
        BigEndian::write_u16(&mut found, slot.found_slot);
        bytes.extend_from_slice(&found);
    }

    checksum.append(&mut bytes);
    debug_assert!(bytes.len() <= record_length);
    bytes.resize(record_length, 0);

    bytes
}

/// Deserializes the slot records of one segment.
///
/// Scheduling states do not survive a restart: `Fetching` and `Cooldown`
/// read back as `Empty` with the retry count preserved, so the block is
/// simply re-requested.
pub fn decode_status(bytes: &[u8], slot_count: usize, checksum: ChecksumKind) -> Result<Vec<SlotStatus>, Error> {
    let section_length = slot_count * SlotStatus::LENGTH + checksum.length();
    if bytes.len() < section_length {
        return Err(Error::StorageFormat(format!(
            "status record has {} bytes for {} slots",
            bytes.len(),
            slot_count
        )));
    }

    let payload = checksum.verify(&bytes[..section_length], "segment status")?;

    let mut slots = Vec::with_capacity(slot_count);
    for record in payload.chunks_exact(SlotStatus::LENGTH) {
        let state = match SlotState::try_from(record[0])? {
            SlotState::Fetching | SlotState::Cooldown => SlotState::Empty,
            state => state,
        };

        slots.push(SlotStatus {
            state,
            retry_count: BigEndian::read_u32(&record[1..5]),
            found_slot: BigEndian::read_u16(&record[5..7]),
        });
    }

    Ok(slots)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_with_padding() {
        let slots = vec![
            SlotStatus {
                state: SlotState::Succeeded,
                retry_count: 2,
                found_slot: 1,
            },
            SlotStatus {
                state: SlotState::PermanentlyFailed,
                retry_count: 11,
                found_slot: 0,
            },
            SlotStatus::default(),
        ];

        let record_length = slots.len() * SlotStatus::LENGTH + 4 + 13;
        let bytes = encode_status(&slots, ChecksumKind::Crc32, record_length);
        assert_eq!(bytes.len(), record_length);

        let reparsed = decode_status(&bytes, slots.len(), ChecksumKind::Crc32).unwrap();
        assert_eq!(reparsed, slots);
    }

    #[test]
    fn transient_states_reset_to_empty() {
        let slots = vec![
            SlotStatus {
                state: SlotState::Fetching,
                retry_count: 1,
                found_slot: 0,
            },
            SlotStatus {
                state: SlotState::Cooldown,
                retry_count: 3,
                found_slot: 0,
            },
        ];

        let record_length = slots.len() * SlotStatus::LENGTH + 4;
        let bytes = encode_status(&slots, ChecksumKind::Crc32, record_length);
        let reparsed = decode_status(&bytes, slots.len(), ChecksumKind::Crc32).unwrap();

        assert!(reparsed.iter().all(|slot| slot.state == SlotState::Empty));
        assert_eq!(reparsed[1].retry_count, 3);
    }

    #[test]
    fn corruption_detected() {
        let slots = vec![SlotStatus::default(); 4];
        let record_length = slots.len() * SlotStatus::LENGTH + 4;
        let mut bytes = encode_status(&slots, ChecksumKind::Crc32, record_length);
        bytes[0] = 3;

        assert!(matches!(
            decode_status(&bytes, slots.len(), ChecksumKind::Crc32),
            Err(Error::ChecksumFailed("segment status"))
        ));
    }
}
