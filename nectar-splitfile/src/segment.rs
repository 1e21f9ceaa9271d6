// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::{
    status::{encode_status, SlotState, SlotStatus},
    ChecksumKind, Error, FailureTally, SegmentKeys, SegmentShape,
};

use nectar_key::ClientKey;
use nectar_runtime::GetFailure;

use std::sync::Mutex;

/// Lifecycle stage of a segment.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SegmentStage {
    /// Blocks are still being fetched.
    Fetching,
    /// Enough blocks arrived; the FEC decode is queued or running.
    Decoding,
    /// Data blocks are recovered; check blocks are being regenerated.
    Encoding,
    /// All blocks are stored in canonical order.
    Finished,
    /// More blocks failed permanently than the check blocks can cover.
    Failed,
}

/// What a segment did with an arriving block.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum BlockDisposition {
    /// The block was accepted into the given physical slot; when
    /// `trigger_decode` is set the arrival was the k-th and the caller must
    /// queue the decode.
    Stored {
        physical: u16,
        trigger_decode: bool,
    },
    /// The slot already succeeded; the block is discarded.
    Duplicate,
    /// The segment is past fetching; the block is discarded and freed.
    Dropped,
}

struct SegmentState {
    stage: SegmentStage,
    slots: Vec<SlotStatus>,
    succeeded: u16,
    failed: u16,
    next_physical: u16,
    tally: FailureTally,
}

/// One FEC decoding unit: `k` data blocks and `m` check blocks, recoverable
/// from any `k` of the `k + m`.
///
/// The segment owns its slot table behind a single short-held lock; disk
/// I/O and FEC math happen outside, in the store.
pub struct Segment {
    index: usize,
    shape: SegmentShape,
    keys: SegmentKeys,
    state: Mutex<SegmentState>,
}

impl Segment {
    /// Creates a fresh, unfetched [`Segment`].
    pub fn new(index: usize, shape: SegmentShape, keys: SegmentKeys) -> Self {
        Self::with_slots(index, shape, keys, vec![SlotStatus::default(); shape.total()])
    }

    /// Restores a [`Segment`] from persisted slot records.
    pub fn with_slots(index: usize, shape: SegmentShape, keys: SegmentKeys, slots: Vec<SlotStatus>) -> Self {
        debug_assert_eq!(slots.len(), shape.total());

        let succeeded = slots.iter().filter(|slot| slot.state == SlotState::Succeeded).count() as u16;
        let failed = slots
            .iter()
            .filter(|slot| slot.state == SlotState::PermanentlyFailed)
            .count() as u16;

        let stage = if succeeded as usize == shape.total() {
            SegmentStage::Finished
        } else if failed as usize > shape.check_blocks as usize {
            SegmentStage::Failed
        } else if succeeded as usize >= shape.data_blocks as usize {
            // Enough blocks were already on disk; the decode never
            // completed, so it must be run again.
            SegmentStage::Decoding
        } else {
            SegmentStage::Fetching
        };

        let next_physical = slots
            .iter()
            .filter(|slot| slot.state == SlotState::Succeeded)
            .map(|slot| slot.found_slot + 1)
            .max()
            .unwrap_or(0);

        Self {
            index,
            shape,
            keys,
            state: Mutex::new(SegmentState {
                stage,
                slots,
                succeeded,
                failed,
                next_physical,
                tally: FailureTally::new(),
            }),
        }
    }

    /// Returns the index of this segment within its store.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Returns the block counts of this segment.
    pub fn shape(&self) -> SegmentShape {
        self.shape
    }

    /// Returns the keys of this segment.
    pub fn keys(&self) -> &SegmentKeys {
        &self.keys
    }

    /// Returns the current stage.
    pub fn stage(&self) -> SegmentStage {
        self.lock().stage
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SegmentState> {
        self.state.lock().expect("poisoned segment lock")
    }

    pub(crate) fn on_block(&self, slot: usize) -> BlockDisposition {
        let mut state = self.lock();

        if state.stage != SegmentStage::Fetching {
            return BlockDisposition::Dropped;
        }
        if state.slots[slot].state == SlotState::Succeeded {
            return BlockDisposition::Duplicate;
        }

        let physical = state.next_physical;
        state.next_physical += 1;
        state.slots[slot].state = SlotState::Succeeded;
        state.slots[slot].found_slot = physical;
        state.succeeded += 1;

        let trigger_decode = state.succeeded as usize >= self.shape.data_blocks as usize;
        if trigger_decode {
            state.stage = SegmentStage::Decoding;
        }

        BlockDisposition::Stored {
            physical,
            trigger_decode,
        }
    }

    /// Records a failed attempt for a slot. Returns `true` when this failure
    /// sank the segment.
    pub(crate) fn on_slot_failed(&self, slot: usize, failure: GetFailure, permanent: bool) -> bool {
        let mut state = self.lock();

        if state.stage != SegmentStage::Fetching {
            return false;
        }

        state.tally.record(failure);
        state.slots[slot].retry_count += 1;

        if permanent && state.slots[slot].state != SlotState::PermanentlyFailed {
            state.slots[slot].state = SlotState::PermanentlyFailed;
            state.failed += 1;

            if state.failed as usize > self.shape.check_blocks as usize {
                state.stage = SegmentStage::Failed;
                return true;
            }
        } else if !permanent {
            state.slots[slot].state = SlotState::Empty;
        }

        false
    }

    /// Records that a slot's key entered cooldown.
    pub(crate) fn mark_cooldown(&self, slot: usize) {
        let mut state = self.lock();
        if state.slots[slot].state == SlotState::Empty || state.slots[slot].state == SlotState::Fetching {
            state.slots[slot].state = SlotState::Cooldown;
        }
    }

    /// Records that a slot's key is scheduled again.
    pub(crate) fn mark_fetching(&self, slot: usize) {
        let mut state = self.lock();
        if state.slots[slot].state == SlotState::Empty || state.slots[slot].state == SlotState::Cooldown {
            state.slots[slot].state = SlotState::Fetching;
        }
    }

    /// Maps each logical slot to the physical slot its block lives in, for
    /// slots that succeeded.
    pub(crate) fn decode_plan(&self) -> Vec<Option<u16>> {
        let state = self.lock();

        state
            .slots
            .iter()
            .map(|slot| (slot.state == SlotState::Succeeded).then(|| slot.found_slot))
            .collect()
    }

    /// Marks the transition from recovering data blocks to regenerating
    /// check blocks.
    pub(crate) fn mark_encoding(&self) {
        self.lock().stage = SegmentStage::Encoding;
    }

    /// Marks the segment finished: every block stored at its canonical
    /// position.
    pub(crate) fn mark_finished(&self) {
        let mut state = self.lock();

        for (i, slot) in state.slots.iter_mut().enumerate() {
            slot.state = SlotState::Succeeded;
            slot.found_slot = i as u16;
        }
        state.succeeded = self.shape.total() as u16;
        state.stage = SegmentStage::Finished;
    }

    /// Marks the segment failed from outside the per-slot bookkeeping.
    pub(crate) fn mark_failed(&self) {
        self.lock().stage = SegmentStage::Failed;
    }

    /// Returns slots that needed more than one attempt, with their retry
    /// counts, for healing.
    pub(crate) fn healing_candidates(&self) -> Vec<(usize, u32)> {
        let state = self.lock();

        state
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.retry_count > 0)
            .map(|(i, slot)| (i, slot.retry_count))
            .collect()
    }

    /// Returns the keys still worth fetching, with their slots and retry
    /// counts.
    pub fn remaining(&self) -> Vec<(usize, ClientKey, u32)> {
        let state = self.lock();

        if state.stage != SegmentStage::Fetching {
            return Vec::new();
        }

        state
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| {
                slot.state != SlotState::Succeeded && slot.state != SlotState::PermanentlyFailed
            })
            .filter_map(|(i, slot)| self.keys.key(i).map(|key| (i, key.clone(), slot.retry_count)))
            .collect()
    }

    /// Returns this segment's failure tally.
    pub fn tally(&self) -> FailureTally {
        self.lock().tally.clone()
    }

    /// Serializes the slot table into a persistent status record.
    pub(crate) fn status_bytes(&self, checksum: ChecksumKind, record_length: usize) -> Vec<u8> {
        encode_status(&self.lock().slots, checksum, record_length)
    }

    /// Validates that this segment is within what the codec can decode.
    pub fn validate(&self, max_blocks: usize) -> Result<(), Error> {
        if self.shape.total() > max_blocks {
            return Err(Error::TooManyBlocks(self.shape.total()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use nectar_key::rand::key::rand_client_key;

    fn segment(data: u16, check: u16) -> Segment {
        let shape = SegmentShape {
            data_blocks: data,
            check_blocks: check,
        };
        let keys = SegmentKeys::new(
            (0..data).map(|_| rand_client_key()).collect(),
            (0..check).map(|_| rand_client_key()).collect(),
        );
        Segment::new(0, shape, keys)
    }

    #[test]
    fn kth_arrival_triggers_decode() {
        let segment = segment(3, 2);

        assert!(matches!(
            segment.on_block(0),
            BlockDisposition::Stored {
                physical: 0,
                trigger_decode: false
            }
        ));
        assert!(matches!(
            segment.on_block(4),
            BlockDisposition::Stored {
                physical: 1,
                trigger_decode: false
            }
        ));
        assert!(matches!(
            segment.on_block(2),
            BlockDisposition::Stored {
                physical: 2,
                trigger_decode: true
            }
        ));
        assert_eq!(segment.stage(), SegmentStage::Decoding);

        // Arrivals past the threshold are dropped and freed.
        assert_eq!(segment.on_block(1), BlockDisposition::Dropped);
    }

    #[test]
    fn duplicate_arrival_ignored() {
        let segment = segment(3, 2);

        segment.on_block(1);
        assert_eq!(segment.on_block(1), BlockDisposition::Duplicate);
    }

    #[test]
    fn fails_only_past_check_budget() {
        let segment = segment(3, 2);

        assert!(!segment.on_slot_failed(0, GetFailure::DataNotFound, true));
        assert!(!segment.on_slot_failed(1, GetFailure::RouteNotFound, true));
        assert_eq!(segment.stage(), SegmentStage::Fetching);

        assert!(segment.on_slot_failed(2, GetFailure::DataNotFound, true));
        assert_eq!(segment.stage(), SegmentStage::Failed);

        let tally = segment.tally();
        assert_eq!(tally.count(GetFailure::DataNotFound), 2);
        assert_eq!(tally.count(GetFailure::RouteNotFound), 1);
        assert_eq!(tally.total(), 3);
    }

    #[test]
    fn retryable_failures_keep_the_slot_alive() {
        let segment = segment(2, 1);

        assert!(!segment.on_slot_failed(0, GetFailure::RouteNotFound, false));
        assert!(!segment.on_slot_failed(0, GetFailure::RouteNotFound, false));
        assert_eq!(segment.remaining().len(), 3);

        let retries: Vec<u32> = segment.remaining().iter().map(|(_, _, retries)| *retries).collect();
        assert!(retries.contains(&2));
    }

    #[test]
    fn healing_candidates_are_retried_slots() {
        let segment = segment(2, 2);

        segment.on_slot_failed(1, GetFailure::RouteNotFound, false);
        segment.on_block(0);
        segment.on_block(1);

        assert_eq!(segment.healing_candidates(), vec![(1, 1)]);
    }

    #[test]
    fn restore_counts_and_stage() {
        let shape = SegmentShape {
            data_blocks: 2,
            check_blocks: 1,
        };
        let keys = SegmentKeys::new(
            (0..2).map(|_| rand_client_key()).collect(),
            (0..1).map(|_| rand_client_key()).collect(),
        );

        let slots = vec![
            SlotStatus {
                state: SlotState::Succeeded,
                retry_count: 0,
                found_slot: 0,
            },
            SlotStatus {
                state: SlotState::Succeeded,
                retry_count: 2,
                found_slot: 1,
            },
            SlotStatus::default(),
        ];

        let segment = Segment::with_slots(1, shape, keys, slots);
        // Two of two data blocks are on disk: decode must be re-run.
        assert_eq!(segment.stage(), SegmentStage::Decoding);
    }
}
