// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

use serde::Deserialize;

/// Priority class of a request. Lower discriminant means more urgent.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(usize)]
pub enum PriorityClass {
    /// Absolute top priority, reserved for the node's own needs.
    Max = 0,
    /// Interactive requests a user is actively waiting on.
    Interactive = 1,
    /// Splitfile blocks of an interactive download.
    ImmediateSplitfile = 2,
    /// Software and index updates.
    Update = 3,
    /// Splitfile blocks of queued bulk downloads.
    BulkSplitfile = 4,
    /// Speculative prefetching.
    Prefetch = 5,
    /// Everything that only runs when nothing else wants to.
    Min = 6,
}

impl PriorityClass {
    /// The number of priority classes.
    pub const COUNT: usize = 7;

    /// All classes, most urgent first.
    pub const ALL: [PriorityClass; Self::COUNT] = [
        PriorityClass::Max,
        PriorityClass::Interactive,
        PriorityClass::ImmediateSplitfile,
        PriorityClass::Update,
        PriorityClass::BulkSplitfile,
        PriorityClass::Prefetch,
        PriorityClass::Min,
    ];

    /// Returns the array index of a [`PriorityClass`].
    pub fn index(self) -> usize {
        self as usize
    }

    /// Returns the class at a given array index.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

/// How [`remove_random`](crate::PriorityGrabArray::remove_random) walks the
/// priority classes.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "UPPERCASE")]
pub enum PriorityPolicy {
    /// Deterministic: a nonempty class always beats every class below it.
    #[default]
    Hard,
    /// Weighted random: more urgent classes get exponentially more slots but
    /// lower ones are never starved completely.
    Soft,
}

// Doubling weights per step of urgency; the table is consulted with a single
// uniform draw.
pub(crate) const SOFT_WEIGHTS: [u32; PriorityClass::COUNT] = [64, 32, 16, 8, 4, 2, 1];

pub(crate) fn soft_pick(roll: u32) -> PriorityClass {
    let mut remaining = roll % SOFT_WEIGHTS.iter().sum::<u32>();

    for class in PriorityClass::ALL {
        let weight = SOFT_WEIGHTS[class.index()];
        if remaining < weight {
            return class;
        }
        remaining -= weight;
    }

    PriorityClass::Min
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering() {
        assert!(PriorityClass::Max < PriorityClass::Interactive);
        assert!(PriorityClass::Prefetch < PriorityClass::Min);
    }

    #[test]
    fn index_round_trip() {
        for class in PriorityClass::ALL {
            assert_eq!(PriorityClass::from_index(class.index()), Some(class));
        }
        assert_eq!(PriorityClass::from_index(7), None);
    }

    #[test]
    fn soft_pick_covers_all_classes() {
        let total: u32 = SOFT_WEIGHTS.iter().sum();
        let mut seen = [false; PriorityClass::COUNT];

        for roll in 0..total {
            seen[soft_pick(roll).index()] = true;
        }

        assert!(seen.iter().all(|s| *s));
    }
}
