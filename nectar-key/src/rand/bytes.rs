// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

use rand::{thread_rng, Rng};

/// Generates a vector of random bytes.
pub fn rand_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    thread_rng().fill(&mut bytes[..]);
    bytes
}

/// Generates an array of random bytes.
pub fn rand_bytes_array<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    thread_rng().fill(&mut bytes[..]);
    bytes
}
