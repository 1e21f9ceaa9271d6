// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

use rand::{
    distributions::{uniform::SampleUniform, Distribution, Standard},
    thread_rng, Rng,
};

use core::ops::Range;

/// Generates a random number.
pub fn rand_number<T>() -> T
where
    Standard: Distribution<T>,
{
    thread_rng().gen()
}

/// Generates a random number in a given range.
pub fn rand_number_range<T: SampleUniform + PartialOrd>(range: Range<T>) -> T {
    thread_rng().gen_range(range)
}
