// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

/// Module providing random byte generation utilities.
pub mod bytes;
/// Module providing random key and block generation utilities.
pub mod key;
/// Module providing random number generation utilities.
pub mod number;
