// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

//! Wall-clock helpers shared across the client layer.

use std::time::{SystemTime, UNIX_EPOCH};

/// Returns the current unix timestamp, in milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock error")
        .as_millis() as u64
}
