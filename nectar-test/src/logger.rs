// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

use log::LevelFilter;

use std::sync::Once;

static INIT: Once = Once::new();

/// Initializes a stdout logger for a test run. Repeated calls are no-ops,
/// so every test can call it unconditionally.
pub fn init(level: LevelFilter) {
    INIT.call_once(|| {
        let result = fern::Dispatch::new()
            .format(|out, message, record| {
                out.finish(format_args!("[{}][{}] {}", record.target(), record.level(), message))
            })
            .level(level)
            .chain(std::io::stdout())
            .apply();

        if let Err(e) = result {
            eprintln!("logger init failed: {}", e);
        }
    });
}
