// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::FetchError;

use nectar_runtime::Bucket;

use std::sync::Arc;

/// The outcome of a successful fetch.
pub struct FetchResult {
    /// The reassembled, decompressed content.
    pub output: Arc<dyn Bucket>,
    /// The MIME type declared by the metadata, if any.
    pub mime_type: Option<String>,
    /// The content length, in bytes.
    pub size: u64,
}

/// Callbacks of one client request.
///
/// Exactly one of `on_success`, `on_failure` and `on_cancelled` is invoked
/// over the lifetime of a request; the progress notifications may fire any
/// number of times before that.
pub trait FetchCallback: Send + Sync {
    /// The fetch completed; the result holds the content.
    fn on_success(&self, result: FetchResult);

    /// The fetch failed for good.
    fn on_failure(&self, error: FetchError);

    /// The fetch was cancelled by its owner.
    fn on_cancelled(&self);

    /// The full set of blocks to fetch is known.
    fn on_block_set_finished(&self) {}

    /// The metadata declared a MIME type.
    fn on_expected_mime(&self, _mime_type: &str) {}

    /// The metadata declared a final size.
    fn on_expected_size(&self, _size: u64) {}

    /// The metadata chain is fully resolved; no further redirects follow.
    fn on_finalized_metadata(&self) {}
}
