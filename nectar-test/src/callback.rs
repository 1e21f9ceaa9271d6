// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

use nectar_fetch::{FetchCallback, FetchError, FetchResult};
use nectar_runtime::Bucket;

use tokio::sync::mpsc;

/// An observable fetch outcome or progress notification.
#[derive(Debug)]
pub enum FetchEvent {
    /// The fetch completed with the given content.
    Success {
        /// The fetched bytes.
        data: Vec<u8>,
        /// The declared MIME type, if any.
        mime_type: Option<String>,
        /// The content length.
        size: u64,
    },
    /// The fetch failed.
    Failure(FetchError),
    /// The fetch was cancelled.
    Cancelled,
    /// The block set is known.
    BlockSetFinished,
    /// A MIME type was announced.
    ExpectedMime(String),
    /// A final size was announced.
    ExpectedSize(u64),
    /// The metadata chain is resolved.
    FinalizedMetadata,
}

/// A [`FetchCallback`] forwarding every event into a channel.
pub struct ChannelCallback {
    tx: mpsc::UnboundedSender<FetchEvent>,
}

impl ChannelCallback {
    /// Creates a new [`ChannelCallback`] and its receiving end.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<FetchEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl FetchCallback for ChannelCallback {
    fn on_success(&self, result: FetchResult) {
        let data = result.output.read_all().unwrap_or_default();
        let _ = self.tx.send(FetchEvent::Success {
            data,
            mime_type: result.mime_type,
            size: result.size,
        });
    }

    fn on_failure(&self, error: FetchError) {
        let _ = self.tx.send(FetchEvent::Failure(error));
    }

    fn on_cancelled(&self) {
        let _ = self.tx.send(FetchEvent::Cancelled);
    }

    fn on_block_set_finished(&self) {
        let _ = self.tx.send(FetchEvent::BlockSetFinished);
    }

    fn on_expected_mime(&self, mime_type: &str) {
        let _ = self.tx.send(FetchEvent::ExpectedMime(mime_type.to_string()));
    }

    fn on_expected_size(&self, size: u64) {
        let _ = self.tx.send(FetchEvent::ExpectedSize(size));
    }

    fn on_finalized_metadata(&self) {
        let _ = self.tx.send(FetchEvent::FinalizedMetadata);
    }
}
