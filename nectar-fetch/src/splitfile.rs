// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::{
    compression::decompress_chain,
    metadata::{Metadata, SplitfileMetadata},
    request::RequestState,
    single_block::{SingleBlockFetcher, SuccessAction},
    FetchCallback, FetchContext, FetchError, FetchErrorKind,
};

use nectar_runtime::{Bucket, MemoryBucket, RandomAccess};
use nectar_schedule::{ClientId, KeyListener, PriorityClass};
use nectar_splitfile::{ChecksumKind, SplitfileParams, SplitfileStore, StoreListener};

use tokio::sync::oneshot;

use std::sync::{Arc, Mutex};

struct CompletionListener {
    tx: Mutex<Option<oneshot::Sender<Result<(), FetchError>>>>,
}

impl StoreListener for CompletionListener {
    fn on_segment_finished(&self, segment: usize) {
        log::debug!("Segment {} finished.", segment);
    }

    fn on_success(&self) {
        if let Some(tx) = self.tx.lock().expect("poisoned completion lock").take() {
            let _ = tx.send(Ok(()));
        }
    }

    fn on_failure(&self, error: nectar_splitfile::Error) {
        if let Some(tx) = self.tx.lock().expect("poisoned completion lock").take() {
            let _ = tx.send(Err(error.into()));
        }
    }
}

// Splitfile blocks are scheduled below the request that wants them, so an
// interactive fetch does not drown interactive single-block traffic.
fn child_priority(priority: PriorityClass) -> PriorityClass {
    if priority <= PriorityClass::Interactive {
        PriorityClass::ImmediateSplitfile
    } else {
        PriorityClass::BulkSplitfile
    }
}

/// Fetches a whole splitfile described by `meta`: creates the on-disk
/// store, registers a fetcher per outstanding block and resolves once the
/// store reassembled (and decompressed) the content.
pub(crate) async fn fetch_splitfile(
    meta: &SplitfileMetadata,
    ctx: &FetchContext,
    client: ClientId,
    priority: PriorityClass,
    request: &Arc<RequestState>,
    callback: &Arc<dyn FetchCallback>,
) -> Result<Vec<u8>, FetchError> {
    if meta.cross_segment {
        return Err(FetchError::new(FetchErrorKind::UnsupportedFormat)
            .with_message("cross-segment splitfiles are not supported"));
    }
    if meta.decompressed_length > ctx.config.max_output_length {
        return Err(FetchError::new(FetchErrorKind::TooBig).with_expected_size(meta.decompressed_length));
    }
    if meta.data_length > ctx.config.max_temp_length {
        return Err(FetchError::new(FetchErrorKind::TooBig).with_expected_size(meta.data_length));
    }

    let original_metadata = Metadata::Splitfile(meta.clone()).to_bytes();
    let original_details = format!(
        "thisKey={}\nclient={}\nmaxRetries={}\ncooldownRetries={}\ncooldownTimeMs={}",
        request.uri(),
        client,
        ctx.config.max_splitfile_retries,
        ctx.scheduler.config().cooldown_retries(),
        ctx.scheduler.config().cooldown_time_ms(),
    );

    let params = SplitfileParams {
        segments: meta.segments.clone(),
        data_length: meta.data_length,
        original_metadata,
        original_details,
        max_retries: ctx.config.max_splitfile_retries,
        cooldown_retries: ctx.scheduler.config().cooldown_retries(),
        cooldown_time_ms: ctx.scheduler.config().cooldown_time_ms(),
        salt: ctx.salt,
        checksum: ChecksumKind::Crc32,
    };

    let bucket_factory = ctx.bucket_factory.clone();
    let store = SplitfileStore::create(
        params,
        |length| {
            bucket_factory
                .make_random_access(length)
                .map_err(nectar_splitfile::Error::Bucket)
        },
        ctx.fec.clone(),
        ctx.fec_runner.clone(),
        ctx.healing.clone(),
    )?;

    run_store(store, meta, ctx, client, priority, request, callback).await
}

/// Resumes a splitfile from its on-disk store: the preserved original
/// metadata supplies the MIME type and decompressor chain, and only the
/// blocks that are not yet proven on disk are re-requested.
pub(crate) async fn resume_splitfile(
    file: Arc<dyn RandomAccess>,
    ctx: &FetchContext,
    client: ClientId,
    priority: PriorityClass,
    request: &Arc<RequestState>,
    callback: &Arc<dyn FetchCallback>,
) -> Result<(Vec<u8>, Option<String>), FetchError> {
    let store = SplitfileStore::open(
        file,
        ctx.salt,
        ctx.fec.clone(),
        ctx.fec_runner.clone(),
        ctx.healing.clone(),
    )?;

    let original = store.original_metadata().map_err(FetchError::from)?;
    let meta = match Metadata::from_bytes(&original, ctx.config.max_metadata_size)? {
        Metadata::Splitfile(meta) => meta,
        _ => {
            return Err(FetchError::new(FetchErrorKind::StorageFormat)
                .with_message("preserved metadata is not a splitfile"))
        }
    };

    let data = run_store(store, &meta, ctx, client, priority, request, callback).await?;

    Ok((data, meta.mime_type))
}

async fn run_store(
    store: Arc<SplitfileStore>,
    meta: &SplitfileMetadata,
    ctx: &FetchContext,
    client: ClientId,
    priority: PriorityClass,
    request: &Arc<RequestState>,
    callback: &Arc<dyn FetchCallback>,
) -> Result<Vec<u8>, FetchError> {
    let (tx, rx) = oneshot::channel();
    store.set_listener(Arc::new(CompletionListener {
        tx: Mutex::new(Some(tx)),
    }));
    request.attach_store(store.clone());

    let priority = child_priority(priority);
    let mut children: Vec<Arc<SingleBlockFetcher>> = Vec::new();

    for segment in store.segments() {
        for (slot, key, retries) in segment.remaining() {
            children.push(SingleBlockFetcher::new(
                ctx.scheduler.clone(),
                client,
                key,
                priority,
                ctx.config.max_splitfile_retries,
                retries,
                SuccessAction::SplitfileChild {
                    store: store.clone(),
                    segment: segment.index(),
                    slot,
                },
            ));
        }
    }

    request.attach_fetchers(&children);
    callback.on_block_set_finished();

    let listeners: Vec<Arc<dyn KeyListener>> = children
        .iter()
        .map(|child| child.clone() as Arc<dyn KeyListener>)
        .collect();

    let check_store = !store.has_checked_datastore();
    ctx.scheduler
        .register_all(&listeners, check_store)
        .await
        .map_err(|e| FetchError::new(FetchErrorKind::InternalError).with_message(e.to_string()))?;
    if check_store {
        store.mark_checked_datastore();
    }

    // Segments that were already decodable (local hits, resume) must not
    // wait for a network arrival to trigger.
    store.start();

    tokio::select! {
        outcome = rx => match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(FetchError::new(FetchErrorKind::Cancelled)),
        },
        _ = request.cancelled_wait() => return Err(FetchError::new(FetchErrorKind::Cancelled)),
    }

    let assembled = MemoryBucket::new();
    store.copy_output(&assembled).map_err(FetchError::from)?;
    let data = assembled.read_all().map_err(FetchError::from)?;

    decompress_chain(&meta.compression, data, ctx.config.max_output_length)
}
