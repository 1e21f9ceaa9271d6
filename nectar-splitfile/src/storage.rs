// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::{
    bloom::{BinaryBloom, CountingBloom, SALT_LENGTH},
    layout::{Footer, GeneralProgress, StoreLayout, FOOTER_LENGTH},
    persist::{JobTag, Persister},
    segment::{BlockDisposition, Segment, SegmentStage},
    status::{decode_status, SlotState, SlotStatus},
    ChecksumKind, Error, FailureTally, FecCodec, SegmentKeys, SegmentShape,
};

use nectar_key::{Block, ContentKey, RoutingKey};
use nectar_runtime::{Bucket, GetFailure, HealingQueue, MemoryLimitedRunner, RandomAccess};

use hashbrown::HashMap;

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex, Weak,
};

/// Callbacks a store delivers to its owner. Invoked off the store's locks.
pub trait StoreListener: Send + Sync {
    /// A segment decoded and persisted completely.
    fn on_segment_finished(&self, segment: usize);

    /// Every segment finished; the output can be read.
    fn on_success(&self);

    /// The download failed for good.
    fn on_failure(&self, error: Error);
}

/// Parameters a fresh store is created from.
pub struct SplitfileParams {
    /// The keys of every segment.
    pub segments: Vec<SegmentKeys>,
    /// The reassembled file length, in bytes.
    pub data_length: u64,
    /// The raw metadata this download was constructed from, preserved so a
    /// damaged store can be restarted from scratch.
    pub original_metadata: Vec<u8>,
    /// Human-readable details: this key, origin key, client, retry and
    /// cooldown parameters.
    pub original_details: String,
    /// Retry cap per block, `-1` meaning infinite.
    pub max_retries: i32,
    /// Consecutive failures before a key cools down.
    pub cooldown_retries: u32,
    /// Cooldown duration, in milliseconds.
    pub cooldown_time_ms: u64,
    /// The node's bloom filter salt.
    pub salt: [u8; SALT_LENGTH],
    /// Checksum kind protecting the store sections.
    pub checksum: ChecksumKind,
}

/// The whole-download on-disk store: block slots, keys, per-segment status,
/// bloom filters and settings in one file, resumable after a crash.
pub struct SplitfileStore {
    this: Weak<SplitfileStore>,
    layout: StoreLayout,
    file: Arc<dyn RandomAccess>,
    persister: Persister,
    segments: Vec<Segment>,
    main_bloom: Mutex<CountingBloom>,
    seg_blooms: Vec<BinaryBloom>,
    progress: Mutex<GeneralProgress>,
    fec: Arc<dyn FecCodec>,
    runner: Arc<MemoryLimitedRunner>,
    healing: Arc<dyn HealingQueue>,
    listener: Mutex<Option<Arc<dyn StoreListener>>>,
    cancelled: AtomicBool,
    failed: AtomicBool,
    finished_segments: AtomicUsize,
    decode_spawned: Vec<AtomicBool>,
}

impl SplitfileStore {
    /// Creates a fresh store, writing every section and the footer.
    ///
    /// `make_file` receives the computed file length and returns the backing
    /// storage.
    pub fn create(
        params: SplitfileParams,
        make_file: impl FnOnce(u64) -> Result<Arc<dyn RandomAccess>, Error>,
        fec: Arc<dyn FecCodec>,
        runner: Arc<MemoryLimitedRunner>,
        healing: Arc<dyn HealingQueue>,
    ) -> Result<Arc<Self>, Error> {
        let shapes: Vec<SegmentShape> = params
            .segments
            .iter()
            .map(|keys| SegmentShape {
                data_blocks: keys.data().len() as u16,
                check_blocks: keys.check().len() as u16,
            })
            .collect();

        let details = params.original_details.as_bytes().to_vec();
        let mut details_section = details;
        params.checksum.append(&mut details_section);

        let layout = StoreLayout::compute(
            shapes,
            params.data_length,
            params.salt,
            params.max_retries,
            params.cooldown_retries,
            params.cooldown_time_ms,
            params.original_metadata.len() as u64,
            details_section.len() as u64,
            params.checksum,
        )?;

        let file = make_file(layout.file_length())?;
        if file.len() != layout.file_length() {
            return Err(Error::StorageFormat(format!(
                "backing file is {} bytes, layout needs {}",
                file.len(),
                layout.file_length()
            )));
        }

        let segments: Vec<Segment> = params
            .segments
            .into_iter()
            .enumerate()
            .map(|(i, keys)| {
                let shape = layout.shapes()[i];
                Segment::new(i, shape, keys)
            })
            .collect();

        for segment in &segments {
            segment.validate(fec.max_blocks())?;
        }

        // Keys, fresh status records, progress, blooms, preserved metadata,
        // details and the settings tail, in layout order.
        for segment in &segments {
            file.write_at(
                layout.segment_keys_offset(segment.index()),
                &segment.keys().to_bytes(layout.checksum()),
            )?;
            file.write_at(
                layout.segment_status_offset(segment.index()),
                &segment.status_bytes(layout.checksum(), layout.status_record_length() as usize),
            )?;
        }

        file.write_at(
            layout.gen_progress_offset(),
            &GeneralProgress::default().to_bytes(layout.checksum()),
        )?;

        let (main_bloom, seg_blooms) = build_blooms(&layout, &segments, params.salt);
        file.write_at(layout.main_bloom_offset(), main_bloom.as_bytes())?;
        for (i, bloom) in seg_blooms.iter().enumerate() {
            file.write_at(layout.segment_bloom_offset(i), bloom.as_bytes())?;
        }

        file.write_at(layout.orig_metadata_offset(), &params.original_metadata)?;
        file.write_at(layout.orig_details_offset(), &details_section)?;
        file.write_at(layout.basic_settings_offset(), &layout.encode_tail())?;
        file.sync()?;

        log::info!(
            "Created splitfile store: {} segments, {} blocks, {} bytes.",
            layout.shapes().len(),
            layout.total_blocks(),
            layout.file_length()
        );

        let segment_count = segments.len();

        Ok(Arc::new_cyclic(|this| Self {
            this: this.clone(),
            persister: Persister::spawn(file.clone()),
            layout,
            file,
            segments,
            main_bloom: Mutex::new(main_bloom),
            seg_blooms,
            progress: Mutex::new(GeneralProgress::default()),
            fec,
            runner,
            healing,
            listener: Mutex::new(None),
            cancelled: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            finished_segments: AtomicUsize::new(0),
            decode_spawned: (0..segment_count).map(|_| AtomicBool::new(false)).collect(),
        }))
    }

    /// Opens a persisted store, following the resume protocol: footer magic
    /// and version first, then the composite-checksummed settings, then the
    /// per-segment sections.
    ///
    /// A corrupt segment status is not fatal: the segment's blocks are
    /// re-verified against its keys, so previously fetched data is either
    /// proven (and decoded) or refetched — a segment never spuriously
    /// reports success. Corrupt keys are fatal. Bloom filters are rebuilt
    /// from the remaining keys under `node_salt`, which also covers a salt
    /// change across restarts: nothing is scheduled against a stale filter
    /// because the filters never leave this function stale.
    pub fn open(
        file: Arc<dyn RandomAccess>,
        node_salt: [u8; SALT_LENGTH],
        fec: Arc<dyn FecCodec>,
        runner: Arc<MemoryLimitedRunner>,
        healing: Arc<dyn HealingQueue>,
    ) -> Result<Arc<Self>, Error> {
        let file_length = file.len();
        if file_length < FOOTER_LENGTH as u64 {
            return Err(Error::WrongFormat);
        }

        let mut footer_bytes = [0u8; FOOTER_LENGTH];
        file.read_at(file_length - FOOTER_LENGTH as u64, &mut footer_bytes)?;
        let footer = Footer::from_bytes(&footer_bytes)?;

        let settings_length = footer.settings_length as u64;
        if settings_length + FOOTER_LENGTH as u64 > file_length {
            return Err(Error::StorageFormat("settings longer than file".to_string()));
        }

        let mut settings = vec![0u8; settings_length as usize];
        file.read_at(file_length - FOOTER_LENGTH as u64 - settings_length, &mut settings)?;
        let layout = StoreLayout::decode_tail(&settings, &footer, file_length)?;

        // Segment keys: a damaged key section leaves nothing to fetch, so it
        // is fatal; the preserved original metadata is the restart path.
        let mut all_keys = Vec::with_capacity(layout.shapes().len());
        for (i, shape) in layout.shapes().iter().enumerate() {
            let mut bytes = vec![0u8; layout.segment_keys_length(i)];
            file.read_at(layout.segment_keys_offset(i), &mut bytes)?;
            all_keys.push(SegmentKeys::from_bytes(
                &bytes,
                shape.data_blocks as usize,
                shape.check_blocks as usize,
                layout.checksum(),
            )?);
        }

        let mut segments = Vec::with_capacity(layout.shapes().len());
        for (i, keys) in all_keys.into_iter().enumerate() {
            let shape = layout.shapes()[i];
            let mut record = vec![0u8; layout.status_record_length() as usize];
            file.read_at(layout.segment_status_offset(i), &mut record)?;

            let segment = match decode_status(&record, shape.total(), layout.checksum()) {
                Ok(slots) => Segment::with_slots(i, shape, keys, slots),
                Err(Error::ChecksumFailed(_)) => {
                    log::warn!("Status of segment {} is corrupt, re-verifying its blocks.", i);
                    recover_segment(&layout, &*file, i, shape, keys)?
                }
                Err(e) => return Err(e),
            };
            segments.push(segment);
        }

        for segment in &segments {
            segment.validate(fec.max_blocks())?;
        }

        let mut progress_bytes = vec![0u8; GeneralProgress::serialized_length(layout.checksum())];
        file.read_at(layout.gen_progress_offset(), &mut progress_bytes)?;
        let progress = GeneralProgress::from_bytes(&progress_bytes, layout.checksum());

        let (main_bloom, seg_blooms) = build_blooms(&layout, &segments, node_salt);
        file.write_at(layout.main_bloom_offset(), main_bloom.as_bytes())?;
        for (i, bloom) in seg_blooms.iter().enumerate() {
            file.write_at(layout.segment_bloom_offset(i), bloom.as_bytes())?;
        }

        if node_salt != layout.salt() {
            log::info!("Bloom salt changed across restart, filters regenerated.");
        }

        let finished = segments
            .iter()
            .filter(|segment| segment.stage() == SegmentStage::Finished)
            .count();

        log::info!(
            "Opened splitfile store: {} segments ({} finished), {} blocks.",
            layout.shapes().len(),
            finished,
            layout.total_blocks()
        );

        let decode_spawned: Vec<AtomicBool> = segments
            .iter()
            .map(|segment| AtomicBool::new(segment.stage() == SegmentStage::Finished))
            .collect();

        Ok(Arc::new_cyclic(|this| Self {
            this: this.clone(),
            persister: Persister::spawn(file.clone()),
            layout,
            file,
            segments,
            main_bloom: Mutex::new(main_bloom),
            seg_blooms,
            progress: Mutex::new(progress),
            fec,
            runner,
            healing,
            listener: Mutex::new(None),
            cancelled: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            finished_segments: AtomicUsize::new(finished),
            decode_spawned,
        }))
    }

    /// Sets the listener callbacks. Must be called before any block flows in.
    pub fn set_listener(&self, listener: Arc<dyn StoreListener>) {
        self.listener.lock().expect("poisoned listener lock").replace(listener);
    }

    /// Returns the layout of this store.
    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    /// Returns the segments of this store.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Whether every key has already been probed against the local store.
    pub fn has_checked_datastore(&self) -> bool {
        self.progress.lock().expect("poisoned progress lock").has_checked_datastore()
    }

    /// Records that the local-store probe pass completed.
    pub fn mark_checked_datastore(&self) {
        let mut progress = self.progress.lock().expect("poisoned progress lock");
        progress.set_has_checked_datastore();
        self.persister.submit(
            JobTag::GeneralProgress,
            self.layout.gen_progress_offset(),
            progress.to_bytes(self.layout.checksum()),
        );
    }

    /// Whether any block of this store is still wanted for `key`, by bloom
    /// probe. May over-report, never under-reports.
    pub fn wants_key(&self, key: &RoutingKey) -> bool {
        self.main_bloom.lock().expect("poisoned bloom lock").contains(key)
    }

    /// Locates the segment and logical slot of `key`, confirming bloom hits
    /// against the real key lists.
    pub fn slot_for_key(&self, key: &RoutingKey) -> Option<(usize, usize)> {
        for (i, bloom) in self.seg_blooms.iter().enumerate() {
            if bloom.contains(key) {
                if let Some(slot) = self.segments[i].keys().slot_of(key) {
                    return Some((i, slot));
                }
            }
        }
        None
    }

    /// Kicks off decodes for segments that already hold enough blocks, as
    /// happens after resuming or after status recovery.
    pub fn start(&self) {
        for segment in &self.segments {
            if segment.stage() == SegmentStage::Decoding {
                self.spawn_decode(segment.index());
            }
        }

        if self.all_finished() {
            self.deliver_success();
        }
    }

    /// Accepts a decoded block for a slot. The block body is queued for the
    /// persister; the k-th accepted block of a segment queues its decode.
    pub fn on_block(&self, segment: usize, slot: usize, mut data: Vec<u8>) {
        if self.cancelled.load(Ordering::Acquire) || self.failed.load(Ordering::Acquire) {
            return;
        }
        if data.len() > Block::DATA_LENGTH {
            log::warn!("Oversized block of {} bytes for segment {} dropped.", data.len(), segment);
            return;
        }

        let this_segment = &self.segments[segment];

        match this_segment.on_block(slot) {
            BlockDisposition::Stored {
                physical,
                trigger_decode,
            } => {
                data.resize(Block::DATA_LENGTH, 0);
                self.persister.submit(
                    JobTag::Block {
                        segment,
                        slot: physical as usize,
                    },
                    self.layout.block_offset(segment, physical as usize),
                    data,
                );
                self.persist_status(segment);

                if let Some(key) = this_segment.keys().key(slot) {
                    self.remove_from_main_bloom(key.routing_key());
                }

                if trigger_decode {
                    self.spawn_decode(segment);
                }
            }
            BlockDisposition::Duplicate => {
                log::trace!("Duplicate block for segment {} slot {} ignored.", segment, slot);
            }
            BlockDisposition::Dropped => {
                log::trace!("Late block for decoding segment {} dropped.", segment);
            }
        }
    }

    /// Records a failed attempt for a slot; a permanent failure beyond the
    /// check budget sinks the whole store.
    pub fn on_block_failed(&self, segment: usize, slot: usize, failure: GetFailure, permanent: bool) {
        if self.cancelled.load(Ordering::Acquire) || self.failed.load(Ordering::Acquire) {
            return;
        }

        let sank = self.segments[segment].on_slot_failed(slot, failure, permanent);

        if permanent {
            if let Some(key) = self.segments[segment].keys().key(slot) {
                self.remove_from_main_bloom(key.routing_key());
            }
        }
        self.persist_status(segment);

        if sank {
            let mut tally = FailureTally::new();
            for segment in &self.segments {
                tally.merge(&segment.tally());
            }
            self.deliver_failure(Error::SplitfileFailed { tally });
        }
    }

    /// Records that a slot's key entered cooldown, for the persisted status.
    pub fn on_block_cooldown(&self, segment: usize, slot: usize) {
        self.segments[segment].mark_cooldown(slot);
        self.persist_status(segment);
    }

    /// Records that a slot's key is scheduled again.
    pub fn on_block_fetching(&self, segment: usize, slot: usize) {
        self.segments[segment].mark_fetching(slot);
    }

    /// Copies the reassembled file into `output`, segment by segment.
    pub fn copy_output(&self, output: &dyn Bucket) -> Result<(), Error> {
        let mut remaining = self.layout.data_length();

        for segment in &self.segments {
            for slot in 0..segment.shape().data_blocks as usize {
                if remaining == 0 {
                    return Ok(());
                }

                let mut block = vec![0u8; Block::DATA_LENGTH];
                self.file.read_at(self.layout.block_offset(segment.index(), slot), &mut block)?;

                let take = remaining.min(Block::DATA_LENGTH as u64) as usize;
                output.append(&block[..take])?;
                remaining -= take as u64;
            }
        }

        Ok(())
    }

    /// Reads back the raw metadata this download was constructed from.
    pub fn original_metadata(&self) -> Result<Vec<u8>, Error> {
        let mut bytes = vec![0u8; self.layout.orig_metadata_length() as usize];
        self.file.read_at(self.layout.orig_metadata_offset(), &mut bytes)?;
        Ok(bytes)
    }

    /// Flushes every outstanding write to the backing file.
    pub async fn flush(&self) -> Result<(), Error> {
        self.persister.barrier().await;
        self.file.sync()?;
        Ok(())
    }

    /// Cancels the store: no further blocks are accepted, outstanding writes
    /// are flushed, and `after` runs once in-flight jobs observe the
    /// cancelled flag — deferred bucket frees go there.
    pub fn cancel(&self, after: Option<Box<dyn FnOnce() + Send>>) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        self.persister.shutdown(after);
    }

    /// Whether the store has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn all_finished(&self) -> bool {
        self.finished_segments.load(Ordering::Acquire) == self.segments.len()
    }

    fn persist_status(&self, segment: usize) {
        self.persister.submit(
            JobTag::SegmentStatus(segment),
            self.layout.segment_status_offset(segment),
            self.segments[segment].status_bytes(self.layout.checksum(), self.layout.status_record_length() as usize),
        );
    }

    fn remove_from_main_bloom(&self, key: &RoutingKey) {
        let mut bloom = self.main_bloom.lock().expect("poisoned bloom lock");
        bloom.remove(key);
        self.persister
            .submit(JobTag::MainBloom, self.layout.main_bloom_offset(), bloom.as_bytes().to_vec());
    }

    fn listener_handle(&self) -> Option<Arc<dyn StoreListener>> {
        self.listener.lock().expect("poisoned listener lock").clone()
    }

    fn deliver_failure(&self, error: Error) {
        if self.failed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(listener) = self.listener_handle() {
            listener.on_failure(error);
        }
    }

    fn deliver_success(&self) {
        if self.failed.load(Ordering::Acquire) || self.cancelled.load(Ordering::Acquire) {
            return;
        }
        if let Some(listener) = self.listener_handle() {
            listener.on_success();
        }
    }

    fn spawn_decode(&self, segment: usize) {
        if self.decode_spawned[segment].swap(true, Ordering::AcqRel) {
            return;
        }

        let store = match self.this.upgrade() {
            Some(store) => store,
            None => return,
        };

        tokio::spawn(async move {
            if let Err(e) = store.clone().decode_segment(segment).await {
                log::error!("Decoding segment {} failed: {}.", segment, e);
                store.segments[segment].mark_failed();
                store.deliver_failure(e);
            }
        });
    }

    async fn decode_segment(self: Arc<Self>, index: usize) -> Result<(), Error> {
        // Every accepted block write is queued before the decode trigger, so
        // the barrier guarantees the reads below see them.
        self.persister.barrier().await;

        let store = self.clone();
        let heal = self
            .runner
            .run(
                self.segments[index].shape().total() * Block::DATA_LENGTH,
                move || store.decode_segment_blocking(index),
            )
            .await?;

        if self.cancelled.load(Ordering::Acquire) {
            return Ok(());
        }

        self.persist_status(index);

        for data in heal {
            self.healing.queue(data);
        }

        // Remaining keys of a finished segment are no longer wanted.
        let finished = self.finished_segments.fetch_add(1, Ordering::AcqRel) + 1;

        if let Some(listener) = self.listener_handle() {
            listener.on_segment_finished(index);
        }

        if finished == self.segments.len() {
            self.persister.barrier().await;
            self.deliver_success();
        }

        Ok(())
    }

    fn decode_segment_blocking(&self, index: usize) -> Result<Vec<Vec<u8>>, Error> {
        let segment = &self.segments[index];
        let shape = segment.shape();
        let k = shape.data_blocks as usize;
        let m = shape.check_blocks as usize;

        let plan = segment.decode_plan();
        let mut slots: Vec<Option<Vec<u8>>> = Vec::with_capacity(plan.len());
        for physical in &plan {
            match physical {
                Some(physical) => {
                    let mut block = vec![0u8; Block::DATA_LENGTH];
                    self.file.read_at(self.layout.block_offset(index, *physical as usize), &mut block)?;
                    slots.push(Some(block));
                }
                None => slots.push(None),
            }
        }

        let unresolved: Vec<RoutingKey> = plan
            .iter()
            .enumerate()
            .filter(|(_, physical)| physical.is_none())
            .filter_map(|(slot, _)| segment.keys().key(slot).map(|key| *key.routing_key()))
            .collect();

        let data = self.fec.decode(&slots, k)?;

        segment.mark_encoding();
        let check = self.fec.encode(&data, m)?;

        for (j, regenerated) in check.iter().enumerate() {
            if let Some(fetched) = &slots[k + j] {
                if fetched != regenerated {
                    log::warn!("Check block {} of segment {} disagrees with re-encode.", j, index);
                }
            }
        }

        // Canonical order: block i of the segment goes to physical slot i.
        // These writes land before the status record that claims them.
        for (i, block) in data.iter().enumerate() {
            self.file.write_at(self.layout.block_offset(index, i), block)?;
        }
        for (j, block) in check.iter().enumerate() {
            self.file.write_at(self.layout.block_offset(index, k + j), block)?;
        }
        self.file.sync()?;

        let candidates = segment.healing_candidates();
        segment.mark_finished();

        // Keys that never arrived are satisfied by the decode; drop them
        // from the remaining-keys filter.
        {
            let mut bloom = self.main_bloom.lock().expect("poisoned bloom lock");
            for key in &unresolved {
                bloom.remove(key);
            }
            self.persister
                .submit(JobTag::MainBloom, self.layout.main_bloom_offset(), bloom.as_bytes().to_vec());
        }

        let mut heal = Vec::new();
        for (slot, _) in candidates {
            let block = if slot < k { &data[slot] } else { &check[slot - k] };
            heal.push(self.trimmed_block(index, slot, block));
        }

        Ok(heal)
    }

    // Data blocks carry file content and the file's last block is shorter
    // than a full slot; its plaintext identity (and so its key) is over the
    // unpadded bytes.
    fn trimmed_block(&self, segment: usize, slot: usize, block: &[u8]) -> Vec<u8> {
        match self.data_block_length(segment, slot) {
            Some(length) => block[..length].to_vec(),
            None => block.to_vec(),
        }
    }

    fn data_block_length(&self, segment: usize, slot: usize) -> Option<usize> {
        let shape = self.layout.shapes()[segment];
        if slot >= shape.data_blocks as usize {
            return None;
        }

        let mut preceding = 0u64;
        for (i, other) in self.layout.shapes().iter().enumerate() {
            if i == segment {
                break;
            }
            preceding += other.data_blocks as u64;
        }
        preceding += slot as u64;

        let start = preceding * Block::DATA_LENGTH as u64;
        let end = ((preceding + 1) * Block::DATA_LENGTH as u64).min(self.layout.data_length());

        if end <= start {
            Some(0)
        } else if end - start < Block::DATA_LENGTH as u64 {
            Some((end - start) as usize)
        } else {
            None
        }
    }
}

fn build_blooms(layout: &StoreLayout, segments: &[Segment], salt: [u8; SALT_LENGTH]) -> (CountingBloom, Vec<BinaryBloom>) {
    let mut main = CountingBloom::new(layout.total_blocks() as usize, salt);
    let mut seg_blooms = Vec::with_capacity(segments.len());

    for segment in segments {
        let mut bloom = BinaryBloom::new(
            layout
                .shapes()
                .iter()
                .map(SegmentShape::total)
                .max()
                .unwrap_or(segment.shape().total()),
            salt,
        );

        for slot in 0..segment.shape().total() {
            if let Some(key) = segment.keys().key(slot) {
                bloom.insert(key.routing_key());
            }
        }
        seg_blooms.push(bloom);

        for (_, key, _) in segment.remaining() {
            main.insert(key.routing_key());
        }
    }

    (main, seg_blooms)
}

// Re-verifies a segment's block region against its keys when the persisted
// status is unreadable. Sealing is convergent, so re-encoding a stored
// plaintext must reproduce the routing key it was fetched under; anything
// that does not match a key is treated as never fetched.
fn recover_segment(
    layout: &StoreLayout,
    file: &dyn RandomAccess,
    index: usize,
    shape: SegmentShape,
    keys: SegmentKeys,
) -> Result<Segment, Error> {
    let mut slots = vec![SlotStatus::default(); shape.total()];

    let mut by_routing: HashMap<RoutingKey, usize> = HashMap::new();
    for slot in 0..shape.total() {
        if let Some(key) = keys.key(slot) {
            by_routing.insert(*key.routing_key(), slot);
        }
    }

    // Is the file's very last data block (stored padded to a full slot, but
    // keyed over its unpadded bytes) part of this segment?
    let data_block_count: u64 = layout.shapes().iter().map(|shape| shape.data_blocks as u64).sum();
    let preceding_data: u64 = layout
        .shapes()
        .iter()
        .take(index)
        .map(|shape| shape.data_blocks as u64)
        .sum();
    let tail = (layout.data_length() % Block::DATA_LENGTH as u64) as usize;
    let has_short_slot = tail > 0 && preceding_data + shape.data_blocks as u64 == data_block_count;

    let mut matched = 0usize;
    for physical in 0..shape.total() {
        let mut block = vec![0u8; Block::DATA_LENGTH];
        file.read_at(layout.block_offset(index, physical), &mut block)?;

        if block.iter().all(|byte| *byte == 0) {
            continue;
        }

        let mut candidates = vec![&block[..]];
        if has_short_slot {
            candidates.push(&block[..tail]);
        }

        for candidate in candidates {
            let routing_key = match ContentKey::encode(candidate) {
                Ok((key, _)) => *key.routing_key(),
                Err(_) => continue,
            };

            if let Some(slot) = by_routing.remove(&routing_key) {
                slots[slot].state = SlotState::Succeeded;
                slots[slot].found_slot = physical as u16;
                matched += 1;
                break;
            }
        }
    }

    log::info!(
        "Recovered {} of {} blocks of segment {} from the block store.",
        matched,
        shape.total(),
        index
    );

    Ok(Segment::with_slots(index, shape, keys, slots))
}
