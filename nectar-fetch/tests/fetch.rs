// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

use nectar_fetch::{
    CompressionCodec, ContainerType, FetchConfig, FetchErrorKind, Getter, Metadata, SplitfileMetadata,
};
use nectar_key::{Block, ClientKey, ContentKey, KeyUri};
use nectar_runtime::{GetFailure, RandomAccess};
use nectar_schedule::{PriorityClass, SchedulerConfig};
use nectar_splitfile::{ChecksumKind, FecCodec, ReedSolomonCodec, SegmentKeys, SplitfileParams, SplitfileStore};
use nectar_test::{ChannelCallback, FetchEvent, TestEnv};

use rand::{thread_rng, Rng};
use tokio::sync::mpsc;

use std::{
    collections::BTreeMap,
    sync::Arc,
    time::{Duration, Instant},
};

fn rand_bytes(length: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; length];
    thread_rng().fill(&mut bytes[..]);
    bytes
}

async fn expect_terminal(rx: &mut mpsc::UnboundedReceiver<FetchEvent>) -> FetchEvent {
    loop {
        match tokio::time::timeout(Duration::from_secs(30), rx.recv()).await {
            Ok(Some(
                FetchEvent::BlockSetFinished
                | FetchEvent::ExpectedMime(_)
                | FetchEvent::ExpectedSize(_)
                | FetchEvent::FinalizedMetadata,
            )) => continue,
            Ok(Some(event)) => return event,
            Ok(None) | Err(_) => panic!("fetch never reached a terminal event"),
        }
    }
}

fn expect_success(event: FetchEvent) -> (Vec<u8>, Option<String>, u64) {
    match event {
        FetchEvent::Success { data, mime_type, size } => (data, mime_type, size),
        FetchEvent::Failure(e) => panic!("unexpected failure: {}", e),
        event => panic!("unexpected event: {:?}", event),
    }
}

struct SplitfileFixture {
    file_data: Vec<u8>,
    metadata: SplitfileMetadata,
    // One (key, sealed block) per slot, segment by segment.
    blocks: Vec<Vec<(ClientKey, Block)>>,
}

fn build_splitfile(file_length: usize, blocks_per_segment: usize, check_per_segment: usize) -> SplitfileFixture {
    let file_data = rand_bytes(file_length);
    let codec = ReedSolomonCodec::new();

    let mut segments = Vec::new();
    let mut blocks = Vec::new();

    let chunks: Vec<&[u8]> = file_data.chunks(Block::DATA_LENGTH).collect();

    for segment_chunks in chunks.chunks(blocks_per_segment) {
        let padded: Vec<Vec<u8>> = segment_chunks
            .iter()
            .map(|chunk| {
                let mut block = chunk.to_vec();
                block.resize(Block::DATA_LENGTH, 0);
                block
            })
            .collect();
        let check = codec.encode(&padded, check_per_segment).unwrap();

        let mut slot_blocks = Vec::new();
        let mut data_keys = Vec::new();
        for chunk in segment_chunks {
            let (key, block) = ContentKey::encode(chunk).unwrap();
            data_keys.push(ClientKey::from(key.clone()));
            slot_blocks.push((ClientKey::from(key), block));
        }

        let mut check_keys = Vec::new();
        for check_block in &check {
            let (key, block) = ContentKey::encode(check_block).unwrap();
            check_keys.push(ClientKey::from(key.clone()));
            slot_blocks.push((ClientKey::from(key), block));
        }

        segments.push(SegmentKeys::new(data_keys, check_keys));
        blocks.push(slot_blocks);
    }

    let metadata = SplitfileMetadata {
        data_length: file_data.len() as u64,
        decompressed_length: file_data.len() as u64,
        mime_type: Some("application/octet-stream".to_string()),
        compression: vec![],
        segments,
        cross_segment: false,
    };

    SplitfileFixture {
        file_data,
        metadata,
        blocks,
    }
}

fn metadata_block(document: &Metadata) -> (ClientKey, Block) {
    let (key, block) = ContentKey::encode(&document.to_bytes()).unwrap();
    (key.into(), block)
}

fn uri_for(key: &ClientKey, path: &[&str]) -> KeyUri {
    KeyUri::new(key.clone(), path.iter().map(|s| s.to_string()).collect())
}

// Scenario: the block is already in the local store; no network request is
// issued.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn single_block_from_store() {
    let env = TestEnv::new();
    let content = rand_bytes(16_384);
    let (key, block) = ContentKey::encode(&content).unwrap();
    let key = ClientKey::from(key);

    env.key_store.insert(*key.routing_key(), block);

    let (callback, mut rx) = ChannelCallback::new();
    Getter::start(env.ctx.clone(), uri_for(&key, &[]), PriorityClass::Interactive, Arc::new(callback));

    let (data, _, size) = expect_success(expect_terminal(&mut rx).await);
    assert_eq!(size, 16_384);
    assert_eq!(data, content);
    assert_eq!(env.node.total_requests(), 0);
}

// Scenario: two transient failures, then the block; the retry budget
// absorbs them.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn single_block_with_retries() {
    let env = TestEnv::new();
    let content = rand_bytes(16_384);
    let (key, block) = ContentKey::encode(&content).unwrap();
    let key = ClientKey::from(key);

    env.node
        .script_failures_then_block(key.routing_key(), GetFailure::RouteNotFound, 2, block);

    let (callback, mut rx) = ChannelCallback::new();
    Getter::start(env.ctx.clone(), uri_for(&key, &[]), PriorityClass::Interactive, Arc::new(callback));

    let (data, _, _) = expect_success(expect_terminal(&mut rx).await);
    assert_eq!(data, content);
    assert_eq!(env.node.request_count(key.routing_key()), 3);
}

// Scenario: the third consecutive failure parks the key; the sweep releases
// it after the cooldown period and the fetch completes.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cooldown_parks_and_releases() {
    let env = TestEnv::with_configs(
        SchedulerConfig::build()
            .cooldown_time_ms(400)
            .cooldown_retries(3)
            .sweep_interval_ms(50)
            .finish(),
        FetchConfig::build().max_retries(10).finish(),
    );

    let content = rand_bytes(4_096);
    let (key, block) = ContentKey::encode(&content).unwrap();
    let key = ClientKey::from(key);

    env.node
        .script_failures_then_block(key.routing_key(), GetFailure::RouteNotFound, 3, block);

    let started = Instant::now();
    let (callback, mut rx) = ChannelCallback::new();
    Getter::start(env.ctx.clone(), uri_for(&key, &[]), PriorityClass::Interactive, Arc::new(callback));

    // The three failures land quickly; the key must then sit in cooldown.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(env.scheduler.cooling_keys(), 1);

    let (data, _, _) = expect_success(expect_terminal(&mut rx).await);
    assert_eq!(data, content);
    assert_eq!(env.node.request_count(key.routing_key()), 4);
    assert!(started.elapsed() >= Duration::from_millis(400));
}

// Scenario: a one-segment splitfile where every block arrives.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn splitfile_happy_path() {
    let env = TestEnv::new();
    let fixture = build_splitfile(Block::DATA_LENGTH * 7 + 4_321, 8, 4);

    for slot_blocks in &fixture.blocks {
        for (key, block) in slot_blocks {
            env.node.script(key.routing_key(), [Ok(block.clone())]);
        }
    }

    let (root_key, root_block) = metadata_block(&Metadata::Splitfile(fixture.metadata.clone()));
    env.node.script(root_key.routing_key(), [Ok(root_block)]);

    let (callback, mut rx) = ChannelCallback::new();
    Getter::start(env.ctx.clone(), uri_for(&root_key, &[]), PriorityClass::Interactive, Arc::new(callback));

    let (data, mime_type, _) = expect_success(expect_terminal(&mut rx).await);
    assert_eq!(data, fixture.file_data);
    assert_eq!(mime_type.as_deref(), Some("application/octet-stream"));
}

// Scenario: exactly as many permanent losses as there are check blocks; the
// decode still succeeds and hard-won blocks are offered for healing.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn splitfile_with_maximum_losses() {
    let env = TestEnv::with_configs(
        SchedulerConfig::build().cooldown_time_ms(60_000).sweep_interval_ms(50).finish(),
        FetchConfig::build().max_splitfile_retries(0).finish(),
    );
    let fixture = build_splitfile(Block::DATA_LENGTH * 4, 4, 2);

    for slot_blocks in &fixture.blocks {
        for (slot, (key, block)) in slot_blocks.iter().enumerate() {
            // Slots 1 and 4 never arrive; their single attempt fails.
            if slot != 1 && slot != 4 {
                env.node.script(key.routing_key(), [Ok(block.clone())]);
            }
        }
    }

    let (root_key, root_block) = metadata_block(&Metadata::Splitfile(fixture.metadata.clone()));
    env.node.script(root_key.routing_key(), [Ok(root_block)]);

    let (callback, mut rx) = ChannelCallback::new();
    Getter::start(env.ctx.clone(), uri_for(&root_key, &[]), PriorityClass::Interactive, Arc::new(callback));

    let (data, _, _) = expect_success(expect_terminal(&mut rx).await);
    assert_eq!(data, fixture.file_data);

    // The failed slots needed more than zero attempts, so the decode must
    // have offered them for reinsertion.
    let offer = env
        .healing_rx
        .lock()
        .expect("healing channel lock")
        .try_recv()
        .expect("no healing offer");
    assert!(!offer.is_empty());
}

// Scenario: one more permanent loss than the check blocks cover; the whole
// splitfile fails with a per-kind tally.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn splitfile_with_too_many_losses() {
    let env = TestEnv::with_configs(
        SchedulerConfig::build().cooldown_time_ms(60_000).sweep_interval_ms(50).finish(),
        FetchConfig::build().max_splitfile_retries(0).finish(),
    );
    let fixture = build_splitfile(Block::DATA_LENGTH * 4, 4, 2);

    for slot_blocks in &fixture.blocks {
        for (slot, (key, block)) in slot_blocks.iter().enumerate() {
            if slot > 2 {
                env.node.script(key.routing_key(), [Ok(block.clone())]);
            }
        }
    }

    let (root_key, root_block) = metadata_block(&Metadata::Splitfile(fixture.metadata.clone()));
    env.node.script(root_key.routing_key(), [Ok(root_block)]);

    let (callback, mut rx) = ChannelCallback::new();
    Getter::start(env.ctx.clone(), uri_for(&root_key, &[]), PriorityClass::Interactive, Arc::new(callback));

    match expect_terminal(&mut rx).await {
        FetchEvent::Failure(e) => {
            assert_eq!(e.kind(), FetchErrorKind::SplitfileError);
            let tally = e.tally().expect("missing tally");
            assert!(tally.count(GetFailure::DataNotFound) >= 3);
        }
        event => panic!("unexpected event: {:?}", event),
    }
}

// Scenario: a partially fetched store survives a crash; reopening requests
// only the blocks that are not yet proven on disk.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn resume_requests_only_missing_blocks() {
    let env = TestEnv::new();
    let fixture = build_splitfile(Block::DATA_LENGTH * 4, 4, 2);

    // First life: the store is created directly and two blocks arrive
    // before the crash.
    let original_metadata = Metadata::Splitfile(fixture.metadata.clone()).to_bytes();
    let params = SplitfileParams {
        segments: fixture.metadata.segments.clone(),
        data_length: fixture.metadata.data_length,
        original_metadata,
        original_details: "resume test".to_string(),
        max_retries: -1,
        cooldown_retries: 3,
        cooldown_time_ms: 300_000,
        salt: nectar_test::context::TEST_SALT,
        checksum: ChecksumKind::Crc32,
    };

    let mut file_slot = None;
    let store = SplitfileStore::create(
        params,
        |length| {
            let file = Arc::new(nectar_runtime::MemoryAccess::new(length));
            file_slot = Some(file.clone());
            Ok(file as Arc<dyn RandomAccess>)
        },
        Arc::new(ReedSolomonCodec::new()),
        Arc::new(nectar_runtime::MemoryLimitedRunner::new(2, 64 * 1024 * 1024)),
        Arc::new(nectar_runtime::NullHealingQueue),
    )
    .unwrap();

    let fetched = [0usize, 2];
    for &slot in &fetched {
        let (key, _) = &fixture.blocks[0][slot];
        let chunk = &fixture.file_data[slot * Block::DATA_LENGTH..(slot + 1) * Block::DATA_LENGTH];
        assert_eq!(key.decode(&fixture.blocks[0][slot].1).unwrap(), chunk);
        store.on_block(0, slot, chunk.to_vec());
    }
    store.flush().await.unwrap();
    drop(store);

    // Second life: every key answers, but only the missing ones may be
    // asked for.
    for slot_blocks in &fixture.blocks {
        for (key, block) in slot_blocks {
            env.node.script(key.routing_key(), [Ok(block.clone())]);
        }
    }

    let (callback, mut rx) = ChannelCallback::new();
    Getter::resume(
        env.ctx.clone(),
        file_slot.unwrap(),
        PriorityClass::Interactive,
        Arc::new(callback),
    );

    let (data, _, _) = expect_success(expect_terminal(&mut rx).await);
    assert_eq!(data, fixture.file_data);

    for &slot in &fetched {
        let (key, _) = &fixture.blocks[0][slot];
        assert_eq!(env.node.request_count(key.routing_key()), 0, "slot {} refetched", slot);
    }
}

// A manifest tree walked down by path components, ending in a redirect.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn manifest_path_walk() {
    let env = TestEnv::new();
    let content = rand_bytes(2_048);

    let (leaf_key, leaf_block) = ContentKey::encode(&content).unwrap();
    let leaf_key = ClientKey::from(leaf_key);
    env.node.script(leaf_key.routing_key(), [Ok(leaf_block)]);

    let site = Metadata::SimpleManifest {
        entries: BTreeMap::from([(
            String::new(),
            Metadata::SimpleRedirect {
                uri: uri_for(&leaf_key, &[]),
                mime_type: Some("text/plain".to_string()),
                compression: vec![],
            },
        )]),
    };
    let root = Metadata::SimpleManifest {
        entries: BTreeMap::from([("site".to_string(), site)]),
    };

    let (root_key, root_block) = metadata_block(&root);
    env.node.script(root_key.routing_key(), [Ok(root_block)]);

    let (callback, mut rx) = ChannelCallback::new();
    Getter::start(
        env.ctx.clone(),
        uri_for(&root_key, &["site", ""]),
        PriorityClass::Interactive,
        Arc::new(callback),
    );

    let (data, mime_type, _) = expect_success(expect_terminal(&mut rx).await);
    assert_eq!(data, content);
    assert_eq!(mime_type.as_deref(), Some("text/plain"));
}

// Leftover path components after reaching content fail with the truncated
// URI of what was actually fetched.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn too_many_path_components_reports_truncated_uri() {
    let env = TestEnv::new();

    let (key, block) = ContentKey::encode(&rand_bytes(128)).unwrap();
    let key = ClientKey::from(key);
    env.node.script(key.routing_key(), [Ok(block)]);

    let (callback, mut rx) = ChannelCallback::new();
    Getter::start(
        env.ctx.clone(),
        uri_for(&key, &["unused"]),
        PriorityClass::Interactive,
        Arc::new(callback),
    );

    match expect_terminal(&mut rx).await {
        FetchEvent::Failure(e) => {
            assert_eq!(e.kind(), FetchErrorKind::TooManyPathComponents);
            assert_eq!(e.new_uri().expect("missing truncated uri").path().len(), 0);
        }
        event => panic!("unexpected event: {:?}", event),
    }
}

// A declared MIME type outside the whitelist is rejected.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn mime_whitelist_enforced() {
    let env = TestEnv::with_configs(
        SchedulerConfig::build().finish(),
        FetchConfig::build()
            .allowed_mime_types(vec!["text/plain".to_string()])
            .finish(),
    );

    let content = rand_bytes(64);
    let (leaf_key, leaf_block) = ContentKey::encode(&content).unwrap();
    let leaf_key = ClientKey::from(leaf_key);
    env.node.script(leaf_key.routing_key(), [Ok(leaf_block)]);

    let root = Metadata::SimpleRedirect {
        uri: uri_for(&leaf_key, &[]),
        mime_type: Some("application/json".to_string()),
        compression: vec![],
    };
    let (root_key, root_block) = metadata_block(&root);
    env.node.script(root_key.routing_key(), [Ok(root_block)]);

    let (callback, mut rx) = ChannelCallback::new();
    Getter::start(env.ctx.clone(), uri_for(&root_key, &[]), PriorityClass::Interactive, Arc::new(callback));

    match expect_terminal(&mut rx).await {
        FetchEvent::Failure(e) => assert_eq!(e.kind(), FetchErrorKind::WrongMimeType),
        event => panic!("unexpected event: {:?}", event),
    }
}

// An archive manifest: the container is fetched, its manifest element is
// walked and a named element is served from the extracted archive.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn archive_manifest_walk() {
    let env = TestEnv::new();
    let page = b"<html>hello</html>".to_vec();

    let inner_manifest = Metadata::SimpleManifest {
        entries: BTreeMap::from([(
            "page.html".to_string(),
            Metadata::ArchiveInternalRedirect {
                name: "page.html".to_string(),
                mime_type: Some("text/html".to_string()),
            },
        )]),
    };

    let container = build_tar(&[
        (".metadata", inner_manifest.to_bytes().as_slice()),
        ("page.html", page.as_slice()),
    ]);

    let (container_key, container_block) = ContentKey::encode(&container).unwrap();
    let container_key = ClientKey::from(container_key);
    env.node.script(container_key.routing_key(), [Ok(container_block)]);

    let root = Metadata::ArchiveManifest {
        container: ContainerType::Tar,
        source: Box::new(Metadata::SimpleRedirect {
            uri: uri_for(&container_key, &[]),
            mime_type: None,
            compression: vec![],
        }),
    };
    let (root_key, root_block) = metadata_block(&root);
    env.node.script(root_key.routing_key(), [Ok(root_block)]);

    let (callback, mut rx) = ChannelCallback::new();
    Getter::start(
        env.ctx.clone(),
        uri_for(&root_key, &["page.html"]),
        PriorityClass::Interactive,
        Arc::new(callback),
    );

    let (data, mime_type, _) = expect_success(expect_terminal(&mut rx).await);
    assert_eq!(data, page);
    assert_eq!(mime_type.as_deref(), Some("text/html"));
}

// Compressed content is decompressed transparently.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn gzip_redirect_round_trip() {
    let env = TestEnv::new();
    let content = b"text that compresses, text that compresses, text that compresses".repeat(16);

    let compressed = gzip(&content);
    let (leaf_key, leaf_block) = ContentKey::encode(&compressed).unwrap();
    let leaf_key = ClientKey::from(leaf_key);
    env.node.script(leaf_key.routing_key(), [Ok(leaf_block)]);

    let root = Metadata::SimpleRedirect {
        uri: uri_for(&leaf_key, &[]),
        mime_type: None,
        compression: vec![CompressionCodec::Gzip],
    };
    let (root_key, root_block) = metadata_block(&root);
    env.node.script(root_key.routing_key(), [Ok(root_block)]);

    let (callback, mut rx) = ChannelCallback::new();
    Getter::start(env.ctx.clone(), uri_for(&root_key, &[]), PriorityClass::Interactive, Arc::new(callback));

    let (data, _, _) = expect_success(expect_terminal(&mut rx).await);
    assert_eq!(data, content);
}

// Metadata demanding cross-segment decoding is refused outright.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cross_segment_refused() {
    let env = TestEnv::new();
    let mut fixture = build_splitfile(Block::DATA_LENGTH, 1, 1);
    fixture.metadata.cross_segment = true;

    let (root_key, root_block) = metadata_block(&Metadata::Splitfile(fixture.metadata));
    env.node.script(root_key.routing_key(), [Ok(root_block)]);

    let (callback, mut rx) = ChannelCallback::new();
    Getter::start(env.ctx.clone(), uri_for(&root_key, &[]), PriorityClass::Interactive, Arc::new(callback));

    match expect_terminal(&mut rx).await {
        FetchEvent::Failure(e) => assert_eq!(e.kind(), FetchErrorKind::UnsupportedFormat),
        event => panic!("unexpected event: {:?}", event),
    }
}

// Cancelling a request surfaces exactly one on_cancelled.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_surfaces_cancelled() {
    let env = TestEnv::with_configs(
        SchedulerConfig::build().cooldown_time_ms(60_000).sweep_interval_ms(50).finish(),
        FetchConfig::build().max_retries(-1).finish(),
    );

    // The key never resolves; the request is cancelled first.
    let (key, _) = ContentKey::encode(&rand_bytes(64)).unwrap();
    let key = ClientKey::from(key);

    let (callback, mut rx) = ChannelCallback::new();
    let request = Getter::start(env.ctx.clone(), uri_for(&key, &[]), PriorityClass::Interactive, Arc::new(callback));

    tokio::time::sleep(Duration::from_millis(50)).await;
    request.cancel();

    match expect_terminal(&mut rx).await {
        FetchEvent::Cancelled => {}
        event => panic!("unexpected event: {:?}", event),
    }
}

fn gzip(data: &[u8]) -> Vec<u8> {
    use std::io::Read;
    let mut encoder = flate2::read::GzEncoder::new(data, flate2::Compression::default());
    let mut out = Vec::new();
    encoder.read_to_end(&mut out).unwrap();
    out
}

fn build_tar(elements: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, data) in elements {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, *data).unwrap();
    }
    builder.into_inner().unwrap()
}
