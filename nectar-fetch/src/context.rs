// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

use nectar_runtime::{BucketFactory, Executor, HealingQueue, MemoryLimitedRunner};
use nectar_schedule::Scheduler;
use nectar_splitfile::{FecCodec, SALT_LENGTH};

use serde::Deserialize;

use std::sync::Arc;

const DEFAULT_MAX_METADATA_SIZE: u64 = 256 * 1024;
const DEFAULT_MAX_OUTPUT_LENGTH: u64 = 128 * 1024 * 1024;
const DEFAULT_MAX_TEMP_LENGTH: u64 = 256 * 1024 * 1024;
const DEFAULT_MAX_RECURSION_LEVEL: u32 = 16;
const DEFAULT_MAX_RETRIES: i32 = 2;
const DEFAULT_MAX_SPLITFILE_RETRIES: i32 = 3;
const DEFAULT_MAX_ARCHIVE_ENTRIES: usize = 1024;

/// Builder for a [`FetchConfig`].
#[derive(Default, Deserialize)]
#[serde(rename = "fetch")]
pub struct FetchConfigBuilder {
    #[serde(rename = "maxMetadataSize")]
    max_metadata_size: Option<u64>,
    #[serde(rename = "maxOutputLength")]
    max_output_length: Option<u64>,
    #[serde(rename = "maxTempLength")]
    max_temp_length: Option<u64>,
    #[serde(rename = "maxRecursionLevel")]
    max_recursion_level: Option<u32>,
    #[serde(rename = "maxRetries")]
    max_retries: Option<i32>,
    #[serde(rename = "maxSplitfileRetries")]
    max_splitfile_retries: Option<i32>,
    #[serde(rename = "allowedMimeTypes", default)]
    allowed_mime_types: Vec<String>,
    #[serde(rename = "returnArchiveManifests", default)]
    return_archive_manifests: bool,
    #[serde(rename = "ignoreTooManyPathComponents", default)]
    ignore_too_many_path_components: bool,
}

impl FetchConfigBuilder {
    /// Creates a new [`FetchConfigBuilder`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the cap on a metadata document's size.
    pub fn max_metadata_size(mut self, max_metadata_size: u64) -> Self {
        self.max_metadata_size.replace(max_metadata_size);
        self
    }

    /// Sets the cap on the decoded output size.
    pub fn max_output_length(mut self, max_output_length: u64) -> Self {
        self.max_output_length.replace(max_output_length);
        self
    }

    /// Sets the cap on intermediate bucket sizes.
    pub fn max_temp_length(mut self, max_temp_length: u64) -> Self {
        self.max_temp_length.replace(max_temp_length);
        self
    }

    /// Sets the cap on metadata recursion depth.
    pub fn max_recursion_level(mut self, max_recursion_level: u32) -> Self {
        self.max_recursion_level.replace(max_recursion_level);
        self
    }

    /// Sets the retry cap for single-block fetches, `-1` meaning infinite.
    pub fn max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries.replace(max_retries);
        self
    }

    /// Sets the retry cap for splitfile blocks, `-1` meaning infinite.
    pub fn max_splitfile_retries(mut self, max_splitfile_retries: i32) -> Self {
        self.max_splitfile_retries.replace(max_splitfile_retries);
        self
    }

    /// Sets the MIME type whitelist; empty allows everything.
    pub fn allowed_mime_types(mut self, allowed_mime_types: Vec<String>) -> Self {
        self.allowed_mime_types = allowed_mime_types;
        self
    }

    /// Sets whether archive manifests are surfaced whole instead of
    /// descended into.
    pub fn return_archive_manifests(mut self, return_archive_manifests: bool) -> Self {
        self.return_archive_manifests = return_archive_manifests;
        self
    }

    /// Sets whether leftover path components are ignored instead of failing
    /// the fetch.
    pub fn ignore_too_many_path_components(mut self, ignore: bool) -> Self {
        self.ignore_too_many_path_components = ignore;
        self
    }

    /// Finishes the builder into a [`FetchConfig`].
    pub fn finish(self) -> FetchConfig {
        FetchConfig {
            max_metadata_size: self.max_metadata_size.unwrap_or(DEFAULT_MAX_METADATA_SIZE),
            max_output_length: self.max_output_length.unwrap_or(DEFAULT_MAX_OUTPUT_LENGTH),
            max_temp_length: self.max_temp_length.unwrap_or(DEFAULT_MAX_TEMP_LENGTH),
            max_recursion_level: self.max_recursion_level.unwrap_or(DEFAULT_MAX_RECURSION_LEVEL),
            max_retries: self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            max_splitfile_retries: self.max_splitfile_retries.unwrap_or(DEFAULT_MAX_SPLITFILE_RETRIES),
            max_archive_entries: DEFAULT_MAX_ARCHIVE_ENTRIES,
            allowed_mime_types: self.allowed_mime_types,
            return_archive_manifests: self.return_archive_manifests,
            ignore_too_many_path_components: self.ignore_too_many_path_components,
        }
    }
}

/// Limits and policies of a fetch.
#[derive(Clone)]
pub struct FetchConfig {
    pub(crate) max_metadata_size: u64,
    pub(crate) max_output_length: u64,
    pub(crate) max_temp_length: u64,
    pub(crate) max_recursion_level: u32,
    pub(crate) max_retries: i32,
    pub(crate) max_splitfile_retries: i32,
    pub(crate) max_archive_entries: usize,
    pub(crate) allowed_mime_types: Vec<String>,
    pub(crate) return_archive_manifests: bool,
    pub(crate) ignore_too_many_path_components: bool,
}

impl FetchConfig {
    /// Starts a new [`FetchConfigBuilder`].
    pub fn build() -> FetchConfigBuilder {
        FetchConfigBuilder::new()
    }

    pub(crate) fn mime_allowed(&self, mime_type: &str) -> bool {
        self.allowed_mime_types.is_empty() || self.allowed_mime_types.iter().any(|allowed| allowed == mime_type)
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        FetchConfigBuilder::new().finish()
    }
}

/// Everything a fetch needs from its environment, threaded explicitly
/// through the fetchers — there is no process-wide state.
pub struct FetchContext {
    /// The request scheduler.
    pub scheduler: Arc<Scheduler>,
    /// Factory for temporary and output buckets.
    pub bucket_factory: Arc<BucketFactory>,
    /// Sink for opportunistic reinserts.
    pub healing: Arc<dyn HealingQueue>,
    /// The erasure codec.
    pub fec: Arc<dyn FecCodec>,
    /// Gate for decode and encode jobs.
    pub fec_runner: Arc<MemoryLimitedRunner>,
    /// Spawns background work.
    pub executor: Arc<dyn Executor>,
    /// The node's bloom filter salt.
    pub salt: [u8; SALT_LENGTH],
    /// Limits and policies.
    pub config: FetchConfig,
}
