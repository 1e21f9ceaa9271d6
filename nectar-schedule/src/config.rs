// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::PriorityPolicy;

use serde::Deserialize;

const DEFAULT_COOLDOWN_TIME_MS: u64 = 300_000;
const DEFAULT_COOLDOWN_RETRIES: u32 = 3;
const DEFAULT_MAX_RUNNING_REQUESTS: usize = 32;
const DEFAULT_SWEEP_INTERVAL_MS: u64 = 2_500;
const DEFAULT_COOLDOWN_DRAIN_MAX: usize = 1_024;

/// Builder for a [`SchedulerConfig`].
#[derive(Default, Deserialize)]
#[serde(rename = "scheduler")]
pub struct SchedulerConfigBuilder {
    #[serde(rename = "priorityPolicy")]
    priority_policy: Option<PriorityPolicy>,
    #[serde(rename = "cooldownTimeMs")]
    cooldown_time_ms: Option<u64>,
    #[serde(rename = "cooldownRetries")]
    cooldown_retries: Option<u32>,
    #[serde(rename = "maxRunningRequests")]
    max_running_requests: Option<usize>,
    #[serde(rename = "sweepIntervalMs")]
    sweep_interval_ms: Option<u64>,
    #[serde(rename = "cacheLocalRequests", default)]
    cache_local_requests: bool,
}

impl SchedulerConfigBuilder {
    /// Creates a new [`SchedulerConfigBuilder`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the priority selection policy.
    pub fn priority_policy(mut self, policy: PriorityPolicy) -> Self {
        self.priority_policy.replace(policy);
        self
    }

    /// Sets the per-key cooldown duration, in milliseconds.
    pub fn cooldown_time_ms(mut self, cooldown_time_ms: u64) -> Self {
        self.cooldown_time_ms.replace(cooldown_time_ms);
        self
    }

    /// Sets how many consecutive failures trigger a cooldown.
    pub fn cooldown_retries(mut self, cooldown_retries: u32) -> Self {
        self.cooldown_retries.replace(cooldown_retries);
        self
    }

    /// Sets the cap on concurrently running network requests.
    pub fn max_running_requests(mut self, max_running_requests: usize) -> Self {
        self.max_running_requests.replace(max_running_requests);
        self
    }

    /// Sets the interval of the cooldown sweep, in milliseconds.
    pub fn sweep_interval_ms(mut self, sweep_interval_ms: u64) -> Self {
        self.sweep_interval_ms.replace(sweep_interval_ms);
        self
    }

    /// Sets whether successfully fetched blocks are cached in the local store.
    pub fn cache_local_requests(mut self, cache_local_requests: bool) -> Self {
        self.cache_local_requests = cache_local_requests;
        self
    }

    /// Finishes the builder into a [`SchedulerConfig`].
    pub fn finish(self) -> SchedulerConfig {
        SchedulerConfig {
            priority_policy: self.priority_policy.unwrap_or_default(),
            cooldown_time_ms: self.cooldown_time_ms.unwrap_or(DEFAULT_COOLDOWN_TIME_MS),
            cooldown_retries: self.cooldown_retries.unwrap_or(DEFAULT_COOLDOWN_RETRIES),
            max_running_requests: self.max_running_requests.unwrap_or(DEFAULT_MAX_RUNNING_REQUESTS),
            sweep_interval_ms: self.sweep_interval_ms.unwrap_or(DEFAULT_SWEEP_INTERVAL_MS),
            cooldown_drain_max: DEFAULT_COOLDOWN_DRAIN_MAX,
            cache_local_requests: self.cache_local_requests,
        }
    }
}

/// Configuration of the scheduler and its request starter.
#[derive(Clone)]
pub struct SchedulerConfig {
    pub(crate) priority_policy: PriorityPolicy,
    pub(crate) cooldown_time_ms: u64,
    pub(crate) cooldown_retries: u32,
    pub(crate) max_running_requests: usize,
    pub(crate) sweep_interval_ms: u64,
    pub(crate) cooldown_drain_max: usize,
    pub(crate) cache_local_requests: bool,
}

impl SchedulerConfig {
    /// Starts a new [`SchedulerConfigBuilder`].
    pub fn build() -> SchedulerConfigBuilder {
        SchedulerConfigBuilder::new()
    }

    /// Returns the priority selection policy.
    pub fn priority_policy(&self) -> PriorityPolicy {
        self.priority_policy
    }

    /// Returns the per-key cooldown duration, in milliseconds.
    pub fn cooldown_time_ms(&self) -> u64 {
        self.cooldown_time_ms
    }

    /// Returns how many consecutive failures trigger a cooldown.
    pub fn cooldown_retries(&self) -> u32 {
        self.cooldown_retries
    }

    /// Returns the cap on concurrently running network requests.
    pub fn max_running_requests(&self) -> usize {
        self.max_running_requests
    }

    /// Returns the interval of the cooldown sweep, in milliseconds.
    pub fn sweep_interval_ms(&self) -> u64 {
        self.sweep_interval_ms
    }

    /// Returns whether successfully fetched blocks are cached locally.
    pub fn cache_local_requests(&self) -> bool {
        self.cache_local_requests
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfigBuilder::new().finish()
    }
}
