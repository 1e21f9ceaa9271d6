// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use tokio::sync::Semaphore;

/// Gates CPU- and memory-heavy jobs behind a concurrency cap and a byte
/// budget.
///
/// Jobs whose working set exceeds the whole budget are clamped to it, so a
/// single oversized job still runs (alone) instead of failing.
pub struct MemoryLimitedRunner {
    jobs: Arc<Semaphore>,
    memory: Arc<Semaphore>,
    budget_units: u32,
}

// Budget permits are counted in KiB so that budgets beyond u32::MAX bytes fit
// a semaphore's u32 acquire count.
const UNIT: usize = 1024;

impl MemoryLimitedRunner {
    /// Creates a new runner with at most `max_jobs` concurrent jobs and a
    /// working-set budget of `byte_budget` bytes.
    pub fn new(max_jobs: usize, byte_budget: usize) -> Self {
        let budget_units = (byte_budget / UNIT).max(1) as u32;

        Self {
            jobs: Arc::new(Semaphore::new(max_jobs)),
            memory: Arc::new(Semaphore::new(budget_units as usize)),
            budget_units,
        }
    }

    /// Runs a blocking job whose working set is `bytes` bytes, waiting for
    /// budget first.
    pub async fn run<F, T>(&self, bytes: usize, job: F) -> T
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let units = (((bytes + UNIT - 1) / UNIT) as u32).clamp(1, self.budget_units);

        let _job_permit = self.jobs.clone().acquire_owned().await.expect("job semaphore closed");
        let _memory_permit = self
            .memory
            .clone()
            .acquire_many_owned(units)
            .await
            .expect("memory semaphore closed");

        tokio::task::spawn_blocking(job).await.expect("job panicked")
    }
}
