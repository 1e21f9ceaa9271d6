// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

use nectar_runtime::RandomAccess;

use tokio::sync::{mpsc, oneshot};

use std::sync::Arc;

/// Identifies what a queued write updates, for coalescing.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum JobTag {
    Block { segment: usize, slot: usize },
    SegmentStatus(usize),
    SegmentBloom(usize),
    MainBloom,
    GeneralProgress,
    Tail,
}

pub(crate) enum Job {
    Write {
        tag: JobTag,
        offset: u64,
        bytes: Vec<u8>,
    },
    // Resolves once every previously queued write has hit the file.
    Barrier(oneshot::Sender<()>),
    // Final flush; runs the closure after syncing, then stops the worker.
    Shutdown(Option<Box<dyn FnOnce() + Send>>),
}

/// The single writer of a store file's metadata regions.
///
/// Every mutation that must be visible after a restart goes through this
/// queue and is applied serially by one task; a queued write superseded by a
/// newer write of the same region is dropped instead of applied twice.
pub struct Persister {
    tx: mpsc::UnboundedSender<Job>,
}

impl Persister {
    /// Spawns the persister task over `file`.
    pub fn spawn(file: Arc<dyn RandomAccess>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(run(file, rx));

        Self { tx }
    }

    pub(crate) fn submit(&self, tag: JobTag, offset: u64, bytes: Vec<u8>) {
        if self.tx.send(Job::Write { tag, offset, bytes }).is_err() {
            log::warn!("Persister is gone, dropping write.");
        }
    }

    /// Resolves once every write queued before the call has been applied.
    pub async fn barrier(&self) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(Job::Barrier(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Flushes outstanding writes, runs `after` (used to defer freeing
    /// buckets until in-flight jobs observe a consistent state), and stops
    /// the worker.
    pub fn shutdown(&self, after: Option<Box<dyn FnOnce() + Send>>) {
        let _ = self.tx.send(Job::Shutdown(after));
    }
}

async fn run(file: Arc<dyn RandomAccess>, mut rx: mpsc::UnboundedReceiver<Job>) {
    log::debug!("Running store persister.");

    let mut queue: Vec<(JobTag, u64, Vec<u8>)> = Vec::new();

    while let Some(job) = rx.recv().await {
        match job {
            Job::Write { tag, offset, bytes } => {
                queue.retain(|(queued, _, _)| *queued != tag);
                queue.push((tag, offset, bytes));

                // Drain whatever else is immediately available so adjacent
                // writes of the same region fuse before hitting the disk.
                while let Ok(job) = rx.try_recv() {
                    match job {
                        Job::Write { tag, offset, bytes } => {
                            queue.retain(|(queued, _, _)| *queued != tag);
                            queue.push((tag, offset, bytes));
                        }
                        Job::Barrier(done) => {
                            flush(&*file, &mut queue);
                            let _ = done.send(());
                        }
                        Job::Shutdown(after) => {
                            finish(&*file, &mut queue, after);
                            return;
                        }
                    }
                }

                flush(&*file, &mut queue);
            }
            Job::Barrier(done) => {
                flush(&*file, &mut queue);
                let _ = done.send(());
            }
            Job::Shutdown(after) => {
                finish(&*file, &mut queue, after);
                return;
            }
        }
    }

    log::debug!("Stopping store persister.");
}

fn flush(file: &dyn RandomAccess, queue: &mut Vec<(JobTag, u64, Vec<u8>)>) {
    for (tag, offset, bytes) in queue.drain(..) {
        if let Err(e) = file.write_at(offset, &bytes) {
            log::error!("Persisting {:?} at {} failed: {}.", tag, offset, e);
        }
    }
}

fn finish(file: &dyn RandomAccess, queue: &mut Vec<(JobTag, u64, Vec<u8>)>, after: Option<Box<dyn FnOnce() + Send>>) {
    flush(file, queue);
    if let Err(e) = file.sync() {
        log::error!("Syncing store file failed: {}.", e);
    }
    if let Some(after) = after {
        after();
    }
    log::debug!("Stopping store persister.");
}

#[cfg(test)]
mod tests {
    use super::*;

    use nectar_runtime::MemoryAccess;

    #[tokio::test]
    async fn writes_reach_the_file_in_order() {
        let file = Arc::new(MemoryAccess::new(64));
        let persister = Persister::spawn(file.clone());

        persister.submit(JobTag::GeneralProgress, 0, vec![1, 2, 3, 4]);
        persister.submit(JobTag::MainBloom, 8, vec![9, 9]);
        persister.barrier().await;

        let mut buf = [0u8; 4];
        file.read_at(0, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);

        let mut buf = [0u8; 2];
        file.read_at(8, &mut buf).unwrap();
        assert_eq!(buf, [9, 9]);
    }

    #[tokio::test]
    async fn same_tag_coalesces_to_latest() {
        let file = Arc::new(MemoryAccess::new(16));
        let persister = Persister::spawn(file.clone());

        // Both writes land in the queue before the worker wakes; only the
        // newer must be applied.
        persister.submit(JobTag::SegmentStatus(0), 0, vec![0xaa]);
        persister.submit(JobTag::SegmentStatus(0), 0, vec![0xbb]);
        persister.barrier().await;

        let mut buf = [0u8; 1];
        file.read_at(0, &mut buf).unwrap();
        assert_eq!(buf, [0xbb]);
    }

    #[tokio::test]
    async fn shutdown_runs_deferred_action() {
        let file = Arc::new(MemoryAccess::new(16));
        let persister = Persister::spawn(file.clone());
        let (tx, rx) = oneshot::channel();

        persister.submit(JobTag::Tail, 4, vec![7]);
        persister.shutdown(Some(Box::new(move || {
            let _ = tx.send(());
        })));

        rx.await.unwrap();

        let mut buf = [0u8; 1];
        file.read_at(4, &mut buf).unwrap();
        assert_eq!(buf, [7]);
    }
}
