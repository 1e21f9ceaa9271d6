// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use thiserror::Error;

/// Error occurring when using buckets or random access storage.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BucketError {
    /// An I/O error happened.
    #[error("I/O error happened: {0}")]
    Io(#[from] std::io::Error),
    /// The bucket has already been freed.
    #[error("Bucket already freed")]
    Freed,
    /// A read or write is out of the bucket's bounds.
    #[error("Access out of bounds: offset {offset}, length {length}, size {size}")]
    OutOfBounds {
        /// Requested offset.
        offset: u64,
        /// Requested length.
        length: usize,
        /// Current size.
        size: u64,
    },
}

/// An append-only byte store with random-access reads, freed explicitly.
pub trait Bucket: Send + Sync {
    /// Returns the current size, in bytes.
    fn size(&self) -> u64;

    /// Appends bytes at the end.
    fn append(&self, bytes: &[u8]) -> Result<(), BucketError>;

    /// Reads exactly `buf.len()` bytes starting at `offset`.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), BucketError>;

    /// Reads the whole content. Callers are expected to have bounded the size
    /// beforehand.
    fn read_all(&self) -> Result<Vec<u8>, BucketError> {
        let mut buf = vec![0u8; self.size() as usize];
        self.read_at(0, &mut buf)?;
        Ok(buf)
    }

    /// Releases the underlying storage. Further operations fail with
    /// [`BucketError::Freed`].
    fn free(&self);
}

/// A bucket held entirely in memory.
pub struct MemoryBucket {
    bytes: Mutex<Option<Vec<u8>>>,
}

impl MemoryBucket {
    /// Creates a new, empty [`MemoryBucket`].
    pub fn new() -> Self {
        Self {
            bytes: Mutex::new(Some(Vec::new())),
        }
    }
}

impl Default for MemoryBucket {
    fn default() -> Self {
        Self::new()
    }
}

impl Bucket for MemoryBucket {
    fn size(&self) -> u64 {
        self.bytes.lock().expect("poisoned bucket lock").as_ref().map_or(0, |b| b.len() as u64)
    }

    fn append(&self, bytes: &[u8]) -> Result<(), BucketError> {
        let mut guard = self.bytes.lock().expect("poisoned bucket lock");
        guard.as_mut().ok_or(BucketError::Freed)?.extend_from_slice(bytes);
        Ok(())
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), BucketError> {
        let guard = self.bytes.lock().expect("poisoned bucket lock");
        let bytes = guard.as_ref().ok_or(BucketError::Freed)?;

        if offset + buf.len() as u64 > bytes.len() as u64 {
            return Err(BucketError::OutOfBounds {
                offset,
                length: buf.len(),
                size: bytes.len() as u64,
            });
        }

        let start = offset as usize;
        buf.copy_from_slice(&bytes[start..start + buf.len()]);
        Ok(())
    }

    fn free(&self) {
        self.bytes.lock().expect("poisoned bucket lock").take();
    }
}

/// A bucket backed by a temporary file, deleted on free.
pub struct FileBucket {
    path: PathBuf,
    file: Mutex<Option<File>>,
    size: AtomicU64,
}

impl FileBucket {
    /// Creates a new [`FileBucket`] at the given path.
    pub fn create(path: PathBuf) -> Result<Self, BucketError> {
        let file = OpenOptions::new().create_new(true).read(true).write(true).open(&path)?;

        Ok(Self {
            path,
            file: Mutex::new(Some(file)),
            size: AtomicU64::new(0),
        })
    }
}

impl Bucket for FileBucket {
    fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    fn append(&self, bytes: &[u8]) -> Result<(), BucketError> {
        let mut guard = self.file.lock().expect("poisoned bucket lock");
        let file = guard.as_mut().ok_or(BucketError::Freed)?;

        file.seek(SeekFrom::End(0))?;
        file.write_all(bytes)?;
        self.size.fetch_add(bytes.len() as u64, Ordering::AcqRel);

        Ok(())
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), BucketError> {
        let size = self.size();
        if offset + buf.len() as u64 > size {
            return Err(BucketError::OutOfBounds {
                offset,
                length: buf.len(),
                size,
            });
        }

        let mut guard = self.file.lock().expect("poisoned bucket lock");
        let file = guard.as_mut().ok_or(BucketError::Freed)?;

        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;

        Ok(())
    }

    fn free(&self) {
        if self.file.lock().expect("poisoned bucket lock").take().is_some() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                log::warn!("Removing freed bucket {} failed: {}.", self.path.display(), e);
            }
        }
    }
}

impl Drop for FileBucket {
    fn drop(&mut self) {
        self.free();
    }
}

/// Creates buckets and random access storage, choosing memory or disk by a
/// size threshold.
pub struct BucketFactory {
    temp_dir: PathBuf,
    memory_threshold: u64,
    counter: AtomicU64,
}

impl BucketFactory {
    /// The default size, in bytes, above which buckets go to disk.
    pub const DEFAULT_MEMORY_THRESHOLD: u64 = 1024 * 1024;

    /// Creates a new [`BucketFactory`] writing temporary files under `temp_dir`.
    pub fn new(temp_dir: PathBuf, memory_threshold: Option<u64>) -> Self {
        Self {
            temp_dir,
            memory_threshold: memory_threshold.unwrap_or(Self::DEFAULT_MEMORY_THRESHOLD),
            counter: AtomicU64::new(0),
        }
    }

    fn next_path(&self, suffix: &str) -> PathBuf {
        let n = self.counter.fetch_add(1, Ordering::AcqRel);
        self.temp_dir
            .join(format!("nectar-{}-{}-{}.tmp", suffix, std::process::id(), n))
    }

    /// Creates a bucket sized for `hint_size` bytes.
    pub fn make_bucket(&self, hint_size: u64) -> Result<Arc<dyn Bucket>, BucketError> {
        if hint_size <= self.memory_threshold {
            Ok(Arc::new(MemoryBucket::new()))
        } else {
            Ok(Arc::new(FileBucket::create(self.next_path("bucket"))?))
        }
    }

    /// Creates a fixed-size random access file of `size` bytes.
    pub fn make_random_access(&self, size: u64) -> Result<Arc<dyn super::RandomAccess>, BucketError> {
        Ok(Arc::new(super::FileAccess::create(&self.next_path("raf"), size)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_bucket_append_read() {
        let bucket = MemoryBucket::new();
        bucket.append(b"hello ").unwrap();
        bucket.append(b"world").unwrap();

        assert_eq!(bucket.size(), 11);
        assert_eq!(bucket.read_all().unwrap(), b"hello world");

        let mut buf = [0u8; 5];
        bucket.read_at(6, &mut buf).unwrap();
        assert_eq!(&buf, b"world");
    }

    #[test]
    fn memory_bucket_freed() {
        let bucket = MemoryBucket::new();
        bucket.append(b"data").unwrap();
        bucket.free();

        assert!(matches!(bucket.append(b"more"), Err(BucketError::Freed)));
        assert_eq!(bucket.size(), 0);
    }

    #[test]
    fn file_bucket_round_trip() {
        let dir = std::env::temp_dir();
        let factory = BucketFactory::new(dir, Some(0));
        let bucket = factory.make_bucket(16).unwrap();

        bucket.append(b"on disk").unwrap();
        assert_eq!(bucket.read_all().unwrap(), b"on disk");

        bucket.free();
        assert!(matches!(bucket.append(b"x"), Err(BucketError::Freed)));
    }
}
