// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::BucketError;

use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::Path,
    sync::Mutex,
};

/// Fixed-size storage with positioned reads and writes.
///
/// Implementations take a short internal lock per operation; the lock is
/// never held across callbacks.
pub trait RandomAccess: Send + Sync {
    /// Returns the size, in bytes.
    fn len(&self) -> u64;

    /// Whether the storage is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads exactly `buf.len()` bytes starting at `offset`.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), BucketError>;

    /// Writes all of `data` starting at `offset`.
    fn write_at(&self, offset: u64, data: &[u8]) -> Result<(), BucketError>;

    /// Flushes outstanding writes to the underlying medium.
    fn sync(&self) -> Result<(), BucketError>;
}

/// File-backed random access storage.
pub struct FileAccess {
    file: Mutex<File>,
    len: u64,
}

impl FileAccess {
    /// Creates a file of exactly `size` bytes, truncating an existing one.
    pub fn create(path: &Path, size: u64) -> Result<Self, BucketError> {
        let file = OpenOptions::new().create(true).truncate(true).read(true).write(true).open(path)?;
        file.set_len(size)?;

        Ok(Self {
            file: Mutex::new(file),
            len: size,
        })
    }

    /// Opens an existing file without touching its content.
    pub fn open(path: &Path) -> Result<Self, BucketError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();

        Ok(Self {
            file: Mutex::new(file),
            len,
        })
    }
}

impl RandomAccess for FileAccess {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), BucketError> {
        if offset + buf.len() as u64 > self.len {
            return Err(BucketError::OutOfBounds {
                offset,
                length: buf.len(),
                size: self.len,
            });
        }

        let mut file = self.file.lock().expect("poisoned access lock");
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;

        Ok(())
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> Result<(), BucketError> {
        if offset + data.len() as u64 > self.len {
            return Err(BucketError::OutOfBounds {
                offset,
                length: data.len(),
                size: self.len,
            });
        }

        let mut file = self.file.lock().expect("poisoned access lock");
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;

        Ok(())
    }

    fn sync(&self) -> Result<(), BucketError> {
        self.file.lock().expect("poisoned access lock").sync_data()?;
        Ok(())
    }
}

/// Memory-backed random access storage, for tests.
pub struct MemoryAccess {
    bytes: Mutex<Vec<u8>>,
}

impl MemoryAccess {
    /// Creates a zeroed storage of `size` bytes.
    pub fn new(size: u64) -> Self {
        Self {
            bytes: Mutex::new(vec![0u8; size as usize]),
        }
    }
}

impl RandomAccess for MemoryAccess {
    fn len(&self) -> u64 {
        self.bytes.lock().expect("poisoned access lock").len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), BucketError> {
        let bytes = self.bytes.lock().expect("poisoned access lock");

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

    fn write_at(&self, offset: u64, data: &[u8]) -> Result<(), BucketError> {
        let mut bytes = self.bytes.lock().expect("poisoned access lock");

        if offset + data.len() as u64 > bytes.len() as u64 {
            return Err(BucketError::OutOfBounds {
                offset,
                length: data.len(),
                size: bytes.len() as u64,
            });
        }

        let start = offset as usize;
        bytes[start..start + data.len()].copy_from_slice(data);

        Ok(())
    }

    fn sync(&self) -> Result<(), BucketError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_access_round_trip() {
        let access = MemoryAccess::new(16);
        access.write_at(4, b"abcd").unwrap();

        let mut buf = [0u8; 4];
        access.read_at(4, &mut buf).unwrap();
        assert_eq!(&buf, b"abcd");
    }

    #[test]
    fn out_of_bounds_rejected() {
        let access = MemoryAccess::new(8);

        assert!(matches!(
            access.write_at(6, b"abcd"),
            Err(BucketError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn file_access_round_trip() {
        let path = std::env::temp_dir().join(format!("nectar-file-access-test-{}.bin", std::process::id()));
        let access = FileAccess::create(&path, 32).unwrap();

        access.write_at(0, b"0123").unwrap();
        access.write_at(28, b"4567").unwrap();

        let mut buf = [0u8; 4];
        access.read_at(28, &mut buf).unwrap();
        assert_eq!(&buf, b"4567");

        drop(access);
        std::fs::remove_file(&path).unwrap();
    }
}
