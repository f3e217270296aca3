//! File-Backed Block Store
//!
//! Implements the `BlockStore` port with one fixed-size file per drive
//! (`drive_000.data`, `drive_001.data`, ...) under a pool directory.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::{debug, info, instrument};

use crate::domain::ports::BlockStore;
use crate::error::{Error, Result};
use crate::layout::DriveId;

/// Drives stored as files in a directory
#[derive(Debug, Clone)]
pub struct FileBlockStore {
    root: PathBuf,
    drive_count: usize,
    capacity: u64,
}

impl FileBlockStore {
    /// Create (or reset) `drive_count` zero-filled drive files under `root`.
    #[instrument(skip(root))]
    pub fn create(root: impl AsRef<Path>, drive_count: usize, capacity: u64) -> Result<Self> {
        let store = Self {
            root: root.as_ref().to_path_buf(),
            drive_count,
            capacity,
        };
        fs::create_dir_all(&store.root)?;
        for drive_id in 0..drive_count {
            store.zero_fill(drive_id)?;
        }
        info!(
            "Initialized {} drives of {} bytes under {}",
            drive_count,
            capacity,
            store.root.display()
        );
        Ok(store)
    }

    /// Open an existing pool directory.
    pub fn open(root: impl AsRef<Path>, drive_count: usize, capacity: u64) -> Result<Self> {
        let store = Self {
            root: root.as_ref().to_path_buf(),
            drive_count,
            capacity,
        };
        for drive_id in 0..drive_count {
            let path = store.drive_path(drive_id);
            if !path.exists() {
                return Err(Error::BlockStore {
                    drive_id,
                    reason: format!("missing drive file {}", path.display()),
                });
            }
        }
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the file backing `drive_id`
    pub fn drive_path(&self, drive_id: DriveId) -> PathBuf {
        self.root.join(format!("drive_{:03}.data", drive_id))
    }

    fn check_range(&self, drive_id: DriveId, offset: u64, len: usize) -> Result<()> {
        if drive_id >= self.drive_count {
            return Err(Error::DriveOutOfRange {
                drive_id,
                total: self.drive_count,
            });
        }
        if offset + len as u64 > self.capacity {
            return Err(Error::BlockStore {
                drive_id,
                reason: format!(
                    "access of {} bytes at offset {} exceeds capacity {}",
                    len, offset, self.capacity
                ),
            });
        }
        Ok(())
    }

    fn open_drive(&self, drive_id: DriveId, writable: bool) -> Result<File> {
        OpenOptions::new()
            .read(true)
            .write(writable)
            .open(self.drive_path(drive_id))
            .map_err(|e| Error::BlockStore {
                drive_id,
                reason: e.to_string(),
            })
    }
}

impl BlockStore for FileBlockStore {
    fn read(&self, drive_id: DriveId, offset: u64, len: usize) -> Result<Bytes> {
        self.check_range(drive_id, offset, len)?;
        let mut file = self.open_drive(drive_id, false)?;
        file.seek(SeekFrom::Start(offset))?;

        // Short files read back zero-padded
        let mut buf = Vec::with_capacity(len);
        file.take(len as u64).read_to_end(&mut buf)?;
        buf.resize(len, 0);
        Ok(Bytes::from(buf))
    }

    fn write(&self, drive_id: DriveId, offset: u64, data: &[u8]) -> Result<()> {
        self.check_range(drive_id, offset, data.len())?;
        let mut file = self.open_drive(drive_id, true)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        Ok(())
    }

    fn zero_fill(&self, drive_id: DriveId) -> Result<()> {
        self.check_range(drive_id, 0, 0)?;
        let file = File::create(self.drive_path(drive_id))?;
        file.set_len(self.capacity)?;
        debug!("Zero-filled drive {}", drive_id);
        Ok(())
    }

    fn capacity(&self) -> u64 {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("drivestor-{}-{}", tag, uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_create_write_read() {
        let root = temp_root("file-store");
        let store = FileBlockStore::create(&root, 3, 128).unwrap();

        assert_eq!(fs::metadata(store.drive_path(2)).unwrap().len(), 128);
        assert!(store.drive_path(2).ends_with("drive_002.data"));

        store.write(1, 64, b"chunk").unwrap();
        assert_eq!(&store.read(1, 64, 5).unwrap()[..], b"chunk");
        assert_eq!(store.read_all(1).unwrap().len(), 128);

        store.zero_fill(1).unwrap();
        assert!(store.read_all(1).unwrap().iter().all(|&b| b == 0));

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_open_requires_all_drive_files() {
        let root = temp_root("file-open");
        FileBlockStore::create(&root, 2, 64).unwrap();

        assert!(FileBlockStore::open(&root, 2, 64).is_ok());
        assert!(matches!(
            FileBlockStore::open(&root, 3, 64),
            Err(Error::BlockStore { drive_id: 2, .. })
        ));

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_rejects_out_of_bounds() {
        let root = temp_root("file-bounds");
        let store = FileBlockStore::create(&root, 1, 32).unwrap();

        assert!(store.write(0, 30, b"abc").is_err());
        assert!(store.read(1, 0, 1).is_err());

        fs::remove_dir_all(&root).unwrap();
    }
}
