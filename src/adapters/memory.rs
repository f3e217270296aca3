//! In-Memory Block Store
//!
//! Implements the `BlockStore` port with one sparse buffer per drive.
//! Drives that have never been written read back as zeros and consume no
//! memory, so large layouts stay cheap in tests.

use bytes::Bytes;
use dashmap::DashMap;

use crate::domain::ports::BlockStore;
use crate::error::{Error, Result};
use crate::layout::DriveId;

/// Memory-backed drives
#[derive(Debug)]
pub struct MemoryBlockStore {
    drives: DashMap<DriveId, Vec<u8>>,
    drive_count: usize,
    capacity: usize,
}

impl MemoryBlockStore {
    /// Create `drive_count` zeroed drives of `capacity` bytes each.
    pub fn new(drive_count: usize, capacity: usize) -> Self {
        Self {
            drives: DashMap::new(),
            drive_count,
            capacity,
        }
    }

    /// Number of drives that currently hold a materialized buffer.
    pub fn materialized_drives(&self) -> usize {
        self.drives.len()
    }

    fn check_range(&self, drive_id: DriveId, offset: u64, len: usize) -> Result<usize> {
        if drive_id >= self.drive_count {
            return Err(Error::DriveOutOfRange {
                drive_id,
                total: self.drive_count,
            });
        }
        let start = offset as usize;
        if start + len > self.capacity {
            return Err(Error::BlockStore {
                drive_id,
                reason: format!(
                    "access of {} bytes at offset {} exceeds capacity {}",
                    len, offset, self.capacity
                ),
            });
        }
        Ok(start)
    }
}

impl BlockStore for MemoryBlockStore {
    fn read(&self, drive_id: DriveId, offset: u64, len: usize) -> Result<Bytes> {
        let start = self.check_range(drive_id, offset, len)?;
        match self.drives.get(&drive_id) {
            Some(buf) => Ok(Bytes::copy_from_slice(&buf[start..start + len])),
            None => Ok(Bytes::from(vec![0u8; len])),
        }
    }

    fn write(&self, drive_id: DriveId, offset: u64, data: &[u8]) -> Result<()> {
        let start = self.check_range(drive_id, offset, data.len())?;
        let mut buf = self
            .drives
            .entry(drive_id)
            .or_insert_with(|| vec![0u8; self.capacity]);
        buf[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn zero_fill(&self, drive_id: DriveId) -> Result<()> {
        self.check_range(drive_id, 0, 0)?;
        self.drives.remove(&drive_id);
        Ok(())
    }

    fn capacity(&self) -> u64 {
        self.capacity as u64
    }
}
