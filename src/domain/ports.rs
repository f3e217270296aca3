//! Domain Ports (Port/Adapter Pattern)
//!
//! This module defines the abstractions the pool engine depends on.
//! Infrastructure adapters implement these traits to provide concrete
//! backing storage, progress sinks and event sinks.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Pool Engine                             │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                    Ports (Traits)                    │    │
//! │  │  BlockStore │ ProgressReporter │ EventPublisher     │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Infrastructure Layer                       │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                  Adapters (Impls)                    │    │
//! │  │  MemoryBlockStore │ FileBlockStore │ LoggingEvents  │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use bytes::Bytes;

use crate::error::Result;
use crate::layout::DriveId;

use super::events::PoolEvent;

// =============================================================================
// Block Store Port
// =============================================================================

/// Port for the fixed-size, addressable drives backing a pool.
///
/// Every drive holds exactly `capacity()` bytes. The engine addresses
/// drives by ID and byte offset and never assumes a persistence mechanism.
pub trait BlockStore: Send + Sync {
    /// Read `len` bytes of `drive_id` starting at `offset`.
    fn read(&self, drive_id: DriveId, offset: u64, len: usize) -> Result<Bytes>;

    /// Write `data` to `drive_id` starting at `offset`.
    fn write(&self, drive_id: DriveId, offset: u64, data: &[u8]) -> Result<()>;

    /// Reset the whole drive to zeros.
    fn zero_fill(&self, drive_id: DriveId) -> Result<()>;

    /// Capacity of every drive, in bytes.
    fn capacity(&self) -> u64;

    /// Read a whole drive.
    fn read_all(&self, drive_id: DriveId) -> Result<Bytes> {
        self.read(drive_id, 0, self.capacity() as usize)
    }
}

// =============================================================================
// Progress Port
// =============================================================================

/// Port notified after each drive is processed during a write, parity
/// pass or rebuild.
///
/// Implementations must return promptly; the engine does not wait on them.
pub trait ProgressReporter: Send + Sync {
    fn drive_processed(&self, drive_id: DriveId, total_drives: usize);
}

impl<F> ProgressReporter for F
where
    F: Fn(DriveId, usize) + Send + Sync,
{
    fn drive_processed(&self, drive_id: DriveId, total_drives: usize) {
        self(drive_id, total_drives)
    }
}

/// Progress reporter that discards every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn drive_processed(&self, _drive_id: DriveId, _total_drives: usize) {}
}

// =============================================================================
// Event Port
// =============================================================================

/// Port for publishing pool events (status changes, writes, rebuilds).
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: PoolEvent);

    fn publish_all(&self, events: Vec<PoolEvent>) {
        for event in events {
            self.publish(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_closure_as_progress_reporter() {
        let calls = AtomicUsize::new(0);
        let reporter = |drive_id: DriveId, total: usize| {
            assert!(drive_id < total);
            calls.fetch_add(1, Ordering::SeqCst);
        };

        reporter.drive_processed(3, 10);
        reporter.drive_processed(9, 10);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        NoProgress.drive_processed(0, 1);
    }
}
