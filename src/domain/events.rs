//! Pool Events
//!
//! Immutable records of significant occurrences in a pool: drive status
//! changes, completed writes and rebuilds, and integrity verdicts. Events
//! are published through the [`EventPublisher`](super::ports::EventPublisher)
//! port for audit logging and test inspection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::PoolMode;
use crate::layout::DriveId;

/// Event representing a significant occurrence in a pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum PoolEvent {
    // =========================================================================
    // Drive Events
    // =========================================================================
    /// A drive changed status.
    DriveStatusChanged {
        drive_id: DriveId,
        online: bool,
        timestamp: DateTime<Utc>,
    },

    /// Every drive of a fault domain changed status.
    DomainStatusChanged {
        domain_id: usize,
        online: bool,
        timestamp: DateTime<Utc>,
    },

    // =========================================================================
    // Data Path Events
    // =========================================================================
    /// A payload was striped onto the pool.
    DataWritten {
        mode: PoolMode,
        payload_bytes: u64,
        data_drives: usize,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A drive was rebuilt from its peers.
    DriveRebuilt {
        drive_id: DriveId,
        strategy: String,
        sources: usize,
        timestamp: DateTime<Utc>,
    },

    /// A rebuild request was refused before any write.
    RebuildRejected {
        drive_id: DriveId,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    // =========================================================================
    // Integrity Events
    // =========================================================================
    /// An integrity check found vulnerable domains.
    IntegrityAtRisk {
        vulnerable_domains: Vec<usize>,
        offline_drives: usize,
        timestamp: DateTime<Utc>,
    },
}

impl PoolEvent {
    /// Get the timestamp of this event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            PoolEvent::DriveStatusChanged { timestamp, .. }
            | PoolEvent::DomainStatusChanged { timestamp, .. }
            | PoolEvent::DataWritten { timestamp, .. }
            | PoolEvent::DriveRebuilt { timestamp, .. }
            | PoolEvent::RebuildRejected { timestamp, .. }
            | PoolEvent::IntegrityAtRisk { timestamp, .. } => *timestamp,
        }
    }

    /// Get the event type as a string.
    pub fn event_type(&self) -> &'static str {
        match self {
            PoolEvent::DriveStatusChanged { .. } => "DriveStatusChanged",
            PoolEvent::DomainStatusChanged { .. } => "DomainStatusChanged",
            PoolEvent::DataWritten { .. } => "DataWritten",
            PoolEvent::DriveRebuilt { .. } => "DriveRebuilt",
            PoolEvent::RebuildRejected { .. } => "RebuildRejected",
            PoolEvent::IntegrityAtRisk { .. } => "IntegrityAtRisk",
        }
    }

    /// Get the drive ID if this is a drive-scoped event.
    pub fn drive_id(&self) -> Option<DriveId> {
        match self {
            PoolEvent::DriveStatusChanged { drive_id, .. }
            | PoolEvent::DriveRebuilt { drive_id, .. }
            | PoolEvent::RebuildRejected { drive_id, .. } => Some(*drive_id),
            _ => None,
        }
    }
}

// =============================================================================
// Event Builders
// =============================================================================

impl PoolEvent {
    pub fn drive_status_changed(drive_id: DriveId, online: bool) -> Self {
        PoolEvent::DriveStatusChanged {
            drive_id,
            online,
            timestamp: Utc::now(),
        }
    }

    pub fn domain_status_changed(domain_id: usize, online: bool) -> Self {
        PoolEvent::DomainStatusChanged {
            domain_id,
            online,
            timestamp: Utc::now(),
        }
    }

    pub fn data_written(
        mode: PoolMode,
        payload_bytes: u64,
        data_drives: usize,
        duration: Duration,
    ) -> Self {
        PoolEvent::DataWritten {
            mode,
            payload_bytes,
            data_drives,
            duration_ms: duration.as_millis() as u64,
            timestamp: Utc::now(),
        }
    }

    pub fn drive_rebuilt(drive_id: DriveId, strategy: impl Into<String>, sources: usize) -> Self {
        PoolEvent::DriveRebuilt {
            drive_id,
            strategy: strategy.into(),
            sources,
            timestamp: Utc::now(),
        }
    }

    pub fn rebuild_rejected(drive_id: DriveId, reason: impl Into<String>) -> Self {
        PoolEvent::RebuildRejected {
            drive_id,
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn integrity_at_risk(vulnerable_domains: Vec<usize>, offline_drives: usize) -> Self {
        PoolEvent::IntegrityAtRisk {
            vulnerable_domains,
            offline_drives,
            timestamp: Utc::now(),
        }
    }
}
