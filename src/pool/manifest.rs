//! Pool records: the manifest of the last write, persisted pool state and
//! the derived views handed to presentation layers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{PoolConfig, PoolMode};
use crate::ec::StripePlan;
use crate::layout::{DriveId, DriveRole, StatusSnapshot};

/// Where the last write put its chunks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteManifest {
    pub plan: StripePlan,
    /// Bytes before chunk padding
    pub payload_len: u64,
    /// Names of packed files, empty for raw writes
    pub files: Vec<String>,
    pub written_at: DateTime<Utc>,
}

impl WriteManifest {
    pub fn mode(&self) -> PoolMode {
        self.plan.mode
    }

    pub fn is_packed(&self) -> bool {
        !self.files.is_empty()
    }
}

/// Everything needed to reopen a pool over an existing block store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolState {
    pub pool_id: Uuid,
    pub config: PoolConfig,
    pub status: StatusSnapshot,
    pub mode: PoolMode,
    #[serde(default)]
    pub manifest: Option<WriteManifest>,
    pub saved_at: DateTime<Utc>,
}

/// Capacity summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStats {
    pub mode: PoolMode,
    /// HA: stripe width x capacity. Normal: every data drive x capacity.
    pub total_bytes: u64,
    /// Payload bytes of the last write
    pub used_bytes: u64,
    pub available_bytes: u64,
    pub online_data_drives: usize,
    pub offline_drives: usize,
}

/// One drive as shown to a presentation layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveInfo {
    pub id: DriveId,
    pub role: DriveRole,
    pub domain: usize,
    pub group: Option<usize>,
    pub global_slot: Option<usize>,
    pub online: bool,
    /// First bytes of the drive in hex
    pub head: String,
}
