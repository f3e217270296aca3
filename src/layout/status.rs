//! Drive Status Snapshot
//!
//! The online/offline flags of every drive at one instant. Each write,
//! parity pass or rebuild works from a snapshot taken when it starts, so
//! status toggles made while it runs do not change the drive set it uses.

use serde::{Deserialize, Serialize};

use super::DriveId;

/// Online flags indexed by drive ID
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    online: Vec<bool>,
}

impl StatusSnapshot {
    /// Every drive online
    pub fn all_online(total_drives: usize) -> Self {
        Self {
            online: vec![true; total_drives],
        }
    }

    pub fn from_flags(online: Vec<bool>) -> Self {
        Self { online }
    }

    pub fn len(&self) -> usize {
        self.online.len()
    }

    pub fn is_empty(&self) -> bool {
        self.online.is_empty()
    }

    /// Unknown drive IDs are reported offline.
    pub fn is_online(&self, drive_id: DriveId) -> bool {
        self.online.get(drive_id).copied().unwrap_or(false)
    }

    pub fn set(&mut self, drive_id: DriveId, online: bool) {
        if let Some(flag) = self.online.get_mut(drive_id) {
            *flag = online;
        }
    }

    pub fn offline_drives(&self) -> Vec<DriveId> {
        self.online
            .iter()
            .enumerate()
            .filter(|(_, &online)| !online)
            .map(|(id, _)| id)
            .collect()
    }

    pub fn offline_count(&self) -> usize {
        self.online.iter().filter(|&&online| !online).count()
    }

    /// Keep only the drives of `ids` that are online, preserving order.
    pub fn filter_online(&self, ids: &[DriveId]) -> Vec<DriveId> {
        ids.iter().copied().filter(|&id| self.is_online(id)).collect()
    }

    pub fn as_flags(&self) -> &[bool] {
        &self.online
    }
}
