//! Topology Configurator
//!
//! Derives the full static layout of a pool from its configuration. This is
//! a pure function: no I/O and no randomness.

use std::ops::Range;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::PoolConfig;
use crate::error::{Error, Result};

/// Drive identifier, an index in `[0, total_drives)`
pub type DriveId = usize;

// =============================================================================
// Drive
// =============================================================================

/// Role a drive plays in the layout
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DriveRole {
    Data,
    LocalParity,
    GlobalParity,
    Spare,
}

impl std::fmt::Display for DriveRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriveRole::Data => write!(f, "Data"),
            DriveRole::LocalParity => write!(f, "Local Parity"),
            DriveRole::GlobalParity => write!(f, "Global Parity"),
            DriveRole::Spare => write!(f, "Hot Spare"),
        }
    }
}

/// Static metadata of one drive
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Drive {
    pub id: DriveId,
    pub role: DriveRole,
    /// Owning fault domain
    pub domain: usize,
    /// Group index within the domain. Set for data drives and for local
    /// parity drives that protect a group.
    pub group: Option<usize>,
    /// Global parity slot (0 = plain, 1 = weighted)
    pub global_slot: Option<usize>,
}

// =============================================================================
// Local Group / Fault Domain
// =============================================================================

/// A subset of a domain's data drives protected by one local parity drive
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocalGroup {
    pub domain: usize,
    pub index: usize,
    pub data_drives: Vec<DriveId>,
    /// `None` marks a protection gap
    pub parity_drive: Option<DriveId>,
}

impl LocalGroup {
    /// True if the group has no local parity drive
    pub fn is_unprotected(&self) -> bool {
        self.parity_drive.is_none()
    }

    pub fn contains(&self, drive_id: DriveId) -> bool {
        self.data_drives.contains(&drive_id)
    }
}

/// A contiguous slice of drive IDs with its own groups, parity and spares
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FaultDomain {
    pub id: usize,
    pub name: String,
    pub drive_range: Range<DriveId>,
    pub data_drives: Vec<DriveId>,
    pub groups: Vec<LocalGroup>,
    pub local_parity_drives: Vec<DriveId>,
    pub global_parity_drives: Vec<DriveId>,
    pub spare_drives: Vec<DriveId>,
}

impl FaultDomain {
    pub fn contains(&self, drive_id: DriveId) -> bool {
        self.drive_range.contains(&drive_id)
    }

    pub fn drives(&self) -> Range<DriveId> {
        self.drive_range.clone()
    }
}

// =============================================================================
// Topology
// =============================================================================

/// Immutable layout of a pool
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Topology {
    drives: Vec<Drive>,
    domains: Vec<FaultDomain>,
    chunk_size: usize,
    drive_capacity: usize,
}

impl Topology {
    /// Build the topology described by `config`.
    pub fn build(config: &PoolConfig) -> Result<Self> {
        config.validate()?;

        let mut drives = Vec::with_capacity(config.total_drives);
        let mut domains = Vec::with_capacity(config.domain_count);

        for domain_id in 0..config.domain_count {
            let base = domain_id * config.drives_per_domain;
            let mut cursor = base;
            let mut take = |count: usize| {
                let range = cursor..cursor + count;
                cursor += count;
                range.collect::<Vec<DriveId>>()
            };

            let data_drives = take(config.data_per_domain);
            let local_parity_drives = take(config.local_parity_per_domain);
            let global_parity_drives = take(config.global_parity_per_domain);
            let spare_drives = take(config.spares_per_domain);

            let groups: Vec<LocalGroup> = data_drives
                .chunks(config.local_group_size)
                .enumerate()
                .map(|(index, members)| LocalGroup {
                    domain: domain_id,
                    index,
                    data_drives: members.to_vec(),
                    parity_drive: local_parity_drives.get(index).copied(),
                })
                .collect();

            for group in groups.iter().filter(|g| g.is_unprotected()) {
                warn!(
                    domain = domain_id,
                    group = group.index,
                    drives = ?group.data_drives,
                    "Local group has no parity drive"
                );
            }

            for group in &groups {
                for &id in &group.data_drives {
                    drives.push(Drive {
                        id,
                        role: DriveRole::Data,
                        domain: domain_id,
                        group: Some(group.index),
                        global_slot: None,
                    });
                }
            }
            for (index, &id) in local_parity_drives.iter().enumerate() {
                drives.push(Drive {
                    id,
                    role: DriveRole::LocalParity,
                    domain: domain_id,
                    group: (index < groups.len()).then_some(index),
                    global_slot: None,
                });
            }
            for (slot, &id) in global_parity_drives.iter().enumerate() {
                drives.push(Drive {
                    id,
                    role: DriveRole::GlobalParity,
                    domain: domain_id,
                    group: None,
                    global_slot: Some(slot),
                });
            }
            for &id in &spare_drives {
                drives.push(Drive {
                    id,
                    role: DriveRole::Spare,
                    domain: domain_id,
                    group: None,
                    global_slot: None,
                });
            }

            domains.push(FaultDomain {
                id: domain_id,
                name: format!("Domain-{}", domain_id),
                drive_range: base..base + config.drives_per_domain,
                data_drives,
                groups,
                local_parity_drives,
                global_parity_drives,
                spare_drives,
            });
        }

        if drives.len() != config.total_drives || drives.iter().enumerate().any(|(i, d)| d.id != i)
        {
            return Err(Error::Internal(
                "topology construction did not assign every drive exactly once".to_string(),
            ));
        }

        debug!(
            total_drives = drives.len(),
            domains = domains.len(),
            "Built pool topology"
        );

        Ok(Self {
            drives,
            domains,
            chunk_size: config.chunk_size,
            drive_capacity: config.drive_capacity,
        })
    }

    pub fn total_drives(&self) -> usize {
        self.drives.len()
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn drive_capacity(&self) -> usize {
        self.drive_capacity
    }

    pub fn chunks_per_drive(&self) -> usize {
        self.drive_capacity / self.chunk_size
    }

    pub fn drives(&self) -> &[Drive] {
        &self.drives
    }

    pub fn domains(&self) -> &[FaultDomain] {
        &self.domains
    }

    /// Look up a drive by ID
    pub fn drive(&self, drive_id: DriveId) -> Result<&Drive> {
        self.drives.get(drive_id).ok_or(Error::DriveOutOfRange {
            drive_id,
            total: self.drives.len(),
        })
    }

    /// Look up a fault domain by ID
    pub fn domain(&self, domain_id: usize) -> Result<&FaultDomain> {
        self.domains.get(domain_id).ok_or(Error::DomainOutOfRange {
            domain_id,
            total: self.domains.len(),
        })
    }

    /// The group a data drive belongs to, or the group a local parity
    /// drive protects.
    pub fn group_of(&self, drive_id: DriveId) -> Option<&LocalGroup> {
        let drive = self.drives.get(drive_id)?;
        let group = drive.group?;
        self.domains.get(drive.domain)?.groups.get(group)
    }

    /// All data drives in domain order
    pub fn data_drives(&self) -> impl Iterator<Item = DriveId> + '_ {
        self.domains.iter().flat_map(|d| d.data_drives.iter().copied())
    }

    /// All spare drives in domain order
    pub fn spare_drives(&self) -> impl Iterator<Item = DriveId> + '_ {
        self.domains
            .iter()
            .flat_map(|d| d.spare_drives.iter().copied())
    }

    /// Groups that have no local parity drive
    pub fn unprotected_groups(&self) -> impl Iterator<Item = &LocalGroup> + '_ {
        self.domains
            .iter()
            .flat_map(|d| d.groups.iter())
            .filter(|g| g.is_unprotected())
    }

    /// Number of drives with the given role
    pub fn count_role(&self, role: DriveRole) -> usize {
        self.drives.iter().filter(|d| d.role == role).count()
    }
}
