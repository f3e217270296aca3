//! Recovery Engine
//!
//! Rebuilds offline drives from their surviving peers and serves degraded
//! reads of data drives without writing anything.
//!
//! A rebuild runs in two passes. Planning checks every target against the
//! status snapshot taken when the pass started and rejects the whole
//! request with `InsufficientRedundancy` if a target cannot be restored
//! exactly. Execution restores data drives first, then recomputes parity
//! over them. Nothing is written unless every target passed planning.
//!
//! | Role          | Strategy                                          |
//! |---------------|---------------------------------------------------|
//! | Data          | local parity XOR surviving group peers            |
//! | Local parity  | recompute parity of the protected group           |
//! | Global parity | recompute the domain slot (plain or weighted)     |
//! | Spare         | nothing to restore                                |
//!
//! After an HA write some local and global parity drives hold HA stripe
//! parity instead. Selected drives are then rebuilt from that parity, HA
//! parity drives are recomputed over the selection, and data drives whose
//! group parity was taken over are refused.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::domain::ports::{BlockStore, ProgressReporter};
use crate::ec::parity::{xor_into, HaParityLayout, ParityEngine};
use crate::error::{Error, Result};
use crate::layout::{DriveId, DriveRole, StatusSnapshot, Topology};

// =============================================================================
// Rebuild Plan / Report
// =============================================================================

/// How a target drive is restored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RebuildStrategy {
    /// XOR of the group's parity drive and its online data drives
    DataViaLocalParity { parity_drive: DriveId },
    /// XOR of an HA parity drive and the other selected drives it covers
    DataViaHaParity { parity_drive: DriveId },
    /// Recompute the parity of one local group
    LocalParityRecompute { domain: usize, group: usize },
    /// Recompute one global parity slot of a domain
    GlobalParityRecompute { domain: usize, slot: usize },
    /// Recompute HA stripe parity over the selected drives
    HaParityRecompute,
    /// Spares and unassigned parity drives hold nothing to restore
    NoContent,
}

impl RebuildStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            RebuildStrategy::DataViaLocalParity { .. } => "DataViaLocalParity",
            RebuildStrategy::DataViaHaParity { .. } => "DataViaHaParity",
            RebuildStrategy::LocalParityRecompute { .. } => "LocalParityRecompute",
            RebuildStrategy::GlobalParityRecompute { .. } => "GlobalParityRecompute",
            RebuildStrategy::HaParityRecompute => "HaParityRecompute",
            RebuildStrategy::NoContent => "NoContent",
        }
    }
}

/// One planned target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildTask {
    pub drive_id: DriveId,
    pub role: DriveRole,
    pub strategy: RebuildStrategy,
}

/// Output of the planning pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildPlan {
    pub tasks: Vec<RebuildTask>,
    /// Targets that were already online
    pub skipped: Vec<DriveId>,
    pub bring_online: bool,
}

/// One executed target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildEntry {
    pub drive_id: DriveId,
    pub role: DriveRole,
    pub strategy: RebuildStrategy,
    /// Drives read to restore this target
    pub sources: Vec<DriveId>,
}

impl std::fmt::Display for RebuildEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.strategy {
            RebuildStrategy::DataViaLocalParity { parity_drive } => write!(
                f,
                "Drive {} ({}): rebuilt from local parity drive {} and {} peers",
                self.drive_id,
                self.role,
                parity_drive,
                self.sources.len().saturating_sub(1)
            ),
            RebuildStrategy::DataViaHaParity { parity_drive } => write!(
                f,
                "Drive {} ({}): rebuilt from HA parity drive {} and {} selected drives",
                self.drive_id,
                self.role,
                parity_drive,
                self.sources.len().saturating_sub(1)
            ),
            RebuildStrategy::HaParityRecompute => write!(
                f,
                "Drive {} ({}): recomputed HA parity from {} selected drives",
                self.drive_id,
                self.role,
                self.sources.len()
            ),
            RebuildStrategy::LocalParityRecompute { domain, group } => write!(
                f,
                "Drive {} ({}): recomputed parity of domain {} group {} from {} drives",
                self.drive_id,
                self.role,
                domain,
                group,
                self.sources.len()
            ),
            RebuildStrategy::GlobalParityRecompute { domain, slot } => write!(
                f,
                "Drive {} ({}): recomputed slot {} of domain {} from {} drives",
                self.drive_id,
                self.role,
                slot,
                domain,
                self.sources.len()
            ),
            RebuildStrategy::NoContent => {
                write!(f, "Drive {} ({}): no content to restore", self.drive_id, self.role)
            }
        }
    }
}

/// Result of a rebuild
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildReport {
    /// Every drive read during the rebuild, de-duplicated
    pub drives_read: BTreeSet<DriveId>,
    pub entries: Vec<RebuildEntry>,
    pub skipped: Vec<DriveId>,
}

impl RebuildReport {
    /// Human-readable line per rebuilt drive
    pub fn info_lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self.entries.iter().map(|e| e.to_string()).collect();
        lines.extend(
            self.skipped
                .iter()
                .map(|id| format!("Drive {}: already online, skipped", id)),
        );
        lines
    }

    pub fn rebuilt_drives(&self) -> Vec<DriveId> {
        self.entries.iter().map(|e| e.drive_id).collect()
    }
}

// =============================================================================
// Recovery Engine
// =============================================================================

/// Rebuilds drives against a status snapshot
pub struct RecoveryEngine<'a> {
    topology: &'a Topology,
    store: &'a dyn BlockStore,
    status: &'a StatusSnapshot,
    progress: &'a dyn ProgressReporter,
    ha_parity: Option<&'a HaParityLayout>,
}

impl<'a> RecoveryEngine<'a> {
    pub fn new(
        topology: &'a Topology,
        store: &'a dyn BlockStore,
        status: &'a StatusSnapshot,
        progress: &'a dyn ProgressReporter,
    ) -> Self {
        Self {
            topology,
            store,
            status,
            progress,
            ha_parity: None,
        }
    }

    /// Parity layout left by the last HA write, if any.
    pub fn with_ha_parity(mut self, layout: Option<&'a HaParityLayout>) -> Self {
        self.ha_parity = layout;
        self
    }

    /// Check every target and choose a strategy. Fails on the first target
    /// that cannot be restored exactly; nothing is written.
    #[instrument(skip(self, targets), fields(targets = targets.len()))]
    pub fn plan(&self, targets: &[DriveId], bring_online: bool) -> Result<RebuildPlan> {
        let mut plan = RebuildPlan {
            bring_online,
            ..Default::default()
        };
        let mut seen = BTreeSet::new();

        // Data targets restored before any parity is folded
        let mut restored = BTreeSet::new();
        for &drive_id in targets {
            let drive = self.topology.drive(drive_id)?;
            if drive.role == DriveRole::Data && !self.status.is_online(drive_id) {
                restored.insert(drive_id);
            }
        }

        for &drive_id in targets {
            let drive = self.topology.drive(drive_id)?;
            if !seen.insert(drive_id) {
                continue;
            }
            if self.status.is_online(drive_id) {
                debug!("Drive {} already online, skipping", drive_id);
                plan.skipped.push(drive_id);
                continue;
            }

            let ha_members = self.ha_parity.and_then(|layout| layout.members_of(drive_id));
            let strategy = match (drive.role, ha_members) {
                (DriveRole::Data, _) => self.data_strategy(drive_id)?,
                (DriveRole::LocalParity, Some(members)) => {
                    self.check_parity_target(drive_id, members, &restored)?;
                    RebuildStrategy::HaParityRecompute
                }
                (DriveRole::GlobalParity, Some(_)) => RebuildStrategy::HaParityRecompute,
                (DriveRole::LocalParity, None) => match drive.group {
                    Some(group) => {
                        let members = self
                            .topology
                            .domain(drive.domain)?
                            .groups
                            .get(group)
                            .map(|g| g.data_drives.as_slice())
                            .unwrap_or_default();
                        self.check_parity_target(drive_id, members, &restored)?;
                        RebuildStrategy::LocalParityRecompute {
                            domain: drive.domain,
                            group,
                        }
                    }
                    None => {
                        warn!("Local parity drive {} protects no group", drive_id);
                        RebuildStrategy::NoContent
                    }
                },
                (DriveRole::GlobalParity, None) => RebuildStrategy::GlobalParityRecompute {
                    domain: drive.domain,
                    slot: drive.global_slot.unwrap_or(0),
                },
                (DriveRole::Spare, _) => RebuildStrategy::NoContent,
            };

            plan.tasks.push(RebuildTask {
                drive_id,
                role: drive.role,
                strategy,
            });
        }

        // Data first, so parity recomputed in the same pass folds it in.
        plan.tasks.sort_by_key(|task| task.role != DriveRole::Data);
        Ok(plan)
    }

    fn data_strategy(&self, drive_id: DriveId) -> Result<RebuildStrategy> {
        let Some(layout) = self.ha_parity else {
            let parity_drive = self.check_data_target(drive_id, self.status)?;
            return Ok(RebuildStrategy::DataViaLocalParity { parity_drive });
        };

        let group_parity = self.topology.group_of(drive_id).and_then(|g| g.parity_drive);
        match group_parity.filter(|&p| layout.holds_parity(p)) {
            None => {
                let parity_drive = self.check_data_target(drive_id, self.status)?;
                Ok(RebuildStrategy::DataViaLocalParity { parity_drive })
            }
            Some(taken) => {
                let (parity_drive, members) = layout.local_for(drive_id).ok_or_else(|| {
                    Error::InsufficientRedundancy {
                        drive_id,
                        reason: format!("local parity drive {} holds HA stripe parity", taken),
                    }
                })?;
                self.check_sources(drive_id, parity_drive, members)?;
                Ok(RebuildStrategy::DataViaHaParity { parity_drive })
            }
        }
    }

    /// Returns the group's parity drive if `drive_id` can be rebuilt.
    fn check_data_target(&self, drive_id: DriveId, status: &StatusSnapshot) -> Result<DriveId> {
        let reject = |reason: String| Error::InsufficientRedundancy { drive_id, reason };

        let group = self
            .topology
            .group_of(drive_id)
            .ok_or_else(|| reject("drive belongs to no local group".to_string()))?;
        let parity_drive = group.parity_drive.ok_or_else(|| {
            reject(format!(
                "group {} of domain {} has no local parity drive",
                group.index, group.domain
            ))
        })?;
        if !status.is_online(parity_drive) {
            return Err(reject(format!(
                "local parity drive {} is offline",
                parity_drive
            )));
        }

        let other_offline: Vec<DriveId> = group
            .data_drives
            .iter()
            .copied()
            .filter(|&peer| peer != drive_id && !status.is_online(peer))
            .collect();
        if !other_offline.is_empty() {
            return Err(reject(format!(
                "group {} of domain {} has other offline data drives {:?}",
                group.index, group.domain, other_offline
            )));
        }

        Ok(parity_drive)
    }

    /// Every source for rebuilding `drive_id` must be online.
    fn check_sources(
        &self,
        drive_id: DriveId,
        parity_drive: DriveId,
        peers: &[DriveId],
    ) -> Result<()> {
        let down = std::iter::once(parity_drive)
            .chain(peers.iter().copied().filter(|&peer| peer != drive_id))
            .find(|&id| !self.status.is_online(id));
        match down {
            Some(down) => Err(Error::InsufficientRedundancy {
                drive_id,
                reason: format!("source drive {} is offline", down),
            }),
            None => Ok(()),
        }
    }

    /// A parity drive folded while one of its data drives is offline would
    /// leave that drive unrecoverable.
    fn check_parity_target(
        &self,
        parity_drive: DriveId,
        members: &[DriveId],
        restored: &BTreeSet<DriveId>,
    ) -> Result<()> {
        let missing: Vec<DriveId> = members
            .iter()
            .copied()
            .filter(|id| !self.status.is_online(*id) && !restored.contains(id))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        Err(Error::InsufficientRedundancy {
            drive_id: parity_drive,
            reason: format!("protected data drives {:?} are offline", missing),
        })
    }

    /// Write every planned target in order.
    #[instrument(skip(self, plan), fields(tasks = plan.tasks.len()))]
    pub fn execute(&self, plan: &RebuildPlan) -> Result<RebuildReport> {
        let mut working = self.status.clone();
        let mut report = RebuildReport {
            skipped: plan.skipped.clone(),
            ..Default::default()
        };
        let chunks = self.topology.chunks_per_drive();

        for task in &plan.tasks {
            let parity = ParityEngine::new(self.topology, self.store, &working, self.progress);

            let sources = match task.strategy {
                RebuildStrategy::DataViaLocalParity { parity_drive } => {
                    let group = self.topology.group_of(task.drive_id).ok_or_else(|| {
                        Error::Internal(format!("drive {} lost its group", task.drive_id))
                    })?;
                    let mut sources = vec![parity_drive];
                    sources.extend(
                        group
                            .data_drives
                            .iter()
                            .copied()
                            .filter(|&peer| peer != task.drive_id && working.is_online(peer)),
                    );
                    let bytes = self.xor_drives(&sources)?;
                    parity.write_padded(task.drive_id, bytes)?;
                    sources
                }
                RebuildStrategy::DataViaHaParity { parity_drive } => {
                    let members = self.ha_layout()?.members_of(parity_drive).ok_or_else(|| {
                        Error::Internal(format!("drive {} holds no HA parity", parity_drive))
                    })?;
                    let mut sources = vec![parity_drive];
                    sources.extend(
                        members
                            .iter()
                            .copied()
                            .filter(|&peer| peer != task.drive_id && working.is_online(peer)),
                    );
                    let bytes = self.xor_drives(&sources)?;
                    parity.write_padded(task.drive_id, bytes)?;
                    sources
                }
                RebuildStrategy::HaParityRecompute => {
                    parity.ha_parity_drive(self.ha_layout()?, task.drive_id, chunks)?
                }
                RebuildStrategy::LocalParityRecompute { domain, group } => {
                    let group = self
                        .topology
                        .domain(domain)?
                        .groups
                        .get(group)
                        .ok_or_else(|| {
                            Error::Internal(format!("domain {} has no group {}", domain, group))
                        })?;
                    parity.local_parity(group, chunks)?
                }
                RebuildStrategy::GlobalParityRecompute { domain, slot } => {
                    parity.global_parity(self.topology.domain(domain)?, slot, chunks)?
                }
                RebuildStrategy::NoContent => {
                    self.progress
                        .drive_processed(task.drive_id, self.topology.total_drives());
                    Vec::new()
                }
            };

            debug!(
                "Rebuilt drive {} via {} from {} sources",
                task.drive_id,
                task.strategy.name(),
                sources.len()
            );
            report.drives_read.extend(sources.iter().copied());
            report.entries.push(RebuildEntry {
                drive_id: task.drive_id,
                role: task.role,
                strategy: task.strategy,
                sources,
            });
            // Restored bytes are valid fold sources even if the drive
            // stays offline afterward.
            working.set(task.drive_id, true);
        }

        info!(
            "Rebuild finished: {} drives restored, {} drives read",
            report.entries.len(),
            report.drives_read.len()
        );
        Ok(report)
    }

    fn ha_layout(&self) -> Result<&'a HaParityLayout> {
        self.ha_parity
            .ok_or_else(|| Error::Internal("HA strategy planned without an HA layout".to_string()))
    }

    /// Plan then execute.
    pub fn rebuild(&self, targets: &[DriveId], bring_online: bool) -> Result<RebuildReport> {
        let plan = self.plan(targets, bring_online)?;
        self.execute(&plan)
    }

    /// Contents of an offline data drive, reconstructed in memory from its
    /// local group.
    pub fn reconstruct_data(&self, drive_id: DriveId) -> Result<Vec<u8>> {
        let parity_drive = self.check_data_target(drive_id, self.status)?;
        let group = self
            .topology
            .group_of(drive_id)
            .ok_or_else(|| Error::Internal(format!("drive {} lost its group", drive_id)))?;
        let peers: Vec<DriveId> = group
            .data_drives
            .iter()
            .copied()
            .filter(|&peer| peer != drive_id)
            .collect();
        self.reconstruct_from(drive_id, parity_drive, &peers)
    }

    /// Contents of `drive_id` as `parity_drive` XOR `peers`. Every source
    /// must be online.
    pub fn reconstruct_from(
        &self,
        drive_id: DriveId,
        parity_drive: DriveId,
        peers: &[DriveId],
    ) -> Result<Vec<u8>> {
        self.check_sources(drive_id, parity_drive, peers)?;

        let mut sources = Vec::with_capacity(peers.len() + 1);
        sources.push(parity_drive);
        sources.extend(peers.iter().copied().filter(|&peer| peer != drive_id));
        self.xor_drives(&sources)
    }

    fn xor_drives(&self, sources: &[DriveId]) -> Result<Vec<u8>> {
        let mut acc = vec![0u8; self.topology.drive_capacity()];
        for &id in sources {
            xor_into(&mut acc, &self.store.read_all(id)?);
        }
        Ok(acc)
    }
}
