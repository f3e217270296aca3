//! Storage Pool
//!
//! The facade over topology, block store and engines. The pool owns the
//! only mutable state: drive status, mode and the manifest of the last
//! write.
//!
//! # Locking
//!
//! ```text
//! write / rebuild / recompute_parity   io_lock.write()   exclusive
//! check / read_back / parity preview   io_lock.read()    shared
//! set_online / set_mode                status/mode locks only
//! ```
//!
//! Every pass copies the status table into a [`StatusSnapshot`] when it
//! starts, so status toggles made while it runs do not change the drives
//! it uses.

mod manifest;

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{LoggingEventPublisher, MemoryBlockStore};
use crate::config::{PoolConfig, PoolMode};
use crate::domain::events::PoolEvent;
use crate::domain::ports::{BlockStore, EventPublisher, ProgressReporter};
use crate::ec::{
    pack_files, pad_to_chunk, unpack_files, HaParityLayout, IntegrityAnalyzer, IntegrityReport,
    NamedBlob, ParityEngine, RebuildReport, RecoveryEngine, StripePlan, Striper,
    VulnerabilityPolicy,
};
use crate::error::{Error, Result};
use crate::layout::{DriveId, StatusSnapshot, Topology};
use crate::metrics::PoolMetrics;

pub use manifest::{DriveInfo, PoolState, StorageStats, WriteManifest};

/// Bytes shown by [`StoragePool::drive_head`]
const HEAD_BYTES: usize = 4;

/// A multi-level erasure-coded drive pool
pub struct StoragePool {
    id: Uuid,
    config: PoolConfig,
    topology: Arc<Topology>,
    store: Arc<dyn BlockStore>,
    status: RwLock<StatusSnapshot>,
    mode: RwLock<PoolMode>,
    manifest: RwLock<Option<WriteManifest>>,
    io_lock: RwLock<()>,
    events: Arc<dyn EventPublisher>,
    metrics: PoolMetrics,
}

impl std::fmt::Debug for StoragePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoragePool")
            .field("id", &self.id)
            .field("total_drives", &self.topology.total_drives())
            .field("mode", &*self.mode.read())
            .field("offline", &self.status.read().offline_count())
            .finish()
    }
}

impl StoragePool {
    /// Build a pool over `store`, every drive online.
    pub fn new(config: PoolConfig, store: Arc<dyn BlockStore>) -> Result<Self> {
        let topology = Topology::build(&config)?;

        if store.capacity() != config.drive_capacity as u64 {
            return Err(Error::Configuration(format!(
                "block store capacity {} does not match drive_capacity {}",
                store.capacity(),
                config.drive_capacity
            )));
        }

        let status = StatusSnapshot::all_online(topology.total_drives());
        let pool = Self {
            id: Uuid::new_v4(),
            mode: RwLock::new(config.mode),
            config,
            topology: Arc::new(topology),
            store,
            status: RwLock::new(status),
            manifest: RwLock::new(None),
            io_lock: RwLock::new(()),
            events: Arc::new(LoggingEventPublisher::debug_level()),
            metrics: PoolMetrics::new()?,
        };

        info!(
            "Created pool {} with {} drives in {} domains ({} mode)",
            pool.id,
            pool.topology.total_drives(),
            pool.topology.domains().len(),
            pool.config.mode
        );
        Ok(pool)
    }

    /// Pool over a sparse in-memory store sized from `config`.
    pub fn in_memory(config: PoolConfig) -> Result<Self> {
        let store = MemoryBlockStore::new(config.total_drives, config.drive_capacity);
        Self::new(config, Arc::new(store))
    }

    /// Reopen a pool from persisted state.
    pub fn restore(state: PoolState, store: Arc<dyn BlockStore>) -> Result<Self> {
        if state.status.len() != state.config.total_drives {
            return Err(Error::Configuration(format!(
                "saved status covers {} drives, config has {}",
                state.status.len(),
                state.config.total_drives
            )));
        }

        let mut pool = Self::new(state.config, store)?;
        pool.id = state.pool_id;
        pool.metrics
            .offline_drives
            .set(state.status.offline_count() as i64);
        *pool.status.get_mut() = state.status;
        *pool.mode.get_mut() = state.mode;
        *pool.manifest.get_mut() = state.manifest;
        Ok(pool)
    }

    /// Replace the event publisher.
    pub fn with_events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = events;
        self
    }

    /// Snapshot of everything [`restore`](Self::restore) needs
    pub fn export_state(&self) -> PoolState {
        PoolState {
            pool_id: self.id,
            config: self.config.clone(),
            status: self.snapshot(),
            mode: self.mode(),
            manifest: self.manifest(),
            saved_at: Utc::now(),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn store(&self) -> &Arc<dyn BlockStore> {
        &self.store
    }

    pub fn metrics(&self) -> &PoolMetrics {
        &self.metrics
    }

    pub fn manifest(&self) -> Option<WriteManifest> {
        self.manifest.read().clone()
    }

    pub fn mode(&self) -> PoolMode {
        *self.mode.read()
    }

    /// Takes effect from the next write.
    pub fn set_mode(&self, mode: PoolMode) {
        let mut current = self.mode.write();
        if *current != mode {
            info!("Pool mode {} -> {}", *current, mode);
            *current = mode;
        }
    }

    /// Copy of the current status table
    pub fn snapshot(&self) -> StatusSnapshot {
        self.status.read().clone()
    }

    pub fn is_online(&self, drive_id: DriveId) -> bool {
        self.status.read().is_online(drive_id)
    }

    // =========================================================================
    // Status
    // =========================================================================

    /// Mark one drive online or offline. Drive contents are not touched.
    pub fn set_online(&self, drive_id: DriveId, online: bool) -> Result<()> {
        self.topology.drive(drive_id)?;

        let changed = {
            let mut status = self.status.write();
            let changed = status.is_online(drive_id) != online;
            status.set(drive_id, online);
            self.metrics.offline_drives.set(status.offline_count() as i64);
            changed
        };

        if changed {
            info!(
                "Drive {} {}",
                drive_id,
                if online { "online" } else { "offline" }
            );
            self.events
                .publish(PoolEvent::drive_status_changed(drive_id, online));
        }
        Ok(())
    }

    /// Flip one drive. Returns the new state.
    pub fn toggle(&self, drive_id: DriveId) -> Result<bool> {
        let online = !self.is_online(drive_id);
        self.set_online(drive_id, online)?;
        Ok(online)
    }

    /// Mark every drive of a fault domain online or offline.
    pub fn set_domain_online(&self, domain_id: usize, online: bool) -> Result<()> {
        let drives = self.topology.domain(domain_id)?.drives();

        {
            let mut status = self.status.write();
            for drive_id in drives {
                status.set(drive_id, online);
            }
            self.metrics.offline_drives.set(status.offline_count() as i64);
        }

        info!(
            "Domain {} {}",
            domain_id,
            if online { "online" } else { "offline" }
        );
        self.events
            .publish(PoolEvent::domain_status_changed(domain_id, online));
        Ok(())
    }

    // =========================================================================
    // Write Path
    // =========================================================================

    /// Stripe a raw payload onto the pool.
    pub fn write(&self, payload: &[u8], progress: &dyn ProgressReporter) -> Result<WriteManifest> {
        self.write_payload(payload.to_vec(), Vec::new(), progress)
    }

    /// Pack named files behind their headers and stripe them.
    pub fn write_files(
        &self,
        files: &[NamedBlob],
        progress: &dyn ProgressReporter,
    ) -> Result<WriteManifest> {
        let packed = pack_files(files)?;
        let names = files.iter().map(|f| f.name.clone()).collect();
        self.write_payload(packed, names, progress)
    }

    #[instrument(skip(self, buffer, files, progress), fields(pool = %self.id, bytes = buffer.len()))]
    fn write_payload(
        &self,
        mut buffer: Vec<u8>,
        files: Vec<String>,
        progress: &dyn ProgressReporter,
    ) -> Result<WriteManifest> {
        let _io = self.io_lock.write();
        let started = Instant::now();
        let status = self.snapshot();
        let mode = self.mode();
        let payload_len = buffer.len() as u64;

        pad_to_chunk(&mut buffer, self.topology.chunk_size());
        let plan = StripePlan::for_mode(
            mode,
            &self.topology,
            &status,
            &self.config.ha,
            buffer.len(),
        )?;

        let striper = Striper::new(&self.topology, self.store.as_ref(), progress);
        striper.write(&plan, &buffer)?;

        let parity = ParityEngine::new(&self.topology, self.store.as_ref(), &status, progress);
        let parity_drives = match mode {
            PoolMode::Normal => {
                let written = parity.recompute_all(plan.slots_used)?;
                striper.zero_spares()?;
                written
            }
            PoolMode::Ha => {
                // Drives outside the selection keep older data, so fold
                // every slot before HA parity takes over its drives.
                let written = parity.recompute_all(self.topology.chunks_per_drive())?;
                written + parity.ha_parity(&plan.drives, plan.slots_used)?.len()
            }
        };

        self.metrics.bytes_written.inc_by(payload_len);
        self.metrics.chunks_striped.inc_by(plan.num_chunks as u64);
        self.metrics
            .parity_drives_computed
            .inc_by(parity_drives as u64);

        info!(
            "Wrote {} bytes in {} mode over {} drives, {} parity drives updated",
            payload_len,
            mode,
            plan.drives.len(),
            parity_drives
        );
        self.events.publish(PoolEvent::data_written(
            mode,
            payload_len,
            plan.drives.len(),
            started.elapsed(),
        ));

        let manifest = WriteManifest {
            plan,
            payload_len,
            files,
            written_at: Utc::now(),
        };
        *self.manifest.write() = Some(manifest.clone());
        Ok(manifest)
    }

    /// Recompute every local and global parity drive over the full drive
    /// capacity, then HA parity if the last write was in HA mode. Returns
    /// the number of parity drives written.
    #[instrument(skip(self, progress), fields(pool = %self.id))]
    pub fn recompute_parity(&self, progress: &dyn ProgressReporter) -> Result<usize> {
        let _io = self.io_lock.write();
        let status = self.snapshot();
        let parity = ParityEngine::new(&self.topology, self.store.as_ref(), &status, progress);
        let mut written = parity.recompute_all(self.topology.chunks_per_drive())?;
        if let Some(manifest) = self.manifest().filter(|m| m.mode() == PoolMode::Ha) {
            written += parity
                .ha_parity(&manifest.plan.drives, manifest.plan.slots_used)?
                .len();
        }
        self.metrics.parity_drives_computed.inc_by(written as u64);
        Ok(written)
    }

    /// Local parity a group would hold right now, computed without writing.
    pub fn preview_local_parity(&self, domain_id: usize, group: usize) -> Result<Vec<u8>> {
        let _io = self.io_lock.read();
        let status = self.snapshot();
        let group = self
            .topology
            .domain(domain_id)?
            .groups
            .get(group)
            .ok_or_else(|| {
                Error::Configuration(format!("domain {} has no group {}", domain_id, group))
            })?;
        ParityEngine::new(
            &self.topology,
            self.store.as_ref(),
            &status,
            &crate::domain::ports::NoProgress,
        )
        .preview_local_parity(group, self.topology.chunks_per_drive())
    }

    // =========================================================================
    // Recovery
    // =========================================================================

    /// Rebuild `targets` and set them to `bring_online` afterward. The
    /// whole request is refused before any write if a data target cannot
    /// be reconstructed.
    #[instrument(skip(self, targets, progress), fields(pool = %self.id, targets = targets.len()))]
    pub fn rebuild(
        &self,
        targets: &[DriveId],
        bring_online: bool,
        progress: &dyn ProgressReporter,
    ) -> Result<RebuildReport> {
        let _io = self.io_lock.write();
        let status = self.snapshot();
        let ha_layout = self.ha_layout();
        let engine = RecoveryEngine::new(&self.topology, self.store.as_ref(), &status, progress)
            .with_ha_parity(ha_layout.as_ref());

        let plan = match engine.plan(targets, bring_online) {
            Ok(plan) => plan,
            Err(err) => {
                if let Error::InsufficientRedundancy { drive_id, reason } = &err {
                    warn!("Rebuild of drive {} refused: {}", drive_id, reason);
                    self.metrics.rebuild_rejections.inc();
                    self.events
                        .publish(PoolEvent::rebuild_rejected(*drive_id, reason.clone()));
                }
                return Err(err);
            }
        };

        let report = engine.execute(&plan)?;

        for entry in &report.entries {
            self.set_online(entry.drive_id, bring_online)?;
            self.events.publish(PoolEvent::drive_rebuilt(
                entry.drive_id,
                entry.strategy.name(),
                entry.sources.len(),
            ));
        }
        self.metrics
            .drives_rebuilt
            .inc_by(report.entries.len() as u64);
        Ok(report)
    }

    // =========================================================================
    // Integrity
    // =========================================================================

    /// Integrity check with the configured policy.
    pub fn check(&self) -> IntegrityReport {
        self.check_with_policy(self.config.vulnerability_policy)
    }

    pub fn check_with_policy(&self, policy: VulnerabilityPolicy) -> IntegrityReport {
        let _io = self.io_lock.read();
        let status = self.snapshot();
        let report = IntegrityAnalyzer::new(&self.topology, policy).check(&status);

        if !report.recoverable {
            warn!("{}", report.summary);
            self.events.publish(PoolEvent::integrity_at_risk(
                report.vulnerable_domains.clone(),
                report.offline_drives,
            ));
        }
        report
    }

    /// Integrity as if every drive of `domain_id` were offline. Real
    /// status is not changed.
    pub fn what_if_domain_failure(&self, domain_id: usize) -> Result<IntegrityReport> {
        let drives = self.topology.domain(domain_id)?.drives();
        let _io = self.io_lock.read();

        let mut status = self.snapshot();
        for drive_id in drives {
            status.set(drive_id, false);
        }
        Ok(IntegrityAnalyzer::new(&self.topology, self.config.vulnerability_policy).check(&status))
    }

    // =========================================================================
    // Read Path / Introspection
    // =========================================================================

    /// Capacity in the current mode
    pub fn stats(&self) -> StorageStats {
        let status = self.snapshot();
        let mode = self.mode();
        let capacity = self.topology.drive_capacity() as u64;

        let drives = match mode {
            PoolMode::Ha => self.config.ha.stripe_width,
            PoolMode::Normal => self.topology.data_drives().count(),
        };
        let total_bytes = drives as u64 * capacity;
        let used_bytes = self
            .manifest
            .read()
            .as_ref()
            .map_or(0, |m| m.payload_len);

        StorageStats {
            mode,
            total_bytes,
            used_bytes,
            available_bytes: total_bytes.saturating_sub(used_bytes),
            online_data_drives: self
                .topology
                .data_drives()
                .filter(|&id| status.is_online(id))
                .count(),
            offline_drives: status.offline_count(),
        }
    }

    /// Reassemble the payload of the last write. Offline drives are
    /// reconstructed in memory from local parity.
    #[instrument(skip(self), fields(pool = %self.id))]
    pub fn read_back(&self) -> Result<Vec<u8>> {
        let _io = self.io_lock.read();
        let manifest = self.manifest().ok_or(Error::ManifestMissing)?;
        let status = self.snapshot();
        let engine = RecoveryEngine::new(
            &self.topology,
            self.store.as_ref(),
            &status,
            &crate::domain::ports::NoProgress,
        );
        let ha_layout = self.ha_layout();

        let mut payload = manifest.plan.gather(|drive_id| {
            if status.is_online(drive_id) {
                return Ok(self.store.read_all(drive_id)?.to_vec());
            }
            warn!("Drive {} offline, serving degraded read", drive_id);
            match &ha_layout {
                None => engine.reconstruct_data(drive_id),
                Some(layout) => {
                    let (parity_drive, members) =
                        layout.local_for(drive_id).ok_or_else(|| {
                            Error::InsufficientRedundancy {
                                drive_id,
                                reason: "no HA parity covers this drive".to_string(),
                            }
                        })?;
                    engine.reconstruct_from(drive_id, parity_drive, members)
                }
            }
        })?;

        payload.truncate(manifest.payload_len as usize);
        Ok(payload)
    }

    /// Where HA parity lives, when the last write was in HA mode
    fn ha_layout(&self) -> Option<HaParityLayout> {
        self.manifest
            .read()
            .as_ref()
            .filter(|m| m.mode() == PoolMode::Ha)
            .map(|m| HaParityLayout::for_selection(&self.topology, &m.plan.drives))
    }

    /// Files of the last packed write
    pub fn read_files(&self) -> Result<Vec<NamedBlob>> {
        unpack_files(&self.read_back()?)
    }

    pub fn drive_info(&self, drive_id: DriveId) -> Result<DriveInfo> {
        let drive = self.topology.drive(drive_id)?;
        Ok(DriveInfo {
            id: drive.id,
            role: drive.role,
            domain: drive.domain,
            group: drive.group,
            global_slot: drive.global_slot,
            online: self.is_online(drive_id),
            head: self.drive_head(drive_id)?,
        })
    }

    /// First bytes of a drive as lowercase hex
    pub fn drive_head(&self, drive_id: DriveId) -> Result<String> {
        self.topology.drive(drive_id)?;
        let len = HEAD_BYTES.min(self.topology.drive_capacity());
        let head = self.store.read(drive_id, 0, len)?;
        Ok(head.iter().map(|b| format!("{:02x}", b)).collect())
    }
}
