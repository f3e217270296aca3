//! Parity Engine
//!
//! Computes local XOR parity per group and domain-wide global parity over
//! the online data drives, reading from and writing to the block store.
//!
//! Global parity slot 0 is a plain XOR of every online data drive in the
//! domain. Slot 1 first scales each byte by a per-drive weight,
//! `(byte * ((drive_id mod 255) + 1)) mod 256`, so the second parity drive
//! is algebraically distinct from the first. This is a diversity transform,
//! not a Galois-field code.
//!
//! Offline drives are left out of every fold rather than treated as zeros.

use tracing::{debug, instrument, warn};

use crate::domain::ports::{BlockStore, ProgressReporter};
use crate::error::{Error, Result};
use crate::layout::{DriveId, FaultDomain, LocalGroup, StatusSnapshot, Topology};

/// Domains whose first local parity drive holds HA sub-stripe parity
const HA_LOCAL_PARITY_DOMAINS: std::ops::Range<usize> = 0..2;

/// Domains whose first global parity drive holds HA full-stripe parity
const HA_GLOBAL_PARITY_DOMAINS: std::ops::Range<usize> = 2..4;

// =============================================================================
// XOR Primitives
// =============================================================================

/// XOR-fold equally sized chunks. An empty list yields an all-zero chunk.
pub fn xor_parity<T: AsRef<[u8]>>(chunks: &[T], chunk_size: usize) -> Vec<u8> {
    let mut parity = vec![0u8; chunk_size];
    for chunk in chunks {
        xor_into(&mut parity, chunk.as_ref());
    }
    parity
}

/// `acc ^= src` over the common prefix.
pub fn xor_into(acc: &mut [u8], src: &[u8]) {
    for (a, s) in acc.iter_mut().zip(src) {
        *a ^= s;
    }
}

/// Multiplier applied to `drive_id`'s bytes in weighted parity
pub fn drive_weight(drive_id: DriveId) -> u16 {
    (drive_id % 255) as u16 + 1
}

/// `acc ^= (src * weight) mod 256`, computed in `u16` so the product
/// never overflows before the modulo.
pub fn xor_weighted_into(acc: &mut [u8], src: &[u8], drive_id: DriveId) {
    let weight = drive_weight(drive_id);
    for (a, &s) in acc.iter_mut().zip(src) {
        *a ^= ((s as u16 * weight) % 256) as u8;
    }
}

/// How each source drive's bytes enter the fold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Weighting {
    Plain,
    ByDriveId,
}

impl Weighting {
    /// Weighting used by a global parity slot
    pub fn for_global_slot(slot: usize) -> Self {
        if slot == 0 {
            Weighting::Plain
        } else {
            Weighting::ByDriveId
        }
    }
}

// =============================================================================
// HA Parity Layout
// =============================================================================

/// Where HA-mode parity lives for a given drive selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HaParityLayout {
    /// (parity drive, protected selected drives)
    pub local: Vec<(DriveId, Vec<DriveId>)>,
    /// Drives holding XOR of the full selection
    pub global: Vec<DriveId>,
    pub selected: Vec<DriveId>,
}

impl HaParityLayout {
    /// The first local parity drive of domains 0 and 1 each protect one
    /// half of the selection; the first global parity drive of domains 2
    /// and 3 each protect all of it.
    pub fn for_selection(topology: &Topology, selected: &[DriveId]) -> Self {
        let half = selected.len().div_ceil(2);
        let domains = topology.domains();

        let local = HA_LOCAL_PARITY_DOMAINS
            .filter_map(|i| {
                let parity = *domains.get(i)?.local_parity_drives.first()?;
                let start = (i * half).min(selected.len());
                let end = ((i + 1) * half).min(selected.len());
                (start < end).then(|| (parity, selected[start..end].to_vec()))
            })
            .collect();

        let global = HA_GLOBAL_PARITY_DOMAINS
            .filter_map(|i| domains.get(i)?.global_parity_drives.first().copied())
            .collect();

        Self {
            local,
            global,
            selected: selected.to_vec(),
        }
    }

    /// Local parity entry covering `drive_id`
    pub fn local_for(&self, drive_id: DriveId) -> Option<(DriveId, &[DriveId])> {
        self.local
            .iter()
            .find(|(_, members)| members.contains(&drive_id))
            .map(|(parity, members)| (*parity, members.as_slice()))
    }

    /// Selected drives folded into `parity_drive`, if it holds HA parity
    pub fn members_of(&self, parity_drive: DriveId) -> Option<&[DriveId]> {
        if self.global.contains(&parity_drive) {
            return Some(&self.selected);
        }
        self.local
            .iter()
            .find(|(parity, _)| *parity == parity_drive)
            .map(|(_, members)| members.as_slice())
    }

    pub fn holds_parity(&self, drive_id: DriveId) -> bool {
        self.members_of(drive_id).is_some()
    }
}

// =============================================================================
// Parity Engine
// =============================================================================

/// Parity computation over one status snapshot
pub struct ParityEngine<'a> {
    topology: &'a Topology,
    store: &'a dyn BlockStore,
    status: &'a StatusSnapshot,
    progress: &'a dyn ProgressReporter,
}

impl<'a> ParityEngine<'a> {
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
        }
    }

    /// Clamp a chunk count to the drive's slot count.
    fn clamp_chunks(&self, chunks: usize) -> usize {
        chunks.min(self.topology.chunks_per_drive())
    }

    /// XOR-fold the first `chunks` chunk slots of every online drive in
    /// `drives`. Returns the folded bytes and the drives actually read.
    pub fn fold(
        &self,
        drives: &[DriveId],
        chunks: usize,
        weighting: Weighting,
    ) -> Result<(Vec<u8>, Vec<DriveId>)> {
        let len = self.clamp_chunks(chunks) * self.topology.chunk_size();
        let mut acc = vec![0u8; len];
        let mut sources = Vec::with_capacity(drives.len());

        if len == 0 {
            return Ok((acc, sources));
        }

        for &drive_id in drives {
            if !self.status.is_online(drive_id) {
                continue;
            }
            let bytes = self.store.read(drive_id, 0, len)?;
            match weighting {
                Weighting::Plain => xor_into(&mut acc, &bytes),
                Weighting::ByDriveId => xor_weighted_into(&mut acc, &bytes, drive_id),
            }
            sources.push(drive_id);
        }

        Ok((acc, sources))
    }

    /// Write `bytes` at the start of `drive_id`, zero-padded to capacity.
    pub fn write_padded(&self, drive_id: DriveId, mut bytes: Vec<u8>) -> Result<()> {
        bytes.resize(self.topology.drive_capacity(), 0);
        self.store.write(drive_id, 0, &bytes)?;
        self.progress
            .drive_processed(drive_id, self.topology.total_drives());
        Ok(())
    }

    /// Fold the parity of `chunks` slots without writing it anywhere.
    pub fn preview_local_parity(&self, group: &LocalGroup, chunks: usize) -> Result<Vec<u8>> {
        Ok(self.fold(&group.data_drives, chunks, Weighting::Plain)?.0)
    }

    /// Recompute a group's local parity drive. Returns the drives read;
    /// a group without a parity drive is skipped.
    #[instrument(skip(self, group), fields(domain = group.domain, group = group.index))]
    pub fn local_parity(&self, group: &LocalGroup, chunks: usize) -> Result<Vec<DriveId>> {
        let Some(parity_drive) = group.parity_drive else {
            debug!("Group has no parity drive, skipping");
            return Ok(Vec::new());
        };

        let (parity, sources) = self.fold(&group.data_drives, chunks, Weighting::Plain)?;
        self.write_padded(parity_drive, parity)?;

        debug!(
            "Local parity drive {} folded from {} data drives",
            parity_drive,
            sources.len()
        );
        Ok(sources)
    }

    /// Recompute global parity slot `slot` of a domain.
    #[instrument(skip(self, domain), fields(domain = domain.id))]
    pub fn global_parity(
        &self,
        domain: &FaultDomain,
        slot: usize,
        chunks: usize,
    ) -> Result<Vec<DriveId>> {
        let Some(&parity_drive) = domain.global_parity_drives.get(slot) else {
            debug!("Domain has no global parity slot {}, skipping", slot);
            return Ok(Vec::new());
        };

        let weighting = Weighting::for_global_slot(slot);
        let (parity, sources) = self.fold(&domain.data_drives, chunks, weighting)?;
        self.write_padded(parity_drive, parity)?;

        debug!(
            "Global parity drive {} ({:?}) folded from {} data drives",
            parity_drive,
            weighting,
            sources.len()
        );
        Ok(sources)
    }

    /// Recompute every local parity drive, then every global parity slot.
    /// Returns the number of parity drives written.
    #[instrument(skip(self))]
    pub fn recompute_all(&self, chunks: usize) -> Result<usize> {
        let mut written = 0;

        for domain in self.topology.domains() {
            for group in &domain.groups {
                if group.parity_drive.is_some() {
                    self.local_parity(group, chunks)?;
                    written += 1;
                }
            }
        }

        for domain in self.topology.domains() {
            for slot in 0..domain.global_parity_drives.len() {
                self.global_parity(domain, slot, chunks)?;
                written += 1;
            }
        }

        Ok(written)
    }

    /// Write HA-mode parity for `selected` over the first `stripes` slots.
    /// Returns the parity drives written.
    #[instrument(skip(self, selected), fields(selected = selected.len()))]
    pub fn ha_parity(&self, selected: &[DriveId], stripes: usize) -> Result<Vec<DriveId>> {
        let layout = HaParityLayout::for_selection(self.topology, selected);
        if layout.local.is_empty() && layout.global.is_empty() {
            warn!("Pool has no drives to hold HA parity");
        }

        let mut written = Vec::new();
        for (parity_drive, members) in &layout.local {
            let (parity, _) = self.fold(members, stripes, Weighting::Plain)?;
            self.write_padded(*parity_drive, parity)?;
            written.push(*parity_drive);
        }

        if !layout.global.is_empty() {
            let (parity, _) = self.fold(selected, stripes, Weighting::Plain)?;
            for &parity_drive in &layout.global {
                self.write_padded(parity_drive, parity.clone())?;
                written.push(parity_drive);
            }
        }

        Ok(written)
    }

    /// Recompute a single HA parity drive of `layout`. Returns the drives
    /// read.
    pub fn ha_parity_drive(
        &self,
        layout: &HaParityLayout,
        parity_drive: DriveId,
        chunks: usize,
    ) -> Result<Vec<DriveId>> {
        let members = layout.members_of(parity_drive).ok_or_else(|| {
            Error::Internal(format!("drive {} holds no HA parity", parity_drive))
        })?;
        let (parity, sources) = self.fold(members, chunks, Weighting::Plain)?;
        self.write_padded(parity_drive, parity)?;
        debug!(
            "HA parity drive {} folded from {} selected drives",
            parity_drive,
            sources.len()
        );
        Ok(sources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryBlockStore;
    use crate::config::PoolConfig;
    use crate::domain::ports::NoProgress;

    fn small_config() -> PoolConfig {
        PoolConfig {
            total_drives: 20,
            domain_count: 2,
            drives_per_domain: 10,
            data_per_domain: 6,
            local_parity_per_domain: 2,
            global_parity_per_domain: 2,
            spares_per_domain: 0,
            local_group_size: 3,
            chunk_size: 8,
            drive_capacity: 32,
            ..PoolConfig::dbox_484()
        }
    }

    fn fill(store: &MemoryBlockStore, drive_id: DriveId, seed: u8) {
        let bytes: Vec<u8> = (0..32u8).map(|i| i.wrapping_mul(seed).wrapping_add(seed)).collect();
        store.write(drive_id, 0, &bytes).unwrap();
    }

    #[test]
    fn test_xor_parity_identity() {
        let empty: [&[u8]; 0] = [];
        assert_eq!(xor_parity(&empty, 4), vec![0, 0, 0, 0]);

        let a = [0b1010u8, 0xFF, 0x00, 0x11];
        let b = [0b0110u8, 0x0F, 0x00, 0x11];
        assert_eq!(xor_parity(&[a, b], 4), vec![0b1100, 0xF0, 0x00, 0x00]);
        assert_eq!(xor_parity(&[a, b, b], 4), a.to_vec());
    }

    #[test]
    fn test_weighting() {
        assert_eq!(drive_weight(0), 1);
        assert_eq!(drive_weight(254), 255);
        assert_eq!(drive_weight(255), 1);

        let mut acc = [0u8; 3];
        xor_weighted_into(&mut acc, &[1, 2, 200], 2);
        // weight 3: 3, 6, 600 mod 256 = 88
        assert_eq!(acc, [3, 6, 88]);

        assert_eq!(Weighting::for_global_slot(0), Weighting::Plain);
        assert_eq!(Weighting::for_global_slot(1), Weighting::ByDriveId);
    }

    #[test]
    fn test_local_parity_excludes_offline_drives() {
        let topology = Topology::build(&small_config()).unwrap();
        let store = MemoryBlockStore::new(20, 32);
        for id in 0..6 {
            fill(&store, id, id as u8 + 1);
        }

        let mut status = StatusSnapshot::all_online(20);
        status.set(1, false);
        let engine = ParityEngine::new(&topology, &store, &status, &NoProgress);

        let group = &topology.domain(0).unwrap().groups[0];
        let sources = engine.local_parity(group, 4).unwrap();
        assert_eq!(sources, vec![0, 2]);

        let expected = xor_parity(
            &[store.read_all(0).unwrap(), store.read_all(2).unwrap()],
            32,
        );
        assert_eq!(&store.read_all(6).unwrap()[..], &expected[..]);
    }

    #[test]
    fn test_global_parity_slots() {
        let topology = Topology::build(&small_config()).unwrap();
        let store = MemoryBlockStore::new(20, 32);
        for id in 0..6 {
            fill(&store, id, id as u8 + 3);
        }
        let status = StatusSnapshot::all_online(20);
        let engine = ParityEngine::new(&topology, &store, &status, &NoProgress);
        let domain = topology.domain(0).unwrap();

        engine.global_parity(domain, 0, 4).unwrap();
        engine.global_parity(domain, 1, 4).unwrap();

        let mut plain = vec![0u8; 32];
        let mut weighted = vec![0u8; 32];
        for id in 0..6 {
            let bytes = store.read_all(id).unwrap();
            xor_into(&mut plain, &bytes);
            xor_weighted_into(&mut weighted, &bytes, id);
        }
        assert_eq!(&store.read_all(8).unwrap()[..], &plain[..]);
        assert_eq!(&store.read_all(9).unwrap()[..], &weighted[..]);
        assert_ne!(plain, weighted);
    }

    #[test]
    fn test_fold_is_bounded_and_padded() {
        let topology = Topology::build(&small_config()).unwrap();
        let store = MemoryBlockStore::new(20, 32);
        fill(&store, 0, 9);
        let status = StatusSnapshot::all_online(20);
        let engine = ParityEngine::new(&topology, &store, &status, &NoProgress);

        let (bytes, _) = engine.fold(&[0], 100, Weighting::Plain).unwrap();
        assert_eq!(bytes.len(), 32);

        let group = &topology.domain(0).unwrap().groups[0];
        engine.local_parity(group, 1).unwrap();
        let parity = store.read_all(6).unwrap();
        assert_eq!(&parity[..8], &store.read(0, 0, 8).unwrap()[..]);
        assert!(parity[8..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_recompute_all_counts_parity_drives() {
        let topology = Topology::build(&small_config()).unwrap();
        let store = MemoryBlockStore::new(20, 32);
        let status = StatusSnapshot::all_online(20);
        let engine = ParityEngine::new(&topology, &store, &status, &NoProgress);
        // 2 domains x (2 local + 2 global)
        assert_eq!(engine.recompute_all(4).unwrap(), 8);
    }

    #[test]
    fn test_ha_parity_layout() {
        let topology = Topology::build(&PoolConfig::dbox_484()).unwrap();
        let selected: Vec<DriveId> = (0..9)
            .flat_map(|d| [d * 44, d * 44 + 1])
            .collect();
        let layout = HaParityLayout::for_selection(&topology, &selected);

        assert_eq!(layout.local.len(), 2);
        assert_eq!(layout.local[0].0, 38);
        assert_eq!(layout.local[0].1.len(), 9);
        assert_eq!(layout.local[1].0, 44 + 38);
        assert_eq!(layout.global, vec![88 + 41, 132 + 41]);
        assert_eq!(layout.local_for(selected[12]).unwrap().0, 82);

        assert_eq!(layout.members_of(38), Some(&selected[..9]));
        assert_eq!(layout.members_of(129), Some(&selected[..]));
        assert!(layout.holds_parity(82));
        assert!(!layout.holds_parity(38 + 1));
        assert!(!layout.holds_parity(0));
    }

    #[test]
    fn test_ha_parity_drive_matches_full_pass() {
        let topology = Topology::build(&PoolConfig::dbox_484()).unwrap();
        let store = MemoryBlockStore::new(484, topology.drive_capacity());
        let selected: Vec<DriveId> = (0..9)
            .flat_map(|d| [d * 44, d * 44 + 1])
            .collect();
        for (i, &id) in selected.iter().enumerate() {
            store.write(id, 0, &[i as u8 + 1; 64]).unwrap();
        }
        let status = StatusSnapshot::all_online(484);
        let engine = ParityEngine::new(&topology, &store, &status, &NoProgress);
        engine.ha_parity(&selected, 1).unwrap();
        let expected = store.read_all(82).unwrap();

        store.zero_fill(82).unwrap();
        let layout = HaParityLayout::for_selection(&topology, &selected);
        let sources = engine
            .ha_parity_drive(&layout, 82, topology.chunks_per_drive())
            .unwrap();
        assert_eq!(sources, selected[9..].to_vec());
        assert_eq!(store.read_all(82).unwrap(), expected);
        assert!(engine.ha_parity_drive(&layout, 0, 1).is_err());
    }
}
