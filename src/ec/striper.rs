//! Chunker / Striper
//!
//! Packs input files into one buffer, cuts it into fixed-size chunks and
//! distributes the chunks over the data drives.
//!
//! # Striping Modes
//!
//! ```text
//! Normal (contiguous ranges, chunks_per_drive = 3)
//!   drive 0: [c0 c1 c2]  drive 1: [c3 c4 c5]  drive 2: [c6 c7 --]
//!
//! HA (round robin over 18 selected drives)
//!   drive s0: [c0 c18 ..]  drive s1: [c1 c19 ..]  ...  drive s17: [c17 ..]
//! ```
//!
//! Every drive touched by a write is written in full, zero padded to the
//! drive capacity.
//!
//! # Multi-file Header
//!
//! Each packed file is `name_len: u32 LE | name (UTF-8) | size: u64 LE |
//! payload`. Packed files are concatenated and the buffer is zero padded to
//! a chunk boundary. A zero `name_len` marks the start of the padding.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::config::{HaConfig, PoolMode};
use crate::domain::ports::{BlockStore, ProgressReporter};
use crate::error::{Error, Result};
use crate::layout::{DriveId, StatusSnapshot, Topology};

const NAME_LEN_BYTES: usize = 4;
const SIZE_BYTES: usize = 8;

// =============================================================================
// Multi-file Packing
// =============================================================================

/// A named payload, as packed into or unpacked from a pool write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedBlob {
    pub name: String,
    pub data: Vec<u8>,
}

impl NamedBlob {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

/// Concatenate files behind their headers. Padding is not applied.
pub fn pack_files(files: &[NamedBlob]) -> Result<Vec<u8>> {
    if files.is_empty() {
        return Err(Error::EmptyInput);
    }

    let total: usize = files
        .iter()
        .map(|f| NAME_LEN_BYTES + f.name.len() + SIZE_BYTES + f.data.len())
        .sum();
    let mut buf = Vec::with_capacity(total);

    for file in files {
        if file.name.is_empty() {
            return Err(Error::CorruptHeader("file name must not be empty".to_string()));
        }
        let name_len = u32::try_from(file.name.len()).map_err(|_| {
            Error::CorruptHeader(format!("file name of {} bytes is too long", file.name.len()))
        })?;
        buf.extend_from_slice(&name_len.to_le_bytes());
        buf.extend_from_slice(file.name.as_bytes());
        buf.extend_from_slice(&(file.data.len() as u64).to_le_bytes());
        buf.extend_from_slice(&file.data);
    }

    Ok(buf)
}

/// Split a packed buffer back into its files, stopping at the padding.
pub fn unpack_files(buf: &[u8]) -> Result<Vec<NamedBlob>> {
    let mut files = Vec::new();
    let mut offset = 0;

    while offset + NAME_LEN_BYTES <= buf.len() {
        let name_len = read_u32(buf, offset)? as usize;
        if name_len == 0 {
            break;
        }
        offset += NAME_LEN_BYTES;

        let name_bytes = slice(buf, offset, name_len, "file name")?;
        let name = String::from_utf8(name_bytes.to_vec())
            .map_err(|e| Error::CorruptHeader(format!("file name is not UTF-8: {}", e)))?;
        offset += name_len;

        let size = read_u64(buf, offset)?;
        offset += SIZE_BYTES;

        let size = usize::try_from(size)
            .map_err(|_| Error::CorruptHeader(format!("file size {} too large", size)))?;
        let data = slice(buf, offset, size, &name)?.to_vec();
        offset += size;

        files.push(NamedBlob { name, data });
    }

    Ok(files)
}

fn slice<'b>(buf: &'b [u8], offset: usize, len: usize, what: &str) -> Result<&'b [u8]> {
    offset
        .checked_add(len)
        .and_then(|end| buf.get(offset..end))
        .ok_or_else(|| {
            Error::CorruptHeader(format!(
                "{} at offset {} runs past end of buffer ({} bytes)",
                what,
                offset,
                buf.len()
            ))
        })
}

fn read_u32(buf: &[u8], offset: usize) -> Result<u32> {
    let mut raw = [0u8; NAME_LEN_BYTES];
    raw.copy_from_slice(slice(buf, offset, NAME_LEN_BYTES, "name length")?);
    Ok(u32::from_le_bytes(raw))
}

fn read_u64(buf: &[u8], offset: usize) -> Result<u64> {
    let mut raw = [0u8; SIZE_BYTES];
    raw.copy_from_slice(slice(buf, offset, SIZE_BYTES, "file size")?);
    Ok(u64::from_le_bytes(raw))
}

/// Zero pad `buf` to a multiple of `chunk_size`.
pub fn pad_to_chunk(buf: &mut Vec<u8>, chunk_size: usize) {
    let padded = buf.len().div_ceil(chunk_size) * chunk_size;
    buf.resize(padded, 0);
}

// =============================================================================
// Stripe Plan
// =============================================================================

/// Where every chunk of one write lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StripePlan {
    pub mode: PoolMode,
    /// Drives written, in chunk order
    pub drives: Vec<DriveId>,
    /// Normal: chunks per drive. HA: stripes.
    pub slots_used: usize,
    pub num_chunks: usize,
    pub chunk_size: usize,
}

impl StripePlan {
    /// Plan a Normal-mode write over every online data drive.
    pub fn normal(
        topology: &Topology,
        status: &StatusSnapshot,
        padded_len: usize,
    ) -> Result<Self> {
        let drives: Vec<DriveId> = topology
            .data_drives()
            .filter(|&id| status.is_online(id))
            .collect();
        let available = drives.len() as u64 * topology.drive_capacity() as u64;

        if drives.is_empty() || padded_len as u64 > available {
            return Err(Error::CapacityExceeded {
                required: padded_len as u64,
                available,
            });
        }

        let num_chunks = padded_len / topology.chunk_size();
        Ok(Self {
            mode: PoolMode::Normal,
            slots_used: num_chunks.div_ceil(drives.len()),
            drives,
            num_chunks,
            chunk_size: topology.chunk_size(),
        })
    }

    /// Plan an HA-mode write over a fixed-width drive selection.
    pub fn ha(
        topology: &Topology,
        status: &StatusSnapshot,
        ha: &HaConfig,
        padded_len: usize,
    ) -> Result<Self> {
        let drives = select_ha_drives(topology, status, ha)?;
        let available = drives.len() as u64 * topology.drive_capacity() as u64;

        if padded_len as u64 > available {
            return Err(Error::CapacityExceeded {
                required: padded_len as u64,
                available,
            });
        }

        let num_chunks = padded_len / topology.chunk_size();
        Ok(Self {
            mode: PoolMode::Ha,
            slots_used: num_chunks.div_ceil(drives.len()),
            drives,
            num_chunks,
            chunk_size: topology.chunk_size(),
        })
    }

    pub fn for_mode(
        mode: PoolMode,
        topology: &Topology,
        status: &StatusSnapshot,
        ha: &HaConfig,
        padded_len: usize,
    ) -> Result<Self> {
        match mode {
            PoolMode::Normal => Self::normal(topology, status, padded_len),
            PoolMode::Ha => Self::ha(topology, status, ha, padded_len),
        }
    }

    pub fn padded_len(&self) -> usize {
        self.num_chunks * self.chunk_size
    }

    /// Drive and slot holding chunk `index`
    pub fn locate(&self, index: usize) -> Option<(DriveId, usize)> {
        self.position(index)
            .map(|(position, slot)| (self.drives[position], slot))
    }

    /// Lay `payload` out per drive, each buffer sized to `capacity`.
    pub fn layout(&self, payload: &[u8], capacity: usize) -> Vec<(DriveId, Vec<u8>)> {
        let mut buffers: Vec<(DriveId, Vec<u8>)> = self
            .drives
            .iter()
            .map(|&id| (id, vec![0u8; capacity]))
            .collect();

        for (index, chunk) in payload.chunks(self.chunk_size).enumerate() {
            let Some((position, slot)) = self.position(index) else {
                break;
            };
            let start = slot * self.chunk_size;
            buffers[position].1[start..start + chunk.len()].copy_from_slice(chunk);
        }

        buffers
    }

    /// Reassemble the padded payload from per-drive contents. Only drives
    /// holding at least one chunk are fetched, each at most once.
    pub fn gather<F>(&self, mut fetch: F) -> Result<Vec<u8>>
    where
        F: FnMut(DriveId) -> Result<Vec<u8>>,
    {
        let mut drive_data: Vec<Option<Vec<u8>>> = vec![None; self.drives.len()];

        let mut payload = Vec::with_capacity(self.padded_len());
        for index in 0..self.num_chunks {
            let Some((position, slot)) = self.position(index) else {
                break;
            };
            if drive_data[position].is_none() {
                drive_data[position] = Some(fetch(self.drives[position])?);
            }
            let start = slot * self.chunk_size;
            let chunk = drive_data[position]
                .as_deref()
                .and_then(|data| data.get(start..start + self.chunk_size))
                .ok_or_else(|| {
                    Error::Internal(format!(
                        "drive {} is shorter than stripe slot {}",
                        self.drives[position], slot
                    ))
                })?;
            payload.extend_from_slice(chunk);
        }
        Ok(payload)
    }

    fn position(&self, index: usize) -> Option<(usize, usize)> {
        if index >= self.num_chunks || self.drives.is_empty() {
            return None;
        }
        Some(match self.mode {
            PoolMode::Normal => (index / self.slots_used, index % self.slots_used),
            PoolMode::Ha => (index % self.drives.len(), index / self.drives.len()),
        })
    }
}

/// First `ha.drives_per_domain` online data drives of each domain, in
/// domain order, truncated to `ha.stripe_width`.
pub fn select_ha_drives(
    topology: &Topology,
    status: &StatusSnapshot,
    ha: &HaConfig,
) -> Result<Vec<DriveId>> {
    let mut selected: Vec<DriveId> = topology
        .domains()
        .iter()
        .flat_map(|domain| {
            domain
                .data_drives
                .iter()
                .copied()
                .filter(|&id| status.is_online(id))
                .take(ha.drives_per_domain)
        })
        .collect();

    if selected.len() < ha.stripe_width {
        return Err(Error::HaSelection {
            selected: selected.len(),
            required: ha.stripe_width,
        });
    }

    selected.truncate(ha.stripe_width);
    Ok(selected)
}

// =============================================================================
// Striper
// =============================================================================

/// Writes planned chunks to the block store
pub struct Striper<'a> {
    topology: &'a Topology,
    store: &'a dyn BlockStore,
    progress: &'a dyn ProgressReporter,
}

impl<'a> Striper<'a> {
    pub fn new(
        topology: &'a Topology,
        store: &'a dyn BlockStore,
        progress: &'a dyn ProgressReporter,
    ) -> Self {
        Self {
            topology,
            store,
            progress,
        }
    }

    /// Write a chunk-aligned payload according to `plan`.
    #[instrument(skip(self, plan, payload), fields(mode = %plan.mode, drives = plan.drives.len()))]
    pub fn write(&self, plan: &StripePlan, payload: &[u8]) -> Result<()> {
        let capacity = self.topology.drive_capacity();
        let total = self.topology.total_drives();

        for (drive_id, buffer) in plan.layout(payload, capacity) {
            self.store.write(drive_id, 0, &buffer)?;
            self.progress.drive_processed(drive_id, total);
        }

        info!(
            "Striped {} chunks over {} drives ({} slots each)",
            plan.num_chunks,
            plan.drives.len(),
            plan.slots_used
        );
        Ok(())
    }

    /// Reset every hot spare to zeros.
    pub fn zero_spares(&self) -> Result<usize> {
        let mut zeroed = 0;
        for drive_id in self.topology.spare_drives() {
            self.store.zero_fill(drive_id)?;
            self.progress
                .drive_processed(drive_id, self.topology.total_drives());
            zeroed += 1;
        }
        debug!("Zeroed {} spare drives", zeroed);
        Ok(zeroed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryBlockStore;
    use crate::config::PoolConfig;
    use crate::domain::ports::NoProgress;

    fn tiny_config() -> PoolConfig {
        PoolConfig {
            total_drives: 12,
            domain_count: 2,
            drives_per_domain: 6,
            data_per_domain: 3,
            local_parity_per_domain: 1,
            global_parity_per_domain: 1,
            spares_per_domain: 1,
            local_group_size: 3,
            chunk_size: 4,
            drive_capacity: 16,
            ..PoolConfig::dbox_484()
        }
    }

    // =========================================================================
    // Packing
    // =========================================================================

    #[test]
    fn test_pack_header_layout() {
        let packed = pack_files(&[NamedBlob::new("a.txt", b"hello".to_vec())]).unwrap();

        assert_eq!(&packed[..4], &5u32.to_le_bytes());
        assert_eq!(&packed[4..9], b"a.txt");
        assert_eq!(&packed[9..17], &5u64.to_le_bytes());
        assert_eq!(&packed[17..], b"hello");
    }

    #[test]
    fn test_unpack_stops_at_padding() {
        let files = vec![
            NamedBlob::new("a.txt", b"hello".to_vec()),
            NamedBlob::new("b.bin", vec![7u8; 100]),
        ];
        let mut packed = pack_files(&files).unwrap();
        pad_to_chunk(&mut packed, 64);
        assert_eq!(packed.len() % 64, 0);

        assert_eq!(unpack_files(&packed).unwrap(), files);
    }

    #[test]
    fn test_pack_rejects_bad_input() {
        assert!(matches!(pack_files(&[]), Err(Error::EmptyInput)));
        assert!(matches!(
            pack_files(&[NamedBlob::new("", vec![1])]),
            Err(Error::CorruptHeader(_))
        ));
    }

    #[test]
    fn test_unpack_truncated() {
        let packed = pack_files(&[NamedBlob::new("x", vec![1, 2, 3])]).unwrap();
        let truncated = &packed[..packed.len() - 1];
        assert!(matches!(
            unpack_files(truncated),
            Err(Error::CorruptHeader(_))
        ));
    }

    // =========================================================================
    // Planning
    // =========================================================================

    #[test]
    fn test_normal_plan_contiguous() {
        let topology = Topology::build(&tiny_config()).unwrap();
        let mut status = StatusSnapshot::all_online(12);
        status.set(1, false);

        // 5 online data drives, 7 chunks -> 2 per drive
        let plan = StripePlan::normal(&topology, &status, 28).unwrap();
        assert_eq!(plan.drives, vec![0, 2, 6, 7, 8]);
        assert_eq!(plan.slots_used, 2);
        assert_eq!(plan.locate(0), Some((0, 0)));
        assert_eq!(plan.locate(3), Some((2, 1)));
        assert_eq!(plan.locate(6), Some((7, 0)));
        assert_eq!(plan.locate(7), None);
    }

    #[test]
    fn test_normal_plan_capacity() {
        let topology = Topology::build(&tiny_config()).unwrap();
        let status = StatusSnapshot::all_online(12);

        assert!(StripePlan::normal(&topology, &status, 96).is_ok());
        assert!(matches!(
            StripePlan::normal(&topology, &status, 100),
            Err(Error::CapacityExceeded {
                required: 100,
                available: 96
            })
        ));

        let offline = StatusSnapshot::from_flags(vec![false; 12]);
        assert!(matches!(
            StripePlan::normal(&topology, &offline, 4),
            Err(Error::CapacityExceeded { available: 0, .. })
        ));
    }

    #[test]
    fn test_ha_selection() {
        let topology = Topology::build(&PoolConfig::dbox_484()).unwrap();
        let mut status = StatusSnapshot::all_online(484);
        status.set(0, false);

        let selected = select_ha_drives(&topology, &status, &HaConfig::default()).unwrap();
        assert_eq!(selected.len(), 18);
        assert_eq!(&selected[..4], &[1, 2, 44, 45]);
        assert_eq!(*selected.last().unwrap(), 8 * 44 + 1);
    }

    #[test]
    fn test_ha_selection_short() {
        let topology = Topology::build(&tiny_config()).unwrap();
        let status = StatusSnapshot::all_online(12);
        let ha = HaConfig {
            drives_per_domain: 2,
            stripe_width: 5,
        };
        assert!(matches!(
            select_ha_drives(&topology, &status, &ha),
            Err(Error::HaSelection {
                selected: 4,
                required: 5
            })
        ));
    }

    #[test]
    fn test_ha_plan_round_robin() {
        let topology = Topology::build(&tiny_config()).unwrap();
        let status = StatusSnapshot::all_online(12);
        let ha = HaConfig {
            drives_per_domain: 2,
            stripe_width: 4,
        };

        let plan = StripePlan::ha(&topology, &status, &ha, 24).unwrap();
        assert_eq!(plan.drives, vec![0, 1, 6, 7]);
        assert_eq!(plan.slots_used, 2);
        assert_eq!(plan.locate(1), Some((1, 0)));
        assert_eq!(plan.locate(5), Some((1, 1)));

        assert!(matches!(
            StripePlan::ha(&topology, &status, &ha, 68),
            Err(Error::CapacityExceeded { available: 64, .. })
        ));
    }

    // =========================================================================
    // Writing
    // =========================================================================

    #[test]
    fn test_write_and_gather() {
        let topology = Topology::build(&tiny_config()).unwrap();
        let store = MemoryBlockStore::new(12, 16);
        let status = StatusSnapshot::all_online(12);
        let payload: Vec<u8> = (1..=28).collect();

        for plan in [
            StripePlan::normal(&topology, &status, payload.len()).unwrap(),
            StripePlan::ha(
                &topology,
                &status,
                &HaConfig {
                    drives_per_domain: 2,
                    stripe_width: 4,
                },
                payload.len(),
            )
            .unwrap(),
        ] {
            Striper::new(&topology, &store, &NoProgress)
                .write(&plan, &payload)
                .unwrap();
            let gathered = plan
                .gather(|id| Ok(store.read_all(id)?.to_vec()))
                .unwrap();
            assert_eq!(gathered, payload);
        }
    }

    #[test]
    fn test_zero_spares() {
        let topology = Topology::build(&tiny_config()).unwrap();
        let store = MemoryBlockStore::new(12, 16);
        store.write(5, 0, &[9; 16]).unwrap();

        let zeroed = Striper::new(&topology, &store, &NoProgress)
            .zero_spares()
            .unwrap();
        assert_eq!(zeroed, 2);
        assert!(store.read_all(5).unwrap().iter().all(|&b| b == 0));
    }
}
