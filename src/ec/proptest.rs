//! Property-Based Tests for the Parity and Recovery Engines
//!
//! # Test Properties
//!
//! 1. **XOR Cancellation**: folding a chunk into its own parity removes it
//! 2. **Parity Invariant**: after a write, each local parity drive equals
//!    the XOR of its group's online data drives
//! 3. **Single Rebuild**: any one offline data drive is restored byte-exact
//! 4. **Reject Before Write**: a rejected rebuild leaves every drive intact
//! 5. **Exact Or Refused**: rebuilding any two drives of a domain, in
//!    either order, restores both byte-exact or writes nothing
//! 6. **Packing**: unpack(pad(pack(files))) = files

#![cfg(test)]

use proptest::prelude::*;

use super::parity::{xor_parity, ParityEngine};
use super::reconstruction::RecoveryEngine;
use super::striper::{pack_files, pad_to_chunk, unpack_files, NamedBlob, StripePlan, Striper};
use crate::adapters::MemoryBlockStore;
use crate::config::PoolConfig;
use crate::domain::ports::{BlockStore, NoProgress};
use crate::layout::{StatusSnapshot, Topology};

const CHUNK: usize = 8;
const CAPACITY: usize = 64;

// =============================================================================
// Property Strategies
// =============================================================================

/// Two domains of 12 drives, groups of 4.
fn small_config() -> PoolConfig {
    PoolConfig {
        total_drives: 24,
        domain_count: 2,
        drives_per_domain: 12,
        data_per_domain: 8,
        local_parity_per_domain: 2,
        global_parity_per_domain: 1,
        spares_per_domain: 1,
        local_group_size: 4,
        chunk_size: CHUNK,
        drive_capacity: CAPACITY,
        ..PoolConfig::dbox_484()
    }
}

/// Payload that fits the 16 data drives of `small_config`.
fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..(16 * CAPACITY))
}

fn chunks_strategy() -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(prop::collection::vec(any::<u8>(), CHUNK), 0..10)
}

fn blob_strategy() -> impl Strategy<Value = Vec<NamedBlob>> {
    prop::collection::vec(
        ("[a-z]{1,12}\\.[a-z]{1,3}", prop::collection::vec(any::<u8>(), 0..300))
            .prop_map(|(name, data)| NamedBlob { name, data }),
        1..5,
    )
}

/// Write `payload` with Normal striping and full parity.
fn written_pool(payload: &[u8]) -> (Topology, MemoryBlockStore) {
    let topology = Topology::build(&small_config()).unwrap();
    let store = MemoryBlockStore::new(24, CAPACITY);
    let status = StatusSnapshot::all_online(24);

    let mut padded = payload.to_vec();
    pad_to_chunk(&mut padded, CHUNK);
    let plan = StripePlan::normal(&topology, &status, padded.len()).unwrap();
    Striper::new(&topology, &store, &NoProgress)
        .write(&plan, &padded)
        .unwrap();
    ParityEngine::new(&topology, &store, &status, &NoProgress)
        .recompute_all(plan.slots_used)
        .unwrap();

    (topology, store)
}

// =============================================================================
// XOR Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: XOR-ing parity with all but one chunk yields that chunk.
    #[test]
    fn prop_xor_recovers_missing_chunk(
        chunks in chunks_strategy(),
        missing in any::<prop::sample::Index>(),
    ) {
        prop_assume!(!chunks.is_empty());
        let parity = xor_parity(&chunks, CHUNK);
        let lost = missing.index(chunks.len());

        let mut survivors: Vec<Vec<u8>> = chunks
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != lost)
            .map(|(_, c)| c.clone())
            .collect();
        survivors.push(parity);

        prop_assert_eq!(xor_parity(&survivors, CHUNK), chunks[lost].clone());
    }

    /// Property: fold order does not matter.
    #[test]
    fn prop_xor_order_independent(chunks in chunks_strategy()) {
        let mut reversed = chunks.clone();
        reversed.reverse();
        prop_assert_eq!(xor_parity(&chunks, CHUNK), xor_parity(&reversed, CHUNK));
    }
}

// =============================================================================
// Pool Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// Property: every local parity drive is the XOR of its group.
    #[test]
    fn prop_local_parity_invariant(payload in payload_strategy()) {
        let (topology, store) = written_pool(&payload);

        for domain in topology.domains() {
            for group in &domain.groups {
                let Some(parity_drive) = group.parity_drive else { continue };
                let members: Vec<_> = group
                    .data_drives
                    .iter()
                    .map(|&id| store.read_all(id).unwrap())
                    .collect();
                let expected = xor_parity(&members, CAPACITY);
                prop_assert_eq!(&store.read_all(parity_drive).unwrap()[..], &expected[..]);
            }
        }
    }

    /// Property: a single offline data drive is rebuilt byte for byte.
    #[test]
    fn prop_single_rebuild_is_exact(
        payload in payload_strategy(),
        victim in 0usize..16,
    ) {
        let (topology, store) = written_pool(&payload);
        let drive_id = topology.data_drives().nth(victim).unwrap();
        let original = store.read_all(drive_id).unwrap();

        let mut status = StatusSnapshot::all_online(24);
        status.set(drive_id, false);
        store.zero_fill(drive_id).unwrap();

        RecoveryEngine::new(&topology, &store, &status, &NoProgress)
            .rebuild(&[drive_id], true)
            .unwrap();
        prop_assert_eq!(store.read_all(drive_id).unwrap(), original);
    }

    /// Property: two offline drives in one group are refused untouched.
    #[test]
    fn prop_double_failure_rejected(
        payload in payload_strategy(),
        group in 0usize..4,
        first in 0usize..4,
        offset in 1usize..4,
    ) {
        let (topology, store) = written_pool(&payload);
        let base = (group / 2) * 12 + (group % 2) * 4;
        let a = base + first;
        let b = base + (first + offset) % 4;

        let before: Vec<_> = (0..24).map(|id| store.read_all(id).unwrap()).collect();
        let mut status = StatusSnapshot::all_online(24);
        status.set(a, false);
        status.set(b, false);

        let result = RecoveryEngine::new(&topology, &store, &status, &NoProgress)
            .rebuild(&[a, b], true);
        prop_assert!(result.is_err());
        prop_assert!(result.unwrap_err().is_insufficient_redundancy());

        let after: Vec<_> = (0..24).map(|id| store.read_all(id).unwrap()).collect();
        prop_assert_eq!(before, after);
    }

    /// Property: two lost drives of one domain are restored exactly or
    /// refused untouched, whatever their roles and request order.
    #[test]
    fn prop_pair_rebuild_exact_or_refused(
        payload in payload_strategy(),
        first in 0usize..12,
        offset in 1usize..12,
        reversed in any::<bool>(),
        bring_online in any::<bool>(),
    ) {
        let (topology, store) = written_pool(&payload);
        let a = first;
        let b = (first + offset) % 12;
        let originals: Vec<_> = (0..24).map(|id| store.read_all(id).unwrap()).collect();

        let mut status = StatusSnapshot::all_online(24);
        for id in [a, b] {
            status.set(id, false);
            store.zero_fill(id).unwrap();
        }
        let before: Vec<_> = (0..24).map(|id| store.read_all(id).unwrap()).collect();
        let targets = if reversed { [b, a] } else { [a, b] };

        match RecoveryEngine::new(&topology, &store, &status, &NoProgress)
            .rebuild(&targets, bring_online)
        {
            Ok(_) => {
                for id in [a, b] {
                    prop_assert_eq!(&store.read_all(id).unwrap(), &originals[id]);
                }
            }
            Err(err) => {
                prop_assert!(err.is_insufficient_redundancy());
                let after: Vec<_> = (0..24).map(|id| store.read_all(id).unwrap()).collect();
                prop_assert_eq!(before, after);
            }
        }
    }

    /// Property: packing survives padding and unpacking.
    #[test]
    fn prop_pack_unpack(files in blob_strategy(), chunk in 1usize..256) {
        let mut packed = pack_files(&files).unwrap();
        pad_to_chunk(&mut packed, chunk);
        prop_assert_eq!(unpack_files(&packed).unwrap(), files);
    }
}
