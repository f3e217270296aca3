//! Erasure Coding Module
//!
//! Multi-level XOR protection for a drive pool: local parity per group,
//! global parity per fault domain, and the recovery and integrity logic
//! built on top of it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Erasure Coding Module                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                          │
//! │  ┌──────────────┐    ┌──────────────┐    ┌───────────────────────────┐  │
//! │  │   Chunker /  │───▶│    Parity    │◀───│   Recovery Engine         │  │
//! │  │   Striper    │    │    Engine    │    │   (plan, then rebuild)    │  │
//! │  └──────────────┘    └──────────────┘    └───────────────────────────┘  │
//! │                                                                          │
//! │                   ┌───────────────────┐                                  │
//! │                   │ Integrity Analyzer│  (read-only)                     │
//! │                   └───────────────────┘                                  │
//! │                                                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - **Chunker/Striper** (`striper.rs`): multi-file packing, Normal and HA
//!   stripe plans, and the data write.
//!
//! - **Parity Engine** (`parity.rs`): XOR folds for local parity, plain and
//!   weighted global parity, and the HA parity layout.
//!
//! - **Recovery Engine** (`reconstruction.rs`): role-dispatched rebuilds
//!   that are rejected up front when a group cannot be reconstructed, and
//!   in-memory reconstruction for degraded reads.
//!
//! - **Integrity Analyzer** (`integrity.rs`): per-domain vulnerability
//!   assessment under a selectable policy.
//!
//! Every engine borrows the topology, the block store and one
//! [`StatusSnapshot`](crate::layout::StatusSnapshot); none of them holds a
//! lock. Locking is the pool's job.

pub mod integrity;
pub mod parity;
pub mod reconstruction;
pub mod striper;

#[cfg(test)]
mod proptest;

pub use integrity::{DomainAssessment, IntegrityAnalyzer, IntegrityReport, VulnerabilityPolicy};
pub use parity::{xor_parity, HaParityLayout, ParityEngine, Weighting};
pub use reconstruction::{
    RebuildEntry, RebuildPlan, RebuildReport, RebuildStrategy, RebuildTask, RecoveryEngine,
};
pub use striper::{pack_files, pad_to_chunk, unpack_files, NamedBlob, StripePlan, Striper};
