//! Drivestor - Multi-level Erasure-coded Drive Pool Engine
//!
//! Stripes files across a pool of fixed-size drives partitioned into fault
//! domains, protects them with local XOR parity per group and global
//! parity per domain, rebuilds failed drives from their peers and reports
//! which domains are at risk.
//!
//! # Architecture
//!
//! ```text
//! PoolConfig → Topology → StoragePool ─┬─ Striper ──────┐
//!                                      ├─ ParityEngine ─┼─▶ BlockStore
//!                                      ├─ RecoveryEngine┘
//!                                      └─ IntegrityAnalyzer
//! ```
//!
//! # Modules
//!
//! - [`adapters`] - Block store, state file and event adapters
//! - [`config`] - Pool configuration and layout presets
//! - [`domain`] - Ports and events
//! - [`ec`] - Striping, parity, recovery and integrity engines
//! - [`error`] - Error types
//! - [`layout`] - Static topology and status snapshots
//! - [`metrics`] - Prometheus metrics
//! - [`pool`] - The storage pool facade

pub mod adapters;
pub mod config;
pub mod domain;
pub mod ec;
pub mod error;
pub mod layout;
pub mod metrics;
pub mod pool;

// Re-export commonly used types
pub use config::{PoolConfig, PoolMode};
pub use ec::{IntegrityReport, NamedBlob, RebuildReport, VulnerabilityPolicy};
pub use error::{Error, Result};
pub use layout::{DriveId, DriveRole, StatusSnapshot, Topology};
pub use pool::{StoragePool, WriteManifest};
