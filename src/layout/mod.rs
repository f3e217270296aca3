//! Pool Layout
//!
//! Static description of a pool: which drive IDs are data, local parity,
//! global parity or spare, how data drives are partitioned into local
//! groups, and which fault domain owns each drive.
//!
//! ```text
//! Domain 0                        Domain 1
//! ┌──────────────────────────┐    ┌──────────────────────────┐
//! │ D D D D │ D D D D │ D D  │    │ D D D D │ D D D D │ D D  │
//! │ group 0 │ group 1 │ g2   │    │ group 0 │ group 1 │ g2   │
//! │ L0 L1 L2   G0   S S      │    │ L0 L1 L2   G0   S S      │
//! └──────────────────────────┘    └──────────────────────────┘
//! ```
//!
//! The topology is an arena: a flat `Vec<Drive>` indexed by drive ID, with
//! domains and groups holding ID lists into it. The only mutable per-drive
//! state, the online flag, lives in a [`StatusSnapshot`] owned by the pool.

pub mod status;
pub mod topology;

pub use status::StatusSnapshot;
pub use topology::{Drive, DriveId, DriveRole, FaultDomain, LocalGroup, Topology};
