//! Domain Layer
//!
//! Ports the pool engine depends on and the events it emits.
//!
//! - **Ports** (`ports.rs`) - Trait abstractions for block storage, progress
//!   reporting and event publishing
//! - **Events** (`events.rs`) - Pool events for audit and decoupling
//!
//! # Usage
//!
//! ```ignore
//! use drivestor::domain::ports::{BlockStore, ProgressReporter};
//!
//! fn copy_drive<S: BlockStore>(store: &S, from: usize, to: usize) -> Result<()> {
//!     let bytes = store.read_all(from)?;
//!     store.write(to, 0, &bytes)
//! }
//! ```

pub mod events;
pub mod ports;

pub use events::PoolEvent;
pub use ports::{BlockStore, EventPublisher, NoProgress, ProgressReporter};
