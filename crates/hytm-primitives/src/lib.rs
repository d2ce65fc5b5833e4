//! # hytm-primitives
//!
//! Primitive types shared by the hytm transactional memory engines.
//!
//! This crate provides the fundamental building blocks used throughout the system:
//! - `TmWord`, the unit of shared memory a transaction reads and writes
//! - Byte masks for sub-word access
//! - Per-transaction read and write logs
//! - The error taxonomy every engine reports through

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod log;
mod mask;
mod padded;
mod spin;
mod ticks;
mod word;

pub use error::{AbortReason, HardwareAbort, TxError, TxResult};
pub use log::{ReadEntry, ReadLog, WriteEntry, WriteLog};
pub use mask::{byte_mask, covers, merge, FULL_MASK};
pub use padded::{CachePadded, CACHE_LINE_SIZE};
pub use spin::{spin_for, SpinWait};
pub use ticks::ticks;
pub use word::TmWord;

/// Snapshot of the global sequence clock
pub type Timestamp = u64;

/// Byte mask selecting the bytes of a word an access touches
pub type Mask = u64;
