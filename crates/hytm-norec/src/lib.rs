//! # hytm-norec
//!
//! NOrec software transactional memory for hytm.
//!
//! The engine keeps no per-location metadata. A single global sequence lock
//! orders read-write commits, and readers detect interference by re-reading
//! the values they logged:
//! - `Clock`: even when idle, odd while a committer writes back
//! - `Transaction`: one attempt with its read and write logs
//! - `Norec`: the engine, owning the clock and the retry loop
//! - Contention managers invoked around every attempt
//!
//! ## Retry loop
//!
//! ```text
//! begin ──> read/write ──> commit ──> done
//!   ^                        │
//!   └──── rollback <─────────┘ validation failure
//!            │
//!            └── N consecutive failures: next attempt holds the clock
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod clock;
pub mod cm;
mod config;
mod engine;
mod transaction;

pub use clock::Clock;
pub use cm::{CmPolicy, ContentionManager, HourglassToken};
pub use config::NorecConfig;
pub use engine::{Norec, ThreadContext};
pub use transaction::{CommitKind, Role, Transaction};
