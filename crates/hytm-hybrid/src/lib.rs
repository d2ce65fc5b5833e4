//! # hytm-hybrid
//!
//! Hybrid transactional memory: hardware regions when they work, the NOrec
//! software engine when they don't, and a global lock as the last resort.
//!
//! Features:
//! - One mode word (`HW`, `SW`, `GLOCK` plus two registration counts) read
//!   by every hardware region, so any mode change aborts them
//! - Per-thread heuristics that move the runtime to software on repeated
//!   capacity aborts and back to hardware when software stops paying off
//! - Escalation to the global lock after a bounded number of hardware
//!   failures
//! - Validated serde configuration
//!
//! ## Example
//!
//! ```
//! use hytm_hybrid::{HybridConfig, HybridRuntime};
//! use hytm_htm::NoHtm;
//! use hytm_primitives::{TmWord, FULL_MASK};
//!
//! let runtime = HybridRuntime::new(NoHtm, HybridConfig::default()).unwrap();
//! let account = TmWord::new(100);
//!
//! std::thread::scope(|s| {
//!     for _ in 0..2 {
//!         s.spawn(|| {
//!             let mut worker = runtime.worker();
//!             worker.atomically(|tx| {
//!                 let balance = tx.read(&account, FULL_MASK)?;
//!                 tx.write(&account, balance - 10, FULL_MASK)
//!             });
//!         });
//!     }
//! });
//! assert_eq!(account.get(), 80);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod config;
mod error;
pub mod heuristic;
mod mode;
mod runtime;
mod worker;

pub use config::HybridConfig;
pub use error::{ConfigError, ConfigResult};
pub use heuristic::{Heuristic, HwSample, SwVerdict};
pub use mode::{Mode, ModeIndicator, ModeSnapshot, MAX_COUNT};
pub use runtime::HybridRuntime;
pub use worker::{ExecPath, HybridTx, Worker};
