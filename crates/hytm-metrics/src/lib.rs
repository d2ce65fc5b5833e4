//! # hytm-metrics
//!
//! Commit and abort statistics for the hytm runtime.
//!
//! Features:
//! - Per-thread `TxStats` event counts with no shared writes on the hot path
//! - Shared `Metrics` store the per-thread counts are flushed into
//! - Histograms for sampled transaction costs
//! - A structured snapshot (commits per path, aborts per reason, mode
//!   activity, sampled costs) with JSON export for the benchmark harness

#![warn(missing_docs)]
#![warn(clippy::all)]

mod collector;
mod export;
mod histogram;
mod stats;

pub use collector::Metrics;
pub use export::{AbortCounts, CommitCounts, CostSummary, MetricsSnapshot, ModeActivity};
pub use histogram::Histogram;
pub use stats::{names, TxStats};

/// Macro for sampling the tick cost of a block into a histogram
#[macro_export]
macro_rules! timed {
    ($metrics:expr, $name:expr, $block:block) => {{
        let start = $crate::__ticks();
        let result = $block;
        $metrics.observe($name, $crate::__ticks().saturating_sub(start));
        result
    }};
}

#[doc(hidden)]
pub fn __ticks() -> u64 {
    hytm_primitives::ticks()
}
