//! Structured export of runtime statistics

use crate::{names, Histogram, Metrics};
use serde::{Deserialize, Serialize};

/// Commits by execution path
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitCounts {
    /// Hardware regions
    pub hardware: u64,
    /// Optimistic software transactions
    pub software: u64,
    /// Software transactions that held the sequence lock throughout
    pub serial: u64,
    /// Transactions run under the global lock
    pub glock: u64,
    /// Software commits that wrote nothing, also counted above
    pub read_only: u64,
}

impl CommitCounts {
    /// Commits on every path
    pub fn total(&self) -> u64 {
        self.hardware + self.software + self.serial + self.glock
    }
}

/// Aborted attempts by reason
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortCounts {
    /// Software validation failures
    pub validation: u64,
    /// Hardware data conflicts
    pub conflict: u64,
    /// Hardware footprint overflows
    pub capacity: u64,
    /// Explicit hardware aborts
    pub explicit: u64,
    /// Everything else
    pub other: u64,
}

impl AbortCounts {
    /// Aborts of every kind
    pub fn total(&self) -> u64 {
        self.validation + self.conflict + self.capacity + self.explicit + self.other
    }
}

/// Mode coordinator activity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeActivity {
    /// Mode at snapshot time: `hw`, `sw`, `glock`, or `unknown` before a
    /// runtime reported one
    pub current: String,
    /// HW to SW switches
    pub to_sw: u64,
    /// SW to HW switches
    pub to_hw: u64,
    /// Global lock acquisitions
    pub glock: u64,
    /// Escalations to serialized software execution
    pub serial_escalations: u64,
}

/// Sampled mean transaction cost, in ticks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostSummary {
    /// Number of samples
    pub samples: u64,
    /// Mean of the sampled means
    pub mean: f64,
    /// Largest sample
    pub max: u64,
    /// Samples per histogram bucket, overflow bucket last
    pub buckets: Vec<u64>,
}

impl CostSummary {
    fn from_histogram(histogram: &Histogram) -> Self {
        Self {
            samples: histogram.total_count(),
            mean: histogram.mean(),
            max: histogram.max(),
            buckets: histogram.bucket_counts(),
        }
    }
}

/// Point-in-time view of a runtime's statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Commits by path
    pub commits: CommitCounts,
    /// Aborts by reason
    pub aborts: AbortCounts,
    /// Mode switches and the current mode
    pub mode: ModeActivity,
    /// CAS attempts on the sequence lock
    pub lock_attempts: u64,
    /// Sampled hardware cost, absent until the first sample
    pub hw_cost: Option<CostSummary>,
    /// Sampled software cost, absent until the first sample
    pub sw_cost: Option<CostSummary>,
}

impl MetricsSnapshot {
    /// Read the runtime counters out of `metrics`
    pub fn from_metrics(metrics: &Metrics) -> Self {
        let commits = CommitCounts {
            hardware: metrics.counter(names::COMMIT_HW),
            software: metrics.counter(names::COMMIT_SW),
            serial: metrics.counter(names::COMMIT_SERIAL),
            glock: metrics.counter(names::COMMIT_GLOCK),
            read_only: metrics.counter(names::COMMIT_READ_ONLY),
        };
        let aborts = AbortCounts {
            validation: metrics.counter(names::ABORT_VALIDATION),
            conflict: metrics.counter(names::ABORT_CONFLICT),
            capacity: metrics.counter(names::ABORT_CAPACITY),
            explicit: metrics.counter(names::ABORT_EXPLICIT),
            other: metrics.counter(names::ABORT_OTHER),
        };
        let mode = ModeActivity {
            current: mode_label(metrics.get_gauge(names::MODE_CURRENT)).to_string(),
            to_sw: metrics.counter(names::SWITCH_TO_SW),
            to_hw: metrics.counter(names::SWITCH_TO_HW),
            glock: metrics.counter(names::GLOCK_ACQUIRED),
            serial_escalations: metrics.counter(names::SERIAL_ESCALATIONS),
        };

        Self {
            commits,
            aborts,
            mode,
            lock_attempts: metrics.counter(names::LOCK_ATTEMPTS),
            hw_cost: metrics
                .histogram(names::COST_HW)
                .map(|h| CostSummary::from_histogram(&h)),
            sw_cost: metrics
                .histogram(names::COST_SW)
                .map(|h| CostSummary::from_histogram(&h)),
        }
    }

    /// Fraction of attempts that aborted, zero before any attempt
    pub fn abort_ratio(&self) -> f64 {
        let attempts = self.commits.total() + self.aborts.total();
        if attempts == 0 {
            return 0.0;
        }
        self.aborts.total() as f64 / attempts as f64
    }

    /// Export snapshot as pretty-printed JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

fn mode_label(gauge: Option<i64>) -> &'static str {
    match gauge {
        Some(0) => "hw",
        Some(1) => "sw",
        Some(2) => "glock",
        _ => "unknown",
    }
}
