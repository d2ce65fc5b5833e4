//! Per-thread adaptive mode heuristics
//!
//! Hardware side: tick sums of committed and aborted regions are sampled
//! every `sampling_rate` commits (or aborts) into a mean cost per commit and
//! an explicit-abort percentage. Two capacity aborts in a row combined with
//! an expensive or abort-heavy sample send the thread to software.
//!
//! Software side: a deferred thread measures its mean commit cost over a
//! window that doubles each time software still wins, and returns to
//! hardware once software is no cheaper than the last hardware sample.

use crate::config::HybridConfig;
use hytm_primitives::{AbortReason, HardwareAbort};

/// What a deferred thread should do after a software commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwVerdict {
    /// Keep running in software
    Stay,
    /// Window finished and software still wins; keep going with a larger
    /// window
    Extend,
    /// Give the hardware path another try
    ReturnToHw,
}

/// A completed hardware cost sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HwSample {
    /// Mean ticks per commit, infinite when nothing committed
    pub mean_cost: f64,
    /// Explicit aborts as a percentage of attempts
    pub explicit_rate: f64,
}

/// Adaptive state of one worker thread
#[derive(Debug, Clone)]
pub struct Heuristic {
    sampling_rate: u64,
    hw_cost_threshold: f64,
    explicit_rate_threshold: f64,
    sw_window_initial: u64,
    sw_window_max: u64,

    commit_ticks: u64,
    abort_ticks: u64,
    commits: u64,
    aborts: u64,
    explicit_aborts: u64,
    sample: Option<HwSample>,
    consecutive_capacity: u32,

    last_hw_cost: f64,
    sw_window: u64,
    sw_ticks: u64,
    sw_commits: u64,
    last_sw_mean: Option<f64>,
}

impl Heuristic {
    /// Create fresh state from the runtime configuration
    pub fn new(config: &HybridConfig) -> Self {
        Self {
            sampling_rate: u64::from(config.sampling_rate.max(1)),
            hw_cost_threshold: config.hw_cost_threshold as f64,
            explicit_rate_threshold: f64::from(config.explicit_abort_rate_threshold),
            sw_window_initial: u64::from(config.sw_window_initial.max(1)),
            sw_window_max: u64::from(config.sw_window_max.max(config.sw_window_initial.max(1))),
            commit_ticks: 0,
            abort_ticks: 0,
            commits: 0,
            aborts: 0,
            explicit_aborts: 0,
            sample: None,
            consecutive_capacity: 0,
            last_hw_cost: f64::INFINITY,
            sw_window: u64::from(config.sw_window_initial.max(1)),
            sw_ticks: 0,
            sw_commits: 0,
            last_sw_mean: None,
        }
    }

    // ==================== Hardware side ====================

    /// Record a committed region; returns the sample if one was taken
    pub fn record_hw_commit(&mut self, ticks: u64) -> Option<HwSample> {
        self.commit_ticks = self.commit_ticks.saturating_add(ticks);
        self.commits += 1;
        self.consecutive_capacity = 0;
        self.maybe_sample()
    }

    /// Record an aborted region; returns the sample if one was taken
    pub fn record_hw_abort(&mut self, ticks: u64, abort: &HardwareAbort) -> Option<HwSample> {
        self.abort_ticks = self.abort_ticks.saturating_add(ticks);
        self.aborts += 1;
        match abort.reason {
            AbortReason::Capacity => self.consecutive_capacity += 1,
            AbortReason::Explicit(_) => {
                self.explicit_aborts += 1;
                self.consecutive_capacity = 0;
            }
            _ => self.consecutive_capacity = 0,
        }
        self.maybe_sample()
    }

    fn maybe_sample(&mut self) -> Option<HwSample> {
        if self.commits < self.sampling_rate && self.aborts < self.sampling_rate {
            return None;
        }
        let sample = self.live_sample();
        self.sample = Some(sample);
        self.commit_ticks = 0;
        self.abort_ticks = 0;
        self.commits = 0;
        self.aborts = 0;
        self.explicit_aborts = 0;
        Some(sample)
    }

    fn live_sample(&self) -> HwSample {
        let mean_cost = if self.commits == 0 {
            f64::INFINITY
        } else {
            (self.commit_ticks + self.abort_ticks) as f64 / self.commits as f64
        };
        let attempts = self.commits + self.aborts;
        let explicit_rate = if attempts == 0 {
            0.0
        } else {
            self.explicit_aborts as f64 * 100.0 / attempts as f64
        };
        HwSample {
            mean_cost,
            explicit_rate,
        }
    }

    /// Most recent completed sample, or the running window if none exists
    pub fn hw_estimate(&self) -> HwSample {
        self.sample.unwrap_or_else(|| self.live_sample())
    }

    /// Capacity aborts in a row
    pub fn consecutive_capacity_aborts(&self) -> u32 {
        self.consecutive_capacity
    }

    /// Decide whether the thread should start a software epoch after `abort`
    ///
    /// Call after [`Heuristic::record_hw_abort`].
    pub fn favors_software(&self, abort: &HardwareAbort) -> bool {
        if abort.reason == AbortReason::Unsupported {
            return true;
        }
        if self.consecutive_capacity < 2 {
            return false;
        }
        let estimate = self.hw_estimate();
        estimate.mean_cost > self.hw_cost_threshold
            || estimate.explicit_rate > self.explicit_rate_threshold
    }

    // ==================== Software side ====================

    /// Start a software epoch with the initial window
    pub fn begin_sw_epoch(&mut self) {
        self.last_hw_cost = self.hw_estimate().mean_cost;
        self.sw_window = self.sw_window_initial;
        self.sw_ticks = 0;
        self.sw_commits = 0;
        self.consecutive_capacity = 0;
    }

    /// Hardware cost the software epoch competes against
    pub fn last_hw_cost(&self) -> f64 {
        self.last_hw_cost
    }

    /// Current software window in commits
    pub fn sw_window(&self) -> u64 {
        self.sw_window
    }

    /// Record a software commit of a deferred thread
    pub fn record_sw_commit(&mut self, ticks: u64) -> SwVerdict {
        self.sw_ticks = self.sw_ticks.saturating_add(ticks);
        self.sw_commits += 1;
        if self.sw_commits < self.sw_window {
            return SwVerdict::Stay;
        }

        let sw_mean = self.sw_ticks as f64 / self.sw_commits as f64;
        self.last_sw_mean = Some(sw_mean);
        self.sw_ticks = 0;
        self.sw_commits = 0;

        let hw_known = self.last_hw_cost.is_finite();
        if hw_known && sw_mean >= self.last_hw_cost {
            return SwVerdict::ReturnToHw;
        }
        if !hw_known && self.sw_window >= self.sw_window_max {
            return SwVerdict::ReturnToHw;
        }
        self.sw_window = (self.sw_window * 2).min(self.sw_window_max);
        SwVerdict::Extend
    }

    /// Mean software cost of the last completed window
    pub fn last_sw_mean(&self) -> Option<f64> {
        self.last_sw_mean
    }
}
