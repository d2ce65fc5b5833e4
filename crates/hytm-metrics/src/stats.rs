//! Per-thread transaction event counts

use crate::Metrics;
use hytm_primitives::{AbortReason, TxError};
use serde::{Deserialize, Serialize};

/// Counter names used when flushing `TxStats`
pub mod names {
    /// Hardware commits
    pub const COMMIT_HW: &str = "tx.commit.hw";
    /// Optimistic software commits
    pub const COMMIT_SW: &str = "tx.commit.sw";
    /// Software commits that ran holding the sequence lock
    pub const COMMIT_SERIAL: &str = "tx.commit.serial";
    /// Commits under the global lock
    pub const COMMIT_GLOCK: &str = "tx.commit.glock";
    /// Software commits with an empty write set
    pub const COMMIT_READ_ONLY: &str = "tx.commit.read_only";
    /// Validation failures
    pub const ABORT_VALIDATION: &str = "tx.abort.validation";
    /// Hardware conflict aborts
    pub const ABORT_CONFLICT: &str = "tx.abort.conflict";
    /// Hardware capacity aborts
    pub const ABORT_CAPACITY: &str = "tx.abort.capacity";
    /// Hardware explicit aborts
    pub const ABORT_EXPLICIT: &str = "tx.abort.explicit";
    /// Every other abort
    pub const ABORT_OTHER: &str = "tx.abort.other";
    /// CAS attempts on the sequence lock
    pub const LOCK_ATTEMPTS: &str = "norec.lock_attempts";
    /// Escalations to serialized software execution
    pub const SERIAL_ESCALATIONS: &str = "norec.serial_escalations";
    /// HW to SW mode switches initiated
    pub const SWITCH_TO_SW: &str = "mode.to_sw";
    /// SW to HW mode switches completed
    pub const SWITCH_TO_HW: &str = "mode.to_hw";
    /// Global lock acquisitions
    pub const GLOCK_ACQUIRED: &str = "mode.glock";
    /// Current execution mode gauge
    pub const MODE_CURRENT: &str = "mode.current";
    /// Sampled mean cost of hardware transactions, in ticks
    pub const COST_HW: &str = "cost.hw";
    /// Sampled mean cost of software transactions, in ticks
    pub const COST_SW: &str = "cost.sw";
}

/// Event counts accumulated by one worker thread
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxStats {
    /// Hardware commits
    pub commits_hw: u64,
    /// Optimistic software commits
    pub commits_sw: u64,
    /// Serialized software commits
    pub commits_serial: u64,
    /// Commits under the global lock
    pub commits_glock: u64,
    /// Software commits that wrote nothing
    pub commits_read_only: u64,
    /// Validation failures
    pub aborts_validation: u64,
    /// Hardware conflict aborts
    pub aborts_conflict: u64,
    /// Hardware capacity aborts
    pub aborts_capacity: u64,
    /// Hardware explicit aborts
    pub aborts_explicit: u64,
    /// Other aborts
    pub aborts_other: u64,
    /// CAS attempts on the sequence lock
    pub lock_attempts: u64,
    /// Escalations to serialized software execution
    pub serial_escalations: u64,
    /// HW to SW switches this thread initiated
    pub switches_to_sw: u64,
    /// SW to HW switches this thread completed
    pub switches_to_hw: u64,
    /// Global lock acquisitions
    pub glock_acquisitions: u64,
}

impl TxStats {
    /// Create zeroed stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Count an abort under its reason
    pub fn record_abort(&mut self, err: &TxError) {
        match err {
            TxError::ValidationFailure
            | TxError::CommitRace
            | TxError::ForwardProgressExhausted(_) => self.aborts_validation += 1,
            TxError::HardwareAbort(abort) => match abort.reason {
                AbortReason::Conflict => self.aborts_conflict += 1,
                AbortReason::Capacity => self.aborts_capacity += 1,
                AbortReason::Explicit(_) => self.aborts_explicit += 1,
                _ => self.aborts_other += 1,
            },
        }
    }

    /// Total commits on every path
    pub fn commits(&self) -> u64 {
        self.commits_hw + self.commits_sw + self.commits_serial + self.commits_glock
    }

    /// Total aborts of every kind
    pub fn aborts(&self) -> u64 {
        self.aborts_validation
            + self.aborts_conflict
            + self.aborts_capacity
            + self.aborts_explicit
            + self.aborts_other
    }

    /// Hardware aborts only
    pub fn hardware_aborts(&self) -> u64 {
        self.aborts_conflict + self.aborts_capacity + self.aborts_explicit + self.aborts_other
    }

    /// Move the counts into the shared store and reset them
    pub fn flush_into(&mut self, metrics: &Metrics) {
        metrics.add(names::COMMIT_HW, self.commits_hw);
        metrics.add(names::COMMIT_SW, self.commits_sw);
        metrics.add(names::COMMIT_SERIAL, self.commits_serial);
        metrics.add(names::COMMIT_GLOCK, self.commits_glock);
        metrics.add(names::COMMIT_READ_ONLY, self.commits_read_only);
        metrics.add(names::ABORT_VALIDATION, self.aborts_validation);
        metrics.add(names::ABORT_CONFLICT, self.aborts_conflict);
        metrics.add(names::ABORT_CAPACITY, self.aborts_capacity);
        metrics.add(names::ABORT_EXPLICIT, self.aborts_explicit);
        metrics.add(names::ABORT_OTHER, self.aborts_other);
        metrics.add(names::LOCK_ATTEMPTS, self.lock_attempts);
        metrics.add(names::SERIAL_ESCALATIONS, self.serial_escalations);
        metrics.add(names::SWITCH_TO_SW, self.switches_to_sw);
        metrics.add(names::SWITCH_TO_HW, self.switches_to_hw);
        metrics.add(names::GLOCK_ACQUIRED, self.glock_acquisitions);

        tracing::trace!(
            commits = self.commits(),
            aborts = self.aborts(),
            "flushed transaction stats"
        );
        *self = TxStats::default();
    }
}
