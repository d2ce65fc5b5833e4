//! Per-thread transaction dispatch
//!
//! ```text
//!            ┌─────────────── mode word ───────────────┐
//!            │                                         │
//!   HW ──> hardware region ──abort──> heuristic ──> deferred SW epoch
//!    │        (reads mode)     │                         │
//!    │                         └─ retries exhausted ──> GLOCK (exclusive)
//!   SW ──> undeferred NOrec transaction
//! GLOCK ──> wait
//! ```

use crate::heuristic::{Heuristic, SwVerdict};
use crate::mode::{Mode, ModeSnapshot};
use crate::runtime::HybridRuntime;
use hytm_htm::{HtmCapability, HwRegion, ABORT_MODE_CHANGED};
use hytm_metrics::names;
use hytm_norec::{Role, ThreadContext, Transaction};
use hytm_primitives::{
    ticks, HardwareAbort, SpinWait, TmWord, TxError, TxResult, FULL_MASK,
};
use std::fmt;

/// Where a transaction body is running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecPath {
    /// Inside a hardware region
    Hardware,
    /// Optimistic NOrec transaction
    Software,
    /// NOrec transaction holding the clock
    Serial,
    /// Alone under the global lock
    Glock,
}

impl fmt::Display for ExecPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecPath::Hardware => write!(f, "hardware"),
            ExecPath::Software => write!(f, "software"),
            ExecPath::Serial => write!(f, "serial"),
            ExecPath::Glock => write!(f, "glock"),
        }
    }
}

/// Transaction handle passed to a body
///
/// The same body may run on any path, several times; it must only touch
/// shared words through this handle.
pub enum HybridTx<'t, 'a> {
    /// Hardware region
    Hardware(&'t mut dyn HwRegion<'a>),
    /// Software transaction
    Software(&'t mut Transaction<'a>),
}

impl<'t, 'a> HybridTx<'t, 'a> {
    /// Read the bytes of `word` selected by `mask`
    pub fn read(&mut self, word: &'a TmWord, mask: u64) -> TxResult<u64> {
        match self {
            HybridTx::Hardware(region) => region.read(word, mask),
            HybridTx::Software(tx) => tx.read(word, mask),
        }
    }

    /// Write the bytes of `value` selected by `mask`
    pub fn write(&mut self, word: &'a TmWord, value: u64, mask: u64) -> TxResult<()> {
        match self {
            HybridTx::Hardware(region) => region.write(word, value, mask),
            HybridTx::Software(tx) => {
                tx.write(word, value, mask);
                Ok(())
            }
        }
    }

    /// Path this attempt runs on
    pub fn path(&self) -> ExecPath {
        match self {
            HybridTx::Hardware(_) => ExecPath::Hardware,
            HybridTx::Software(tx) => match tx.role() {
                Role::Serial => ExecPath::Serial,
                Role::Exclusive => ExecPath::Glock,
                Role::ReadOnly | Role::ReadWrite => ExecPath::Software,
            },
        }
    }
}

impl fmt::Debug for HybridTx<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HybridTx").field(&self.path()).finish()
    }
}

/// Per-thread handle on a [`HybridRuntime`]
///
/// Holds the thread's contention manager, heuristics, statistics and, while
/// the thread runs a software epoch, its registration in the mode word.
/// Dropping the worker ends the epoch and flushes the statistics.
pub struct Worker<'r, H: HtmCapability> {
    runtime: &'r HybridRuntime<H>,
    ctx: ThreadContext,
    heuristic: Heuristic,
    deferred: bool,
}

impl<'r, H: HtmCapability> Worker<'r, H> {
    pub(crate) fn new(runtime: &'r HybridRuntime<H>) -> Self {
        Self {
            runtime,
            ctx: runtime.norec().thread_context(),
            heuristic: Heuristic::new(runtime.config()),
            deferred: false,
        }
    }

    /// Whether this thread currently runs a software epoch
    pub fn is_deferred(&self) -> bool {
        self.deferred
    }

    /// Adaptive state
    pub fn heuristic(&self) -> &Heuristic {
        &self.heuristic
    }

    /// Software engine state of this thread
    pub fn context(&self) -> &ThreadContext {
        &self.ctx
    }

    /// Move this thread's statistics into the runtime's metrics
    pub fn flush_stats(&mut self) {
        self.ctx.flush_stats(self.runtime.metrics());
    }

    /// Run `f` atomically, retrying on whatever path the mode allows until
    /// it commits
    pub fn atomically<'a, R, F>(&mut self, mut f: F) -> R
    where
        'r: 'a,
        F: FnMut(&mut HybridTx<'_, 'a>) -> TxResult<R>,
    {
        let runtime = self.runtime;
        let max_retries = runtime.config().htm_max_retries;
        let mut hw_failures = 0u32;
        let mut wait = SpinWait::new();

        loop {
            if self.deferred {
                return self.run_deferred(&mut f);
            }

            let snapshot = runtime.mode_snapshot();
            match snapshot.mode {
                Mode::Glock => {
                    runtime.mode_indicator().wait_while_glock();
                    wait.reset();
                }
                Mode::Sw => {
                    if let Some(value) = self.run_undeferred(snapshot, &mut f) {
                        return value;
                    }
                    // Epoch draining; the word returns to HW shortly
                    wait.spin();
                }
                Mode::Hw if hw_failures >= max_retries => {
                    if let Some(value) = self.run_glock(&mut f) {
                        return value;
                    }
                    wait.spin();
                }
                Mode::Hw => match self.run_hardware(&mut f) {
                    Ok(value) => return value,
                    Err(abort) if abort.explicit_code() == Some(ABORT_MODE_CHANGED) => {}
                    Err(abort) => {
                        hw_failures += 1;
                        tracing::trace!(
                            attempt = hw_failures,
                            reason = %abort.reason,
                            may_retry = abort.may_retry,
                            "hardware transaction aborted"
                        );
                        if self.heuristic.favors_software(&abort) {
                            self.begin_deferred();
                        } else if abort.is_persistent() && !abort.is_capacity() {
                            // No retry hint from the hardware
                            hw_failures = max_retries;
                        }
                    }
                },
            }
        }
    }

    // ==================== Hardware ====================

    fn run_hardware<'a, R, F>(&mut self, f: &mut F) -> Result<R, HardwareAbort>
    where
        'r: 'a,
        F: FnMut(&mut HybridTx<'_, 'a>) -> TxResult<R>,
    {
        let runtime = self.runtime;
        let mode_word: &'a TmWord = runtime.mode_indicator().word();

        let start = ticks();
        let result = runtime.htm().execute(&mut |region| {
            if ModeSnapshot::decode(region.read(mode_word, FULL_MASK)?).mode != Mode::Hw {
                return Err(region.abort(ABORT_MODE_CHANGED));
            }
            let mut tx = HybridTx::Hardware(region);
            f(&mut tx)
        });
        let elapsed = ticks().saturating_sub(start);

        let sample = match &result {
            Ok(_) => {
                self.ctx.stats_mut().commits_hw += 1;
                self.ctx.notify_commit();
                self.heuristic.record_hw_commit(elapsed)
            }
            Err(abort) => {
                self.ctx.stats_mut().record_abort(&TxError::from(*abort));
                if abort.explicit_code() == Some(ABORT_MODE_CHANGED) {
                    None
                } else {
                    self.heuristic.record_hw_abort(elapsed, abort)
                }
            }
        };
        if let Some(sample) = sample {
            if sample.mean_cost.is_finite() {
                runtime.metrics().observe(names::COST_HW, sample.mean_cost as u64);
            }
        }
        result
    }

    // ==================== Software ====================

    fn run_software<'a, R, F>(&mut self, f: &mut F) -> R
    where
        'r: 'a,
        F: FnMut(&mut HybridTx<'_, 'a>) -> TxResult<R>,
    {
        let runtime = self.runtime;
        runtime
            .norec()
            .atomically(&mut self.ctx, |tx| f(&mut HybridTx::Software(tx)))
    }

    fn run_undeferred<'a, R, F>(&mut self, seen: ModeSnapshot, f: &mut F) -> Option<R>
    where
        'r: 'a,
        F: FnMut(&mut HybridTx<'_, 'a>) -> TxResult<R>,
    {
        let next = seen.enter_undeferred()?;
        if !self.runtime.transition(seen, next) {
            return None;
        }
        let epoch = EpochGuard {
            runtime: self.runtime,
            released: false,
        };
        let value = self.run_software(f);
        if epoch.release() {
            self.ctx.stats_mut().switches_to_hw += 1;
        }
        Some(value)
    }

    /// Register as deferred and make sure the mode is SW
    fn begin_deferred(&mut self) {
        let runtime = self.runtime;
        if runtime.update(ModeSnapshot::enter_deferred).is_none() {
            // GLOCK holder active; retry from dispatch
            return;
        }
        if runtime.update(ModeSnapshot::flip_to_sw).is_some() {
            self.ctx.stats_mut().switches_to_sw += 1;
            tracing::debug!(
                last_hw_cost = self.heuristic.hw_estimate().mean_cost,
                "thread moved the runtime to software"
            );
        }
        self.deferred = true;
        self.heuristic.begin_sw_epoch();
    }

    fn run_deferred<'a, R, F>(&mut self, f: &mut F) -> R
    where
        'r: 'a,
        F: FnMut(&mut HybridTx<'_, 'a>) -> TxResult<R>,
    {
        let start = ticks();
        let value = self.run_software(f);
        let elapsed = ticks().saturating_sub(start);

        let verdict = self.heuristic.record_sw_commit(elapsed);
        if verdict != SwVerdict::Stay {
            if let Some(mean) = self.heuristic.last_sw_mean() {
                self.runtime.metrics().observe(names::COST_SW, mean as u64);
            }
        }
        match verdict {
            SwVerdict::ReturnToHw => {
                tracing::debug!(
                    sw_mean = ?self.heuristic.last_sw_mean(),
                    last_hw_cost = self.heuristic.last_hw_cost(),
                    "software epoch ending"
                );
                self.end_deferred();
            }
            SwVerdict::Extend => {
                tracing::trace!(window = self.heuristic.sw_window(), "software window extended");
            }
            SwVerdict::Stay => {}
        }
        value
    }

    fn end_deferred(&mut self) {
        if !self.deferred {
            return;
        }
        self.deferred = false;
        if self.runtime.leave(ModeSnapshot::leave_deferred) {
            self.ctx.stats_mut().switches_to_hw += 1;
        }
    }

    // ==================== Global lock ====================

    fn run_glock<'a, R, F>(&mut self, f: &mut F) -> Option<R>
    where
        'r: 'a,
        F: FnMut(&mut HybridTx<'_, 'a>) -> TxResult<R>,
    {
        let runtime = self.runtime;
        let seen = runtime.mode_snapshot();
        let next = seen.acquire_glock()?;
        if !runtime.transition(seen, next) {
            return None;
        }
        let _glock = GlockGuard { runtime };

        self.ctx.stats_mut().glock_acquisitions += 1;
        tracing::warn!(
            retries = runtime.config().htm_max_retries,
            "hardware retries exhausted, running under the global lock"
        );

        let norec = runtime.norec();
        let mut tx = Transaction::new(norec.clock());
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = norec.attempt_exclusive(&mut self.ctx, &mut tx, &mut |attempt_tx| {
                f(&mut HybridTx::Software(attempt_tx))
            });
            match result {
                Ok(value) => return Some(value),
                Err(err) => {
                    tracing::trace!(attempt, error = %err, "exclusive attempt aborted by body");
                }
            }
        }
    }
}

impl<H: HtmCapability> Drop for Worker<'_, H> {
    fn drop(&mut self) {
        self.end_deferred();
        self.flush_stats();
    }
}

impl<H: HtmCapability> fmt::Debug for Worker<'_, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("deferred", &self.deferred)
            .field("ctx", &self.ctx)
            .finish()
    }
}

impl<H: HtmCapability> HybridRuntime<H> {
    /// Apply a leave step; returns true if it moved the mode from SW to HW
    pub(crate) fn leave(&self, step: fn(&ModeSnapshot) -> Option<ModeSnapshot>) -> bool {
        match self.update(step) {
            Some((before, after)) => before.mode == Mode::Sw && after.mode == Mode::Hw,
            None => false,
        }
    }
}

/// Undeferred registration, released even if the body panics
struct EpochGuard<'r, H: HtmCapability> {
    runtime: &'r HybridRuntime<H>,
    released: bool,
}

impl<H: HtmCapability> EpochGuard<'_, H> {
    fn release(mut self) -> bool {
        self.released = true;
        self.runtime.leave(ModeSnapshot::leave_undeferred)
    }
}

impl<H: HtmCapability> Drop for EpochGuard<'_, H> {
    fn drop(&mut self) {
        if !self.released {
            self.runtime.leave(ModeSnapshot::leave_undeferred);
        }
    }
}

struct GlockGuard<'r, H: HtmCapability> {
    runtime: &'r HybridRuntime<H>,
}

impl<H: HtmCapability> Drop for GlockGuard<'_, H> {
    fn drop(&mut self) {
        let held = ModeSnapshot::new(Mode::Glock, 0, 0);
        if !self.runtime.transition(held, ModeSnapshot::INITIAL) {
            tracing::error!(mode = %self.runtime.mode_snapshot(), "global lock lost while held");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HybridConfig;
    use hytm_htm::{EmulatedHtm, NoHtm};
    use hytm_primitives::AbortReason;

    #[test]
    fn test_hardware_path_commits() {
        let runtime = HybridRuntime::new(EmulatedHtm::new(), HybridConfig::default()).unwrap();
        let counter = TmWord::new(0);
        let mut worker = runtime.worker();

        let path = worker.atomically(|tx| {
            let v = tx.read(&counter, FULL_MASK)?;
            tx.write(&counter, v + 1, FULL_MASK)?;
            Ok(tx.path())
        });

        assert_eq!(path, ExecPath::Hardware);
        assert_eq!(counter.get(), 1);
        assert_eq!(worker.context().stats().commits_hw, 1);
        assert_eq!(runtime.current_mode(), Mode::Hw);
    }

    #[test]
    fn test_no_htm_goes_deferred_immediately() {
        let runtime = HybridRuntime::new(NoHtm, HybridConfig::default()).unwrap();
        let counter = TmWord::new(0);
        let mut worker = runtime.worker();

        let path = worker.atomically(|tx| {
            let v = tx.read(&counter, FULL_MASK)?;
            tx.write(&counter, v + 1, FULL_MASK)?;
            Ok(tx.path())
        });

        assert_eq!(path, ExecPath::Software);
        assert!(worker.is_deferred());
        assert_eq!(runtime.mode_snapshot(), ModeSnapshot::new(Mode::Sw, 1, 0));
        assert_eq!(worker.context().stats().switches_to_sw, 1);
        assert_eq!(worker.context().stats().aborts_other, 1);

        drop(worker);
        assert_eq!(runtime.mode_snapshot(), ModeSnapshot::INITIAL);
        assert_eq!(runtime.metrics().counter(names::SWITCH_TO_HW), 1);
        assert_eq!(runtime.metrics().counter(names::COMMIT_SW), 1);
    }

    #[test]
    fn test_deferred_probe_returns_to_hw() {
        let config = HybridConfig {
            sw_window_initial: 1,
            sw_window_max: 2,
            ..HybridConfig::default()
        };
        let runtime = HybridRuntime::new(NoHtm, config).unwrap();
        let counter = TmWord::new(0);
        let mut worker = runtime.worker();

        // No hardware cost known: window 1 extends, window 2 probes hardware
        for _ in 0..3 {
            worker.atomically(|tx| {
                let v = tx.read(&counter, FULL_MASK)?;
                tx.write(&counter, v + 1, FULL_MASK)
            });
        }
        assert!(!worker.is_deferred());
        assert_eq!(runtime.mode_snapshot(), ModeSnapshot::INITIAL);
        assert_eq!(worker.context().stats().switches_to_hw, 1);
        assert_eq!(counter.get(), 3);
    }

    #[test]
    fn test_undeferred_joins_live_epoch() {
        let runtime = HybridRuntime::new(NoHtm, HybridConfig::default()).unwrap();
        let counter = TmWord::new(0);

        let mut deferred = runtime.worker();
        deferred.atomically(|tx| tx.read(&counter, FULL_MASK));
        assert!(deferred.is_deferred());

        let mut other = runtime.worker();
        let path = other.atomically(|tx| {
            let v = tx.read(&counter, FULL_MASK)?;
            tx.write(&counter, v + 5, FULL_MASK)?;
            Ok(tx.path())
        });
        assert_eq!(path, ExecPath::Software);
        assert!(!other.is_deferred());
        assert_eq!(runtime.mode_snapshot(), ModeSnapshot::new(Mode::Sw, 1, 0));
        assert_eq!(counter.get(), 5);
    }

    #[test]
    fn test_conflicts_escalate_to_glock() {
        let config = HybridConfig {
            htm_max_retries: 3,
            ..HybridConfig::default()
        };
        let htm = EmulatedHtm::new();
        htm.faults()
            .fail_always(HardwareAbort::new(AbortReason::Conflict, true));
        let runtime = HybridRuntime::new(htm, config).unwrap();
        let counter = TmWord::new(0);
        let mut worker = runtime.worker();

        let path = worker.atomically(|tx| {
            let v = tx.read(&counter, FULL_MASK)?;
            tx.write(&counter, v + 1, FULL_MASK)?;
            Ok(tx.path())
        });

        assert_eq!(path, ExecPath::Glock);
        assert_eq!(counter.get(), 1);
        assert_eq!(worker.context().stats().aborts_conflict, 3);
        assert_eq!(worker.context().stats().glock_acquisitions, 1);
        assert_eq!(worker.context().stats().commits_glock, 1);
        assert_eq!(runtime.mode_snapshot(), ModeSnapshot::INITIAL);
    }

    #[test]
    fn test_persistent_conflict_skips_hardware_retries() {
        let config = HybridConfig {
            htm_max_retries: 5,
            ..HybridConfig::default()
        };
        let htm = EmulatedHtm::new();
        htm.faults()
            .fail_next(HardwareAbort::new(AbortReason::Conflict, false), 1);
        let runtime = HybridRuntime::new(htm, config).unwrap();
        let counter = TmWord::new(0);
        let mut worker = runtime.worker();

        let path = worker.atomically(|tx| {
            let v = tx.read(&counter, FULL_MASK)?;
            tx.write(&counter, v + 1, FULL_MASK)?;
            Ok(tx.path())
        });

        // A retry would have committed in hardware
        assert_eq!(path, ExecPath::Glock);
        assert_eq!(counter.get(), 1);
        assert_eq!(worker.context().stats().aborts_conflict, 1);
        assert_eq!(worker.context().stats().commits_hw, 0);
        assert_eq!(worker.context().stats().commits_glock, 1);
        assert_eq!(runtime.mode_snapshot(), ModeSnapshot::INITIAL);
    }

    #[test]
    fn test_exec_path_display() {
        assert_eq!(ExecPath::Glock.to_string(), "glock");
        assert_eq!(ExecPath::Hardware.to_string(), "hardware");
    }
}
