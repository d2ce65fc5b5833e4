//! Software model of a best-effort HTM
//!
//! Regions buffer their writes and validate their reads by value, like a
//! NOrec transaction, but against a private version counter. Commits and
//! capability-mediated CAS both run under a bus lock and inside an odd
//! version window, so a running region observes either of them as a
//! conflict the next time it reads. A region never sees a torn state.
//!
//! Two properties of real hardware are modelled on purpose:
//! - a footprint limit, beyond which the region aborts with `Capacity`
//! - injected faults, to drive the hybrid protocol through rare paths

use crate::capability::{body_abort, HtmCapability, HwRegion};
use hytm_primitives::{
    merge, AbortReason, CachePadded, HardwareAbort, ReadLog, SpinWait, TmWord, TxError, TxResult,
    WriteLog,
};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{fence, AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Callback run right before a region takes the bus lock to commit
pub type CommitHook = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy)]
struct ForcedAbort {
    abort: HardwareAbort,
    remaining: Option<u64>,
}

/// Fault injection for [`EmulatedHtm`]
#[derive(Default)]
pub struct FaultInjector {
    armed: AtomicBool,
    forced: Mutex<Option<ForcedAbort>>,
    hook: Mutex<Option<CommitHook>>,
    injected: AtomicU64,
}

impl FaultInjector {
    /// Create an injector with no faults armed
    pub fn new() -> Self {
        Self::default()
    }

    /// Abort the next `attempts` regions with `abort` before they run
    pub fn fail_next(&self, abort: HardwareAbort, attempts: u64) {
        tracing::debug!(reason = ?abort.reason, attempts, "arming injected aborts");
        *self.forced.lock() = Some(ForcedAbort {
            abort,
            remaining: Some(attempts),
        });
        self.rearm();
    }

    /// Abort every region with `abort` until cleared
    pub fn fail_always(&self, abort: HardwareAbort) {
        tracing::debug!(reason = ?abort.reason, "arming persistent injected aborts");
        *self.forced.lock() = Some(ForcedAbort {
            abort,
            remaining: None,
        });
        self.rearm();
    }

    /// Stop forcing aborts
    pub fn clear(&self) {
        *self.forced.lock() = None;
        self.rearm();
    }

    /// Run `hook` before every commit attempt
    pub fn on_before_commit<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.hook.lock() = Some(Arc::new(hook));
        self.rearm();
    }

    /// Remove the before-commit hook
    pub fn clear_before_commit(&self) {
        *self.hook.lock() = None;
        self.rearm();
    }

    /// Number of aborts injected so far
    pub fn injected(&self) -> u64 {
        self.injected.load(Ordering::Relaxed)
    }

    fn rearm(&self) {
        let armed = self.forced.lock().is_some() || self.hook.lock().is_some();
        self.armed.store(armed, Ordering::Release);
    }

    fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    fn take_forced(&self) -> Option<HardwareAbort> {
        if !self.is_armed() {
            return None;
        }
        let mut forced = self.forced.lock();
        let current = forced.as_mut()?;
        if current.remaining == Some(0) {
            *forced = None;
            drop(forced);
            self.rearm();
            return None;
        }
        if let Some(n) = current.remaining.as_mut() {
            *n -= 1;
        }
        let abort = current.abort;
        self.injected.fetch_add(1, Ordering::Relaxed);
        Some(abort)
    }

    fn before_commit(&self) -> Option<CommitHook> {
        if !self.is_armed() {
            return None;
        }
        self.hook.lock().clone()
    }
}

impl fmt::Debug for FaultInjector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaultInjector")
            .field("forced", &*self.forced.lock())
            .field("hook", &self.hook.lock().is_some())
            .field("injected", &self.injected())
            .finish()
    }
}

/// Emulated hardware transactional memory
#[derive(Debug)]
pub struct EmulatedHtm {
    bus: Mutex<()>,
    version: CachePadded<AtomicU64>,
    capacity: usize,
    faults: FaultInjector,
    started: AtomicU64,
    committed: AtomicU64,
}

impl EmulatedHtm {
    /// Footprint limit used by [`EmulatedHtm::new`]
    pub const DEFAULT_CAPACITY: usize = 512;

    /// Create an emulator with the default footprint limit
    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    /// Create an emulator that aborts regions touching more than
    /// `capacity` distinct reads and writes
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bus: Mutex::new(()),
            version: CachePadded::new(AtomicU64::new(0)),
            capacity: capacity.max(1),
            faults: FaultInjector::new(),
            started: AtomicU64::new(0),
            committed: AtomicU64::new(0),
        }
    }

    /// Footprint limit
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Fault injection controls
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Regions started
    pub fn started(&self) -> u64 {
        self.started.load(Ordering::Relaxed)
    }

    /// Regions committed
    pub fn committed(&self) -> u64 {
        self.committed.load(Ordering::Relaxed)
    }

    fn stable_version(&self) -> u64 {
        let mut wait = SpinWait::new();
        loop {
            let version = self.version.load(Ordering::Acquire);
            if version & 1 == 0 {
                return version;
            }
            wait.spin();
        }
    }

    /// Run `publish` inside an odd version window under the bus lock
    fn publish<T>(&self, publish: impl FnOnce() -> T) -> T {
        let version = self.version.load(Ordering::Relaxed);
        self.version.store(version + 1, Ordering::Relaxed);
        fence(Ordering::Release);
        let out = publish();
        self.version.store(version + 2, Ordering::Release);
        out
    }
}

impl Default for EmulatedHtm {
    fn default() -> Self {
        Self::new()
    }
}

struct EmulatedRegion<'h, 'a> {
    htm: &'h EmulatedHtm,
    start: u64,
    reads: ReadLog<'a>,
    writes: WriteLog<'a>,
    doomed: Option<HardwareAbort>,
}

impl<'h, 'a> EmulatedRegion<'h, 'a> {
    fn new(htm: &'h EmulatedHtm) -> Self {
        Self {
            htm,
            start: htm.stable_version(),
            reads: ReadLog::new(),
            writes: WriteLog::new(),
            doomed: None,
        }
    }

    fn doom(&mut self, abort: HardwareAbort) -> TxError {
        self.doomed = Some(abort);
        abort.into()
    }

    fn check(&self) -> TxResult<()> {
        match self.doomed {
            Some(abort) => Err(abort.into()),
            None => Ok(()),
        }
    }

    fn reserve(&mut self) -> TxResult<()> {
        if self.reads.len() + self.writes.len() >= self.htm.capacity {
            return Err(self.doom(HardwareAbort::new(AbortReason::Capacity, false)));
        }
        Ok(())
    }

    fn revalidate(&mut self) -> TxResult<()> {
        let mut wait = SpinWait::new();
        loop {
            let seen = self.htm.version.load(Ordering::Acquire);
            if seen & 1 == 1 {
                wait.spin();
                continue;
            }
            let consistent = self.reads.is_consistent();
            fence(Ordering::Acquire);
            if !consistent {
                return Err(self.doom(HardwareAbort::new(AbortReason::Conflict, true)));
            }
            if self.htm.version.load(Ordering::Relaxed) == seen {
                self.start = seen;
                return Ok(());
            }
        }
    }

    fn commit(self) -> Result<(), HardwareAbort> {
        if let Some(abort) = self.doomed {
            return Err(abort);
        }
        if let Some(hook) = self.htm.faults.before_commit() {
            hook();
        }

        let _bus = self.htm.bus.lock();
        if !self.reads.is_consistent() {
            return Err(HardwareAbort::new(AbortReason::Conflict, true));
        }
        if !self.writes.is_empty() {
            self.htm.publish(|| self.writes.write_back());
        }
        Ok(())
    }
}

impl<'h, 'a> HwRegion<'a> for EmulatedRegion<'h, 'a> {
    fn read(&mut self, word: &'a TmWord, mask: u64) -> TxResult<u64> {
        self.check()?;

        let (buffered, covered) = match self.writes.find(word) {
            Some(entry) => (entry.value, entry.mask & mask),
            None => (0, 0),
        };
        if covered == mask {
            return Ok(buffered & mask);
        }
        self.reserve()?;

        let remaining = mask & !covered;
        loop {
            let value = word.load(Ordering::Relaxed);
            fence(Ordering::Acquire);
            if self.htm.version.load(Ordering::Relaxed) == self.start {
                self.reads.record(word, value, remaining);
                return Ok(merge(value & remaining, buffered, covered));
            }
            self.revalidate()?;
        }
    }

    fn write(&mut self, word: &'a TmWord, value: u64, mask: u64) -> TxResult<()> {
        self.check()?;
        if self.writes.find(word).is_none() {
            self.reserve()?;
        }
        self.writes.insert(word, value, mask);
        Ok(())
    }

    fn abort(&mut self, code: u8) -> TxError {
        self.doom(HardwareAbort::explicit(code))
    }
}

impl HtmCapability for EmulatedHtm {
    fn is_supported(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "emulated"
    }

    fn execute<'a, R>(
        &self,
        body: &mut dyn FnMut(&mut dyn HwRegion<'a>) -> TxResult<R>,
    ) -> Result<R, HardwareAbort> {
        self.started.fetch_add(1, Ordering::Relaxed);
        if let Some(abort) = self.faults.take_forced() {
            return Err(abort);
        }

        let mut region = EmulatedRegion::new(self);
        match body(&mut region) {
            Ok(value) => {
                region.commit()?;
                self.committed.fetch_add(1, Ordering::Relaxed);
                Ok(value)
            }
            Err(err) => Err(region.doomed.unwrap_or_else(|| body_abort(err))),
        }
    }

    fn compare_exchange(&self, word: &TmWord, current: u64, new: u64) -> Result<u64, u64> {
        let _bus = self.bus.lock();
        self.publish(|| word.compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ABORT_USER;
    use hytm_primitives::{byte_mask, FULL_MASK};

    fn increment(htm: &EmulatedHtm, word: &TmWord) -> Result<u64, HardwareAbort> {
        htm.execute(&mut |region| {
            let v = region.read(word, FULL_MASK)?;
            region.write(word, v + 1, FULL_MASK)?;
            Ok(v + 1)
        })
    }

    // ==================== Region Tests ====================

    #[test]
    fn test_commit_publishes_writes() {
        let htm = EmulatedHtm::new();
        let word = TmWord::new(1);

        assert_eq!(increment(&htm, &word), Ok(2));
        assert_eq!(word.get(), 2);
        assert_eq!(htm.started(), 1);
        assert_eq!(htm.committed(), 1);
    }

    #[test]
    fn test_read_own_partial_write() {
        let htm = EmulatedHtm::new();
        let word = TmWord::new(0x1111_1111);

        let value = htm
            .execute(&mut |region| {
                region.write(&word, 0xAB00, byte_mask(1, 1))?;
                region.read(&word, byte_mask(0, 2))
            })
            .unwrap();
        assert_eq!(value, 0xAB11);
        assert_eq!(word.get(), 0x1111_AB11);
    }

    #[test]
    fn test_user_error_maps_to_explicit_abort() {
        let htm = EmulatedHtm::new();
        let word = TmWord::new(0);

        let result: Result<(), _> = htm.execute(&mut |region| {
            region.write(&word, 9, FULL_MASK)?;
            Err(TxError::ValidationFailure)
        });
        assert_eq!(result, Err(HardwareAbort::explicit(ABORT_USER)));
        assert_eq!(word.get(), 0);
    }

    #[test]
    fn test_explicit_abort_code() {
        let htm = EmulatedHtm::new();
        let result: Result<(), _> = htm.execute(&mut |region| Err(region.abort(0x33)));
        assert_eq!(result.unwrap_err().explicit_code(), Some(0x33));
    }

    #[test]
    fn test_capacity_abort() {
        let htm = EmulatedHtm::with_capacity(4);
        let words: Vec<TmWord> = (0..8).map(TmWord::new).collect();

        let result = htm.execute(&mut |region| {
            let mut sum = 0;
            for w in &words {
                sum += region.read(w, FULL_MASK)?;
            }
            Ok(sum)
        });
        let abort = result.unwrap_err();
        assert!(abort.is_capacity());
        assert!(abort.is_persistent());

        let small = htm.execute(&mut |region| region.read(&words[7], FULL_MASK));
        assert_eq!(small, Ok(7));
    }

    #[test]
    fn test_swallowed_abort_still_aborts() {
        let htm = EmulatedHtm::with_capacity(1);
        let a = TmWord::new(0);
        let b = TmWord::new(0);

        let result = htm.execute(&mut |region| {
            region.read(&a, FULL_MASK)?;
            let _ = region.read(&b, FULL_MASK);
            Ok(())
        });
        assert!(result.unwrap_err().is_capacity());
    }

    // ==================== Isolation Tests ====================

    #[test]
    fn test_strong_cas_dooms_running_region() {
        let htm = EmulatedHtm::new();
        let flag = TmWord::new(0);
        let data = TmWord::new(0);

        let result = htm.execute(&mut |region| {
            assert_eq!(region.read(&flag, FULL_MASK)?, 0);
            // Another agent flips the flag mid-region
            assert_eq!(htm.compare_exchange(&flag, 0, 1), Ok(0));
            region.read(&data, FULL_MASK)
        });

        let abort = result.unwrap_err();
        assert_eq!(abort.reason, AbortReason::Conflict);
        assert!(!abort.is_persistent());
    }

    #[test]
    fn test_unrelated_cas_extends_snapshot() {
        let htm = EmulatedHtm::new();
        let flag = TmWord::new(0);
        let other = TmWord::new(0);
        let data = TmWord::new(5);

        let result = htm.execute(&mut |region| {
            region.read(&flag, FULL_MASK)?;
            assert_eq!(htm.compare_exchange(&other, 0, 1), Ok(0));
            region.read(&data, FULL_MASK)
        });
        assert_eq!(result, Ok(5));
    }

    #[test]
    fn test_concurrent_increments() {
        let htm = EmulatedHtm::new();
        let word = TmWord::new(0);

        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..1_000 {
                        while increment(&htm, &word).is_err() {}
                    }
                });
            }
        });
        assert_eq!(word.get(), 4_000);
        assert_eq!(htm.committed(), 4_000);
    }

    // ==================== Fault Injection Tests ====================

    #[test]
    fn test_fail_next_counts_down() {
        let htm = EmulatedHtm::new();
        let word = TmWord::new(0);
        htm.faults()
            .fail_next(HardwareAbort::new(AbortReason::Capacity, false), 2);

        assert!(increment(&htm, &word).unwrap_err().is_capacity());
        assert!(increment(&htm, &word).unwrap_err().is_capacity());
        assert_eq!(increment(&htm, &word), Ok(1));
        assert_eq!(htm.faults().injected(), 2);
    }

    #[test]
    fn test_fail_always_until_cleared() {
        let htm = EmulatedHtm::new();
        let word = TmWord::new(0);
        htm.faults()
            .fail_always(HardwareAbort::new(AbortReason::Conflict, true));

        for _ in 0..10 {
            assert!(increment(&htm, &word).is_err());
        }
        htm.faults().clear();
        assert_eq!(increment(&htm, &word), Ok(1));
        assert_eq!(htm.faults().injected(), 10);
    }

    #[test]
    fn test_before_commit_hook_runs() {
        let htm = EmulatedHtm::new();
        let word = TmWord::new(0);
        let calls = Arc::new(AtomicU64::new(0));

        let counter = Arc::clone(&calls);
        htm.faults().on_before_commit(move || {
            counter.fetch_add(1, Ordering::Relaxed);
        });
        increment(&htm, &word).unwrap();
        htm.faults().clear_before_commit();
        increment(&htm, &word).unwrap();

        assert_eq!(calls.load(Ordering::Relaxed), 1);
        assert_eq!(word.get(), 2);
    }
}
