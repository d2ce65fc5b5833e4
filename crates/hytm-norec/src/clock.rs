//! Global sequence lock
//!
//! Even values mean no commit is in progress and equal twice the number of
//! publications so far; an odd value means a committer holds the lock.
//!
//! ```text
//! reader:  s = now()        (Acquire)
//!          loads            (Relaxed)
//!          fence(Acquire)
//!          now_relaxed() == s ?
//!
//! writer:  CAS(v, v + 1)    (Acquire)
//!          fence(Release)
//!          stores           (Relaxed)
//!          store(v + 2)     (Release)
//! ```

use hytm_primitives::{CachePadded, SpinWait, Timestamp};
use std::sync::atomic::{fence, AtomicU64, Ordering};

/// Global sequence lock and commit timestamp
#[derive(Debug, Default)]
pub struct Clock {
    seq: CachePadded<AtomicU64>,
}

impl Clock {
    /// Create a clock at time zero
    pub fn new() -> Self {
        Self {
            seq: CachePadded::new(AtomicU64::new(0)),
        }
    }

    /// Current raw value
    #[inline]
    pub fn now(&self) -> Timestamp {
        self.seq.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn now_relaxed(&self) -> Timestamp {
        self.seq.load(Ordering::Relaxed)
    }

    /// Current value rounded down to even
    ///
    /// A transaction that begins during a commit adopts the pre-commit
    /// snapshot instead of waiting; its first read will notice the change
    /// and validate.
    #[inline]
    pub fn snapshot(&self) -> Timestamp {
        self.now() & !1
    }

    /// Check whether a commit holds the lock
    pub fn is_locked(&self) -> bool {
        self.now() & 1 == 1
    }

    /// Spin until no commit is in progress and return the even value seen
    pub fn wait_unlocked(&self) -> Timestamp {
        let mut wait = SpinWait::new();
        loop {
            let now = self.now();
            if now & 1 == 0 {
                return now;
            }
            wait.spin();
        }
    }

    /// Try to take the lock, expecting it at `expected`
    ///
    /// Succeeds only if nothing committed since `expected` was observed.
    #[inline]
    pub fn try_lock(&self, expected: Timestamp) -> bool {
        debug_assert_eq!(expected & 1, 0, "lock expected at an odd timestamp");
        if self
            .seq
            .compare_exchange(expected, expected + 1, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return false;
        }
        // Order the write-back after the odd value for readers that fence.
        fence(Ordering::Release);
        true
    }

    /// Release the lock taken at `locked_at`, publishing a new timestamp
    #[inline]
    pub fn unlock(&self, locked_at: Timestamp) {
        debug_assert_eq!(self.now_relaxed(), locked_at + 1, "unlock without holding the clock");
        self.seq.store(locked_at + 2, Ordering::Release);
    }

    /// Number of publications so far
    pub fn commit_count(&self) -> u64 {
        self.snapshot() / 2
    }
}
