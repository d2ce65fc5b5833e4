//! NOrec transaction attempts
//!
//! A `Transaction` is one thread's view of shared memory between `begin`
//! and `commit`. Reads are checked against the global clock and revalidated
//! by value whenever another commit has been published; writes are buffered
//! and published under the clock at commit.

use crate::clock::Clock;
use hytm_primitives::{
    merge, ReadLog, SpinWait, Timestamp, TmWord, TxError, TxResult, WriteLog,
};
use std::sync::atomic::{fence, Ordering};

/// What an attempt is allowed to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Nothing written yet; commits without the lock
    ReadOnly,
    /// At least one buffered write; commits under the lock
    ReadWrite,
    /// Holds the clock for the whole attempt
    Serial,
    /// Runs alone by external arrangement; never touches the clock
    Exclusive,
}

impl Role {
    /// Whether reads go straight to memory without validation
    pub fn is_irrevocable(&self) -> bool {
        matches!(self, Role::Serial | Role::Exclusive)
    }
}

/// How an attempt committed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitKind {
    /// No writes, no lock
    ReadOnly,
    /// Optimistic commit through the clock CAS
    ReadWrite,
    /// Serialized attempt
    Serial,
    /// Exclusive attempt
    Exclusive,
}

/// A software transaction attempt
///
/// The same value is reused across the attempts of one atomic block so the
/// logs keep their allocations.
#[derive(Debug)]
pub struct Transaction<'a> {
    clock: &'a Clock,
    start: Timestamp,
    role: Role,
    reads: ReadLog<'a>,
    writes: WriteLog<'a>,
    lock_attempts: u64,
    active: bool,
}

impl<'a> Transaction<'a> {
    /// Create an idle transaction bound to `clock`
    pub fn new(clock: &'a Clock) -> Self {
        Self {
            clock,
            start: clock.snapshot(),
            role: Role::ReadOnly,
            reads: ReadLog::new(),
            writes: WriteLog::new(),
            lock_attempts: 0,
            active: false,
        }
    }

    fn reset(&mut self, role: Role) {
        debug_assert!(!self.active, "begin on an active transaction");
        self.reads.clear();
        self.writes.clear();
        self.role = role;
        self.active = true;
    }

    /// Start an optimistic attempt
    pub fn begin(&mut self) {
        self.reset(Role::ReadOnly);
        self.start = self.clock.snapshot();
    }

    /// Start an attempt that holds the clock until it commits or rolls back
    pub fn begin_serial(&mut self) {
        self.reset(Role::Serial);
        loop {
            let now = self.clock.wait_unlocked();
            self.lock_attempts += 1;
            if self.clock.try_lock(now) {
                self.start = now;
                return;
            }
        }
    }

    /// Start an attempt the caller guarantees runs alone
    pub fn begin_exclusive(&mut self) {
        self.reset(Role::Exclusive);
        self.start = self.clock.snapshot();
    }

    /// Snapshot the attempt is consistent with
    pub fn start_time(&self) -> Timestamp {
        self.start
    }

    /// Current role
    pub fn role(&self) -> Role {
        self.role
    }

    /// Check whether the attempt has begun and not yet finished
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Number of logged reads
    pub fn read_count(&self) -> usize {
        self.reads.len()
    }

    /// Number of distinct words written
    pub fn write_count(&self) -> usize {
        self.writes.len()
    }

    /// CAS attempts on the clock since the last call
    pub fn take_lock_attempts(&mut self) -> u64 {
        std::mem::take(&mut self.lock_attempts)
    }

    /// Read the bytes of `word` selected by `mask`
    ///
    /// Bytes outside `mask` are zero in the result. Buffered writes of this
    /// attempt take precedence over memory.
    pub fn read(&mut self, word: &'a TmWord, mask: u64) -> TxResult<u64> {
        debug_assert!(self.active, "read outside a transaction");

        let (buffered, covered) = match self.writes.find(word) {
            Some(entry) => (entry.value, entry.mask & mask),
            None => (0, 0),
        };
        if covered == mask {
            return Ok(buffered & mask);
        }

        let remaining = mask & !covered;
        let value = if self.role.is_irrevocable() {
            word.load(Ordering::Acquire)
        } else {
            self.read_shared(word, remaining)?
        };
        Ok(merge(value & remaining, buffered, covered))
    }

    fn read_shared(&mut self, word: &'a TmWord, mask: u64) -> TxResult<u64> {
        loop {
            let value = word.load(Ordering::Relaxed);
            fence(Ordering::Acquire);
            if self.clock.now_relaxed() == self.start {
                self.reads.record(word, value, mask);
                return Ok(value);
            }
            self.start = self.validate()?;
        }
    }

    /// Buffer a write of the bytes of `value` selected by `mask`
    pub fn write(&mut self, word: &'a TmWord, value: u64, mask: u64) {
        debug_assert!(self.active, "write outside a transaction");
        if self.role == Role::ReadOnly {
            self.role = Role::ReadWrite;
        }
        self.writes.insert(word, value, mask);
    }

    /// Check the read log against memory at a quiescent clock value
    ///
    /// Returns the clock value the log is consistent with.
    pub fn validate(&self) -> TxResult<Timestamp> {
        let mut wait = SpinWait::new();
        loop {
            let seen = self.clock.now();
            if seen & 1 == 1 {
                wait.spin();
                continue;
            }
            let consistent = self.reads.is_consistent();
            fence(Ordering::Acquire);
            if !consistent {
                return Err(TxError::ValidationFailure);
            }
            if self.clock.now_relaxed() == seen {
                return Ok(seen);
            }
        }
    }

    /// Publish the attempt
    ///
    /// A writer that loses the clock CAS revalidates and retries the CAS;
    /// if a concurrent commit invalidated its reads it fails with
    /// `TxError::CommitRace`. On error the attempt is still active and must
    /// be rolled back.
    pub fn commit(&mut self) -> TxResult<CommitKind> {
        debug_assert!(self.active, "commit outside a transaction");
        let kind = match self.role {
            Role::ReadOnly => CommitKind::ReadOnly,
            Role::ReadWrite => {
                loop {
                    self.lock_attempts += 1;
                    if self.clock.try_lock(self.start) {
                        break;
                    }
                    self.start = self.validate().map_err(|_| TxError::CommitRace)?;
                }
                self.writes.write_back();
                self.clock.unlock(self.start);
                self.start += 2;
                CommitKind::ReadWrite
            }
            Role::Serial => {
                self.writes.write_back();
                self.clock.unlock(self.start);
                self.start += 2;
                CommitKind::Serial
            }
            Role::Exclusive => {
                fence(Ordering::Release);
                self.writes.write_back();
                CommitKind::Exclusive
            }
        };
        self.finish();
        Ok(kind)
    }

    /// Abandon the attempt, discarding its logs
    ///
    /// A serialized attempt releases the clock without publishing anything.
    /// Rolling back an idle transaction does nothing.
    pub fn rollback(&mut self) {
        if !self.active {
            return;
        }
        if self.role == Role::Serial {
            self.clock.unlock(self.start);
        }
        self.finish();
    }

    fn finish(&mut self) {
        self.reads.clear();
        self.writes.clear();
        self.role = Role::ReadOnly;
        self.active = false;
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.active && self.role == Role::Serial {
            self.clock.unlock(self.start);
        }
    }
}
