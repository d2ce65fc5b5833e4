//! NOrec engine and per-thread retry state

use crate::clock::Clock;
use crate::cm::{ContentionManager, HourglassToken};
use crate::config::NorecConfig;
use crate::transaction::{CommitKind, Transaction};
use hytm_metrics::{Metrics, TxStats};
use hytm_primitives::{TxError, TxResult};
use std::sync::Arc;

/// Per-thread state carried across transactions
pub struct ThreadContext {
    cm: Box<dyn ContentionManager>,
    consecutive_failures: u32,
    stats: TxStats,
}

impl ThreadContext {
    /// Create a context using the given contention manager
    pub fn new(cm: Box<dyn ContentionManager>) -> Self {
        Self {
            cm,
            consecutive_failures: 0,
            stats: TxStats::new(),
        }
    }

    /// Event counts not yet flushed
    pub fn stats(&self) -> &TxStats {
        &self.stats
    }

    /// Mutable event counts, for callers that record their own paths
    pub fn stats_mut(&mut self) -> &mut TxStats {
        &mut self.stats
    }

    /// Move the event counts into `metrics`
    pub fn flush_stats(&mut self, metrics: &Metrics) {
        self.stats.flush_into(metrics);
    }

    /// Validation failures since the last commit
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Name of the contention policy
    pub fn contention_policy(&self) -> &'static str {
        self.cm.name()
    }

    /// Run the contention manager's commit hook
    ///
    /// Used by callers that commit outside the software engine.
    pub fn notify_commit(&mut self) {
        self.consecutive_failures = 0;
        self.cm.on_commit();
    }

    fn record_commit(&mut self, kind: CommitKind, lock_attempts: u64) {
        self.stats.lock_attempts += lock_attempts;
        match kind {
            CommitKind::ReadOnly => {
                self.stats.commits_sw += 1;
                self.stats.commits_read_only += 1;
            }
            CommitKind::ReadWrite => self.stats.commits_sw += 1,
            CommitKind::Serial => self.stats.commits_serial += 1,
            CommitKind::Exclusive => self.stats.commits_glock += 1,
        }
        self.notify_commit();
    }

    fn record_abort(&mut self, err: TxError, lock_attempts: u64, bound: u32) -> TxError {
        self.stats.lock_attempts += lock_attempts;
        self.stats.record_abort(&err);
        self.cm.on_abort();

        if !err.is_retryable() {
            return err;
        }
        self.consecutive_failures += 1;
        if self.consecutive_failures >= bound {
            TxError::ForwardProgressExhausted(self.consecutive_failures)
        } else {
            err
        }
    }

    fn serial_due(&self, bound: u32) -> bool {
        self.consecutive_failures >= bound
    }
}

impl std::fmt::Debug for ThreadContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadContext")
            .field("cm", &self.cm.name())
            .field("consecutive_failures", &self.consecutive_failures)
            .field("stats", &self.stats)
            .finish()
    }
}

/// NOrec software transactional memory
///
/// One global sequence lock, value-based validation and buffered writes.
///
/// # Example
///
/// ```
/// use hytm_norec::Norec;
/// use hytm_primitives::{TmWord, FULL_MASK};
///
/// let norec = Norec::default();
/// let mut ctx = norec.thread_context();
/// let counter = TmWord::new(0);
///
/// norec.atomically(&mut ctx, |tx| {
///     let v = tx.read(&counter, FULL_MASK)?;
///     tx.write(&counter, v + 1, FULL_MASK);
///     Ok(())
/// });
/// assert_eq!(counter.get(), 1);
/// ```
#[derive(Debug, Default)]
pub struct Norec {
    clock: Clock,
    config: NorecConfig,
    hourglass: Arc<HourglassToken>,
}

impl Norec {
    /// Create an engine
    pub fn new(config: NorecConfig) -> Self {
        Self {
            clock: Clock::new(),
            config,
            hourglass: Arc::new(HourglassToken::new()),
        }
    }

    /// Global clock
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Engine configuration
    pub fn config(&self) -> &NorecConfig {
        &self.config
    }

    /// Per-thread state for a new worker
    pub fn thread_context(&self) -> ThreadContext {
        ThreadContext::new(self.config.contention.build(&self.hourglass))
    }

    /// Begin a standalone optimistic transaction
    pub fn begin(&self) -> Transaction<'_> {
        let mut tx = Transaction::new(&self.clock);
        tx.begin();
        tx
    }

    /// Run one attempt of `f`
    ///
    /// The attempt is serialized when the thread has reached its bound of
    /// consecutive validation failures. On error the attempt has been
    /// rolled back; `TxError::ForwardProgressExhausted` signals that the
    /// next attempt will be serialized.
    pub fn attempt<'a, R, F>(
        &'a self,
        ctx: &mut ThreadContext,
        tx: &mut Transaction<'a>,
        f: &mut F,
    ) -> TxResult<R>
    where
        F: FnMut(&mut Transaction<'a>) -> TxResult<R>,
    {
        let bound = self.config.max_consecutive_failures;
        if ctx.serial_due(bound) {
            tx.begin_serial();
        } else {
            ctx.cm.on_begin();
            tx.begin();
        }
        self.finish_attempt(ctx, tx, f, bound)
    }

    /// Run one attempt of `f` without touching the clock
    ///
    /// The caller must guarantee that no other transaction runs
    /// concurrently.
    pub fn attempt_exclusive<'a, R, F>(
        &'a self,
        ctx: &mut ThreadContext,
        tx: &mut Transaction<'a>,
        f: &mut F,
    ) -> TxResult<R>
    where
        F: FnMut(&mut Transaction<'a>) -> TxResult<R>,
    {
        tx.begin_exclusive();
        self.finish_attempt(ctx, tx, f, self.config.max_consecutive_failures)
    }

    fn finish_attempt<'a, R, F>(
        &'a self,
        ctx: &mut ThreadContext,
        tx: &mut Transaction<'a>,
        f: &mut F,
        bound: u32,
    ) -> TxResult<R>
    where
        F: FnMut(&mut Transaction<'a>) -> TxResult<R>,
    {
        let outcome = f(tx).and_then(|value| tx.commit().map(|kind| (value, kind)));
        match outcome {
            Ok((value, kind)) => {
                let attempts = tx.take_lock_attempts();
                ctx.record_commit(kind, attempts);
                Ok(value)
            }
            Err(err) => {
                tx.rollback();
                let attempts = tx.take_lock_attempts();
                Err(ctx.record_abort(err, attempts, bound))
            }
        }
    }

    /// Run `f` atomically, retrying until it commits
    pub fn atomically<'a, R, F>(&'a self, ctx: &mut ThreadContext, mut f: F) -> R
    where
        F: FnMut(&mut Transaction<'a>) -> TxResult<R>,
    {
        let mut tx = Transaction::new(&self.clock);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.attempt(ctx, &mut tx, &mut f) {
                Ok(value) => return value,
                Err(TxError::ForwardProgressExhausted(failures)) => {
                    tracing::warn!(failures, "escalating to serialized execution");
                    ctx.stats.serial_escalations += 1;
                }
                Err(err) => {
                    tracing::trace!(attempt, error = %err, "software transaction aborted");
                }
            }
        }
    }
}
