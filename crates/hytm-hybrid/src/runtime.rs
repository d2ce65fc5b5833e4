//! Shared hybrid runtime state

use crate::config::HybridConfig;
use crate::error::{ConfigError, ConfigResult};
use crate::mode::{Mode, ModeIndicator, ModeSnapshot};
use crate::worker::Worker;
use hytm_htm::{HtmCapability, NoHtm};
use hytm_metrics::{names, Metrics, MetricsSnapshot};
use hytm_norec::Norec;
use std::fmt;
use std::sync::Arc;

/// Process-wide state of the hybrid TM
///
/// Owns the hardware capability, the software engine, and the mode word.
/// Threads run transactions through a [`Worker`] borrowed from here.
///
/// # Example
///
/// ```
/// use hytm_hybrid::{HybridConfig, HybridRuntime};
/// use hytm_htm::EmulatedHtm;
/// use hytm_primitives::{TmWord, FULL_MASK};
///
/// let runtime = HybridRuntime::new(EmulatedHtm::new(), HybridConfig::default()).unwrap();
/// let counter = TmWord::new(0);
///
/// let mut worker = runtime.worker();
/// worker.atomically(|tx| {
///     let v = tx.read(&counter, FULL_MASK)?;
///     tx.write(&counter, v + 1, FULL_MASK)
/// });
/// assert_eq!(counter.get(), 1);
/// ```
pub struct HybridRuntime<H: HtmCapability = NoHtm> {
    htm: H,
    norec: Norec,
    mode: ModeIndicator,
    config: HybridConfig,
    metrics: Arc<Metrics>,
}

impl<H: HtmCapability> HybridRuntime<H> {
    /// Create a runtime with its own metrics store
    pub fn new(htm: H, config: HybridConfig) -> ConfigResult<Self> {
        Self::with_metrics(htm, config, Arc::new(Metrics::new()))
    }

    /// Create a runtime that flushes statistics into `metrics`
    pub fn with_metrics(htm: H, config: HybridConfig, metrics: Arc<Metrics>) -> ConfigResult<Self> {
        config.validate()?;
        if config.require_htm && !htm.is_supported() {
            return Err(ConfigError::HtmUnavailable {
                backend: htm.name(),
            });
        }

        tracing::info!(
            backend = htm.name(),
            htm_supported = htm.is_supported(),
            htm_max_retries = config.htm_max_retries,
            sampling_rate = config.sampling_rate,
            contention = ?config.norec.contention,
            "hybrid runtime created"
        );
        metrics.gauge(names::MODE_CURRENT, Mode::Hw.bits() as i64);

        Ok(Self {
            htm,
            norec: Norec::new(config.norec),
            mode: ModeIndicator::new(),
            config,
            metrics,
        })
    }

    /// Hardware capability
    pub fn htm(&self) -> &H {
        &self.htm
    }

    /// Software engine
    pub fn norec(&self) -> &Norec {
        &self.norec
    }

    /// Runtime configuration
    pub fn config(&self) -> &HybridConfig {
        &self.config
    }

    /// Shared metrics store
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub(crate) fn mode_indicator(&self) -> &ModeIndicator {
        &self.mode
    }

    /// Current execution mode
    pub fn current_mode(&self) -> Mode {
        self.mode.load().mode
    }

    /// Current mode word, decoded
    pub fn mode_snapshot(&self) -> ModeSnapshot {
        self.mode.load()
    }

    /// Replace the mode word if it still holds `expected`
    ///
    /// The swap goes through the capability so running hardware regions
    /// that read the word abort.
    pub fn transition(&self, expected: ModeSnapshot, next: ModeSnapshot) -> bool {
        let swapped = self
            .htm
            .compare_exchange(self.mode.word(), expected.encode(), next.encode())
            .is_ok();
        if swapped && expected.mode != next.mode {
            tracing::debug!(
                from = %expected.mode,
                to = %next.mode,
                deferred = next.deferred,
                undeferred = next.undeferred,
                "mode transition"
            );
            self.metrics.gauge(names::MODE_CURRENT, next.mode.bits() as i64);
        }
        swapped
    }

    /// Apply `step` to the current snapshot until the swap succeeds
    ///
    /// Returns the snapshots before and after, or `None` when `step`
    /// refuses the current state.
    pub(crate) fn update(
        &self,
        step: impl Fn(&ModeSnapshot) -> Option<ModeSnapshot>,
    ) -> Option<(ModeSnapshot, ModeSnapshot)> {
        loop {
            let current = self.mode.load();
            let next = step(&current)?;
            if self.transition(current, next) {
                return Some((current, next));
            }
        }
    }

    /// Per-thread handle for running transactions
    pub fn worker(&self) -> Worker<'_, H> {
        Worker::new(self)
    }

    /// Export the flushed statistics
    pub fn snapshot_metrics(&self) -> MetricsSnapshot {
        MetricsSnapshot::from_metrics(&self.metrics)
    }
}

impl<H: HtmCapability> fmt::Debug for HybridRuntime<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HybridRuntime")
            .field("htm", &self.htm.name())
            .field("mode", &self.mode.load())
            .field("config", &self.config)
            .finish()
    }
}
