//! Shared metrics store

use crate::Histogram;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

/// Thread-safe metrics storage
///
/// Workers never touch this on the transaction fast path; they accumulate
/// `TxStats` locally and flush them here.
pub struct Metrics {
    histograms: RwLock<HashMap<String, Arc<Histogram>>>,
    counters: RwLock<HashMap<String, Arc<AtomicU64>>>,
    gauges: RwLock<HashMap<String, Arc<AtomicI64>>>,
}

impl Metrics {
    /// Create an empty metrics store
    pub fn new() -> Self {
        Self {
            histograms: RwLock::new(HashMap::new()),
            counters: RwLock::new(HashMap::new()),
            gauges: RwLock::new(HashMap::new()),
        }
    }

    fn entry<T: Default>(map: &RwLock<HashMap<String, Arc<T>>>, name: &str) -> Arc<T> {
        if let Some(existing) = map.read().get(name) {
            return Arc::clone(existing);
        }
        let mut map = map.write();
        Arc::clone(map.entry(name.to_string()).or_default())
    }

    /// Add to a counter
    pub fn add(&self, name: &str, delta: u64) {
        if delta == 0 {
            return;
        }
        Self::entry(&self.counters, name).fetch_add(delta, Ordering::Relaxed);
    }

    /// Set a gauge
    pub fn gauge(&self, name: &str, value: i64) {
        Self::entry(&self.gauges, name).store(value, Ordering::Relaxed);
    }

    /// Record a histogram observation
    pub fn observe(&self, name: &str, value: u64) {
        Self::entry(&self.histograms, name).observe(value);
    }

    /// Counter value, zero if never incremented
    pub fn counter(&self, name: &str) -> u64 {
        self.counters
            .read()
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Gauge value
    pub fn get_gauge(&self, name: &str) -> Option<i64> {
        self.gauges
            .read()
            .get(name)
            .map(|g| g.load(Ordering::Relaxed))
    }

    /// Shared handle to a histogram, if anything was observed under `name`
    pub fn histogram(&self, name: &str) -> Option<Arc<Histogram>> {
        self.histograms.read().get(name).cloned()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
