//! Contention management policies
//!
//! A contention manager is consulted by the retry loop around every software
//! attempt. Policies are per-thread objects; the hourglass token they may
//! share is owned by the engine.

use hytm_primitives::{spin_for, SpinWait};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Hooks invoked around software transaction attempts
pub trait ContentionManager: Send {
    /// Called before an attempt begins
    fn on_begin(&mut self) {}

    /// Called after an attempt commits
    fn on_commit(&mut self) {}

    /// Called after an attempt aborts
    fn on_abort(&mut self) {}

    /// Policy name for diagnostics
    fn name(&self) -> &'static str;
}

// ==================== Aggressive ====================

/// Restart immediately
#[derive(Debug, Default, Clone, Copy)]
pub struct Aggressive;

impl ContentionManager for Aggressive {
    fn name(&self) -> &'static str {
        "aggressive"
    }
}

// ==================== Backoff ====================

/// Randomized exponential backoff on abort
#[derive(Debug, Clone)]
pub struct Backoff {
    min_spins: u32,
    max_spins: u32,
    current: u32,
}

impl Backoff {
    /// Create a backoff policy spinning between `min_spins` and `max_spins`
    pub fn new(min_spins: u32, max_spins: u32) -> Self {
        let min_spins = min_spins.max(1);
        let max_spins = max_spins.max(min_spins);
        Self {
            min_spins,
            max_spins,
            current: min_spins,
        }
    }

    /// Upper bound of the next backoff window
    pub fn window(&self) -> u32 {
        self.current
    }
}

impl ContentionManager for Backoff {
    fn on_commit(&mut self) {
        self.current = self.min_spins;
    }

    fn on_abort(&mut self) {
        let spins = rand::thread_rng().gen_range(0..=self.current);
        spin_for(spins);
        self.current = self.current.saturating_mul(2).min(self.max_spins);
    }

    fn name(&self) -> &'static str {
        "backoff"
    }
}

// ==================== Hourglass ====================

/// Process-wide token held by a thread that ran out of patience
#[derive(Debug, Default)]
pub struct HourglassToken {
    held: AtomicBool,
}

impl HourglassToken {
    /// Create a free token
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if some thread holds the token
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }

    fn try_acquire(&self) -> bool {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    fn release(&self) {
        self.held.store(false, Ordering::Release);
    }
}

/// After `threshold` consecutive aborts, hold the token so no other thread
/// begins a software attempt until this one commits
#[derive(Debug)]
pub struct Hourglass {
    token: Arc<HourglassToken>,
    threshold: u32,
    aborts: u32,
    holding: bool,
}

impl Hourglass {
    /// Create an hourglass policy sharing `token`
    pub fn new(token: Arc<HourglassToken>, threshold: u32) -> Self {
        Self {
            token,
            threshold: threshold.max(1),
            aborts: 0,
            holding: false,
        }
    }

    /// Check if this thread holds the token
    pub fn is_holding(&self) -> bool {
        self.holding
    }

    fn release(&mut self) {
        if self.holding {
            self.token.release();
            self.holding = false;
        }
    }
}

impl ContentionManager for Hourglass {
    fn on_begin(&mut self) {
        if self.holding {
            return;
        }
        let mut wait = SpinWait::new();
        while self.token.is_held() {
            wait.spin();
        }
    }

    fn on_commit(&mut self) {
        self.aborts = 0;
        self.release();
    }

    fn on_abort(&mut self) {
        self.aborts = self.aborts.saturating_add(1);
        if !self.holding && self.aborts >= self.threshold && self.token.try_acquire() {
            tracing::debug!(aborts = self.aborts, "hourglass token acquired");
            self.holding = true;
        }
    }

    fn name(&self) -> &'static str {
        "hourglass"
    }
}

impl Drop for Hourglass {
    fn drop(&mut self) {
        self.release();
    }
}

// ==================== Composition ====================

/// Run two policies in sequence
#[derive(Debug)]
pub struct Compose<A, B> {
    first: A,
    second: B,
    name: &'static str,
}

impl<A: ContentionManager, B: ContentionManager> Compose<A, B> {
    /// Combine two policies under a display name
    pub fn new(first: A, second: B, name: &'static str) -> Self {
        Self {
            first,
            second,
            name,
        }
    }
}

impl<A: ContentionManager, B: ContentionManager> ContentionManager for Compose<A, B> {
    fn on_begin(&mut self) {
        self.first.on_begin();
        self.second.on_begin();
    }

    fn on_commit(&mut self) {
        self.first.on_commit();
        self.second.on_commit();
    }

    fn on_abort(&mut self) {
        self.first.on_abort();
        self.second.on_abort();
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

// ==================== Policy selection ====================

/// Configured contention management policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum CmPolicy {
    /// No backoff
    Aggressive,
    /// Randomized exponential backoff
    Backoff {
        /// Initial backoff window in spin hints
        min_spins: u32,
        /// Largest backoff window in spin hints
        max_spins: u32,
    },
    /// Hourglass serialization after repeated aborts
    Hourglass {
        /// Consecutive aborts before taking the token
        threshold: u32,
    },
    /// Hourglass combined with backoff
    HourglassBackoff {
        /// Consecutive aborts before taking the token
        threshold: u32,
        /// Initial backoff window in spin hints
        min_spins: u32,
        /// Largest backoff window in spin hints
        max_spins: u32,
    },
}

impl Default for CmPolicy {
    fn default() -> Self {
        CmPolicy::Backoff {
            min_spins: 4,
            max_spins: 1024,
        }
    }
}

impl CmPolicy {
    /// Instantiate the policy for one thread
    pub fn build(&self, token: &Arc<HourglassToken>) -> Box<dyn ContentionManager> {
        match *self {
            CmPolicy::Aggressive => Box::new(Aggressive),
            CmPolicy::Backoff {
                min_spins,
                max_spins,
            } => Box::new(Backoff::new(min_spins, max_spins)),
            CmPolicy::Hourglass { threshold } => {
                Box::new(Hourglass::new(Arc::clone(token), threshold))
            }
            CmPolicy::HourglassBackoff {
                threshold,
                min_spins,
                max_spins,
            } => Box::new(Compose::new(
                Hourglass::new(Arc::clone(token), threshold),
                Backoff::new(min_spins, max_spins),
                "hourglass+backoff",
            )),
        }
    }
}
