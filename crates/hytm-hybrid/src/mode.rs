//! Process-wide execution mode
//!
//! One 64-bit word holds the whole coordination state:
//!
//! ```text
//!  63            33 32             2 1    0
//! ┌────────────────┬────────────────┬──────┐
//! │   undeferred   │    deferred    │ mode │
//! └────────────────┴────────────────┴──────┘
//! ```
//!
//! Hardware regions read the word first, so every change to it aborts them.
//! The word only changes through compare-and-swap from a decoded snapshot.

use hytm_primitives::{CachePadded, SpinWait, TmWord};
use serde::{Deserialize, Serialize};
use std::fmt;

const MODE_MASK: u64 = 0b11;
const COUNT_BITS: u32 = 31;
const COUNT_MASK: u64 = (1 << COUNT_BITS) - 1;
const DEFERRED_SHIFT: u32 = 2;
const UNDEFERRED_SHIFT: u32 = DEFERRED_SHIFT + COUNT_BITS;

/// Largest value either count can hold
pub const MAX_COUNT: u32 = COUNT_MASK as u32;

/// Execution mode of the whole process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Transactions run as hardware regions
    Hw,
    /// Transactions run in the software engine
    Sw,
    /// One thread runs alone under the global lock
    Glock,
}

impl Mode {
    pub(crate) fn bits(self) -> u64 {
        match self {
            Mode::Hw => 0,
            Mode::Sw => 1,
            Mode::Glock => 2,
        }
    }

    fn from_bits(bits: u64) -> Self {
        match bits & MODE_MASK {
            0 => Mode::Hw,
            1 => Mode::Sw,
            // 3 is never written
            _ => Mode::Glock,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Hw => write!(f, "HW"),
            Mode::Sw => write!(f, "SW"),
            Mode::Glock => write!(f, "GLOCK"),
        }
    }
}

/// Decoded mode word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModeSnapshot {
    /// Current mode
    pub mode: Mode,
    /// Threads running software epochs they started
    pub deferred: u32,
    /// Threads running single software transactions inside an epoch
    pub undeferred: u32,
}

impl ModeSnapshot {
    /// Hardware mode with no software transactions
    pub const INITIAL: ModeSnapshot = ModeSnapshot {
        mode: Mode::Hw,
        deferred: 0,
        undeferred: 0,
    };

    /// Create a snapshot
    pub fn new(mode: Mode, deferred: u32, undeferred: u32) -> Self {
        Self {
            mode,
            deferred,
            undeferred,
        }
    }

    /// Pack into a mode word
    pub fn encode(&self) -> u64 {
        debug_assert!(self.deferred <= MAX_COUNT && self.undeferred <= MAX_COUNT);
        self.mode.bits()
            | (u64::from(self.deferred) & COUNT_MASK) << DEFERRED_SHIFT
            | (u64::from(self.undeferred) & COUNT_MASK) << UNDEFERRED_SHIFT
    }

    /// Unpack a mode word
    pub fn decode(word: u64) -> Self {
        Self {
            mode: Mode::from_bits(word),
            deferred: ((word >> DEFERRED_SHIFT) & COUNT_MASK) as u32,
            undeferred: ((word >> UNDEFERRED_SHIFT) & COUNT_MASK) as u32,
        }
    }

    /// Check whether no software transaction is registered
    pub fn is_quiescent(&self) -> bool {
        self.deferred == 0 && self.undeferred == 0
    }

    /// Register a deferred thread; allowed in HW and SW mode
    pub fn enter_deferred(&self) -> Option<Self> {
        if self.mode == Mode::Glock || self.deferred == MAX_COUNT {
            return None;
        }
        Some(Self {
            deferred: self.deferred + 1,
            ..*self
        })
    }

    /// Switch HW to SW once a deferred thread is registered
    pub fn flip_to_sw(&self) -> Option<Self> {
        if self.mode != Mode::Hw || self.deferred == 0 {
            return None;
        }
        Some(Self {
            mode: Mode::Sw,
            ..*self
        })
    }

    /// Register an undeferred transaction; only inside a live SW epoch
    pub fn enter_undeferred(&self) -> Option<Self> {
        if self.mode != Mode::Sw || self.deferred == 0 || self.undeferred == MAX_COUNT {
            return None;
        }
        Some(Self {
            undeferred: self.undeferred + 1,
            ..*self
        })
    }

    /// Unregister a deferred thread, returning to HW when the epoch drains
    pub fn leave_deferred(&self) -> Option<Self> {
        let deferred = self.deferred.checked_sub(1)?;
        Some(Self::drained(self.mode, deferred, self.undeferred))
    }

    /// Unregister an undeferred transaction, returning to HW when the epoch
    /// drains
    pub fn leave_undeferred(&self) -> Option<Self> {
        let undeferred = self.undeferred.checked_sub(1)?;
        Some(Self::drained(self.mode, self.deferred, undeferred))
    }

    fn drained(mode: Mode, deferred: u32, undeferred: u32) -> Self {
        let mode = if deferred == 0 && undeferred == 0 {
            Mode::Hw
        } else {
            mode
        };
        Self::new(mode, deferred, undeferred)
    }

    /// Take the global lock; only from quiescent HW mode
    pub fn acquire_glock(&self) -> Option<Self> {
        if *self != Self::INITIAL {
            return None;
        }
        Some(Self::new(Mode::Glock, 0, 0))
    }
}

impl Default for ModeSnapshot {
    fn default() -> Self {
        Self::INITIAL
    }
}

impl fmt::Display for ModeSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (deferred {}, undeferred {})",
            self.mode, self.deferred, self.undeferred
        )
    }
}

/// Shared mode word
#[derive(Debug)]
pub struct ModeIndicator {
    word: CachePadded<TmWord>,
}

impl ModeIndicator {
    /// Create an indicator in the initial state
    pub fn new() -> Self {
        Self {
            word: CachePadded::new(TmWord::new(ModeSnapshot::INITIAL.encode())),
        }
    }

    /// Current state
    pub fn load(&self) -> ModeSnapshot {
        ModeSnapshot::decode(self.word.get())
    }

    /// The raw word, for hardware regions and capability CAS
    pub fn word(&self) -> &TmWord {
        &self.word
    }

    /// Spin while the global lock is held and return the state after it
    pub fn wait_while_glock(&self) -> ModeSnapshot {
        let mut wait = SpinWait::new();
        loop {
            let snapshot = self.load();
            if snapshot.mode != Mode::Glock {
                return snapshot;
            }
            wait.spin();
        }
    }
}

impl Default for ModeIndicator {
    fn default() -> Self {
        Self::new()
    }
}
