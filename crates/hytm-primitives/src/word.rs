//! Transactional memory word

use crate::mask::{merge, FULL_MASK};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// A 64-bit word of shared memory accessed through transactions
///
/// Inside a transaction the word is only touched through the engine's
/// read and write barriers. `get` and `set` are non-transactional and are
/// meant for initialisation and for inspecting quiescent state.
#[derive(Default)]
#[repr(transparent)]
pub struct TmWord {
    value: AtomicU64,
}

impl TmWord {
    /// Create a new word
    pub const fn new(value: u64) -> Self {
        Self {
            value: AtomicU64::new(value),
        }
    }

    /// Non-transactional read
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    /// Non-transactional write
    pub fn set(&self, value: u64) {
        self.value.store(value, Ordering::Release);
    }

    /// Raw load with an explicit ordering
    #[inline]
    pub fn load(&self, order: Ordering) -> u64 {
        self.value.load(order)
    }

    /// Raw store with an explicit ordering
    #[inline]
    pub fn store(&self, value: u64, order: Ordering) {
        self.value.store(value, order);
    }

    /// Store only the bytes selected by `mask`
    ///
    /// A partial store is a load followed by a store, so the caller must
    /// hold whatever lock makes it the only writer of this word.
    #[inline]
    pub fn store_masked(&self, value: u64, mask: u64, order: Ordering) {
        if mask == FULL_MASK {
            self.value.store(value, order);
        } else {
            let current = self.value.load(Ordering::Relaxed);
            self.value.store(merge(current, value, mask), order);
        }
    }

    /// Raw compare-and-swap
    #[inline]
    pub fn compare_exchange(
        &self,
        current: u64,
        new: u64,
        success: Ordering,
        failure: Ordering,
    ) -> Result<u64, u64> {
        self.value.compare_exchange(current, new, success, failure)
    }

    /// Address of the word, used as its identity in logs
    #[inline]
    pub fn addr(&self) -> usize {
        self as *const TmWord as usize
    }

    /// Consume the word and return its value
    pub fn into_inner(self) -> u64 {
        self.value.into_inner()
    }
}

impl From<u64> for TmWord {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

impl fmt::Debug for TmWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TmWord")
            .field("addr", &format_args!("{:#x}", self.addr()))
            .field("value", &self.value.load(Ordering::Relaxed))
            .finish()
    }
}
