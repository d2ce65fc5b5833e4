//! Bounded spinning for lock and mode waits

/// Spin-then-yield waiter
///
/// Spins with exponentially growing bursts, then yields the thread once the
/// burst limit is reached.
#[derive(Debug, Default)]
pub struct SpinWait {
    step: u32,
}

const SPIN_LIMIT: u32 = 6;

impl SpinWait {
    /// Create a fresh waiter
    pub fn new() -> Self {
        Self { step: 0 }
    }

    /// Wait a little longer than last time
    pub fn spin(&mut self) {
        if self.step <= SPIN_LIMIT {
            for _ in 0..(1u32 << self.step) {
                std::hint::spin_loop();
            }
            self.step += 1;
        } else {
            std::thread::yield_now();
        }
    }

    /// Start over with short bursts
    pub fn reset(&mut self) {
        self.step = 0;
    }
}

/// Busy-wait for `iterations` spin hints
#[inline]
pub fn spin_for(iterations: u32) {
    for _ in 0..iterations {
        std::hint::spin_loop();
    }
}
