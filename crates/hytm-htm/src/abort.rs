//! Abort codes and RTM status classification

use hytm_primitives::{AbortReason, HardwareAbort};

/// Explicit abort code: the region found the mode indicator not in HW mode
pub const ABORT_MODE_CHANGED: u8 = 0xA1;

/// Explicit abort code: the transaction body returned an error
pub const ABORT_USER: u8 = 0xA2;

/// Bits of the status word returned by `xbegin` on abort
pub mod status {
    /// Abort caused by `xabort`; the code is in bits 24..32
    pub const EXPLICIT: u32 = 1 << 0;
    /// The transaction may succeed on retry
    pub const RETRY: u32 = 1 << 1;
    /// Another logical processor conflicted with a memory address
    pub const CONFLICT: u32 = 1 << 2;
    /// An internal buffer overflowed
    pub const CAPACITY: u32 = 1 << 3;
    /// A debug breakpoint was hit
    pub const DEBUG: u32 = 1 << 4;
    /// The abort occurred during a nested transaction
    pub const NESTED: u32 = 1 << 5;
    /// Value returned when the transaction started
    pub const STARTED: u32 = !0;
}

/// Classify an RTM abort status word
///
/// When several reason bits are set the most specific one wins: explicit,
/// then capacity, then conflict.
pub fn classify_rtm_status(bits: u32) -> HardwareAbort {
    let may_retry = bits & status::RETRY != 0;
    let reason = if bits & status::EXPLICIT != 0 {
        AbortReason::Explicit((bits >> 24) as u8)
    } else if bits & status::CAPACITY != 0 {
        AbortReason::Capacity
    } else if bits & status::CONFLICT != 0 {
        AbortReason::Conflict
    } else if bits & status::DEBUG != 0 {
        AbortReason::Debug
    } else if bits & status::NESTED != 0 {
        AbortReason::Nested
    } else {
        AbortReason::Unknown
    };
    HardwareAbort::new(reason, may_retry)
}
