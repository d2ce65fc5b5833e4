//! Error types shared by the transactional engines
//!
//! Every variant except configuration errors is resolved inside the runtime
//! by restarting or escalating the transaction; callers of `atomically`
//! never observe them.

use std::fmt;
use thiserror::Error;

/// Why a hardware transaction aborted
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AbortReason {
    /// Another agent touched a location in the read or write set
    Conflict,
    /// The read or write set overflowed the hardware buffers
    Capacity,
    /// The transaction aborted itself with a code
    Explicit(u8),
    /// A debug breakpoint was hit
    Debug,
    /// Abort happened in a nested transaction
    Nested,
    /// The CPU does not offer hardware transactions
    Unsupported,
    /// No reason bit was set (interrupt, unfriendly instruction, ...)
    Unknown,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Conflict => write!(f, "conflict"),
            AbortReason::Capacity => write!(f, "capacity"),
            AbortReason::Explicit(code) => write!(f, "explicit({:#04x})", code),
            AbortReason::Debug => write!(f, "debug"),
            AbortReason::Nested => write!(f, "nested"),
            AbortReason::Unsupported => write!(f, "unsupported"),
            AbortReason::Unknown => write!(f, "unknown"),
        }
    }
}

/// Classified hardware abort
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Error)]
#[error("hardware transaction aborted: {reason} (may retry: {may_retry})")]
pub struct HardwareAbort {
    /// Abort reason
    pub reason: AbortReason,
    /// Hardware hint that retrying may succeed
    pub may_retry: bool,
}

impl HardwareAbort {
    /// Create a new abort
    pub fn new(reason: AbortReason, may_retry: bool) -> Self {
        Self { reason, may_retry }
    }

    /// Explicit abort with a code
    pub fn explicit(code: u8) -> Self {
        Self::new(AbortReason::Explicit(code), false)
    }

    /// Abort reported by a capability without hardware support
    pub fn unsupported() -> Self {
        Self::new(AbortReason::Unsupported, false)
    }

    /// Whether retrying in hardware is unlikely to help
    ///
    /// Capacity overflows and missing hardware never go away on retry;
    /// other reasons are persistent only when the hardware withholds its
    /// retry hint.
    pub fn is_persistent(&self) -> bool {
        match self.reason {
            AbortReason::Capacity | AbortReason::Unsupported => true,
            AbortReason::Explicit(_) => false,
            _ => !self.may_retry,
        }
    }

    /// Check for a capacity abort
    pub fn is_capacity(&self) -> bool {
        self.reason == AbortReason::Capacity
    }

    /// Check for an explicit abort, returning its code
    pub fn explicit_code(&self) -> Option<u8> {
        match self.reason {
            AbortReason::Explicit(code) => Some(code),
            _ => None,
        }
    }
}

/// Transaction errors
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum TxError {
    /// Read set is inconsistent with the current global state
    #[error("read set failed validation")]
    ValidationFailure,

    /// Lost the sequence lock to a commit that invalidated the read set
    #[error("lost the commit race to a conflicting writer")]
    CommitRace,

    /// Hardware transaction aborted
    #[error(transparent)]
    HardwareAbort(#[from] HardwareAbort),

    /// Consecutive validation failures exceeded the bound
    #[error("{0} consecutive validation failures")]
    ForwardProgressExhausted(u32),
}

impl TxError {
    /// Whether restarting on the same path may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            TxError::ValidationFailure | TxError::CommitRace => true,
            TxError::HardwareAbort(abort) => !abort.is_persistent(),
            TxError::ForwardProgressExhausted(_) => false,
        }
    }
}

/// Result type for transactional operations
pub type TxResult<T> = Result<T, TxError>;
