//! Hardware transaction capability traits

use hytm_primitives::{HardwareAbort, TmWord, TxError, TxResult};

/// Memory access inside a running hardware transaction
pub trait HwRegion<'a> {
    /// Read the bytes of `word` selected by `mask`
    fn read(&mut self, word: &'a TmWord, mask: u64) -> TxResult<u64>;

    /// Write the bytes of `value` selected by `mask`
    fn write(&mut self, word: &'a TmWord, value: u64, mask: u64) -> TxResult<()>;

    /// Abort the region with an explicit code
    ///
    /// On real hardware this does not return; the returned error is what
    /// the body should propagate everywhere else.
    fn abort(&mut self, code: u8) -> TxError;
}

/// A source of hardware transactions
///
/// The hybrid runtime is generic over this trait so the same protocol runs
/// on Intel RTM, on a software emulation with fault injection, or on a
/// machine without HTM at all.
pub trait HtmCapability: Send + Sync {
    /// Whether hardware transactions can ever commit
    fn is_supported(&self) -> bool;

    /// Backend name for diagnostics
    fn name(&self) -> &'static str;

    /// Run `body` as one hardware transaction
    ///
    /// An error returned by `body` that is not already a hardware abort
    /// aborts the region with [`ABORT_USER`](crate::ABORT_USER).
    fn execute<'a, R>(
        &self,
        body: &mut dyn FnMut(&mut dyn HwRegion<'a>) -> TxResult<R>,
    ) -> Result<R, HardwareAbort>;

    /// Compare-and-swap on a word that hardware transactions may be reading
    ///
    /// Every write to such a word must go through here so running regions
    /// observe it as a conflict.
    fn compare_exchange(&self, word: &TmWord, current: u64, new: u64) -> Result<u64, u64>;
}

/// Map a body error to the abort it causes
pub(crate) fn body_abort(err: TxError) -> HardwareAbort {
    match err {
        TxError::HardwareAbort(abort) => abort,
        _ => HardwareAbort::explicit(crate::ABORT_USER),
    }
}
