//! Capability for machines without hardware transactions

use crate::capability::{HtmCapability, HwRegion};
use hytm_primitives::{HardwareAbort, TmWord, TxResult};
use std::sync::atomic::Ordering;

/// Every hardware attempt aborts as unsupported
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHtm;

impl HtmCapability for NoHtm {
    fn is_supported(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "none"
    }

    #[inline]
    fn execute<'a, R>(
        &self,
        _body: &mut dyn FnMut(&mut dyn HwRegion<'a>) -> TxResult<R>,
    ) -> Result<R, HardwareAbort> {
        Err(HardwareAbort::unsupported())
    }

    fn compare_exchange(&self, word: &TmWord, current: u64, new: u64) -> Result<u64, u64> {
        word.compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
    }
}
