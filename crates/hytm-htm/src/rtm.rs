//! Intel RTM backend

use crate::abort::{classify_rtm_status, status, ABORT_MODE_CHANGED, ABORT_USER};
use crate::capability::{HtmCapability, HwRegion};
use core::arch::x86_64::{_xabort, _xbegin, _xend};
use hytm_primitives::{HardwareAbort, TmWord, TxError, TxResult};
use std::marker::PhantomData;
use std::sync::atomic::Ordering;

/// Hardware transactions through `xbegin`/`xend`
#[derive(Debug, Clone, Copy)]
pub struct RtmHtm {
    supported: bool,
}

impl RtmHtm {
    /// Probe the CPU for RTM
    pub fn detect() -> Self {
        let supported = std::is_x86_feature_detected!("rtm");
        tracing::debug!(supported, "probed for RTM");
        Self { supported }
    }
}

impl Default for RtmHtm {
    fn default() -> Self {
        Self::detect()
    }
}

struct RtmRegion<'a> {
    _words: PhantomData<&'a TmWord>,
}

#[inline(always)]
unsafe fn xabort(code: u8) {
    match code {
        ABORT_MODE_CHANGED => _xabort::<{ ABORT_MODE_CHANGED as u32 }>(),
        _ => _xabort::<{ ABORT_USER as u32 }>(),
    }
}

impl<'a> HwRegion<'a> for RtmRegion<'a> {
    #[inline]
    fn read(&mut self, word: &'a TmWord, mask: u64) -> TxResult<u64> {
        Ok(word.load(Ordering::Relaxed) & mask)
    }

    #[inline]
    fn write(&mut self, word: &'a TmWord, value: u64, mask: u64) -> TxResult<()> {
        word.store_masked(value, mask, Ordering::Relaxed);
        Ok(())
    }

    fn abort(&mut self, code: u8) -> TxError {
        // SAFETY: xabort is a no-op outside a transaction.
        unsafe { xabort(code) };
        HardwareAbort::explicit(code).into()
    }
}

impl HtmCapability for RtmHtm {
    fn is_supported(&self) -> bool {
        self.supported
    }

    fn name(&self) -> &'static str {
        "rtm"
    }

    fn execute<'a, R>(
        &self,
        body: &mut dyn FnMut(&mut dyn HwRegion<'a>) -> TxResult<R>,
    ) -> Result<R, HardwareAbort> {
        if !self.supported {
            return Err(HardwareAbort::unsupported());
        }

        // SAFETY: the CPU supports RTM; on abort execution resumes here with
        // every speculative store discarded.
        let code = unsafe { _xbegin() };
        if code != status::STARTED {
            return Err(classify_rtm_status(code));
        }

        let mut region = RtmRegion {
            _words: PhantomData,
        };
        match body(&mut region) {
            Ok(value) => {
                // SAFETY: inside the transaction started above.
                unsafe { _xend() };
                Ok(value)
            }
            Err(err) => {
                let code = match err {
                    TxError::HardwareAbort(abort) => abort.explicit_code().unwrap_or(ABORT_USER),
                    _ => ABORT_USER,
                };
                // SAFETY: inside the transaction started above; does not return.
                unsafe { xabort(code) };
                Err(HardwareAbort::explicit(code))
            }
        }
    }

    fn compare_exchange(&self, word: &TmWord, current: u64, new: u64) -> Result<u64, u64> {
        word.compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
    }
}
