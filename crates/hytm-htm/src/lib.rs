//! # hytm-htm
//!
//! Hardware transactional memory capabilities for hytm.
//!
//! The hybrid runtime never issues HTM instructions itself; it is handed a
//! capability implementing [`HtmCapability`]:
//! - [`NoHtm`]: every attempt aborts as unsupported
//! - [`EmulatedHtm`]: a software model with capacity limits and fault injection
//! - `RtmHtm`: Intel RTM, behind the `rtm` feature (nightly, x86-64)
//!
//! Abort status words are classified into [`HardwareAbort`] values; see
//! [`classify_rtm_status`].
//!
//! [`HardwareAbort`]: hytm_primitives::HardwareAbort

#![warn(missing_docs)]
#![warn(clippy::all)]
#![cfg_attr(feature = "rtm", feature(stdarch_x86_rtm))]

mod abort;
mod capability;
mod emulated;
#[cfg(all(feature = "rtm", target_arch = "x86_64"))]
mod rtm;
mod unsupported;

pub use abort::{classify_rtm_status, status, ABORT_MODE_CHANGED, ABORT_USER};
pub use capability::{HtmCapability, HwRegion};
pub use emulated::{CommitHook, EmulatedHtm, FaultInjector};
#[cfg(all(feature = "rtm", target_arch = "x86_64"))]
pub use rtm::RtmHtm;
pub use unsupported::NoHtm;
