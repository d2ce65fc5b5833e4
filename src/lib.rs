//! # hytm
//!
//! Hybrid transactional memory for Rust: NOrec software transactions,
//! best-effort hardware transactions and a global lock, coordinated through
//! one mode word.
//!
//! ## Crates
//!
//! - `hytm-primitives`: transactional words, byte masks, logs, errors
//! - `hytm-metrics`: per-thread statistics and the shared metrics store
//! - `hytm-norec`: the NOrec engine and contention managers
//! - `hytm-htm`: hardware transaction capabilities
//! - `hytm-hybrid`: the mode coordinator and per-thread workers
//!
//! ## Example
//!
//! ```
//! use hytm::prelude::*;
//!
//! let runtime = hytm::runtime_or_exit(EmulatedHtm::new(), HybridConfig::default());
//! let counter = TmWord::new(0);
//!
//! std::thread::scope(|s| {
//!     for _ in 0..2 {
//!         s.spawn(|| {
//!             let mut worker = runtime.worker();
//!             for _ in 0..100 {
//!                 worker.atomically(|tx| {
//!                     let v = tx.read(&counter, FULL_MASK)?;
//!                     tx.write(&counter, v + 1, FULL_MASK)
//!                 });
//!             }
//!         });
//!     }
//! });
//! assert_eq!(counter.get(), 200);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod logging;

pub use hytm_htm as htm;
pub use hytm_hybrid as hybrid;
pub use hytm_metrics as metrics;
pub use hytm_norec as norec;
pub use hytm_primitives as primitives;

use hytm_htm::HtmCapability;
use hytm_hybrid::{ConfigError, HybridConfig, HybridRuntime};

/// Commonly used types
pub mod prelude {
    pub use hytm_htm::{EmulatedHtm, HtmCapability, NoHtm};
    pub use hytm_hybrid::{
        ConfigError, ExecPath, HybridConfig, HybridRuntime, HybridTx, Mode, Worker,
    };
    pub use hytm_metrics::{names, MetricsSnapshot};
    pub use hytm_norec::{CmPolicy, Norec, NorecConfig, Transaction};
    pub use hytm_primitives::{byte_mask, TmWord, TxError, TxResult, FULL_MASK};
}

/// Exit status used for configuration errors
pub const CONFIG_ERROR_EXIT_CODE: i32 = 2;

/// Create a runtime, or report the configuration error and exit
///
/// A bad configuration is fatal: the error goes to stderr and the process
/// exits with [`CONFIG_ERROR_EXIT_CODE`] before any transaction runs.
pub fn runtime_or_exit<H: HtmCapability>(htm: H, config: HybridConfig) -> HybridRuntime<H> {
    match HybridRuntime::new(htm, config) {
        Ok(runtime) => runtime,
        Err(err) => {
            tracing::error!(error = %err, "invalid runtime configuration");
            eprintln!("{}", describe(&err));
            std::process::exit(CONFIG_ERROR_EXIT_CODE);
        }
    }
}

fn describe(err: &ConfigError) -> String {
    format!("hytm: configuration error: {}", err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn test_describe_config_error() {
        let err = ConfigError::HtmUnavailable { backend: "none" };
        let text = describe(&err);
        assert!(text.starts_with("hytm: configuration error:"));
        assert!(text.contains("none"));
    }

    #[test]
    fn test_runtime_or_exit_accepts_valid_config() {
        let runtime = runtime_or_exit(htm::NoHtm, HybridConfig::default());
        assert_eq!(runtime.current_mode(), hybrid::Mode::Hw);
    }

    const EXIT_CHILD_ENV: &str = "HYTM_CONFIG_EXIT_CHILD";

    #[test]
    fn test_runtime_or_exit_exits_on_invalid_config() {
        if std::env::var_os(EXIT_CHILD_ENV).is_some() {
            logging::init("error");
            let config = HybridConfig {
                sampling_rate: 0,
                ..HybridConfig::default()
            };
            let _runtime = runtime_or_exit(htm::NoHtm, config);
            panic!("invalid configuration was accepted");
        }

        // Re-run only this test in a child process that takes the exit path
        let output = Command::new(std::env::current_exe().expect("test binary path"))
            .args([
                "--exact",
                "tests::test_runtime_or_exit_exits_on_invalid_config",
                "--nocapture",
                "--test-threads=1",
            ])
            .env(EXIT_CHILD_ENV, "1")
            .output()
            .expect("Failed to execute command");

        assert_eq!(output.status.code(), Some(CONFIG_ERROR_EXIT_CODE));
        assert_eq!(CONFIG_ERROR_EXIT_CODE, 2);
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr
            .lines()
            .any(|line| line.starts_with("hytm: configuration error:")));
        assert!(stderr.contains("sampling_rate"));
    }
}
