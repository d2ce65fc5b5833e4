//! Hybrid runtime configuration

use crate::error::{ConfigError, ConfigResult};
use hytm_norec::NorecConfig;
use serde::{Deserialize, Serialize};

/// Hybrid runtime configuration
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```
/// use hytm_hybrid::HybridConfig;
///
/// let config = HybridConfig::from_json_str(r#"{ "htm_max_retries": 3 }"#).unwrap();
/// assert_eq!(config.htm_max_retries, 3);
/// assert_eq!(config.sampling_rate, 128);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HybridConfig {
    /// Failed hardware attempts before taking the global lock
    #[serde(default = "default_htm_max_retries")]
    pub htm_max_retries: u32,
    /// Hardware commits between cost samples
    #[serde(default = "default_sampling_rate")]
    pub sampling_rate: u32,
    /// Mean hardware cost, in ticks, above which capacity aborts move a
    /// thread to software
    #[serde(default = "default_hw_cost_threshold")]
    pub hw_cost_threshold: u64,
    /// Explicit abort percentage above which capacity aborts move a thread
    /// to software
    #[serde(default = "default_explicit_abort_rate_threshold")]
    pub explicit_abort_rate_threshold: u32,
    /// First software window of a deferred thread, in commits
    #[serde(default = "default_sw_window_initial")]
    pub sw_window_initial: u32,
    /// Largest software window, in commits
    #[serde(default = "default_sw_window_max")]
    pub sw_window_max: u32,
    /// Refuse to start without hardware transactions
    #[serde(default)]
    pub require_htm: bool,
    /// Software engine settings
    #[serde(default)]
    pub norec: NorecConfig,
}

fn default_htm_max_retries() -> u32 {
    5
}

fn default_sampling_rate() -> u32 {
    128
}

fn default_hw_cost_threshold() -> u64 {
    20_000
}

fn default_explicit_abort_rate_threshold() -> u32 {
    50
}

fn default_sw_window_initial() -> u32 {
    16
}

fn default_sw_window_max() -> u32 {
    4096
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            htm_max_retries: default_htm_max_retries(),
            sampling_rate: default_sampling_rate(),
            hw_cost_threshold: default_hw_cost_threshold(),
            explicit_abort_rate_threshold: default_explicit_abort_rate_threshold(),
            sw_window_initial: default_sw_window_initial(),
            sw_window_max: default_sw_window_max(),
            require_htm: false,
            norec: NorecConfig::default(),
        }
    }
}

impl HybridConfig {
    /// Parse and validate a JSON configuration
    pub fn from_json_str(json: &str) -> ConfigResult<Self> {
        let config: HybridConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every field
    pub fn validate(&self) -> ConfigResult<()> {
        if self.htm_max_retries == 0 {
            return Err(ConfigError::invalid("htm_max_retries", "must be at least 1"));
        }
        if self.sampling_rate == 0 {
            return Err(ConfigError::invalid("sampling_rate", "must be at least 1"));
        }
        if self.explicit_abort_rate_threshold > 100 {
            return Err(ConfigError::invalid(
                "explicit_abort_rate_threshold",
                format!("{} is not a percentage", self.explicit_abort_rate_threshold),
            ));
        }
        if self.sw_window_initial == 0 {
            return Err(ConfigError::invalid("sw_window_initial", "must be at least 1"));
        }
        if self.sw_window_max < self.sw_window_initial {
            return Err(ConfigError::invalid(
                "sw_window_max",
                format!(
                    "{} is below sw_window_initial {}",
                    self.sw_window_max, self.sw_window_initial
                ),
            ));
        }
        if self.norec.max_consecutive_failures == 0 {
            return Err(ConfigError::invalid(
                "norec.max_consecutive_failures",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}
