//! NOrec engine configuration

use crate::cm::CmPolicy;
use serde::{Deserialize, Serialize};

/// Software engine configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NorecConfig {
    /// Consecutive validation failures before an attempt runs serialized
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
    /// Contention management policy for every worker
    #[serde(default)]
    pub contention: CmPolicy,
}

fn default_max_consecutive_failures() -> u32 {
    5
}

impl Default for NorecConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: default_max_consecutive_failures(),
            contention: CmPolicy::default(),
        }
    }
}

impl NorecConfig {
    /// Set the contention policy
    pub fn with_contention(mut self, contention: CmPolicy) -> Self {
        self.contention = contention;
        self
    }

    /// Set the escalation bound
    pub fn with_max_consecutive_failures(mut self, bound: u32) -> Self {
        self.max_consecutive_failures = bound;
        self
    }
}
