//! Lifecycle manager configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use tenantry_core::{Error, Result};

use crate::paths::PathConfig;

/// Lifecycle manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Default time an availability request may wait for a tenant engine
    #[serde(default = "default_assure_timeout_secs")]
    pub assure_timeout_secs: u64,

    /// Lifecycle operations allowed to run at once across all tenants
    #[serde(default = "default_max_concurrent_operations")]
    pub max_concurrent_operations: usize,

    /// Whether availability requests for an unconfigured tenant wait for
    /// its configuration to arrive instead of failing immediately
    #[serde(default = "default_wait_for_configuration")]
    pub wait_for_configuration: bool,

    /// Where tenant configurations live in the store
    #[serde(default)]
    pub paths: PathConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            assure_timeout_secs: default_assure_timeout_secs(),
            max_concurrent_operations: default_max_concurrent_operations(),
            wait_for_configuration: default_wait_for_configuration(),
            paths: PathConfig::default(),
        }
    }
}

fn default_assure_timeout_secs() -> u64 {
    30
}

fn default_max_concurrent_operations() -> usize {
    32
}

fn default_wait_for_configuration() -> bool {
    true
}

impl ManagerConfig {
    pub fn assure_timeout(&self) -> Duration {
        Duration::from_secs(self.assure_timeout_secs)
    }

    /// Check the configuration for values the manager cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.assure_timeout_secs == 0 {
            return Err(Error::Config(
                "assure_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.max_concurrent_operations == 0 {
            return Err(Error::Config(
                "max_concurrent_operations must be greater than zero".to_string(),
            ));
        }
        self.paths.validate()
    }
}
