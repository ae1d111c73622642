//! Daemon configuration

use anyhow::{Context, Result};
use autoscaler_lib::PolicyConfig;
use serde::Deserialize;

/// Daemon configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    /// API server port for health/metrics/engine surfaces
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Path to the policy file (pools, catalog, engine tuning)
    #[serde(default)]
    pub policy_file: Option<String>,

    /// Delay before the simulated provider confirms a launch, in seconds
    #[serde(default = "default_confirm_delay")]
    pub confirm_delay_secs: u64,
}

fn default_api_port() -> u16 {
    8087
}

fn default_confirm_delay() -> u64 {
    2
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            policy_file: None,
            confirm_delay_secs: default_confirm_delay(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("AUTOSCALER"))
            .build()?;

        Ok(config.try_deserialize().unwrap_or_default())
    }

    /// Load the policy file. A missing file yields the default policy;
    /// an unparseable or invalid one is fatal.
    pub fn load_policy(&self) -> Result<PolicyConfig> {
        let mut builder = config::Config::builder();
        if let Some(path) = &self.policy_file {
            builder = builder.add_source(config::File::with_name(path));
        }
        let raw = builder.build().context("reading policy file")?;
        raw.try_deserialize().context("parsing policy file")
    }
}
