//! Policy configuration
//!
//! Serde-deserialized catalog, pool, and engine definitions. `build`
//! validates the whole policy up front; an invalid policy is fatal at
//! startup rather than a degraded runtime.

use crate::catalog::InstanceCatalog;
use crate::disruption::DisruptionConfig;
use crate::engine::EngineConfig;
use crate::error::PolicyError;
use crate::models::{InstanceShape, NodePool};
use crate::planner::PlannerConfig;
use crate::pools::NodePoolRegistry;
use serde::Deserialize;
use std::time::Duration;

/// Full autoscaler policy as loaded from configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    #[serde(default = "default_cluster")]
    pub cluster: String,

    /// Decision cycle period in seconds
    #[serde(default = "default_cycle_interval")]
    pub cycle_interval_secs: u64,

    /// How long a launch request may stay unconfirmed, in seconds
    #[serde(default = "default_launch_timeout")]
    pub launch_timeout_secs: u64,

    /// Consecutive launch failures before escalating to an alert
    #[serde(default = "default_alert_threshold")]
    pub launch_failure_alert_threshold: u32,

    /// Drain retries for one node before escalating to an alert
    #[serde(default = "default_alert_threshold")]
    pub drain_retry_alert_threshold: u32,

    /// Largest node the planner will request, in vCPUs
    #[serde(default = "default_max_node_vcpus")]
    pub max_node_vcpus: u32,

    /// Utilization fraction below which a node counts as underutilized
    #[serde(default = "default_utilization_threshold")]
    pub utilization_threshold: f64,

    /// Grace period for voluntary drains, in seconds
    #[serde(default = "default_drain_grace")]
    pub drain_grace_secs: u64,

    /// Grace period for forced spot reclaims, in seconds
    #[serde(default = "default_interruption_grace")]
    pub interruption_grace_secs: u64,

    /// Instance shape table; empty uses the built-in catalog
    #[serde(default)]
    pub catalog: Vec<InstanceShape>,

    #[serde(default)]
    pub pools: Vec<NodePool>,
}

fn default_cluster() -> String {
    "default".to_string()
}

fn default_cycle_interval() -> u64 {
    10
}

fn default_launch_timeout() -> u64 {
    120
}

fn default_alert_threshold() -> u32 {
    3
}

fn default_max_node_vcpus() -> u32 {
    16
}

fn default_utilization_threshold() -> f64 {
    0.5
}

fn default_drain_grace() -> u64 {
    300
}

fn default_interruption_grace() -> u64 {
    120
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            cluster: default_cluster(),
            cycle_interval_secs: default_cycle_interval(),
            launch_timeout_secs: default_launch_timeout(),
            launch_failure_alert_threshold: default_alert_threshold(),
            drain_retry_alert_threshold: default_alert_threshold(),
            max_node_vcpus: default_max_node_vcpus(),
            utilization_threshold: default_utilization_threshold(),
            drain_grace_secs: default_drain_grace(),
            interruption_grace_secs: default_interruption_grace(),
            catalog: Vec::new(),
            pools: Vec::new(),
        }
    }
}

impl PolicyConfig {
    /// Validate the policy and build the runtime pieces
    pub fn build(self) -> Result<(NodePoolRegistry, InstanceCatalog, EngineConfig), PolicyError> {
        let catalog = if self.catalog.is_empty() {
            InstanceCatalog::builtin()
        } else {
            InstanceCatalog::new(self.catalog)
        };

        let mut registry = NodePoolRegistry::new();
        for pool in self.pools {
            validate_pool(&pool, &catalog)?;
            registry.register(pool)?;
        }

        let config = EngineConfig {
            cluster: self.cluster,
            cycle_interval: Duration::from_secs(self.cycle_interval_secs),
            launch_timeout: Duration::from_secs(self.launch_timeout_secs),
            launch_failure_alert_threshold: self.launch_failure_alert_threshold,
            drain_retry_alert_threshold: self.drain_retry_alert_threshold,
            planner: PlannerConfig {
                max_node_vcpus: self.max_node_vcpus,
            },
            disruption: DisruptionConfig {
                utilization_threshold: self.utilization_threshold,
                drain_grace: Duration::from_secs(self.drain_grace_secs),
                interruption_grace: Duration::from_secs(self.interruption_grace_secs),
            },
        };

        Ok((registry, catalog, config))
    }
}

/// A pool whose constraints can never match a shape is a configuration
/// error, not a runtime deferral
fn validate_pool(pool: &NodePool, catalog: &InstanceCatalog) -> Result<(), PolicyError> {
    if let Some(architecture) = pool.architecture {
        if !catalog.knows_architecture(architecture) {
            return Err(PolicyError::UnknownArchitecture(architecture.to_string()));
        }
    }

    if !pool.allowed_families.is_empty() {
        let any_eligible = catalog.all().iter().any(|s| {
            pool.allowed_families.contains(&s.family)
                && pool.architecture.map(|a| a == s.architecture).unwrap_or(true)
        });
        if !any_eligible {
            return Err(PolicyError::NoEligibleShape {
                pool: pool.name.clone(),
            });
        }
    }

    Ok(())
}
