//! Autoscaler library for node-pool provisioning and capacity selection
//!
//! This crate provides the core functionality for:
//! - Instance shape catalog and node pool registry
//! - Demand aggregation and placement planning
//! - Disruption control (consolidation, drains, spot reclaims)
//! - The periodic decision cycle engine
//! - Health checks and observability

pub mod catalog;
pub mod config;
pub mod demand;
pub mod disruption;
pub mod engine;
pub mod error;
pub mod health;
pub mod ledger;
pub mod models;
pub mod observability;
pub mod planner;
pub mod pools;
pub mod report;

pub use config::PolicyConfig;
pub use engine::{Engine, EngineConfig, InstanceLauncher, PendingLaunch, WorkloadEvictor};
pub use error::{DeferReason, PolicyError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{EngineMetrics, StructuredLogger};
pub use report::{CycleReport, PoolReport};
