//! Policy error taxonomy
//!
//! Configuration errors (`UnknownArchitecture`, `DuplicateName`) are fatal
//! at startup. `PoolInUse` rejects unsafe reconfiguration. `NoEligibleShape`
//! surfaces as a per-group deferred outcome inside a cycle, never as an
//! aborted cycle.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    /// Architecture not present in the instance catalog
    #[error("unknown architecture: {0}")]
    UnknownArchitecture(String),

    /// A pool with this name is already registered
    #[error("duplicate pool name: {0}")]
    DuplicateName(String),

    /// No pool registered under this name
    #[error("unknown pool: {0}")]
    UnknownPool(String),

    /// Pool still owns live nodes and cannot be removed
    #[error("pool {0} is in use by live nodes")]
    PoolInUse(String),

    /// Pool matched the demand but no instance shape satisfies it
    #[error("no eligible instance shape in pool {pool}")]
    NoEligibleShape { pool: String },
}

/// Why a demand group could not be planned this cycle
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeferReason {
    /// Every candidate pool is at its resource limits
    PoolsSaturated,
    /// The chosen pool has no instance shape fitting the demand
    NoEligibleShape,
}

impl std::fmt::Display for DeferReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeferReason::PoolsSaturated => write!(f, "pools_saturated"),
            DeferReason::NoEligibleShape => write!(f, "no_eligible_shape"),
        }
    }
}
