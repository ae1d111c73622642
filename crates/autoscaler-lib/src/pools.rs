//! Node pool registry
//!
//! Holds the pool definitions loaded at startup. Pools are immutable during
//! a scheduling cycle; reconfiguration goes through explicit register/remove
//! calls between cycles.

use crate::error::PolicyError;
use crate::models::{CapacityTypeConstraint, NodePool, WorkloadDemand};

/// Taint implicitly carried by spot-only pools; workloads must tolerate it
/// to land on reclaimable capacity
pub const SPOT_TAINT: &str = "spot";

/// Registry of node pools, ranked narrowest-constraints-first
#[derive(Debug, Clone, Default)]
pub struct NodePoolRegistry {
    /// Pools in registration order (the ranking tie-break)
    pools: Vec<NodePool>,
}

impl NodePoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pool; fails if the name is already taken
    pub fn register(&mut self, pool: NodePool) -> Result<(), PolicyError> {
        if self.pools.iter().any(|p| p.name == pool.name) {
            return Err(PolicyError::DuplicateName(pool.name));
        }
        self.pools.push(pool);
        Ok(())
    }

    /// Remove a pool; `live_nodes` is the count of nodes still owned by it
    pub fn remove(&mut self, name: &str, live_nodes: usize) -> Result<NodePool, PolicyError> {
        if live_nodes > 0 {
            return Err(PolicyError::PoolInUse(name.to_string()));
        }
        let idx = self
            .pools
            .iter()
            .position(|p| p.name == name)
            .ok_or_else(|| PolicyError::UnknownPool(name.to_string()))?;
        Ok(self.pools.remove(idx))
    }

    pub fn get(&self, name: &str) -> Option<&NodePool> {
        self.pools.iter().find(|p| p.name == name)
    }

    pub fn all(&self) -> &[NodePool] {
        &self.pools
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Pools compatible with the demand, narrowest constraints first, ties
    /// broken by registration order
    pub fn pools_matching(&self, demand: &WorkloadDemand) -> Vec<&NodePool> {
        let mut matching: Vec<(usize, &NodePool)> = self
            .pools
            .iter()
            .enumerate()
            .filter(|(_, p)| Self::compatible(p, demand))
            .collect();

        // Stable sort keeps registration order within equal specificity
        matching.sort_by(|(ia, a), (ib, b)| {
            b.specificity().cmp(&a.specificity()).then(ia.cmp(ib))
        });

        matching.into_iter().map(|(_, p)| p).collect()
    }

    fn compatible(pool: &NodePool, demand: &WorkloadDemand) -> bool {
        // Architecture: a pool without a constraint takes either; a demand
        // without a requirement runs anywhere
        if let (Some(pool_arch), Some(want)) = (pool.architecture, demand.architecture) {
            if pool_arch != want {
                return false;
            }
        }

        // Declared taint must be tolerated
        if let Some(taint) = &pool.taint {
            if !demand.tolerations.contains(taint) {
                return false;
            }
        }

        // Spot-only capacity is reclaimable; require the implicit toleration
        if pool.capacity_type == CapacityTypeConstraint::Spot
            && !demand.tolerations.contains(SPOT_TAINT)
        {
            return false;
        }

        true
    }
}
