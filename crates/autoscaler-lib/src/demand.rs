//! Demand aggregation
//!
//! Reduces the per-cycle sequence of unschedulable workload demands into
//! groups keyed by matching-pool set and architecture requirement, so
//! overlapping pools are not double-counted and one plan's shape can serve
//! every member of a group. Groups are ordered by aggregate CPU descending:
//! the largest unmet demand is serviced first, which keeps big jobs from
//! starving behind streams of small ones.

use crate::models::{Architecture, ResourceVector, WorkloadDemand};
use crate::pools::NodePoolRegistry;
use std::collections::BTreeMap;

/// Demands sharing the same set of compatible pools and the same
/// architecture requirement
#[derive(Debug, Clone, PartialEq)]
pub struct DemandGroup {
    /// Candidate pool names, in registry ranking order
    pub candidates: Vec<String>,
    pub aggregate: ResourceVector,
    pub demands: Vec<WorkloadDemand>,
    /// Architecture requirement shared by every member; part of the
    /// grouping key, so a plan's shape satisfies the whole group
    pub architecture: Option<Architecture>,
}

impl DemandGroup {
    pub fn demand_count(&self) -> usize {
        self.demands.len()
    }

    pub fn demand_ids(&self) -> Vec<String> {
        self.demands.iter().map(|d| d.id.clone()).collect()
    }

    /// Creation timestamp of the oldest member, the ordering tie-break
    pub fn oldest_created_at(&self) -> i64 {
        self.demands.iter().map(|d| d.created_at).min().unwrap_or(0)
    }
}

/// Outcome of one aggregation pass
#[derive(Debug, Clone, Default)]
pub struct AggregationResult {
    /// Groups ordered by aggregate CPU descending
    pub groups: Vec<DemandGroup>,
    /// Demands matching no pool, reported rather than silently dropped
    pub unplaceable: Vec<WorkloadDemand>,
}

impl AggregationResult {
    pub fn total_demands(&self) -> usize {
        self.groups.iter().map(|g| g.demand_count()).sum::<usize>() + self.unplaceable.len()
    }
}

/// Groups demands by matching-pool set and sums their resource needs
pub fn aggregate(
    demands: impl IntoIterator<Item = WorkloadDemand>,
    registry: &NodePoolRegistry,
) -> AggregationResult {
    // Key by the ordered candidate list plus the architecture requirement;
    // demands with different requirements never share a plan. BTreeMap
    // keeps group iteration deterministic before the final sort
    let mut groups: BTreeMap<(Vec<String>, Option<Architecture>), DemandGroup> = BTreeMap::new();
    let mut unplaceable = Vec::new();

    for demand in demands {
        let candidates: Vec<String> = registry
            .pools_matching(&demand)
            .iter()
            .map(|p| p.name.clone())
            .collect();

        if candidates.is_empty() {
            unplaceable.push(demand);
            continue;
        }

        let group = groups
            .entry((candidates.clone(), demand.architecture))
            .or_insert_with(|| DemandGroup {
                candidates,
                aggregate: ResourceVector::default(),
                demands: Vec::new(),
                architecture: demand.architecture,
            });

        group.aggregate = group.aggregate.add(&demand.requested);
        group.demands.push(demand);
    }

    let mut ordered: Vec<DemandGroup> = groups.into_values().collect();
    ordered.sort_by(|a, b| {
        b.aggregate
            .cpu_millis
            .cmp(&a.aggregate.cpu_millis)
            .then(b.aggregate.memory_bytes.cmp(&a.aggregate.memory_bytes))
            .then(a.oldest_created_at().cmp(&b.oldest_created_at()))
            .then(a.candidates.cmp(&b.candidates))
            .then(a.architecture.cmp(&b.architecture))
    });

    AggregationResult {
        groups: ordered,
        unplaceable,
    }
}
