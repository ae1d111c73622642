//! Placement planning
//!
//! Matches aggregated demand groups to pools and instance shapes, producing
//! provisioning plans. The planner is a pure function over snapshots: given
//! identical catalog, registry, ledger accounting, and demand, its output is
//! identical, with no randomness anywhere.

use crate::catalog::InstanceCatalog;
use crate::demand::DemandGroup;
use crate::error::DeferReason;
use crate::models::{
    Architecture, CapacityType, CapacityTypeConstraint, InstanceShape, NodePool,
    ProvisioningPlan, ResourceVector,
};
use crate::pools::NodePoolRegistry;
use std::collections::HashMap;
use tracing::debug;

/// Planner tuning
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Largest node the planner will request, bounding the blast radius of
    /// any single node failure
    pub max_node_vcpus: u32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self { max_node_vcpus: 16 }
    }
}

/// A demand group that could not be planned this cycle; retried next cycle
#[derive(Debug, Clone, PartialEq)]
pub struct DeferredGroup {
    pub candidates: Vec<String>,
    pub demand_ids: Vec<String>,
    pub reason: DeferReason,
}

/// An emitted plan together with the demands it covers
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedGroup {
    pub plan: ProvisioningPlan,
    pub demand_ids: Vec<String>,
}

/// Output of one planning pass
#[derive(Debug, Clone, Default)]
pub struct PlanOutcome {
    pub plans: Vec<PlannedGroup>,
    /// Demand ids covered by an emitted plan
    pub matched: Vec<String>,
    pub deferred: Vec<DeferredGroup>,
}

/// Plan provisioning for each demand group, in group order
///
/// `committed` is per-pool capacity of existing nodes; `on_demand_counts`
/// feeds the on-demand floor check for `any`-capacity pools.
pub fn plan(
    groups: &[DemandGroup],
    registry: &NodePoolRegistry,
    catalog: &InstanceCatalog,
    committed: &HashMap<String, ResourceVector>,
    on_demand_counts: &HashMap<String, usize>,
    config: &PlannerConfig,
) -> PlanOutcome {
    let mut outcome = PlanOutcome::default();
    // Capacity already planned this cycle, counted against limits alongside
    // existing nodes
    let mut planned: HashMap<String, ResourceVector> = HashMap::new();

    'groups: for group in groups {
        let mut saw_candidate = false;

        for pool_name in &group.candidates {
            let pool = match registry.get(pool_name) {
                Some(p) => p,
                None => continue,
            };
            saw_candidate = true;

            let existing = committed.get(pool_name).copied().unwrap_or_default();
            let cycle_planned = planned.get(pool_name).copied().unwrap_or_default();
            let usage = existing.add(&cycle_planned);

            // Saturated pools fall through to the next candidate
            if !usage.add(&group.aggregate).fits_within(&pool.resource_limits) {
                debug!(pool = %pool_name, "Candidate pool saturated, falling through");
                continue;
            }

            let shape = match select_shape(pool, group, catalog, config) {
                Some(s) => s,
                None => {
                    // The top-ranked fitting pool has no eligible shape;
                    // this group is deferred, the cycle proceeds
                    outcome.deferred.push(DeferredGroup {
                        candidates: group.candidates.clone(),
                        demand_ids: group.demand_ids(),
                        reason: DeferReason::NoEligibleShape,
                    });
                    continue 'groups;
                }
            };

            let capacity = shape.capacity();
            let count = node_count(&group.aggregate, &capacity);
            let total = capacity.scale(count as u64);

            // The whole plan must stay within limits, not just the demand
            if !usage.add(&total).fits_within(&pool.resource_limits) {
                debug!(
                    pool = %pool_name,
                    count,
                    "Plan total would exceed pool limits, falling through"
                );
                continue;
            }

            let capacity_type = choose_capacity_type(pool, &shape, on_demand_counts);

            let entry = planned.entry(pool_name.clone()).or_default();
            *entry = entry.add(&total);

            outcome.matched.extend(group.demand_ids());
            outcome.plans.push(PlannedGroup {
                plan: ProvisioningPlan {
                    pool: pool_name.clone(),
                    shape,
                    capacity_type,
                    count,
                },
                demand_ids: group.demand_ids(),
            });
            continue 'groups;
        }

        // Every candidate was saturated (or vanished from the registry)
        outcome.deferred.push(DeferredGroup {
            candidates: group.candidates.clone(),
            demand_ids: group.demand_ids(),
            reason: if saw_candidate {
                DeferReason::PoolsSaturated
            } else {
                DeferReason::NoEligibleShape
            },
        });
    }

    outcome
}

/// Pick the shape for a group within the chosen pool
///
/// The aggregate is divided evenly into chunks no larger than the configured
/// max node size; the smallest shape covering a chunk wins. When no shape
/// reaches the chunk size the largest eligible shape is used and the count
/// absorbs the difference.
fn select_shape(
    pool: &NodePool,
    group: &DemandGroup,
    catalog: &InstanceCatalog,
    config: &PlannerConfig,
) -> Option<InstanceShape> {
    let architecture = effective_architecture(pool, group);

    let shapes = catalog
        .shapes_for(architecture, ResourceVector::default())
        .ok()?;

    let eligible: Vec<&InstanceShape> = shapes
        .into_iter()
        .filter(|s| pool.allowed_families.is_empty() || pool.allowed_families.contains(&s.family))
        .collect();

    if eligible.is_empty() {
        return None;
    }

    let chunk = chunk_size(&group.aggregate, config.max_node_vcpus);

    // Eligible shapes arrive smallest-first; the first one covering a chunk
    // is the smallest sufficient node
    if let Some(shape) = eligible.iter().find(|s| s.capacity().covers(&chunk)) {
        return Some((*shape).clone());
    }

    let max_vcpus = eligible.iter().map(|s| s.vcpus).max()?;
    eligible
        .iter()
        .find(|s| s.vcpus == max_vcpus)
        .map(|s| (*s).clone())
}

/// Architecture used for the catalog query: the pool's constraint, then the
/// group's common requirement, then amd64
fn effective_architecture(pool: &NodePool, group: &DemandGroup) -> Architecture {
    pool.architecture
        .or(group.architecture)
        .unwrap_or(Architecture::Amd64)
}

/// Divide the aggregate evenly into the fewest chunks not exceeding the max
/// node size
fn chunk_size(aggregate: &ResourceVector, max_node_vcpus: u32) -> ResourceVector {
    let max_cpu = max_node_vcpus as u64 * 1000;
    let chunks = aggregate.cpu_millis.div_ceil(max_cpu).max(1);
    ResourceVector {
        cpu_millis: aggregate.cpu_millis.div_ceil(chunks),
        memory_bytes: aggregate.memory_bytes.div_ceil(chunks),
    }
}

/// Nodes needed so the plan covers the aggregate on both axes
fn node_count(aggregate: &ResourceVector, capacity: &ResourceVector) -> u32 {
    let by_cpu = aggregate.cpu_millis.div_ceil(capacity.cpu_millis.max(1));
    let by_mem = aggregate.memory_bytes.div_ceil(capacity.memory_bytes.max(1));
    by_cpu.max(by_mem).max(1) as u32
}

/// Capacity type per the pool constraint; `any` prefers spot once the
/// on-demand floor is met
fn choose_capacity_type(
    pool: &NodePool,
    shape: &InstanceShape,
    on_demand_counts: &HashMap<String, usize>,
) -> CapacityType {
    match pool.capacity_type {
        CapacityTypeConstraint::OnDemand => CapacityType::OnDemand,
        CapacityTypeConstraint::Spot => CapacityType::Spot,
        CapacityTypeConstraint::Any => {
            let on_demand = on_demand_counts.get(&pool.name).copied().unwrap_or(0);
            if shape.supports_spot && on_demand >= pool.on_demand_floor as usize {
                CapacityType::Spot
            } else {
                CapacityType::OnDemand
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demand::aggregate;
    use crate::models::{DisruptionSettings, WorkloadDemand};
    use std::collections::BTreeSet;

    fn shape(family: &str, arch: Architecture, vcpus: u32, gib: f64) -> InstanceShape {
        InstanceShape {
            family: family.to_string(),
            architecture: arch,
            vcpus,
            memory_gib: gib,
            supports_spot: true,
        }
    }

    fn pool(name: &str, arch: Option<Architecture>, limit_vcpus: u32) -> NodePool {
        NodePool {
            name: name.to_string(),
            architecture: arch,
            capacity_type: CapacityTypeConstraint::Any,
            allowed_families: BTreeSet::new(),
            taint: None,
            resource_limits: ResourceVector::new(limit_vcpus as u64 * 1000, u64::MAX),
            disruption: DisruptionSettings::default(),
            on_demand_floor: 0,
        }
    }

    fn demand(id: &str, cpu_millis: u64, arch: Option<Architecture>) -> WorkloadDemand {
        WorkloadDemand {
            id: id.to_string(),
            requested: ResourceVector::new(cpu_millis, 1024 * 1024 * 1024),
            architecture: arch,
            tolerations: BTreeSet::from(["spot".to_string()]),
            created_at: 0,
        }
    }

    /// The three-pool scenario: 10 amd64 units of 4 vCPU against a catalog
    /// of 2-vCPU shapes lands on the x86 pool as 20 nodes
    #[test]
    fn test_three_pool_scenario() {
        let mut registry = NodePoolRegistry::new();
        registry
            .register(pool("x86", Some(Architecture::Amd64), 1000))
            .unwrap();
        registry
            .register(pool("graviton", Some(Architecture::Arm64), 1000))
            .unwrap();
        registry
            .register(NodePool {
                capacity_type: CapacityTypeConstraint::Spot,
                ..pool("spot", None, 1000)
            })
            .unwrap();

        let catalog = InstanceCatalog::new(vec![
            shape("m6i", Architecture::Amd64, 2, 8.0),
            shape("m7g", Architecture::Arm64, 2, 8.0),
        ]);

        let demands: Vec<WorkloadDemand> = (0..10)
            .map(|i| demand(&format!("d{}", i), 4000, Some(Architecture::Amd64)))
            .collect();
        let agg = aggregate(demands, &registry);

        let outcome = plan(
            &agg.groups,
            &registry,
            &catalog,
            &HashMap::new(),
            &HashMap::new(),
            &PlannerConfig::default(),
        );

        assert_eq!(outcome.plans.len(), 1);
        let p = &outcome.plans[0].plan;
        assert_eq!(p.pool, "x86");
        assert_eq!(p.shape.family, "m6i");
        assert_eq!(p.count, 20);
        assert_eq!(outcome.matched.len(), 10);
        assert!(outcome.deferred.is_empty());
    }

    #[test]
    fn test_deterministic_output() {
        let mut registry = NodePoolRegistry::new();
        registry.register(pool("general", None, 1000)).unwrap();
        let catalog = InstanceCatalog::builtin();

        let demands: Vec<WorkloadDemand> = (0..5)
            .map(|i| demand(&format!("d{}", i), 2000 + i * 500, None))
            .collect();

        let agg1 = aggregate(demands.clone(), &registry);
        let agg2 = aggregate(demands, &registry);
        let empty = HashMap::new();
        let counts = HashMap::new();
        let config = PlannerConfig::default();

        let first = plan(&agg1.groups, &registry, &catalog, &empty, &counts, &config);
        let second = plan(&agg2.groups, &registry, &catalog, &empty, &counts, &config);

        assert_eq!(first.plans, second.plans);
        assert_eq!(first.matched, second.matched);
    }

    #[test]
    fn test_limit_safety() {
        let mut registry = NodePoolRegistry::new();
        // 4 vCPU ceiling
        registry.register(pool("tiny", None, 4)).unwrap();
        let catalog =
            InstanceCatalog::new(vec![shape("m6i", Architecture::Amd64, 2, 8.0)]);

        // 3 vCPU committed already; 2 more vCPU of demand cannot fit
        let committed =
            HashMap::from([("tiny".to_string(), ResourceVector::new(3000, 0))]);

        let agg = aggregate(vec![demand("d1", 2000, None)], &registry);
        let outcome = plan(
            &agg.groups,
            &registry,
            &catalog,
            &committed,
            &HashMap::new(),
            &PlannerConfig::default(),
        );

        assert!(outcome.plans.is_empty());
        assert_eq!(outcome.deferred.len(), 1);
        assert_eq!(outcome.deferred[0].reason, DeferReason::PoolsSaturated);
    }

    #[test]
    fn test_saturated_pool_falls_through_to_next() {
        let mut registry = NodePoolRegistry::new();
        registry
            .register(pool("narrow", Some(Architecture::Amd64), 2))
            .unwrap();
        registry.register(pool("general", None, 1000)).unwrap();
        let catalog =
            InstanceCatalog::new(vec![shape("m6i", Architecture::Amd64, 2, 8.0)]);

        // narrow ranks first but its 2-vCPU limit is exhausted
        let committed =
            HashMap::from([("narrow".to_string(), ResourceVector::new(2000, 0))]);

        let agg = aggregate(
            vec![demand("d1", 2000, Some(Architecture::Amd64))],
            &registry,
        );
        let outcome = plan(
            &agg.groups,
            &registry,
            &catalog,
            &committed,
            &HashMap::new(),
            &PlannerConfig::default(),
        );

        assert_eq!(outcome.plans.len(), 1);
        assert_eq!(outcome.plans[0].plan.pool, "general");
    }

    #[test]
    fn test_no_eligible_shape_defers_group() {
        let mut registry = NodePoolRegistry::new();
        registry
            .register(NodePool {
                allowed_families: BTreeSet::from(["p4d".to_string()]),
                ..pool("gpu", Some(Architecture::Amd64), 1000)
            })
            .unwrap();
        let catalog =
            InstanceCatalog::new(vec![shape("m6i", Architecture::Amd64, 2, 8.0)]);

        let agg = aggregate(
            vec![demand("d1", 2000, Some(Architecture::Amd64))],
            &registry,
        );
        let outcome = plan(
            &agg.groups,
            &registry,
            &catalog,
            &HashMap::new(),
            &HashMap::new(),
            &PlannerConfig::default(),
        );

        assert!(outcome.plans.is_empty());
        assert_eq!(outcome.deferred.len(), 1);
        assert_eq!(outcome.deferred[0].reason, DeferReason::NoEligibleShape);
    }

    #[test]
    fn test_planned_capacity_counts_against_limits() {
        let mut registry = NodePoolRegistry::new();
        // Room for exactly one 2-vCPU node
        registry
            .register(pool("tight", Some(Architecture::Amd64), 2))
            .unwrap();
        registry.register(pool("overflow", None, 1000)).unwrap();
        let catalog = InstanceCatalog::new(vec![
            shape("m6i", Architecture::Amd64, 2, 8.0),
            shape("m7g", Architecture::Arm64, 2, 8.0),
        ]);

        // Architecture requirements split these into two groups
        let demands = vec![
            demand("d1", 2000, Some(Architecture::Amd64)),
            demand("d2", 2000, Some(Architecture::Arm64)),
        ];
        let agg = aggregate(demands, &registry);
        assert_eq!(agg.groups.len(), 2);

        let outcome = plan(
            &agg.groups,
            &registry,
            &catalog,
            &HashMap::new(),
            &HashMap::new(),
            &PlannerConfig::default(),
        );

        // Both groups planned; the amd64 group exactly fills the tight pool
        assert_eq!(outcome.plans.len(), 2);
        let tight_plans: Vec<_> =
            outcome.plans.iter().filter(|p| p.plan.pool == "tight").collect();
        assert_eq!(tight_plans.len(), 1);
        assert_eq!(tight_plans[0].plan.count, 1);
    }

    #[test]
    fn test_mixed_architecture_demands_get_per_architecture_plans() {
        let mut registry = NodePoolRegistry::new();
        registry.register(pool("general", None, 1000)).unwrap();
        let catalog = InstanceCatalog::new(vec![
            shape("m6i", Architecture::Amd64, 2, 8.0),
            shape("m7g", Architecture::Arm64, 2, 8.0),
        ]);

        // Same pool set, different architecture requirements
        let demands = vec![
            demand("amd-job", 4000, Some(Architecture::Amd64)),
            demand("arm-job", 4000, Some(Architecture::Arm64)),
        ];
        let agg = aggregate(demands, &registry);
        assert_eq!(agg.groups.len(), 2);

        let outcome = plan(
            &agg.groups,
            &registry,
            &catalog,
            &HashMap::new(),
            &HashMap::new(),
            &PlannerConfig::default(),
        );

        // One plan per group, each with a shape of the required architecture
        assert_eq!(outcome.plans.len(), 2);
        assert!(outcome.matched.contains(&"amd-job".to_string()));
        assert!(outcome.matched.contains(&"arm-job".to_string()));
        for planned in &outcome.plans {
            let group = agg
                .groups
                .iter()
                .find(|g| g.demand_ids() == planned.demand_ids)
                .unwrap();
            assert_eq!(Some(planned.plan.shape.architecture), group.architecture);
        }
    }

    #[test]
    fn test_chunking_prefers_smallest_sufficient_shape() {
        let mut registry = NodePoolRegistry::new();
        registry.register(pool("general", None, 10_000)).unwrap();
        let catalog = InstanceCatalog::new(vec![
            shape("m6i", Architecture::Amd64, 2, 8.0),
            shape("m6i", Architecture::Amd64, 8, 32.0),
            shape("m6i", Architecture::Amd64, 32, 128.0),
        ]);

        let agg = aggregate(vec![demand("big", 24_000, None)], &registry);
        let outcome = plan(
            &agg.groups,
            &registry,
            &catalog,
            &HashMap::new(),
            &HashMap::new(),
            &PlannerConfig { max_node_vcpus: 8 },
        );

        // With an 8-vCPU cap the chunk is 8 vCPU and the 8-vCPU shape wins
        assert_eq!(outcome.plans[0].plan.shape.vcpus, 8);
        assert_eq!(outcome.plans[0].plan.count, 3);
    }

    #[test]
    fn test_any_capacity_prefers_spot_above_floor() {
        let mut registry = NodePoolRegistry::new();
        registry
            .register(NodePool {
                on_demand_floor: 2,
                ..pool("mixed", None, 1000)
            })
            .unwrap();
        let catalog =
            InstanceCatalog::new(vec![shape("m6i", Architecture::Amd64, 2, 8.0)]);
        let config = PlannerConfig::default();

        // Below the floor: guaranteed capacity first
        let agg = aggregate(vec![demand("d1", 2000, None)], &registry);
        let outcome = plan(
            &agg.groups,
            &registry,
            &catalog,
            &HashMap::new(),
            &HashMap::from([("mixed".to_string(), 0usize)]),
            &config,
        );
        assert_eq!(outcome.plans[0].plan.capacity_type, CapacityType::OnDemand);

        // Floor met: bias toward cheaper spot capacity
        let agg = aggregate(vec![demand("d2", 2000, None)], &registry);
        let outcome = plan(
            &agg.groups,
            &registry,
            &catalog,
            &HashMap::new(),
            &HashMap::from([("mixed".to_string(), 2usize)]),
            &config,
        );
        assert_eq!(outcome.plans[0].plan.capacity_type, CapacityType::Spot);
    }

    #[test]
    fn test_on_demand_constraint_ignores_floor() {
        let mut registry = NodePoolRegistry::new();
        registry
            .register(NodePool {
                capacity_type: CapacityTypeConstraint::OnDemand,
                ..pool("guaranteed", None, 1000)
            })
            .unwrap();
        let catalog =
            InstanceCatalog::new(vec![shape("m6i", Architecture::Amd64, 2, 8.0)]);

        let agg = aggregate(vec![demand("d1", 2000, None)], &registry);
        let outcome = plan(
            &agg.groups,
            &registry,
            &catalog,
            &HashMap::new(),
            &HashMap::from([("guaranteed".to_string(), 100usize)]),
            &PlannerConfig::default(),
        );

        assert_eq!(outcome.plans[0].plan.capacity_type, CapacityType::OnDemand);
    }

    #[test]
    fn test_count_covers_memory_axis() {
        let mut registry = NodePoolRegistry::new();
        registry.register(pool("general", None, 1000)).unwrap();
        // 2 vCPU but only 2 GiB per node
        let catalog =
            InstanceCatalog::new(vec![shape("c6i", Architecture::Amd64, 2, 2.0)]);

        // 2 vCPU of CPU but 8 GiB of memory demand
        let d = WorkloadDemand {
            requested: ResourceVector::new(2000, 8 * 1024 * 1024 * 1024),
            ..demand("memhog", 2000, None)
        };
        let agg = aggregate(vec![d], &registry);
        let outcome = plan(
            &agg.groups,
            &registry,
            &catalog,
            &HashMap::new(),
            &HashMap::new(),
            &PlannerConfig::default(),
        );

        // CPU alone needs 1 node; memory needs 4
        assert_eq!(outcome.plans[0].plan.count, 4);
    }
}
