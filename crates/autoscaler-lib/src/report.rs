//! Per-cycle report for observability tooling

use crate::models::ResourceVector;
use serde::{Deserialize, Serialize};

/// Utilization of one pool at the end of a cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolReport {
    pub name: String,
    pub nodes: usize,
    pub draining: usize,
    pub committed: ResourceVector,
    pub limits: ResourceVector,
    /// Committed CPU as a fraction of the pool limit
    pub cpu_fraction: f64,
    pub mem_fraction: f64,
}

/// Accounting for every demand seen in one decision cycle
///
/// Each demand lands in exactly one of matched / unplaceable / deferred;
/// nothing is silently dropped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub started_at: i64,
    pub duration_ms: u64,
    pub matched: usize,
    pub unplaceable: usize,
    pub deferred: usize,
    pub plans_emitted: usize,
    pub nodes_launched: u32,
    pub drains_started: usize,
    pub nodes_terminated: usize,
    pub launch_timeouts: usize,
    pub drain_timeouts: usize,
    pub pools: Vec<PoolReport>,
}

impl CycleReport {
    /// Every demand must be accounted for exactly once
    pub fn demand_total(&self) -> usize {
        self.matched + self.unplaceable + self.deferred
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demand_total() {
        let report = CycleReport {
            matched: 5,
            unplaceable: 1,
            deferred: 2,
            ..Default::default()
        };
        assert_eq!(report.demand_total(), 8);
    }

    #[test]
    fn test_report_serializes() {
        let report = CycleReport {
            cycle: 3,
            pools: vec![PoolReport {
                name: "x86".to_string(),
                nodes: 4,
                draining: 1,
                committed: ResourceVector::new(8000, 0),
                limits: ResourceVector::new(1_000_000, u64::MAX),
                cpu_fraction: 0.008,
                mem_fraction: 0.0,
            }],
            ..Default::default()
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["cycle"], 3);
        assert_eq!(json["pools"][0]["name"], "x86");
    }
}
