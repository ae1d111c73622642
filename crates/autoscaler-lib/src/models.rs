//! Core data models for the fleet autoscaler

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

const GIB: u64 = 1024 * 1024 * 1024;

/// CPU architecture of an instance shape or workload requirement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    Amd64,
    Arm64,
}

impl std::fmt::Display for Architecture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Architecture::Amd64 => write!(f, "amd64"),
            Architecture::Arm64 => write!(f, "arm64"),
        }
    }
}

/// Capacity type of a launched node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CapacityType {
    OnDemand,
    Spot,
}

impl std::fmt::Display for CapacityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CapacityType::OnDemand => write!(f, "on-demand"),
            CapacityType::Spot => write!(f, "spot"),
        }
    }
}

/// Capacity-type constraint declared on a node pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CapacityTypeConstraint {
    OnDemand,
    Spot,
    Any,
}

/// A CPU/memory quantity, used for demand, capacity, and limits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceVector {
    pub cpu_millis: u64,
    pub memory_bytes: u64,
}

impl ResourceVector {
    pub fn new(cpu_millis: u64, memory_bytes: u64) -> Self {
        Self {
            cpu_millis,
            memory_bytes,
        }
    }

    /// Construct from whole vCPUs and GiB of memory
    pub fn from_vcpus_gib(vcpus: u32, memory_gib: f64) -> Self {
        Self {
            cpu_millis: vcpus as u64 * 1000,
            memory_bytes: (memory_gib * GIB as f64) as u64,
        }
    }

    pub fn add(&self, other: &ResourceVector) -> ResourceVector {
        ResourceVector {
            cpu_millis: self.cpu_millis.saturating_add(other.cpu_millis),
            memory_bytes: self.memory_bytes.saturating_add(other.memory_bytes),
        }
    }

    pub fn scale(&self, count: u64) -> ResourceVector {
        ResourceVector {
            cpu_millis: self.cpu_millis.saturating_mul(count),
            memory_bytes: self.memory_bytes.saturating_mul(count),
        }
    }

    /// Component-wise: does this quantity fit within `limit`?
    pub fn fits_within(&self, limit: &ResourceVector) -> bool {
        self.cpu_millis <= limit.cpu_millis && self.memory_bytes <= limit.memory_bytes
    }

    /// Component-wise: does this quantity cover `need`?
    pub fn covers(&self, need: &ResourceVector) -> bool {
        self.cpu_millis >= need.cpu_millis && self.memory_bytes >= need.memory_bytes
    }

    pub fn is_zero(&self) -> bool {
        self.cpu_millis == 0 && self.memory_bytes == 0
    }
}

/// An instance hardware profile, immutable once loaded from the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceShape {
    /// Instance family, e.g. "m6i" or "c7g"
    pub family: String,
    pub architecture: Architecture,
    pub vcpus: u32,
    pub memory_gib: f64,
    pub supports_spot: bool,
}

impl InstanceShape {
    /// Hardware generation parsed from the family name ("m6i" -> 6)
    pub fn generation(&self) -> u32 {
        self.family
            .chars()
            .filter(|c| c.is_ascii_digit())
            .collect::<String>()
            .parse()
            .unwrap_or(0)
    }

    /// Schedulable capacity of one node of this shape
    pub fn capacity(&self) -> ResourceVector {
        ResourceVector::from_vcpus_gib(self.vcpus, self.memory_gib)
    }
}

/// Disruption policy for a node pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisruptionPolicy {
    /// Only nodes with zero bound workloads are consolidation candidates
    WhenEmpty,
    /// Empty nodes and nodes continuously below the utilization threshold
    WhenEmptyOrUnderutilized,
}

/// Disruption settings declared on a node pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisruptionSettings {
    pub policy: DisruptionPolicy,
    /// How long a node must stay empty/underutilized before candidacy
    #[serde(with = "duration_secs")]
    pub consolidate_after: Duration,
    /// Max percentage of the pool's nodes removable concurrently
    pub budget_percent: u8,
}

impl Default for DisruptionSettings {
    fn default() -> Self {
        Self {
            policy: DisruptionPolicy::WhenEmpty,
            consolidate_after: Duration::from_secs(60),
            budget_percent: 20,
        }
    }
}

/// A named category of nodes sharing placement and disruption policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodePool {
    pub name: String,
    /// Required architecture; `None` accepts either
    pub architecture: Option<Architecture>,
    pub capacity_type: CapacityTypeConstraint,
    /// Allowed instance families; empty set allows every family
    #[serde(default)]
    pub allowed_families: BTreeSet<String>,
    /// Taint workloads must tolerate to land in this pool
    #[serde(default)]
    pub taint: Option<String>,
    /// Aggregate CPU/memory ceiling across all nodes owned by the pool
    pub resource_limits: ResourceVector,
    #[serde(default)]
    pub disruption: DisruptionSettings,
    /// Minimum on-demand nodes before `any` capacity prefers spot
    #[serde(default)]
    pub on_demand_floor: u32,
}

impl NodePool {
    /// Number of narrowing constraints, used to rank pools (narrower first)
    pub fn specificity(&self) -> u32 {
        let mut score = 0;
        if self.architecture.is_some() {
            score += 1;
        }
        if self.capacity_type != CapacityTypeConstraint::Any {
            score += 1;
        }
        if !self.allowed_families.is_empty() {
            score += 1;
        }
        if self.taint.is_some() {
            score += 1;
        }
        score
    }
}

/// One unschedulable workload unit, ephemeral within a scheduling cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadDemand {
    pub id: String,
    pub requested: ResourceVector,
    /// Architecture requirement; `None` runs anywhere
    #[serde(default)]
    pub architecture: Option<Architecture>,
    /// Taints this workload tolerates
    #[serde(default)]
    pub tolerations: BTreeSet<String>,
    /// Submission time; equally sized demand groups are served oldest first
    pub created_at: i64,
}

/// Lifecycle state of a launched node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum NodeState {
    Active,
    CandidateForRemoval {
        since: i64,
    },
    Draining {
        deadline: i64,
        /// Set for spot-interruption reclaims, which bypass the budget
        forced: bool,
    },
    Terminated,
}

impl NodeState {
    pub fn is_draining(&self) -> bool {
        matches!(self, NodeState::Draining { .. })
    }
}

/// Most recent utilization sample for a node
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Utilization {
    pub cpu_fraction: f64,
    pub mem_fraction: f64,
}

impl Utilization {
    /// Both axes below the threshold
    pub fn below(&self, threshold: f64) -> bool {
        self.cpu_fraction < threshold && self.mem_fraction < threshold
    }

    /// Scalar used to order drain candidates (least utilized first)
    pub fn score(&self) -> f64 {
        self.cpu_fraction.max(self.mem_fraction)
    }
}

/// A live node owned by a pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    /// Owning pool name; lookup-only, never an ownership edge
    pub pool: String,
    pub shape: InstanceShape,
    pub capacity_type: CapacityType,
    pub launched_at: i64,
    #[serde(default)]
    pub bound_workloads: BTreeSet<String>,
    /// `None` until the first utilization sample arrives
    #[serde(default)]
    pub last_utilization: Option<Utilization>,
    pub state: NodeState,
    /// Start of the current continuous empty/underutilized stretch
    #[serde(default)]
    pub below_since: Option<i64>,
    /// Consecutive drain attempts that missed their grace period
    #[serde(default)]
    pub drain_retries: u32,
}

/// Transient output of the placement planner, consumed by the launcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisioningPlan {
    pub pool: String,
    pub shape: InstanceShape,
    pub capacity_type: CapacityType,
    pub count: u32,
}

/// Asynchronous spot-interruption notice for a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterruptionNotice {
    pub node_id: String,
    /// Unix timestamp by which the capacity is reclaimed
    pub deadline: i64,
}

/// Serde helper: durations as whole seconds
pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_parsing() {
        let shape = InstanceShape {
            family: "m6i".to_string(),
            architecture: Architecture::Amd64,
            vcpus: 2,
            memory_gib: 8.0,
            supports_spot: true,
        };
        assert_eq!(shape.generation(), 6);

        let graviton = InstanceShape {
            family: "c7g".to_string(),
            architecture: Architecture::Arm64,
            vcpus: 4,
            memory_gib: 8.0,
            supports_spot: true,
        };
        assert_eq!(graviton.generation(), 7);
    }

    #[test]
    fn test_shape_capacity() {
        let shape = InstanceShape {
            family: "m6i".to_string(),
            architecture: Architecture::Amd64,
            vcpus: 2,
            memory_gib: 8.0,
            supports_spot: true,
        };
        let cap = shape.capacity();
        assert_eq!(cap.cpu_millis, 2000);
        assert_eq!(cap.memory_bytes, 8 * 1024 * 1024 * 1024);
    }

    #[test]
    fn test_resource_vector_fits_within() {
        let usage = ResourceVector::new(500, 1024);
        let limit = ResourceVector::new(1000, 2048);
        assert!(usage.fits_within(&limit));
        assert!(!limit.fits_within(&usage));

        // One axis over the limit is a violation
        let cpu_heavy = ResourceVector::new(2000, 512);
        assert!(!cpu_heavy.fits_within(&limit));
    }

    #[test]
    fn test_pool_specificity_ranking() {
        let general = NodePool {
            name: "general".to_string(),
            architecture: None,
            capacity_type: CapacityTypeConstraint::Any,
            allowed_families: BTreeSet::new(),
            taint: None,
            resource_limits: ResourceVector::new(1_000_000, u64::MAX),
            disruption: DisruptionSettings::default(),
            on_demand_floor: 0,
        };
        let narrow = NodePool {
            architecture: Some(Architecture::Arm64),
            capacity_type: CapacityTypeConstraint::Spot,
            ..general.clone()
        };
        assert!(narrow.specificity() > general.specificity());
    }

    #[test]
    fn test_utilization_below_threshold() {
        let low = Utilization {
            cpu_fraction: 0.2,
            mem_fraction: 0.3,
        };
        assert!(low.below(0.5));

        // One hot axis keeps the node out of candidacy
        let mem_hot = Utilization {
            cpu_fraction: 0.2,
            mem_fraction: 0.8,
        };
        assert!(!mem_hot.below(0.5));
    }
}
