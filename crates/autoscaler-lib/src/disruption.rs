//! Disruption control
//!
//! Evaluates the live node set for consolidation and termination. Each node
//! moves through `Active -> CandidateForRemoval -> Draining -> Terminated`,
//! with a reset back to `Active` whenever utilization recovers before the
//! drain starts. Voluntary drains never exceed the pool's disruption
//! budget; forced spot reclaims bypass it.

use crate::models::{DisruptionPolicy, Node, NodePool, NodeState};
use crate::pools::NodePoolRegistry;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Disruption controller tuning
#[derive(Debug, Clone)]
pub struct DisruptionConfig {
    /// Both cpu and memory fractions must sit below this for candidacy
    /// under `WhenEmptyOrUnderutilized`
    pub utilization_threshold: f64,
    /// Grace period for voluntary drains
    pub drain_grace: Duration,
    /// Abbreviated grace period for forced spot reclaims
    pub interruption_grace: Duration,
}

impl Default for DisruptionConfig {
    fn default() -> Self {
        Self {
            utilization_threshold: 0.5,
            drain_grace: Duration::from_secs(300),
            interruption_grace: Duration::from_secs(120),
        }
    }
}

/// A state-machine step decided by one evaluation pass
#[derive(Debug, Clone, PartialEq)]
pub enum NodeTransition {
    /// Start tracking a continuous idle stretch
    MarkBelow { node_id: String, since: i64 },
    /// Idle stretch broken before candidacy
    ClearBelow { node_id: String },
    /// Idle continuously for at least `consolidate_after`
    BecomeCandidate { node_id: String, since: i64 },
    /// Utilization recovered before the drain started
    ResetToActive { node_id: String },
    /// Begin draining within the pool's budget
    StartDrain { node_id: String, deadline: i64 },
    /// All bound workloads gone; the node can be terminated
    Terminate { node_id: String },
    /// Voluntary drain missed its grace period; reported, never forced
    DrainTimedOut { node_id: String },
    /// Forced reclaim deadline passed; capacity is gone regardless
    ForcedExpired { node_id: String },
}

/// Output of one disruption pass
#[derive(Debug, Clone, Default)]
pub struct DisruptionPass {
    pub transitions: Vec<NodeTransition>,
}

/// Evaluate one atomic pass over a consistent node snapshot
pub fn evaluate(
    nodes: &[Node],
    registry: &NodePoolRegistry,
    now: i64,
    config: &DisruptionConfig,
) -> DisruptionPass {
    let mut pass = DisruptionPass::default();

    // Per-pool node totals for budget ceilings
    let mut pool_counts: HashMap<&str, usize> = HashMap::new();
    let mut draining_counts: HashMap<&str, usize> = HashMap::new();
    for node in nodes {
        *pool_counts.entry(node.pool.as_str()).or_default() += 1;
        if let NodeState::Draining { forced: false, .. } = node.state {
            *draining_counts.entry(node.pool.as_str()).or_default() += 1;
        }
    }

    // Candidates cleared for draining this pass, grouped per pool so the
    // budget can be applied after the per-node sweep
    let mut drain_ready: HashMap<&str, Vec<&Node>> = HashMap::new();

    for node in nodes {
        let pool = match registry.get(&node.pool) {
            Some(p) => p,
            None => continue,
        };

        match node.state {
            NodeState::Active => {
                if is_idle(node, pool, config) {
                    match node.below_since {
                        None => pass.transitions.push(NodeTransition::MarkBelow {
                            node_id: node.id.clone(),
                            since: now,
                        }),
                        Some(since)
                            if now - since >= pool.disruption.consolidate_after.as_secs() as i64 =>
                        {
                            pass.transitions.push(NodeTransition::BecomeCandidate {
                                node_id: node.id.clone(),
                                since,
                            });
                        }
                        Some(_) => {}
                    }
                } else if node.below_since.is_some() {
                    pass.transitions.push(NodeTransition::ClearBelow {
                        node_id: node.id.clone(),
                    });
                }
            }
            NodeState::CandidateForRemoval { .. } => {
                if is_idle(node, pool, config) {
                    drain_ready.entry(node.pool.as_str()).or_default().push(node);
                } else {
                    // A node back above threshold never moves toward removal
                    pass.transitions.push(NodeTransition::ResetToActive {
                        node_id: node.id.clone(),
                    });
                }
            }
            NodeState::Draining { deadline, forced } => {
                if node.bound_workloads.is_empty() {
                    pass.transitions.push(NodeTransition::Terminate {
                        node_id: node.id.clone(),
                    });
                } else if now > deadline {
                    if forced {
                        pass.transitions.push(NodeTransition::ForcedExpired {
                            node_id: node.id.clone(),
                        });
                    } else {
                        pass.transitions.push(NodeTransition::DrainTimedOut {
                            node_id: node.id.clone(),
                        });
                    }
                }
            }
            NodeState::Terminated => {}
        }
    }

    // Apply budgets: least-utilized candidates first, up to the ceiling
    for (pool_name, mut candidates) in drain_ready {
        let pool = match registry.get(pool_name) {
            Some(p) => p,
            None => continue,
        };
        let total = pool_counts.get(pool_name).copied().unwrap_or(0);
        let ceiling = budget_ceiling(pool, total);
        let already = draining_counts.get(pool_name).copied().unwrap_or(0);
        let available = ceiling.saturating_sub(already);

        candidates.sort_by(|a, b| {
            let sa = a.last_utilization.map(|u| u.score()).unwrap_or(1.0);
            let sb = b.last_utilization.map(|u| u.score()).unwrap_or(1.0);
            sa.partial_cmp(&sb)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });

        for node in candidates.into_iter().take(available) {
            debug!(node = %node.id, pool = %pool_name, "Selecting node for drain");
            pass.transitions.push(NodeTransition::StartDrain {
                node_id: node.id.clone(),
                deadline: now + config.drain_grace.as_secs() as i64,
            });
        }
    }

    // Deterministic application order for the engine
    pass.transitions.sort_by_key(transition_key);
    pass
}

/// Max concurrent voluntary drains for a pool
pub fn budget_ceiling(pool: &NodePool, node_count: usize) -> usize {
    let pct = pool.disruption.budget_percent as usize;
    (pct * node_count).div_ceil(100)
}

/// Is the node empty/underutilized per its pool's policy?
fn is_idle(node: &Node, pool: &NodePool, config: &DisruptionConfig) -> bool {
    if node.bound_workloads.is_empty() {
        return true;
    }
    match pool.disruption.policy {
        DisruptionPolicy::WhenEmpty => false,
        // A node that never reported utilization counts as fully utilized
        DisruptionPolicy::WhenEmptyOrUnderutilized => node
            .last_utilization
            .map(|u| u.below(config.utilization_threshold))
            .unwrap_or(false),
    }
}

fn transition_key(t: &NodeTransition) -> (u8, String) {
    match t {
        NodeTransition::ClearBelow { node_id } => (0, node_id.clone()),
        NodeTransition::MarkBelow { node_id, .. } => (1, node_id.clone()),
        NodeTransition::ResetToActive { node_id } => (2, node_id.clone()),
        NodeTransition::BecomeCandidate { node_id, .. } => (3, node_id.clone()),
        NodeTransition::StartDrain { node_id, .. } => (4, node_id.clone()),
        NodeTransition::DrainTimedOut { node_id } => (5, node_id.clone()),
        NodeTransition::ForcedExpired { node_id } => (6, node_id.clone()),
        NodeTransition::Terminate { node_id } => (7, node_id.clone()),
    }
}
