//! Live node ledger
//!
//! Single owned registry of launched nodes, keyed by stable identifier.
//! The node set mutates only through launch confirmations (add) and
//! disruption transitions (remove); both paths serialize through this
//! ledger so per-pool resource-limit accounting stays correct.

use crate::models::{CapacityType, Node, NodeState, ResourceVector, Utilization};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Ledger of live nodes with per-pool committed-capacity accounting
#[derive(Debug, Default)]
pub struct NodeLedger {
    nodes: RwLock<HashMap<String, Node>>,
}

impl NodeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node from a confirmed launch
    pub async fn add(&self, node: Node) {
        let mut nodes = self.nodes.write().await;
        nodes.insert(node.id.clone(), node);
    }

    pub async fn get(&self, id: &str) -> Option<Node> {
        self.nodes.read().await.get(id).cloned()
    }

    /// Consistent snapshot of all non-terminated nodes for one cycle pass
    pub async fn snapshot(&self) -> Vec<Node> {
        let mut nodes: Vec<Node> = self
            .nodes
            .read()
            .await
            .values()
            .filter(|n| n.state != NodeState::Terminated)
            .cloned()
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    /// Committed capacity per pool across non-terminated nodes
    pub async fn committed_by_pool(&self) -> HashMap<String, ResourceVector> {
        let nodes = self.nodes.read().await;
        let mut committed: HashMap<String, ResourceVector> = HashMap::new();
        for node in nodes.values() {
            if node.state == NodeState::Terminated {
                continue;
            }
            let entry = committed.entry(node.pool.clone()).or_default();
            *entry = entry.add(&node.shape.capacity());
        }
        committed
    }

    /// Non-terminated node count for a pool
    pub async fn pool_node_count(&self, pool: &str) -> usize {
        self.nodes
            .read()
            .await
            .values()
            .filter(|n| n.pool == pool && n.state != NodeState::Terminated)
            .count()
    }

    /// On-demand node count for a pool, used for the on-demand floor
    pub async fn pool_on_demand_count(&self, pool: &str) -> usize {
        self.nodes
            .read()
            .await
            .values()
            .filter(|n| {
                n.pool == pool
                    && n.capacity_type == CapacityType::OnDemand
                    && n.state != NodeState::Terminated
            })
            .count()
    }

    pub async fn record_utilization(&self, id: &str, utilization: Utilization) {
        let mut nodes = self.nodes.write().await;
        if let Some(node) = nodes.get_mut(id) {
            node.last_utilization = Some(utilization);
        }
    }

    pub async fn bind_workload(&self, id: &str, workload_id: &str) {
        let mut nodes = self.nodes.write().await;
        if let Some(node) = nodes.get_mut(id) {
            node.bound_workloads.insert(workload_id.to_string());
        }
    }

    pub async fn unbind_workload(&self, id: &str, workload_id: &str) {
        let mut nodes = self.nodes.write().await;
        if let Some(node) = nodes.get_mut(id) {
            node.bound_workloads.remove(workload_id);
        }
    }

    pub async fn set_state(&self, id: &str, state: NodeState) {
        let mut nodes = self.nodes.write().await;
        if let Some(node) = nodes.get_mut(id) {
            node.state = state;
        }
    }

    pub async fn set_below_since(&self, id: &str, below_since: Option<i64>) {
        let mut nodes = self.nodes.write().await;
        if let Some(node) = nodes.get_mut(id) {
            node.below_since = below_since;
        }
    }

    /// Bump the drain-retry counter, returning the new value
    pub async fn record_drain_timeout(&self, id: &str) -> u32 {
        let mut nodes = self.nodes.write().await;
        match nodes.get_mut(id) {
            Some(node) => {
                node.drain_retries += 1;
                node.drain_retries
            }
            None => 0,
        }
    }

    pub async fn clear_drain_retries(&self, id: &str) {
        let mut nodes = self.nodes.write().await;
        if let Some(node) = nodes.get_mut(id) {
            node.drain_retries = 0;
        }
    }

    /// Drop terminated nodes from the ledger, returning them
    pub async fn sweep_terminated(&self) -> Vec<Node> {
        let mut nodes = self.nodes.write().await;
        let ids: Vec<String> = nodes
            .values()
            .filter(|n| n.state == NodeState::Terminated)
            .map(|n| n.id.clone())
            .collect();
        ids.iter().filter_map(|id| nodes.remove(id)).collect()
    }

    pub async fn len(&self) -> usize {
        self.nodes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.nodes.read().await.is_empty()
    }
}
