//! Decision cycle engine
//!
//! Drives the periodic provisioning loop: drains the demand queue, plans
//! capacity, issues launch requests, applies disruption transitions, and
//! publishes a per-cycle report. Launch requests stay pending until
//! confirmed; pending capacity counts against pool limits so overlapping
//! cycles never over-provision.

use crate::catalog::InstanceCatalog;
use crate::demand;
use crate::disruption::{self, DisruptionConfig, NodeTransition};
use crate::error::PolicyError;
use crate::health::{components, HealthRegistry};
use crate::ledger::NodeLedger;
use crate::models::{
    CapacityType, InterruptionNotice, Node, NodePool, NodeState, ProvisioningPlan, ResourceVector,
    Utilization, WorkloadDemand,
};
use crate::observability::{EngineMetrics, StructuredLogger};
use crate::planner::{self, PlannerConfig};
use crate::pools::NodePoolRegistry;
use crate::report::{CycleReport, PoolReport};
use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::time::interval;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

/// Issues instance launch requests against the capacity provider
#[async_trait]
pub trait InstanceLauncher: Send + Sync {
    /// Request the nodes described by the plan. Confirmation arrives
    /// asynchronously through [`Engine::confirm_launch`].
    async fn launch(&self, launch_id: &str, plan: &ProvisioningPlan) -> Result<()>;
}

/// Evicts workloads and releases nodes back to the provider
#[async_trait]
pub trait WorkloadEvictor: Send + Sync {
    async fn drain(&self, node: &Node, deadline: i64) -> Result<()>;
    async fn terminate(&self, node: &Node) -> Result<()>;
}

/// Engine tuning
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Cluster identifier carried on every structured log line
    pub cluster: String,
    /// Decision cycle period
    pub cycle_interval: Duration,
    /// How long a launch request may stay unconfirmed
    pub launch_timeout: Duration,
    /// Consecutive launch failures before escalating to an alert
    pub launch_failure_alert_threshold: u32,
    /// Drain retries for one node before escalating to an alert
    pub drain_retry_alert_threshold: u32,
    pub planner: PlannerConfig,
    pub disruption: DisruptionConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cluster: "default".to_string(),
            cycle_interval: Duration::from_secs(10),
            launch_timeout: Duration::from_secs(120),
            launch_failure_alert_threshold: 3,
            drain_retry_alert_threshold: 3,
            planner: PlannerConfig::default(),
            disruption: DisruptionConfig::default(),
        }
    }
}

/// A launch request issued but not yet confirmed by the provider
#[derive(Debug, Clone, Serialize)]
pub struct PendingLaunch {
    pub plan: ProvisioningPlan,
    pub demands: Vec<WorkloadDemand>,
    pub issued_at: i64,
    pub deadline: i64,
}

/// The autoscaler decision engine
///
/// All intake paths (demands, utilization samples, interruption notices)
/// enqueue; the queues are drained at the start of each cycle so every
/// cycle works from a consistent snapshot.
pub struct Engine {
    registry: RwLock<NodePoolRegistry>,
    catalog: InstanceCatalog,
    ledger: NodeLedger,
    pending: DashMap<String, PendingLaunch>,
    demand_queue: Mutex<Vec<WorkloadDemand>>,
    interruption_queue: Mutex<Vec<InterruptionNotice>>,
    launcher: Arc<dyn InstanceLauncher>,
    evictor: Arc<dyn WorkloadEvictor>,
    config: EngineConfig,
    cycle: AtomicU64,
    launch_seq: AtomicU64,
    launch_failures: AtomicU32,
    last_report: RwLock<Option<CycleReport>>,
    metrics: EngineMetrics,
    logger: StructuredLogger,
    health: HealthRegistry,
}

impl Engine {
    pub fn new(
        registry: NodePoolRegistry,
        catalog: InstanceCatalog,
        launcher: Arc<dyn InstanceLauncher>,
        evictor: Arc<dyn WorkloadEvictor>,
        config: EngineConfig,
    ) -> Self {
        let logger = StructuredLogger::new(config.cluster.clone());
        Self {
            registry: RwLock::new(registry),
            catalog,
            ledger: NodeLedger::new(),
            pending: DashMap::new(),
            demand_queue: Mutex::new(Vec::new()),
            interruption_queue: Mutex::new(Vec::new()),
            launcher,
            evictor,
            config,
            cycle: AtomicU64::new(0),
            launch_seq: AtomicU64::new(0),
            launch_failures: AtomicU32::new(0),
            last_report: RwLock::new(None),
            metrics: EngineMetrics::new(),
            logger,
            health: HealthRegistry::new(),
        }
    }

    /// Queue an unschedulable workload demand for the next cycle
    pub async fn submit_demand(&self, demand: WorkloadDemand) {
        self.demand_queue.lock().await.push(demand);
    }

    /// Forward demands from an mpsc feed into the queue until the sender
    /// side closes
    pub fn attach_demand_feed(
        self: &Arc<Self>,
        rx: tokio::sync::mpsc::Receiver<WorkloadDemand>,
    ) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut feed = ReceiverStream::new(rx);
            while let Some(demand) = feed.next().await {
                engine.submit_demand(demand).await;
            }
            // A closed feed means no new demands can arrive; block readiness
            warn!("Demand feed closed");
            engine
                .health
                .set_unhealthy(components::DEMAND_FEED, "demand feed closed")
                .await;
        })
    }

    /// Queue a capacity interruption notice for the next cycle
    pub async fn report_interruption(&self, notice: InterruptionNotice) {
        self.interruption_queue.lock().await.push(notice);
    }

    /// Record a utilization sample for a live node
    pub async fn record_utilization(&self, node_id: &str, utilization: Utilization) {
        self.ledger.record_utilization(node_id, utilization).await;
    }

    pub async fn bind_workload(&self, node_id: &str, workload_id: &str) {
        self.ledger.bind_workload(node_id, workload_id).await;
    }

    pub async fn unbind_workload(&self, node_id: &str, workload_id: &str) {
        self.ledger.unbind_workload(node_id, workload_id).await;
    }

    pub async fn register_pool(&self, pool: NodePool) -> Result<(), PolicyError> {
        self.registry.write().await.register(pool)
    }

    /// Remove a pool; rejected while the pool still owns live nodes
    pub async fn remove_pool(&self, name: &str) -> Result<(), PolicyError> {
        let live = self.ledger.pool_node_count(name).await;
        self.registry.write().await.remove(name, live).map(|_| ())
    }

    pub async fn pools(&self) -> Vec<NodePool> {
        self.registry.read().await.all().to_vec()
    }

    pub async fn nodes(&self) -> Vec<Node> {
        self.ledger.snapshot().await
    }

    pub async fn last_report(&self) -> Option<CycleReport> {
        self.last_report.read().await.clone()
    }

    /// Outstanding launch requests, sorted by launch id
    pub fn pending_launches(&self) -> Vec<(String, PendingLaunch)> {
        let mut pending: Vec<(String, PendingLaunch)> = self
            .pending
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        pending.sort_by(|a, b| a.0.cmp(&b.0));
        pending
    }

    /// Consecutive launch failures since the last success
    pub fn launch_failure_streak(&self) -> u32 {
        self.launch_failures.load(Ordering::SeqCst)
    }

    pub fn health_registry(&self) -> HealthRegistry {
        self.health.clone()
    }

    /// Confirm a pending launch, materializing its nodes in the ledger.
    /// Returns the new node ids, or None for an unknown launch id.
    pub async fn confirm_launch(&self, launch_id: &str, now: i64) -> Option<Vec<String>> {
        let (_, pending) = self.pending.remove(launch_id)?;
        let mut ids = Vec::with_capacity(pending.plan.count as usize);
        for i in 0..pending.plan.count {
            let id = format!("{}-{}", launch_id, i);
            self.ledger
                .add(Node {
                    id: id.clone(),
                    pool: pending.plan.pool.clone(),
                    shape: pending.plan.shape.clone(),
                    capacity_type: pending.plan.capacity_type,
                    launched_at: now,
                    bound_workloads: Default::default(),
                    last_utilization: None,
                    state: NodeState::Active,
                    below_since: None,
                    drain_retries: 0,
                })
                .await;
            ids.push(id);
        }
        info!(
            launch_id = %launch_id,
            pool = %pending.plan.pool,
            nodes = ids.len(),
            "Launch confirmed"
        );
        Some(ids)
    }

    /// Cancel a pending launch, returning its demands to the queue
    pub async fn cancel_launch(&self, launch_id: &str) -> bool {
        match self.pending.remove(launch_id) {
            Some((_, pending)) => {
                self.demand_queue.lock().await.extend(pending.demands);
                true
            }
            None => false,
        }
    }

    /// Run one decision cycle against the clock value `now`
    pub async fn run_cycle(&self, now: i64) -> CycleReport {
        let started = std::time::Instant::now();
        let cycle = self.cycle.fetch_add(1, Ordering::SeqCst) + 1;
        let mut report = CycleReport {
            cycle,
            started_at: now,
            ..Default::default()
        };

        self.expire_pending_launches(now, &mut report).await;
        self.apply_interruptions(now).await;

        let demands: Vec<WorkloadDemand> = {
            let mut queue = self.demand_queue.lock().await;
            std::mem::take(&mut *queue)
        };

        let registry = self.registry.read().await;
        let aggregation = demand::aggregate(demands, &registry);
        for stranded in &aggregation.unplaceable {
            self.logger.log_unplaceable(&stranded.id);
        }

        let (committed, on_demand) = self.capacity_accounting().await;
        let outcome = planner::plan(
            &aggregation.groups,
            &registry,
            &self.catalog,
            &committed,
            &on_demand,
            &self.config.planner,
        );
        drop(registry);

        report.matched = outcome.matched.len();
        report.unplaceable = aggregation.unplaceable.len();
        report.deferred = outcome.deferred.iter().map(|g| g.demand_ids.len()).sum();

        // Demands are owned by the groups; index them so plans and deferrals
        // can carry the full structs forward
        let mut by_id: HashMap<String, WorkloadDemand> = aggregation
            .groups
            .into_iter()
            .flat_map(|g| g.demands)
            .map(|d| (d.id.clone(), d))
            .collect();

        for group in &outcome.deferred {
            debug!(
                reason = %group.reason,
                demands = group.demand_ids.len(),
                "Deferring demand group to next cycle"
            );
            let mut queue = self.demand_queue.lock().await;
            for id in &group.demand_ids {
                if let Some(d) = by_id.remove(id) {
                    queue.push(d);
                }
            }
        }

        for planned in outcome.plans {
            let demands: Vec<WorkloadDemand> = planned
                .demand_ids
                .iter()
                .filter_map(|id| by_id.remove(id))
                .collect();
            self.issue_launch(planned.plan, demands, now, &mut report)
                .await;
        }

        let nodes = self.ledger.snapshot().await;
        let registry = self.registry.read().await;
        let pass = disruption::evaluate(&nodes, &registry, now, &self.config.disruption);
        drop(registry);
        self.apply_transitions(pass.transitions, now, &mut report)
            .await;

        let swept = self.ledger.sweep_terminated().await;
        debug!(swept = swept.len(), "Swept terminated nodes");

        self.finish_cycle(&mut report, started).await;
        report
    }

    /// Start the periodic cycle loop, running until shutdown
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        for component in [
            components::PLANNER,
            components::DISRUPTION,
            components::LAUNCHER,
            components::DEMAND_FEED,
        ] {
            self.health.register(component).await;
        }
        self.health.set_ready(true).await;

        let pools = self.registry.read().await.all().len();
        self.logger.log_startup(env!("CARGO_PKG_VERSION"), pools);

        let mut ticker = interval(self.config.cycle_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = chrono::Utc::now().timestamp();
                    let report = self.run_cycle(now).await;
                    debug!(
                        cycle = report.cycle,
                        matched = report.matched,
                        deferred = report.deferred,
                        "Cycle tick complete"
                    );
                }
                _ = shutdown.recv() => {
                    self.logger.log_shutdown("shutdown signal received");
                    break;
                }
            }
        }
    }

    /// Requeue demands behind launch requests that missed their deadline
    async fn expire_pending_launches(&self, now: i64, report: &mut CycleReport) {
        let expired: Vec<String> = self
            .pending
            .iter()
            .filter(|e| now > e.value().deadline)
            .map(|e| e.key().clone())
            .collect();

        for launch_id in expired {
            if let Some((_, pending)) = self.pending.remove(&launch_id) {
                self.logger
                    .log_launch_timeout(&launch_id, &pending.plan.pool, pending.demands.len());
                self.metrics.inc_launch_timeouts();
                report.launch_timeouts += 1;
                self.demand_queue.lock().await.extend(pending.demands);
            }
        }
    }

    /// Apply queued interruption notices as forced drains, outside the
    /// disruption budget
    async fn apply_interruptions(&self, now: i64) {
        let notices: Vec<InterruptionNotice> = {
            let mut queue = self.interruption_queue.lock().await;
            std::mem::take(&mut *queue)
        };

        for notice in notices {
            let node = match self.ledger.get(&notice.node_id).await {
                Some(n) if n.state != NodeState::Terminated => n,
                _ => {
                    warn!(node = %notice.node_id, "Interruption notice for unknown node");
                    continue;
                }
            };
            let grace = self.config.disruption.interruption_grace.as_secs() as i64;
            let deadline = notice.deadline.min(now + grace);
            self.logger.log_interruption(&node.id, deadline);
            self.ledger
                .set_state(
                    &node.id,
                    NodeState::Draining {
                        deadline,
                        forced: true,
                    },
                )
                .await;
            self.logger.log_drain_started(&node.id, &node.pool, deadline, true);
            if let Err(e) = self.evictor.drain(&node, deadline).await {
                warn!(node = %node.id, error = %e, "Forced drain request failed");
            }
        }
    }

    /// Existing plus pending capacity per pool, and on-demand node counts
    /// for the floor check
    async fn capacity_accounting(&self) -> (HashMap<String, ResourceVector>, HashMap<String, usize>) {
        let mut committed = self.ledger.committed_by_pool().await;
        let mut on_demand: HashMap<String, usize> = HashMap::new();

        for node in self.ledger.snapshot().await {
            if node.capacity_type == CapacityType::OnDemand {
                *on_demand.entry(node.pool).or_default() += 1;
            }
        }

        for entry in self.pending.iter() {
            let plan = &entry.value().plan;
            let total = plan.shape.capacity().scale(plan.count as u64);
            let slot = committed.entry(plan.pool.clone()).or_default();
            *slot = slot.add(&total);
            if plan.capacity_type == CapacityType::OnDemand {
                *on_demand.entry(plan.pool.clone()).or_default() += plan.count as usize;
            }
        }

        (committed, on_demand)
    }

    async fn issue_launch(
        &self,
        plan: ProvisioningPlan,
        demands: Vec<WorkloadDemand>,
        now: i64,
        report: &mut CycleReport,
    ) {
        let seq = self.launch_seq.fetch_add(1, Ordering::SeqCst);
        let launch_id = format!("launch-{}", seq);

        match self.launcher.launch(&launch_id, &plan).await {
            Ok(()) => {
                self.logger.log_plan(
                    &launch_id,
                    &plan.pool,
                    &plan.shape.family,
                    &plan.capacity_type.to_string(),
                    plan.count,
                    demands.len(),
                );
                self.metrics.inc_plans_emitted();
                self.launch_failures.store(0, Ordering::SeqCst);
                self.health.set_healthy(components::LAUNCHER).await;
                report.plans_emitted += 1;
                report.nodes_launched += plan.count;
                self.pending.insert(
                    launch_id,
                    PendingLaunch {
                        plan,
                        demands,
                        issued_at: now,
                        deadline: now + self.config.launch_timeout.as_secs() as i64,
                    },
                );
            }
            Err(e) => {
                let streak = self.launch_failures.fetch_add(1, Ordering::SeqCst) + 1;
                warn!(launch_id = %launch_id, error = %e, "Launch request failed");
                self.logger.log_launch_failure(
                    &launch_id,
                    &plan.pool,
                    streak,
                    self.config.launch_failure_alert_threshold,
                );
                self.metrics.inc_launch_failures();
                if streak >= self.config.launch_failure_alert_threshold {
                    self.health
                        .set_degraded(
                            components::LAUNCHER,
                            format!("{} consecutive launch failures", streak),
                        )
                        .await;
                }
                self.demand_queue.lock().await.extend(demands);
            }
        }
    }

    async fn apply_transitions(
        &self,
        transitions: Vec<NodeTransition>,
        now: i64,
        report: &mut CycleReport,
    ) {
        for transition in transitions {
            match transition {
                NodeTransition::MarkBelow { node_id, since } => {
                    self.ledger.set_below_since(&node_id, Some(since)).await;
                }
                NodeTransition::ClearBelow { node_id } => {
                    self.ledger.set_below_since(&node_id, None).await;
                }
                NodeTransition::BecomeCandidate { node_id, since } => {
                    debug!(node = %node_id, "Node is a removal candidate");
                    self.ledger
                        .set_state(&node_id, NodeState::CandidateForRemoval { since })
                        .await;
                }
                NodeTransition::ResetToActive { node_id } => {
                    self.ledger.set_state(&node_id, NodeState::Active).await;
                    self.ledger.set_below_since(&node_id, None).await;
                    self.ledger.clear_drain_retries(&node_id).await;
                }
                NodeTransition::StartDrain { node_id, deadline } => {
                    if let Some(node) = self.ledger.get(&node_id).await {
                        self.ledger
                            .set_state(
                                &node_id,
                                NodeState::Draining {
                                    deadline,
                                    forced: false,
                                },
                            )
                            .await;
                        self.logger
                            .log_drain_started(&node_id, &node.pool, deadline, false);
                        report.drains_started += 1;
                        if let Err(e) = self.evictor.drain(&node, deadline).await {
                            warn!(node = %node_id, error = %e, "Drain request failed");
                        }
                    }
                }
                NodeTransition::DrainTimedOut { node_id } => {
                    let retries = self.ledger.record_drain_timeout(&node_id).await;
                    self.logger
                        .log_drain_timeout(&node_id, retries, self.config.drain_retry_alert_threshold);
                    self.metrics.inc_drain_timeouts();
                    report.drain_timeouts += 1;
                    if retries >= self.config.drain_retry_alert_threshold {
                        self.health
                            .set_degraded(
                                components::DISRUPTION,
                                format!("node {} failing to drain", node_id),
                            )
                            .await;
                    }
                    // Voluntary drains are never forced; extend and retry
                    let grace = self.config.disruption.drain_grace.as_secs() as i64;
                    self.ledger
                        .set_state(
                            &node_id,
                            NodeState::Draining {
                                deadline: now + grace,
                                forced: false,
                            },
                        )
                        .await;
                }
                NodeTransition::Terminate { node_id } => {
                    self.terminate_node(&node_id, false, report).await;
                }
                NodeTransition::ForcedExpired { node_id } => {
                    self.terminate_node(&node_id, true, report).await;
                }
            }
        }
    }

    async fn terminate_node(&self, node_id: &str, forced: bool, report: &mut CycleReport) {
        if let Some(node) = self.ledger.get(node_id).await {
            if let Err(e) = self.evictor.terminate(&node).await {
                warn!(node = %node_id, error = %e, "Terminate request failed");
            }
            self.ledger.set_state(node_id, NodeState::Terminated).await;
            self.logger.log_node_terminated(node_id, &node.pool, forced);
            self.metrics.inc_nodes_terminated();
            report.nodes_terminated += 1;
        }
    }

    /// Build pool reports, publish metrics, and store the cycle report
    async fn finish_cycle(&self, report: &mut CycleReport, started: std::time::Instant) {
        let nodes = self.ledger.snapshot().await;
        let committed = self.ledger.committed_by_pool().await;
        let registry = self.registry.read().await;

        let mut draining_total = 0usize;
        for pool in registry.all() {
            let pool_nodes = nodes.iter().filter(|n| n.pool == pool.name).count();
            let draining = nodes
                .iter()
                .filter(|n| n.pool == pool.name && matches!(n.state, NodeState::Draining { .. }))
                .count();
            draining_total += draining;
            let used = committed.get(&pool.name).copied().unwrap_or_default();
            let cpu_fraction = fraction(used.cpu_millis, pool.resource_limits.cpu_millis);
            let mem_fraction = fraction(used.memory_bytes, pool.resource_limits.memory_bytes);
            self.metrics.set_pool_cpu_fraction(&pool.name, cpu_fraction);
            report.pools.push(PoolReport {
                name: pool.name.clone(),
                nodes: pool_nodes,
                draining,
                committed: used,
                limits: pool.resource_limits,
                cpu_fraction,
                mem_fraction,
            });
        }
        drop(registry);

        report.duration_ms = started.elapsed().as_millis() as u64;

        self.metrics
            .observe_cycle_duration(started.elapsed().as_secs_f64());
        self.metrics.set_demand_accounting(
            report.matched as i64,
            report.unplaceable as i64,
            report.deferred as i64,
        );
        self.metrics
            .set_node_counts((nodes.len() - draining_total) as i64, draining_total as i64);
        self.metrics.set_pending_launches(self.pending.len() as i64);

        self.logger.log_cycle_complete(
            report.cycle,
            report.matched,
            report.unplaceable,
            report.deferred,
            report.plans_emitted,
            report.duration_ms,
        );

        *self.last_report.write().await = Some(report.clone());
    }
}

fn fraction(used: u64, limit: u64) -> f64 {
    if limit == 0 {
        return 0.0;
    }
    used as f64 / limit as f64
}
