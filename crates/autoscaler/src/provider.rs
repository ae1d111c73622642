//! Simulated capacity provider
//!
//! Stands in for a cloud API: launch requests are acknowledged and echoed
//! onto a confirmation channel, drains and terminations are logged. The
//! daemon confirms launches after a configurable delay, so the full
//! pending-launch lifecycle runs end to end without external
//! infrastructure.

use anyhow::Result;
use async_trait::async_trait;
use autoscaler_lib::engine::{Engine, InstanceLauncher, WorkloadEvictor};
use autoscaler_lib::models::{Node, ProvisioningPlan};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

pub struct SimulatedProvider {
    confirm_tx: mpsc::Sender<String>,
}

impl SimulatedProvider {
    pub fn new() -> (Arc<Self>, mpsc::Receiver<String>) {
        let (confirm_tx, confirm_rx) = mpsc::channel(64);
        (Arc::new(Self { confirm_tx }), confirm_rx)
    }
}

#[async_trait]
impl InstanceLauncher for SimulatedProvider {
    async fn launch(&self, launch_id: &str, plan: &ProvisioningPlan) -> Result<()> {
        info!(
            launch_id = %launch_id,
            pool = %plan.pool,
            family = %plan.shape.family,
            count = plan.count,
            "Provider accepted launch request"
        );
        if self.confirm_tx.send(launch_id.to_string()).await.is_err() {
            warn!(launch_id = %launch_id, "Confirmation channel closed");
        }
        Ok(())
    }
}

#[async_trait]
impl WorkloadEvictor for SimulatedProvider {
    async fn drain(&self, node: &Node, deadline: i64) -> Result<()> {
        info!(node = %node.id, deadline = deadline, "Provider draining node");
        Ok(())
    }

    async fn terminate(&self, node: &Node) -> Result<()> {
        info!(node = %node.id, "Provider terminated node");
        Ok(())
    }
}

/// Confirm launches after `delay`, simulating provider boot time
pub async fn run_confirmations(
    engine: Arc<Engine>,
    mut confirm_rx: mpsc::Receiver<String>,
    delay: Duration,
) {
    while let Some(launch_id) = confirm_rx.recv().await {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let now = chrono::Utc::now().timestamp();
            if engine.confirm_launch(&launch_id, now).await.is_none() {
                // Timed out and was requeued before the confirmation landed
                warn!(launch_id = %launch_id, "Confirmation for expired launch dropped");
            }
        });
    }
}
