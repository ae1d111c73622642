//! Node listing command

use anyhow::Result;
use tabled::Tabled;

use crate::client::{ApiClient, NodeInfo};
use crate::output::{color_state, format_fraction, print_warning, OutputFormat};

/// Row for the nodes table
#[derive(Tabled)]
struct NodeRow {
    #[tabled(rename = "Node")]
    id: String,
    #[tabled(rename = "Pool")]
    pool: String,
    #[tabled(rename = "Shape")]
    shape: String,
    #[tabled(rename = "Capacity")]
    capacity_type: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Workloads")]
    workloads: usize,
    #[tabled(rename = "CPU Util")]
    cpu_util: String,
}

/// List nodes, optionally filtered by pool
pub async fn list_nodes(
    client: &ApiClient,
    pool: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    let mut nodes: Vec<NodeInfo> = client.get("/api/v1/nodes").await?;

    if let Some(pool) = pool {
        nodes.retain(|n| n.pool == pool);
    }

    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&nodes)?;
            println!("{}", json);
        }
        OutputFormat::Table => {
            if nodes.is_empty() {
                print_warning("No nodes found");
                return Ok(());
            }

            let rows: Vec<NodeRow> = nodes
                .iter()
                .map(|n| NodeRow {
                    id: n.id.clone(),
                    pool: n.pool.clone(),
                    shape: format!(
                        "{} {}c/{}Gi",
                        n.shape.family, n.shape.vcpus, n.shape.memory_gib
                    ),
                    capacity_type: n.capacity_type.clone(),
                    state: color_state(n.state.label()),
                    workloads: n.bound_workloads.len(),
                    cpu_util: n
                        .last_utilization
                        .as_ref()
                        .map(|u| format_fraction(u.cpu_fraction))
                        .unwrap_or_else(|| "-".to_string()),
                })
                .collect();

            let table = tabled::Table::new(rows)
                .with(tabled::settings::Style::rounded())
                .to_string();
            println!("{}", table);
            println!("\nTotal: {} nodes", nodes.len());
        }
    }

    Ok(())
}
