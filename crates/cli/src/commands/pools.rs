//! Pool-related CLI commands

use anyhow::{Context, Result};
use tabled::Tabled;

use crate::client::{ApiClient, Pool};
use crate::output::{format_bytes, format_cpu, print_success, print_warning, OutputFormat};

/// Row for the pools table
#[derive(Tabled)]
struct PoolRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Arch")]
    architecture: String,
    #[tabled(rename = "Capacity")]
    capacity_type: String,
    #[tabled(rename = "Families")]
    families: String,
    #[tabled(rename = "CPU Limit")]
    cpu_limit: String,
    #[tabled(rename = "Mem Limit")]
    mem_limit: String,
    #[tabled(rename = "OD Floor")]
    on_demand_floor: String,
}

/// List registered pools
pub async fn list_pools(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let pools: Vec<Pool> = client.get("/api/v1/pools").await?;

    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&pools)?;
            println!("{}", json);
        }
        OutputFormat::Table => {
            if pools.is_empty() {
                print_warning("No pools registered");
                return Ok(());
            }

            let rows: Vec<PoolRow> = pools
                .iter()
                .map(|p| PoolRow {
                    name: p.name.clone(),
                    architecture: p.architecture.clone().unwrap_or_else(|| "any".to_string()),
                    capacity_type: p.capacity_type.clone(),
                    families: if p.allowed_families.is_empty() {
                        "all".to_string()
                    } else {
                        p.allowed_families.join(",")
                    },
                    cpu_limit: format_cpu(p.resource_limits.cpu_millis),
                    mem_limit: format_bytes(p.resource_limits.memory_bytes),
                    on_demand_floor: p.on_demand_floor.to_string(),
                })
                .collect();

            let table = tabled::Table::new(rows)
                .with(tabled::settings::Style::rounded())
                .to_string();
            println!("{}", table);
            println!("\nTotal: {} pools", pools.len());
        }
    }

    Ok(())
}

/// Register a pool from a JSON definition file
pub async fn add_pool(client: &ApiClient, file: &str) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read pool definition {}", file))?;
    let pool: serde_json::Value =
        serde_json::from_str(&content).context("Invalid pool definition")?;

    let name = pool
        .get("name")
        .and_then(|n| n.as_str())
        .unwrap_or("<unnamed>")
        .to_string();

    client.post("/api/v1/pools", &pool).await?;
    print_success(&format!("Pool {} registered", name));

    Ok(())
}

/// Remove a pool by name
pub async fn remove_pool(client: &ApiClient, name: &str) -> Result<()> {
    client.delete(&format!("/api/v1/pools/{}", name)).await?;
    print_success(&format!("Pool {} removed", name));

    Ok(())
}
