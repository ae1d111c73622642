//! Cycle report command

use anyhow::Result;
use tabled::Tabled;

use crate::client::{ApiClient, CycleReport};
use crate::output::{color_fraction, format_bytes, format_cpu, OutputFormat};

/// Row for the per-pool section of the report
#[derive(Tabled)]
struct PoolReportRow {
    #[tabled(rename = "Pool")]
    name: String,
    #[tabled(rename = "Nodes")]
    nodes: usize,
    #[tabled(rename = "Draining")]
    draining: usize,
    #[tabled(rename = "CPU Used")]
    cpu_used: String,
    #[tabled(rename = "Mem Used")]
    mem_used: String,
    #[tabled(rename = "CPU %")]
    cpu_fraction: String,
    #[tabled(rename = "Mem %")]
    mem_fraction: String,
}

/// Show the most recent cycle report
pub async fn show_report(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let report: CycleReport = client.get("/api/v1/report").await?;

    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&report)?;
            println!("{}", json);
        }
        OutputFormat::Table => {
            println!(
                "Cycle {} ({}ms): {} matched, {} unplaceable, {} deferred",
                report.cycle,
                report.duration_ms,
                report.matched,
                report.unplaceable,
                report.deferred
            );
            println!(
                "Plans: {} emitted, {} nodes launched, {} launch timeouts",
                report.plans_emitted, report.nodes_launched, report.launch_timeouts
            );
            println!(
                "Disruption: {} drains started, {} nodes terminated, {} drain timeouts",
                report.drains_started, report.nodes_terminated, report.drain_timeouts
            );

            if !report.pools.is_empty() {
                let rows: Vec<PoolReportRow> = report
                    .pools
                    .iter()
                    .map(|p| PoolReportRow {
                        name: p.name.clone(),
                        nodes: p.nodes,
                        draining: p.draining,
                        cpu_used: format!(
                            "{}/{}",
                            format_cpu(p.committed.cpu_millis),
                            format_cpu(p.limits.cpu_millis)
                        ),
                        mem_used: format!(
                            "{}/{}",
                            format_bytes(p.committed.memory_bytes),
                            format_bytes(p.limits.memory_bytes)
                        ),
                        cpu_fraction: color_fraction(p.cpu_fraction),
                        mem_fraction: color_fraction(p.mem_fraction),
                    })
                    .collect();

                let table = tabled::Table::new(rows)
                    .with(tabled::settings::Style::rounded())
                    .to_string();
                println!("\n{}", table);
            }
        }
    }

    Ok(())
}
