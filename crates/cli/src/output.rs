//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2}Gi", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2}Mi", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2}Ki", bytes as f64 / KB as f64)
    } else {
        format!("{}B", bytes)
    }
}

/// Format CPU millis as human-readable string
pub fn format_cpu(millis: u64) -> String {
    if millis >= 1000 {
        format!("{:.1}", millis as f64 / 1000.0)
    } else {
        format!("{}m", millis)
    }
}

/// Format a 0..1 fraction as a percentage
pub fn format_fraction(fraction: f64) -> String {
    format!("{:.0}%", fraction * 100.0)
}

/// Color a node state label
pub fn color_state(label: &str) -> String {
    match label {
        "active" => label.green().to_string(),
        "candidate" => label.yellow().to_string(),
        "draining" => label.yellow().to_string(),
        "reclaiming" | "terminated" => label.red().to_string(),
        _ => label.to_string(),
    }
}

/// Color a utilization fraction: red when the pool is nearly full
pub fn color_fraction(fraction: f64) -> String {
    let formatted = format_fraction(fraction);
    if fraction >= 0.9 {
        formatted.red().to_string()
    } else if fraction >= 0.7 {
        formatted.yellow().to_string()
    } else {
        formatted.green().to_string()
    }
}
