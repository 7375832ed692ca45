//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print rows as a table, or the serialized items as JSON
pub fn print_table<T: Serialize, R: Tabled>(items: &[T], rows: Vec<R>, format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            if rows.is_empty() {
                println!("{}", "No items found".yellow());
                return;
            }
            let table = Table::new(rows).with(Style::rounded()).to_string();
            println!("{}", table);
        }
        OutputFormat::Json => {
            if let Ok(json) = serde_json::to_string_pretty(&items) {
                println!("{}", json);
            }
        }
    }
}

pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// CPU utilization with six decimals, matching the agent's wire format
pub fn format_percent(percent: f64) -> String {
    format!("{:.6}", percent)
}

/// Color a utilization cell; the sentinel shows as unreadable
pub fn color_utilization(percent: f64, sentinel: bool) -> String {
    if sentinel {
        "unreadable".red().to_string()
    } else if percent >= 80.0 {
        format_percent(percent).red().to_string()
    } else if percent >= 50.0 {
        format_percent(percent).yellow().to_string()
    } else {
        format_percent(percent).green().to_string()
    }
}
