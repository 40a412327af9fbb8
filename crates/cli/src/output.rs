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

/// Print a table from a list of items
pub fn print_table<T: Tabled + Serialize>(items: &[T], format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            if items.is_empty() {
                println!("{}", "No items found".yellow());
                return;
            }
            let table = Table::new(items).with(Style::rounded()).to_string();
            println!("{}", table);
        }
        OutputFormat::Json => {
            if let Ok(json) = serde_json::to_string_pretty(&items) {
                println!("{}", json);
            }
        }
    }
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
#[allow(dead_code)]
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format an optional numeric-or-string value for display
pub fn format_value(value: &Option<serde_json::Value>) -> String {
    match value {
        Some(serde_json::Value::Number(n)) => {
            let v = n.as_f64().unwrap_or_default();
            if v.fract() == 0.0 {
                format!("{}", v as i64)
            } else {
                format!("{:.1}", v)
            }
        }
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "-".to_string(),
    }
}

/// Format seconds as a compact duration
pub fn format_duration_secs(secs: u64) -> String {
    if secs >= 3600 && secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs >= 60 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

/// Color an outcome based on its value
pub fn color_outcome(outcome: &str) -> String {
    match outcome {
        "applied" => outcome.green().to_string(),
        "rejected" => outcome.yellow().to_string(),
        "failed" => outcome.red().to_string(),
        _ => outcome.to_string(),
    }
}

/// Color a health status based on its value
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "healthy" | "ready" => status.green().to_string(),
        "degraded" | "pending" => status.yellow().to_string(),
        "unhealthy" | "failed" => status.red().to_string(),
        _ => status.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(&Some(serde_json::json!(240.0))), "240");
        assert_eq!(format_value(&Some(serde_json::json!(2.5))), "2.5");
        assert_eq!(format_value(&Some(serde_json::json!("100m"))), "100m");
        assert_eq!(format_value(&None), "-");
    }

    #[test]
    fn test_format_duration_secs() {
        assert_eq!(format_duration_secs(45), "45s");
        assert_eq!(format_duration_secs(300), "5m");
        assert_eq!(format_duration_secs(3600), "1h");
        assert_eq!(format_duration_secs(90), "90s");
    }
}
