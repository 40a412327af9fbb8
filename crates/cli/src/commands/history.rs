//! History query command

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use tabled::Tabled;

use crate::client::{ApiClient, HistoryResponse};
use crate::output::{color_outcome, format_value, print_info, print_table, OutputFormat};

/// Row for the history table
#[derive(Tabled, serde::Serialize)]
struct HistoryRow {
    #[tabled(rename = "Applied At")]
    applied_at: String,
    #[tabled(rename = "Type")]
    incident_type: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Old")]
    old_value: String,
    #[tabled(rename = "New")]
    new_value: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "Reason")]
    reason_code: String,
}

/// Parse a compact duration like "30m", "24h" or "7d"
pub fn parse_since(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    let (number, unit) = raw.split_at(raw.len().saturating_sub(1));
    let count: i64 = number
        .parse()
        .with_context(|| format!("Invalid duration '{}'", raw))?;

    match unit {
        "m" => Ok(Duration::minutes(count)),
        "h" => Ok(Duration::hours(count)),
        "d" => Ok(Duration::days(count)),
        _ => anyhow::bail!("Invalid duration '{}', expected e.g. 30m, 24h or 7d", raw),
    }
}

/// Fetch and display remediation history for a workload
pub async fn get_history(
    client: &ApiClient,
    workload: &str,
    kind: &str,
    since: &str,
    format: OutputFormat,
) -> Result<()> {
    let (namespace, name) = workload
        .split_once('/')
        .with_context(|| format!("Invalid workload '{}', expected namespace/name", workload))?;

    let since_at = Utc::now() - parse_since(since)?;
    let path = format!(
        "api/v1/history/{}/{}?kind={}&since={}",
        namespace,
        name,
        kind,
        since_at.to_rfc3339()
    );

    let response: HistoryResponse = client.get(&path).await?;

    if response.records.is_empty() {
        print_info(&format!(
            "No remediation history for {}/{} in the last {}",
            namespace, name, since
        ));
        return Ok(());
    }

    let rows: Vec<HistoryRow> = response
        .records
        .iter()
        .map(|r| HistoryRow {
            applied_at: r.applied_at.clone(),
            incident_type: r.incident_type.clone(),
            action: r.action_kind.clone(),
            old_value: format_value(&r.old_value),
            new_value: format_value(&r.new_value),
            outcome: color_outcome(&r.outcome),
            reason_code: r.reason_code.clone(),
        })
        .collect();

    print_table(&rows, format);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_since() {
        assert_eq!(parse_since("30m").unwrap(), Duration::minutes(30));
        assert_eq!(parse_since("24h").unwrap(), Duration::hours(24));
        assert_eq!(parse_since("7d").unwrap(), Duration::days(7));
    }

    #[test]
    fn test_parse_since_invalid() {
        assert!(parse_since("24x").is_err());
        assert!(parse_since("h").is_err());
        assert!(parse_since("").is_err());
    }
}
