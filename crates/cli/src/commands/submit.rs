//! Incident submission and result polling commands

use std::collections::HashMap;

use anyhow::{Context, Result};
use tabled::Tabled;

use crate::client::{AcceptedResponse, ActionResult, ApiClient, RawEvent, WorkloadRef};
use crate::output::{
    color_outcome, format_value, print_info, print_success, print_table, OutputFormat,
};

/// Arguments for the submit command
pub struct SubmitArgs {
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub incident_type: String,
    pub params: Vec<String>,
    pub instances: Vec<String>,
    pub source: String,
    pub detach: bool,
}

/// Row for the result table
#[derive(Tabled, serde::Serialize)]
struct ResultRow {
    #[tabled(rename = "Incident")]
    incident_id: String,
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

impl ResultRow {
    fn from_result(result: &ActionResult) -> Self {
        Self {
            incident_id: result.incident_id.clone(),
            action: result.action_kind.clone(),
            old_value: format_value(&result.old_value),
            new_value: format_value(&result.new_value),
            outcome: color_outcome(&result.outcome),
            reason_code: result.reason_code.clone(),
        }
    }
}

/// Parse a key=value parameter; numeric values become JSON numbers
pub fn parse_param(raw: &str) -> Result<(String, serde_json::Value)> {
    let (key, value) = raw
        .split_once('=')
        .with_context(|| format!("Invalid parameter '{}', expected key=value", raw))?;

    let value = match value.parse::<f64>() {
        Ok(n) => serde_json::json!(n),
        Err(_) => serde_json::json!(value),
    };

    Ok((key.to_string(), value))
}

/// Submit an incident for remediation
pub async fn submit_incident(
    client: &ApiClient,
    args: SubmitArgs,
    format: OutputFormat,
) -> Result<()> {
    let mut raw_parameters = HashMap::new();
    for param in &args.params {
        let (key, value) = parse_param(param)?;
        raw_parameters.insert(key, value);
    }

    let event = RawEvent {
        source: args.source,
        workload_ref: WorkloadRef {
            kind: args.kind,
            namespace: args.namespace,
            name: args.name,
        },
        type_hint: args.incident_type,
        timestamp: chrono::Utc::now().to_rfc3339(),
        instance_refs: args.instances,
        raw_parameters,
    };

    if args.detach {
        let accepted: AcceptedResponse = client
            .post("api/v1/incidents?mode=async", &event)
            .await?;
        print_info(&format!(
            "Incident accepted, poll with: rem get incident {}",
            accepted.incident_id
        ));
        return Ok(());
    }

    let result: ActionResult = client.post("api/v1/incidents", &event).await?;

    match result.outcome.as_str() {
        "applied" => print_success(&format!("Remediation {}", result.reason_code)),
        _ => print_info(&format!(
            "Remediation {}: {}",
            result.outcome, result.reason_code
        )),
    }
    print_table(&[ResultRow::from_result(&result)], format);

    Ok(())
}

/// Poll the result of a submitted incident
pub async fn get_incident(client: &ApiClient, id: &str, format: OutputFormat) -> Result<()> {
    let response: serde_json::Value = client.get(&format!("api/v1/incidents/{}", id)).await?;

    if response.get("status").and_then(|s| s.as_str()) == Some("pending") {
        print_info("Incident is still being processed");
        return Ok(());
    }

    let result: ActionResult =
        serde_json::from_value(response).context("Failed to parse incident result")?;
    print_table(&[ResultRow::from_result(&result)], format);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_param_numeric() {
        let (key, value) = parse_param("currentMemoryLimitMi=96").unwrap();
        assert_eq!(key, "currentMemoryLimitMi");
        assert_eq!(value, serde_json::json!(96.0));
    }

    #[test]
    fn test_parse_param_text() {
        let (key, value) = parse_param("nodeName=worker-3").unwrap();
        assert_eq!(key, "nodeName");
        assert_eq!(value, serde_json::json!("worker-3"));
    }

    #[test]
    fn test_parse_param_invalid() {
        assert!(parse_param("no-equals-sign").is_err());
    }
}
