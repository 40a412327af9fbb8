//! Policy table inspection command

use std::collections::HashMap;

use anyhow::Result;
use tabled::Tabled;

use crate::client::{ApiClient, Policy};
use crate::output::{format_duration_secs, print_table, OutputFormat};

/// Row for the policy table
#[derive(Tabled, serde::Serialize)]
struct PolicyRow {
    #[tabled(rename = "Incident Type")]
    incident_type: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Rule")]
    rule: String,
    #[tabled(rename = "Max")]
    max_value: String,
    #[tabled(rename = "Cooldown")]
    cooldown: String,
    #[tabled(rename = "Rate Limit")]
    rate_limit: String,
}

/// Fetch and display the loaded policy table
pub async fn get_policies(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let policies: HashMap<String, Policy> = client.get("api/v1/policies").await?;

    let mut rows: Vec<PolicyRow> = policies
        .iter()
        .map(|(incident_type, policy)| PolicyRow {
            incident_type: incident_type.clone(),
            action: policy.action.clone(),
            rule: describe_rule(policy),
            max_value: policy
                .max_value
                .map(|v| v.to_string())
                .unwrap_or_else(|| "-".to_string()),
            cooldown: format_duration_secs(policy.cooldown_secs),
            rate_limit: format!(
                "{}/{}",
                policy.max_actions_per_window,
                format_duration_secs(policy.window_secs)
            ),
        })
        .collect();
    rows.sort_by(|a, b| a.incident_type.cmp(&b.incident_type));

    print_table(&rows, format);

    Ok(())
}

/// Describe the value computation of a policy
fn describe_rule(policy: &Policy) -> String {
    if let Some(increment) = policy.increment {
        format!("+{}", increment)
    } else if let Some(multiplier) = policy.multiplier {
        format!("x{}", multiplier)
    } else {
        "-".to_string()
    }
}
