//! Engine status command

use anyhow::Result;
use tabled::Tabled;

use crate::client::{ApiClient, HealthResponse, ReadinessResponse};
use crate::output::{color_status, print_table, print_warning, OutputFormat};

/// Row for the component status table
#[derive(Tabled, serde::Serialize)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    component: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Message")]
    message: String,
}

/// Fetch and display engine health and readiness
pub async fn show_status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let health: HealthResponse = client.get("healthz").await?;
    let readiness: ReadinessResponse = client.get("readyz").await?;

    println!(
        "Engine: {}  Ready: {}",
        color_status(&health.status),
        color_status(if readiness.ready { "ready" } else { "pending" })
    );
    if let Some(reason) = readiness.reason {
        print_warning(&reason);
    }

    let mut rows: Vec<ComponentRow> = health
        .components
        .iter()
        .map(|(name, component)| ComponentRow {
            component: name.clone(),
            status: color_status(&component.status),
            message: component.message.clone().unwrap_or_default(),
        })
        .collect();
    rows.sort_by(|a, b| a.component.cmp(&b.component));

    print_table(&rows, format);

    Ok(())
}
