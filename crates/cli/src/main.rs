//! Remediation Engine CLI
//!
//! A command-line tool for submitting incidents, polling results, and
//! inspecting remediation history and policies.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{history, policies, status, submit};

/// Remediation Engine CLI
#[derive(Parser)]
#[command(name = "rem")]
#[command(author, version, about = "CLI for the Remediation Engine", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via REM_API_URL env var)
    #[arg(long, env = "REM_API_URL", default_value = "http://localhost:8080")]
    pub api_url: String,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    /// Enable verbose output
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Submit an incident for remediation
    Submit {
        /// Workload kind
        #[arg(long, default_value = "Deployment")]
        kind: String,

        /// Workload namespace
        #[arg(long, short, default_value = "default")]
        namespace: String,

        /// Workload name
        #[arg(long)]
        name: String,

        /// Incident type hint (e.g. OOMKilled, CPUThrottled, CrashLoop)
        #[arg(long, short = 't')]
        incident_type: String,

        /// Raw parameter as key=value (repeatable)
        #[arg(long = "param", short)]
        params: Vec<String>,

        /// Offending instance identifier (repeatable)
        #[arg(long = "instance", short)]
        instances: Vec<String>,

        /// Source tag recorded with the incident
        #[arg(long, default_value = "cli")]
        source: String,

        /// Detach and poll later instead of waiting for the result
        #[arg(long)]
        detach: bool,
    },

    /// Get incidents, history, or policies
    #[command(subcommand)]
    Get(GetCommands),

    /// Show engine health and readiness
    Status,
}

#[derive(Subcommand)]
pub enum GetCommands {
    /// Get the result of a submitted incident
    Incident {
        /// Incident id returned at submission
        id: String,
    },

    /// Get remediation history for a workload
    History {
        /// Workload (format: namespace/name)
        workload: String,

        /// Workload kind
        #[arg(long, default_value = "Deployment")]
        kind: String,

        /// Time window to query (e.g. 1h, 24h, 7d)
        #[arg(long, default_value = "24h")]
        since: String,
    },

    /// Get the loaded policy table
    Policies,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize client
    let client = client::ApiClient::new(&cli.api_url)?;

    // Execute command
    match cli.command {
        Commands::Submit {
            kind,
            namespace,
            name,
            incident_type,
            params,
            instances,
            source,
            detach,
        } => {
            submit::submit_incident(
                &client,
                submit::SubmitArgs {
                    kind,
                    namespace,
                    name,
                    incident_type,
                    params,
                    instances,
                    source,
                    detach,
                },
                cli.format,
            )
            .await?;
        }
        Commands::Get(get_cmd) => match get_cmd {
            GetCommands::Incident { id } => {
                submit::get_incident(&client, &id, cli.format).await?;
            }
            GetCommands::History {
                workload,
                kind,
                since,
            } => {
                history::get_history(&client, &workload, &kind, &since, cli.format).await?;
            }
            GetCommands::Policies => {
                policies::get_policies(&client, cli.format).await?;
            }
        },
        Commands::Status => {
            status::show_status(&client, cli.format).await?;
        }
    }

    Ok(())
}
