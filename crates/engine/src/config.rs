//! Engine configuration

use anyhow::Result;
use serde::Deserialize;

/// Engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Instance name reported in structured logs
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    /// API server port for incident submission and health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Cluster resource interface endpoint
    #[serde(default = "default_cluster_endpoint")]
    pub cluster_endpoint: String,

    /// Path for the persisted history snapshot (empty disables persistence)
    #[serde(default = "default_history_path")]
    pub history_path: String,

    /// Path to the policy table; built-in defaults when empty
    #[serde(default)]
    pub policy_path: String,

    /// Read-modify-write attempts per action
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Per-attempt deadline for cluster calls in seconds
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_secs: u64,

    /// Idle lifetime of a workload worker in seconds
    #[serde(default = "default_worker_idle_timeout")]
    pub worker_idle_timeout_secs: u64,

    /// History prune interval in seconds
    #[serde(default = "default_prune_interval")]
    pub prune_interval_secs: u64,
}

fn default_instance_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "remediation-engine".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_cluster_endpoint() -> String {
    "http://cluster-gateway:9090".to_string()
}

fn default_history_path() -> String {
    "/var/lib/remediation-engine/history.json".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_attempt_timeout() -> u64 {
    10
}

fn default_worker_idle_timeout() -> u64 {
    60
}

fn default_prune_interval() -> u64 {
    3600
}

impl EngineConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("ENGINE"))
            .build()?;

        Ok(config.try_deserialize().unwrap_or_else(|_| EngineConfig {
            instance_name: default_instance_name(),
            api_port: default_api_port(),
            cluster_endpoint: default_cluster_endpoint(),
            history_path: default_history_path(),
            policy_path: String::new(),
            max_attempts: default_max_attempts(),
            attempt_timeout_secs: default_attempt_timeout(),
            worker_idle_timeout_secs: default_worker_idle_timeout(),
            prune_interval_secs: default_prune_interval(),
        }))
    }
}
