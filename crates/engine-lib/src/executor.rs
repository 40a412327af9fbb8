//! Action execution against the cluster resource interface
//!
//! This module provides:
//! - The `ClusterClient` trait: the engine's only view of the cluster
//!   (versioned reads, conditional writes, instance termination)
//! - An HTTP implementation of the trait
//! - The `ActionExecutor` applying approved actions with a bounded
//!   optimistic read-modify-write loop
//!
//! Retry count and backoff are configuration data; no attempt holds any
//! lock across the suspension points.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::error::ClusterError;
use crate::models::{reason, ActionKind, Outcome, ParamValue, RemediationAction, WorkloadRef};
use crate::observability::EngineMetrics;

pub use async_trait::async_trait;

/// Opaque version token for optimistic concurrency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionToken(pub String);

/// Field-path-addressable view of a workload's desired-state document
///
/// The engine assumes nothing about the schema beyond dot-separated
/// paths resolving to numeric or string values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadSpec(pub serde_json::Value);

impl WorkloadSpec {
    /// Resolve a dot-separated field path to its value
    pub fn get(&self, path: &str) -> Option<ParamValue> {
        let mut node = &self.0;
        for part in path.split('.') {
            node = node.get(part)?;
        }
        match node {
            serde_json::Value::Number(n) => n.as_f64().map(ParamValue::Number),
            serde_json::Value::String(s) => Some(ParamValue::Text(s.clone())),
            _ => None,
        }
    }
}

/// A single-field patch submitted with a version precondition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldPatch {
    pub path: String,
    pub value: ParamValue,
}

/// The cluster resource interface (external collaborator)
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Read the current desired-state document and its version token
    async fn read(&self, workload: &WorkloadRef)
        -> Result<(WorkloadSpec, VersionToken), ClusterError>;

    /// Write a field patch if the version token is still current
    async fn write_if_version(
        &self,
        workload: &WorkloadRef,
        version: &VersionToken,
        patch: &FieldPatch,
    ) -> Result<(), ClusterError>;

    /// Terminate one running instance of the workload
    async fn terminate(&self, workload: &WorkloadRef, instance: &str) -> Result<(), ClusterError>;
}

/// HTTP implementation of the cluster resource interface
pub struct HttpClusterClient {
    client: reqwest::Client,
    base_url: Url,
}

/// Read response wire format
#[derive(Debug, Deserialize)]
struct ReadResponse {
    spec: serde_json::Value,
    version: String,
}

/// Conditional write wire format
#[derive(Debug, Serialize)]
struct WriteRequest<'a> {
    version: &'a str,
    path: &'a str,
    value: &'a ParamValue,
}

impl HttpClusterClient {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid cluster endpoint URL")?;

        Ok(Self { client, base_url })
    }

    fn workload_url(&self, workload: &WorkloadRef, suffix: &str) -> Result<Url, ClusterError> {
        let path = format!(
            "v1/workloads/{}/{}/{}{}",
            workload.kind, workload.namespace, workload.name, suffix
        );
        self.base_url
            .join(&path)
            .map_err(|e| ClusterError::Transport(e.to_string()))
    }
}

#[async_trait]
impl ClusterClient for HttpClusterClient {
    async fn read(
        &self,
        workload: &WorkloadRef,
    ) -> Result<(WorkloadSpec, VersionToken), ClusterError> {
        let url = self.workload_url(workload, "")?;
        let response = self.client.get(url).send().await?;

        match response.status() {
            status if status.is_success() => {
                let body: ReadResponse = response
                    .json()
                    .await
                    .map_err(|e| ClusterError::Transport(e.to_string()))?;
                Ok((WorkloadSpec(body.spec), VersionToken(body.version)))
            }
            reqwest::StatusCode::NOT_FOUND => Err(ClusterError::NotFound),
            status => Err(ClusterError::Transport(format!("read failed: {}", status))),
        }
    }

    async fn write_if_version(
        &self,
        workload: &WorkloadRef,
        version: &VersionToken,
        patch: &FieldPatch,
    ) -> Result<(), ClusterError> {
        let url = self.workload_url(workload, "/fields")?;
        let request = WriteRequest {
            version: &version.0,
            path: &patch.path,
            value: &patch.value,
        };

        let response = self.client.put(url).json(&request).send().await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            reqwest::StatusCode::CONFLICT => Err(ClusterError::Conflict),
            reqwest::StatusCode::NOT_FOUND => Err(ClusterError::NotFound),
            status => Err(ClusterError::Transport(format!("write failed: {}", status))),
        }
    }

    async fn terminate(&self, workload: &WorkloadRef, instance: &str) -> Result<(), ClusterError> {
        let url = self.workload_url(workload, &format!("/instances/{}", instance))?;
        let response = self.client.delete(url).send().await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            reqwest::StatusCode::NOT_FOUND => Err(ClusterError::NotFound),
            status => Err(ClusterError::Transport(format!(
                "terminate failed: {}",
                status
            ))),
        }
    }
}

/// Configuration for the executor's retry behavior
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum read-modify-write attempts per action
    pub max_attempts: u32,
    /// Initial backoff between attempts
    pub initial_backoff: Duration,
    /// Maximum backoff between attempts
    pub max_backoff: Duration,
    /// Deadline per cluster call; exceeding it consumes an attempt
    pub attempt_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
            attempt_timeout: Duration::from_secs(10),
        }
    }
}

/// Terminal result of executing one action
#[derive(Debug, Clone)]
pub struct Execution {
    pub outcome: Outcome,
    pub reason_code: String,
}

impl Execution {
    fn applied(reason_code: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Applied,
            reason_code: reason_code.into(),
        }
    }

    fn failed(reason_code: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Failed,
            reason_code: reason_code.into(),
        }
    }
}

/// Applies approved actions against the cluster
pub struct ActionExecutor {
    cluster: Arc<dyn ClusterClient>,
    config: ExecutorConfig,
    metrics: EngineMetrics,
}

impl ActionExecutor {
    pub fn new(cluster: Arc<dyn ClusterClient>, config: ExecutorConfig) -> Self {
        Self {
            cluster,
            config,
            metrics: EngineMetrics::new(),
        }
    }

    /// Execute an approved action; every branch is terminal
    pub async fn execute(&self, action: &RemediationAction) -> Execution {
        match action.kind {
            ActionKind::NoOp => Execution::applied(action.reason.clone()),
            ActionKind::PatchResourceSpec | ActionKind::ScaleReplicas => {
                self.apply_patch(action).await
            }
            ActionKind::TerminateInstance => self.terminate_instances(action).await,
        }
    }

    /// Optimistic read-modify-write with a bounded retry budget
    async fn apply_patch(&self, action: &RemediationAction) -> Execution {
        let (Some(field_path), Some(old_value), Some(new_value)) =
            (&action.field_path, &action.old_value, &action.new_value)
        else {
            warn!(workload = %action.workload, "Patch action without field data");
            return Execution::failed(reason::INVALID_ACTION);
        };

        let patch = FieldPatch {
            path: field_path.clone(),
            value: new_value.clone(),
        };

        let mut backoff = self.config.initial_backoff;

        for attempt in 1..=self.config.max_attempts {
            match self.try_patch_cycle(action, field_path, old_value, &patch).await {
                CycleResult::Applied => {
                    debug!(
                        workload = %action.workload,
                        field_path = %field_path,
                        attempt = attempt,
                        "Patch applied"
                    );
                    return Execution::applied(reason::APPLIED);
                }
                CycleResult::WorkloadGone => {
                    return Execution::failed(reason::WORKLOAD_GONE);
                }
                CycleResult::Conflict(cause) => {
                    warn!(
                        workload = %action.workload,
                        attempt = attempt,
                        max_attempts = self.config.max_attempts,
                        cause = %cause,
                        "Patch attempt failed"
                    );
                }
            }

            if attempt < self.config.max_attempts {
                self.metrics.inc_executor_retries();
                tokio::time::sleep(backoff).await;
                backoff = std::cmp::min(backoff * 2, self.config.max_backoff);
            }
        }

        Execution::failed(reason::CONFLICT_EXHAUSTED)
    }

    /// One full read-verify-write cycle
    async fn try_patch_cycle(
        &self,
        action: &RemediationAction,
        field_path: &str,
        old_value: &ParamValue,
        patch: &FieldPatch,
    ) -> CycleResult {
        let read = tokio::time::timeout(
            self.config.attempt_timeout,
            self.cluster.read(&action.workload),
        )
        .await;

        let (spec, version) = match read {
            Ok(Ok(pair)) => pair,
            Ok(Err(ClusterError::NotFound)) => return CycleResult::WorkloadGone,
            Ok(Err(e)) => return CycleResult::Conflict(format!("read: {}", e)),
            Err(_) => return CycleResult::Conflict("read timed out".to_string()),
        };

        // Guard against a concurrent external change: the field must
        // still hold the value the candidate was computed from
        match spec.get(field_path) {
            Some(current) if values_match(&current, old_value) => {}
            Some(current) => {
                return CycleResult::Conflict(format!(
                    "field changed externally: expected {}, found {}",
                    old_value, current
                ));
            }
            None => {
                return CycleResult::Conflict(format!("field {} missing from spec", field_path));
            }
        }

        let write = tokio::time::timeout(
            self.config.attempt_timeout,
            self.cluster.write_if_version(&action.workload, &version, patch),
        )
        .await;

        match write {
            Ok(Ok(())) => CycleResult::Applied,
            Ok(Err(ClusterError::NotFound)) => CycleResult::WorkloadGone,
            Ok(Err(ClusterError::Conflict)) => {
                CycleResult::Conflict("stale version token".to_string())
            }
            Ok(Err(e)) => CycleResult::Conflict(format!("write: {}", e)),
            Err(_) => CycleResult::Conflict("write timed out".to_string()),
        }
    }

    /// Direct termination of the listed instances
    ///
    /// Instance-scoped actions are not spec-mutating and need no version
    /// precondition; an already-gone instance is not a failure.
    async fn terminate_instances(&self, action: &RemediationAction) -> Execution {
        for instance in &action.instances {
            let result = tokio::time::timeout(
                self.config.attempt_timeout,
                self.cluster.terminate(&action.workload, instance),
            )
            .await;

            match result {
                Ok(Ok(())) => {
                    debug!(workload = %action.workload, instance = %instance, "Instance terminated");
                }
                Ok(Err(ClusterError::NotFound)) => {
                    debug!(instance = %instance, "Instance already gone");
                }
                Ok(Err(e)) => {
                    warn!(instance = %instance, error = %e, "Termination failed");
                    return Execution::failed(reason::TERMINATE_FAILED);
                }
                Err(_) => {
                    warn!(instance = %instance, "Termination timed out");
                    return Execution::failed(reason::TERMINATE_FAILED);
                }
            }
        }

        Execution::applied(reason::APPLIED)
    }
}

/// Result of a single read-modify-write cycle
enum CycleResult {
    Applied,
    WorkloadGone,
    Conflict(String),
}

/// Compare field values with float tolerance for numeric content
fn values_match(a: &ParamValue, b: &ParamValue) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => (x - y).abs() < 1e-9,
        _ => match (a, b) {
            (ParamValue::Text(x), ParamValue::Text(y)) => x == y,
            _ => false,
        },
    }
}
