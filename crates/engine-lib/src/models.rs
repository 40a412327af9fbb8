//! Core data model for the remediation engine

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reference to the owning declarative resource of a workload
///
/// Spec-mutating actions always address this reference, never a
/// transient instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkloadRef {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl WorkloadRef {
    pub fn new(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Stable key used for worker routing and history indexing
    pub fn key(&self) -> String {
        format!("{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

impl std::fmt::Display for WorkloadRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// Incident type classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentType {
    OomKilled,
    CpuThrottled,
    CrashLoop,
    Unknown,
}

impl IncidentType {
    /// Parse a free-form type hint from an upstream detector
    ///
    /// Accepts common spellings ("OOMKilled", "oom_killed", "oomkilled");
    /// anything unrecognized maps to `Unknown`.
    pub fn parse_hint(hint: &str) -> Self {
        let normalized: String = hint
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();

        match normalized.as_str() {
            "oomkilled" | "oomkill" => IncidentType::OomKilled,
            "cputhrottled" | "cputhrottling" => IncidentType::CpuThrottled,
            "crashloop" | "crashloopbackoff" => IncidentType::CrashLoop,
            _ => IncidentType::Unknown,
        }
    }
}

impl std::fmt::Display for IncidentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IncidentType::OomKilled => write!(f, "OOMKilled"),
            IncidentType::CpuThrottled => write!(f, "CPUThrottled"),
            IncidentType::CrashLoop => write!(f, "CrashLoop"),
            IncidentType::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Numeric-or-string parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Number(f64),
    Text(String),
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Number(n) => Some(*n),
            ParamValue::Text(s) => s.parse().ok(),
        }
    }
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamValue::Number(n) => write!(f, "{}", n),
            ParamValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<f64> for ParamValue {
    fn from(n: f64) -> Self {
        ParamValue::Number(n)
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::Text(s.to_string())
    }
}

/// A normalized incident record, immutable once created
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    /// Generated unique id, used for result correlation
    pub id: String,
    pub incident_type: IncidentType,
    pub detected_at: DateTime<Utc>,
    pub workload: WorkloadRef,
    /// Offending instance identifiers, ordered, possibly empty
    pub instances: Vec<String>,
    pub parameters: HashMap<String, ParamValue>,
}

impl Incident {
    /// Look up a numeric parameter by key
    pub fn number_param(&self, key: &str) -> Option<f64> {
        self.parameters.get(key).and_then(ParamValue::as_f64)
    }
}

/// Kind of corrective action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    PatchResourceSpec,
    TerminateInstance,
    ScaleReplicas,
    NoOp,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionKind::PatchResourceSpec => write!(f, "PatchResourceSpec"),
            ActionKind::TerminateInstance => write!(f, "TerminateInstance"),
            ActionKind::ScaleReplicas => write!(f, "ScaleReplicas"),
            ActionKind::NoOp => write!(f, "NoOp"),
        }
    }
}

/// A computed, bounded corrective action
///
/// Values are computed by the policy engine, never taken verbatim from
/// caller input, so the patch target cannot be injected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationAction {
    pub kind: ActionKind,
    pub workload: WorkloadRef,
    /// Dot-separated field path, set for spec-mutating actions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_value: Option<ParamValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_value: Option<ParamValue>,
    /// Instance identifiers, set for instance-scoped actions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instances: Vec<String>,
    pub reason: String,
}

impl RemediationAction {
    pub fn noop(workload: WorkloadRef, reason: impl Into<String>) -> Self {
        Self {
            kind: ActionKind::NoOp,
            workload,
            field_path: None,
            old_value: None,
            new_value: None,
            instances: Vec::new(),
            reason: reason.into(),
        }
    }

    pub fn patch(
        workload: WorkloadRef,
        field_path: impl Into<String>,
        old_value: f64,
        new_value: f64,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            kind: ActionKind::PatchResourceSpec,
            workload,
            field_path: Some(field_path.into()),
            old_value: Some(ParamValue::Number(old_value)),
            new_value: Some(ParamValue::Number(new_value)),
            instances: Vec::new(),
            reason: reason.into(),
        }
    }

    pub fn terminate(
        workload: WorkloadRef,
        instances: Vec<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            kind: ActionKind::TerminateInstance,
            workload,
            field_path: None,
            old_value: None,
            new_value: None,
            instances,
            reason: reason.into(),
        }
    }

    /// Whether this action would touch cluster state at all
    pub fn is_mutating(&self) -> bool {
        self.kind != ActionKind::NoOp
    }
}

/// Terminal outcome of processing one incident
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Applied,
    Rejected,
    Failed,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Applied => write!(f, "applied"),
            Outcome::Rejected => write!(f, "rejected"),
            Outcome::Failed => write!(f, "failed"),
        }
    }
}

/// Append-only audit record, one per processed incident
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub incident_id: String,
    pub workload: WorkloadRef,
    pub incident_type: IncidentType,
    pub action_kind: ActionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_value: Option<ParamValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_value: Option<ParamValue>,
    pub applied_at: DateTime<Utc>,
    pub outcome: Outcome,
    pub reason_code: String,
}

impl HistoryRecord {
    /// True for records that actually mutated cluster state
    ///
    /// NoOp records are audit entries and never count toward cooldown or
    /// rate-limit windows.
    pub fn is_mutating_applied(&self) -> bool {
        self.outcome == Outcome::Applied && self.action_kind != ActionKind::NoOp
    }
}

/// Result returned to the submitter of an incident
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub incident_id: String,
    pub outcome: Outcome,
    pub action_kind: ActionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_value: Option<ParamValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_value: Option<ParamValue>,
    pub reason_code: String,
}

impl ActionResult {
    pub fn from_record(record: &HistoryRecord) -> Self {
        Self {
            incident_id: record.incident_id.clone(),
            outcome: record.outcome,
            action_kind: record.action_kind,
            old_value: record.old_value.clone(),
            new_value: record.new_value.clone(),
            reason_code: record.reason_code.clone(),
        }
    }
}

/// Machine-readable reason codes for terminal outcomes
pub mod reason {
    pub const APPLIED: &str = "applied";
    pub const AT_CEILING: &str = "at-ceiling";
    pub const NO_POLICY: &str = "no-policy";
    pub const UNCLASSIFIED: &str = "unclassified";
    pub const COOLDOWN_ACTIVE: &str = "cooldown-active";
    pub const RATE_LIMITED: &str = "rate-limited";
    pub const OSCILLATION_DETECTED: &str = "oscillation-detected";
    pub const CONFLICT_EXHAUSTED: &str = "conflict-exhausted";
    pub const WORKLOAD_GONE: &str = "workload-gone";
    pub const TERMINATE_FAILED: &str = "terminate-failed";
    pub const INVALID_ACTION: &str = "invalid-action";
    pub const MALFORMED_INCIDENT: &str = "malformed-incident";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workload_key() {
        let workload = WorkloadRef::new("Deployment", "default", "api");
        assert_eq!(workload.key(), "Deployment/default/api");
        assert_eq!(workload.to_string(), "Deployment/default/api");
    }

    #[test]
    fn test_parse_hint_variants() {
        assert_eq!(IncidentType::parse_hint("OOMKilled"), IncidentType::OomKilled);
        assert_eq!(IncidentType::parse_hint("oom_killed"), IncidentType::OomKilled);
        assert_eq!(
            IncidentType::parse_hint("CPUThrottled"),
            IncidentType::CpuThrottled
        );
        assert_eq!(
            IncidentType::parse_hint("crash-loop-backoff"),
            IncidentType::CrashLoop
        );
        assert_eq!(IncidentType::parse_hint("DiskFull"), IncidentType::Unknown);
    }

    #[test]
    fn test_param_value_untagged_serde() {
        let number: ParamValue = serde_json::from_str("96").unwrap();
        assert_eq!(number.as_f64(), Some(96.0));

        let text: ParamValue = serde_json::from_str("\"100m\"").unwrap();
        assert_eq!(text, ParamValue::Text("100m".to_string()));
    }

    #[test]
    fn test_param_value_numeric_text() {
        let text = ParamValue::Text("240".to_string());
        assert_eq!(text.as_f64(), Some(240.0));

        let junk = ParamValue::Text("not-a-number".to_string());
        assert_eq!(junk.as_f64(), None);
    }

    #[test]
    fn test_mutating_applied_excludes_noop() {
        let workload = WorkloadRef::new("Deployment", "default", "api");
        let record = HistoryRecord {
            incident_id: "i-1".to_string(),
            workload: workload.clone(),
            incident_type: IncidentType::OomKilled,
            action_kind: ActionKind::NoOp,
            field_path: None,
            old_value: None,
            new_value: None,
            applied_at: chrono::Utc::now(),
            outcome: Outcome::Applied,
            reason_code: reason::NO_POLICY.to_string(),
        };
        assert!(!record.is_mutating_applied());

        let patch = HistoryRecord {
            action_kind: ActionKind::PatchResourceSpec,
            reason_code: reason::APPLIED.to_string(),
            ..record
        };
        assert!(patch.is_mutating_applied());
    }
}
