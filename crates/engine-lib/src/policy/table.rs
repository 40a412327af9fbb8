//! Policy table loading and validation

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::models::{ActionKind, IncidentType};

/// A declarative remediation rule for one incident type
///
/// `increment` selects additive computation; otherwise `multiplier`
/// applies. `max_value` caps every computed value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub action: ActionKind,
    /// Dot-separated field path mutated by patch policies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiplier: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub increment: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
    pub cooldown_secs: u64,
    pub max_actions_per_window: u32,
    pub window_secs: u64,
}

impl Policy {
    /// Minimum time between successive applied actions
    pub fn cooldown(&self) -> Duration {
        Duration::seconds(self.cooldown_secs as i64)
    }

    /// Rolling window for the rate limit
    pub fn window(&self) -> Duration {
        Duration::seconds(self.window_secs as i64)
    }

    fn is_patching(&self) -> bool {
        matches!(
            self.action,
            ActionKind::PatchResourceSpec | ActionKind::ScaleReplicas
        )
    }
}

/// Lookup table from incident type to policy
///
/// Loaded once per process lifetime; never mutated by the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicySet {
    policies: HashMap<IncidentType, Policy>,
}

impl PolicySet {
    /// Built-in defaults for the standard incident types
    pub fn defaults() -> Self {
        let mut policies = HashMap::new();

        policies.insert(
            IncidentType::OomKilled,
            Policy {
                action: ActionKind::PatchResourceSpec,
                field_path: Some("spec.resources.limits.memoryMi".to_string()),
                multiplier: Some(2.5),
                increment: None,
                max_value: Some(1024.0),
                cooldown_secs: 300,
                max_actions_per_window: 3,
                window_secs: 3600,
            },
        );

        policies.insert(
            IncidentType::CpuThrottled,
            Policy {
                action: ActionKind::PatchResourceSpec,
                field_path: Some("spec.resources.limits.cpuMilli".to_string()),
                multiplier: None,
                increment: Some(200.0),
                max_value: Some(2000.0),
                cooldown_secs: 300,
                max_actions_per_window: 3,
                window_secs: 3600,
            },
        );

        policies.insert(
            IncidentType::CrashLoop,
            Policy {
                action: ActionKind::TerminateInstance,
                field_path: None,
                multiplier: None,
                increment: None,
                max_value: None,
                cooldown_secs: 600,
                max_actions_per_window: 2,
                window_secs: 3600,
            },
        );

        Self { policies }
    }

    /// Load a policy table from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read policy file {:?}", path))?;

        let set: PolicySet = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse policy file {:?}", path))?;

        set.validate()?;
        Ok(set)
    }

    /// Check structural consistency of every policy
    pub fn validate(&self) -> Result<()> {
        for (incident_type, policy) in &self.policies {
            if policy.is_patching() {
                if policy.field_path.is_none() {
                    anyhow::bail!("policy for {} lacks a field_path", incident_type);
                }
                if policy.multiplier.is_none() && policy.increment.is_none() {
                    anyhow::bail!(
                        "policy for {} needs a multiplier or an increment",
                        incident_type
                    );
                }
                if policy.max_value.is_none() {
                    anyhow::bail!("policy for {} lacks a max_value", incident_type);
                }
            }
        }
        Ok(())
    }

    pub fn lookup(&self, incident_type: IncidentType) -> Option<&Policy> {
        self.policies.get(&incident_type)
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&IncidentType, &Policy)> {
        self.policies.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_standard_types() {
        let set = PolicySet::defaults();

        let oom = set.lookup(IncidentType::OomKilled).unwrap();
        assert_eq!(oom.multiplier, Some(2.5));
        assert_eq!(oom.max_value, Some(1024.0));
        assert_eq!(oom.cooldown_secs, 300);

        let cpu = set.lookup(IncidentType::CpuThrottled).unwrap();
        assert_eq!(cpu.increment, Some(200.0));
        assert_eq!(cpu.max_value, Some(2000.0));

        let crash = set.lookup(IncidentType::CrashLoop).unwrap();
        assert_eq!(crash.action, ActionKind::TerminateInstance);

        assert!(set.lookup(IncidentType::Unknown).is_none());
        assert!(set.validate().is_ok());
    }

    #[test]
    fn test_policy_roundtrip_through_json() {
        let set = PolicySet::defaults();
        let json = serde_json::to_string(&set).unwrap();
        let parsed: PolicySet = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.len(), set.len());
        assert_eq!(
            parsed.lookup(IncidentType::OomKilled).unwrap().multiplier,
            Some(2.5)
        );
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policies.json");

        let json = r#"{
            "oom_killed": {
                "action": "patch_resource_spec",
                "field_path": "spec.resources.limits.memoryMi",
                "multiplier": 2.0,
                "max_value": 512,
                "cooldown_secs": 120,
                "max_actions_per_window": 2,
                "window_secs": 1800
            }
        }"#;
        std::fs::write(&path, json).unwrap();

        let set = PolicySet::from_file(&path).unwrap();
        let oom = set.lookup(IncidentType::OomKilled).unwrap();
        assert_eq!(oom.multiplier, Some(2.0));
        assert_eq!(oom.max_value, Some(512.0));
    }

    #[test]
    fn test_patch_policy_without_field_path_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policies.json");

        let json = r#"{
            "oom_killed": {
                "action": "patch_resource_spec",
                "multiplier": 2.0,
                "max_value": 512,
                "cooldown_secs": 120,
                "max_actions_per_window": 2,
                "window_secs": 1800
            }
        }"#;
        std::fs::write(&path, json).unwrap();

        assert!(PolicySet::from_file(&path).is_err());
    }

    #[test]
    fn test_patch_policy_without_rule_rejected() {
        let mut set = PolicySet::defaults();
        let oom = set.policies.get_mut(&IncidentType::OomKilled).unwrap();
        oom.multiplier = None;
        oom.increment = None;

        assert!(set.validate().is_err());
    }
}
