//! Incident ingestion and normalization
//!
//! Accepts raw events from alert webhooks, structured detectors, or
//! operator-triggered requests and normalizes them into canonical
//! Incident records. This stage is side-effect-free so duplicate
//! deliveries (e.g. a webhook retry) are always safe to renormalize.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::models::{Incident, IncidentType, ParamValue, WorkloadRef};

/// A raw event as delivered by an upstream source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    /// Source tag, e.g. "alertmanager" or "operator"
    pub source: String,
    #[serde(default)]
    pub workload_ref: Option<WorkloadRef>,
    #[serde(default)]
    pub type_hint: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub instance_refs: Vec<String>,
    #[serde(default)]
    pub raw_parameters: HashMap<String, ParamValue>,
}

/// Normalize a raw event into an Incident
///
/// Fails with `MalformedIncident` when the workload reference or the
/// detection timestamp is absent; everything else is carried through
/// for the classifier to interpret.
pub fn normalize(event: RawEvent) -> Result<Incident, EngineError> {
    let workload = event
        .workload_ref
        .ok_or_else(|| EngineError::MalformedIncident("missing workloadRef".to_string()))?;

    if workload.kind.is_empty() || workload.namespace.is_empty() || workload.name.is_empty() {
        return Err(EngineError::MalformedIncident(
            "workloadRef requires kind, namespace and name".to_string(),
        ));
    }

    let detected_at = event
        .timestamp
        .ok_or_else(|| EngineError::MalformedIncident("missing timestamp".to_string()))?;

    let incident_type = event
        .type_hint
        .as_deref()
        .map(IncidentType::parse_hint)
        .unwrap_or(IncidentType::Unknown);

    Ok(Incident {
        id: uuid::Uuid::new_v4().to_string(),
        incident_type,
        detected_at,
        workload,
        instances: event.instance_refs,
        parameters: event.raw_parameters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_event() -> RawEvent {
        let mut parameters = HashMap::new();
        parameters.insert(
            "currentMemoryLimitMi".to_string(),
            ParamValue::Number(96.0),
        );

        RawEvent {
            source: "alertmanager".to_string(),
            workload_ref: Some(WorkloadRef::new("Deployment", "default", "api")),
            type_hint: Some("OOMKilled".to_string()),
            timestamp: Some(Utc::now()),
            instance_refs: vec!["api-7d4b9-xk2p1".to_string()],
            raw_parameters: parameters,
        }
    }

    #[test]
    fn test_normalize_produces_incident() {
        let incident = normalize(test_event()).unwrap();

        assert_eq!(incident.incident_type, IncidentType::OomKilled);
        assert_eq!(incident.workload.name, "api");
        assert_eq!(incident.instances.len(), 1);
        assert_eq!(incident.number_param("currentMemoryLimitMi"), Some(96.0));
        assert!(!incident.id.is_empty());
    }

    #[test]
    fn test_missing_workload_is_malformed() {
        let event = RawEvent {
            workload_ref: None,
            ..test_event()
        };

        let err = normalize(event).unwrap_err();
        assert!(matches!(err, EngineError::MalformedIncident(_)));
        assert!(err.to_string().contains("workloadRef"));
    }

    #[test]
    fn test_missing_timestamp_is_malformed() {
        let event = RawEvent {
            timestamp: None,
            ..test_event()
        };

        let err = normalize(event).unwrap_err();
        assert!(err.to_string().contains("timestamp"));
    }

    #[test]
    fn test_empty_workload_fields_are_malformed() {
        let event = RawEvent {
            workload_ref: Some(WorkloadRef::new("", "default", "api")),
            ..test_event()
        };

        assert!(normalize(event).is_err());
    }

    #[test]
    fn test_absent_hint_maps_to_unknown() {
        let event = RawEvent {
            type_hint: None,
            ..test_event()
        };

        let incident = normalize(event).unwrap();
        assert_eq!(incident.incident_type, IncidentType::Unknown);
    }

    #[test]
    fn test_duplicate_delivery_renormalizes_cleanly() {
        let event = test_event();
        let first = normalize(event.clone()).unwrap();
        let second = normalize(event).unwrap();

        // Same content, distinct ids; no shared state between deliveries
        assert_ne!(first.id, second.id);
        assert_eq!(first.workload, second.workload);
        assert_eq!(first.incident_type, second.incident_type);
    }
}
