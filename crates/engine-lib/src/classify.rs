//! Incident classification
//!
//! Maps a normalized Incident to its type-specific parameters: the
//! current resource limit for spec-mutating types, the offending
//! instances for instance-scoped types. Extraction never guesses; a
//! missing or unusable parameter yields `Unclassified`, which resolves
//! downstream to a recorded NoOp.

use crate::models::{Incident, IncidentType};

/// Parameter key carrying the current memory limit in Mi
pub const PARAM_MEMORY_LIMIT_MI: &str = "currentMemoryLimitMi";

/// Parameter key carrying the current CPU limit in millicores
pub const PARAM_CPU_LIMIT_MILLI: &str = "currentCpuLimitMilli";

/// Result of classifying an incident
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Classified(Classified),
    /// No extraction rule matched; carries a human-readable reason
    Unclassified { reason: String },
}

/// A classified incident with its extracted parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Classified {
    pub incident_type: IncidentType,
    /// Current value of the field a patch policy would mutate
    pub current_value: Option<f64>,
    /// Offending instances for instance-scoped remediation
    pub instances: Vec<String>,
}

/// Classify an incident (pure function)
pub fn classify(incident: &Incident) -> Classification {
    match incident.incident_type {
        IncidentType::OomKilled => classify_limit(incident, PARAM_MEMORY_LIMIT_MI),
        IncidentType::CpuThrottled => classify_limit(incident, PARAM_CPU_LIMIT_MILLI),
        IncidentType::CrashLoop => {
            if incident.instances.is_empty() {
                Classification::Unclassified {
                    reason: "crash loop incident carries no instance references".to_string(),
                }
            } else {
                Classification::Classified(Classified {
                    incident_type: IncidentType::CrashLoop,
                    current_value: None,
                    instances: incident.instances.clone(),
                })
            }
        }
        IncidentType::Unknown => Classification::Unclassified {
            reason: "no classification rule for incident type".to_string(),
        },
    }
}

/// Extract the current limit parameter for a spec-mutating type
fn classify_limit(incident: &Incident, param: &str) -> Classification {
    match incident.number_param(param) {
        Some(value) if value > 0.0 => Classification::Classified(Classified {
            incident_type: incident.incident_type,
            current_value: Some(value),
            instances: incident.instances.clone(),
        }),
        Some(_) => Classification::Unclassified {
            reason: format!("parameter {} is not a positive value", param),
        },
        None => Classification::Unclassified {
            reason: format!("required parameter {} is missing", param),
        },
    }
}
