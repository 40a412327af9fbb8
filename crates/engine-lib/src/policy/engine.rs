//! Candidate action computation

use std::sync::Arc;

use tracing::debug;

use super::table::PolicySet;
use crate::classify::Classified;
use crate::models::{reason, ActionKind, RemediationAction, WorkloadRef};

/// Computes a single candidate action from a classification
///
/// The engine only computes; it never applies. The safety guard and the
/// executor decide what actually happens.
pub struct PolicyEngine {
    policies: Arc<PolicySet>,
}

impl PolicyEngine {
    pub fn new(policies: Arc<PolicySet>) -> Self {
        Self { policies }
    }

    pub fn policies(&self) -> &PolicySet {
        &self.policies
    }

    /// Compute the candidate remediation for a classified incident
    pub fn evaluate(&self, workload: &WorkloadRef, classified: &Classified) -> RemediationAction {
        let Some(policy) = self.policies.lookup(classified.incident_type) else {
            debug!(
                workload = %workload,
                incident_type = %classified.incident_type,
                "No policy registered"
            );
            return RemediationAction::noop(workload.clone(), reason::NO_POLICY);
        };

        match policy.action {
            ActionKind::TerminateInstance => RemediationAction::terminate(
                workload.clone(),
                classified.instances.clone(),
                format!(
                    "terminate {} instance(s) after {}",
                    classified.instances.len(),
                    classified.incident_type
                ),
            ),
            ActionKind::PatchResourceSpec | ActionKind::ScaleReplicas => {
                let Some(current) = classified.current_value else {
                    return RemediationAction::noop(workload.clone(), reason::UNCLASSIFIED);
                };
                let Some(field_path) = policy.field_path.as_deref() else {
                    // Rejected by PolicySet::validate; unreachable with a loaded table
                    return RemediationAction::noop(workload.clone(), reason::NO_POLICY);
                };

                let mut new_value = match policy.increment {
                    Some(increment) => current + increment,
                    None => current * policy.multiplier.unwrap_or(1.0),
                };
                if let Some(max) = policy.max_value {
                    new_value = new_value.min(max);
                }

                if (new_value - current).abs() < f64::EPSILON {
                    return RemediationAction::noop(workload.clone(), reason::AT_CEILING);
                }

                let mut action = RemediationAction::patch(
                    workload.clone(),
                    field_path,
                    current,
                    new_value,
                    format!(
                        "{}: {} {} -> {}",
                        classified.incident_type, field_path, current, new_value
                    ),
                );
                action.kind = policy.action;
                action
            }
            ActionKind::NoOp => RemediationAction::noop(workload.clone(), reason::NO_POLICY),
        }
    }
}
