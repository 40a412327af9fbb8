//! Safety guard for candidate actions
//!
//! Validates a candidate against the workload's action history before it
//! reaches the executor:
//! - Cooldown: minimum spacing between applied actions of the same type
//! - Rate limit: maximum applied actions within a rolling window
//! - Oscillation: a value increase right after a decrease on the same
//!   field requires manual intervention instead
//!
//! All checks are pure functions over the queried history slice; the
//! guard keeps no state of its own.

use chrono::{DateTime, Utc};

use crate::models::{reason, HistoryRecord, IncidentType, ParamValue, RemediationAction};
use crate::policy::Policy;

/// Guard decision for a candidate action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Approved,
    Rejected { reason_code: &'static str },
}

impl Verdict {
    pub fn is_approved(&self) -> bool {
        matches!(self, Verdict::Approved)
    }
}

/// Validate a candidate action against the workload's history
///
/// `history` is the record slice for the candidate's workload, ordered
/// by `applied_at`. NoOp candidates bypass every check.
pub fn check(
    incident_type: IncidentType,
    action: &RemediationAction,
    policy: &Policy,
    history: &[HistoryRecord],
    now: DateTime<Utc>,
) -> Verdict {
    if !action.is_mutating() {
        return Verdict::Approved;
    }

    if in_cooldown(incident_type, policy, history, now) {
        return Verdict::Rejected {
            reason_code: reason::COOLDOWN_ACTIVE,
        };
    }

    if rate_limited(policy, history, now) {
        return Verdict::Rejected {
            reason_code: reason::RATE_LIMITED,
        };
    }

    if oscillates(action, history) {
        return Verdict::Rejected {
            reason_code: reason::OSCILLATION_DETECTED,
        };
    }

    Verdict::Approved
}

/// Most recent applied action of the same type younger than the cooldown
fn in_cooldown(
    incident_type: IncidentType,
    policy: &Policy,
    history: &[HistoryRecord],
    now: DateTime<Utc>,
) -> bool {
    let last_applied = history
        .iter()
        .filter(|r| r.incident_type == incident_type && r.is_mutating_applied())
        .map(|r| r.applied_at)
        .max();

    match last_applied {
        Some(at) => now - at < policy.cooldown(),
        None => false,
    }
}

/// Applied action count inside the rolling window reached the limit
fn rate_limited(policy: &Policy, history: &[HistoryRecord], now: DateTime<Utc>) -> bool {
    let window_start = now - policy.window();
    let applied_in_window = history
        .iter()
        .filter(|r| r.is_mutating_applied() && r.applied_at >= window_start)
        .count();

    applied_in_window >= policy.max_actions_per_window as usize
}

/// The candidate would increase a value the previous applied change on
/// the same field decreased (ping-pong pattern)
fn oscillates(action: &RemediationAction, history: &[HistoryRecord]) -> bool {
    let (Some(field_path), Some(old), Some(new)) =
        (&action.field_path, &action.old_value, &action.new_value)
    else {
        return false;
    };
    let (Some(old), Some(new)) = (old.as_f64(), new.as_f64()) else {
        return false;
    };

    if new <= old {
        return false;
    }

    let previous = history
        .iter()
        .filter(|r| r.is_mutating_applied() && r.field_path.as_deref() == Some(field_path.as_str()))
        .max_by_key(|r| r.applied_at);

    match previous {
        Some(record) => {
            let decreased = matches!(
                (
                    record.old_value.as_ref().and_then(ParamValue::as_f64),
                    record.new_value.as_ref().and_then(ParamValue::as_f64),
                ),
                (Some(prev_old), Some(prev_new)) if prev_new < prev_old
            );
            decreased
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActionKind, Outcome, WorkloadRef};
    use crate::policy::PolicySet;
    use chrono::Duration;

    fn workload() -> WorkloadRef {
        WorkloadRef::new("Deployment", "default", "api")
    }

    fn oom_policy() -> Policy {
        PolicySet::defaults()
            .lookup(IncidentType::OomKilled)
            .unwrap()
            .clone()
    }

    fn patch_action(old: f64, new: f64) -> RemediationAction {
        RemediationAction::patch(
            workload(),
            "spec.resources.limits.memoryMi",
            old,
            new,
            "test",
        )
    }

    fn applied_record(
        incident_type: IncidentType,
        old: f64,
        new: f64,
        applied_at: DateTime<Utc>,
    ) -> HistoryRecord {
        HistoryRecord {
            incident_id: "i-1".to_string(),
            workload: workload(),
            incident_type,
            action_kind: ActionKind::PatchResourceSpec,
            field_path: Some("spec.resources.limits.memoryMi".to_string()),
            old_value: Some(ParamValue::Number(old)),
            new_value: Some(ParamValue::Number(new)),
            applied_at,
            outcome: Outcome::Applied,
            reason_code: reason::APPLIED.to_string(),
        }
    }

    #[test]
    fn test_empty_history_approves() {
        let verdict = check(
            IncidentType::OomKilled,
            &patch_action(96.0, 240.0),
            &oom_policy(),
            &[],
            Utc::now(),
        );
        assert!(verdict.is_approved());
    }

    #[test]
    fn test_cooldown_rejects_recent_repeat() {
        // Applied one minute ago, cooldown is five minutes
        let now = Utc::now();
        let history = vec![applied_record(
            IncidentType::OomKilled,
            96.0,
            240.0,
            now - Duration::minutes(1),
        )];

        let verdict = check(
            IncidentType::OomKilled,
            &patch_action(240.0, 600.0),
            &oom_policy(),
            &history,
            now,
        );

        assert_eq!(
            verdict,
            Verdict::Rejected {
                reason_code: reason::COOLDOWN_ACTIVE
            }
        );
    }

    #[test]
    fn test_cooldown_expires() {
        let now = Utc::now();
        let history = vec![applied_record(
            IncidentType::OomKilled,
            96.0,
            240.0,
            now - Duration::minutes(10),
        )];

        let verdict = check(
            IncidentType::OomKilled,
            &patch_action(240.0, 600.0),
            &oom_policy(),
            &history,
            now,
        );

        assert!(verdict.is_approved());
    }

    #[test]
    fn test_cooldown_scoped_to_incident_type() {
        let now = Utc::now();
        let mut record = applied_record(
            IncidentType::CpuThrottled,
            100.0,
            300.0,
            now - Duration::minutes(1),
        );
        record.field_path = Some("spec.resources.limits.cpuMilli".to_string());
        let history = vec![record];

        // A CPU action a minute ago does not hold back a memory action
        let verdict = check(
            IncidentType::OomKilled,
            &patch_action(96.0, 240.0),
            &oom_policy(),
            &history,
            now,
        );

        assert!(verdict.is_approved());
    }

    #[test]
    fn test_noop_records_do_not_trigger_cooldown() {
        let now = Utc::now();
        let mut record =
            applied_record(IncidentType::OomKilled, 0.0, 0.0, now - Duration::minutes(1));
        record.action_kind = ActionKind::NoOp;
        record.field_path = None;
        record.old_value = None;
        record.new_value = None;
        record.reason_code = reason::NO_POLICY.to_string();
        let history = vec![record];

        let verdict = check(
            IncidentType::OomKilled,
            &patch_action(96.0, 240.0),
            &oom_policy(),
            &history,
            now,
        );

        assert!(verdict.is_approved());
    }

    #[test]
    fn test_rate_limit_rejects_at_max() {
        let now = Utc::now();
        // Three applied actions inside the hour window, limit is three;
        // spaced beyond the cooldown so only the rate limit can reject
        let history: Vec<_> = (0..3)
            .map(|i| {
                applied_record(
                    IncidentType::OomKilled,
                    96.0,
                    240.0,
                    now - Duration::minutes(10 + i * 15),
                )
            })
            .collect();

        let verdict = check(
            IncidentType::OomKilled,
            &patch_action(240.0, 600.0),
            &oom_policy(),
            &history,
            now,
        );

        assert_eq!(
            verdict,
            Verdict::Rejected {
                reason_code: reason::RATE_LIMITED
            }
        );
    }

    #[test]
    fn test_rate_limit_window_expires() {
        let now = Utc::now();
        let history: Vec<_> = (0..3)
            .map(|i| {
                applied_record(
                    IncidentType::OomKilled,
                    96.0,
                    240.0,
                    now - Duration::hours(2) - Duration::minutes(i * 15),
                )
            })
            .collect();

        let verdict = check(
            IncidentType::OomKilled,
            &patch_action(240.0, 600.0),
            &oom_policy(),
            &history,
            now,
        );

        assert!(verdict.is_approved());
    }

    #[test]
    fn test_oscillation_rejected() {
        let now = Utc::now();
        // Previous applied change decreased the field; increasing it now
        // is the ping-pong pattern
        let history = vec![applied_record(
            IncidentType::OomKilled,
            512.0,
            256.0,
            now - Duration::minutes(20),
        )];

        let verdict = check(
            IncidentType::OomKilled,
            &patch_action(256.0, 640.0),
            &oom_policy(),
            &history,
            now,
        );

        assert_eq!(
            verdict,
            Verdict::Rejected {
                reason_code: reason::OSCILLATION_DETECTED
            }
        );
    }

    #[test]
    fn test_increase_after_increase_is_not_oscillation() {
        let now = Utc::now();
        let history = vec![applied_record(
            IncidentType::OomKilled,
            96.0,
            240.0,
            now - Duration::minutes(20),
        )];

        let verdict = check(
            IncidentType::OomKilled,
            &patch_action(240.0, 600.0),
            &oom_policy(),
            &history,
            now,
        );

        assert!(verdict.is_approved());
    }

    #[test]
    fn test_noop_bypasses_all_checks() {
        let now = Utc::now();
        let history = vec![applied_record(
            IncidentType::OomKilled,
            96.0,
            240.0,
            now - Duration::minutes(1),
        )];

        let verdict = check(
            IncidentType::OomKilled,
            &RemediationAction::noop(workload(), reason::AT_CEILING),
            &oom_policy(),
            &history,
            now,
        );

        assert!(verdict.is_approved());
    }
}
