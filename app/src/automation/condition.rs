//! Condition evaluation against ambient state (not the stimulus).
//! Malformed conditions are skipped with a log and do not block the rest.

use api::automation::{AutomationCondition, AutomationRule, ConditionMode, ConditionType};
use chrono::{DateTime, Datelike as _, Local};

use super::engine::EngineCaches;

/// Combine the rule's conditions: `All` ⇒ AND, `Any` ⇒ OR, zero ⇒ true.
pub fn conditions_pass(rule: &AutomationRule, caches: &EngineCaches, now: DateTime<Local>) -> bool {
    combine(&rule.conditions, rule.condition_mode, caches, now)
}

fn combine(conditions: &[AutomationCondition], mode: ConditionMode, caches: &EngineCaches, now: DateTime<Local>) -> bool {
    let outcomes: Vec<bool> = conditions
        .iter()
        .filter_map(|condition| evaluate(condition, caches, now))
        .collect();

    if outcomes.is_empty() {
        return true;
    }

    match mode {
        ConditionMode::All => outcomes.iter().all(|v| *v),
        ConditionMode::Any => outcomes.iter().any(|v| *v),
    }
}

/// `None` means the condition is malformed or unsupported and is skipped.
fn evaluate(condition: &AutomationCondition, caches: &EngineCaches, now: DateTime<Local>) -> Option<bool> {
    match condition.condition_type {
        ConditionType::DeviceState => {
            let (device_id, property, operator) = match (&condition.device_id, &condition.property, condition.operator) {
                (Some(d), Some(p), Some(op)) => (d, p, op),
                _ => {
                    tracing::warn!(condition_id = %condition.id, "Skipping underspecified device-state condition");
                    return None;
                }
            };

            // A device or property we have never seen evaluates false.
            let Some(current) = caches.device_value(device_id, property) else {
                return Some(false);
            };

            Some(operator.holds_for_current(current, condition.value.as_ref(), condition.value2.as_ref()))
        }

        ConditionType::TimeRange => {
            let (start, end) = match (&condition.time_start, &condition.time_end) {
                (Some(s), Some(e)) => (s, e),
                _ => {
                    tracing::warn!(condition_id = %condition.id, "Skipping time-range condition without bounds");
                    return None;
                }
            };

            match (support::time::parse_hhmm(start), support::time::parse_hhmm(end)) {
                (Ok(from), Ok(to)) => Some(support::time::in_time_range(now.time(), from, to)),
                _ => {
                    tracing::warn!(condition_id = %condition.id, "Skipping time-range condition with invalid bounds");
                    None
                }
            }
        }

        ConditionType::DayOfWeek => {
            if condition.days_of_week.is_empty() {
                return Some(true);
            }
            let today = now.weekday().number_from_monday() as u8;
            Some(condition.days_of_week.contains(&today))
        }

        ConditionType::And => Some(combine(&condition.children, ConditionMode::All, caches, now)),
        ConditionType::Or => Some(combine(&condition.children, ConditionMode::Any, caches, now)),

        ConditionType::SunPosition => {
            tracing::warn!(
                condition_id = %condition.id,
                "Sun-position conditions require an astronomy provider and are skipped"
            );
            None
        }
    }
}
