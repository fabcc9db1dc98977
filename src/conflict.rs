//! Cross-rule conflicts and single-rule impossible conditions.
//!
//! Both checks are conservative approximations. Two triggers are assumed to
//! be able to fire together unless their literal values prove otherwise, and
//! two guard lists are assumed compatible unless they pin one target to
//! disjoint state sets.

use std::collections::{BTreeMap, BTreeSet};

use crate::enums::*;
use crate::extract::Extraction;
use crate::types::*;

/// True unless the two triggers provably cannot fire at the same moment.
pub fn triggers_overlap(a: &TriggerInfo, b: &TriggerInfo) -> bool {
    match (a.kind, b.kind) {
        (TriggerKind::State, TriggerKind::State) => {
            !(a.target.is_some()
                && a.target == b.target
                && !a.fires_on.is_empty()
                && !b.fires_on.is_empty()
                && a.fires_on.is_disjoint(&b.fires_on))
        }
        (TriggerKind::TimeOfDay, TriggerKind::TimeOfDay) => {
            // `at` is empty unless every value was a clock literal.
            a.at.is_empty() || b.at.is_empty() || !a.at.is_disjoint(&b.at)
        }
        (TriggerKind::Sun, TriggerKind::Sun) => match (&a.event, &b.event) {
            (Some(x), Some(y)) => x == y,
            _ => true,
        },
        _ => true,
    }
}

/// Whether two rules can be triggered together. A rule without triggers
/// (e.g. one only run manually) overlaps with everything.
pub fn rules_overlap(a: &[TriggerInfo], b: &[TriggerInfo]) -> bool {
    if a.is_empty() || b.is_empty() {
        return true;
    }
    a.iter().any(|ta| b.iter().any(|tb| triggers_overlap(ta, tb)))
}

/// True when some target is required to be in disjoint state sets by the two
/// guard lists, so they can never hold at once.
pub fn mutually_exclusive(a: &[ConditionInfo], b: &[ConditionInfo]) -> bool {
    a.iter().any(|ca| {
        b.iter().any(|cb| {
            ca.target == cb.target
                && !ca.required.is_empty()
                && !cb.required.is_empty()
                && ca.required.is_disjoint(&cb.required)
        })
    })
}

/// Find pairs of rules that apply opposite effects to the same target under
/// overlapping triggers and compatible guards.
///
/// One [`Conflict`] per (target, rule pair). The result does not depend on the
/// order of `extractions`.
pub fn detect_conflicts(extractions: &[Extraction]) -> Vec<Conflict> {
    let mut by_target: BTreeMap<&str, Vec<(&Extraction, &TargetAction)>> = BTreeMap::new();
    for extraction in extractions {
        for action in &extraction.actions {
            by_target
                .entry(action.target.as_str())
                .or_default()
                .push((extraction, action));
        }
    }

    let mut found: BTreeMap<(String, String, String), Conflict> = BTreeMap::new();
    for (target, actions) in &mut by_target {
        // Sorted so the pair reported for each rule pair does not depend on input order.
        actions.sort_by(|(rx, ax), (ry, ay)| {
            (&rx.rule_id, &ax.location, ax.effect).cmp(&(&ry.rule_id, &ay.location, ay.effect))
        });
        for (i, (rule_x, action_x)) in actions.iter().enumerate() {
            for (rule_y, action_y) in &actions[i + 1..] {
                if rule_x.rule_id == rule_y.rule_id || !action_x.effect.opposes(action_y.effect) {
                    continue;
                }
                let ((rule_a, action_a), (rule_b, action_b)) = if rule_x.rule_id < rule_y.rule_id {
                    ((rule_x, action_x), (rule_y, action_y))
                } else {
                    ((rule_y, action_y), (rule_x, action_x))
                };
                let key = (
                    target.to_string(),
                    rule_a.rule_id.clone(),
                    rule_b.rule_id.clone(),
                );
                if found.contains_key(&key) {
                    continue;
                }
                if !rules_overlap(&rule_a.triggers, &rule_b.triggers) {
                    continue;
                }
                if mutually_exclusive(&action_a.guards, &action_b.guards) {
                    continue;
                }
                tracing::debug!(
                    resource = %target,
                    rule_a = %rule_a.rule_id,
                    rule_b = %rule_b.rule_id,
                    "conflicting actions"
                );
                found.insert(
                    key,
                    Conflict {
                        target: target.to_string(),
                        rule_a_id: rule_a.rule_id.clone(),
                        rule_a_name: rule_a.rule_name.clone(),
                        rule_b_id: rule_b.rule_id.clone(),
                        rule_b_name: rule_b.rule_name.clone(),
                        effect_a: action_a.effect,
                        effect_b: action_b.effect,
                        severity: Severity::Error,
                        explanation: format!(
                            "'{}' {} '{}' while '{}' {} it, and both can run at the same time",
                            rule_a.rule_name,
                            action_a.effect,
                            target,
                            rule_b.rule_name,
                            action_b.effect
                        ),
                    },
                );
            }
        }
    }
    found.into_values().collect()
}

/// Rule-level conditions that can never hold when a state trigger fires.
///
/// At most one issue per condition. When the rule has other triggers that do
/// not watch the same target, the condition can still pass through them, so
/// the issue is reported at medium confidence.
pub fn check_impossible_conditions(extraction: &Extraction) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    for condition in &extraction.conditions {
        let clash = extraction.triggers.iter().find(|t| {
            t.kind == TriggerKind::State
                && t.target.as_deref() == Some(condition.target.as_str())
                && !t.fires_on.is_empty()
                && !condition.required.is_empty()
                && t.fires_on.is_disjoint(&condition.required)
        });
        let Some(trigger) = clash else {
            continue;
        };

        let other_paths = extraction
            .triggers
            .iter()
            .any(|t| t.target.as_deref() != Some(condition.target.as_str()));

        issues.push(ValidationIssue {
            kind: IssueKind::ImpossibleCondition,
            severity: Severity::Error,
            rule_id: extraction.rule_id.clone(),
            rule_name: extraction.rule_name.clone(),
            target: condition.target.clone(),
            location: condition.location.clone(),
            message: format!(
                "Condition requires '{}' to be {} but the trigger at {} only fires when it becomes {}",
                condition.target,
                quoted(&condition.required),
                trigger.location,
                quoted(&trigger.fires_on)
            ),
            found_value: None,
            suggestion: trigger.fires_on.iter().next().cloned(),
            confidence: Some(if other_paths {
                ConfidenceTier::Medium
            } else {
                ConfidenceTier::High
            }),
            valid_values: Some(trigger.fires_on.iter().cloned().collect()),
        });
    }
    issues
}

fn quoted(values: &BTreeSet<String>) -> String {
    let items: Vec<String> = values.iter().map(|v| format!("'{}'", v)).collect();
    match items.len() {
        1 => items[0].clone(),
        _ => format!("one of {}", items.join(", ")),
    }
}
