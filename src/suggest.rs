//! Fix suggestions.
//!
//! The matching heuristics are plain functions over a candidate and a pool so
//! they can be tested without a knowledge base. [`suggest`] picks the pool for
//! an issue and applies them.

use std::collections::BTreeSet;

use crate::domains;
use crate::enums::IssueKind;
use crate::knowledge::KnowledgeBase;
use crate::types::{Suggestion, ValidationIssue};

/// Default minimum similarity for a fuzzy suggestion.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.6;

const SYNONYM_CONFIDENCE: f64 = 0.9;
const CASE_CONFIDENCE: f64 = 1.0;
const IMPOSSIBLE_CONDITION_CONFIDENCE: f64 = 0.9;

/// Canonical states and the words people write instead of them.
static STATE_SYNONYMS: &[(&str, &[&str])] = &[
    ("on", &["true", "yes", "enabled", "active", "1"]),
    ("off", &["false", "no", "disabled", "inactive", "0"]),
    ("home", &["present", "here", "at_home", "arrived"]),
    ("not_home", &["away", "absent", "gone", "out", "left"]),
    ("open", &["opened"]),
    ("closed", &["close", "shut"]),
    ("locked", &["lock"]),
    ("unlocked", &["unlock"]),
    ("playing", &["play"]),
    ("paused", &["pause"]),
    ("idle", &["stopped", "waiting"]),
    ("armed_away", &["armed"]),
    ("disarmed", &["disarm", "unarmed"]),
    ("above_horizon", &["day", "daytime", "up"]),
    ("below_horizon", &["night", "nighttime", "down"]),
];

/// The canonical state `value` is a synonym of, if that state is in `valid`.
pub fn synonym_for(value: &str, valid: &BTreeSet<String>) -> Option<String> {
    let lower = value.to_lowercase();
    STATE_SYNONYMS
        .iter()
        .find(|(_, words)| words.contains(&lower.as_str()))
        .map(|(canonical, _)| canonical.to_string())
        .filter(|canonical| valid.contains(canonical))
}

/// The entry of `pool` equal to `value` ignoring case, when the two differ.
pub fn case_insensitive_match<'a, I>(value: &str, pool: I) -> Option<String>
where
    I: IntoIterator<Item = &'a String>,
{
    pool.into_iter()
        .find(|v| v.as_str() != value && v.eq_ignore_ascii_case(value))
        .cloned()
}

/// Best entry of `pool` by normalized edit similarity, with its score.
///
/// Ties go to the first entry in iteration order. Nothing below `threshold` is
/// returned, and neither is `candidate` itself.
pub fn fuzzy_match<'a, I>(candidate: &str, pool: I, threshold: f64) -> Option<(String, f64)>
where
    I: IntoIterator<Item = &'a String>,
{
    let needle = candidate.to_lowercase();
    let mut best: Option<(&String, f64)> = None;
    for entry in pool {
        if entry == candidate {
            continue;
        }
        let score = strsim::normalized_levenshtein(&needle, &entry.to_lowercase());
        if score < threshold {
            continue;
        }
        match best {
            Some((_, best_score)) if score <= best_score => {}
            _ => best = Some((entry, score)),
        }
    }
    best.map(|(entry, score)| (entry.clone(), score))
}

/// Closest known identifier in the same domain, comparing object parts only.
pub fn similar_target<'a, I>(target: &str, known: I, threshold: f64) -> Option<(String, f64)>
where
    I: IntoIterator<Item = &'a String>,
{
    let domain = domains::domain_of(target);
    let object = domains::object_of(target).to_string();
    let same_domain: Vec<&String> = known
        .into_iter()
        .filter(|id| id.as_str() != target && domains::domain_of(id) == domain)
        .collect();
    let objects: Vec<String> = same_domain
        .iter()
        .map(|id| domains::object_of(id).to_string())
        .collect();
    let (best, score) = fuzzy_match(&object, objects.iter(), threshold)?;
    Some((format!("{}.{}", domain, best), score))
}

/// Propose a fix for `issue`, or `None` when no candidate is close enough.
pub fn suggest(issue: &ValidationIssue, kb: &KnowledgeBase, threshold: f64) -> Option<Suggestion> {
    match issue.kind {
        IssueKind::EntityNotFound | IssueKind::EntityRemoved => {
            let known = kb.known_target_ids();
            let (replacement, score) = similar_target(&issue.target, known.iter(), threshold)?;
            Some(Suggestion {
                description: format!("Did you mean '{}'?", replacement),
                confidence: score,
                replacement,
            })
        }
        IssueKind::InvalidState => {
            let found = issue.found_value.as_deref()?;
            let valid = kb.valid_states_for(&issue.target);
            value_suggestion(found, &valid, threshold)
        }
        IssueKind::InvalidAttributeValue => {
            let found = issue.found_value.as_deref()?;
            let valid: BTreeSet<String> = issue.valid_values.iter().flatten().cloned().collect();
            value_suggestion(found, &valid, threshold)
        }
        IssueKind::CaseMismatch => {
            let found = issue.found_value.as_deref()?;
            let canonical = case_insensitive_match(found, issue.valid_values.iter().flatten())
                .or_else(|| issue.suggestion.clone())?;
            Some(Suggestion {
                description: format!("Use '{}' (states are case-sensitive)", canonical),
                confidence: CASE_CONFIDENCE,
                replacement: canonical,
            })
        }
        IssueKind::ImpossibleCondition => {
            let replacement = issue.suggestion.clone()?;
            Some(Suggestion {
                description: format!(
                    "Require '{}', the state the trigger fires on",
                    replacement
                ),
                confidence: IMPOSSIBLE_CONDITION_CONFIDENCE,
                replacement,
            })
        }
        _ => None,
    }
}

/// Synonym table first, then fuzzy match against the valid set.
fn value_suggestion(found: &str, valid: &BTreeSet<String>, threshold: f64) -> Option<Suggestion> {
    if let Some(canonical) = synonym_for(found, valid) {
        return Some(Suggestion {
            description: format!("'{}' is usually written '{}'", found, canonical),
            confidence: SYNONYM_CONFIDENCE,
            replacement: canonical,
        });
    }
    let (replacement, score) = fuzzy_match(found, valid.iter(), threshold)?;
    Some(Suggestion {
        description: format!("Did you mean '{}'?", replacement),
        confidence: score,
        replacement,
    })
}
