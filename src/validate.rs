//! Reference validation against the knowledge base.
//!
//! Each [`Reference`] is checked in isolation: a panic while checking one
//! reference is logged and costs only that reference's issues.

use std::collections::{BTreeSet, HashSet};
use std::panic::{AssertUnwindSafe, catch_unwind};

use crate::enums::*;
use crate::error::EvidenceError;
use crate::knowledge::{KnowledgeBase, OracleEntry};
use crate::suggest::{self, DEFAULT_SIMILARITY_THRESHOLD};
use crate::types::*;

/// Checks references against one [`KnowledgeBase`].
#[derive(Clone, Copy)]
pub struct Validator<'a> {
    kb: &'a KnowledgeBase,
    threshold: f64,
}

impl<'a> Validator<'a> {
    pub fn new(kb: &'a KnowledgeBase) -> Self {
        Validator {
            kb,
            threshold: DEFAULT_SIMILARITY_THRESHOLD,
        }
    }

    /// Minimum similarity for the suggestions attached to issues.
    pub fn with_similarity_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// All issues for one reference.
    pub fn validate(&self, reference: &Reference) -> Vec<ValidationIssue> {
        match catch_unwind(AssertUnwindSafe(|| self.check(reference))) {
            Ok(issues) => issues,
            Err(_) => {
                tracing::warn!(
                    rule = %reference.rule_id,
                    resource = %reference.target,
                    location = %reference.location,
                    "reference check panicked, no issues reported for it"
                );
                Vec::new()
            }
        }
    }

    /// Validate every reference, dropping duplicate issues. First occurrence wins.
    pub fn validate_all(&self, references: &[Reference]) -> Vec<ValidationIssue> {
        let mut seen = HashSet::new();
        let mut issues = Vec::new();
        for reference in references {
            for issue in self.validate(reference) {
                if seen.insert(issue.key()) {
                    issues.push(issue);
                }
            }
        }
        issues
    }

    fn check(&self, reference: &Reference) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        let directory = self.kb.directory();
        let target = reference.target.as_str();
        match reference.kind {
            ReferenceKind::Device => self.check_directory(
                reference,
                directory.device_exists(target),
                IssueKind::DeviceNotFound,
                "Device",
                &mut issues,
            ),
            ReferenceKind::Area => self.check_directory(
                reference,
                directory.area_exists(target),
                IssueKind::AreaNotFound,
                "Area",
                &mut issues,
            ),
            ReferenceKind::Zone => self.check_directory(
                reference,
                directory.zone_exists(target),
                IssueKind::ZoneNotFound,
                "Zone",
                &mut issues,
            ),
            ReferenceKind::ServiceTarget => self.check_directory(
                reference,
                directory.service_exists(target),
                IssueKind::ServiceNotFound,
                "Service",
                &mut issues,
            ),
            ReferenceKind::Direct | ReferenceKind::TemplateDerived => {
                self.check_resource(reference, &mut issues)
            }
        }
        issues
    }

    fn check_directory(
        &self,
        reference: &Reference,
        answer: Result<bool, EvidenceError>,
        kind: IssueKind,
        noun: &str,
        issues: &mut Vec<ValidationIssue>,
    ) {
        match answer {
            Ok(true) => {}
            Ok(false) => {
                let mut issue = ValidationIssue::for_reference(
                    reference,
                    kind,
                    Severity::Error,
                    format!("{} '{}' does not exist", noun, reference.target),
                );
                issue.confidence = Some(existence_confidence(reference));
                issues.push(issue);
            }
            Err(e) => {
                tracing::warn!(
                    resource = %reference.target,
                    error = %e,
                    "directory lookup failed, reference not checked"
                );
            }
        }
    }

    fn check_resource(&self, reference: &Reference, issues: &mut Vec<ValidationIssue>) {
        let target = reference.target.as_str();

        if !self.kb.snapshot().exists(target) {
            let (kind, message) = if self.kb.historically_observed(target) {
                (
                    IssueKind::EntityRemoved,
                    format!("Entity '{}' no longer exists but appears in history", target),
                )
            } else {
                (
                    IssueKind::EntityNotFound,
                    format!("Entity '{}' does not exist", target),
                )
            };
            let mut issue =
                ValidationIssue::for_reference(reference, kind, Severity::Error, message);
            issue.confidence = Some(existence_confidence(reference));
            self.attach_suggestion(&mut issue);
            issues.push(issue);
            return;
        }

        match (&reference.expected_attribute, &reference.expected_state) {
            (Some(attribute), expected) => {
                self.check_attribute(reference, attribute, expected.as_deref(), issues)
            }
            (None, Some(state)) => self.check_state(reference, state, issues),
            (None, None) => {}
        }
    }

    fn check_state(&self, reference: &Reference, state: &str, issues: &mut Vec<ValidationIssue>) {
        let target = reference.target.as_str();
        if is_template(state) || self.kb.is_free_form(target) {
            return;
        }
        let oracle = self.kb.oracle(target);
        if oracle.layers.is_empty() || oracle.states.contains(state) {
            return;
        }
        let confidence = value_confidence(reference, &oracle);

        if let Some(canonical) = suggest::case_insensitive_match(state, oracle.states.iter()) {
            let mut issue = ValidationIssue::for_reference(
                reference,
                IssueKind::CaseMismatch,
                Severity::Warning,
                format!(
                    "State '{}' for '{}' differs only in case from '{}'",
                    state, target, canonical
                ),
            );
            issue.found_value = Some(state.to_string());
            issue.suggestion = Some(canonical);
            issue.confidence = Some(confidence);
            issue.valid_values = Some(sorted(&oracle.states));
            issues.push(issue);
            return;
        }

        let mut issue = ValidationIssue::for_reference(
            reference,
            IssueKind::InvalidState,
            Severity::Error,
            format!("State '{}' is not a valid state for '{}'", state, target),
        );
        issue.found_value = Some(state.to_string());
        issue.confidence = Some(confidence);
        issue.valid_values = Some(sorted(&oracle.states));
        self.attach_suggestion(&mut issue);
        issues.push(issue);
    }

    fn check_attribute(
        &self,
        reference: &Reference,
        attribute: &str,
        expected: Option<&str>,
        issues: &mut Vec<ValidationIssue>,
    ) {
        let target = reference.target.as_str();
        let Some(attributes) = self.kb.snapshot().attributes(target) else {
            return;
        };
        if !attributes.contains_key(attribute) {
            let mut issue = ValidationIssue::for_reference(
                reference,
                IssueKind::AttributeNotFound,
                Severity::Warning,
                format!("Attribute '{}' not found on '{}'", attribute, target),
            );
            issue.confidence = Some(existence_confidence(reference));
            issues.push(issue);
            return;
        }

        let Some(value) = expected.filter(|v| !is_template(v)) else {
            return;
        };
        let Some(valid) = self.kb.valid_attribute_values_for(target, attribute) else {
            return;
        };
        if valid.is_empty() || valid.contains(value) {
            return;
        }
        // Attribute value lists only come from capability and live-schema layers.
        let confidence = match reference.kind {
            ReferenceKind::TemplateDerived => ConfidenceTier::Medium,
            _ => ConfidenceTier::High,
        };

        if let Some(canonical) = suggest::case_insensitive_match(value, valid.iter()) {
            let mut issue = ValidationIssue::for_reference(
                reference,
                IssueKind::CaseMismatch,
                Severity::Warning,
                format!(
                    "Value '{}' for attribute '{}' of '{}' differs only in case from '{}'",
                    value, attribute, target, canonical
                ),
            );
            issue.found_value = Some(value.to_string());
            issue.suggestion = Some(canonical);
            issue.confidence = Some(confidence);
            issue.valid_values = Some(sorted(&valid));
            issues.push(issue);
            return;
        }

        let mut issue = ValidationIssue::for_reference(
            reference,
            IssueKind::InvalidAttributeValue,
            Severity::Error,
            format!(
                "Value '{}' is not valid for attribute '{}' of '{}'",
                value, attribute, target
            ),
        );
        issue.found_value = Some(value.to_string());
        issue.confidence = Some(confidence);
        issue.valid_values = Some(sorted(&valid));
        self.attach_suggestion(&mut issue);
        issues.push(issue);
    }

    fn attach_suggestion(&self, issue: &mut ValidationIssue) {
        if let Some(s) = suggest::suggest(issue, self.kb, self.threshold) {
            issue.suggestion = Some(s.replacement);
        }
    }
}

fn existence_confidence(reference: &Reference) -> ConfidenceTier {
    match reference.kind {
        ReferenceKind::TemplateDerived => ConfidenceTier::Medium,
        _ => ConfidenceTier::High,
    }
}

fn value_confidence(reference: &Reference, oracle: &OracleEntry) -> ConfidenceTier {
    if oracle.is_authoritative() && reference.kind != ReferenceKind::TemplateDerived {
        ConfidenceTier::High
    } else {
        ConfidenceTier::Medium
    }
}

fn sorted(values: &BTreeSet<String>) -> Vec<String> {
    values.iter().cloned().collect()
}
