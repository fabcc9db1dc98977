//! One analysis pass over a set of rules.
//!
//! ```text
//! rules → extract → validate references → check templates → impossible conditions
//!           ↓                                              ↘
//!   history targets               all extractions → detect conflicts → AnalysisReport
//! ```
//!
//! Extraction is a separate step so a caller can load history for the
//! referenced targets before analyzing, without extracting twice.
//!
//! Each rule is analyzed in isolation: a panic while analyzing one rule is
//! logged, counted, and costs only that rule's issues.

use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crate::config::AnalyzerConfig;
use crate::conflict;
use crate::enums::ReferenceKind;
use crate::error::{Diagnostic, ParseError, SourceError};
use crate::extract::{Extraction, Extractor};
use crate::knowledge::KnowledgeBase;
use crate::parse;
use crate::sources::{DecisionStore, ResourceDirectory, RuleSource, StateSnapshot};
use crate::template_check::{TemplateChecker, TemplateContext};
use crate::types::*;
use crate::validate::Validator;

/// Counters for one pass.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub rules_analyzed: usize,
    /// Rules whose analysis panicked and produced no issues.
    pub failed_rules: usize,
    pub references_checked: usize,
    pub templates_checked: usize,
    /// Analyzed rules with no issues and no part in any conflict.
    pub healthy_rules: usize,
}

/// Everything one pass found.
#[derive(Clone, Debug, Default, Serialize)]
pub struct AnalysisReport {
    /// Deduplicated and sorted by rule, location, target and message.
    /// Includes one issue per conflict.
    pub issues: Vec<ValidationIssue>,
    pub conflicts: Vec<Conflict>,
    pub stats: RunStats,
    /// Ids of the rules counted in `stats.failed_rules`.
    pub failed_rule_ids: Vec<String>,
    /// Coverage notes. Paths are prefixed with the rule id.
    pub diagnostics: Vec<Diagnostic>,
}

impl AnalysisReport {
    /// Issues for one rule, in report order.
    pub fn issues_for<'a>(&'a self, rule_id: &'a str) -> impl Iterator<Item = &'a ValidationIssue> {
        self.issues.iter().filter(move |i| i.rule_id == rule_id)
    }
}

/// Rules extracted once, ready for a history load and then analysis.
#[derive(Debug, Default)]
pub struct ExtractedRules {
    rules: Vec<ExtractedRule>,
}

#[derive(Debug)]
struct ExtractedRule {
    rule_id: String,
    /// `None` when extraction panicked.
    extraction: Option<Extraction>,
}

impl ExtractedRules {
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Identifiers whose history the analysis would consult: every direct
    /// and template-derived reference target.
    pub fn referenced_targets(&self) -> Vec<String> {
        let mut targets = BTreeSet::new();
        for extraction in self.rules.iter().filter_map(|r| r.extraction.as_ref()) {
            targets.extend(
                extraction
                    .references
                    .iter()
                    .filter(|r| {
                        matches!(r.kind, ReferenceKind::Direct | ReferenceKind::TemplateDerived)
                    })
                    .map(|r| r.target.clone()),
            );
        }
        targets.into_iter().collect()
    }
}

/// Runs analysis passes against one knowledge base.
pub struct Analyzer {
    config: AnalyzerConfig,
    kb: Arc<KnowledgeBase>,
}

impl Analyzer {
    pub fn new(config: AnalyzerConfig, kb: Arc<KnowledgeBase>) -> Self {
        Analyzer { config, kb }
    }

    /// Build the knowledge base from host sources, applying the config's
    /// extra free-form domains.
    pub fn from_sources(
        config: AnalyzerConfig,
        snapshot: Arc<dyn StateSnapshot>,
        directory: Arc<dyn ResourceDirectory>,
        decisions: Arc<dyn DecisionStore>,
    ) -> Self {
        let kb = KnowledgeBase::new(snapshot, directory)
            .with_decisions(decisions)
            .with_free_form_domains(config.free_form_domains.iter().cloned());
        Analyzer::new(config, Arc::new(kb))
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    pub fn knowledge(&self) -> &Arc<KnowledgeBase> {
        &self.kb
    }

    /// Parse a YAML rule file and analyze it. Parse diagnostics are carried
    /// into the report.
    pub fn run_yaml(&self, input: &str) -> Result<AnalysisReport, ParseError> {
        let parsed = parse::parse(input)?;
        let mut report = self.run(&parsed.rules);
        let mut diagnostics = parsed.diagnostics;
        diagnostics.append(&mut report.diagnostics);
        report.diagnostics = diagnostics;
        Ok(report)
    }

    pub fn run_source(&self, source: &dyn RuleSource) -> Result<AnalysisReport, SourceError> {
        Ok(self.run(&source.rules()?))
    }

    pub fn run(&self, rules: &[RuleDocument]) -> AnalysisReport {
        self.analyze(self.extract(rules))
    }

    /// Extract every rule. A rule whose extraction panics is carried along
    /// and counted as failed by [`Analyzer::analyze`].
    pub fn extract(&self, rules: &[RuleDocument]) -> ExtractedRules {
        let extractor = Extractor::new(self.config.max_depth);
        let rules = rules
            .iter()
            .map(|rule| ExtractedRule {
                rule_id: rule.id.clone(),
                extraction: catch_unwind(AssertUnwindSafe(|| extractor.extract(rule))).ok(),
            })
            .collect();
        ExtractedRules { rules }
    }

    pub fn analyze(&self, extracted: ExtractedRules) -> AnalysisReport {
        let span = tracing::info_span!("analysis", rules = extracted.len());
        let _guard = span.enter();

        let validator =
            Validator::new(&self.kb).with_similarity_threshold(self.config.similarity_threshold);
        let checker = TemplateChecker::new(validator)
            .report_unknown(self.config.report_unknown_template_names)
            .with_globals(self.config.extra_template_globals.iter().cloned());

        let mut report = AnalysisReport::default();
        let mut extractions = Vec::with_capacity(extracted.len());

        for ExtractedRule { rule_id, extraction } in extracted.rules {
            let outcome = extraction.and_then(|extraction| {
                catch_unwind(AssertUnwindSafe(|| check_rule(&extraction, &validator, &checker)))
                    .ok()
                    .map(|issues| (extraction, issues))
            });
            match outcome {
                Some((extraction, issues)) => {
                    report.stats.rules_analyzed += 1;
                    report.stats.references_checked += extraction.references.len();
                    report.stats.templates_checked += extraction.templates.len();
                    report
                        .diagnostics
                        .extend(extraction.diagnostics.iter().map(|d| scoped(&rule_id, d)));
                    report.issues.extend(issues);
                    extractions.push(extraction);
                }
                None => {
                    tracing::warn!(rule = %rule_id, "rule analysis panicked, rule skipped");
                    report.stats.failed_rules += 1;
                    report.failed_rule_ids.push(rule_id);
                }
            }
        }

        report.conflicts =
            match catch_unwind(AssertUnwindSafe(|| conflict::detect_conflicts(&extractions))) {
                Ok(conflicts) => conflicts,
                Err(_) => {
                    tracing::warn!("conflict detection panicked, no conflicts reported");
                    Vec::new()
                }
            };
        report
            .issues
            .extend(report.conflicts.iter().map(Conflict::to_issue));

        let mut seen = HashSet::new();
        report.issues.retain(|issue| seen.insert(issue.key()));
        report.issues.sort_by(|a, b| {
            (&a.rule_id, &a.location, &a.target, &a.message).cmp(&(
                &b.rule_id,
                &b.location,
                &b.target,
                &b.message,
            ))
        });

        let mut unhealthy: HashSet<&str> = report.issues.iter().map(|i| i.rule_id.as_str()).collect();
        unhealthy.extend(report.conflicts.iter().map(|c| c.rule_b_id.as_str()));
        report.stats.healthy_rules = extractions
            .iter()
            .filter(|e| !unhealthy.contains(e.rule_id.as_str()))
            .count();

        tracing::info!(
            analyzed = report.stats.rules_analyzed,
            failed = report.stats.failed_rules,
            issues = report.issues.len(),
            conflicts = report.conflicts.len(),
            healthy = report.stats.healthy_rules,
            "analysis complete"
        );
        report
    }
}

fn check_rule(
    extraction: &Extraction,
    validator: &Validator<'_>,
    checker: &TemplateChecker<'_>,
) -> Vec<ValidationIssue> {
    let mut issues = validator.validate_all(&extraction.references);

    for field in &extraction.templates {
        let ctx = TemplateContext {
            rule_id: &extraction.rule_id,
            rule_name: &extraction.rule_name,
            location: &field.location,
            variables: &extraction.variables,
        };
        issues.extend(checker.check(&field.source, &ctx));
    }

    issues.extend(conflict::check_impossible_conditions(extraction));
    issues
}

fn scoped(rule_id: &str, diagnostic: &Diagnostic) -> Diagnostic {
    let mut d = diagnostic.clone();
    d.path = Some(match &d.path {
        Some(path) => format!("{}:{}", rule_id, path),
        None => rule_id.to_string(),
    });
    d
}
