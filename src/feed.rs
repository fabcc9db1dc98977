//! The read-only issue feed a dashboard consumes.
//!
//! The feed keeps the last [`AnalysisReport`] and filters it through the
//! operator's decisions on every read. None of its operations fail: source,
//! archive and store errors are logged and the feed serves what it has.

use serde::Serialize;
use std::sync::{Arc, RwLock};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::analyzer::{AnalysisReport, Analyzer};
use crate::sources::{Decision, DecisionStore, HistoryArchive, RuleSource};
use crate::suggest;
use crate::types::{IssueKey, Suggestion, ValidationIssue};

/// One issue as shown to the operator.
#[derive(Clone, Debug, Serialize)]
pub struct FeedItem {
    pub issue: ValidationIssue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<Suggestion>,
    pub edit_link: String,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct FeedResponse {
    pub issues: Vec<FeedItem>,
    pub healthy_count: usize,
    /// RFC 3339; absent until the first run completes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_timestamp: Option<String>,
    pub failed_rules: usize,
}

struct LastRun {
    report: AnalysisReport,
    finished_at: OffsetDateTime,
}

pub struct IssueFeed {
    analyzer: Analyzer,
    rules: Arc<dyn RuleSource>,
    store: Arc<dyn DecisionStore>,
    archive: Option<Arc<dyn HistoryArchive>>,
    last: RwLock<Option<LastRun>>,
}

impl IssueFeed {
    /// `store` should be the same store the analyzer's knowledge base reads
    /// learned values from.
    pub fn new(
        analyzer: Analyzer,
        rules: Arc<dyn RuleSource>,
        store: Arc<dyn DecisionStore>,
    ) -> Self {
        IssueFeed {
            analyzer,
            rules,
            store,
            archive: None,
            last: RwLock::new(None),
        }
    }

    /// Refresh the history layer from `archive` before each run.
    pub fn with_history(mut self, archive: Arc<dyn HistoryArchive>) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn analyzer(&self) -> &Analyzer {
        &self.analyzer
    }

    /// The last run's issues minus dismissed and resolved ones.
    pub fn current(&self) -> FeedResponse {
        let last = self.last.read().unwrap_or_else(|e| e.into_inner());
        let Some(last) = last.as_ref() else {
            return FeedResponse::default();
        };

        let config = self.analyzer.config();
        let kb = self.analyzer.knowledge();
        let issues = last
            .report
            .issues
            .iter()
            .filter(|issue| !self.is_settled(&issue.key()))
            .map(|issue| FeedItem {
                issue: issue.clone(),
                suggestion: suggest::suggest(issue, kb, config.similarity_threshold),
                edit_link: format!("{}{}", config.edit_link_base, issue.rule_id),
            })
            .collect();

        FeedResponse {
            issues,
            healthy_count: last.report.stats.healthy_rules,
            last_run_timestamp: last.finished_at.format(&Rfc3339).ok(),
            failed_rules: last.report.stats.failed_rules,
        }
    }

    /// Reload rules and history, analyze, and return the fresh feed.
    ///
    /// If the rule source fails the previous report is kept.
    pub async fn rerun(&self) -> FeedResponse {
        let rules = match self.rules.rules() {
            Ok(rules) => rules,
            Err(e) => {
                tracing::warn!(error = %e, "rule source failed, keeping previous report");
                return self.current();
            }
        };

        let extracted = self.analyzer.extract(&rules);
        if let Some(archive) = &self.archive {
            let config = self.analyzer.config();
            let targets = extracted.referenced_targets();
            let outcome = self
                .analyzer
                .knowledge()
                .load_history(
                    archive.as_ref(),
                    &targets,
                    config.history_days,
                    config.history_timeout(),
                )
                .await;
            if !outcome.is_loaded() {
                tracing::debug!("analyzing without fresh history");
            }
        }

        let report = self.analyzer.analyze(extracted);
        *self.last.write().unwrap_or_else(|e| e.into_inner()) = Some(LastRun {
            report,
            finished_at: OffsetDateTime::now_utc(),
        });
        self.current()
    }

    /// Hide an issue from the feed. Returns false if the store failed.
    pub fn dismiss(&self, key: IssueKey) -> bool {
        let mut decision = self.decision(&key);
        decision.dismissed = true;
        self.record(key, decision)
    }

    /// Accept `value` as a valid state for the issue's target. The issue
    /// leaves the feed, and the next run treats the value as valid wherever
    /// the target is referenced. Returns false if the store failed.
    pub fn confirm_learned(&self, key: IssueKey, value: impl Into<String>) -> bool {
        let target = key.target.clone();
        let mut decision = self.decision(&key);
        decision.learned_value = Some(value.into());
        let stored = self.record(key, decision);
        if stored {
            self.analyzer.knowledge().invalidate_target(&target);
        }
        stored
    }

    fn decision(&self, key: &IssueKey) -> Decision {
        match self.store.get(key) {
            Ok(decision) => decision.unwrap_or_default(),
            Err(e) => {
                tracing::warn!(error = %e, rule = %key.rule_id, "decision store read failed");
                Decision::default()
            }
        }
    }

    fn record(&self, key: IssueKey, decision: Decision) -> bool {
        let rule = key.rule_id.clone();
        match self.store.put(key, decision) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, rule = %rule, "decision store write failed");
                false
            }
        }
    }

    fn is_settled(&self, key: &IssueKey) -> bool {
        let decision = self.decision(key);
        decision.dismissed || decision.learned_value.is_some()
    }
}
