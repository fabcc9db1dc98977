//! Static analyzer for declarative home-automation rules.
//!
//! Rules are YAML documents made of triggers, conditions and actions that
//! name resources by identifier and embed a Jinja-style template language.
//! This crate finds the defects a rule author cannot see until the rule
//! silently misbehaves: references to resources that do not exist, states a
//! resource can never take, conditions that contradict their own trigger,
//! rules fighting over one resource, and templates that do not parse or call
//! filters wrongly.
//!
//! ```text
//! parse(yaml) → RuleDocument → extract → Extraction ─┬→ validate  ─┐
//!                                                    ├→ templates ─┼→ AnalysisReport → IssueFeed
//!                                   all extractions ─┴→ conflicts ─┘
//! ```
//!
//! Everything the analyzer knows about the host comes through the traits in
//! [`sources`], merged by a [`KnowledgeBase`].
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use rulescope::sources::MemorySnapshot;
//! use rulescope::IssueKind;
//!
//! let yaml = r#"
//! id: welcome
//! alias: Welcome home
//! triggers:
//!   - trigger: state
//!     entity_id: person.occupant
//!     to: home
//! conditions:
//!   - condition: state
//!     entity_id: person.occupant
//!     state: not_home
//! actions:
//!   - action: light.turn_on
//!     target:
//!       entity_id: light.hall
//! "#;
//!
//! let snapshot = MemorySnapshot::new()
//!     .with("person.occupant", "home")
//!     .with("light.hall", "off");
//! let report = rulescope::analyze(yaml, Arc::new(snapshot)).expect("valid YAML");
//! assert!(report.issues.iter().any(|i| i.kind == IssueKind::ImpossibleCondition));
//! ```

pub mod analyzer;
pub mod config;
pub mod conflict;
pub mod domains;
pub mod enums;
pub mod error;
pub mod extract;
pub mod feed;
pub mod history;
pub mod knowledge;
pub mod parse;
pub mod sources;
pub mod suggest;
pub mod template;
pub mod template_check;
pub mod template_registry;
pub mod types;
pub mod validate;

pub use enums::*;
pub use error::*;
pub use types::*;

pub use analyzer::{AnalysisReport, Analyzer, ExtractedRules, RunStats};
pub use config::AnalyzerConfig;
pub use extract::{Extraction, extract};
pub use feed::{FeedItem, FeedResponse, IssueFeed};
pub use knowledge::KnowledgeBase;
pub use parse::parse;
pub use suggest::suggest;
pub use validate::Validator;

use std::sync::Arc;

use sources::{MemoryDecisionStore, OpenDirectory, StateSnapshot};

/// Convenience entry point: parse `input` and analyze it against `snapshot`
/// with the default configuration and no directory or history evidence.
///
/// # Errors
///
/// Returns the [`ParseError`] if `input` is not a rule file.
pub fn analyze(
    input: &str,
    snapshot: Arc<dyn StateSnapshot>,
) -> Result<AnalysisReport, ParseError> {
    let analyzer = Analyzer::from_sources(
        AnalyzerConfig::default(),
        snapshot,
        Arc::new(OpenDirectory),
        Arc::new(MemoryDecisionStore::new()),
    );
    analyzer.run_yaml(input)
}
