use serde::{Deserialize, Serialize};
use std::fmt;

/// Diagnostic severity level.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticSeverity {
    Error,
    Warning,
}

/// A structured note about input the analyzer could not fully process.
///
/// Diagnostics describe degraded coverage (a skipped node, a truncated
/// subtree), not defects in the rules themselves; those are
/// [`ValidationIssue`](crate::types::ValidationIssue)s.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: DiagnosticSeverity,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub message: String,
}

impl Diagnostic {
    pub(crate) fn warning(code: &str, path: &str, message: impl Into<String>) -> Self {
        Diagnostic {
            severity: DiagnosticSeverity::Warning,
            code: code.to_string(),
            path: Some(path.to_string()),
            message: message.into(),
        }
    }
}

/// Error kind for parse failures.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseErrorKind {
    Syntax,
    TypeMismatch,
}

/// Produced by `parse` when the YAML input cannot be turned into rule documents.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<usize>,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.line, self.column, &self.path) {
            (Some(line), Some(col), _) => write!(f, "{}:{}: {}", line, col, self.message),
            (_, _, Some(path)) => write!(f, "{}: {}", path, self.message),
            _ => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ParseError {}

/// A rule-tree node did not have the shape its type requires.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ShapeError {
    #[error("expected a mapping, got {found}")]
    NotAMapping { found: &'static str },

    #[error("missing required key '{key}'")]
    MissingKey { key: &'static str },

    #[error("key '{key}' must be {expected}")]
    WrongType {
        key: &'static str,
        expected: &'static str,
    },
}

/// An evidence source (snapshot, directory, archive, store) failed to answer.
///
/// The knowledge base treats any of these as an absent layer.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum EvidenceError {
    #[error("evidence source unavailable: {0}")]
    Unavailable(String),

    #[error("evidence source returned malformed data: {0}")]
    Malformed(String),
}

/// Failure reading or writing the persisted dismissal/learned-value store.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("decision store backend error: {0}")]
    Backend(String),
}

/// Failure fetching rule documents from the host.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("rule source unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Failure loading an [`AnalyzerConfig`](crate::config::AnalyzerConfig).
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration syntax: {0}")]
    Syntax(String),

    #[error("invalid configuration value for '{field}': {message}")]
    Invalid { field: &'static str, message: String },
}

/// A template could not be tokenized or parsed.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{message} (line {line}, column {column})")]
pub struct TemplateSyntaxError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}
