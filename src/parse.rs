use serde_json::Value;

use crate::error::{Diagnostic, ParseError, ParseErrorKind};
use crate::types::RuleDocument;

/// Rule documents read from one YAML input.
#[derive(Clone, Debug, Default)]
pub struct ParsedRules {
    pub rules: Vec<RuleDocument>,
    /// Entries that were skipped because they were not rule mappings.
    pub diagnostics: Vec<Diagnostic>,
}

/// Parse a YAML string into rule documents.
///
/// Accepts a single rule mapping, a sequence of rule mappings, or a mapping
/// holding such a sequence under `automation`/`automations`. Performs YAML
/// deserialization and shape mapping only; nothing is validated here.
pub fn parse(input: &str) -> Result<ParsedRules, ParseError> {
    if input.trim().is_empty() {
        return Err(ParseError {
            kind: ParseErrorKind::Syntax,
            message: "empty input".to_string(),
            path: None,
            line: None,
            column: None,
        });
    }

    check_multi_document(input)?;

    let value: Value = serde_saphyr::from_str(input).map_err(|e| {
        let msg = e.to_string();
        ParseError {
            kind: classify_saphyr_error(&msg),
            message: msg,
            path: None,
            line: None,
            column: None,
        }
    })?;

    let (entries, prefix) = match &value {
        Value::Array(items) => (items.clone(), String::new()),
        Value::Object(obj) => match obj.get("automation").or_else(|| obj.get("automations")) {
            Some(Value::Array(items)) => (items.clone(), "automation".to_string()),
            Some(_) => {
                return Err(ParseError {
                    kind: ParseErrorKind::TypeMismatch,
                    message: "'automation' must be a list of rules".to_string(),
                    path: Some("automation".to_string()),
                    line: None,
                    column: None,
                });
            }
            None => (vec![value.clone()], String::new()),
        },
        _ => {
            return Err(ParseError {
                kind: ParseErrorKind::TypeMismatch,
                message: "document root must be a YAML mapping or sequence".to_string(),
                path: None,
                line: None,
                column: None,
            });
        }
    };

    let mut parsed = ParsedRules::default();
    for (i, entry) in entries.iter().enumerate() {
        match RuleDocument::from_value(entry, i) {
            Ok(rule) => parsed.rules.push(rule),
            Err(e) => {
                let path = format!("{}[{}]", prefix, i);
                tracing::warn!(path = %path, error = %e, "skipping malformed rule entry");
                parsed
                    .diagnostics
                    .push(Diagnostic::warning("malformed_rule", &path, e.to_string()));
            }
        }
    }

    Ok(parsed)
}

/// Parse a single rule mapping already held as a JSON value.
pub fn parse_value(value: &Value) -> Result<RuleDocument, ParseError> {
    RuleDocument::from_value(value, 0).map_err(|e| ParseError {
        kind: ParseErrorKind::TypeMismatch,
        message: e.to_string(),
        path: None,
        line: None,
        column: None,
    })
}

/// Check for multiple YAML documents (--- separator).
/// Only matches `---` at column 0 to avoid false positives inside block scalars.
fn check_multi_document(input: &str) -> Result<(), ParseError> {
    let mut doc_count = 0;
    for (line_num, line) in input.lines().enumerate() {
        if line.starts_with("---") && line[3..].trim().is_empty() {
            doc_count += 1;
            if doc_count > 1 {
                return Err(ParseError {
                    kind: ParseErrorKind::Syntax,
                    message: "multi-document YAML is not supported".to_string(),
                    path: None,
                    line: Some(line_num + 1),
                    column: Some(1),
                });
            }
        }
    }
    Ok(())
}

fn classify_saphyr_error(msg: &str) -> ParseErrorKind {
    let lower = msg.to_lowercase();
    if lower.contains("type") || lower.contains("invalid") || lower.contains("expected") {
        ParseErrorKind::TypeMismatch
    } else {
        ParseErrorKind::Syntax
    }
}
