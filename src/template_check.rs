//! Static checks over parsed templates.
//!
//! A template that fails to parse yields a single syntax issue. Otherwise the
//! tree is walked once with a scope stack, and three kinds of findings are
//! produced: filter/test calls with the wrong number of arguments, names that
//! resolve to nothing (along with unknown filters and tests, as medium
//! confidence warnings that can be switched off), and state accessor calls
//! whose literal identifier is malformed or fails reference validation.

use std::collections::{BTreeSet, HashSet};

use crate::enums::*;
use crate::extract::ENTITY_ID_RE;
use crate::template::{self, Expr, Invocation, Literal, Node, SetTarget};
use crate::template_registry::{self as registry, Signature};
use crate::types::{Reference, ValidationIssue};
use crate::validate::Validator;

/// Where a template sits, and the rule-level names visible to it.
#[derive(Clone, Copy, Debug)]
pub struct TemplateContext<'a> {
    pub rule_id: &'a str,
    pub rule_name: &'a str,
    pub location: &'a str,
    pub variables: &'a BTreeSet<String>,
}

/// Checks templates, resolving state accessor references through a [`Validator`].
pub struct TemplateChecker<'a> {
    validator: Validator<'a>,
    report_unknown: bool,
    extra_globals: HashSet<String>,
}

impl<'a> TemplateChecker<'a> {
    pub fn new(validator: Validator<'a>) -> Self {
        TemplateChecker {
            validator,
            report_unknown: true,
            extra_globals: HashSet::new(),
        }
    }

    /// Whether unknown filters, tests and variables are reported. On by default;
    /// extensions can register names the registry does not know.
    pub fn report_unknown(mut self, report: bool) -> Self {
        self.report_unknown = report;
        self
    }

    /// Globals provided by extensions, treated as defined.
    pub fn with_globals<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_globals.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn check(&self, source: &str, ctx: &TemplateContext<'_>) -> Vec<ValidationIssue> {
        let tree = match template::parse(source) {
            Ok(tree) => tree,
            Err(e) => {
                tracing::debug!(rule = %ctx.rule_id, location = %ctx.location, error = %e, "template does not parse");
                return vec![issue(
                    ctx,
                    IssueKind::TemplateSyntaxError,
                    Severity::Error,
                    ConfidenceTier::High,
                    "",
                    format!("Template syntax error: {}", e),
                )];
            }
        };

        let mut walk = Walk {
            checker: self,
            ctx,
            scopes: Vec::new(),
            reported: BTreeSet::new(),
            issues: Vec::new(),
        };
        walk.block(&tree.body, std::iter::empty());
        walk.issues
    }
}

fn issue(
    ctx: &TemplateContext<'_>,
    kind: IssueKind,
    severity: Severity,
    confidence: ConfidenceTier,
    target: &str,
    message: String,
) -> ValidationIssue {
    ValidationIssue {
        kind,
        severity,
        rule_id: ctx.rule_id.to_string(),
        rule_name: ctx.rule_name.to_string(),
        target: target.to_string(),
        location: ctx.location.to_string(),
        message,
        found_value: None,
        suggestion: None,
        confidence: Some(confidence),
        valid_values: None,
    }
}

/// Names a block binds for its whole extent: `set`, `macro` and imports,
/// including those nested in `if` and `filter` blocks, which do not open a
/// scope of their own.
fn block_bindings(nodes: &[Node], out: &mut Vec<String>) {
    for node in nodes {
        match node {
            Node::Set { targets, .. } => {
                for target in targets {
                    if let SetTarget::Name(name) = target {
                        out.push(name.clone());
                    }
                }
            }
            Node::SetBlock {
                target: SetTarget::Name(name),
                ..
            } => out.push(name.clone()),
            Node::Macro { name, .. } => out.push(name.clone()),
            Node::Import { names, .. } => out.extend(names.iter().cloned()),
            Node::If {
                branches,
                otherwise,
            } => {
                for (_, body) in branches {
                    block_bindings(body, out);
                }
                block_bindings(otherwise, out);
            }
            Node::FilterBlock { body, .. } => block_bindings(body, out),
            _ => {}
        }
    }
}

struct Walk<'c, 'a> {
    checker: &'c TemplateChecker<'a>,
    ctx: &'c TemplateContext<'c>,
    scopes: Vec<HashSet<String>>,
    /// Unknown names already reported in this template.
    reported: BTreeSet<String>,
    issues: Vec<ValidationIssue>,
}

impl<'c, 'a> Walk<'c, 'a> {
    /// Walk `nodes` in a new scope holding `names` plus the block's own bindings.
    fn block(&mut self, nodes: &[Node], names: impl Iterator<Item = String>) {
        let mut bound: Vec<String> = names.collect();
        block_bindings(nodes, &mut bound);
        self.scopes.push(bound.into_iter().collect());
        for node in nodes {
            self.node(node);
        }
        self.scopes.pop();
    }

    fn nodes(&mut self, nodes: &[Node]) {
        for node in nodes {
            self.node(node);
        }
    }

    fn node(&mut self, node: &Node) {
        match node {
            Node::Text(_) | Node::Break | Node::Continue => {}
            Node::Output(e) | Node::Do(e) | Node::Include(e) => self.expr(e),
            Node::Import { source, .. } => self.expr(source),
            Node::If {
                branches,
                otherwise,
            } => {
                for (test, body) in branches {
                    self.expr(test);
                    self.nodes(body);
                }
                self.nodes(otherwise);
            }
            Node::For {
                targets,
                iter,
                filter,
                body,
                otherwise,
            } => {
                self.expr(iter);
                let mut names = targets.clone();
                names.push("loop".to_string());
                // The loop filter sees the loop variables.
                self.scopes.push(names.iter().cloned().collect());
                if let Some(f) = filter {
                    self.expr(f);
                }
                self.scopes.pop();
                self.block(body, names.into_iter());
                self.nodes(otherwise);
            }
            Node::Set { targets, value } => {
                self.expr(value);
                for target in targets {
                    self.set_target(target);
                }
            }
            Node::SetBlock {
                target,
                filters,
                body,
            } => {
                self.nodes(body);
                for filter in filters {
                    self.filter(filter);
                }
                self.set_target(target);
            }
            Node::Macro { params, body, .. } => {
                for param in params {
                    if let Some(default) = &param.default {
                        self.expr(default);
                    }
                }
                let names = params
                    .iter()
                    .map(|p| p.name.clone())
                    .chain(["varargs", "kwargs", "caller"].map(String::from));
                self.block(body, names);
            }
            Node::With { bindings, body } => {
                for (_, value) in bindings {
                    self.expr(value);
                }
                self.block(body, bindings.iter().map(|(name, _)| name.clone()));
            }
            Node::FilterBlock { filters, body } => {
                for filter in filters {
                    self.filter(filter);
                }
                self.nodes(body);
            }
        }
    }

    fn set_target(&mut self, target: &SetTarget) {
        if let SetTarget::Attr { object, .. } = target {
            self.name(object);
        }
    }

    fn expr(&mut self, expr: &Expr) {
        let mut found: Vec<&Expr> = Vec::new();
        expr.visit(&mut |e| found.push(e));
        for e in found {
            match e {
                Expr::Name(name) => self.name(name),
                Expr::Filter { value, filter } => {
                    self.filter(filter);
                    if registry::is_state_accessor(&filter.name) {
                        self.accessor(&filter.name, value, &filter.args.positional);
                    }
                }
                Expr::Test { test, .. } => self.test(test),
                Expr::Call { func, args } => {
                    if let Expr::Name(name) = func.as_ref()
                        && registry::is_state_accessor(name)
                        && !self.is_local(name)
                        && let Some((first, rest)) = args.positional.split_first()
                    {
                        self.accessor(name, first, rest);
                    }
                }
                _ => {}
            }
        }
    }

    // ─── Names ──────────────────────────────────────────────────────────────

    fn is_local(&self, name: &str) -> bool {
        self.scopes.iter().any(|s| s.contains(name))
    }

    fn name(&mut self, name: &str) {
        let checker = self.checker;
        let known = self.is_local(name)
            || self.ctx.variables.contains(name)
            || registry::is_global(name)
            || registry::is_context_name(name)
            || checker.extra_globals.contains(name);
        if known || !checker.report_unknown || !self.reported.insert(name.to_string()) {
            return;
        }
        self.issues.push(issue(
            self.ctx,
            IssueKind::TemplateUnknownVariable,
            Severity::Warning,
            ConfidenceTier::Medium,
            "",
            format!("Unknown variable '{}' in template", name),
        ));
    }

    // ─── Filters and tests ──────────────────────────────────────────────────

    fn filter(&mut self, filter: &Invocation) {
        match registry::lookup_filter(&filter.name) {
            Some(signature) => self.arity("Filter", signature, filter),
            None if self.checker.report_unknown => self.issues.push(issue(
                self.ctx,
                IssueKind::TemplateUnknownFilter,
                Severity::Warning,
                ConfidenceTier::Medium,
                "",
                format!("Unknown filter '{}'", filter.name),
            )),
            None => {}
        }
    }

    fn test(&mut self, test: &Invocation) {
        match registry::lookup_test(&test.name) {
            Some(signature) => self.arity("Test", signature, test),
            None if self.checker.report_unknown => self.issues.push(issue(
                self.ctx,
                IssueKind::TemplateUnknownTest,
                Severity::Warning,
                ConfidenceTier::Medium,
                "",
                format!("Unknown test '{}'", test.name),
            )),
            None => {}
        }
    }

    fn arity(&mut self, noun: &str, signature: &Signature, call: &Invocation) {
        if call.args.is_dynamic() {
            return;
        }
        let keywords: Vec<&str> = call.args.keyword.iter().map(|(k, _)| k.as_str()).collect();
        if let Err(reason) = signature.check(call.args.positional.len(), &keywords) {
            self.issues.push(issue(
                self.ctx,
                IssueKind::TemplateInvalidArguments,
                Severity::Warning,
                ConfidenceTier::High,
                "",
                format!("{} '{}' {}", noun, call.name, reason),
            ));
        }
    }

    // ─── State accessors ────────────────────────────────────────────────────

    /// `id` is the accessor's first argument; `rest` are the ones after it.
    fn accessor(&mut self, accessor: &str, id: &Expr, rest: &[Expr]) {
        let Expr::Literal(Literal::Str(id)) = id else {
            return;
        };
        if !ENTITY_ID_RE.is_match(id) {
            self.issues.push(issue(
                self.ctx,
                IssueKind::TemplateInvalidEntityId,
                Severity::Warning,
                ConfidenceTier::High,
                id,
                format!("'{}' passed to {}() is not a valid entity id", id, accessor),
            ));
            return;
        }

        let literal = |i: usize| -> Vec<String> {
            match rest.get(i) {
                Some(Expr::Literal(Literal::Str(s))) => vec![s.clone()],
                Some(Expr::List(items)) | Some(Expr::Tuple(items)) => items
                    .iter()
                    .filter_map(|e| match e {
                        Expr::Literal(Literal::Str(s)) => Some(s.clone()),
                        _ => None,
                    })
                    .collect(),
                _ => Vec::new(),
            }
        };
        let (attribute, states) = match accessor {
            "is_state" => (None, literal(0)),
            "state_attr" => (literal(0).into_iter().next(), Vec::new()),
            "is_state_attr" => (literal(0).into_iter().next(), literal(1)),
            _ => (None, Vec::new()),
        };

        let reference = |state: Option<String>| Reference {
            rule_id: self.ctx.rule_id.to_string(),
            rule_name: self.ctx.rule_name.to_string(),
            target: id.clone(),
            expected_state: state,
            expected_attribute: attribute.clone(),
            kind: ReferenceKind::TemplateDerived,
            location: self.ctx.location.to_string(),
        };
        let references: Vec<Reference> = if states.is_empty() {
            vec![reference(None)]
        } else {
            states.into_iter().map(|s| reference(Some(s))).collect()
        };

        for r in &references {
            let found = self.checker.validator.validate(r);
            self.issues.extend(found);
        }
    }
}
