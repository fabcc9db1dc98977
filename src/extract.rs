//! Reference extraction.
//!
//! Walks a [`RuleDocument`] top to bottom and flattens everything the other
//! analyses need into an [`Extraction`]: typed references for validation,
//! trigger/condition/action summaries for conflict detection, and every
//! template string for the template analyzer.
//!
//! The walk never fails. A node with the wrong shape is skipped with a
//! diagnostic, and a subtree nested deeper than the configured limit is
//! dropped with a diagnostic, so one malformed branch only costs coverage of
//! that branch.

use regex::Regex;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::LazyLock;

use crate::enums::{Effect, ReferenceKind, TriggerKind};
use crate::error::Diagnostic;
use crate::types::*;

/// Default nesting limit for action and condition trees.
pub const DEFAULT_MAX_DEPTH: usize = 20;

// ─── Cached regexes ─────────────────────────────────────────────────────────

/// Well-formed resource identifier: `domain.object_id`.
pub static ENTITY_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z_][a-z0-9_]*\.[a-z0-9_]+$").unwrap());

static TIME_LITERAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9]{1,2}):([0-9]{2})(?::([0-9]{2}))?$").unwrap());

static TPL_IS_STATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\bis_state\(\s*['"]([^'"]+)['"]\s*,\s*['"]([^'"]*)['"]"#).unwrap()
});

static TPL_STATE_ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\b(?:is_)?state_attr\(\s*['"]([^'"]+)['"]\s*,\s*['"]([^'"]+)['"]"#).unwrap()
});

static TPL_STATES_CALL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\b(?:states|has_value)\(\s*['"]([^'"]+)['"]\s*[,)]"#).unwrap()
});

static TPL_STATES_ATTR_ACCESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bstates\.([a-z_][a-z0-9_]*)\.([a-z0-9_]+)").unwrap());

// ─── Output ─────────────────────────────────────────────────────────────────

/// Everything extracted from one rule.
#[derive(Clone, Debug, Default)]
pub struct Extraction {
    pub rule_id: String,
    pub rule_name: String,
    pub triggers: Vec<TriggerInfo>,
    /// Positive constraints from the rule's own condition list.
    pub conditions: Vec<ConditionInfo>,
    pub actions: Vec<TargetAction>,
    pub references: Vec<Reference>,
    pub templates: Vec<TemplateField>,
    /// Names bound by rule- and action-level `variables`.
    pub variables: BTreeSet<String>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Extract with the default depth limit.
pub fn extract(rule: &RuleDocument) -> Extraction {
    Extractor::new(DEFAULT_MAX_DEPTH).extract(rule)
}

/// Rule walker with a configurable nesting limit.
#[derive(Clone, Copy, Debug)]
pub struct Extractor {
    max_depth: usize,
}

impl Default for Extractor {
    fn default() -> Self {
        Extractor::new(DEFAULT_MAX_DEPTH)
    }
}

impl Extractor {
    pub fn new(max_depth: usize) -> Self {
        Extractor { max_depth }
    }

    pub fn extract(&self, rule: &RuleDocument) -> Extraction {
        let mut walk = Walk {
            max_depth: self.max_depth,
            out: Extraction {
                rule_id: rule.id.clone(),
                rule_name: rule.name().to_string(),
                ..Extraction::default()
            },
        };

        walk.out.variables.extend(rule.variables.keys().cloned());

        for (i, trigger) in rule.triggers.iter().enumerate() {
            walk.trigger(trigger, &format!("trigger[{}]", i), true);
        }

        let mut rule_guards = Vec::new();
        for (i, condition) in rule.conditions.iter().enumerate() {
            rule_guards.extend(walk.condition(condition, &format!("condition[{}]", i), 1));
        }
        walk.out.conditions = rule_guards.clone();

        walk.actions(&rule.actions, "action", &rule_guards, 1);

        let scan_depth = self.max_depth.saturating_mul(4);
        for (section, values) in [
            ("trigger", &rule.triggers),
            ("condition", &rule.conditions),
            ("action", &rule.actions),
        ] {
            for (i, value) in values.iter().enumerate() {
                walk.scan_templates(value, &format!("{}[{}]", section, i), 0, scan_depth);
            }
        }
        for (name, value) in &rule.variables {
            walk.scan_templates(value, &format!("variables.{}", name), 0, scan_depth);
        }

        tracing::debug!(
            rule = %walk.out.rule_id,
            references = walk.out.references.len(),
            templates = walk.out.templates.len(),
            actions = walk.out.actions.len(),
            "extracted rule"
        );

        walk.out
    }
}

struct Walk {
    max_depth: usize,
    out: Extraction,
}

impl Walk {
    fn skip(&mut self, path: &str, reason: String) {
        tracing::debug!(rule = %self.out.rule_id, path = %path, %reason, "skipping node");
        self.out
            .diagnostics
            .push(Diagnostic::warning("malformed_node", path, reason));
    }

    fn too_deep(&mut self, path: &str, depth: usize) -> bool {
        if depth <= self.max_depth {
            return false;
        }
        tracing::warn!(
            rule = %self.out.rule_id,
            path = %path,
            max_depth = self.max_depth,
            "nesting limit exceeded, subtree not analyzed"
        );
        self.out.diagnostics.push(Diagnostic::warning(
            "depth_exceeded",
            path,
            format!("nesting deeper than {} levels was not analyzed", self.max_depth),
        ));
        true
    }

    fn reference(
        &mut self,
        target: &str,
        kind: ReferenceKind,
        location: &str,
        expected_state: Option<&str>,
        expected_attribute: Option<&str>,
    ) {
        if is_template(target) || target.is_empty() {
            return;
        }
        if matches!(kind, ReferenceKind::Direct) && matches!(target, "all" | "none") {
            return;
        }
        self.out.references.push(Reference {
            rule_id: self.out.rule_id.clone(),
            rule_name: self.out.rule_name.clone(),
            target: target.to_string(),
            expected_state: expected_state
                .filter(|s| !is_template(s))
                .map(str::to_string),
            expected_attribute: expected_attribute.map(str::to_string),
            kind,
            location: location.to_string(),
        });
    }

    /// One reference per expected state, or a bare one when there are none.
    fn state_references(
        &mut self,
        target: &str,
        states: &[String],
        attribute: Option<&str>,
        location: &str,
    ) {
        if states.is_empty() {
            self.reference(target, ReferenceKind::Direct, location, None, attribute);
        }
        for state in states {
            self.reference(target, ReferenceKind::Direct, location, Some(state), attribute);
        }
    }

    // ─── Triggers ───────────────────────────────────────────────────────────

    fn trigger(&mut self, value: &Value, path: &str, record: bool) {
        let trigger = match Trigger::from_value(value) {
            Ok(t) => t,
            Err(e) => return self.skip(path, e.to_string()),
        };

        let mut infos = Vec::new();
        let info = |kind: TriggerKind, target: Option<&str>| TriggerInfo {
            kind,
            target: target.map(str::to_string),
            fires_on: BTreeSet::new(),
            at: BTreeSet::new(),
            event: None,
            location: path.to_string(),
        };

        match &trigger {
            Trigger::State {
                entity_ids,
                attribute,
                to,
                from,
            } => {
                for id in entity_ids {
                    let mut expected: Vec<String> = to.clone();
                    expected.extend(from.iter().cloned());
                    self.state_references(id, &expected, attribute.as_deref(), path);
                    if is_template(id) {
                        continue;
                    }
                    let mut ti = info(TriggerKind::State, Some(id));
                    if attribute.is_none() && to.iter().all(|s| !is_template(s)) {
                        ti.fires_on = to.iter().cloned().collect();
                    }
                    infos.push(ti);
                }
            }
            Trigger::NumericState {
                entity_ids,
                attribute,
            } => {
                for id in entity_ids {
                    self.reference(id, ReferenceKind::Direct, path, None, attribute.as_deref());
                }
                infos.push(info(TriggerKind::Other, None));
            }
            Trigger::Time { at } => {
                let mut literals = BTreeSet::new();
                let mut all_literal = true;
                for entry in at {
                    if let Some(t) = normalize_time(entry) {
                        literals.insert(t);
                    } else {
                        all_literal = false;
                        if ENTITY_ID_RE.is_match(entry) {
                            self.reference(entry, ReferenceKind::Direct, path, None, None);
                        }
                    }
                }
                let mut ti = info(TriggerKind::TimeOfDay, None);
                if all_literal {
                    ti.at = literals;
                }
                infos.push(ti);
            }
            Trigger::Sun { event, .. } => {
                let mut ti = info(TriggerKind::Sun, None);
                ti.event = Some(event.clone());
                infos.push(ti);
            }
            Trigger::TimePattern => infos.push(info(TriggerKind::Periodic, None)),
            Trigger::Template { .. } => infos.push(info(TriggerKind::Other, None)),
            Trigger::Zone { entity_ids, zone } => {
                for id in entity_ids {
                    self.reference(id, ReferenceKind::Direct, path, None, None);
                }
                self.reference(zone, ReferenceKind::Zone, path, None, None);
                infos.push(info(TriggerKind::Other, None));
            }
            Trigger::Device {
                device_id,
                entity_ids,
            } => {
                self.reference(device_id, ReferenceKind::Device, path, None, None);
                for id in entity_ids {
                    self.reference(id, ReferenceKind::Direct, path, None, None);
                }
                infos.push(info(TriggerKind::Other, None));
            }
            Trigger::Unrecognized { .. } => infos.push(info(TriggerKind::Other, None)),
        }

        if record {
            self.out.triggers.extend(infos);
        }
    }

    // ─── Conditions ─────────────────────────────────────────────────────────

    /// Walk one condition, emitting its references, and return the positive
    /// constraints it guarantees when it holds.
    fn condition(&mut self, value: &Value, path: &str, depth: usize) -> Vec<ConditionInfo> {
        if self.too_deep(path, depth) {
            return Vec::new();
        }
        let condition = match Condition::from_value(value) {
            Ok(c) => c,
            Err(e) => {
                self.skip(path, e.to_string());
                return Vec::new();
            }
        };

        match condition {
            Condition::State {
                entity_ids,
                attribute,
                states,
                match_any,
            } => {
                for id in &entity_ids {
                    self.state_references(id, &states, attribute.as_deref(), path);
                }
                let constrains = attribute.is_none()
                    && (!match_any || entity_ids.len() == 1)
                    && !states.is_empty()
                    && states.iter().all(|s| !is_template(s));
                if !constrains {
                    return Vec::new();
                }
                entity_ids
                    .iter()
                    .filter(|id| !is_template(id))
                    .map(|id| ConditionInfo {
                        target: id.clone(),
                        required: states.iter().cloned().collect(),
                        location: path.to_string(),
                    })
                    .collect()
            }
            Condition::NumericState {
                entity_ids,
                attribute,
            } => {
                for id in &entity_ids {
                    self.reference(id, ReferenceKind::Direct, path, None, attribute.as_deref());
                }
                Vec::new()
            }
            Condition::And(children) => {
                let mut infos = Vec::new();
                for (i, child) in children.iter().enumerate() {
                    infos.extend(self.condition(
                        child,
                        &format!("{}.conditions[{}]", path, i),
                        depth + 1,
                    ));
                }
                infos
            }
            Condition::Or(children) | Condition::Not(children) => {
                // Neither a disjunction nor a negation yields a positive constraint.
                for (i, child) in children.iter().enumerate() {
                    self.condition(child, &format!("{}.conditions[{}]", path, i), depth + 1);
                }
                Vec::new()
            }
            Condition::Zone { entity_ids, zones } => {
                for id in &entity_ids {
                    self.reference(id, ReferenceKind::Direct, path, None, None);
                }
                for zone in &zones {
                    self.reference(zone, ReferenceKind::Zone, path, None, None);
                }
                Vec::new()
            }
            Condition::Device {
                device_id,
                entity_ids,
            } => {
                self.reference(&device_id, ReferenceKind::Device, path, None, None);
                for id in &entity_ids {
                    self.reference(id, ReferenceKind::Direct, path, None, None);
                }
                Vec::new()
            }
            Condition::Time { entity_refs } => {
                for id in &entity_refs {
                    self.reference(id, ReferenceKind::Direct, path, None, None);
                }
                Vec::new()
            }
            Condition::Template { .. }
            | Condition::Sun
            | Condition::Trigger
            | Condition::Unrecognized { .. } => Vec::new(),
        }
    }

    fn conditions(&mut self, values: &[Value], path: &str, depth: usize) -> Vec<ConditionInfo> {
        let mut infos = Vec::new();
        for (i, value) in values.iter().enumerate() {
            infos.extend(self.condition(value, &format!("{}[{}]", path, i), depth));
        }
        infos
    }

    // ─── Actions ────────────────────────────────────────────────────────────

    /// Walk a sequence of steps. An inline condition step guards every step
    /// after it in the same sequence.
    fn actions(&mut self, steps: &[Value], path: &str, guards: &[ConditionInfo], depth: usize) {
        if self.too_deep(path, depth) {
            return;
        }
        let mut guards = guards.to_vec();
        for (i, step) in steps.iter().enumerate() {
            let loc = format!("{}[{}]", path, i);
            let added = self.action(step, &loc, &guards, depth);
            guards.extend(added);
        }
    }

    /// Walk one step; returns constraints it imposes on later siblings.
    fn action(
        &mut self,
        value: &Value,
        path: &str,
        guards: &[ConditionInfo],
        depth: usize,
    ) -> Vec<ConditionInfo> {
        if let Value::Array(steps) = value {
            self.actions(steps, path, guards, depth + 1);
            return Vec::new();
        }

        let action = match Action::from_value(value) {
            Ok(a) => a,
            Err(e) => {
                self.skip(path, e.to_string());
                return Vec::new();
            }
        };

        match action {
            Action::Call {
                service,
                entity_ids,
                device_ids,
                area_ids,
            } => {
                if service.contains('.') {
                    self.reference(&service, ReferenceKind::ServiceTarget, path, None, None);
                }
                for id in &device_ids {
                    self.reference(id, ReferenceKind::Device, path, None, None);
                }
                for id in &area_ids {
                    self.reference(id, ReferenceKind::Area, path, None, None);
                }
                let effect = effect_for(&service);
                for id in &entity_ids {
                    self.reference(id, ReferenceKind::Direct, path, None, None);
                    if let Some(effect) = effect
                        && !is_template(id)
                        && !matches!(id.as_str(), "all" | "none")
                    {
                        self.out.actions.push(TargetAction {
                            rule_id: self.out.rule_id.clone(),
                            rule_name: self.out.rule_name.clone(),
                            target: id.clone(),
                            effect,
                            guards: guards.to_vec(),
                            location: path.to_string(),
                        });
                    }
                }
            }
            Action::Scene { scene } => {
                self.reference(&scene, ReferenceKind::Direct, path, None, None);
            }
            Action::Choose { options, default } => {
                for (j, option) in options.iter().enumerate() {
                    let option_path = format!("{}.choose[{}]", path, j);
                    let infos = self.conditions(
                        &option.conditions,
                        &format!("{}.conditions", option_path),
                        depth + 1,
                    );
                    let mut branch = guards.to_vec();
                    branch.extend(infos);
                    self.actions(
                        &option.sequence,
                        &format!("{}.sequence", option_path),
                        &branch,
                        depth + 1,
                    );
                }
                // The default arm runs when every option failed; that negation
                // has no positive form, so it inherits only the outer guards.
                self.actions(&default, &format!("{}.default", path), guards, depth + 1);
            }
            Action::If {
                conditions,
                then,
                otherwise,
            } => {
                let infos = self.conditions(&conditions, &format!("{}.if", path), depth + 1);
                let mut branch = guards.to_vec();
                branch.extend(infos);
                self.actions(&then, &format!("{}.then", path), &branch, depth + 1);
                self.actions(&otherwise, &format!("{}.else", path), guards, depth + 1);
            }
            Action::Repeat {
                while_conditions,
                until_conditions,
                sequence,
            } => {
                let infos = self.conditions(
                    &while_conditions,
                    &format!("{}.repeat.while", path),
                    depth + 1,
                );
                self.conditions(
                    &until_conditions,
                    &format!("{}.repeat.until", path),
                    depth + 1,
                );
                let mut body = guards.to_vec();
                body.extend(infos);
                self.actions(
                    &sequence,
                    &format!("{}.repeat.sequence", path),
                    &body,
                    depth + 1,
                );
            }
            Action::Parallel(branches) => {
                for (j, branch) in branches.iter().enumerate() {
                    let branch_path = format!("{}.parallel[{}]", path, j);
                    if self.too_deep(&branch_path, depth + 1) {
                        continue;
                    }
                    self.action(branch, &branch_path, guards, depth + 1);
                }
            }
            Action::Sequence(steps) => {
                self.actions(&steps, &format!("{}.sequence", path), guards, depth + 1);
            }
            Action::WaitForTrigger(triggers) => {
                for (j, trigger) in triggers.iter().enumerate() {
                    self.trigger(trigger, &format!("{}.wait_for_trigger[{}]", path, j), false);
                }
            }
            Action::Condition(node) => {
                return self.condition(&node, path, depth + 1);
            }
            Action::Device {
                device_id,
                entity_ids,
            } => {
                self.reference(&device_id, ReferenceKind::Device, path, None, None);
                for id in &entity_ids {
                    self.reference(id, ReferenceKind::Direct, path, None, None);
                }
            }
            Action::Variables(names) => self.out.variables.extend(names),
            Action::WaitTemplate(_) | Action::Other { .. } => {}
        }
        Vec::new()
    }

    // ─── Templates ──────────────────────────────────────────────────────────

    fn scan_templates(&mut self, value: &Value, path: &str, depth: usize, limit: usize) {
        if depth > limit {
            return;
        }
        match value {
            Value::String(s) if is_template(s) => {
                let refs = template_references(s, &self.out.rule_id, &self.out.rule_name, path);
                self.out.references.extend(refs);
                self.out.templates.push(TemplateField {
                    location: path.to_string(),
                    source: s.clone(),
                });
            }
            Value::Array(items) => {
                for (i, v) in items.iter().enumerate() {
                    self.scan_templates(v, &format!("{}[{}]", path, i), depth + 1, limit);
                }
            }
            Value::Object(map) => {
                for (k, v) in map {
                    self.scan_templates(v, &format!("{}.{}", path, k), depth + 1, limit);
                }
            }
            _ => {}
        }
    }
}

/// Resource references named by literal arguments inside a template.
///
/// Only well-formed identifiers are returned; malformed ones are left to the
/// template analyzer's identifier check.
pub fn template_references(
    source: &str,
    rule_id: &str,
    rule_name: &str,
    location: &str,
) -> Vec<Reference> {
    let make = |target: &str, state: Option<&str>, attribute: Option<&str>| Reference {
        rule_id: rule_id.to_string(),
        rule_name: rule_name.to_string(),
        target: target.to_string(),
        expected_state: state.map(str::to_string),
        expected_attribute: attribute.map(str::to_string),
        kind: ReferenceKind::TemplateDerived,
        location: location.to_string(),
    };

    let mut refs = Vec::new();
    let mut seen = BTreeSet::new();
    let mut push = |r: Reference| {
        let key = (
            r.target.clone(),
            r.expected_state.clone(),
            r.expected_attribute.clone(),
        );
        if seen.insert(key) {
            refs.push(r);
        }
    };

    for cap in TPL_IS_STATE_RE.captures_iter(source) {
        if ENTITY_ID_RE.is_match(&cap[1]) {
            push(make(&cap[1], Some(&cap[2]), None));
        }
    }
    for cap in TPL_STATE_ATTR_RE.captures_iter(source) {
        if ENTITY_ID_RE.is_match(&cap[1]) {
            push(make(&cap[1], None, Some(&cap[2])));
        }
    }
    for cap in TPL_STATES_CALL_RE.captures_iter(source) {
        if ENTITY_ID_RE.is_match(&cap[1]) {
            push(make(&cap[1], None, None));
        }
    }
    for cap in TPL_STATES_ATTR_ACCESS_RE.captures_iter(source) {
        let id = format!("{}.{}", &cap[1], &cap[2]);
        if ENTITY_ID_RE.is_match(&id) {
            push(make(&id, None, None));
        }
    }
    refs
}

/// Map a service name to the effect it has on its targets.
pub fn effect_for(service: &str) -> Option<Effect> {
    let (domain, name) = service.split_once('.')?;
    if matches!(domain, "scene" | "script" | "notify" | "persistent_notification") {
        return None;
    }
    match name {
        "turn_on" | "open_cover" | "open_valve" | "lock" | "start" | "media_play" => {
            Some(Effect::Activate)
        }
        "turn_off" | "close_cover" | "close_valve" | "unlock" | "stop" | "media_pause"
        | "media_stop" | "alarm_disarm" => Some(Effect::Deactivate),
        "toggle" | "media_play_pause" => Some(Effect::Toggle),
        n if n.starts_with("alarm_arm_") => Some(Effect::Activate),
        n if n.starts_with("set_") || n.starts_with("select_") => Some(Effect::SetValue),
        _ => None,
    }
}

/// Normalize `H:MM`, `HH:MM` or `HH:MM:SS` into `HH:MM:SS`.
pub fn normalize_time(value: &str) -> Option<String> {
    let cap = TIME_LITERAL_RE.captures(value.trim())?;
    let h: u32 = cap[1].parse().ok()?;
    let m: u32 = cap[2].parse().ok()?;
    let s: u32 = match cap.get(3) {
        Some(c) => c.as_str().parse().ok()?,
        None => 0,
    };
    if h > 23 || m > 59 || s > 59 {
        return None;
    }
    Some(format!("{:02}:{:02}:{:02}", h, m, s))
}
