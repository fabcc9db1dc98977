use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};

use crate::enums::*;
use crate::error::ShapeError;

// ─── Rule document ───────────────────────────────────────────────────────────

/// One automation rule as written by its author.
///
/// Trigger, condition and action nodes are kept as raw values and lowered
/// into [`Trigger`], [`Condition`] and [`Action`] one node at a time by the
/// extractor, so a malformed node never prevents its siblings from being
/// analyzed.
#[derive(Clone, Debug, Serialize)]
pub struct RuleDocument {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub triggers: Vec<Value>,
    pub conditions: Vec<Value>,
    pub actions: Vec<Value>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub variables: Map<String, Value>,
}

impl RuleDocument {
    /// Human-readable name: the alias when present, the id otherwise.
    pub fn name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.id)
    }

    /// Build a rule from a mapping. Rules without an `id` get `rule-{index}`.
    pub fn from_value(value: &Value, index: usize) -> Result<RuleDocument, ShapeError> {
        let obj = as_mapping(value)?;

        let id = match obj.get("id") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => format!("rule-{}", index + 1),
        };

        Ok(RuleDocument {
            id,
            alias: obj.get("alias").and_then(scalar_string),
            description: obj.get("description").and_then(scalar_string),
            triggers: list_under(obj, &["triggers", "trigger"]),
            conditions: list_under(obj, &["conditions", "condition"]),
            actions: list_under(obj, &["actions", "action"]),
            variables: obj
                .get("variables")
                .and_then(|v| v.as_object())
                .cloned()
                .unwrap_or_default(),
        })
    }
}

impl<'de> Deserialize<'de> for RuleDocument {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        RuleDocument::from_value(&value, 0).map_err(serde::de::Error::custom)
    }
}

// ─── Trigger ─────────────────────────────────────────────────────────────────

/// A trigger node lowered into its known shape.
#[derive(Clone, Debug, PartialEq)]
pub enum Trigger {
    State {
        entity_ids: Vec<String>,
        attribute: Option<String>,
        to: Vec<String>,
        from: Vec<String>,
    },
    NumericState {
        entity_ids: Vec<String>,
        attribute: Option<String>,
    },
    /// `at` holds clock literals and/or entity ids (`input_datetime.wake`).
    Time {
        at: Vec<String>,
    },
    Sun {
        event: String,
        offset: Option<String>,
    },
    TimePattern,
    Template {
        value_template: String,
    },
    Zone {
        entity_ids: Vec<String>,
        zone: String,
    },
    Device {
        device_id: String,
        entity_ids: Vec<String>,
    },
    Unrecognized {
        platform: String,
    },
}

impl Trigger {
    pub fn from_value(value: &Value) -> Result<Trigger, ShapeError> {
        let obj = as_mapping(value)?;
        let platform = obj
            .get("platform")
            .or_else(|| obj.get("trigger"))
            .and_then(|v| v.as_str())
            .ok_or(ShapeError::MissingKey { key: "platform" })?;

        let trigger = match platform {
            "state" => Trigger::State {
                entity_ids: required_ids(obj, "entity_id")?,
                attribute: obj.get("attribute").and_then(scalar_string),
                to: obj.get("to").map(state_values).unwrap_or_default(),
                from: obj.get("from").map(state_values).unwrap_or_default(),
            },
            "numeric_state" => Trigger::NumericState {
                entity_ids: required_ids(obj, "entity_id")?,
                attribute: obj.get("attribute").and_then(scalar_string),
            },
            "time" => Trigger::Time {
                at: obj
                    .get("at")
                    .map(string_list)
                    .ok_or(ShapeError::MissingKey { key: "at" })?,
            },
            "sun" => Trigger::Sun {
                event: obj
                    .get("event")
                    .and_then(|v| v.as_str())
                    .ok_or(ShapeError::MissingKey { key: "event" })?
                    .to_string(),
                offset: obj.get("offset").and_then(scalar_string),
            },
            "time_pattern" => Trigger::TimePattern,
            "template" => Trigger::Template {
                value_template: obj
                    .get("value_template")
                    .and_then(|v| v.as_str())
                    .ok_or(ShapeError::MissingKey {
                        key: "value_template",
                    })?
                    .to_string(),
            },
            "zone" => Trigger::Zone {
                entity_ids: required_ids(obj, "entity_id")?,
                zone: obj
                    .get("zone")
                    .and_then(|v| v.as_str())
                    .ok_or(ShapeError::MissingKey { key: "zone" })?
                    .to_string(),
            },
            "device" => Trigger::Device {
                device_id: required_str(obj, "device_id")?,
                entity_ids: obj.get("entity_id").map(string_list).unwrap_or_default(),
            },
            other => Trigger::Unrecognized {
                platform: other.to_string(),
            },
        };
        Ok(trigger)
    }
}

// ─── Condition ───────────────────────────────────────────────────────────────

/// A condition node lowered into its known shape.
///
/// Group conditions keep their children as raw values; the extractor lowers
/// them with its depth counter.
#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    State {
        entity_ids: Vec<String>,
        attribute: Option<String>,
        states: Vec<String>,
        /// `match: any` turns the entity list into a disjunction.
        match_any: bool,
    },
    NumericState {
        entity_ids: Vec<String>,
        attribute: Option<String>,
    },
    Template {
        value_template: String,
    },
    And(Vec<Value>),
    Or(Vec<Value>),
    Not(Vec<Value>),
    Zone {
        entity_ids: Vec<String>,
        zones: Vec<String>,
    },
    Device {
        device_id: String,
        entity_ids: Vec<String>,
    },
    /// Entity ids used as `after`/`before` bounds.
    Time {
        entity_refs: Vec<String>,
    },
    Sun,
    Trigger,
    Unrecognized {
        kind: String,
    },
}

impl Condition {
    pub fn from_value(value: &Value) -> Result<Condition, ShapeError> {
        if let Value::String(s) = value {
            return Ok(Condition::Template {
                value_template: s.clone(),
            });
        }
        let obj = as_mapping(value)?;

        // Shorthand groups: `- or: [...]`
        if !obj.contains_key("condition") {
            for key in ["and", "or", "not"] {
                if let Some(children) = obj.get(key) {
                    return Ok(group(key, as_list(children)));
                }
            }
            return Err(ShapeError::MissingKey { key: "condition" });
        }

        let kind = obj
            .get("condition")
            .and_then(|v| v.as_str())
            .ok_or(ShapeError::WrongType {
                key: "condition",
                expected: "a string",
            })?;

        let condition = match kind {
            "state" => Condition::State {
                entity_ids: required_ids(obj, "entity_id")?,
                attribute: obj.get("attribute").and_then(scalar_string),
                states: obj
                    .get("state")
                    .map(state_values)
                    .ok_or(ShapeError::MissingKey { key: "state" })?,
                match_any: obj.get("match").and_then(|v| v.as_str()) == Some("any"),
            },
            "numeric_state" => Condition::NumericState {
                entity_ids: required_ids(obj, "entity_id")?,
                attribute: obj.get("attribute").and_then(scalar_string),
            },
            "template" => Condition::Template {
                value_template: required_str(obj, "value_template")?,
            },
            "and" | "or" | "not" => group(
                kind,
                obj.get("conditions").map(as_list).unwrap_or_default(),
            ),
            "zone" => Condition::Zone {
                entity_ids: required_ids(obj, "entity_id")?,
                zones: obj.get("zone").map(string_list).unwrap_or_default(),
            },
            "device" => Condition::Device {
                device_id: required_str(obj, "device_id")?,
                entity_ids: obj.get("entity_id").map(string_list).unwrap_or_default(),
            },
            "time" => Condition::Time {
                entity_refs: ["after", "before"]
                    .iter()
                    .filter_map(|k| obj.get(*k).and_then(|v| v.as_str()))
                    .filter(|s| s.contains('.'))
                    .map(|s| s.to_string())
                    .collect(),
            },
            "sun" => Condition::Sun,
            "trigger" => Condition::Trigger,
            other => Condition::Unrecognized {
                kind: other.to_string(),
            },
        };
        Ok(condition)
    }
}

fn group(kind: &str, children: Vec<Value>) -> Condition {
    match kind {
        "and" => Condition::And(children),
        "or" => Condition::Or(children),
        _ => Condition::Not(children),
    }
}

// ─── Action ──────────────────────────────────────────────────────────────────

/// One option of a `choose` block.
#[derive(Clone, Debug, PartialEq)]
pub struct ChooseOption {
    pub conditions: Vec<Value>,
    pub sequence: Vec<Value>,
}

/// An action node lowered into its known shape.
#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    Call {
        service: String,
        entity_ids: Vec<String>,
        device_ids: Vec<String>,
        area_ids: Vec<String>,
    },
    Scene {
        scene: String,
    },
    Choose {
        options: Vec<ChooseOption>,
        default: Vec<Value>,
    },
    If {
        conditions: Vec<Value>,
        then: Vec<Value>,
        otherwise: Vec<Value>,
    },
    Repeat {
        while_conditions: Vec<Value>,
        until_conditions: Vec<Value>,
        sequence: Vec<Value>,
    },
    Parallel(Vec<Value>),
    Sequence(Vec<Value>),
    WaitForTrigger(Vec<Value>),
    WaitTemplate(String),
    /// An inline condition step; the node itself is the condition.
    Condition(Value),
    Device {
        device_id: String,
        entity_ids: Vec<String>,
    },
    Variables(Vec<String>),
    Other {
        kind: String,
    },
}

impl Action {
    pub fn from_value(value: &Value) -> Result<Action, ShapeError> {
        let obj = as_mapping(value)?;

        if let Some(choose) = obj.get("choose") {
            let mut options = Vec::new();
            for option in as_list(choose) {
                let opt = as_mapping(&option)?;
                options.push(ChooseOption {
                    conditions: opt.get("conditions").map(as_list).unwrap_or_default(),
                    sequence: opt.get("sequence").map(as_list).unwrap_or_default(),
                });
            }
            return Ok(Action::Choose {
                options,
                default: obj.get("default").map(as_list).unwrap_or_default(),
            });
        }

        if let Some(conditions) = obj.get("if") {
            return Ok(Action::If {
                conditions: as_list(conditions),
                then: obj
                    .get("then")
                    .map(as_list)
                    .ok_or(ShapeError::MissingKey { key: "then" })?,
                otherwise: obj.get("else").map(as_list).unwrap_or_default(),
            });
        }

        if let Some(repeat) = obj.get("repeat") {
            let rep = as_mapping(repeat)?;
            return Ok(Action::Repeat {
                while_conditions: rep.get("while").map(as_list).unwrap_or_default(),
                until_conditions: rep.get("until").map(as_list).unwrap_or_default(),
                sequence: rep
                    .get("sequence")
                    .map(as_list)
                    .ok_or(ShapeError::MissingKey { key: "sequence" })?,
            });
        }

        if let Some(branches) = obj.get("parallel") {
            return Ok(Action::Parallel(as_list(branches)));
        }
        if let Some(steps) = obj.get("sequence") {
            return Ok(Action::Sequence(as_list(steps)));
        }
        if let Some(triggers) = obj.get("wait_for_trigger") {
            return Ok(Action::WaitForTrigger(as_list(triggers)));
        }
        if let Some(template) = obj.get("wait_template") {
            return Ok(Action::WaitTemplate(
                template
                    .as_str()
                    .ok_or(ShapeError::WrongType {
                        key: "wait_template",
                        expected: "a string",
                    })?
                    .to_string(),
            ));
        }
        if obj.contains_key("condition") {
            return Ok(Action::Condition(value.clone()));
        }

        if let Some(service) = obj.get("action").or_else(|| obj.get("service")) {
            let service = service.as_str().ok_or(ShapeError::WrongType {
                key: "action",
                expected: "a string",
            })?;
            let target = obj.get("target").and_then(|v| v.as_object());
            let data = obj.get("data").and_then(|v| v.as_object());
            let collect = |key: &str| -> Vec<String> {
                let mut ids = Vec::new();
                for source in [Some(obj), target, data].into_iter().flatten() {
                    if let Some(v) = source.get(key) {
                        ids.extend(string_list(v));
                    }
                }
                ids
            };
            return Ok(Action::Call {
                service: service.to_string(),
                entity_ids: collect("entity_id"),
                device_ids: collect("device_id"),
                area_ids: collect("area_id"),
            });
        }

        if let Some(scene) = obj.get("scene") {
            return Ok(Action::Scene {
                scene: scene
                    .as_str()
                    .ok_or(ShapeError::WrongType {
                        key: "scene",
                        expected: "a string",
                    })?
                    .to_string(),
            });
        }

        if obj.contains_key("device_id") && obj.contains_key("domain") {
            return Ok(Action::Device {
                device_id: required_str(obj, "device_id")?,
                entity_ids: obj.get("entity_id").map(string_list).unwrap_or_default(),
            });
        }

        if let Some(vars) = obj.get("variables").and_then(|v| v.as_object()) {
            return Ok(Action::Variables(vars.keys().cloned().collect()));
        }

        let kind = obj
            .keys()
            .find(|k| !matches!(k.as_str(), "alias" | "enabled" | "continue_on_error"))
            .cloned()
            .unwrap_or_else(|| "empty".to_string());
        Ok(Action::Other { kind })
    }
}

// ─── Analysis records ────────────────────────────────────────────────────────

/// A single pointer from a rule into the outside world.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub rule_id: String,
    pub rule_name: String,
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_attribute: Option<String>,
    pub kind: ReferenceKind,
    pub location: String,
}

/// A positive requirement that `target` be in one of `required` states.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionInfo {
    pub target: String,
    pub required: BTreeSet<String>,
    pub location: String,
}

/// Normalized summary of one trigger (one per watched target).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerInfo {
    pub kind: TriggerKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// States that make a state trigger fire. Empty means "any change".
    pub fires_on: BTreeSet<String>,
    /// Clock literals (`HH:MM:SS`) for time-of-day triggers. Empty when any
    /// `at` value is not a literal.
    pub at: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    pub location: String,
}

/// An action that changes a target, with the guards in effect at that point.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetAction {
    pub rule_id: String,
    pub rule_name: String,
    pub target: String,
    pub effect: Effect,
    pub guards: Vec<ConditionInfo>,
    pub location: String,
}

/// A template-valued string found somewhere in a rule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateField {
    pub location: String,
    pub source: String,
}

// ─── Issues ──────────────────────────────────────────────────────────────────

/// The identity of an issue, used for deduplication and dismissal.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IssueKey {
    pub rule_id: String,
    pub target: String,
    pub location: String,
    pub message: String,
}

/// A defect found in a rule.
///
/// Equality and hashing consider only the [`IssueKey`] fields.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub kind: IssueKind,
    pub severity: Severity,
    pub rule_id: String,
    pub rule_name: String,
    pub target: String,
    pub location: String,
    pub message: String,
    /// The offending value for state and attribute-value issues.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub found_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<ConfidenceTier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_values: Option<Vec<String>>,
}

impl ValidationIssue {
    pub fn key(&self) -> IssueKey {
        IssueKey {
            rule_id: self.rule_id.clone(),
            target: self.target.clone(),
            location: self.location.clone(),
            message: self.message.clone(),
        }
    }

    /// Start an issue about `reference`; the caller fills in the rest.
    pub(crate) fn for_reference(
        reference: &Reference,
        kind: IssueKind,
        severity: Severity,
        message: String,
    ) -> Self {
        ValidationIssue {
            kind,
            severity,
            rule_id: reference.rule_id.clone(),
            rule_name: reference.rule_name.clone(),
            target: reference.target.clone(),
            location: reference.location.clone(),
            message,
            found_value: None,
            suggestion: None,
            confidence: None,
            valid_values: None,
        }
    }
}

impl PartialEq for ValidationIssue {
    fn eq(&self, other: &Self) -> bool {
        self.rule_id == other.rule_id
            && self.target == other.target
            && self.location == other.location
            && self.message == other.message
    }
}

impl Eq for ValidationIssue {}

impl Hash for ValidationIssue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rule_id.hash(state);
        self.target.hash(state);
        self.location.hash(state);
        self.message.hash(state);
    }
}

/// Two rules racing to apply opposite effects to one target.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub target: String,
    pub rule_a_id: String,
    pub rule_a_name: String,
    pub rule_b_id: String,
    pub rule_b_name: String,
    pub effect_a: Effect,
    pub effect_b: Effect,
    pub severity: Severity,
    pub explanation: String,
}

impl Conflict {
    /// Render as an issue attached to rule A, for the issue feed.
    pub fn to_issue(&self) -> ValidationIssue {
        ValidationIssue {
            kind: IssueKind::Conflict,
            severity: self.severity,
            rule_id: self.rule_a_id.clone(),
            rule_name: self.rule_a_name.clone(),
            target: self.target.clone(),
            location: format!("conflict:{}", self.rule_b_id),
            message: self.explanation.clone(),
            found_value: None,
            suggestion: None,
            confidence: Some(ConfidenceTier::Medium),
            valid_values: None,
        }
    }
}

/// A proposed fix for an issue.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub description: String,
    /// In `[0, 1]`.
    pub confidence: f64,
    pub replacement: String,
}

// ─── Value helpers ───────────────────────────────────────────────────────────

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}

pub(crate) fn as_mapping(value: &Value) -> Result<&Map<String, Value>, ShapeError> {
    value.as_object().ok_or(ShapeError::NotAMapping {
        found: value_kind(value),
    })
}

/// A list-valued field; a lone scalar or mapping counts as a one-element list.
pub(crate) fn as_list(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    }
}

fn list_under(obj: &Map<String, Value>, keys: &[&str]) -> Vec<Value> {
    keys.iter()
        .find_map(|k| obj.get(*k))
        .map(as_list)
        .unwrap_or_default()
}

/// Render a scalar the way the platform compares states: booleans are
/// `on`/`off`, numbers use their plain decimal form.
pub(crate) fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(true) => Some("on".to_string()),
        Value::Bool(false) => Some("off".to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn state_values(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(scalar_string).collect(),
        other => scalar_string(other).into_iter().collect(),
    }
}

/// Identifier lists: a string (optionally comma separated) or a list of strings.
pub(crate) fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) if s.contains("{{") || s.contains("{%") => vec![s.trim().to_string()],
        Value::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Value::Array(items) => items.iter().flat_map(string_list).collect(),
        _ => Vec::new(),
    }
}

fn required_ids(obj: &Map<String, Value>, key: &'static str) -> Result<Vec<String>, ShapeError> {
    let ids = obj
        .get(key)
        .map(string_list)
        .ok_or(ShapeError::MissingKey { key })?;
    if ids.is_empty() {
        return Err(ShapeError::WrongType {
            key,
            expected: "a non-empty id or list of ids",
        });
    }
    Ok(ids)
}

fn required_str(obj: &Map<String, Value>, key: &'static str) -> Result<String, ShapeError> {
    match obj.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(ShapeError::WrongType {
            key,
            expected: "a string",
        }),
        None => Err(ShapeError::MissingKey { key }),
    }
}

/// True when a string contains template markup.
pub fn is_template(s: &str) -> bool {
    s.contains("{{") || s.contains("{%") || s.contains("{#")
}
