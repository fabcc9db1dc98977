//! Closed enumerations used throughout the analyzer.
//!
//! Open-ended vocabularies (domains, service names, trigger platforms the
//! analyzer does not model) stay as strings.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What a [`Reference`](crate::types::Reference) points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    /// A resource named directly in a rule field (`entity_id: light.kitchen`).
    Direct,
    Device,
    Area,
    Zone,
    /// The service a call action invokes (`light.turn_on`).
    ServiceTarget,
    /// A resource named inside an embedded template.
    TemplateDerived,
}

/// Effect an action has on its target, as far as conflict detection cares.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    Activate,
    Deactivate,
    Toggle,
    SetValue,
}

impl Effect {
    /// True for the one pair of effects the conflict detector reports.
    pub fn opposes(self, other: Effect) -> bool {
        matches!(
            (self, other),
            (Effect::Activate, Effect::Deactivate) | (Effect::Deactivate, Effect::Activate)
        )
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Effect::Activate => "turns on",
            Effect::Deactivate => "turns off",
            Effect::Toggle => "toggles",
            Effect::SetValue => "sets",
        };
        f.write_str(s)
    }
}

/// Normalized trigger category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    State,
    TimeOfDay,
    Sun,
    Periodic,
    Other,
}

/// Issue severity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

/// How strongly the evidence backs an issue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTier {
    High,
    Medium,
}

/// Classification of a detected defect.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    EntityNotFound,
    EntityRemoved,
    InvalidState,
    CaseMismatch,
    AttributeNotFound,
    InvalidAttributeValue,
    DeviceNotFound,
    AreaNotFound,
    ZoneNotFound,
    ServiceNotFound,
    ImpossibleCondition,
    Conflict,
    TemplateSyntaxError,
    TemplateInvalidArguments,
    TemplateUnknownFilter,
    TemplateUnknownTest,
    TemplateUnknownVariable,
    TemplateInvalidEntityId,
}
