//! Built-in per-domain knowledge: default state sets and which attributes
//! enumerate valid values for others.

/// Default valid states for a domain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DomainStates {
    pub domain: &'static str,
    pub states: &'static [&'static str],
}

/// States every resource can report regardless of domain.
pub static UNIVERSAL_STATES: &[&str] = &["unavailable", "unknown"];

const ON_OFF: &[&str] = &["on", "off"];

pub static DOMAIN_STATES: &[DomainStates] = &[
    DomainStates { domain: "automation", states: ON_OFF },
    DomainStates { domain: "binary_sensor", states: ON_OFF },
    DomainStates { domain: "fan", states: ON_OFF },
    DomainStates { domain: "humidifier", states: ON_OFF },
    DomainStates { domain: "input_boolean", states: ON_OFF },
    DomainStates { domain: "light", states: ON_OFF },
    DomainStates { domain: "remote", states: ON_OFF },
    DomainStates { domain: "schedule", states: ON_OFF },
    DomainStates { domain: "script", states: ON_OFF },
    DomainStates { domain: "siren", states: ON_OFF },
    DomainStates { domain: "switch", states: ON_OFF },
    DomainStates {
        domain: "alarm_control_panel",
        states: &[
            "disarmed",
            "armed_home",
            "armed_away",
            "armed_night",
            "armed_vacation",
            "armed_custom_bypass",
            "pending",
            "arming",
            "disarming",
            "triggered",
        ],
    },
    DomainStates {
        domain: "climate",
        states: &["off", "heat", "cool", "heat_cool", "auto", "dry", "fan_only"],
    },
    DomainStates {
        domain: "cover",
        states: &["open", "closed", "opening", "closing"],
    },
    DomainStates {
        domain: "device_tracker",
        states: &["home", "not_home"],
    },
    DomainStates {
        domain: "group",
        states: &[
            "on", "off", "home", "not_home", "open", "closed", "locked", "unlocked", "ok",
            "problem",
        ],
    },
    DomainStates {
        domain: "lawn_mower",
        states: &["mowing", "docked", "paused", "returning", "error"],
    },
    DomainStates {
        domain: "lock",
        states: &["locked", "unlocked", "locking", "unlocking", "jammed", "open", "opening"],
    },
    DomainStates {
        domain: "media_player",
        states: &["on", "off", "idle", "playing", "paused", "standby", "buffering"],
    },
    DomainStates {
        domain: "person",
        states: &["home", "not_home"],
    },
    DomainStates {
        domain: "sun",
        states: &["above_horizon", "below_horizon"],
    },
    DomainStates {
        domain: "timer",
        states: &["idle", "active", "paused"],
    },
    DomainStates {
        domain: "update",
        states: ON_OFF,
    },
    DomainStates {
        domain: "vacuum",
        states: &["cleaning", "docked", "idle", "paused", "returning", "error"],
    },
    DomainStates {
        domain: "valve",
        states: &["open", "closed", "opening", "closing"],
    },
    DomainStates {
        domain: "water_heater",
        states: &[
            "off",
            "eco",
            "electric",
            "gas",
            "heat_pump",
            "high_demand",
            "performance",
        ],
    },
    DomainStates {
        domain: "weather",
        states: &[
            "clear-night",
            "cloudy",
            "exceptional",
            "fog",
            "hail",
            "lightning",
            "lightning-rainy",
            "partlycloudy",
            "pouring",
            "rainy",
            "snowy",
            "snowy-rainy",
            "sunny",
            "windy",
            "windy-variant",
        ],
    },
];

/// Domains whose state is free-form text, a number, or a timestamp.
pub static FREE_FORM_DOMAINS: &[&str] = &[
    "counter",
    "date",
    "datetime",
    "event",
    "image",
    "input_datetime",
    "input_number",
    "input_text",
    "number",
    "sensor",
    "text",
    "time",
];

/// Domains whose location states also include every zone name.
pub static ZONE_AWARE_DOMAINS: &[&str] = &["device_tracker", "person"];

/// A list-valued attribute that enumerates valid states.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateListAttribute {
    pub domain: &'static str,
    pub list_attribute: &'static str,
}

pub static STATE_LIST_ATTRIBUTES: &[StateListAttribute] = &[
    StateListAttribute { domain: "climate", list_attribute: "hvac_modes" },
    StateListAttribute { domain: "input_select", list_attribute: "options" },
    StateListAttribute { domain: "select", list_attribute: "options" },
    StateListAttribute { domain: "water_heater", list_attribute: "operation_list" },
];

/// A list-valued attribute that enumerates valid values of another attribute.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttributeValueList {
    pub attribute: &'static str,
    pub list_attribute: &'static str,
}

pub static ATTRIBUTE_VALUE_LISTS: &[AttributeValueList] = &[
    AttributeValueList { attribute: "color_mode", list_attribute: "supported_color_modes" },
    AttributeValueList { attribute: "effect", list_attribute: "effect_list" },
    AttributeValueList { attribute: "fan_mode", list_attribute: "fan_modes" },
    AttributeValueList { attribute: "hvac_mode", list_attribute: "hvac_modes" },
    AttributeValueList { attribute: "preset_mode", list_attribute: "preset_modes" },
    AttributeValueList { attribute: "sound_mode", list_attribute: "sound_mode_list" },
    AttributeValueList { attribute: "source", list_attribute: "source_list" },
    AttributeValueList { attribute: "swing_mode", list_attribute: "swing_modes" },
];

/// The domain portion of an identifier (`light` for `light.kitchen`).
pub fn domain_of(target: &str) -> &str {
    target.split_once('.').map(|(d, _)| d).unwrap_or(target)
}

/// The object portion of an identifier (`kitchen` for `light.kitchen`).
pub fn object_of(target: &str) -> &str {
    target.split_once('.').map(|(_, o)| o).unwrap_or(target)
}

/// Look up the default state set for a domain.
pub fn default_states(domain: &str) -> Option<&'static [&'static str]> {
    DOMAIN_STATES
        .iter()
        .find(|e| e.domain == domain)
        .map(|e| e.states)
}

pub fn is_free_form_domain(domain: &str) -> bool {
    FREE_FORM_DOMAINS.contains(&domain)
}

pub fn state_list_attribute(domain: &str) -> Option<&'static str> {
    STATE_LIST_ATTRIBUTES
        .iter()
        .find(|e| e.domain == domain)
        .map(|e| e.list_attribute)
}

pub fn value_list_attribute(attribute: &str) -> Option<&'static str> {
    ATTRIBUTE_VALUE_LISTS
        .iter()
        .find(|e| e.attribute == attribute)
        .map(|e| e.list_attribute)
}
