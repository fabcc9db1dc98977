//! Names the template environment provides: filters and tests with their
//! parameter lists, global functions and constants, and the contextual
//! variables the platform injects into rule templates.

/// Parameter list of a filter or test, not counting the value it applies to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    pub name: &'static str,
    /// Parameter names in positional order. Each may also be passed by keyword.
    pub params: &'static [&'static str],
    /// How many of the leading `params` are required.
    pub required: usize,
    /// Accepts any number of extra positional and keyword arguments.
    pub variadic: bool,
}

const fn fixed(name: &'static str, required: usize, params: &'static [&'static str]) -> Signature {
    Signature {
        name,
        params,
        required,
        variadic: false,
    }
}

const fn variadic(name: &'static str, required: usize, params: &'static [&'static str]) -> Signature {
    Signature {
        name,
        params,
        required,
        variadic: true,
    }
}

impl Signature {
    /// Check a call with `positional` positional arguments and the given
    /// keyword names. The error text completes "Filter 'x' ...".
    pub fn check(&self, positional: usize, keywords: &[&str]) -> Result<(), String> {
        let max = self.params.len();
        if !self.variadic && positional > max {
            return Err(format!(
                "takes at most {} argument{} ({} given)",
                max,
                if max == 1 { "" } else { "s" },
                positional
            ));
        }
        if !self.variadic
            && let Some(unknown) = keywords.iter().find(|k| !self.params.contains(*k))
        {
            return Err(format!("got an unexpected keyword argument '{}'", unknown));
        }
        for (i, param) in self.params.iter().enumerate().take(self.required) {
            if i >= positional && !keywords.contains(param) {
                return Err(format!("is missing required argument '{}'", param));
            }
        }
        Ok(())
    }
}

/// Filters: the template engine's built-ins plus the platform's extensions.
pub static FILTERS: &[Signature] = &[
    // Built-in
    fixed("abs", 0, &[]),
    fixed("attr", 1, &["name"]),
    fixed("batch", 1, &["linecount", "fill_with"]),
    fixed("capitalize", 0, &[]),
    fixed("center", 0, &["width"]),
    fixed("count", 0, &[]),
    fixed("d", 0, &["default_value", "boolean"]),
    fixed("default", 0, &["default_value", "boolean"]),
    fixed("dictsort", 0, &["case_sensitive", "by", "reverse"]),
    fixed("e", 0, &[]),
    fixed("escape", 0, &[]),
    fixed("filesizeformat", 0, &["binary"]),
    fixed("first", 0, &[]),
    fixed("forceescape", 0, &[]),
    variadic("format", 0, &[]),
    fixed("groupby", 1, &["attribute", "default", "case_sensitive"]),
    fixed("indent", 0, &["width", "first", "blank"]),
    fixed("items", 0, &[]),
    fixed("join", 0, &["d", "attribute"]),
    fixed("last", 0, &[]),
    fixed("length", 0, &[]),
    fixed("list", 0, &[]),
    fixed("lower", 0, &[]),
    variadic("map", 0, &[]),
    fixed("max", 0, &["case_sensitive", "attribute"]),
    fixed("min", 0, &["case_sensitive", "attribute"]),
    fixed("pprint", 0, &[]),
    fixed("random", 0, &[]),
    variadic("reject", 0, &[]),
    variadic("rejectattr", 0, &[]),
    fixed("replace", 2, &["old", "new", "count"]),
    fixed("reverse", 0, &[]),
    fixed("safe", 0, &[]),
    variadic("select", 0, &[]),
    variadic("selectattr", 0, &[]),
    fixed("slice", 1, &["slices", "fill_with"]),
    fixed("sort", 0, &["reverse", "case_sensitive", "attribute"]),
    fixed("string", 0, &[]),
    fixed("striptags", 0, &[]),
    fixed("sum", 0, &["attribute", "start"]),
    fixed("title", 0, &[]),
    fixed("tojson", 0, &["indent"]),
    fixed("trim", 0, &["chars"]),
    fixed("truncate", 0, &["length", "killwords", "end", "leeway"]),
    fixed("unique", 0, &["case_sensitive", "attribute"]),
    fixed("upper", 0, &[]),
    fixed("urlencode", 0, &[]),
    fixed("urlize", 0, &["trim_url_limit", "nofollow", "target", "rel"]),
    fixed("wordcount", 0, &[]),
    fixed("wordwrap", 0, &["width", "break_long_words", "wrapstring", "break_on_hyphens"]),
    fixed("xmlattr", 0, &["autospace"]),
    // Numbers and math
    fixed("float", 0, &["default"]),
    fixed("int", 0, &["default", "base"]),
    fixed("bool", 0, &["default"]),
    fixed("round", 0, &["precision", "method", "default"]),
    fixed("multiply", 1, &["ratio", "default"]),
    fixed("add", 1, &["amount", "default"]),
    fixed("log", 0, &["base", "default"]),
    fixed("sin", 0, &["default"]),
    fixed("cos", 0, &["default"]),
    fixed("tan", 0, &["default"]),
    fixed("asin", 0, &["default"]),
    fixed("acos", 0, &["default"]),
    fixed("atan", 0, &["default"]),
    fixed("atan2", 0, &["default"]),
    fixed("sqrt", 0, &["default"]),
    fixed("bitwise_and", 1, &["other", "default"]),
    fixed("bitwise_or", 1, &["other", "default"]),
    fixed("bitwise_xor", 1, &["other", "default"]),
    fixed("ord", 0, &[]),
    fixed("pack", 1, &["format_string"]),
    fixed("unpack", 1, &["format_string", "offset"]),
    variadic("average", 0, &[]),
    variadic("median", 0, &[]),
    variadic("statistical_mode", 0, &[]),
    // Time
    fixed("as_datetime", 0, &["default"]),
    fixed("as_local", 0, &[]),
    fixed("as_timestamp", 0, &["default"]),
    fixed("as_timedelta", 0, &[]),
    fixed("timestamp_custom", 0, &["format_string", "local", "default"]),
    fixed("timestamp_local", 0, &["default"]),
    fixed("timestamp_utc", 0, &["default"]),
    fixed("relative_time", 0, &[]),
    fixed("time_since", 0, &["precision"]),
    fixed("time_until", 0, &["precision"]),
    fixed("today_at", 0, &[]),
    // Strings, regex and encoding
    fixed("regex_match", 1, &["find", "ignorecase"]),
    fixed("regex_search", 1, &["find", "ignorecase"]),
    fixed("regex_replace", 0, &["find", "replace", "ignorecase"]),
    fixed("regex_findall", 1, &["find", "ignorecase"]),
    fixed("regex_findall_index", 1, &["find", "index", "ignorecase"]),
    fixed("slugify", 0, &["separator"]),
    fixed("base64_encode", 0, &[]),
    fixed("base64_decode", 0, &["encoding"]),
    fixed("md5", 0, &[]),
    fixed("sha1", 0, &[]),
    fixed("sha256", 0, &[]),
    fixed("sha512", 0, &[]),
    fixed("ordinal", 0, &[]),
    fixed("to_json", 0, &["ensure_ascii", "pretty_print", "sort_keys"]),
    fixed("from_json", 0, &["default"]),
    fixed("version", 0, &[]),
    // Collections and control
    fixed("iif", 0, &["if_true", "if_false", "if_none"]),
    fixed("contains", 1, &["value"]),
    fixed("flatten", 0, &["levels"]),
    fixed("shuffle", 0, &["seed"]),
    fixed("typeof", 0, &[]),
    variadic("combine", 0, &[]),
    variadic("apply", 1, &["macro"]),
    fixed("merge_response", 0, &["sort_by"]),
    fixed("is_defined", 0, &[]),
    // State and registry lookups
    fixed("states", 0, &["rounded", "with_unit"]),
    fixed("state_attr", 1, &["name"]),
    fixed("is_state", 1, &["state"]),
    fixed("is_state_attr", 2, &["name", "value"]),
    fixed("has_value", 0, &[]),
    fixed("state_translated", 0, &[]),
    fixed("expand", 0, &[]),
    variadic("closest", 0, &[]),
    variadic("distance", 0, &[]),
    fixed("is_hidden_entity", 0, &[]),
    fixed("area_id", 0, &[]),
    fixed("area_name", 0, &[]),
    fixed("area_entities", 0, &[]),
    fixed("area_devices", 0, &[]),
    fixed("floor_id", 0, &[]),
    fixed("floor_name", 0, &[]),
    fixed("floor_areas", 0, &[]),
    fixed("label_id", 0, &[]),
    fixed("label_name", 0, &[]),
    fixed("label_areas", 0, &[]),
    fixed("label_devices", 0, &[]),
    fixed("label_entities", 0, &[]),
    fixed("device_entities", 0, &[]),
    fixed("device_attr", 1, &["attr_name"]),
    fixed("is_device_attr", 2, &["attr_name", "attr_value"]),
    fixed("device_id", 0, &[]),
    fixed("integration_entities", 0, &[]),
];

/// Tests usable after `is`.
pub static TESTS: &[Signature] = &[
    // Built-in
    fixed("boolean", 0, &[]),
    fixed("callable", 0, &[]),
    fixed("defined", 0, &[]),
    fixed("divisibleby", 1, &["num"]),
    fixed("eq", 1, &["other"]),
    fixed("equalto", 1, &["other"]),
    fixed("escaped", 0, &[]),
    fixed("even", 0, &[]),
    fixed("false", 0, &[]),
    fixed("filter", 0, &[]),
    fixed("float", 0, &[]),
    fixed("ge", 1, &["other"]),
    fixed("gt", 1, &["other"]),
    fixed("greaterthan", 1, &["other"]),
    fixed("in", 1, &["seq"]),
    fixed("integer", 0, &[]),
    fixed("iterable", 0, &[]),
    fixed("le", 1, &["other"]),
    fixed("lower", 0, &[]),
    fixed("lt", 1, &["other"]),
    fixed("lessthan", 1, &["other"]),
    fixed("mapping", 0, &[]),
    fixed("ne", 1, &["other"]),
    fixed("none", 0, &[]),
    fixed("number", 0, &[]),
    fixed("odd", 0, &[]),
    fixed("sameas", 1, &["other"]),
    fixed("sequence", 0, &[]),
    fixed("string", 0, &[]),
    fixed("test", 0, &[]),
    fixed("true", 0, &[]),
    fixed("undefined", 0, &[]),
    fixed("upper", 0, &[]),
    // Platform
    fixed("match", 1, &["find", "ignorecase"]),
    fixed("search", 1, &["find", "ignorecase"]),
    fixed("contains", 1, &["value"]),
    fixed("datetime", 0, &[]),
    fixed("list", 0, &[]),
    fixed("set", 0, &[]),
    fixed("tuple", 0, &[]),
    fixed("is_number", 0, &[]),
    fixed("is_state", 1, &["state"]),
    fixed("is_state_attr", 2, &["name", "value"]),
    fixed("has_value", 0, &[]),
    fixed("is_hidden_entity", 0, &[]),
    fixed("is_device_attr", 2, &["attr_name", "attr_value"]),
    variadic("apply", 1, &["macro"]),
];

/// Global functions and constants.
pub static GLOBALS: &[&str] = &[
    // Built-in
    "range", "lipsum", "dict", "cycler", "joiner", "namespace",
    // State access
    "states", "is_state", "state_attr", "is_state_attr", "has_value", "state_translated",
    "expand", "closest", "distance", "is_hidden_entity",
    // Registries
    "areas", "area_id", "area_name", "area_entities", "area_devices", "floors", "floor_id",
    "floor_name", "floor_areas", "labels", "label_id", "label_name", "label_areas",
    "label_devices", "label_entities", "device_entities", "device_attr", "is_device_attr",
    "device_id", "integration_entities",
    // Time
    "now", "utcnow", "today_at", "as_datetime", "as_timestamp", "as_local", "as_timedelta",
    "strptime", "relative_time", "time_since", "time_until", "timedelta",
    // Math and conversion
    "float", "int", "bool", "log", "sin", "cos", "tan", "asin", "acos", "atan", "atan2", "sqrt",
    "e", "pi", "tau", "inf", "min", "max", "average", "median", "statistical_mode", "pack",
    "unpack", "bitwise_and", "bitwise_or", "bitwise_xor",
    // Misc
    "urlencode", "slugify", "iif", "version", "zip", "set", "typeof", "merge_response",
];

/// Variables the platform injects into rule templates.
pub static CONTEXT_NAMES: &[&str] = &["trigger", "this", "repeat", "wait", "context"];

/// Functions whose first argument is a resource identifier.
pub static STATE_ACCESSORS: &[&str] = &[
    "states",
    "is_state",
    "state_attr",
    "is_state_attr",
    "has_value",
    "state_translated",
];

pub fn lookup_filter(name: &str) -> Option<&'static Signature> {
    FILTERS.iter().find(|s| s.name == name)
}

pub fn lookup_test(name: &str) -> Option<&'static Signature> {
    TESTS.iter().find(|s| s.name == name)
}

pub fn is_global(name: &str) -> bool {
    GLOBALS.contains(&name)
}

pub fn is_context_name(name: &str) -> bool {
    CONTEXT_NAMES.contains(&name)
}

pub fn is_state_accessor(name: &str) -> bool {
    STATE_ACCESSORS.contains(&name)
}
