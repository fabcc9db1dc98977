use proptest::prelude::*;
use rulescope::RuleDocument;
use rulescope::extract::Extractor;
use serde_json::{Map, Value, json};

/// Keys the extractor dispatches on, mixed with noise.
fn arb_key() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("condition".to_string()),
        Just("conditions".to_string()),
        Just("entity_id".to_string()),
        Just("state".to_string()),
        Just("choose".to_string()),
        Just("sequence".to_string()),
        Just("action".to_string()),
        Just("target".to_string()),
        Just("repeat".to_string()),
        Just("if".to_string()),
        Just("then".to_string()),
        "[a-z]{1,6}",
    ]
}

fn arb_leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(|n| json!(n)),
        Just(json!("light.kitchen")),
        Just(json!("{{ states('sensor.x') }}")),
        Just(json!("{% if %}")),
        Just(json!("state")),
        Just(json!("or")),
        "[a-z_.]{0,12}".prop_map(Value::String),
    ]
}

fn arb_value() -> impl Strategy<Value = Value> {
    arb_leaf().prop_recursive(6, 64, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::vec((arb_key(), inner), 0..4)
                .prop_map(|entries| Value::Object(entries.into_iter().collect::<Map<_, _>>())),
        ]
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    // Arbitrary shapes in every section never panic the extractor.
    #[test]
    fn extraction_never_panics(
        triggers in arb_value(),
        conditions in arb_value(),
        actions in arb_value(),
        depth in 1usize..8,
    ) {
        let doc = json!({
            "id": "fuzzed",
            "triggers": triggers,
            "conditions": conditions,
            "actions": actions,
        });
        let rule = RuleDocument::from_value(&doc, 0).unwrap();
        let extraction = Extractor::new(depth).extract(&rule);
        prop_assert_eq!(extraction.rule_id.as_str(), "fuzzed");
        for reference in &extraction.references {
            prop_assert!(!reference.target.is_empty());
            prop_assert!(!reference.location.is_empty());
        }
    }

    // Every reference location points into one of the three sections.
    #[test]
    fn locations_name_their_section(actions in arb_value()) {
        let doc = json!({"id": "r", "actions": actions});
        let rule = RuleDocument::from_value(&doc, 0).unwrap();
        let extraction = Extractor::new(20).extract(&rule);
        for reference in &extraction.references {
            prop_assert!(
                reference.location.starts_with("action[")
                    || reference.location.starts_with("condition[")
                    || reference.location.starts_with("trigger["),
                "unexpected location {}", reference.location
            );
        }
    }
}
