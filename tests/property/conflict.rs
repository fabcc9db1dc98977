use proptest::prelude::*;
use rulescope::conflict::{mutually_exclusive, rules_overlap, triggers_overlap};
use rulescope::{ConditionInfo, TriggerInfo, TriggerKind};
use std::collections::BTreeSet;

fn arb_states() -> impl Strategy<Value = BTreeSet<String>> {
    prop::collection::btree_set(prop_oneof!["on", "off", "home", "not_home"], 0..3)
        .prop_map(|s| s.into_iter().map(String::from).collect())
}

fn arb_target() -> impl Strategy<Value = String> {
    prop_oneof!["light.a", "light.b", "person.p"].prop_map(String::from)
}

fn arb_trigger() -> impl Strategy<Value = TriggerInfo> {
    (
        prop_oneof![
            Just(TriggerKind::State),
            Just(TriggerKind::TimeOfDay),
            Just(TriggerKind::Sun),
            Just(TriggerKind::Other),
        ],
        proptest::option::of(arb_target()),
        arb_states(),
        prop::collection::btree_set(prop_oneof!["07:00:00", "22:30:00"], 0..2),
        proptest::option::of(prop_oneof!["sunrise", "sunset"]),
    )
        .prop_map(|(kind, target, fires_on, at, event)| TriggerInfo {
            kind,
            target,
            fires_on,
            at: at.into_iter().map(String::from).collect(),
            event: event.map(String::from),
            location: "trigger[0]".to_string(),
        })
}

fn arb_guard() -> impl Strategy<Value = ConditionInfo> {
    (arb_target(), arb_states()).prop_map(|(target, required)| ConditionInfo {
        target,
        required,
        location: "condition[0]".to_string(),
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn trigger_overlap_is_symmetric(a in arb_trigger(), b in arb_trigger()) {
        prop_assert_eq!(triggers_overlap(&a, &b), triggers_overlap(&b, &a));
    }

    #[test]
    fn trigger_overlaps_itself(a in arb_trigger()) {
        prop_assert!(triggers_overlap(&a, &a));
    }

    #[test]
    fn rule_overlap_is_symmetric(
        a in prop::collection::vec(arb_trigger(), 0..3),
        b in prop::collection::vec(arb_trigger(), 0..3),
    ) {
        prop_assert_eq!(rules_overlap(&a, &b), rules_overlap(&b, &a));
    }

    #[test]
    fn exclusivity_is_symmetric(
        a in prop::collection::vec(arb_guard(), 0..3),
        b in prop::collection::vec(arb_guard(), 0..3),
    ) {
        prop_assert_eq!(mutually_exclusive(&a, &b), mutually_exclusive(&b, &a));
    }
}
