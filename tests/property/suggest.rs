use proptest::prelude::*;
use rulescope::suggest::{fuzzy_match, similar_target, synonym_for};
use std::collections::BTreeSet;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn fuzzy_result_is_from_pool_and_above_threshold(
        candidate in "[a-z_]{1,10}",
        pool in prop::collection::vec("[a-z_]{1,10}", 0..6),
        threshold in 0.0f64..=1.0,
    ) {
        if let Some((best, score)) = fuzzy_match(&candidate, pool.iter(), threshold) {
            prop_assert!(pool.contains(&best));
            prop_assert!(best != candidate);
            prop_assert!(score >= threshold && score <= 1.0);
        }
    }

    // Disjoint alphabets share no characters, so nothing clears a positive bar.
    #[test]
    fn disjoint_strings_get_no_suggestion(
        candidate in "[a-m]{4,10}",
        pool in prop::collection::vec("[n-z]{4,10}", 1..6),
    ) {
        prop_assert!(fuzzy_match(&candidate, pool.iter(), 0.1).is_none());
    }

    #[test]
    fn similar_target_keeps_the_domain(
        object in "[a-z]{3,8}",
        known in prop::collection::vec(("(light|switch)", "[a-z]{3,8}"), 0..6),
    ) {
        let known: Vec<String> = known.into_iter().map(|(d, o)| format!("{}.{}", d, o)).collect();
        let target = format!("light.{}", object);
        if let Some((found, _)) = similar_target(&target, known.iter(), 0.5) {
            prop_assert!(found.starts_with("light."));
            prop_assert!(known.contains(&found));
        }
    }

    #[test]
    fn synonyms_only_name_valid_states(
        word in "[a-z_]{1,8}",
        valid in prop::collection::btree_set(prop_oneof!["on", "off", "home", "not_home", "open"], 0..5),
    ) {
        let valid: BTreeSet<String> = valid.into_iter().collect();
        if let Some(canonical) = synonym_for(&word, &valid) {
            prop_assert!(valid.contains(&canonical));
        }
    }
}
