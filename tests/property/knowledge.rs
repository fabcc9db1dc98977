use proptest::prelude::*;
use rulescope::KnowledgeBase;
use rulescope::history::HistorySnapshot;
use rulescope::sources::{MemorySnapshot, OpenDirectory};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

fn arb_target() -> impl Strategy<Value = String> {
    prop_oneof!["light.desk", "person.p", "climate.hall", "switch.fan"].prop_map(String::from)
}

fn arb_batch() -> impl Strategy<Value = HashMap<String, BTreeSet<String>>> {
    prop::collection::hash_map(
        arb_target(),
        prop::collection::btree_set("[a-z_]{1,8}", 0..4),
        0..4,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    // Valid-state sets only grow while history is absorbed and caches are
    // invalidated between reads.
    #[test]
    fn oracle_never_shrinks(batches in prop::collection::vec(arb_batch(), 1..5)) {
        let snapshot = MemorySnapshot::new()
            .with("light.desk", "on")
            .with("person.p", "home");
        let kb = KnowledgeBase::new(Arc::new(snapshot), Arc::new(OpenDirectory));
        let targets = ["light.desk", "person.p", "climate.hall", "switch.fan"];
        let mut previous: HashMap<&str, BTreeSet<String>> =
            targets.iter().map(|t| (*t, kb.valid_states_for(t))).collect();

        for observed in batches {
            kb.absorb_history(HistorySnapshot {
                ever_observed: observed.keys().cloned().collect(),
                observed,
            });
            for target in targets {
                let now = kb.valid_states_for(target);
                prop_assert!(
                    previous[target].is_subset(&now),
                    "{} lost states: {:?} -> {:?}", target, previous[target], now
                );
                previous.insert(target, now);
            }
            kb.invalidate();
        }
    }
}
