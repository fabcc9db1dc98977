use proptest::prelude::*;
use rulescope::template::parse;

fn arb_fragment() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("{{ ".to_string()),
        Just(" }}".to_string()),
        Just("{% if x %}".to_string()),
        Just("{% endif %}".to_string()),
        Just("{% for i in y %}".to_string()),
        Just("{% endfor %}".to_string()),
        Just("{# c #}".to_string()),
        Just("| round(1)".to_string()),
        Just("states('light.a')".to_string()),
        Just("(".to_string()),
        Just(")".to_string()),
        Just("'".to_string()),
        "[a-z0-9 +*.,]{0,6}",
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    // Any mix of template fragments parses or fails cleanly.
    #[test]
    fn parser_never_panics(parts in prop::collection::vec(arb_fragment(), 0..16)) {
        let _ = parse(&parts.concat());
    }

    #[test]
    fn plain_text_always_parses(text in "[^{}%#]{0,64}") {
        prop_assert!(parse(&text).is_ok());
    }

    #[test]
    fn deep_parentheses_fail_without_overflow(depth in 65usize..400) {
        let source = format!("{{{{ {}1{} }}}}", "(".repeat(depth), ")".repeat(depth));
        prop_assert!(parse(&source).is_err());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn long_filter_chains_fail_without_overflow(length in 3000usize..6000) {
        let source = format!("{{{{ states('light.a'){} }}}}", "|trim".repeat(length));
        let err = parse(&source).unwrap_err();
        prop_assert!(err.message.contains("chain too long"), "{}", err.message);
    }

    #[test]
    fn long_subscript_chains_fail_without_overflow(length in 3000usize..6000) {
        let source = format!("{{{{ x{} }}}}", "[0]".repeat(length));
        prop_assert!(parse(&source).is_err());
    }

    #[test]
    fn long_operator_chains_fail_without_overflow(length in 3000usize..6000) {
        let source = format!("{{{{ 1{} }}}}", " ~ 1".repeat(length));
        prop_assert!(parse(&source).is_err());
    }

    #[test]
    fn moderate_chains_still_parse(length in 1usize..100) {
        let source = format!(
            "{{{{ states('light.a'){}{} + 1{} }}}}",
            "[0]".repeat(length),
            "|trim".repeat(length),
            " + 1".repeat(length),
        );
        prop_assert!(parse(&source).is_ok());
    }
}
