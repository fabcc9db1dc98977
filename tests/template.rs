use rulescope::template::{
    BinaryOp, CompareOp, Expr, Literal, Node, SetTarget, Template, parse,
};

fn output(src: &str) -> Expr {
    let tree = parse(src).expect("template should parse");
    match tree.body.as_slice() {
        [Node::Output(e)] => e.clone(),
        other => panic!("expected one output node, got {:?}", other),
    }
}

fn str_lit(s: &str) -> Expr {
    Expr::Literal(Literal::Str(s.to_string()))
}

// ─── Expressions ────────────────────────────────────────────────────────────

#[test]
fn plain_text_is_one_text_node() {
    let tree = parse("hello world").unwrap();
    assert_eq!(tree, Template { body: vec![Node::Text("hello world".into())] });
}

#[test]
fn accessor_call_with_literal_arguments() {
    let e = output("{{ is_state('light.desk', 'on') }}");
    let Expr::Call { func, args } = e else {
        panic!("expected a call");
    };
    assert_eq!(*func, Expr::Name("is_state".into()));
    assert_eq!(args.positional, vec![str_lit("light.desk"), str_lit("on")]);
    assert!(args.keyword.is_empty());
}

#[test]
fn filter_chain_with_arguments() {
    let e = output("{{ states('sensor.t') | float(0) | round(1) }}");
    let Expr::Filter { value, filter } = e else {
        panic!("expected a filter");
    };
    assert_eq!(filter.name, "round");
    assert_eq!(filter.args.positional, vec![Expr::Literal(Literal::Int(1))]);
    let Expr::Filter { filter: inner, .. } = *value else {
        panic!("expected a nested filter");
    };
    assert_eq!(inner.name, "float");
}

#[test]
fn keyword_and_splat_arguments() {
    let e = output("{{ x | replace('a', new='b') }}");
    let Expr::Filter { filter, .. } = e else { panic!() };
    assert_eq!(filter.args.positional.len(), 1);
    assert_eq!(filter.args.keyword[0].0, "new");
    assert!(!filter.args.is_dynamic());

    let e = output("{{ f(*items, **opts) }}");
    let Expr::Call { args, .. } = e else { panic!() };
    assert_eq!(args.splat.len(), 2);
    assert!(args.is_dynamic());
}

#[test]
fn tests_with_and_without_arguments() {
    let e = output("{{ x is not defined }}");
    let Expr::Test { test, negated, .. } = e else { panic!() };
    assert!(negated);
    assert_eq!(test.name, "defined");
    assert!(test.args.positional.is_empty());

    let e = output("{{ n is divisibleby 3 }}");
    let Expr::Test { test, .. } = e else { panic!() };
    assert_eq!(test.args.positional, vec![Expr::Literal(Literal::Int(3))]);

    let e = output("{{ v is defined and v > 1 }}");
    assert!(matches!(e, Expr::Binary { op: BinaryOp::And, .. }));
}

#[test]
fn comparisons_and_membership() {
    let e = output("{{ a not in ['x', 'y'] }}");
    let Expr::Compare { ops, .. } = e else { panic!() };
    assert_eq!(ops[0].0, CompareOp::NotIn);

    let e = output("{{ 1 < x <= 10 }}");
    let Expr::Compare { ops, .. } = e else { panic!() };
    assert_eq!(ops.iter().map(|(o, _)| *o).collect::<Vec<_>>(), vec![CompareOp::Lt, CompareOp::Le]);
}

#[test]
fn operator_precedence() {
    let e = output("{{ 1 + 2 * 3 }}");
    let Expr::Binary { op, right, .. } = e else { panic!() };
    assert_eq!(op, BinaryOp::Add);
    assert!(matches!(*right, Expr::Binary { op: BinaryOp::Mul, .. }));

    let e = output("{{ 7 // 2 ~ 'x' }}");
    assert!(matches!(e, Expr::Binary { op: BinaryOp::Concat, .. }));
}

#[test]
fn conditional_expression() {
    let e = output("{{ 'on' if is_state('x.y', 'on') else 'off' }}");
    let Expr::Conditional { then, otherwise, .. } = e else { panic!() };
    assert_eq!(*then, str_lit("on"));
    assert_eq!(otherwise.map(|b| *b), Some(str_lit("off")));
}

#[test]
fn literals_and_displays() {
    assert_eq!(output("{{ 1_000 }}"), Expr::Literal(Literal::Int(1000)));
    assert_eq!(output("{{ 2.5e1 }}"), Expr::Literal(Literal::Float(25.0)));
    assert_eq!(output("{{ True }}"), Expr::Literal(Literal::Bool(true)));
    assert_eq!(output("{{ none }}"), Expr::Literal(Literal::None));
    assert_eq!(output(r#"{{ 'it\'s' "!" }}"#), str_lit("it's!"));
    assert!(matches!(output("{{ {'a': 1, 'b': [2, 3]} }}"), Expr::Dict(p) if p.len() == 2));
    assert!(matches!(output("{{ (1, 2) }}"), Expr::Tuple(t) if t.len() == 2));
    assert!(matches!(output("{{ (1) }}"), Expr::Literal(Literal::Int(1))));
}

#[test]
fn attribute_subscript_and_slice() {
    let e = output("{{ states.light.kitchen.attributes['brightness'] }}");
    let Expr::Item { value, index } = e else { panic!() };
    assert_eq!(*index, str_lit("brightness"));
    assert!(matches!(*value, Expr::Attr { ref attr, .. } if attr == "attributes"));

    let e = output("{{ items[1:-1] }}");
    assert!(matches!(e, Expr::Slice { start: Some(_), stop: Some(_), step: None, .. }));
}

// ─── Statements ─────────────────────────────────────────────────────────────

#[test]
fn if_elif_else() {
    let tree = parse("{% if a %}1{% elif b %}2{% else %}3{% endif %}").unwrap();
    let [Node::If { branches, otherwise }] = tree.body.as_slice() else {
        panic!("expected an if node");
    };
    assert_eq!(branches.len(), 2);
    assert_eq!(otherwise, &vec![Node::Text("3".into())]);
}

#[test]
fn for_loop_with_filter_and_else() {
    let tree = parse(
        "{% for k, v in pairs if v > 0 %}{{ k }}{% else %}none{% endfor %}",
    )
    .unwrap();
    let [Node::For { targets, filter, otherwise, .. }] = tree.body.as_slice() else {
        panic!("expected a for node");
    };
    assert_eq!(targets, &vec!["k".to_string(), "v".to_string()]);
    assert!(filter.is_some());
    assert_eq!(otherwise.len(), 1);
}

#[test]
fn set_forms() {
    let tree = parse("{% set ns = namespace(n=0) %}{% set ns.n = ns.n + 1 %}").unwrap();
    let [Node::Set { targets: first, .. }, Node::Set { targets: second, .. }] =
        tree.body.as_slice()
    else {
        panic!("expected two set nodes");
    };
    assert_eq!(first, &vec![SetTarget::Name("ns".into())]);
    assert_eq!(
        second,
        &vec![SetTarget::Attr { object: "ns".into(), attr: "n".into() }]
    );

    let tree = parse("{% set msg | trim %} hi {% endset %}").unwrap();
    assert!(matches!(&tree.body[0], Node::SetBlock { filters, .. } if filters[0].name == "trim"));
}

#[test]
fn macro_with_and_filter_blocks() {
    let src = "{% macro greet(name, punct='!') %}{{ name }}{{ punct }}{% endmacro %}\
               {% with x = 1, y = 2 %}{{ x + y }}{% endwith %}\
               {% filter upper %}loud{% endfilter %}";
    let tree = parse(src).unwrap();
    assert_eq!(tree.body.len(), 3);
    let Node::Macro { params, .. } = &tree.body[0] else { panic!() };
    assert_eq!(params.len(), 2);
    assert!(params[1].default.is_some());
    assert!(matches!(&tree.body[1], Node::With { bindings, .. } if bindings.len() == 2));
    assert!(matches!(&tree.body[2], Node::FilterBlock { .. }));
}

#[test]
fn imports_include_do_and_loop_control() {
    let src = "{% import 'm.j2' as m %}{% from 'h.j2' import a, b as c with context %}\
               {% include 'x.j2' ignore missing %}{% do items.append(1) %}\
               {% for i in items %}{% if i %}{% break %}{% endif %}{% continue %}{% endfor %}";
    let tree = parse(src).unwrap();
    assert!(matches!(&tree.body[0], Node::Import { names, .. } if names == &vec!["m".to_string()]));
    assert!(matches!(&tree.body[1], Node::Import { names, .. } if names == &vec!["a".to_string(), "c".to_string()]));
    assert!(matches!(&tree.body[2], Node::Include(_)));
    assert!(matches!(&tree.body[3], Node::Do(_)));
}

#[test]
fn comments_raw_blocks_and_whitespace_control() {
    let tree = parse("a{# note #}b{% raw %}{{ not parsed }}{% endraw %}{{- x -}}").unwrap();
    assert_eq!(
        tree.body,
        vec![
            Node::Text("a".into()),
            Node::Text("b".into()),
            Node::Text("{{ not parsed }}".into()),
            Node::Output(Expr::Name("x".into())),
        ]
    );
}

// ─── Errors ─────────────────────────────────────────────────────────────────

#[test]
fn syntax_errors_report_position() {
    let err = parse("{{ states('x' }}").unwrap_err();
    assert_eq!(err.line, 1);
    assert!(err.column > 1);

    let err = parse("line one\n{% if x %}never closed").unwrap_err();
    assert!(err.message.contains("endif"), "{}", err.message);

    let err = parse("{{ 1 +  }}").unwrap_err();
    assert!(err.message.contains("unexpected"), "{}", err.message);
}

#[test]
fn structural_errors() {
    for src in [
        "{% endif %}",
        "{% frobnicate %}",
        "{{ x ",
        "{# open",
        "{{ 'unterminated }}",
        "{% for in x %}{% endfor %}",
        "{% raw %}no end",
        "{{ a ; b }}",
    ] {
        assert!(parse(src).is_err(), "{:?} should not parse", src);
    }
}

#[test]
fn pathological_nesting_is_rejected_not_overflowed() {
    let src = format!("{{{{ {}1{} }}}}", "(".repeat(500), ")".repeat(500));
    let err = parse(&src).unwrap_err();
    assert!(err.message.contains("nested too deeply"));
}
