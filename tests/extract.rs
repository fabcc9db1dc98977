mod common;

use common::rule;
use rulescope::extract::{Extractor, effect_for, normalize_time, template_references};
use rulescope::{Effect, ReferenceKind, TriggerKind, extract};

fn targets(extraction: &rulescope::Extraction, kind: ReferenceKind) -> Vec<String> {
    extraction
        .references
        .iter()
        .filter(|r| r.kind == kind)
        .map(|r| r.target.clone())
        .collect()
}

// ─── Triggers ───────────────────────────────────────────────────────────────

#[test]
fn state_trigger_yields_reference_per_expected_state() {
    let r = rule(
        r#"
id: porch
triggers:
  - trigger: state
    entity_id: binary_sensor.porch_motion
    from: "off"
    to: "on"
actions: []
"#,
    );
    let ex = extract(&r);
    let states: Vec<_> = ex
        .references
        .iter()
        .filter(|r| r.target == "binary_sensor.porch_motion")
        .map(|r| r.expected_state.clone())
        .collect();
    assert_eq!(states, vec![Some("on".to_string()), Some("off".to_string())]);
    assert!(ex.references.iter().all(|r| r.location == "trigger[0]"));

    assert_eq!(ex.triggers.len(), 1);
    let t = &ex.triggers[0];
    assert_eq!(t.kind, TriggerKind::State);
    assert_eq!(t.target.as_deref(), Some("binary_sensor.porch_motion"));
    assert_eq!(t.fires_on.iter().collect::<Vec<_>>(), vec!["on"]);
}

#[test]
fn state_trigger_with_entity_list_summarizes_each_target() {
    let r = rule(
        r#"
triggers:
  - platform: state
    entity_id:
      - light.a
      - light.b
"#,
    );
    let ex = extract(&r);
    assert_eq!(targets(&ex, ReferenceKind::Direct), vec!["light.a", "light.b"]);
    assert_eq!(ex.triggers.len(), 2);
    assert!(ex.triggers.iter().all(|t| t.fires_on.is_empty()));
}

#[test]
fn attribute_trigger_has_no_fires_on_set() {
    let r = rule(
        r#"
triggers:
  - trigger: state
    entity_id: climate.hall
    attribute: preset_mode
    to: eco
"#,
    );
    let ex = extract(&r);
    assert!(ex.triggers[0].fires_on.is_empty());
    let reference = &ex.references[0];
    assert_eq!(reference.expected_attribute.as_deref(), Some("preset_mode"));
    assert_eq!(reference.expected_state.as_deref(), Some("eco"));
}

#[test]
fn time_trigger_normalizes_literals_and_references_helpers() {
    let r = rule(
        r#"
triggers:
  - trigger: time
    at: "7:30"
  - trigger: time
    at:
      - "07:30:00"
      - input_datetime.wake_up
"#,
    );
    let ex = extract(&r);
    assert_eq!(ex.triggers[0].kind, TriggerKind::TimeOfDay);
    assert_eq!(ex.triggers[0].at.iter().collect::<Vec<_>>(), vec!["07:30:00"]);
    // Mixed literal and helper: the time set is unknown.
    assert!(ex.triggers[1].at.is_empty());
    assert_eq!(targets(&ex, ReferenceKind::Direct), vec!["input_datetime.wake_up"]);
}

#[test]
fn sun_zone_and_device_triggers() {
    let r = rule(
        r#"
triggers:
  - trigger: sun
    event: sunset
    offset: "-00:30:00"
  - trigger: zone
    entity_id: person.alex
    zone: zone.work
    event: enter
  - trigger: device
    device_id: abc123
    domain: light
    type: turned_on
"#,
    );
    let ex = extract(&r);
    assert_eq!(ex.triggers[0].kind, TriggerKind::Sun);
    assert_eq!(ex.triggers[0].event.as_deref(), Some("sunset"));
    assert_eq!(targets(&ex, ReferenceKind::Direct), vec!["person.alex"]);
    assert_eq!(targets(&ex, ReferenceKind::Zone), vec!["zone.work"]);
    assert_eq!(targets(&ex, ReferenceKind::Device), vec!["abc123"]);
}

#[test]
fn unrecognized_trigger_platform_is_kept_as_other() {
    let r = rule(
        r#"
triggers:
  - trigger: webhook
    webhook_id: doorbell
"#,
    );
    let ex = extract(&r);
    assert_eq!(ex.triggers.len(), 1);
    assert_eq!(ex.triggers[0].kind, TriggerKind::Other);
    assert!(ex.diagnostics.is_empty());
}

#[test]
fn malformed_trigger_is_skipped_with_diagnostic() {
    let r = rule(
        r#"
triggers:
  - trigger: state
  - trigger: state
    entity_id: light.ok
"#,
    );
    let ex = extract(&r);
    assert_eq!(ex.diagnostics.len(), 1);
    assert_eq!(ex.diagnostics[0].path.as_deref(), Some("trigger[0]"));
    assert_eq!(targets(&ex, ReferenceKind::Direct), vec!["light.ok"]);
}

// ─── Conditions ─────────────────────────────────────────────────────────────

#[test]
fn rule_condition_becomes_constraint() {
    let r = rule(
        r#"
conditions:
  - condition: state
    entity_id: sun.sun
    state: below_horizon
"#,
    );
    let ex = extract(&r);
    assert_eq!(ex.conditions.len(), 1);
    assert_eq!(ex.conditions[0].target, "sun.sun");
    assert!(ex.conditions[0].required.contains("below_horizon"));
    assert_eq!(ex.conditions[0].location, "condition[0]");
}

#[test]
fn or_and_not_groups_add_references_but_no_constraints() {
    let r = rule(
        r#"
conditions:
  - condition: or
    conditions:
      - condition: state
        entity_id: light.a
        state: "on"
      - condition: state
        entity_id: light.b
        state: "on"
  - condition: not
    conditions:
      - condition: state
        entity_id: light.c
        state: "off"
"#,
    );
    let ex = extract(&r);
    assert!(ex.conditions.is_empty());
    assert_eq!(
        targets(&ex, ReferenceKind::Direct),
        vec!["light.a", "light.b", "light.c"]
    );
    assert_eq!(ex.references[0].location, "condition[0].conditions[0]");
}

#[test]
fn and_group_passes_constraints_through() {
    let r = rule(
        r#"
conditions:
  - condition: and
    conditions:
      - condition: state
        entity_id: input_boolean.guest_mode
        state: "off"
"#,
    );
    let ex = extract(&r);
    assert_eq!(ex.conditions.len(), 1);
    assert_eq!(ex.conditions[0].location, "condition[0].conditions[0]");
}

#[test]
fn shorthand_template_condition_is_collected() {
    let r = rule(
        r#"
conditions:
  - "{{ is_state('light.desk', 'on') }}"
"#,
    );
    let ex = extract(&r);
    assert_eq!(ex.templates.len(), 1);
    assert_eq!(ex.templates[0].location, "condition[0]");
    let derived = &ex.references[0];
    assert_eq!(derived.kind, ReferenceKind::TemplateDerived);
    assert_eq!(derived.target, "light.desk");
    assert_eq!(derived.expected_state.as_deref(), Some("on"));
}

// ─── Actions ────────────────────────────────────────────────────────────────

#[test]
fn service_call_targets_and_effect() {
    let r = rule(
        r#"
id: evening
actions:
  - action: light.turn_on
    target:
      entity_id: light.living_room
      area_id: lounge
      device_id: dev42
"#,
    );
    let ex = extract(&r);
    assert_eq!(targets(&ex, ReferenceKind::ServiceTarget), vec!["light.turn_on"]);
    assert_eq!(targets(&ex, ReferenceKind::Area), vec!["lounge"]);
    assert_eq!(targets(&ex, ReferenceKind::Device), vec!["dev42"]);
    assert_eq!(targets(&ex, ReferenceKind::Direct), vec!["light.living_room"]);

    assert_eq!(ex.actions.len(), 1);
    assert_eq!(ex.actions[0].effect, Effect::Activate);
    assert_eq!(ex.actions[0].target, "light.living_room");
    assert_eq!(ex.actions[0].location, "action[0]");
}

#[test]
fn legacy_service_key_and_all_target() {
    let r = rule(
        r#"
actions:
  - service: light.turn_off
    entity_id: all
"#,
    );
    let ex = extract(&r);
    assert!(targets(&ex, ReferenceKind::Direct).is_empty());
    assert!(ex.actions.is_empty());
}

#[test]
fn choose_branch_guards_and_unconstrained_default() {
    let r = rule(
        r#"
conditions:
  - condition: state
    entity_id: input_boolean.enabled
    state: "on"
actions:
  - choose:
      - conditions:
          - condition: state
            entity_id: sun.sun
            state: below_horizon
        sequence:
          - action: light.turn_on
            target:
              entity_id: light.porch
    default:
      - action: light.turn_off
        target:
          entity_id: light.porch
"#,
    );
    let ex = extract(&r);
    assert_eq!(ex.actions.len(), 2);

    let on = ex.actions.iter().find(|a| a.effect == Effect::Activate).unwrap();
    assert_eq!(on.location, "action[0].choose[0].sequence[0]");
    let guarded: Vec<_> = on.guards.iter().map(|g| g.target.as_str()).collect();
    assert_eq!(guarded, vec!["input_boolean.enabled", "sun.sun"]);

    let off = ex.actions.iter().find(|a| a.effect == Effect::Deactivate).unwrap();
    assert_eq!(off.location, "action[0].default[0]");
    assert_eq!(off.guards.len(), 1);
}

#[test]
fn if_then_else_guards() {
    let r = rule(
        r#"
actions:
  - if:
      - condition: state
        entity_id: binary_sensor.door
        state: "on"
    then:
      - action: switch.turn_on
        target:
          entity_id: switch.alarm
    else:
      - action: switch.turn_off
        target:
          entity_id: switch.alarm
"#,
    );
    let ex = extract(&r);
    let then = ex.actions.iter().find(|a| a.location == "action[0].then[0]").unwrap();
    assert_eq!(then.guards.len(), 1);
    let otherwise = ex.actions.iter().find(|a| a.location == "action[0].else[0]").unwrap();
    assert!(otherwise.guards.is_empty());
}

#[test]
fn inline_condition_step_guards_later_siblings() {
    let r = rule(
        r#"
actions:
  - action: light.turn_on
    target:
      entity_id: light.first
  - condition: state
    entity_id: person.sam
    state: home
  - action: light.turn_on
    target:
      entity_id: light.second
"#,
    );
    let ex = extract(&r);
    let first = ex.actions.iter().find(|a| a.target == "light.first").unwrap();
    let second = ex.actions.iter().find(|a| a.target == "light.second").unwrap();
    assert!(first.guards.is_empty());
    assert_eq!(second.guards[0].target, "person.sam");
}

#[test]
fn repeat_parallel_and_wait_for_trigger_are_walked() {
    let r = rule(
        r#"
actions:
  - repeat:
      while:
        - condition: state
          entity_id: media_player.tv
          state: playing
      sequence:
        - action: light.toggle
          target:
            entity_id: light.strip
  - parallel:
      - action: scene.turn_on
        target:
          entity_id: scene.movie
      - action: cover.close_cover
        target:
          entity_id: cover.blinds
  - wait_for_trigger:
      - trigger: state
        entity_id: binary_sensor.couch
        to: "off"
"#,
    );
    let ex = extract(&r);
    let direct = targets(&ex, ReferenceKind::Direct);
    for id in [
        "media_player.tv",
        "light.strip",
        "scene.movie",
        "cover.blinds",
        "binary_sensor.couch",
    ] {
        assert!(direct.contains(&id.to_string()), "missing {}", id);
    }
    // wait_for_trigger does not start the rule.
    assert!(ex.triggers.is_empty());
    let strip = ex.actions.iter().find(|a| a.target == "light.strip").unwrap();
    assert_eq!(strip.effect, Effect::Toggle);
    assert_eq!(strip.guards[0].target, "media_player.tv");
}

#[test]
fn variables_are_collected_from_rule_and_actions() {
    let r = rule(
        r#"
variables:
  brightness: 120
actions:
  - variables:
      room: kitchen
"#,
    );
    let ex = extract(&r);
    assert!(ex.variables.contains("brightness"));
    assert!(ex.variables.contains("room"));
}

#[test]
fn templated_target_is_not_a_reference() {
    let r = rule(
        r#"
actions:
  - action: light.turn_on
    target:
      entity_id: "{{ trigger.entity_id }}"
"#,
    );
    let ex = extract(&r);
    assert!(targets(&ex, ReferenceKind::Direct).is_empty());
    assert_eq!(ex.templates.len(), 1);
    assert_eq!(ex.templates[0].location, "action[0].target.entity_id");
}

#[test]
fn nesting_beyond_limit_is_truncated_with_diagnostic() {
    let mut yaml = String::from("actions:\n");
    let mut indent = String::from("  ");
    for _ in 0..6 {
        yaml.push_str(&format!("{indent}- sequence:\n"));
        indent.push_str("    ");
    }
    yaml.push_str(&format!(
        "{indent}- action: light.turn_on\n{indent}  target:\n{indent}    entity_id: light.deep\n"
    ));
    let r = rule(&yaml);

    let shallow = Extractor::new(3).extract(&r);
    assert!(shallow.diagnostics.iter().any(|d| d.code == "depth_exceeded"));
    assert!(shallow.actions.is_empty());

    let deep = Extractor::new(20).extract(&r);
    assert!(deep.diagnostics.is_empty());
    assert_eq!(deep.actions.len(), 1);
}

// ─── Helpers ────────────────────────────────────────────────────────────────

#[test]
fn effect_mapping() {
    assert_eq!(effect_for("light.turn_on"), Some(Effect::Activate));
    assert_eq!(effect_for("cover.close_cover"), Some(Effect::Deactivate));
    assert_eq!(effect_for("lock.unlock"), Some(Effect::Deactivate));
    assert_eq!(effect_for("climate.set_temperature"), Some(Effect::SetValue));
    assert_eq!(effect_for("alarm_control_panel.alarm_arm_away"), Some(Effect::Activate));
    assert_eq!(effect_for("script.turn_on"), None);
    assert_eq!(effect_for("notify.mobile"), None);
    assert_eq!(effect_for("turn_on"), None);
}

#[test]
fn time_normalization() {
    assert_eq!(normalize_time("7:05").as_deref(), Some("07:05:00"));
    assert_eq!(normalize_time("23:59:59").as_deref(), Some("23:59:59"));
    assert_eq!(normalize_time("24:00"), None);
    assert_eq!(normalize_time("sensor.alarm_time"), None);
}

#[test]
fn template_reference_patterns() {
    let refs = template_references(
        "{{ states('sensor.temp') | float > 20 and state_attr('climate.hall', 'preset_mode') == 'eco' \
         and states.light.kitchen.state == 'on' and is_state('Bad Id', 'on') }}",
        "r1",
        "Rule one",
        "action[0].data.message",
    );
    let found: Vec<_> = refs
        .iter()
        .map(|r| (r.target.as_str(), r.expected_attribute.as_deref()))
        .collect();
    assert!(found.contains(&("climate.hall", Some("preset_mode"))));
    assert!(found.contains(&("sensor.temp", None)));
    assert!(found.contains(&("light.kitchen", None)));
    assert!(!found.iter().any(|(t, _)| *t == "Bad Id"));
    assert!(refs.iter().all(|r| r.kind == ReferenceKind::TemplateDerived));
}
