//! End-to-end scenarios running the full parse → compile → build → match
//! pipeline, covering each literal example from the rule-matching design.

use catrule_engine::EngineBuilder;
use serde_json::json;

#[test]
fn equal_constant_cse_evaluates_shared_compare_once() {
    let mut builder = EngineBuilder::new();
    let r1 = builder.register_rule("user.age > 18").unwrap();
    let r2 = builder
        .register_rule("user.age > 18 && user.country == \"US\"")
        .unwrap();
    let engine = builder.finalize();

    let event = json!({"user": {"age": 21, "country": "US"}});
    let before = engine.metrics().snapshot().num_cat_evals;
    let mut matched = engine.match_event(&event);
    matched.sort();
    assert_eq!(matched, vec![r1, r2]);

    let after = engine.metrics().snapshot().num_cat_evals;
    assert!(after - before <= 2, "shared `user.age > 18` compare must not double-evaluate");
}

#[test]
fn vacuous_forall_over_empty_array() {
    let mut builder = EngineBuilder::new();
    let rule = builder
        .register_rule("forAll(\"items\", \"item\", item.value > 100)")
        .unwrap();
    let engine = builder.finalize();

    assert_eq!(engine.match_event(&json!({"items": []})), vec![rule]);
    assert!(engine.match_event(&json!({"other": "x"})).is_empty());
    assert!(engine
        .match_event(&json!({"items": [{"value": 150}, {"value": 50}]}))
        .is_empty());
}

#[test]
fn null_equality_matches_missing_and_explicit_null() {
    let mut builder = EngineBuilder::new();
    let rule = builder.register_rule("field == null").unwrap();
    let engine = builder.finalize();

    assert_eq!(engine.match_event(&json!({})), vec![rule]);
    assert_eq!(engine.match_event(&json!({"field": null})), vec![rule]);
    assert!(engine.match_event(&json!({"field": 0})).is_empty());
}

#[test]
fn constant_expression_always_matches() {
    let mut builder = EngineBuilder::new();
    let rule = builder.register_rule("1 == 1").unwrap();
    let engine = builder.finalize();

    assert_eq!(engine.match_event(&json!({})), vec![rule]);
}

#[test]
fn negation_round_trip_is_mutually_exclusive() {
    let mut builder = EngineBuilder::new();
    let pos = builder.register_rule("user.age > 18").unwrap();
    let neg = builder.register_rule("!(user.age > 18)").unwrap();
    let engine = builder.finalize();

    let adult = engine.match_event(&json!({"user": {"age": 21}}));
    assert_eq!(adult, vec![pos]);

    let minor = engine.match_event(&json!({"user": {"age": 10}}));
    assert_eq!(minor, vec![neg]);
}

#[test]
fn not_equal_matches_a_missing_field() {
    let mut builder = EngineBuilder::new();
    let rule = builder.register_rule("field != 0").unwrap();
    let engine = builder.finalize();

    assert_eq!(engine.match_event(&json!({})), vec![rule]);
    assert!(engine.match_event(&json!({"field": 0})).is_empty());
    assert_eq!(engine.match_event(&json!({"field": 1})), vec![rule]);
}

#[test]
fn negated_ordering_matches_a_missing_field() {
    let mut builder = EngineBuilder::new();
    let rule = builder.register_rule("!(user.age > 18)").unwrap();
    let engine = builder.finalize();

    assert_eq!(engine.match_event(&json!({})), vec![rule], "age is missing, so !(age > 18) is true");
    assert_eq!(engine.match_event(&json!({"user": {"age": 10}})), vec![rule]);
    assert!(engine.match_event(&json!({"user": {"age": 21}})).is_empty());
}

#[test]
fn equal_to_constant_fastpath_matches_across_promoted_kinds() {
    let mut builder = EngineBuilder::new();
    let by_int = builder.register_rule("flag == 1").unwrap();
    let engine = builder.finalize();

    // The constant is an Int; the event reports a JSON bool. The fast path
    // must still promote and match, the same as the general comparison path.
    assert_eq!(engine.match_event(&json!({"flag": true})), vec![by_int]);
    assert!(engine.match_event(&json!({"flag": false})).is_empty());
}

#[test]
fn values_row_is_returned_to_the_pool_after_each_match() {
    let mut builder = EngineBuilder::new();
    builder.register_rule("user.age > 18").unwrap();
    let engine = builder.finalize();

    assert_eq!(engine.pooled_rows_free(), 0, "nothing acquired yet");
    engine.match_event(&json!({"user": {"age": 21}}));
    assert_eq!(engine.pooled_rows_free(), 1, "row released back after matching");
    engine.match_event(&json!({"user": {"age": 9}}));
    assert_eq!(engine.pooled_rows_free(), 1, "second match reuses the same pooled row");
}

#[test]
fn compile_idempotence_yields_distinct_rule_ids_for_repeated_text() {
    let mut builder = EngineBuilder::new();
    let a = builder.register_rule("user.age > 18").unwrap();
    let b = builder.register_rule("user.age > 18").unwrap();
    assert_ne!(a, b);
    let engine = builder.finalize();

    assert_eq!(engine.metrics().snapshot().num_cat_evals, 0);
    let mut matched = engine.match_event(&json!({"user": {"age": 21}}));
    matched.sort();
    assert_eq!(matched, vec![a, b]);
}
