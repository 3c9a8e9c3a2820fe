//! Program-wide tier: call graph, purity, loops feeding usage, target hints.

use zeropage_core::analysis::purity::PurityLevel;
use zeropage_core::analysis::target_hints::{Register, MAX_PRIORITY};
use zeropage_core::orchestrator::AnalysisRecord;
use zeropage_core::{AnalysisConfig, AnalysisKind, DiagnosticCode, MetadataKey};
use zeropage_test_helpers::{analyze, analyze_with, fixtures};

#[test]
fn test_purity_levels_follow_calls() {
    let fixture = fixtures::call_hierarchy();
    let analyzed = analyze(&fixture);
    let store = &analyzed.context.metadata;

    assert_eq!(store.purity(fixture.symbol("fact")), Some(PurityLevel::Pure));
    assert_eq!(store.purity(fixture.symbol("api")), Some(PurityLevel::Pure));
    assert_eq!(store.purity(fixture.symbol("tick")), Some(PurityLevel::LocalEffects));
    assert_eq!(store.purity(fixture.symbol("set_border")), Some(PurityLevel::Impure));
    assert_eq!(store.purity(fixture.symbol("main")), Some(PurityLevel::Impure));

    let written = store.symbols_or_empty(fixture.symbol("main"), MetadataKey::WrittenLocations);
    assert!(written.contains(&fixture.symbol("counter")));
    assert!(written.contains(&fixture.symbol("border")));
}

#[test]
fn test_call_graph_facts() {
    let fixture = fixtures::call_hierarchy();
    let analyzed = analyze(&fixture);
    let store = &analyzed.context.metadata;
    let fact = fixture.symbol("fact");

    assert!(store.bool_or_default(fact, MetadataKey::Recursive));
    assert!(!store.bool_or_default(fact, MetadataKey::TailRecursive));
    assert!(!store.bool_or_default(fixture.expr("recurse"), MetadataKey::TailCall));
    assert!(store.bool_or_default(fixture.expr("call_set_border"), MetadataKey::TailCall));
    assert_eq!(store.number(fact, MetadataKey::CallSiteCount), Some(2));

    assert!(store.bool_or_default(fixture.symbol("orphan"), MetadataKey::Unused));
    assert!(!store.bool_or_default(fixture.symbol("api"), MetadataKey::Unused));
    assert!(!store.bool_or_default(fixture.symbol("main"), MetadataKey::Unused));

    let unused = analyzed.with_code(DiagnosticCode::UnusedFunction);
    assert_eq!(unused.len(), 1);
    assert_eq!(unused[0].function.as_deref(), Some("orphan"));
    assert_eq!(analyzed.with_code(DiagnosticCode::RecursiveCall).len(), 1);

    let Some(AnalysisRecord::CallGraph(graph)) = analyzed.context.result("", AnalysisKind::CallGraph) else {
        panic!("call graph missing");
    };
    assert!(graph.complete);
    assert_eq!(graph.callers(fixture.symbol("set_border")), vec![fixture.symbol("main")]);
}

#[test]
fn test_unused_warning_respects_config() {
    let fixture = fixtures::call_hierarchy();
    let config = AnalysisConfig {
        report_unused_functions: false,
        ..AnalysisConfig::default()
    };
    let analyzed = analyze_with(&fixture, config);

    assert!(analyzed.with_code(DiagnosticCode::UnusedFunction).is_empty());
    assert!(analyzed
        .context
        .metadata
        .bool_or_default(fixture.symbol("orphan"), MetadataKey::Unused));
}

#[test]
fn test_failed_effects_disable_unused_marking() {
    let fixture = fixtures::two_functions_one_malformed();
    let analyzed = analyze(&fixture);

    let graph = analyzed.context.call_graph().unwrap();
    assert!(!graph.complete);
    assert!(graph.unused.is_empty());
    // Nothing about `bad` is claimed
    assert_eq!(analyzed.context.metadata.purity(fixture.symbol("good")), Some(PurityLevel::Pure));
}

#[test]
fn test_nested_loop_depths_and_trip_counts() {
    let fixture = fixtures::nested_loops();
    let analyzed = analyze(&fixture);
    let store = &analyzed.context.metadata;

    assert_eq!(store.number(fixture.stmt("outer"), MetadataKey::LoopDepth), None);
    assert_eq!(store.number(fixture.stmt("inner"), MetadataKey::LoopDepth), Some(1));
    assert_eq!(store.number(fixture.stmt("store"), MetadataKey::LoopDepth), Some(2));
    assert_eq!(store.number(fixture.stmt("outer"), MetadataKey::TripCount), Some(10));
    assert_eq!(store.number(fixture.stmt("inner"), MetadataKey::TripCount), Some(5));

    let (i, j) = (fixture.symbol("i"), fixture.symbol("j"));
    assert!(store.bool_or_default(i, MetadataKey::InductionVariable));
    assert!(store.bool_or_default(j, MetadataKey::InductionVariable));
}

#[test]
fn test_loop_counters_get_index_registers() {
    let fixture = fixtures::nested_loops();
    let analyzed = analyze(&fixture);
    let store = &analyzed.context.metadata;
    let (i, j) = (fixture.symbol("i"), fixture.symbol("j"));

    let mut registers = vec![store.register(i), store.register(j)];
    registers.sort_by_key(|r| format!("{:?}", r));
    assert_eq!(registers, vec![Some(Register::X), Some(Register::Y)]);

    // Accessed at depth 2, so well above a cold variable
    let priority = store.number(j, MetadataKey::ZeroPagePriority).unwrap();
    assert!(priority > 50);
    assert!(priority <= i64::from(MAX_PRIORITY));
    assert!(store.number(fixture.symbol("grid"), MetadataKey::ZeroPagePriority).is_none());
}

#[test]
fn test_zero_page_storage_pins_priority() {
    let fixture = fixtures::call_hierarchy();
    let analyzed = analyze(&fixture);
    let store = &analyzed.context.metadata;

    assert_eq!(
        store.number(fixture.symbol("counter"), MetadataKey::ZeroPagePriority),
        Some(i64::from(MAX_PRIORITY))
    );
    assert!(!store.has(fixture.symbol("border"), MetadataKey::ZeroPagePriority));

    let hints = analyzed.context.target_hints().unwrap();
    assert_eq!(hints.ranked().first().map(|(s, _)| *s), Some(fixture.symbol("counter")));
}
