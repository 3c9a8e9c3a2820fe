//! End-to-end properties of the analysis pipeline.
//!
//! Each test builds a fixture, runs the orchestrator over it and checks the
//! published metadata and diagnostics.

use std::collections::BTreeSet;
use zeropage_core::analysis::constant_propagation::{ConstValue, LatticeValue};
use zeropage_core::orchestrator::AnalysisRecord;
use zeropage_core::{AnalysisConfig, AnalysisKind, DiagnosticCode, DiagnosticLevel, MetadataKey};
use zeropage_test_helpers::{analyze, analyze_with, fixtures};

// ── Constant propagation ────────────────────────────────────────────────────

#[test]
fn test_constant_chain_resolves_sum() {
    let fixture = fixtures::constant_chain();
    let analyzed = analyze(&fixture);
    let store = &analyzed.context.metadata;

    assert_eq!(store.constant(fixture.expr("sum")), Some(ConstValue::Number(5)));
    assert_eq!(store.constant(fixture.expr("z_use")), Some(ConstValue::Number(5)));
    assert!(store.bool_or_default(fixture.symbol("z"), MetadataKey::EffectivelyConstant));
    assert_eq!(analyzed.errors(), 0);
}

#[test]
fn test_conditional_reassignment_reaches_bottom() {
    let fixture = fixtures::conditional_reassign();
    let analyzed = analyze(&fixture);

    let Some(AnalysisRecord::Constants(result)) = analyzed.context.result("main", AnalysisKind::Constants) else {
        panic!("constant propagation did not run");
    };
    assert_eq!(result.value_at_exit(fixture.symbol("x")), LatticeValue::Bottom);
    assert_eq!(result.value_of(fixture.expr("x_use")), None);
    assert_eq!(analyzed.context.metadata.constant(fixture.expr("sum")), None);
    assert_eq!(result.value_at_exit(fixture.symbol("y")), LatticeValue::Constant(ConstValue::Number(3)));
}

// ── Alias analysis ──────────────────────────────────────────────────────────

#[test]
fn test_copy_includes_source_and_its_targets() {
    let fixture = fixtures::pointer_copy();
    let analyzed = analyze(&fixture);
    let store = &analyzed.context.metadata;
    let (a, b) = (fixture.symbol("a"), fixture.symbol("b"));

    let pts_a = store.symbols_or_empty(a, MetadataKey::PointsTo);
    let pts_b = store.symbols_or_empty(b, MetadataKey::PointsTo);
    assert!(pts_b.contains(&fixture.symbol("target")));
    assert!(pts_a.contains(&b));
    assert!(pts_a.is_superset(pts_b));

    for symbol in [a, b] {
        let own = store.symbols_or_empty(symbol, MetadataKey::PointsTo);
        let non_alias = store.symbols_or_empty(symbol, MetadataKey::NonAlias);
        assert!(!own.contains(&symbol));
        assert!(!non_alias.contains(&symbol));
    }
}

#[test]
fn test_self_modifying_store_flagged_but_io_is_not() {
    let fixture = fixtures::self_modifying_store();
    let analyzed = analyze(&fixture);
    let store = &analyzed.context.metadata;

    assert!(store.bool_or_default(fixture.stmt("code_store"), MetadataKey::SelfModifyingWrite));
    assert!(!store.bool_or_default(fixture.stmt("io_store"), MetadataKey::SelfModifyingWrite));

    let warnings = analyzed.with_code(DiagnosticCode::SelfModifyingCode);
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].level, DiagnosticLevel::Warning);
    assert_eq!(warnings[0].function.as_deref(), Some("main"));
}

#[test]
fn test_cyclic_copies_converge_under_default_cap() {
    let fixture = fixtures::cyclic_copies();
    let analyzed = analyze(&fixture);

    assert!(analyzed.with_code(DiagnosticCode::PointsToIncomplete).is_empty());
    let store = &analyzed.context.metadata;
    let g = fixture.symbol("g");
    assert!(store.symbols_or_empty(fixture.symbol("a"), MetadataKey::PointsTo).contains(&g));
    assert!(store.symbols_or_empty(fixture.symbol("b"), MetadataKey::PointsTo).contains(&g));
}

#[test]
fn test_cyclic_copies_truncated_warn_exactly_once() {
    let fixture = fixtures::cyclic_copies();
    let config = AnalysisConfig {
        points_to_max_iterations: 1,
        ..AnalysisConfig::default()
    };
    let analyzed = analyze_with(&fixture, config);

    assert_eq!(analyzed.with_code(DiagnosticCode::PointsToIncomplete).len(), 1);
    assert_eq!(analyzed.errors(), 0);
    // Truncated solves publish no non-alias sets
    let store = &analyzed.context.metadata;
    assert!(!store.has(fixture.symbol("a"), MetadataKey::NonAlias));
}

// ── Reachability ────────────────────────────────────────────────────────────

#[test]
fn test_statement_after_return_unreachable() {
    let fixture = fixtures::unreachable_after_return();
    let analyzed = analyze(&fixture);
    let store = &analyzed.context.metadata;

    assert!(store.bool_or_default(fixture.stmt("dead"), MetadataKey::Unreachable));
    assert!(!store.bool_or_default(fixture.stmt("return"), MetadataKey::Unreachable));
    assert_eq!(analyzed.with_code(DiagnosticCode::UnreachableCode).len(), 1);
}

#[test]
fn test_statement_after_exhaustive_if_else_unreachable() {
    let fixture = fixtures::unreachable_after_if_else();
    let analyzed = analyze(&fixture);
    let store = &analyzed.context.metadata;

    assert!(store.bool_or_default(fixture.stmt("dead"), MetadataKey::Unreachable));
    assert!(!store.bool_or_default(fixture.stmt("branch"), MetadataKey::Unreachable));
}

#[test]
fn test_unreachable_warning_can_be_disabled() {
    let fixture = fixtures::unreachable_after_return();
    let config = AnalysisConfig {
        report_unreachable_code: false,
        ..AnalysisConfig::default()
    };
    let analyzed = analyze_with(&fixture, config);

    assert!(analyzed.with_code(DiagnosticCode::UnreachableCode).is_empty());
    // The fact itself is still published
    assert!(analyzed
        .context
        .metadata
        .bool_or_default(fixture.stmt("dead"), MetadataKey::Unreachable));
}

// ── Failure isolation ───────────────────────────────────────────────────────

#[test]
fn test_malformed_function_does_not_block_others() {
    let fixture = fixtures::two_functions_one_malformed();
    let analyzed = analyze(&fixture);

    let failures = analyzed.with_code(DiagnosticCode::AnalysisFailed);
    assert!(!failures.is_empty());
    assert!(failures.iter().all(|d| d.function.as_deref() == Some("bad")));
    assert!(failures.iter().all(|d| d.level == DiagnosticLevel::Error));

    let good = analyzed.context.function_analysis("good").unwrap();
    assert!(good.failures.is_empty());
    let store = &analyzed.context.metadata;
    assert_eq!(store.constant(fixture.expr("x_use")), Some(ConstValue::Number(4)));
    assert!(store.has(fixture.symbol("x"), MetadataKey::StackAllocatable));

    let bad = analyzed.context.function_analysis("bad").unwrap();
    assert!(bad.failures.contains(&AnalysisKind::Escape));
    assert!(!bad.succeeded(AnalysisKind::Escape));
}

#[test]
fn test_every_reported_diagnostic_is_scoped() {
    let fixture = fixtures::two_functions_one_malformed();
    let analyzed = analyze(&fixture);
    let names: BTreeSet<String> = analyzed
        .diagnostics
        .with_code(DiagnosticCode::AnalysisFailed)
        .into_iter()
        .filter_map(|d| d.function)
        .collect();
    assert_eq!(names, BTreeSet::from(["bad".to_string()]));
}
