//! Property-based tests for the lattices and the priority score.

use proptest::prelude::*;
use std::collections::BTreeSet;
use zeropage_core::analysis::constant_propagation::{ConstValue, ConstantFacts, LatticeValue};
use zeropage_core::analysis::fixpoint::Lattice;
use zeropage_core::analysis::target_hints::{TargetHintAnalyzer, MAX_PRIORITY};
use zeropage_core::analysis::usage::{ProgramUsage, VariableUsage};
use zeropage_core::symbols::SymbolId;
use zeropage_core::{AnalysisConfig, MetadataStore, ProgramBuilder, Type};

// =============================================================================
// STRATEGIES
// =============================================================================

fn lattice_value() -> impl Strategy<Value = LatticeValue> {
    prop_oneof![
        Just(LatticeValue::Top),
        Just(LatticeValue::Bottom),
        (0i64..4).prop_map(|n| LatticeValue::Constant(ConstValue::Number(n))),
        any::<bool>().prop_map(|b| LatticeValue::Constant(ConstValue::Bool(b))),
    ]
}

fn constant_facts() -> impl Strategy<Value = ConstantFacts> {
    prop::collection::vec((0u32..4, lattice_value()), 0..6).prop_map(|entries| {
        let mut facts = ConstantFacts::new();
        for (symbol, value) in entries {
            facts.set(SymbolId(symbol), value);
        }
        facts
    })
}

fn symbol_set() -> impl Strategy<Value = BTreeSet<u8>> {
    prop::collection::btree_set(0u8..16, 0..8)
}

fn variable_usage() -> impl Strategy<Value = VariableUsage> {
    (any::<u32>(), any::<u32>(), any::<u32>(), 0u32..64).prop_map(|(reads, writes, hot, depth)| {
        VariableUsage {
            reads,
            writes,
            hot_path_accesses: hot,
            max_loop_depth: depth,
            ..VariableUsage::default()
        }
    })
}

fn check_laws<L: Lattice + std::fmt::Debug>(a: &L, b: &L, c: &L) -> Result<(), TestCaseError> {
    prop_assert_eq!(a.join(b), b.join(a), "commutative");
    prop_assert_eq!(a.join(&b.join(c)), a.join(b).join(c), "associative");
    prop_assert_eq!(a.join(a), a.clone(), "idempotent");
    Ok(())
}

// =============================================================================
// LATTICE LAWS
// =============================================================================

proptest! {
    #[test]
    fn prop_lattice_value_join_laws(a in lattice_value(), b in lattice_value(), c in lattice_value()) {
        check_laws(&a, &b, &c)?;
    }

    #[test]
    fn prop_constant_facts_join_laws(a in constant_facts(), b in constant_facts(), c in constant_facts()) {
        check_laws(&a, &b, &c)?;
    }

    #[test]
    fn prop_set_join_laws(a in symbol_set(), b in symbol_set(), c in symbol_set()) {
        check_laws(&a, &b, &c)?;
    }

    #[test]
    fn prop_top_is_neutral_and_bottom_absorbs(a in lattice_value()) {
        prop_assert_eq!(LatticeValue::Top.join(&a), a);
        prop_assert_eq!(LatticeValue::Bottom.join(&a), LatticeValue::Bottom);
    }
}

// =============================================================================
// PRIORITY BOUNDS
// =============================================================================

proptest! {
    #[test]
    fn prop_priority_stays_in_range(byte_usage in variable_usage(), word_usage in variable_usage()) {
        let mut b = ProgramBuilder::new();
        let small = b.global("small", Type::Byte);
        let wide = b.global("wide", Type::Word);
        let (_, symbols) = b.finish();

        let usage = ProgramUsage {
            usage: [(small, byte_usage), (wide, word_usage)].into_iter().collect(),
        };
        let config = AnalysisConfig::default();
        let store = MetadataStore::new();
        let hints = TargetHintAnalyzer::new(&symbols, &config, &usage, &store).analyze();

        for symbol in [small, wide] {
            let priority = hints.priority(symbol).unwrap_or(0);
            prop_assert!(priority <= MAX_PRIORITY);
        }
        // More accesses never lower the score
        let busier = VariableUsage {
            reads: byte_usage.reads.saturating_add(1),
            ..byte_usage
        };
        let usage = ProgramUsage {
            usage: [(small, busier)].into_iter().collect(),
        };
        let more = TargetHintAnalyzer::new(&symbols, &config, &usage, &store).analyze();
        prop_assert!(more.priority(small) >= hints.priority(small));
    }
}
