//! Allocation hints for the code generator.
//!
//! **Zero-page priority** ranks variables for the 6502's fast 256-byte zero
//! page, from 0 to 100:
//!
//! | component  | cap | source                                   |
//! |------------|-----|------------------------------------------|
//! | access     | 40  | reads + writes                           |
//! | loop depth | 30  | deepest loop the variable is accessed in |
//! | hot path   | 20  | sum of loop depths over all accesses     |
//! | type size  | 10  | bytes and pointers score highest         |
//!
//! Variables declared `@zp` are pinned at 100. Memory-mapped variables,
//! arrays and anything with an explicit `@ram` / `@data` placement are not
//! candidates.
//!
//! **Register affinity** suggests which of A, X or Y a byte-sized variable
//! would best live in: array indices and loop counters want X then Y (the
//! index registers), the most arithmetic-heavy remaining variable wants A.

use super::usage::{ProgramUsage, VariableUsage};
use super::AnalysisResult;
use crate::ast::Type;
use crate::config::AnalysisConfig;
use crate::metadata::{FactBatch, KeyNamespace, MetadataKey, MetadataStore, MetadataValue};
use crate::symbols::{Scope, StorageClass, Symbol, SymbolId, SymbolTable};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const MAX_PRIORITY: u32 = 100;
const ACCESS_CAP: u32 = 40;
const LOOP_CAP: u32 = 30;
const HOT_PATH_CAP: u32 = 20;
const SIZE_CAP: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Register {
    A,
    X,
    Y,
    None,
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Register::A => write!(f, "A"),
            Register::X => write!(f, "X"),
            Register::Y => write!(f, "Y"),
            Register::None => write!(f, "none"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TargetHints {
    pub priorities: BTreeMap<SymbolId, u32>,
    /// Byte-sized candidates only.
    pub affinities: BTreeMap<SymbolId, Register>,
}

impl TargetHints {
    pub fn priority(&self, symbol: SymbolId) -> Option<u32> {
        self.priorities.get(&symbol).copied()
    }

    pub fn affinity(&self, symbol: SymbolId) -> Option<Register> {
        self.affinities.get(&symbol).copied()
    }

    /// Candidates by descending priority, ties in symbol order.
    pub fn ranked(&self) -> Vec<(SymbolId, u32)> {
        let mut ranked: Vec<(SymbolId, u32)> = self.priorities.iter().map(|(s, p)| (*s, *p)).collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked
    }

    pub fn publish(&self, store: &mut MetadataStore) -> AnalysisResult<usize> {
        let mut batch = FactBatch::new();
        for (symbol, priority) in &self.priorities {
            batch.number(*symbol, MetadataKey::ZeroPagePriority, i64::from(*priority));
        }
        for (symbol, register) in &self.affinities {
            batch.push(*symbol, MetadataKey::RegisterAffinity, MetadataValue::Register(*register));
        }
        Ok(batch.commit(store, KeyNamespace::TargetHints)?)
    }
}

pub struct TargetHintAnalyzer<'a> {
    symbols: &'a SymbolTable,
    config: &'a AnalysisConfig,
    usage: &'a ProgramUsage,
    /// Earlier facts (points-to sets, induction variables, address-taken).
    facts: &'a MetadataStore,
}

impl<'a> TargetHintAnalyzer<'a> {
    pub fn new(
        symbols: &'a SymbolTable,
        config: &'a AnalysisConfig,
        usage: &'a ProgramUsage,
        facts: &'a MetadataStore,
    ) -> Self {
        TargetHintAnalyzer {
            symbols,
            config,
            usage,
            facts,
        }
    }

    pub fn analyze(self) -> TargetHints {
        let mut hints = TargetHints::default();
        let mut scopes: BTreeMap<ScopeKey, Vec<&Symbol>> = BTreeMap::new();

        for symbol in self.symbols.iter().filter(|s| is_candidate(s)) {
            hints.priorities.insert(symbol.id, self.priority(symbol));
            if symbol.ty.is_scalar() && symbol.ty.size_in_bytes() == 1 {
                scopes.entry(ScopeKey::from(symbol.scope)).or_default().push(symbol);
            }
        }

        for members in scopes.values() {
            self.assign_registers(members, &mut hints.affinities);
        }

        tracing::debug!(
            candidates = hints.priorities.len(),
            register_hints = hints.affinities.values().filter(|r| **r != Register::None).count(),
            "target hints computed"
        );
        hints
    }

    fn priority(&self, symbol: &Symbol) -> u32 {
        if symbol.storage == StorageClass::ZeroPage {
            return MAX_PRIORITY;
        }
        let weights = &self.config.hint_weights;
        let usage = self.usage.get(symbol.id).copied().unwrap_or_default();
        let access = usage.accesses().saturating_mul(weights.access).min(ACCESS_CAP);
        let depth = usage.max_loop_depth.saturating_mul(weights.loop_depth).min(LOOP_CAP);
        let hot = usage.hot_path_accesses.saturating_mul(weights.hot_path).min(HOT_PATH_CAP);
        let size = self.size_score(symbol).min(SIZE_CAP);
        (access + depth + hot + size).min(MAX_PRIORITY)
    }

    /// Pointers gain the most: `(zp),y` is the only indirect mode.
    fn size_score(&self, symbol: &Symbol) -> u32 {
        match symbol.ty {
            Type::Bool | Type::Byte => 10,
            Type::Word if self.is_pointer(symbol.id) => 10,
            Type::Word => 5,
            _ => 0,
        }
    }

    fn is_pointer(&self, symbol: SymbolId) -> bool {
        !self.facts.symbols_or_empty(symbol, MetadataKey::PointsTo).is_empty()
    }

    fn assign_registers(&self, members: &[&Symbol], affinities: &mut BTreeMap<SymbolId, Register>) {
        let usage_of = |id: SymbolId| self.usage.get(id).copied().unwrap_or_default();
        let hotter = |a: &VariableUsage, b: &VariableUsage| {
            b.hot_path_accesses
                .cmp(&a.hot_path_accesses)
                .then(b.accesses().cmp(&a.accesses()))
        };

        let mut index: Vec<&Symbol> = Vec::new();
        let mut arithmetic: Vec<&Symbol> = Vec::new();
        for &symbol in members {
            affinities.insert(symbol.id, Register::None);
            // Registers have no address
            if self.facts.bool_or_default(symbol.id, MetadataKey::AddressTaken) {
                continue;
            }
            let usage = usage_of(symbol.id);
            let induction = self.facts.bool_or_default(symbol.id, MetadataKey::InductionVariable);
            if usage.index_uses > 0 || induction {
                index.push(symbol);
            } else if usage.arithmetic_uses > 0 {
                arithmetic.push(symbol);
            }
        }

        index.sort_by(|a, b| hotter(&usage_of(a.id), &usage_of(b.id)).then(a.id.cmp(&b.id)));
        for (symbol, register) in index.iter().zip([Register::X, Register::Y]) {
            affinities.insert(symbol.id, register);
        }
        // Index candidates that found no index register compete for A
        arithmetic.extend(index.iter().skip(2).copied());

        let accumulator = arithmetic.iter().max_by(|a, b| {
            usage_of(a.id)
                .arithmetic_uses
                .cmp(&usage_of(b.id).arithmetic_uses)
                .then(b.id.cmp(&a.id))
        });
        if let Some(symbol) = accumulator {
            if usage_of(symbol.id).arithmetic_uses > 0 {
                affinities.insert(symbol.id, Register::A);
            }
        }
    }
}

fn is_candidate(symbol: &Symbol) -> bool {
    !symbol.is_function()
        && symbol.ty.is_scalar()
        && !symbol.is_memory_mapped()
        && !matches!(symbol.storage, StorageClass::Ram | StorageClass::Data)
}

/// Orderable stand-in for [`Scope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum ScopeKey {
    Global,
    Function(u32),
}

impl From<Scope> for ScopeKey {
    fn from(scope: Scope) -> Self {
        match scope {
            Scope::Global => ScopeKey::Global,
            Scope::Function(id) => ScopeKey::Function(id.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ProgramBuilder;

    fn usage(entries: &[(SymbolId, VariableUsage)]) -> ProgramUsage {
        ProgramUsage {
            usage: entries.iter().copied().collect(),
        }
    }

    #[test]
    fn test_priority_components() {
        let mut b = ProgramBuilder::new();
        let hot = b.global("hot", Type::Byte);
        let cold = b.global("cold", Type::Word);
        let pinned = b.global_in("pinned", Type::Word, StorageClass::ZeroPage);
        let border = b.mapped("border", Type::Byte, 0xD020);
        let buffer = b.global("buffer", Type::array(Type::Byte, 16));
        let placed = b.global_in("placed", Type::Byte, StorageClass::Ram);
        let (_, symbols) = b.finish();

        let counts = usage(&[
            (
                hot,
                VariableUsage {
                    reads: 30,
                    writes: 10,
                    hot_path_accesses: 80,
                    max_loop_depth: 2,
                    ..VariableUsage::default()
                },
            ),
            (
                cold,
                VariableUsage {
                    reads: 1,
                    writes: 1,
                    ..VariableUsage::default()
                },
            ),
        ]);
        let config = AnalysisConfig::default();
        let store = MetadataStore::new();
        let hints = TargetHintAnalyzer::new(&symbols, &config, &counts, &store).analyze();

        // 40 + 20 + 20 + 10
        assert_eq!(hints.priority(hot), Some(90));
        // 4 + 0 + 0 + 5
        assert_eq!(hints.priority(cold), Some(9));
        assert_eq!(hints.priority(pinned), Some(MAX_PRIORITY));
        assert_eq!(hints.priority(border), None);
        assert_eq!(hints.priority(buffer), None);
        assert_eq!(hints.priority(placed), None);
        assert_eq!(hints.ranked()[0], (pinned, MAX_PRIORITY));
    }

    #[test]
    fn test_register_affinity() {
        let mut b = ProgramBuilder::new();
        let main = b.declare_function("main", Type::Void);
        let i = b.local(main, "i", Type::Byte);
        let j = b.local(main, "j", Type::Byte);
        let k = b.local(main, "k", Type::Byte);
        let acc = b.local(main, "acc", Type::Byte);
        let flag = b.local(main, "flag", Type::Byte);
        let wide = b.local(main, "wide", Type::Word);
        let (_, symbols) = b.finish();

        let counts = usage(&[
            (
                i,
                VariableUsage {
                    reads: 10,
                    index_uses: 5,
                    hot_path_accesses: 20,
                    ..VariableUsage::default()
                },
            ),
            (
                j,
                VariableUsage {
                    reads: 4,
                    index_uses: 2,
                    hot_path_accesses: 8,
                    ..VariableUsage::default()
                },
            ),
            (
                k,
                VariableUsage {
                    reads: 1,
                    index_uses: 1,
                    arithmetic_uses: 1,
                    ..VariableUsage::default()
                },
            ),
            (
                acc,
                VariableUsage {
                    reads: 6,
                    arithmetic_uses: 6,
                    ..VariableUsage::default()
                },
            ),
            (
                wide,
                VariableUsage {
                    index_uses: 9,
                    ..VariableUsage::default()
                },
            ),
        ]);
        let config = AnalysisConfig::default();
        let store = MetadataStore::new();
        let hints = TargetHintAnalyzer::new(&symbols, &config, &counts, &store).analyze();

        assert_eq!(hints.affinity(i), Some(Register::X));
        assert_eq!(hints.affinity(j), Some(Register::Y));
        assert_eq!(hints.affinity(k), Some(Register::None));
        assert_eq!(hints.affinity(acc), Some(Register::A));
        assert_eq!(hints.affinity(flag), Some(Register::None));
        assert_eq!(hints.affinity(wide), None);

        let mut store = MetadataStore::new();
        hints.publish(&mut store).unwrap();
        assert_eq!(store.register(i), Some(Register::X));
        assert_eq!(store.number(acc, MetadataKey::ZeroPagePriority), hints.priority(acc).map(i64::from));
    }
}
