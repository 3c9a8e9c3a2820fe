//! Side-effect and purity analysis.
//!
//! Two stages:
//!
//! 1. [`FunctionEffects::collect`] summarizes one function body: which
//!    non-local locations it reads and writes, whether it touches hardware
//!    I/O or the interrupt flag, and which functions it calls.
//! 2. [`PurityAnalyzer`] resolves the summaries over the call graph into a
//!    [`PurityLevel`] per function. A callee without a summary (its analysis
//!    failed, or it is not a known function) makes its callers impure.
//!
//! Hardware reads count as impure: reading a VIC or CIA register can
//! acknowledge an interrupt or advance a latch.

use super::call_graph::CallGraph;
use super::defuse;
use super::{AnalysisResult, FunctionContext};
use crate::ast::{ExprId, ExprKind, FunctionId, Intrinsic, StmtId, StmtKind};
use crate::cfg::NodeId;
use crate::metadata::{FactBatch, KeyNamespace, MetadataKey, MetadataStore, MetadataValue};
use crate::symbols::{Symbol, SymbolId};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

bitflags! {
    /// Observable effects of a function body, callees excluded.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EffectFlags: u16 {
        const READS_GLOBALS = 1 << 0;
        const WRITES_GLOBALS = 1 << 1;
        const READS_HARDWARE = 1 << 2;
        const WRITES_HARDWARE = 1 << 3;
        /// `peek` through a non-constant address.
        const INDIRECT_READS = 1 << 4;
        /// `poke` through a non-constant address.
        const INDIRECT_WRITES = 1 << 5;
        /// `sei` / `cli`.
        const INTERRUPT_CONTROL = 1 << 6;
        /// Calls through a symbol that is not a known function.
        const UNKNOWN_CALLS = 1 << 7;
    }
}

impl EffectFlags {
    /// Effects that make a function impure on their own.
    pub const IMPURE: EffectFlags = EffectFlags::READS_HARDWARE
        .union(EffectFlags::WRITES_HARDWARE)
        .union(EffectFlags::INDIRECT_READS)
        .union(EffectFlags::INDIRECT_WRITES)
        .union(EffectFlags::INTERRUPT_CONTROL)
        .union(EffectFlags::UNKNOWN_CALLS);

    /// Purity of a body with these effects, ignoring its callees.
    pub fn level(self) -> PurityLevel {
        if self.intersects(EffectFlags::IMPURE) {
            PurityLevel::Impure
        } else if self.contains(EffectFlags::WRITES_GLOBALS) {
            PurityLevel::LocalEffects
        } else if self.contains(EffectFlags::READS_GLOBALS) {
            PurityLevel::ReadOnly
        } else {
            PurityLevel::Pure
        }
    }
}

/// Ordered from most to least optimizable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PurityLevel {
    /// Result depends only on the arguments; no memory effects.
    Pure,
    /// Reads program RAM but writes nothing outside its frame.
    ReadOnly,
    /// Writes statically known program RAM, never hardware.
    LocalEffects,
    /// Hardware I/O, interrupt control, unknown writes or unknown callees.
    Impure,
}

/// A call expression and where it sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSite {
    pub expr: ExprId,
    pub stmt: StmtId,
    pub callee: SymbolId,
    /// Nothing runs in the caller after the call returns.
    pub tail: bool,
}

#[derive(Debug, Clone)]
pub struct FunctionEffects {
    pub function: FunctionId,
    pub symbol: SymbolId,
    pub flags: EffectFlags,
    /// Known functions called directly.
    pub callees: BTreeSet<SymbolId>,
    pub calls: Vec<CallSite>,
    pub written: BTreeSet<SymbolId>,
    pub read: BTreeSet<SymbolId>,
    /// Functions whose address this body takes.
    pub address_taken_functions: BTreeSet<SymbolId>,
}

impl FunctionEffects {
    /// Summarize one function body. `facts` supplies constant addresses.
    pub fn collect(ctx: FunctionContext<'_>, facts: &MetadataStore) -> AnalysisResult<FunctionEffects> {
        let mut effects = FunctionEffects {
            function: ctx.function.id,
            symbol: ctx.function.symbol,
            flags: EffectFlags::empty(),
            callees: BTreeSet::new(),
            calls: Vec::new(),
            written: BTreeSet::new(),
            read: BTreeSet::new(),
            address_taken_functions: BTreeSet::new(),
        };

        for stmt_id in defuse::flatten_statements(ctx.program, &ctx.function.body)? {
            let stmt = ctx.stmt(stmt_id)?;
            match &stmt.kind {
                StmtKind::Assign { target, value, .. } => {
                    match &ctx.expr(*target)?.kind {
                        ExprKind::Identifier(symbol) => effects.write(&ctx, *symbol)?,
                        ExprKind::Index { base, index } => {
                            if let Some(array) = defuse::identifier_symbol(ctx.program, *base) {
                                effects.write(&ctx, array)?;
                            }
                            effects.scan(&ctx, facts, stmt_id, *index)?;
                        }
                        _ => {}
                    }
                    effects.scan(&ctx, facts, stmt_id, *value)?;
                }
                StmtKind::For { variable, .. } => {
                    effects.write(&ctx, *variable)?;
                    for root in defuse::statement_roots(ctx.program, stmt_id)? {
                        effects.scan(&ctx, facts, stmt_id, root)?;
                    }
                }
                _ => {
                    for root in defuse::statement_roots(ctx.program, stmt_id)? {
                        effects.scan(&ctx, facts, stmt_id, root)?;
                    }
                }
            }
        }

        effects.mark_tail_calls(&ctx)?;
        tracing::debug!(
            function = ctx.name(),
            flags = ?effects.flags,
            callees = effects.callees.len(),
            "effects collected"
        );
        Ok(effects)
    }

    pub fn level(&self) -> PurityLevel {
        self.flags.level()
    }

    fn write(&mut self, ctx: &FunctionContext<'_>, symbol: SymbolId) -> AnalysisResult<()> {
        let info = ctx.symbol(symbol)?;
        if info.is_local_to(ctx.function.id) || info.is_function() {
            return Ok(());
        }
        self.flags |= if is_hardware(ctx, info) {
            EffectFlags::WRITES_HARDWARE
        } else {
            EffectFlags::WRITES_GLOBALS
        };
        self.written.insert(symbol);
        Ok(())
    }

    fn scan(
        &mut self,
        ctx: &FunctionContext<'_>,
        facts: &MetadataStore,
        stmt: StmtId,
        root: ExprId,
    ) -> AnalysisResult<()> {
        let mut found = Vec::new();
        defuse::walk_expr(ctx.program, root, &mut |id, expr| {
            found.push((id, expr.kind.clone()));
            Ok(())
        })?;
        for (id, kind) in found {
            match kind {
                ExprKind::Identifier(symbol) => {
                    let info = ctx.symbol(symbol)?;
                    if info.is_local_to(ctx.function.id) || info.is_function() {
                        continue;
                    }
                    self.flags |= if is_hardware(ctx, info) {
                        EffectFlags::READS_HARDWARE
                    } else {
                        EffectFlags::READS_GLOBALS
                    };
                    self.read.insert(symbol);
                }
                ExprKind::AddressOf(symbol) => {
                    if ctx.symbol(symbol)?.is_function() {
                        self.address_taken_functions.insert(symbol);
                    }
                }
                ExprKind::Call { callee, .. } => {
                    let known = ctx.program.functions().iter().any(|f| f.symbol == callee);
                    if known {
                        self.callees.insert(callee);
                        self.calls.push(CallSite {
                            expr: id,
                            stmt,
                            callee,
                            tail: false,
                        });
                    } else {
                        self.flags |= EffectFlags::UNKNOWN_CALLS;
                    }
                }
                ExprKind::Intrinsic { intrinsic, args } => {
                    self.intrinsic(ctx, facts, intrinsic, &args)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn intrinsic(
        &mut self,
        ctx: &FunctionContext<'_>,
        facts: &MetadataStore,
        intrinsic: Intrinsic,
        args: &[ExprId],
    ) -> AnalysisResult<()> {
        if matches!(intrinsic, Intrinsic::Sei | Intrinsic::Cli) {
            self.flags |= EffectFlags::INTERRUPT_CONTROL;
            return Ok(());
        }
        if !intrinsic.reads_memory() && !intrinsic.writes_memory() {
            return Ok(());
        }
        let Some(&address) = args.first() else {
            return Ok(());
        };
        let address = defuse::constant_number(ctx, facts, address)?.and_then(|a| u16::try_from(a).ok());
        let writes = intrinsic.writes_memory();
        self.flags |= match (address, writes) {
            (None, false) => EffectFlags::INDIRECT_READS,
            (None, true) => EffectFlags::INDIRECT_WRITES,
            (Some(a), false) if ctx.config.memory_map.is_hardware(a) => EffectFlags::READS_HARDWARE,
            (Some(a), true) if ctx.config.memory_map.is_hardware(a) => EffectFlags::WRITES_HARDWARE,
            (Some(_), false) => EffectFlags::READS_GLOBALS,
            (Some(_), true) => EffectFlags::WRITES_GLOBALS,
        };
        Ok(())
    }

    /// `return f(..)`, or a void call whose node leads straight to the exit.
    fn mark_tail_calls(&mut self, ctx: &FunctionContext<'_>) -> AnalysisResult<()> {
        for call in &mut self.calls {
            let Some(node) = ctx.cfg.node_for_stmt(call.stmt) else {
                continue;
            };
            if !ctx.cfg.is_reachable(node) {
                continue;
            }
            call.tail = match ctx.stmt(call.stmt)?.kind {
                StmtKind::Return(Some(value)) => value == call.expr,
                StmtKind::Expr(value) => value == call.expr && ctx.cfg.succs(node) == [NodeId::EXIT],
                _ => false,
            };
        }
        Ok(())
    }
}

fn is_hardware(ctx: &FunctionContext<'_>, symbol: &Symbol) -> bool {
    symbol.address.is_some_and(|a| ctx.config.memory_map.is_hardware(a))
}

#[derive(Debug, Clone, Default)]
pub struct PurityInfo {
    pub levels: BTreeMap<SymbolId, PurityLevel>,
    /// Non-local locations written, callees included.
    pub written: BTreeMap<SymbolId, BTreeSet<SymbolId>>,
    pub read: BTreeMap<SymbolId, BTreeSet<SymbolId>>,
    pub iterations: usize,
}

impl PurityInfo {
    pub fn level(&self, function: SymbolId) -> Option<PurityLevel> {
        self.levels.get(&function).copied()
    }

    pub fn is_pure(&self, function: SymbolId) -> bool {
        self.level(function) == Some(PurityLevel::Pure)
    }

    pub fn publish(&self, store: &mut MetadataStore) -> AnalysisResult<usize> {
        let mut batch = FactBatch::new();
        for (function, level) in &self.levels {
            batch.push(*function, MetadataKey::PurityLevel, MetadataValue::Purity(*level));
            let written = self.written.get(function).cloned().unwrap_or_default();
            batch.push(*function, MetadataKey::WrittenLocations, MetadataValue::Symbols(written));
            let read = self.read.get(function).cloned().unwrap_or_default();
            batch.push(*function, MetadataKey::ReadLocations, MetadataValue::Symbols(read));
        }
        Ok(batch.commit(store, KeyNamespace::Purity)?)
    }
}

pub struct PurityAnalyzer<'a> {
    graph: &'a CallGraph,
    effects: BTreeMap<SymbolId, &'a FunctionEffects>,
}

impl<'a> PurityAnalyzer<'a> {
    pub fn new(graph: &'a CallGraph, effects: &'a [FunctionEffects]) -> Self {
        PurityAnalyzer {
            graph,
            effects: effects.iter().map(|e| (e.symbol, e)).collect(),
        }
    }

    /// Monotone propagation: a function is at least as impure as its callees.
    pub fn analyze(self) -> PurityInfo {
        let mut info = PurityInfo::default();
        for (symbol, effects) in &self.effects {
            info.levels.insert(*symbol, effects.level());
            info.written.insert(*symbol, effects.written.clone());
            info.read.insert(*symbol, effects.read.clone());
        }

        let mut changed = true;
        while changed {
            changed = false;
            info.iterations += 1;
            for symbol in self.effects.keys() {
                let mut level = info.levels.get(symbol).copied().unwrap_or(PurityLevel::Impure);
                let mut written = info.written.get(symbol).cloned().unwrap_or_default();
                let mut read = info.read.get(symbol).cloned().unwrap_or_default();
                for callee in self.graph.callees(*symbol) {
                    // No summary: assume the worst
                    let callee_level = info.levels.get(&callee).copied().unwrap_or(PurityLevel::Impure);
                    level = level.max(callee_level);
                    if let Some(w) = info.written.get(&callee) {
                        written.extend(w.iter().copied());
                    }
                    if let Some(r) = info.read.get(&callee) {
                        read.extend(r.iter().copied());
                    }
                }
                if info.levels.get(symbol) != Some(&level) {
                    info.levels.insert(*symbol, level);
                    changed = true;
                }
                if info.written.get(symbol) != Some(&written) {
                    info.written.insert(*symbol, written);
                    changed = true;
                }
                if info.read.get(symbol) != Some(&read) {
                    info.read.insert(*symbol, read);
                    changed = true;
                }
            }
        }

        tracing::debug!(
            functions = info.levels.len(),
            iterations = info.iterations,
            "purity resolved"
        );
        info
    }
}
