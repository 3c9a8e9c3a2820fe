//! Backward liveness analysis, live ranges and dead stores.
//!
//! Non-local symbols the function touches are live at the exit: the caller
//! (or an interrupt handler) may read them afterwards. Live ranges are
//! intervals over the reverse-postorder numbering of the CFG nodes, the
//! linear order the code generator emits them in.
//!
//! A call or a `peek` may read memory the statement does not name. Such a
//! node uses every address-taken local and every non-local the function
//! touches, and an address-taken local stays live across the whole function.

use super::defuse::{self, DefValue, NodeEffect};
use super::fixpoint::{DataflowProblem, Direction, FixpointResult, FixpointSolver};
use super::{AnalysisError, AnalysisResult, FunctionContext};
use crate::ast::{ExprKind, StmtId};
use crate::cfg::{CfgNode, NodeId, NodeRole};
use crate::metadata::{FactBatch, KeyNamespace, MetadataKey, MetadataStore, MetadataValue};
use crate::symbols::SymbolId;
use std::collections::{BTreeMap, BTreeSet};

pub type LiveSet = BTreeSet<SymbolId>;

/// Inclusive interval of linear instruction indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveRange {
    pub start: usize,
    pub end: usize,
}

impl LiveRange {
    pub fn overlaps(&self, other: &LiveRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    fn extend(&mut self, index: usize) {
        self.start = self.start.min(index);
        self.end = self.end.max(index);
    }
}

#[derive(Debug, Clone)]
pub struct LivenessResult {
    pub facts: FixpointResult<LiveSet>,
    /// Nodes in linear order; a node's instruction index is its position.
    pub order: Vec<NodeId>,
    /// Statement to the node carrying its own code.
    pub statement_nodes: BTreeMap<StmtId, NodeId>,
    pub ranges: BTreeMap<SymbolId, LiveRange>,
    pub dead_stores: BTreeSet<StmtId>,
    locals: BTreeSet<SymbolId>,
}

impl LivenessResult {
    pub fn live_in(&self, stmt: StmtId) -> Option<&LiveSet> {
        self.statement_nodes.get(&stmt).and_then(|n| self.facts.before(*n))
    }

    pub fn live_out(&self, stmt: StmtId) -> Option<&LiveSet> {
        self.statement_nodes.get(&stmt).and_then(|n| self.facts.after(*n))
    }

    pub fn range(&self, symbol: SymbolId) -> Option<LiveRange> {
        self.ranges.get(&symbol).copied()
    }

    pub fn is_dead_store(&self, stmt: StmtId) -> bool {
        self.dead_stores.contains(&stmt)
    }

    /// Symbols live on entry to the function.
    pub fn live_on_entry(&self) -> Option<&LiveSet> {
        self.facts.after(NodeId::ENTRY)
    }

    /// Facts on statements, ranges of the function's locals, dead stores.
    pub fn publish(&self, store: &mut MetadataStore) -> AnalysisResult<usize> {
        let mut batch = FactBatch::new();
        for (stmt, node) in &self.statement_nodes {
            if let (Some(live_in), Some(live_out)) = (self.facts.before(*node), self.facts.after(*node)) {
                batch.push(*stmt, MetadataKey::LiveIn, MetadataValue::Symbols(live_in.clone()));
                batch.push(*stmt, MetadataKey::LiveOut, MetadataValue::Symbols(live_out.clone()));
            }
        }
        for (symbol, range) in &self.ranges {
            if self.locals.contains(symbol) {
                batch.number(*symbol, MetadataKey::LiveRangeStart, range.start as i64);
                batch.number(*symbol, MetadataKey::LiveRangeEnd, range.end as i64);
            }
        }
        for stmt in &self.dead_stores {
            batch.flag(*stmt, MetadataKey::DeadStore);
        }
        Ok(batch.commit(store, KeyNamespace::Liveness)?)
    }
}

pub struct LivenessAnalysis<'a> {
    ctx: FunctionContext<'a>,
    effects: Vec<NodeEffect>,
    /// Per node: evaluates a call or a memory-reading intrinsic.
    reads_indirectly: Vec<bool>,
    /// What such a node may read without naming it.
    indirect_uses: LiveSet,
    exit_live: LiveSet,
    locals: BTreeSet<SymbolId>,
    address_taken: BTreeSet<SymbolId>,
}

impl<'a> LivenessAnalysis<'a> {
    pub fn new(ctx: FunctionContext<'a>) -> AnalysisResult<Self> {
        let mut effects = Vec::with_capacity(ctx.cfg.node_count());
        let mut exit_live = LiveSet::new();
        let mut locals = BTreeSet::new();
        let mut reads_indirectly = Vec::with_capacity(ctx.cfg.node_count());
        for node in &ctx.cfg.nodes {
            let effect = defuse::node_effect(&ctx, node)?;
            reads_indirectly.push(reads_unnamed_memory(&ctx, &effect)?);
            let touched = effect.uses.iter().chain(effect.defs.iter().map(|d| &d.symbol));
            for symbol in touched {
                if ctx.is_local(*symbol)? {
                    locals.insert(*symbol);
                } else {
                    exit_live.insert(*symbol);
                }
            }
            effects.push(effect);
        }
        locals.extend(ctx.function.params.iter().copied());
        let address_taken: BTreeSet<SymbolId> = defuse::address_taken_symbols(&ctx)?
            .intersection(&locals)
            .copied()
            .collect();
        let indirect_uses = exit_live.union(&address_taken).copied().collect();
        Ok(LivenessAnalysis {
            ctx,
            effects,
            reads_indirectly,
            indirect_uses,
            exit_live,
            locals,
            address_taken,
        })
    }

    fn effect(&self, node: NodeId) -> AnalysisResult<&NodeEffect> {
        self.effects
            .get(node.index())
            .ok_or_else(|| AnalysisError::MalformedCfg(format!("node {} has no effect summary", node)))
    }

    pub fn analyze(self) -> AnalysisResult<LivenessResult> {
        let solver = FixpointSolver::new(self.ctx.config.dataflow_max_iterations);
        let facts = solver.solve(self.ctx.cfg, &self)?;
        tracing::debug!(
            function = self.ctx.name(),
            iterations = facts.iterations,
            converged = facts.converged,
            "liveness solved"
        );

        let order = self.ctx.cfg.reverse_postorder();
        let mut ranges: BTreeMap<SymbolId, LiveRange> = BTreeMap::new();
        let mut statement_nodes = BTreeMap::new();
        let mut dead_stores = BTreeSet::new();

        for (index, &id) in order.iter().enumerate() {
            let node = self
                .ctx
                .cfg
                .node(id)
                .ok_or_else(|| AnalysisError::MalformedCfg(format!("missing node {}", id)))?;
            if let Some(stmt) = node.stmt {
                statement_nodes.entry(stmt).or_insert(id);
            }

            let effect = self.effect(id)?;
            let before = facts.before(id).into_iter().flatten();
            let after = facts.after(id).into_iter().flatten();
            let defined = effect.defs.iter().map(|d| &d.symbol);
            for symbol in before.chain(after).chain(defined) {
                ranges
                    .entry(*symbol)
                    .and_modify(|r| r.extend(index))
                    .or_insert(LiveRange {
                        start: index,
                        end: index,
                    });
            }

            if node.role != NodeRole::Statement {
                continue;
            }
            let Some(stmt) = node.stmt else {
                continue;
            };
            let live_after = facts.after(id);
            for def in &effect.defs {
                if matches!(def.value, DefValue::Element | DefValue::Uninitialized) {
                    continue;
                }
                let local_scalar = self.locals.contains(&def.symbol)
                    && !self.address_taken.contains(&def.symbol)
                    && self.ctx.symbol(def.symbol)?.is_scalar_variable();
                if local_scalar && !live_after.is_some_and(|live| live.contains(&def.symbol)) {
                    dead_stores.insert(stmt);
                }
            }
        }

        if let Some(last) = order.len().checked_sub(1) {
            for symbol in &self.address_taken {
                ranges.insert(*symbol, LiveRange { start: 0, end: last });
            }
        }

        Ok(LivenessResult {
            facts,
            order,
            statement_nodes,
            ranges,
            dead_stores,
            locals: self.locals,
        })
    }
}

impl DataflowProblem for LivenessAnalysis<'_> {
    type Fact = LiveSet;

    fn name(&self) -> &'static str {
        "liveness"
    }

    fn direction(&self) -> Direction {
        Direction::Backward
    }

    fn neutral(&self) -> LiveSet {
        LiveSet::new()
    }

    fn boundary(&self) -> LiveSet {
        self.exit_live.clone()
    }

    /// `in = (out - strong defs) ∪ uses`
    fn transfer(&self, node: &CfgNode, output: &LiveSet) -> AnalysisResult<LiveSet> {
        let effect = self.effect(node.id)?;
        let mut live = output.clone();
        for def in effect.defs.iter().filter(|d| d.is_strong()) {
            live.remove(&def.symbol);
        }
        live.extend(effect.uses.iter().copied());
        if self.reads_indirectly.get(node.id.index()).copied().unwrap_or(false) {
            live.extend(self.indirect_uses.iter().copied());
        }
        Ok(live)
    }
}

fn reads_unnamed_memory(ctx: &FunctionContext<'_>, effect: &NodeEffect) -> AnalysisResult<bool> {
    let mut found = false;
    for root in &effect.exprs {
        defuse::walk_expr(ctx.program, *root, &mut |_, expr| {
            found |= match &expr.kind {
                ExprKind::Call { .. } => true,
                ExprKind::Intrinsic { intrinsic, .. } => intrinsic.reads_memory(),
                _ => false,
            };
            Ok(())
        })?;
    }
    Ok(found)
}
