//! Forward reaching-definitions analysis.
//!
//! A fact is a `(symbol, site)` pair. Parameters and non-local symbols are
//! defined at the function entry. A strong definition kills every other
//! definition of its symbol; an element store only adds one.

use super::defuse::{self, NodeEffect};
use super::fixpoint::{DataflowProblem, Direction, FixpointResult, FixpointSolver};
use super::{AnalysisError, AnalysisResult, FunctionContext};
use crate::ast::{AssignOp, ExprId, ExprKind, StmtId, StmtKind};
use crate::cfg::{CfgNode, NodeId, NodeRole};
use crate::metadata::{FactBatch, KeyNamespace, MetadataKey, MetadataStore, MetadataValue};
use crate::symbols::SymbolId;
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, BTreeSet};

/// Where a definition happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DefSite {
    /// Parameter binding or value held on entry by a non-local.
    Entry,
    Stmt(StmtId),
    /// The increment of a `for` loop.
    LoopStep(StmtId),
}

impl DefSite {
    pub fn stmt(self) -> Option<StmtId> {
        match self {
            DefSite::Entry => None,
            DefSite::Stmt(stmt) | DefSite::LoopStep(stmt) => Some(stmt),
        }
    }
}

pub type DefinitionSet = BTreeSet<(SymbolId, DefSite)>;

#[derive(Debug, Clone)]
pub struct ReachingResult {
    pub facts: FixpointResult<DefinitionSet>,
    /// Definitions reaching each identifier use.
    pub use_defs: BTreeMap<ExprId, BTreeSet<DefSite>>,
    /// Static definition sites per local symbol.
    pub definition_counts: BTreeMap<SymbolId, usize>,
}

impl ReachingResult {
    pub fn reaching(&self, use_expr: ExprId) -> Option<&BTreeSet<DefSite>> {
        self.use_defs.get(&use_expr)
    }

    /// Definitions of `symbol` reaching the point before `node`.
    pub fn reaching_at(&self, node: NodeId, symbol: SymbolId) -> BTreeSet<DefSite> {
        self.facts
            .before(node)
            .map(|facts| {
                facts
                    .iter()
                    .filter(|(s, _)| *s == symbol)
                    .map(|(_, site)| *site)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn publish(&self, store: &mut MetadataStore) -> AnalysisResult<usize> {
        let mut batch = FactBatch::new();
        for (expr, sites) in &self.use_defs {
            let stmts: BTreeSet<StmtId> = sites.iter().filter_map(|s| s.stmt()).collect();
            batch.push(*expr, MetadataKey::ReachingDefinitions, MetadataValue::Statements(stmts));
        }
        for (symbol, count) in &self.definition_counts {
            batch.number(*symbol, MetadataKey::DefinitionCount, *count as i64);
        }
        Ok(batch.commit(store, KeyNamespace::ReachingDefinitions)?)
    }
}

pub struct ReachingDefinitions<'a> {
    ctx: FunctionContext<'a>,
    effects: Vec<NodeEffect>,
    entry_defs: DefinitionSet,
}

impl<'a> ReachingDefinitions<'a> {
    pub fn new(ctx: FunctionContext<'a>) -> AnalysisResult<Self> {
        let mut effects = Vec::with_capacity(ctx.cfg.node_count());
        let mut entry_defs = DefinitionSet::new();
        for node in &ctx.cfg.nodes {
            let effect = defuse::node_effect(&ctx, node)?;
            let touched = effect.uses.iter().chain(effect.defs.iter().map(|d| &d.symbol));
            for symbol in touched {
                if !ctx.is_local(*symbol)? {
                    entry_defs.insert((*symbol, DefSite::Entry));
                }
            }
            effects.push(effect);
        }
        for param in &ctx.function.params {
            entry_defs.insert((*param, DefSite::Entry));
        }
        Ok(ReachingDefinitions {
            ctx,
            effects,
            entry_defs,
        })
    }

    fn site(node: &CfgNode) -> Option<DefSite> {
        let stmt = node.stmt?;
        Some(match node.role {
            NodeRole::LoopStep => DefSite::LoopStep(stmt),
            _ => DefSite::Stmt(stmt),
        })
    }

    fn effect(&self, node: NodeId) -> AnalysisResult<&NodeEffect> {
        self.effects
            .get(node.index())
            .ok_or_else(|| AnalysisError::MalformedCfg(format!("node {} has no effect summary", node)))
    }

    pub fn analyze(self) -> AnalysisResult<ReachingResult> {
        let solver = FixpointSolver::new(self.ctx.config.dataflow_max_iterations);
        let facts = solver.solve(self.ctx.cfg, &self)?;
        tracing::debug!(
            function = self.ctx.name(),
            iterations = facts.iterations,
            converged = facts.converged,
            "reaching definitions solved"
        );

        let mut use_defs = BTreeMap::new();
        for id in self.ctx.cfg.reverse_postorder() {
            let Some(node) = self.ctx.cfg.node(id) else {
                continue;
            };
            let Some(before) = facts.before(id) else {
                continue;
            };
            for use_expr in self.use_expressions(node)? {
                let Some(symbol) = defuse::identifier_symbol(self.ctx.program, use_expr) else {
                    continue;
                };
                let sites: BTreeSet<DefSite> = before
                    .iter()
                    .filter(|(s, _)| *s == symbol)
                    .map(|(_, site)| *site)
                    .collect();
                use_defs.insert(use_expr, sites);
            }
        }

        let mut definition_counts: FxHashMap<SymbolId, usize> = FxHashMap::default();
        for effect in &self.effects {
            for def in &effect.defs {
                if self.ctx.is_local(def.symbol)? {
                    *definition_counts.entry(def.symbol).or_default() += 1;
                }
            }
        }

        Ok(ReachingResult {
            facts,
            use_defs,
            definition_counts: definition_counts.into_iter().collect(),
        })
    }

    /// Identifier expressions whose value the node reads.
    fn use_expressions(&self, node: &CfgNode) -> AnalysisResult<Vec<ExprId>> {
        let mut out = Vec::new();
        for &root in &self.effect(node.id)?.exprs {
            defuse::walk_expr(self.ctx.program, root, &mut |id, expr| {
                if matches!(expr.kind, ExprKind::Identifier(_)) {
                    out.push(id);
                }
                Ok(())
            })?;
        }
        // A compound assignment reads its target first
        if let Some(stmt) = node.stmt {
            if let StmtKind::Assign { target, op, .. } = &self.ctx.stmt(stmt)?.kind {
                if *op != AssignOp::Assign && defuse::identifier_symbol(self.ctx.program, *target).is_some() {
                    out.push(*target);
                }
            }
        }
        Ok(out)
    }
}

impl DataflowProblem for ReachingDefinitions<'_> {
    type Fact = DefinitionSet;

    fn name(&self) -> &'static str {
        "reaching definitions"
    }

    fn direction(&self) -> Direction {
        Direction::Forward
    }

    fn neutral(&self) -> DefinitionSet {
        DefinitionSet::new()
    }

    fn boundary(&self) -> DefinitionSet {
        self.entry_defs.clone()
    }

    fn transfer(&self, node: &CfgNode, input: &DefinitionSet) -> AnalysisResult<DefinitionSet> {
        let effect = self.effect(node.id)?;
        if effect.defs.is_empty() {
            return Ok(input.clone());
        }
        let Some(site) = Self::site(node) else {
            return Ok(input.clone());
        };
        let killed: BTreeSet<SymbolId> = effect
            .defs
            .iter()
            .filter(|d| d.is_strong())
            .map(|d| d.symbol)
            .collect();
        let mut out: DefinitionSet = input
            .iter()
            .filter(|(symbol, _)| !killed.contains(symbol))
            .copied()
            .collect();
        for def in &effect.defs {
            out.insert((def.symbol, site));
        }
        Ok(out)
    }
}
