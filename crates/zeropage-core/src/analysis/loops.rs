//! Loop analysis: natural loops, nesting depth, induction variables,
//! loop-invariant code and trip counts.
//!
//! Natural loops are found from CFG back edges (an edge whose target
//! dominates its source). Loops sharing a header are merged. A statement's
//! depth is the number of loops containing it; a loop statement itself has
//! the depth of its context, its body one more.
//!
//! Invariance is judged against the innermost loop containing the
//! expression. An identifier is invariant when nothing in the loop defines
//! it, it is not memory-mapped hardware, and (for globals and address-taken
//! locals) the loop performs no calls or `poke`s.

use super::defuse::{self, DefValue, NodeEffect};
use super::dominance::Dominators;
use super::{AnalysisResult, FunctionContext};
use crate::ast::{BinaryOp, ExprId, ExprKind, StmtId, StmtKind};
use crate::cfg::NodeId;
use crate::metadata::{FactBatch, KeyNamespace, MetadataKey, MetadataStore};
use crate::symbols::SymbolId;
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NaturalLoop {
    pub header: NodeId,
    /// The `while`/`for` statement owning the header.
    pub stmt: Option<StmtId>,
    pub body: BTreeSet<NodeId>,
    /// Sources of the back edges.
    pub latches: Vec<NodeId>,
    /// 1 for outermost loops.
    pub depth: u32,
    /// Index of the enclosing loop in [`LoopInfo::loops`].
    pub parent: Option<usize>,
}

impl NaturalLoop {
    pub fn contains(&self, node: NodeId) -> bool {
        self.body.contains(&node)
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoopInfo {
    /// Outermost loops first.
    pub loops: Vec<NaturalLoop>,
    /// Nesting depth of statements inside at least one loop.
    pub depths: BTreeMap<StmtId, u32>,
    /// Basic induction variables and the header of the loop they step.
    pub induction_variables: BTreeMap<SymbolId, NodeId>,
    pub invariant: BTreeSet<ExprId>,
    pub hoistable: BTreeSet<ExprId>,
    pub trip_counts: BTreeMap<StmtId, i64>,
    locals: BTreeSet<SymbolId>,
}

impl LoopInfo {
    pub fn depth(&self, stmt: StmtId) -> u32 {
        self.depths.get(&stmt).copied().unwrap_or(0)
    }

    pub fn max_depth(&self) -> u32 {
        self.loops.iter().map(|l| l.depth).max().unwrap_or(0)
    }

    pub fn is_induction_variable(&self, symbol: SymbolId) -> bool {
        self.induction_variables.contains_key(&symbol)
    }

    pub fn is_invariant(&self, expr: ExprId) -> bool {
        self.invariant.contains(&expr)
    }

    pub fn is_hoistable(&self, expr: ExprId) -> bool {
        self.hoistable.contains(&expr)
    }

    pub fn trip_count(&self, stmt: StmtId) -> Option<i64> {
        self.trip_counts.get(&stmt).copied()
    }

    /// The innermost loop containing `node`.
    pub fn innermost(&self, node: NodeId) -> Option<&NaturalLoop> {
        innermost_index(&self.loops, node).and_then(|i| self.loops.get(i))
    }

    pub fn publish(&self, store: &mut MetadataStore) -> AnalysisResult<usize> {
        let mut batch = FactBatch::new();
        for (stmt, depth) in &self.depths {
            batch.number(*stmt, MetadataKey::LoopDepth, i64::from(*depth));
        }
        for symbol in self.induction_variables.keys() {
            if self.locals.contains(symbol) {
                batch.flag(*symbol, MetadataKey::InductionVariable);
            }
        }
        for expr in &self.invariant {
            batch.flag(*expr, MetadataKey::LoopInvariant);
        }
        for expr in &self.hoistable {
            batch.flag(*expr, MetadataKey::Hoistable);
        }
        for (stmt, count) in &self.trip_counts {
            batch.number(*stmt, MetadataKey::TripCount, *count);
        }
        Ok(batch.commit(store, KeyNamespace::Loops)?)
    }
}

fn innermost_index(loops: &[NaturalLoop], node: NodeId) -> Option<usize> {
    loops
        .iter()
        .enumerate()
        .filter(|(_, l)| l.contains(node))
        .max_by_key(|(_, l)| l.depth)
        .map(|(i, _)| i)
}

/// What a loop body does, for invariance checks.
struct LoopScope {
    defined: BTreeSet<SymbolId>,
    /// Calls or memory-writing intrinsics inside the loop.
    writes_memory: bool,
}

pub struct LoopAnalyzer<'a> {
    ctx: FunctionContext<'a>,
    /// Earlier facts (constant loop bounds).
    facts: &'a MetadataStore,
}

impl<'a> LoopAnalyzer<'a> {
    pub fn new(ctx: FunctionContext<'a>, facts: &'a MetadataStore) -> Self {
        LoopAnalyzer { ctx, facts }
    }

    pub fn analyze(self) -> AnalysisResult<LoopInfo> {
        let cfg = self.ctx.cfg;
        let dom = Dominators::compute(cfg);
        let loops = self.find_loops(&dom);

        let mut effects = Vec::with_capacity(cfg.node_count());
        for node in &cfg.nodes {
            effects.push(defuse::node_effect(&self.ctx, node)?);
        }
        let address_taken = defuse::address_taken_symbols(&self.ctx)?;

        let mut info = LoopInfo {
            depths: self.statement_depths(&loops)?,
            ..LoopInfo::default()
        };

        let mut scopes = Vec::with_capacity(loops.len());
        for natural in &loops {
            scopes.push(self.scope_of(natural, &effects)?);
            self.find_induction_variables(natural, &effects, &mut info.induction_variables)?;
            if let Some(count) = self.trip_count(natural, &effects)? {
                if let Some(stmt) = natural.stmt {
                    info.trip_counts.insert(stmt, count);
                }
            }
        }

        for id in cfg.reverse_postorder() {
            let Some(index) = innermost_index(&loops, id) else {
                continue;
            };
            let (Some(natural), Some(scope), Some(effect)) =
                (loops.get(index), scopes.get(index), effects.get(id.index()))
            else {
                continue;
            };
            let every_iteration = natural.latches.iter().all(|latch| dom.dominates(id, *latch));
            let mut memo = FxHashMap::default();
            for &root in &effect.exprs {
                self.mark_invariant(root, scope, &address_taken, &mut memo)?;
            }
            for (expr, invariant) in memo {
                if !invariant {
                    continue;
                }
                info.invariant.insert(expr);
                if every_iteration && self.worth_hoisting(expr)? {
                    info.hoistable.insert(expr);
                }
            }
        }

        for natural in &loops {
            for node in &natural.body {
                for def in effects.get(node.index()).map(|e| e.defs.as_slice()).unwrap_or(&[]) {
                    if self.ctx.is_local(def.symbol)? {
                        info.locals.insert(def.symbol);
                    }
                }
            }
        }

        tracing::debug!(
            function = self.ctx.name(),
            loops = loops.len(),
            induction_variables = info.induction_variables.len(),
            hoistable = info.hoistable.len(),
            "loop analysis complete"
        );
        info.loops = loops;
        Ok(info)
    }

    /// Natural loops, outermost first, with nesting resolved.
    fn find_loops(&self, dom: &Dominators) -> Vec<NaturalLoop> {
        let cfg = self.ctx.cfg;
        let mut latches: BTreeMap<NodeId, Vec<NodeId>> = BTreeMap::new();
        for node in cfg.reverse_postorder() {
            for &succ in cfg.succs(node) {
                if dom.dominates(succ, node) {
                    latches.entry(succ).or_default().push(node);
                }
            }
        }

        let mut loops: Vec<NaturalLoop> = latches
            .into_iter()
            .map(|(header, latches)| {
                // Walk backwards from the latches until the header
                let mut body = BTreeSet::from([header]);
                let mut worklist: Vec<NodeId> = latches.clone();
                while let Some(node) = worklist.pop() {
                    if !dom.is_reachable(node) || !body.insert(node) {
                        continue;
                    }
                    worklist.extend(cfg.preds(node).iter().copied());
                }
                NaturalLoop {
                    header,
                    stmt: cfg.node(header).and_then(|n| n.stmt),
                    body,
                    latches,
                    depth: 1,
                    parent: None,
                }
            })
            .collect();

        // Larger bodies first, so an enclosing loop is always processed earlier
        loops.sort_by(|a, b| b.body.len().cmp(&a.body.len()).then(a.header.cmp(&b.header)));
        for i in 0..loops.len() {
            let header = loops[i].header;
            let parent = (0..i)
                .filter(|&j| loops[j].contains(header))
                .min_by_key(|&j| loops[j].body.len());
            if let Some(parent) = parent {
                loops[i].parent = Some(parent);
                loops[i].depth = loops[parent].depth + 1;
            }
        }
        loops
    }

    fn statement_depths(&self, loops: &[NaturalLoop]) -> AnalysisResult<BTreeMap<StmtId, u32>> {
        let mut depths = BTreeMap::new();
        for stmt in defuse::flatten_statements(self.ctx.program, &self.ctx.function.body)? {
            let Some(node) = self.ctx.cfg.node_for_stmt(stmt) else {
                continue;
            };
            let depth = loops
                .iter()
                .filter(|l| l.contains(node) && l.stmt != Some(stmt))
                .count() as u32;
            if depth > 0 {
                depths.insert(stmt, depth);
            }
        }
        Ok(depths)
    }

    fn scope_of(&self, natural: &NaturalLoop, effects: &[NodeEffect]) -> AnalysisResult<LoopScope> {
        let mut scope = LoopScope {
            defined: BTreeSet::new(),
            writes_memory: false,
        };
        for node in &natural.body {
            let Some(effect) = effects.get(node.index()) else {
                continue;
            };
            scope.defined.extend(effect.defs.iter().map(|d| d.symbol));
            for &root in &effect.exprs {
                defuse::walk_expr(self.ctx.program, root, &mut |_, expr| {
                    match &expr.kind {
                        ExprKind::Call { .. } => scope.writes_memory = true,
                        ExprKind::Intrinsic { intrinsic, .. } if intrinsic.writes_memory() => {
                            scope.writes_memory = true
                        }
                        _ => {}
                    }
                    Ok(())
                })?;
            }
        }
        Ok(scope)
    }

    /// `for` variables and variables stepped once per iteration by a constant.
    fn find_induction_variables(
        &self,
        natural: &NaturalLoop,
        effects: &[NodeEffect],
        out: &mut BTreeMap<SymbolId, NodeId>,
    ) -> AnalysisResult<()> {
        let mut defs: BTreeMap<SymbolId, Vec<DefValue>> = BTreeMap::new();
        for node in &natural.body {
            for def in effects.get(node.index()).map(|e| e.defs.as_slice()).unwrap_or(&[]) {
                defs.entry(def.symbol).or_default().push(def.value);
            }
        }
        for (symbol, values) in defs {
            let [value] = values.as_slice() else {
                continue;
            };
            let stepped = match *value {
                DefValue::Increment(None) => true,
                DefValue::Increment(Some(step)) => self.is_constant(step)?,
                DefValue::Compound(BinaryOp::Add | BinaryOp::Sub, step) => self.is_constant(step)?,
                DefValue::Assign(expr) => self.is_self_step(symbol, expr)?,
                _ => false,
            };
            if stepped {
                out.entry(symbol).or_insert(natural.header);
            }
        }
        Ok(())
    }

    /// `v + c`, `c + v` or `v - c`.
    fn is_self_step(&self, symbol: SymbolId, expr: ExprId) -> AnalysisResult<bool> {
        let ExprKind::Binary { op, left, right } = self.ctx.expr(expr)?.kind else {
            return Ok(false);
        };
        let is_var = |e: ExprId| defuse::identifier_symbol(self.ctx.program, e) == Some(symbol);
        Ok(match op {
            BinaryOp::Add => {
                (is_var(left) && self.is_constant(right)?) || (is_var(right) && self.is_constant(left)?)
            }
            BinaryOp::Sub => is_var(left) && self.is_constant(right)?,
            _ => false,
        })
    }

    fn is_constant(&self, expr: ExprId) -> AnalysisResult<bool> {
        Ok(defuse::constant_number(&self.ctx, self.facts, expr)?.is_some())
    }

    /// Iterations of a `for` loop with constant bounds and no early exit.
    fn trip_count(&self, natural: &NaturalLoop, effects: &[NodeEffect]) -> AnalysisResult<Option<i64>> {
        let Some(stmt) = natural.stmt else {
            return Ok(None);
        };
        let StmtKind::For {
            variable,
            start,
            end,
            step,
            ..
        } = self.ctx.stmt(stmt)?.kind
        else {
            return Ok(None);
        };

        let cfg = self.ctx.cfg;
        let early_exit = natural
            .body
            .iter()
            .filter(|n| **n != natural.header)
            .any(|n| cfg.succs(*n).iter().any(|s| !natural.contains(*s)));
        let redefined = natural
            .body
            .iter()
            .filter_map(|n| effects.get(n.index()))
            .filter(|e| e.defines(variable))
            .count()
            > 1;
        if early_exit || redefined {
            return Ok(None);
        }

        let constant = |e: ExprId| defuse::constant_number(&self.ctx, self.facts, e);
        let (Some(start), Some(end)) = (constant(start)?, constant(end)?) else {
            return Ok(None);
        };
        let step = match step {
            Some(step) => match constant(step)? {
                Some(step) => step,
                None => return Ok(None),
            },
            None => 1,
        };
        if step <= 0 {
            return Ok(None);
        }
        if end < start {
            return Ok(Some(0));
        }
        // Bounds far outside the variable's width give up rather than wrap i64
        let Some(count) = end
            .checked_sub(start)
            .and_then(|distance| distance.checked_div(step))
            .and_then(|steps| steps.checked_add(1))
        else {
            return Ok(None);
        };
        let Some(past_last) = (count - 1)
            .checked_mul(step)
            .and_then(|offset| start.checked_add(offset))
            .and_then(|last| last.checked_add(step))
        else {
            return Ok(None);
        };

        // The final increment must not wrap past the variable's width
        let max = self
            .ctx
            .symbol(variable)?
            .ty
            .bit_width()
            .map(|bits| (1i64 << bits) - 1);
        if max.is_some_and(|max| past_last > max) {
            return Ok(None);
        }
        Ok(Some(count))
    }

    /// Invariance of `expr` and its sub-expressions, memoized.
    fn mark_invariant(
        &self,
        expr: ExprId,
        scope: &LoopScope,
        address_taken: &BTreeSet<SymbolId>,
        memo: &mut FxHashMap<ExprId, bool>,
    ) -> AnalysisResult<bool> {
        if let Some(known) = memo.get(&expr) {
            return Ok(*known);
        }
        let node = self.ctx.expr(expr)?;
        let invariant = match &node.kind {
            ExprKind::Literal(_) | ExprKind::AddressOf(_) => true,
            ExprKind::Identifier(symbol) => self.symbol_invariant(*symbol, scope, address_taken)?,
            ExprKind::Binary { left, right, .. } => {
                let left = self.mark_invariant(*left, scope, address_taken, memo)?;
                let right = self.mark_invariant(*right, scope, address_taken, memo)?;
                left && right
            }
            ExprKind::Unary { operand, .. } => self.mark_invariant(*operand, scope, address_taken, memo)?,
            ExprKind::Index { base, index } => {
                let base = self.mark_invariant(*base, scope, address_taken, memo)?;
                let index = self.mark_invariant(*index, scope, address_taken, memo)?;
                base && index && !scope.writes_memory
            }
            ExprKind::Intrinsic { intrinsic, args } => {
                let mut all = true;
                for arg in args {
                    all &= self.mark_invariant(*arg, scope, address_taken, memo)?;
                }
                all && intrinsic.is_pure()
            }
            ExprKind::Call { args, .. } => {
                for arg in args {
                    self.mark_invariant(*arg, scope, address_taken, memo)?;
                }
                false
            }
        };
        memo.insert(expr, invariant);
        Ok(invariant)
    }

    fn symbol_invariant(
        &self,
        symbol: SymbolId,
        scope: &LoopScope,
        address_taken: &BTreeSet<SymbolId>,
    ) -> AnalysisResult<bool> {
        if scope.defined.contains(&symbol) {
            return Ok(false);
        }
        let info = self.ctx.symbol(symbol)?;
        if info.is_memory_mapped() {
            return Ok(false);
        }
        let private = info.is_local_to(self.ctx.function_id()) && !address_taken.contains(&symbol);
        Ok(private || !scope.writes_memory)
    }

    /// Leaves are already as cheap as a hoisted temporary.
    fn worth_hoisting(&self, expr: ExprId) -> AnalysisResult<bool> {
        Ok(matches!(
            self.ctx.expr(expr)?.kind,
            ExprKind::Binary { .. } | ExprKind::Unary { .. } | ExprKind::Index { .. } | ExprKind::Intrinsic { .. }
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{AssignOp, Intrinsic, Program, ProgramBuilder, Type};
    use crate::cfg::{CfgBuilder, ControlFlowGraph};
    use crate::config::AnalysisConfig;
    use crate::symbols::SymbolTable;

    fn analyze(program: &Program, symbols: &SymbolTable, name: &str) -> (ControlFlowGraph, LoopInfo) {
        let function = program.function_by_name(name).unwrap();
        let cfg = CfgBuilder::build(program, function).unwrap();
        let config = AnalysisConfig::default();
        let store = MetadataStore::new();
        let info = {
            let ctx = FunctionContext::new(program, symbols, function, &cfg, &config);
            LoopAnalyzer::new(ctx, &store).analyze().unwrap()
        };
        (cfg, info)
    }

    #[test]
    fn test_nested_loop_depths() {
        let mut b = ProgramBuilder::new();
        let main = b.declare_function("main", Type::Void);
        let i = b.local(main, "i", Type::Byte);
        let j = b.local(main, "j", Type::Byte);
        let sum = b.local(main, "sum", Type::Byte);
        let rj = b.var(j);
        let inner_body = b.assign_op(sum, AssignOp::Add, rj);
        let (s0, e0) = (b.byte(0), b.byte(3));
        let inner = b.for_stmt(j, s0, e0, None, vec![inner_body]);
        let (s1, e1) = (b.byte(0), b.byte(3));
        let outer = b.for_stmt(i, s1, e1, None, vec![inner]);
        let zero = b.byte(0);
        let init = b.declare(sum, Some(zero));
        b.set_body(main, vec![init, outer]);
        let (program, symbols) = b.finish();

        let (_, info) = analyze(&program, &symbols, "main");
        assert_eq!(info.loops.len(), 2);
        assert_eq!(info.max_depth(), 2);
        assert_eq!(info.depth(init), 0);
        assert_eq!(info.depth(outer), 0);
        assert_eq!(info.depth(inner), 1);
        assert_eq!(info.depth(inner_body), 2);
        assert!(info.is_induction_variable(i));
        assert!(info.is_induction_variable(j));
        assert!(!info.is_induction_variable(sum));
    }

    #[test]
    fn test_while_counter_is_induction_variable() {
        let mut b = ProgramBuilder::new();
        let main = b.declare_function("main", Type::Void);
        let n = b.local(main, "n", Type::Byte);
        let ten = b.byte(10);
        let init = b.declare(n, Some(ten));
        let rn = b.var(n);
        let zero = b.byte(0);
        let cond = b.binary(BinaryOp::Gt, rn, zero);
        let rn2 = b.var(n);
        let one = b.byte(1);
        let dec = b.binary(BinaryOp::Sub, rn2, one);
        let step = b.assign(n, dec);
        let w = b.while_stmt(cond, vec![step]);
        b.set_body(main, vec![init, w]);
        let (program, symbols) = b.finish();

        let (cfg, info) = analyze(&program, &symbols, "main");
        assert!(info.is_induction_variable(n));
        assert_eq!(info.depth(w), 0);
        assert_eq!(info.depth(step), 1);
        // No trip count for while loops
        assert_eq!(info.trip_count(w), None);
        let header = cfg.node_for_stmt(w).unwrap();
        assert_eq!(info.innermost(header).map(|l| l.stmt), Some(Some(w)));
    }

    #[test]
    fn test_invariant_product_is_hoistable() {
        let mut b = ProgramBuilder::new();
        let main = b.declare_function("main", Type::Void);
        let a = b.param(main, "a", Type::Byte);
        let c = b.param(main, "c", Type::Byte);
        let i = b.local(main, "i", Type::Byte);
        let buf = b.local(main, "buf", Type::array(Type::Byte, 16));
        let ra = b.var(a);
        let rc = b.var(c);
        let product = b.binary(BinaryOp::Mul, ra, rc);
        let ri = b.var(i);
        let varying = b.binary(BinaryOp::Add, product, ri);
        let ri2 = b.var(i);
        let store = b.assign_index(buf, ri2, varying);
        let (s, e) = (b.byte(0), b.byte(15));
        let f = b.for_stmt(i, s, e, None, vec![store]);
        b.set_body(main, vec![f]);
        let (program, symbols) = b.finish();

        let (_, info) = analyze(&program, &symbols, "main");
        assert!(info.is_invariant(product));
        assert!(info.is_hoistable(product));
        assert!(info.is_invariant(ra));
        assert!(!info.is_hoistable(ra));
        assert!(!info.is_invariant(varying));
        assert!(!info.is_invariant(ri));
        assert_eq!(info.trip_count(f), Some(16));
    }

    #[test]
    fn test_global_not_invariant_across_calls() {
        let mut b = ProgramBuilder::new();
        let g = b.global("g", Type::Byte);
        let tick = b.declare_function("tick", Type::Void);
        b.set_body(tick, vec![]);
        let main = b.declare_function("main", Type::Void);
        let i = b.local(main, "i", Type::Byte);
        let x = b.local(main, "x", Type::Byte);
        let call = b.call(tick.symbol, vec![]);
        let call_stmt = b.expr_stmt(call);
        let rg = b.var(g);
        let one = b.byte(1);
        let read = b.binary(BinaryOp::Add, rg, one);
        let assign = b.assign(x, read);
        let (s, e) = (b.byte(0), b.byte(4));
        let f = b.for_stmt(i, s, e, None, vec![call_stmt, assign]);
        b.set_body(main, vec![f]);
        let (program, symbols) = b.finish();

        let (_, info) = analyze(&program, &symbols, "main");
        assert!(!info.is_invariant(rg));
        assert!(!info.is_invariant(read));
        assert!(!info.is_invariant(call));
    }

    #[test]
    fn test_hardware_reads_are_never_invariant() {
        let mut b = ProgramBuilder::new();
        let raster = b.mapped("raster", Type::Byte, 0xD012);
        let main = b.declare_function("main", Type::Void);
        let x = b.local(main, "x", Type::Byte);
        let rr = b.var(raster);
        let assign = b.assign(x, rr);
        let addr = b.word(0xD012);
        let peek = b.intrinsic(Intrinsic::Peek, vec![addr]);
        let peek_stmt = b.expr_stmt(peek);
        let cond = b.boolean(true);
        let w = b.while_stmt(cond, vec![assign, peek_stmt]);
        b.set_body(main, vec![w]);
        let (program, symbols) = b.finish();

        let (_, info) = analyze(&program, &symbols, "main");
        assert!(!info.is_invariant(rr));
        assert!(!info.is_invariant(peek));
        assert!(info.is_invariant(addr));
    }

    #[test]
    fn test_trip_counts() {
        let mut b = ProgramBuilder::new();
        let main = b.declare_function("main", Type::Void);
        let i = b.local(main, "i", Type::Byte);
        let (s, e, st) = (b.byte(0), b.byte(9), b.byte(2));
        let stepped = b.for_stmt(i, s, e, Some(st), vec![]);
        let (s, e) = (b.byte(5), b.byte(1));
        let empty = b.for_stmt(i, s, e, None, vec![]);
        let (s, e) = (b.byte(0), b.byte(255));
        let wraps = b.for_stmt(i, s, e, None, vec![]);
        let brk = b.break_stmt();
        let (s, e) = (b.byte(0), b.byte(9));
        let exits = b.for_stmt(i, s, e, None, vec![brk]);
        b.set_body(main, vec![stepped, empty, wraps, exits]);
        let (program, symbols) = b.finish();

        let (_, info) = analyze(&program, &symbols, "main");
        assert_eq!(info.trip_count(stepped), Some(5));
        assert_eq!(info.trip_count(empty), Some(0));
        assert_eq!(info.trip_count(wraps), None);
        assert_eq!(info.trip_count(exits), None);

        let mut store = MetadataStore::new();
        info.publish(&mut store).unwrap();
        assert_eq!(store.number(stepped, MetadataKey::TripCount), Some(5));
        assert!(store.bool_or_default(i, MetadataKey::InductionVariable));
    }

    #[test]
    fn test_extreme_bounds_have_no_trip_count() {
        let mut b = ProgramBuilder::new();
        let main = b.declare_function("main", Type::Void);
        let w = b.local(main, "w", Type::Word);
        let (s, e) = (b.word(i64::MIN), b.word(i64::MAX));
        let full = b.for_stmt(w, s, e, None, vec![]);
        let (s, e, st) = (b.word(0), b.word(i64::MAX), b.word(1));
        let longest = b.for_stmt(w, s, e, Some(st), vec![]);
        let (s, e, st) = (b.word(i64::MAX - 1), b.word(i64::MAX), b.word(i64::MAX));
        let huge_step = b.for_stmt(w, s, e, Some(st), vec![]);
        let (s, e) = (b.word(0), b.word(999));
        let fits = b.for_stmt(w, s, e, None, vec![]);
        b.set_body(main, vec![full, longest, huge_step, fits]);
        let (program, symbols) = b.finish();

        let (_, info) = analyze(&program, &symbols, "main");
        assert_eq!(info.trip_count(full), None);
        assert_eq!(info.trip_count(longest), None);
        assert_eq!(info.trip_count(huge_step), None);
        assert_eq!(info.trip_count(fits), Some(1000));
    }
}
