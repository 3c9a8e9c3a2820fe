//! Variable usage statistics feeding the target hints.
//!
//! Counts reads and writes of every variable a function touches, weighted
//! by the loop depth of the access (read from the published `LoopDepth`
//! facts). Unreachable statements are not counted. Per-function results are
//! merged program-wide by [`ProgramUsage`] so globals accessed from several
//! functions get their totals.

use super::defuse;
use super::{AnalysisResult, FunctionContext};
use crate::ast::{ExprId, ExprKind, StmtId, StmtKind};
use crate::metadata::{FactBatch, KeyNamespace, MetadataKey, MetadataStore};
use crate::symbols::{SymbolId, SymbolTable};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VariableUsage {
    pub reads: u32,
    pub writes: u32,
    /// Sum of the loop depths of all accesses.
    pub hot_path_accesses: u32,
    pub max_loop_depth: u32,
    /// Uses as an array index.
    pub index_uses: u32,
    /// Uses as a direct operand of arithmetic.
    pub arithmetic_uses: u32,
}

impl VariableUsage {
    pub fn accesses(&self) -> u32 {
        self.reads.saturating_add(self.writes)
    }

    pub fn absorb(&mut self, other: &VariableUsage) {
        self.reads = self.reads.saturating_add(other.reads);
        self.writes = self.writes.saturating_add(other.writes);
        self.hot_path_accesses = self.hot_path_accesses.saturating_add(other.hot_path_accesses);
        self.max_loop_depth = self.max_loop_depth.max(other.max_loop_depth);
        self.index_uses = self.index_uses.saturating_add(other.index_uses);
        self.arithmetic_uses = self.arithmetic_uses.saturating_add(other.arithmetic_uses);
    }

    fn read(&mut self, depth: u32) {
        self.reads = self.reads.saturating_add(1);
        self.access(depth);
    }

    fn write(&mut self, depth: u32) {
        self.writes = self.writes.saturating_add(1);
        self.access(depth);
    }

    fn access(&mut self, depth: u32) {
        self.hot_path_accesses = self.hot_path_accesses.saturating_add(depth);
        self.max_loop_depth = self.max_loop_depth.max(depth);
    }
}

#[derive(Debug, Clone, Default)]
pub struct UsageInfo {
    pub usage: BTreeMap<SymbolId, VariableUsage>,
    locals: BTreeSet<SymbolId>,
}

impl UsageInfo {
    pub fn get(&self, symbol: SymbolId) -> Option<&VariableUsage> {
        self.usage.get(&symbol)
    }

    /// Counts of the function's own locals. Globals are published once
    /// merged, by [`ProgramUsage::publish_globals`].
    pub fn publish(&self, store: &mut MetadataStore) -> AnalysisResult<usize> {
        let mut batch = FactBatch::new();
        for (symbol, usage) in &self.usage {
            if self.locals.contains(symbol) {
                push_counts(&mut batch, *symbol, usage);
            }
        }
        Ok(batch.commit(store, KeyNamespace::Usage)?)
    }
}

fn push_counts(batch: &mut FactBatch, symbol: SymbolId, usage: &VariableUsage) {
    batch.number(symbol, MetadataKey::ReadCount, i64::from(usage.reads));
    batch.number(symbol, MetadataKey::WriteCount, i64::from(usage.writes));
    batch.number(symbol, MetadataKey::HotPathAccesses, i64::from(usage.hot_path_accesses));
}

/// Usage of every variable across all analyzed functions.
#[derive(Debug, Clone, Default)]
pub struct ProgramUsage {
    pub usage: BTreeMap<SymbolId, VariableUsage>,
}

impl ProgramUsage {
    pub fn merge<'a>(functions: impl IntoIterator<Item = &'a UsageInfo>) -> Self {
        let mut usage: BTreeMap<SymbolId, VariableUsage> = BTreeMap::new();
        for info in functions {
            for (symbol, counts) in &info.usage {
                usage.entry(*symbol).or_default().absorb(counts);
            }
        }
        ProgramUsage { usage }
    }

    pub fn get(&self, symbol: SymbolId) -> Option<&VariableUsage> {
        self.usage.get(&symbol)
    }

    pub fn publish_globals(&self, symbols: &SymbolTable, store: &mut MetadataStore) -> AnalysisResult<usize> {
        let mut batch = FactBatch::new();
        for (symbol, usage) in &self.usage {
            if symbols.get(*symbol).is_some_and(|s| s.is_global()) {
                push_counts(&mut batch, *symbol, usage);
            }
        }
        Ok(batch.commit(store, KeyNamespace::Usage)?)
    }
}

pub struct UsageAnalyzer<'a> {
    ctx: FunctionContext<'a>,
    /// Earlier facts (loop depths, unreachable statements).
    facts: &'a MetadataStore,
    info: UsageInfo,
}

impl<'a> UsageAnalyzer<'a> {
    pub fn new(ctx: FunctionContext<'a>, facts: &'a MetadataStore) -> Self {
        UsageAnalyzer {
            ctx,
            facts,
            info: UsageInfo::default(),
        }
    }

    pub fn analyze(mut self) -> AnalysisResult<UsageInfo> {
        for stmt_id in defuse::flatten_statements(self.ctx.program, &self.ctx.function.body)? {
            if self.facts.bool_or_default(stmt_id, MetadataKey::Unreachable) {
                continue;
            }
            self.count_statement(stmt_id)?;
        }
        for symbol in self.info.usage.keys() {
            if self.ctx.is_local(*symbol)? {
                self.info.locals.insert(*symbol);
            }
        }
        tracing::debug!(
            function = self.ctx.name(),
            variables = self.info.usage.len(),
            "variable usage collected"
        );
        Ok(self.info)
    }

    fn depth(&self, stmt: StmtId) -> u32 {
        u32::try_from(self.facts.number_or_default(stmt, MetadataKey::LoopDepth)).unwrap_or(0)
    }

    fn count_statement(&mut self, stmt_id: StmtId) -> AnalysisResult<()> {
        let depth = self.depth(stmt_id);
        let stmt = self.ctx.stmt(stmt_id)?;
        match &stmt.kind {
            StmtKind::VarDecl {
                symbol,
                initializer,
            } => {
                if let Some(init) = initializer {
                    self.count_reads(*init, depth)?;
                    self.entry(*symbol).write(depth);
                }
            }
            StmtKind::Assign { target, op, value } => {
                self.count_reads(*value, depth)?;
                let compound = op.binary_op().is_some();
                match &self.ctx.expr(*target)?.kind {
                    ExprKind::Identifier(symbol) => {
                        let usage = self.entry(*symbol);
                        if compound {
                            usage.read(depth);
                            usage.arithmetic_uses = usage.arithmetic_uses.saturating_add(1);
                        }
                        usage.write(depth);
                    }
                    ExprKind::Index { base, index } => {
                        self.count_reads(*index, depth)?;
                        self.count_index(*index);
                        if let Some(array) = defuse::identifier_symbol(self.ctx.program, *base) {
                            let usage = self.entry(array);
                            if compound {
                                usage.read(depth);
                            }
                            usage.write(depth);
                        }
                    }
                    _ => {}
                }
            }
            // The test and the step run once per iteration, one level deeper
            StmtKind::For {
                variable,
                start,
                end,
                step,
                ..
            } => {
                let inner = depth + 1;
                self.count_reads(*start, depth)?;
                self.count_reads(*end, inner)?;
                if let Some(step) = step {
                    self.count_reads(*step, inner)?;
                }
                let usage = self.entry(*variable);
                usage.write(depth);
                usage.read(inner);
                usage.read(inner);
                usage.write(inner);
                usage.arithmetic_uses = usage.arithmetic_uses.saturating_add(1);
            }
            StmtKind::While { condition, .. } => self.count_reads(*condition, depth + 1)?,
            _ => {
                for root in defuse::statement_roots(self.ctx.program, stmt_id)? {
                    self.count_reads(root, depth)?;
                }
            }
        }
        Ok(())
    }

    fn entry(&mut self, symbol: SymbolId) -> &mut VariableUsage {
        self.info.usage.entry(symbol).or_default()
    }

    fn count_reads(&mut self, root: ExprId, depth: u32) -> AnalysisResult<()> {
        let program = self.ctx.program;
        let mut reads = Vec::new();
        let mut indices = Vec::new();
        let mut arithmetic = Vec::new();
        defuse::walk_expr(program, root, &mut |_, expr| {
            match &expr.kind {
                ExprKind::Identifier(symbol) => reads.push(*symbol),
                ExprKind::Index { index, .. } => indices.push(*index),
                ExprKind::Binary { op, left, right } if op.is_arithmetic() => {
                    arithmetic.extend(defuse::identifier_symbol(program, *left));
                    arithmetic.extend(defuse::identifier_symbol(program, *right));
                }
                _ => {}
            }
            Ok(())
        })?;
        for symbol in reads {
            self.entry(symbol).read(depth);
        }
        for index in indices {
            self.count_index(index);
        }
        for symbol in arithmetic {
            let usage = self.entry(symbol);
            usage.arithmetic_uses = usage.arithmetic_uses.saturating_add(1);
        }
        Ok(())
    }

    /// `a[i]` and `a[i + c]` both make `i` an index register candidate.
    fn count_index(&mut self, index: ExprId) {
        let program = self.ctx.program;
        let symbol = match program.expr(index).map(|e| &e.kind) {
            Some(ExprKind::Identifier(symbol)) => Some(*symbol),
            Some(ExprKind::Binary { left, right, .. }) => defuse::identifier_symbol(program, *left)
                .or_else(|| defuse::identifier_symbol(program, *right)),
            _ => None,
        };
        if let Some(symbol) = symbol {
            let usage = self.entry(symbol);
            usage.index_uses = usage.index_uses.saturating_add(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{AssignOp, BinaryOp, ProgramBuilder, Type};
    use crate::cfg::CfgBuilder;
    use crate::config::AnalysisConfig;

    #[test]
    fn test_counts_weighted_by_loop_depth() {
        let mut b = ProgramBuilder::new();
        let total = b.global("total", Type::Byte);
        let main = b.declare_function("main", Type::Void);
        let i = b.local(main, "i", Type::Byte);
        let buf = b.local(main, "buf", Type::array(Type::Byte, 8));
        let ri = b.var(i);
        let element = b.index(buf, ri);
        let acc = b.assign_op(total, AssignOp::Add, element);
        let (s, e) = (b.byte(0), b.byte(7));
        let f = b.for_stmt(i, s, e, None, vec![acc]);
        b.set_body(main, vec![f]);
        let (program, symbols) = b.finish();
        let function = program.function(main.id).unwrap();
        let cfg = CfgBuilder::build(&program, function).unwrap();
        let config = AnalysisConfig::default();
        let ctx = FunctionContext::new(&program, &symbols, function, &cfg, &config);

        let mut store = MetadataStore::new();
        store
            .writer(KeyNamespace::Loops)
            .set(acc, MetadataKey::LoopDepth, crate::metadata::MetadataValue::Number(1))
            .unwrap();
        let info = UsageAnalyzer::new(ctx, &store).analyze().unwrap();

        let total_usage = info.get(total).unwrap();
        assert_eq!((total_usage.reads, total_usage.writes), (1, 1));
        assert_eq!(total_usage.hot_path_accesses, 2);
        assert_eq!(total_usage.max_loop_depth, 1);

        let i_usage = info.get(i).unwrap();
        // init write, test read, step read+write, index read
        assert_eq!(i_usage.accesses(), 5);
        assert_eq!(i_usage.index_uses, 1);
        assert_eq!(i_usage.max_loop_depth, 1);

        info.publish(&mut store).unwrap();
        assert_eq!(store.number(i, MetadataKey::ReadCount), Some(3));
        // Globals wait for the program-wide merge
        assert!(!store.has(total, MetadataKey::ReadCount));
    }

    #[test]
    fn test_program_merge_sums_globals() {
        let mut b = ProgramBuilder::new();
        let g = b.global("g", Type::Byte);
        let mut infos = Vec::new();
        let mut handles = Vec::new();
        for name in ["a", "b"] {
            let f = b.declare_function(name, Type::Void);
            let rg = b.var(g);
            let one = b.byte(1);
            let sum = b.binary(BinaryOp::Add, rg, one);
            let s = b.assign(g, sum);
            b.set_body(f, vec![s]);
            handles.push(f);
        }
        let (program, symbols) = b.finish();
        let config = AnalysisConfig::default();
        let store = MetadataStore::new();
        for handle in &handles {
            let function = program.function(handle.id).unwrap();
            let cfg = CfgBuilder::build(&program, function).unwrap();
            let ctx = FunctionContext::new(&program, &symbols, function, &cfg, &config);
            infos.push(UsageAnalyzer::new(ctx, &store).analyze().unwrap());
        }

        let merged = ProgramUsage::merge(&infos);
        let usage = merged.get(g).unwrap();
        assert_eq!((usage.reads, usage.writes, usage.arithmetic_uses), (2, 2, 2));

        let mut store = MetadataStore::new();
        merged.publish_globals(&symbols, &mut store).unwrap();
        assert_eq!(store.number(g, MetadataKey::WriteCount), Some(2));
    }
}
