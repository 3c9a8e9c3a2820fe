//! Escape analysis for function locals.
//!
//! A local escapes when its address is taken, when it is passed to a call,
//! returned, or stored into a non-local. Locals that never escape can live
//! in the function's static frame and be overlaid with the frames of
//! functions that are never active at the same time.

use super::defuse;
use super::{AnalysisResult, FunctionContext};
use crate::ast::{ExprId, ExprKind, StmtKind};
use crate::metadata::{FactBatch, KeyNamespace, MetadataKey, MetadataStore, MetadataValue};
use crate::symbols::SymbolId;
use std::collections::{BTreeMap, BTreeSet};

/// Why a local escaped. The first reason found is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscapeReason {
    AddressTaken,
    PassedToCall,
    Returned,
    StoredNonLocal,
}

#[derive(Debug, Clone, Default)]
pub struct EscapeInfo {
    /// Every parameter and local variable of the function.
    pub locals: BTreeSet<SymbolId>,
    pub address_taken: BTreeSet<SymbolId>,
    pub escaped: BTreeMap<SymbolId, EscapeReason>,
}

impl EscapeInfo {
    pub fn has_escaped(&self, symbol: SymbolId) -> bool {
        self.escaped.contains_key(&symbol)
    }

    pub fn reason(&self, symbol: SymbolId) -> Option<EscapeReason> {
        self.escaped.get(&symbol).copied()
    }

    pub fn is_address_taken(&self, symbol: SymbolId) -> bool {
        self.address_taken.contains(&symbol)
    }

    pub fn is_stack_allocatable(&self, symbol: SymbolId) -> bool {
        self.locals.contains(&symbol) && !self.has_escaped(symbol)
    }

    /// All three flags for every local, so an absent key keeps meaning unknown.
    pub fn publish(&self, store: &mut MetadataStore) -> AnalysisResult<usize> {
        let mut batch = FactBatch::new();
        for &symbol in &self.locals {
            batch.push(
                symbol,
                MetadataKey::AddressTaken,
                MetadataValue::Bool(self.is_address_taken(symbol)),
            );
            batch.push(symbol, MetadataKey::Escapes, MetadataValue::Bool(self.has_escaped(symbol)));
            batch.push(
                symbol,
                MetadataKey::StackAllocatable,
                MetadataValue::Bool(self.is_stack_allocatable(symbol)),
            );
        }
        Ok(batch.commit(store, KeyNamespace::Escape)?)
    }
}

pub struct EscapeAnalyzer<'a> {
    ctx: FunctionContext<'a>,
    info: EscapeInfo,
}

impl<'a> EscapeAnalyzer<'a> {
    pub fn new(ctx: FunctionContext<'a>) -> Self {
        EscapeAnalyzer {
            ctx,
            info: EscapeInfo::default(),
        }
    }

    pub fn analyze(mut self) -> AnalysisResult<EscapeInfo> {
        self.info.locals.extend(self.ctx.function.params.iter().copied());
        let statements = defuse::flatten_statements(self.ctx.program, &self.ctx.function.body)?;

        for &stmt_id in &statements {
            let stmt = self.ctx.stmt(stmt_id)?;
            match &stmt.kind {
                StmtKind::VarDecl { symbol, .. } => {
                    self.info.locals.insert(*symbol);
                }
                StmtKind::For { variable, .. } => {
                    if self.ctx.is_local(*variable)? {
                        self.info.locals.insert(*variable);
                    }
                }
                _ => {}
            }
        }

        for &stmt_id in &statements {
            let stmt = self.ctx.stmt(stmt_id)?;
            match &stmt.kind {
                StmtKind::Return(Some(value)) => self.escape_value(*value, EscapeReason::Returned)?,
                StmtKind::Assign { target, value, .. } => {
                    if !self.target_is_local(*target)? {
                        self.escape_value(*value, EscapeReason::StoredNonLocal)?;
                    }
                }
                _ => {}
            }
            for root in defuse::statement_roots(self.ctx.program, stmt_id)? {
                self.scan(root)?;
            }
        }

        tracing::debug!(
            function = self.ctx.name(),
            locals = self.info.locals.len(),
            escaped = self.info.escaped.len(),
            "escape analysis complete"
        );
        Ok(self.info)
    }

    /// Address-of anywhere, and locals handed to calls.
    fn scan(&mut self, root: ExprId) -> AnalysisResult<()> {
        let mut taken = Vec::new();
        let mut passed = Vec::new();
        defuse::walk_expr(self.ctx.program, root, &mut |_, expr| {
            match &expr.kind {
                ExprKind::AddressOf(symbol) => taken.push(*symbol),
                ExprKind::Call { args, .. } => passed.extend(args.iter().copied()),
                _ => {}
            }
            Ok(())
        })?;
        for symbol in taken {
            if self.info.locals.contains(&symbol) {
                self.info.address_taken.insert(symbol);
                self.info.escaped.entry(symbol).or_insert(EscapeReason::AddressTaken);
            }
        }
        for arg in passed {
            self.escape_value(arg, EscapeReason::PassedToCall)?;
        }
        Ok(())
    }

    /// The local an expression directly names, if it leaves through `reason`.
    fn escape_value(&mut self, value: ExprId, reason: EscapeReason) -> AnalysisResult<()> {
        if let Some(symbol) = defuse::identifier_symbol(self.ctx.program, value) {
            if self.info.locals.contains(&symbol) {
                self.info.escaped.entry(symbol).or_insert(reason);
            }
        }
        Ok(())
    }

    fn target_is_local(&self, target: ExprId) -> AnalysisResult<bool> {
        let symbol = match &self.ctx.expr(target)?.kind {
            ExprKind::Identifier(symbol) => Some(*symbol),
            ExprKind::Index { base, .. } => defuse::identifier_symbol(self.ctx.program, *base),
            _ => None,
        };
        match symbol {
            Some(symbol) => self.ctx.is_local(symbol),
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{ProgramBuilder, Type};
    use crate::cfg::CfgBuilder;
    use crate::config::AnalysisConfig;

    #[test]
    fn test_escape_reasons() {
        let mut b = ProgramBuilder::new();
        let g = b.global("g", Type::Byte);
        let sink = b.declare_function("sink", Type::Void);
        let _ = b.param(sink, "v", Type::Byte);
        b.set_body(sink, vec![]);
        let main = b.declare_function("main", Type::Byte);
        let kept = b.local(main, "kept", Type::Byte);
        let taken = b.local(main, "taken", Type::Byte);
        let passed = b.local(main, "passed", Type::Byte);
        let stored = b.local(main, "stored", Type::Byte);
        let returned = b.local(main, "returned", Type::Byte);
        let p = b.local(main, "p", Type::Word);

        let mut body = Vec::new();
        for symbol in [kept, taken, passed, stored, returned] {
            let zero = b.byte(0);
            body.push(b.declare(symbol, Some(zero)));
        }
        let addr = b.address_of(taken);
        body.push(b.declare(p, Some(addr)));
        let arg = b.var(passed);
        let call = b.call(sink.symbol, vec![arg]);
        body.push(b.expr_stmt(call));
        let rs = b.var(stored);
        body.push(b.assign(g, rs));
        let rk = b.var(kept);
        body.push(b.assign(returned, rk));
        let rr = b.var(returned);
        body.push(b.ret(Some(rr)));
        b.set_body(main, body);
        let (program, symbols) = b.finish();
        let function = program.function(main.id).unwrap();
        let cfg = CfgBuilder::build(&program, function).unwrap();
        let config = AnalysisConfig::default();
        let ctx = FunctionContext::new(&program, &symbols, function, &cfg, &config);

        let info = EscapeAnalyzer::new(ctx).analyze().unwrap();
        assert!(info.is_stack_allocatable(kept));
        assert_eq!(info.reason(taken), Some(EscapeReason::AddressTaken));
        assert_eq!(info.reason(passed), Some(EscapeReason::PassedToCall));
        assert_eq!(info.reason(stored), Some(EscapeReason::StoredNonLocal));
        assert_eq!(info.reason(returned), Some(EscapeReason::Returned));
        assert!(info.is_address_taken(taken));
        assert!(!info.is_address_taken(passed));
        // Globals are never judged here
        assert!(!info.locals.contains(&g));

        let mut store = MetadataStore::new();
        info.publish(&mut store).unwrap();
        assert_eq!(store.get(kept, MetadataKey::Escapes), Some(&MetadataValue::Bool(false)));
        assert!(store.bool_or_default(kept, MetadataKey::StackAllocatable));
        assert!(store.bool_or_default(taken, MetadataKey::AddressTaken));
        assert!(!store.has(g, MetadataKey::Escapes));
    }

    #[test]
    fn test_local_array_element_store_does_not_escape() {
        let mut b = ProgramBuilder::new();
        let main = b.declare_function("main", Type::Void);
        let buf = b.local(main, "buf", Type::array(Type::Byte, 4));
        let x = b.param(main, "x", Type::Byte);
        let decl = b.declare(buf, None);
        let i = b.byte(0);
        let rx = b.var(x);
        let store = b.assign_index(buf, i, rx);
        b.set_body(main, vec![decl, store]);
        let (program, symbols) = b.finish();
        let function = program.function(main.id).unwrap();
        let cfg = CfgBuilder::build(&program, function).unwrap();
        let config = AnalysisConfig::default();
        let ctx = FunctionContext::new(&program, &symbols, function, &cfg, &config);

        let info = EscapeAnalyzer::new(ctx).analyze().unwrap();
        assert!(info.is_stack_allocatable(x));
        assert!(info.is_stack_allocatable(buf));
    }
}
