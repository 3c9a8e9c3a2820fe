//! Expression facts for the IL generator.
//!
//! - **Complexity**: the Sethi-Ullman number of every expression, the count
//!   of temporaries needed to evaluate it without spilling. With the 6502's
//!   single accumulator this decides which operand is evaluated first.
//! - **Coercion**: where a byte value is widened to a word or a word value
//!   is truncated to a byte. Recorded on the coerced expression.

use super::defuse;
use super::{AnalysisResult, FunctionContext};
use crate::ast::{ExprId, ExprKind, Intrinsic, StmtId, StmtKind, Type};
use crate::metadata::{FactBatch, KeyNamespace, MetadataKey, MetadataStore, MetadataValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Implicit width conversion applied to an expression's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Coercion {
    /// Zero-extend a byte to a word.
    Widen,
    /// Keep the low byte of a word.
    Truncate,
}

impl Coercion {
    /// The conversion from `from` to `to`, if both are numeric and differ in width.
    pub fn between(from: &Type, to: &Type) -> Option<Coercion> {
        let (from, to) = (from.bit_width()?, to.bit_width()?);
        match from.cmp(&to) {
            std::cmp::Ordering::Less => Some(Coercion::Widen),
            std::cmp::Ordering::Greater => Some(Coercion::Truncate),
            std::cmp::Ordering::Equal => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExpressionInfo {
    pub complexity: BTreeMap<ExprId, u32>,
    pub coercions: BTreeMap<ExprId, Coercion>,
}

impl ExpressionInfo {
    pub fn complexity(&self, expr: ExprId) -> Option<u32> {
        self.complexity.get(&expr).copied()
    }

    pub fn coercion(&self, expr: ExprId) -> Option<Coercion> {
        self.coercions.get(&expr).copied()
    }

    pub fn publish(&self, store: &mut MetadataStore) -> AnalysisResult<usize> {
        let mut batch = FactBatch::new();
        for (expr, need) in &self.complexity {
            batch.number(*expr, MetadataKey::Complexity, i64::from(*need));
        }
        for (expr, coercion) in &self.coercions {
            batch.push(*expr, MetadataKey::Coercion, MetadataValue::Coercion(*coercion));
        }
        Ok(batch.commit(store, KeyNamespace::Expressions)?)
    }
}

pub struct ExpressionAnalyzer<'a> {
    ctx: FunctionContext<'a>,
    info: ExpressionInfo,
}

impl<'a> ExpressionAnalyzer<'a> {
    pub fn new(ctx: FunctionContext<'a>) -> Self {
        ExpressionAnalyzer {
            ctx,
            info: ExpressionInfo::default(),
        }
    }

    pub fn analyze(mut self) -> AnalysisResult<ExpressionInfo> {
        for stmt_id in defuse::flatten_statements(self.ctx.program, &self.ctx.function.body)? {
            for root in defuse::statement_roots(self.ctx.program, stmt_id)? {
                self.complexity(root)?;
                self.operand_coercions(root)?;
            }
            self.statement_coercions(stmt_id)?;
        }
        tracing::debug!(
            function = self.ctx.name(),
            expressions = self.info.complexity.len(),
            coercions = self.info.coercions.len(),
            "expression analysis complete"
        );
        Ok(self.info)
    }

    /// Generalized Sethi-Ullman labelling: children sorted by need, the
    /// i-th evaluated child holds i earlier results.
    fn complexity(&mut self, expr: ExprId) -> AnalysisResult<u32> {
        if let Some(need) = self.info.complexity.get(&expr) {
            return Ok(*need);
        }
        let children = self.ctx.expr(expr)?.children();
        let mut needs = Vec::with_capacity(children.len());
        for child in children {
            needs.push(self.complexity(child)?);
        }
        needs.sort_unstable_by(|a, b| b.cmp(a));
        let need = needs
            .iter()
            .enumerate()
            .map(|(held, need)| need + held as u32)
            .max()
            .unwrap_or(1)
            .max(1);
        self.info.complexity.insert(expr, need);
        Ok(need)
    }

    /// Operands of arithmetic and comparisons, call arguments and intrinsic arguments.
    fn operand_coercions(&mut self, root: ExprId) -> AnalysisResult<()> {
        let mut found = Vec::new();
        let program = self.ctx.program;
        let symbols = self.ctx.symbols;
        defuse::walk_expr(program, root, &mut |_, expr| {
            match &expr.kind {
                ExprKind::Binary { op, left, right } => {
                    let (l, r) = (program.expr(*left), program.expr(*right));
                    if let (Some(l), Some(r)) = (l, r) {
                        // Comparisons widen to the wider operand, arithmetic to the result
                        let operand_ty = if op.is_comparison() {
                            if l.ty.bit_width() >= r.ty.bit_width() {
                                &l.ty
                            } else {
                                &r.ty
                            }
                        } else {
                            &expr.ty
                        };
                        found.push((*left, l.ty.clone(), operand_ty.clone()));
                        found.push((*right, r.ty.clone(), operand_ty.clone()));
                    }
                }
                ExprKind::Call { callee, args } => {
                    let params = program
                        .functions()
                        .iter()
                        .find(|f| f.symbol == *callee)
                        .map(|f| f.params.as_slice())
                        .unwrap_or(&[]);
                    for (arg, param) in args.iter().zip(params) {
                        if let (Some(arg_expr), Some(param)) = (program.expr(*arg), symbols.get(*param)) {
                            found.push((*arg, arg_expr.ty.clone(), param.ty.clone()));
                        }
                    }
                }
                ExprKind::Intrinsic { intrinsic, args } => {
                    for (arg, expected) in args.iter().zip(intrinsic_parameters(*intrinsic)) {
                        if let Some(arg_expr) = program.expr(*arg) {
                            found.push((*arg, arg_expr.ty.clone(), expected.clone()));
                        }
                    }
                }
                _ => {}
            }
            Ok(())
        })?;
        for (expr, from, to) in found {
            self.record(expr, &from, &to);
        }
        Ok(())
    }

    /// Values flowing into variables, array elements and return slots.
    fn statement_coercions(&mut self, stmt_id: StmtId) -> AnalysisResult<()> {
        let stmt = self.ctx.stmt(stmt_id)?;
        match &stmt.kind {
            StmtKind::VarDecl {
                symbol,
                initializer: Some(init),
            } => {
                let to = self.ctx.symbol(*symbol)?.ty.clone();
                self.flow(*init, &to)?;
            }
            StmtKind::Assign { target, value, .. } => {
                let to = self.ctx.expr(*target)?.ty.clone();
                self.flow(*value, &to)?;
            }
            StmtKind::Return(Some(value)) => {
                let to = self.ctx.function.return_type.clone();
                self.flow(*value, &to)?;
            }
            StmtKind::For {
                variable,
                start,
                end,
                step,
                ..
            } => {
                let to = self.ctx.symbol(*variable)?.ty.clone();
                self.flow(*start, &to)?;
                self.flow(*end, &to)?;
                if let Some(step) = step {
                    self.flow(*step, &to)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn flow(&mut self, value: ExprId, to: &Type) -> AnalysisResult<()> {
        let from = self.ctx.expr(value)?.ty.clone();
        self.record(value, &from, to);
        Ok(())
    }

    fn record(&mut self, expr: ExprId, from: &Type, to: &Type) {
        if let Some(coercion) = Coercion::between(from, to) {
            self.info.coercions.insert(expr, coercion);
        }
    }
}

const ADDRESS: &[Type] = &[Type::Word];
const BYTE_STORE: &[Type] = &[Type::Word, Type::Byte];
const WORD_STORE: &[Type] = &[Type::Word, Type::Word];

/// Declared parameter types of the memory intrinsics.
fn intrinsic_parameters(intrinsic: Intrinsic) -> &'static [Type] {
    match intrinsic {
        Intrinsic::Peek | Intrinsic::PeekWord | Intrinsic::Lo | Intrinsic::Hi => ADDRESS,
        Intrinsic::Poke => BYTE_STORE,
        Intrinsic::PokeWord => WORD_STORE,
        Intrinsic::Sei | Intrinsic::Cli | Intrinsic::Nop => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryOp, ProgramBuilder};
    use crate::cfg::CfgBuilder;
    use crate::config::AnalysisConfig;

    #[test]
    fn test_sethi_ullman_labels() {
        let mut b = ProgramBuilder::new();
        let main = b.declare_function("main", Type::Byte);
        let (x, y, z, w) = (
            b.param(main, "x", Type::Byte),
            b.param(main, "y", Type::Byte),
            b.param(main, "z", Type::Byte),
            b.param(main, "w", Type::Byte),
        );
        let (rx, ry, rz, rw) = (b.var(x), b.var(y), b.var(z), b.var(w));
        // (x + y) * (z + w) needs three; (x + y) + z needs two
        let left = b.binary(BinaryOp::Add, rx, ry);
        let right = b.binary(BinaryOp::Add, rz, rw);
        let balanced = b.binary(BinaryOp::Mul, left, right);
        let rz2 = b.var(z);
        let lopsided = b.binary(BinaryOp::Add, left, rz2);
        let s1 = b.expr_stmt(balanced);
        let ret = b.ret(Some(lopsided));
        b.set_body(main, vec![s1, ret]);
        let (program, symbols) = b.finish();
        let function = program.function(main.id).unwrap();
        let cfg = CfgBuilder::build(&program, function).unwrap();
        let config = AnalysisConfig::default();
        let ctx = FunctionContext::new(&program, &symbols, function, &cfg, &config);

        let info = ExpressionAnalyzer::new(ctx).analyze().unwrap();
        assert_eq!(info.complexity(rx), Some(1));
        assert_eq!(info.complexity(left), Some(2));
        assert_eq!(info.complexity(balanced), Some(3));
        assert_eq!(info.complexity(lopsided), Some(2));
    }

    #[test]
    fn test_coercion_points() {
        let mut b = ProgramBuilder::new();
        let sink = b.declare_function("sink", Type::Void);
        let _ = b.param(sink, "v", Type::Word);
        b.set_body(sink, vec![]);
        let main = b.declare_function("main", Type::Byte);
        let small = b.local(main, "small", Type::Byte);
        let big = b.local(main, "big", Type::Word);
        let one = b.byte(1);
        let d1 = b.declare(small, Some(one));
        let rs = b.var(small);
        let d2 = b.declare(big, Some(rs));
        let rs2 = b.var(small);
        let rb = b.var(big);
        let sum = b.binary(BinaryOp::Add, rs2, rb);
        let call_arg = b.var(small);
        let call = b.call(sink.symbol, vec![call_arg]);
        let s3 = b.expr_stmt(call);
        let rb2 = b.var(big);
        let ret = b.ret(Some(rb2));
        let s4 = b.assign(big, sum);
        b.set_body(main, vec![d1, d2, s4, s3, ret]);
        let (program, symbols) = b.finish();
        let function = program.function(main.id).unwrap();
        let cfg = CfgBuilder::build(&program, function).unwrap();
        let config = AnalysisConfig::default();
        let ctx = FunctionContext::new(&program, &symbols, function, &cfg, &config);

        let info = ExpressionAnalyzer::new(ctx).analyze().unwrap();
        assert_eq!(info.coercion(one), None);
        assert_eq!(info.coercion(rs), Some(Coercion::Widen));
        assert_eq!(info.coercion(rs2), Some(Coercion::Widen));
        assert_eq!(info.coercion(rb), None);
        assert_eq!(info.coercion(call_arg), Some(Coercion::Widen));
        assert_eq!(info.coercion(rb2), Some(Coercion::Truncate));

        let mut store = MetadataStore::new();
        info.publish(&mut store).unwrap();
        assert_eq!(store.coercion(rb2), Some(Coercion::Truncate));
        assert_eq!(store.number(sum, MetadataKey::Complexity), Some(2));
    }
}
