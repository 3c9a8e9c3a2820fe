//! Forward constant propagation over the three-level value lattice.
//!
//! Tracked variables are the function's scalar parameters and locals whose
//! address is never taken; every other symbol evaluates to `Bottom`.
//! Parameters enter as `Bottom`, a declaration without initializer defines
//! `Bottom`, and a tracked local that has not been defined yet reads as
//! `Top`. Arithmetic wraps to the width of the expression's type.

use super::defuse::{self, DefValue, NodeEffect};
use super::fixpoint::{DataflowProblem, Direction, FixpointResult, FixpointSolver, Lattice};
use super::{AnalysisError, AnalysisResult, FunctionContext};
use crate::ast::{BinaryOp, ExprId, ExprKind, Intrinsic, Literal, StmtId, StmtKind, Type, UnaryOp};
use crate::cfg::{CfgNode, NodeId, NodeRole};
use crate::diagnostics::Diagnostic;
use crate::metadata::{FactBatch, KeyNamespace, MetadataKey, MetadataStore, MetadataValue};
use crate::symbols::SymbolId;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A compile-time value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstValue {
    Number(i64),
    Bool(bool),
}

impl ConstValue {
    pub fn as_number(self) -> Option<i64> {
        match self {
            ConstValue::Number(n) => Some(n),
            ConstValue::Bool(_) => None,
        }
    }

    pub fn as_bool(self) -> Option<bool> {
        match self {
            ConstValue::Bool(b) => Some(b),
            ConstValue::Number(_) => None,
        }
    }
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstValue::Number(n) => write!(f, "{}", n),
            ConstValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// `Top ⊐ Constant(v) ⊐ Bottom`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LatticeValue {
    /// Not yet analyzed, optimistically constant.
    Top,
    Constant(ConstValue),
    /// Proven non-constant.
    Bottom,
}

impl LatticeValue {
    pub fn as_constant(self) -> Option<ConstValue> {
        match self {
            LatticeValue::Constant(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_constant(self) -> bool {
        matches!(self, LatticeValue::Constant(_))
    }
}

impl Lattice for LatticeValue {
    fn join(&self, other: &Self) -> Self {
        match (self, other) {
            (LatticeValue::Top, x) | (x, LatticeValue::Top) => *x,
            (LatticeValue::Bottom, _) | (_, LatticeValue::Bottom) => LatticeValue::Bottom,
            (LatticeValue::Constant(a), LatticeValue::Constant(b)) => {
                if a == b {
                    LatticeValue::Constant(*a)
                } else {
                    LatticeValue::Bottom
                }
            }
        }
    }
}

/// Lattice value per variable. Absent variables are `Top`; `Top` is never
/// stored, so equal fact sets compare equal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConstantFacts {
    values: BTreeMap<SymbolId, LatticeValue>,
}

impl ConstantFacts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, symbol: SymbolId) -> LatticeValue {
        self.values.get(&symbol).copied().unwrap_or(LatticeValue::Top)
    }

    pub fn set(&mut self, symbol: SymbolId, value: LatticeValue) {
        if value == LatticeValue::Top {
            self.values.remove(&symbol);
        } else {
            self.values.insert(symbol, value);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (SymbolId, LatticeValue)> + '_ {
        self.values.iter().map(|(s, v)| (*s, *v))
    }
}

impl Lattice for ConstantFacts {
    fn join(&self, other: &Self) -> Self {
        let mut out = self.clone();
        for (symbol, value) in other.iter() {
            out.set(symbol, self.get(symbol).join(&value));
        }
        out
    }
}

/// Fold a binary operator over constants. `None` when the operator is not
/// evaluable (division by zero, mismatched operand kinds).
pub fn fold_binary(op: BinaryOp, left: ConstValue, right: ConstValue, ty: &Type) -> Option<ConstValue> {
    use ConstValue::{Bool, Number};
    let value = match (op, left, right) {
        (BinaryOp::Add, Number(a), Number(b)) => Number(wrap(a.wrapping_add(b), ty)),
        (BinaryOp::Sub, Number(a), Number(b)) => Number(wrap(a.wrapping_sub(b), ty)),
        (BinaryOp::Mul, Number(a), Number(b)) => Number(wrap(a.wrapping_mul(b), ty)),
        (BinaryOp::Div, Number(_), Number(0)) | (BinaryOp::Mod, Number(_), Number(0)) => return None,
        (BinaryOp::Div, Number(a), Number(b)) => Number(wrap(a.wrapping_div(b), ty)),
        (BinaryOp::Mod, Number(a), Number(b)) => Number(wrap(a.wrapping_rem(b), ty)),
        (BinaryOp::BitAnd, Number(a), Number(b)) => Number(wrap(a & b, ty)),
        (BinaryOp::BitOr, Number(a), Number(b)) => Number(wrap(a | b, ty)),
        (BinaryOp::BitXor, Number(a), Number(b)) => Number(wrap(a ^ b, ty)),
        (BinaryOp::Shl, Number(a), Number(b)) => Number(wrap(shift(a, b, i64::checked_shl), ty)),
        (BinaryOp::Shr, Number(a), Number(b)) => Number(wrap(shift(a, b, i64::checked_shr), ty)),
        (BinaryOp::Eq, a, b) => Bool(a == b),
        (BinaryOp::Ne, a, b) => Bool(a != b),
        (BinaryOp::Lt, Number(a), Number(b)) => Bool(a < b),
        (BinaryOp::Le, Number(a), Number(b)) => Bool(a <= b),
        (BinaryOp::Gt, Number(a), Number(b)) => Bool(a > b),
        (BinaryOp::Ge, Number(a), Number(b)) => Bool(a >= b),
        (BinaryOp::And, Bool(a), Bool(b)) => Bool(a && b),
        (BinaryOp::Or, Bool(a), Bool(b)) => Bool(a || b),
        _ => return None,
    };
    Some(value)
}

pub fn fold_unary(op: UnaryOp, operand: ConstValue, ty: &Type) -> Option<ConstValue> {
    match (op, operand) {
        (UnaryOp::Neg, ConstValue::Number(n)) => Some(ConstValue::Number(wrap(n.wrapping_neg(), ty))),
        (UnaryOp::BitNot, ConstValue::Number(n)) => Some(ConstValue::Number(wrap(!n, ty))),
        (UnaryOp::Not, ConstValue::Bool(b)) => Some(ConstValue::Bool(!b)),
        _ => None,
    }
}

fn shift(value: i64, amount: i64, op: fn(i64, u32) -> Option<i64>) -> i64 {
    u32::try_from(amount)
        .ok()
        .and_then(|amount| op(value, amount))
        .unwrap_or(0)
}

/// Truncate to the type's width; non-numeric types are left alone.
pub fn wrap(value: i64, ty: &Type) -> i64 {
    match ty.bit_width() {
        Some(bits) => value & ((1i64 << bits) - 1),
        None => value,
    }
}

/// Results of constant propagation for one function.
#[derive(Debug, Clone)]
pub struct ConstantResult {
    pub facts: FixpointResult<ConstantFacts>,
    /// Every expression in a reachable node that folds to a constant.
    pub expression_values: BTreeMap<ExprId, ConstValue>,
    /// Tracked variables with one static definition resolving to a constant.
    pub effectively_constant: BTreeMap<SymbolId, ConstValue>,
    /// `if`/`while` conditions with a constant boolean value.
    pub constant_conditions: BTreeMap<StmtId, bool>,
}

impl ConstantResult {
    pub fn value_of(&self, expr: ExprId) -> Option<ConstValue> {
        self.expression_values.get(&expr).copied()
    }

    pub fn symbol_value(&self, symbol: SymbolId) -> Option<ConstValue> {
        self.effectively_constant.get(&symbol).copied()
    }

    pub fn condition(&self, stmt: StmtId) -> Option<bool> {
        self.constant_conditions.get(&stmt).copied()
    }

    /// The variable's lattice value where control leaves the function.
    pub fn value_at_exit(&self, symbol: SymbolId) -> LatticeValue {
        self.facts
            .before(NodeId::EXIT)
            .map(|facts| facts.get(symbol))
            .unwrap_or(LatticeValue::Top)
    }

    pub fn converged(&self) -> bool {
        self.facts.converged
    }

    pub fn warning(&self) -> Option<&Diagnostic> {
        self.facts.warning.as_ref()
    }

    pub fn publish(&self, store: &mut MetadataStore) -> AnalysisResult<usize> {
        let mut batch = FactBatch::new();
        for (expr, value) in &self.expression_values {
            batch.flag(*expr, MetadataKey::Foldable);
            batch.push(*expr, MetadataKey::ConstantValue, MetadataValue::Constant(*value));
        }
        for (symbol, value) in &self.effectively_constant {
            batch.flag(*symbol, MetadataKey::EffectivelyConstant);
            batch.push(*symbol, MetadataKey::ConstantValue, MetadataValue::Constant(*value));
        }
        for (stmt, value) in &self.constant_conditions {
            batch.push(*stmt, MetadataKey::ConstantCondition, MetadataValue::Bool(*value));
        }
        Ok(batch.commit(store, KeyNamespace::Constants)?)
    }
}

/// The data-flow problem plus the evaluator it shares with publishing.
pub struct ConstantPropagation<'a> {
    ctx: FunctionContext<'a>,
    /// Tracked variables and their types.
    tracked: FxHashMap<SymbolId, Type>,
    effects: Vec<NodeEffect>,
}

impl<'a> ConstantPropagation<'a> {
    pub fn new(ctx: FunctionContext<'a>) -> AnalysisResult<Self> {
        let address_taken = defuse::address_taken_symbols(&ctx)?;
        let mut effects = Vec::with_capacity(ctx.cfg.node_count());
        let mut tracked = FxHashMap::default();

        for node in &ctx.cfg.nodes {
            let effect = defuse::node_effect(&ctx, node)?;
            for def in &effect.defs {
                let symbol = ctx.symbol(def.symbol)?;
                if symbol.is_local_to(ctx.function_id())
                    && symbol.is_scalar_variable()
                    && !address_taken.contains(&def.symbol)
                {
                    tracked.insert(def.symbol, symbol.ty.clone());
                }
            }
            effects.push(effect);
        }
        for param in &ctx.function.params {
            let symbol = ctx.symbol(*param)?;
            if symbol.is_scalar_variable() && !address_taken.contains(param) {
                tracked.insert(*param, symbol.ty.clone());
            }
        }

        Ok(ConstantPropagation {
            ctx,
            tracked,
            effects,
        })
    }

    pub fn is_tracked(&self, symbol: SymbolId) -> bool {
        self.tracked.contains_key(&symbol)
    }

    pub fn analyze(self) -> AnalysisResult<ConstantResult> {
        let solver = FixpointSolver::new(self.ctx.config.constant_propagation_max_iterations);
        let facts = solver.solve(self.ctx.cfg, &self)?;
        tracing::debug!(
            function = self.ctx.name(),
            iterations = facts.iterations,
            converged = facts.converged,
            "constant propagation solved"
        );

        let mut expression_values = BTreeMap::new();
        let mut constant_conditions = BTreeMap::new();
        for id in self.ctx.cfg.reverse_postorder() {
            let Some(node) = self.ctx.cfg.node(id) else {
                continue;
            };
            let Some(before) = facts.before(id) else {
                continue;
            };
            let effect = &self.effects[id.index()];
            for &root in &effect.exprs {
                self.record_values(root, before, &mut expression_values)?;
            }

            if let Some(stmt_id) = node.stmt {
                let stmt = self.ctx.stmt(stmt_id)?;
                let condition = match (&stmt.kind, node.role) {
                    (StmtKind::If { condition, .. }, NodeRole::Branch)
                    | (StmtKind::While { condition, .. }, NodeRole::LoopTest) => Some(*condition),
                    _ => None,
                };
                if let Some(value) = condition
                    .and_then(|c| expression_values.get(&c))
                    .and_then(|v: &ConstValue| v.as_bool())
                {
                    constant_conditions.insert(stmt_id, value);
                }
            }
        }

        let effectively_constant = self.effectively_constant(&facts);

        Ok(ConstantResult {
            facts,
            expression_values,
            effectively_constant,
            constant_conditions,
        })
    }

    /// Tracked variables defined exactly once (parameters count their
    /// binding as a definition) whose value after that definition is constant.
    fn effectively_constant(&self, facts: &FixpointResult<ConstantFacts>) -> BTreeMap<SymbolId, ConstValue> {
        let mut sites: FxHashMap<SymbolId, Vec<NodeId>> = FxHashMap::default();
        for param in &self.ctx.function.params {
            sites.entry(*param).or_default().push(NodeId::ENTRY);
        }
        for (index, effect) in self.effects.iter().enumerate() {
            for def in &effect.defs {
                sites.entry(def.symbol).or_default().push(NodeId(index as u32));
            }
        }

        let mut out = BTreeMap::new();
        for (symbol, nodes) in sites {
            if !self.is_tracked(symbol) || nodes.len() != 1 {
                continue;
            }
            let value = facts.after(nodes[0]).map(|f| f.get(symbol));
            if let Some(LatticeValue::Constant(value)) = value {
                out.insert(symbol, value);
            }
        }
        out
    }

    fn record_values(
        &self,
        root: ExprId,
        facts: &ConstantFacts,
        out: &mut BTreeMap<ExprId, ConstValue>,
    ) -> AnalysisResult<()> {
        defuse::walk_expr(self.ctx.program, root, &mut |id, _| {
            if let LatticeValue::Constant(value) = self.evaluate(id, facts)? {
                out.insert(id, value);
            }
            Ok(())
        })
    }

    /// Lattice value of `expr` under `facts`.
    pub fn evaluate(&self, expr: ExprId, facts: &ConstantFacts) -> AnalysisResult<LatticeValue> {
        let node = self.ctx.expr(expr)?;
        Ok(match &node.kind {
            ExprKind::Literal(Literal::Number(n)) => {
                LatticeValue::Constant(ConstValue::Number(wrap(*n, &node.ty)))
            }
            ExprKind::Literal(Literal::Bool(b)) => LatticeValue::Constant(ConstValue::Bool(*b)),
            ExprKind::Identifier(symbol) => {
                if self.is_tracked(*symbol) {
                    facts.get(*symbol)
                } else {
                    LatticeValue::Bottom
                }
            }
            ExprKind::Binary { op, left, right } => {
                let l = self.evaluate(*left, facts)?;
                let r = self.evaluate(*right, facts)?;
                combine2(l, r, |a, b| fold_binary(*op, a, b, &node.ty))
            }
            ExprKind::Unary { op, operand } => {
                let v = self.evaluate(*operand, facts)?;
                combine1(v, |a| fold_unary(*op, a, &node.ty))
            }
            ExprKind::Intrinsic {
                intrinsic: intrinsic @ (Intrinsic::Lo | Intrinsic::Hi),
                args,
            } => match args.first() {
                Some(arg) => {
                    let v = self.evaluate(*arg, facts)?;
                    let high = *intrinsic == Intrinsic::Hi;
                    combine1(v, |a| {
                        a.as_number().map(|n| {
                            let n = wrap(n, &Type::Word);
                            ConstValue::Number(if high { (n >> 8) & 0xFF } else { n & 0xFF })
                        })
                    })
                }
                None => LatticeValue::Bottom,
            },
            ExprKind::AddressOf(symbol) => {
                // Only memory-mapped declarations have an address before linking
                match self.ctx.symbol(*symbol)?.address {
                    Some(address) => LatticeValue::Constant(ConstValue::Number(i64::from(address))),
                    None => LatticeValue::Bottom,
                }
            }
            ExprKind::Index { .. } | ExprKind::Call { .. } | ExprKind::Intrinsic { .. } => {
                LatticeValue::Bottom
            }
        })
    }

    fn transfer_node(&self, node: &CfgNode, input: &ConstantFacts) -> AnalysisResult<ConstantFacts> {
        let effect = self
            .effects
            .get(node.id.index())
            .ok_or_else(|| AnalysisError::MalformedCfg(format!("node {} has no effect summary", node.id)))?;
        let mut out = input.clone();
        for def in &effect.defs {
            let Some(ty) = self.tracked.get(&def.symbol) else {
                continue;
            };
            let value = match def.value {
                DefValue::Assign(expr) => self.evaluate(expr, input)?,
                DefValue::Compound(op, expr) => {
                    let rhs = self.evaluate(expr, input)?;
                    combine2(input.get(def.symbol), rhs, |a, b| fold_binary(op, a, b, ty))
                }
                DefValue::Increment(step) => {
                    let step = match step {
                        Some(expr) => self.evaluate(expr, input)?,
                        None => LatticeValue::Constant(ConstValue::Number(1)),
                    };
                    combine2(input.get(def.symbol), step, |a, b| fold_binary(BinaryOp::Add, a, b, ty))
                }
                DefValue::Uninitialized | DefValue::Element => LatticeValue::Bottom,
            };
            let value = match value {
                LatticeValue::Constant(ConstValue::Number(n)) => {
                    LatticeValue::Constant(ConstValue::Number(wrap(n, ty)))
                }
                other => other,
            };
            out.set(def.symbol, value);
        }
        Ok(out)
    }
}

impl DataflowProblem for ConstantPropagation<'_> {
    type Fact = ConstantFacts;

    fn name(&self) -> &'static str {
        "constant propagation"
    }

    fn direction(&self) -> Direction {
        Direction::Forward
    }

    fn neutral(&self) -> ConstantFacts {
        ConstantFacts::new()
    }

    fn boundary(&self) -> ConstantFacts {
        let mut facts = ConstantFacts::new();
        for param in &self.ctx.function.params {
            if self.is_tracked(*param) {
                facts.set(*param, LatticeValue::Bottom);
            }
        }
        facts
    }

    fn transfer(&self, node: &CfgNode, input: &ConstantFacts) -> AnalysisResult<ConstantFacts> {
        self.transfer_node(node, input)
    }
}

fn combine1(value: LatticeValue, fold: impl FnOnce(ConstValue) -> Option<ConstValue>) -> LatticeValue {
    match value {
        LatticeValue::Top => LatticeValue::Top,
        LatticeValue::Bottom => LatticeValue::Bottom,
        LatticeValue::Constant(v) => fold(v).map_or(LatticeValue::Bottom, LatticeValue::Constant),
    }
}

fn combine2(
    left: LatticeValue,
    right: LatticeValue,
    fold: impl FnOnce(ConstValue, ConstValue) -> Option<ConstValue>,
) -> LatticeValue {
    match (left, right) {
        (LatticeValue::Bottom, _) | (_, LatticeValue::Bottom) => LatticeValue::Bottom,
        (LatticeValue::Top, _) | (_, LatticeValue::Top) => LatticeValue::Top,
        (LatticeValue::Constant(a), LatticeValue::Constant(b)) => {
            fold(a, b).map_or(LatticeValue::Bottom, LatticeValue::Constant)
        }
    }
}
