//! What each CFG node reads, writes and evaluates.
//!
//! Shared by every analysis that needs def/use information, so they agree
//! on the meaning of each node role:
//!
//! | role | evaluates | defines |
//! |---|---|---|
//! | `Statement` (decl/assign/expr/return) | initializer, value, index | declared or assigned symbol |
//! | `Branch`, `LoopTest` of `while` | condition | - |
//! | `LoopInit` | `start` | `for` variable |
//! | `LoopTest` of `for` | `end` (and reads the variable) | - |
//! | `LoopStep` | `step` | `for` variable (`+= step`) |

use super::{AnalysisError, AnalysisResult, FunctionContext};
use crate::ast::{AssignOp, BinaryOp, Expr, ExprId, ExprKind, Literal, Program, StmtId, StmtKind};
use crate::cfg::{CfgNode, NodeRole};
use crate::metadata::MetadataStore;
use crate::symbols::SymbolId;
use std::collections::BTreeSet;

/// Value written by a definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefValue {
    /// `x = expr` or `let x = expr`.
    Assign(ExprId),
    /// `x op= expr`.
    Compound(BinaryOp, ExprId),
    /// `for` step: `x += step`, or `x += 1` without a step expression.
    Increment(Option<ExprId>),
    /// `let x` without initializer.
    Uninitialized,
    /// Element store; the whole variable is not replaced.
    Element,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Definition {
    pub symbol: SymbolId,
    pub value: DefValue,
}

impl Definition {
    /// A strong definition replaces the variable's whole value.
    pub fn is_strong(&self) -> bool {
        self.value != DefValue::Element
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeEffect {
    /// Root expressions evaluated by the node, in evaluation order.
    pub exprs: Vec<ExprId>,
    pub defs: Vec<Definition>,
    /// Variables whose value is read, without duplicates.
    pub uses: Vec<SymbolId>,
}

impl NodeEffect {
    fn add_use(&mut self, symbol: SymbolId) {
        if !self.uses.contains(&symbol) {
            self.uses.push(symbol);
        }
    }

    pub fn defines(&self, symbol: SymbolId) -> bool {
        self.defs.iter().any(|d| d.symbol == symbol)
    }
}

/// Def/use summary of one CFG node.
pub fn node_effect(ctx: &FunctionContext<'_>, node: &CfgNode) -> AnalysisResult<NodeEffect> {
    let mut effect = NodeEffect::default();
    let Some(stmt_id) = node.stmt else {
        return Ok(effect);
    };
    let stmt = ctx.stmt(stmt_id)?;

    match (&stmt.kind, node.role) {
        (StmtKind::VarDecl { symbol, initializer }, _) => {
            let value = match initializer {
                Some(init) => {
                    effect.exprs.push(*init);
                    DefValue::Assign(*init)
                }
                None => DefValue::Uninitialized,
            };
            effect.defs.push(Definition {
                symbol: *symbol,
                value,
            });
        }
        (StmtKind::Assign { target, op, value }, _) => {
            let target_expr = ctx.expr(*target)?;
            match &target_expr.kind {
                ExprKind::Identifier(symbol) => {
                    effect.exprs.push(*value);
                    let def_value = match op.binary_op() {
                        Some(bin) => {
                            effect.add_use(*symbol);
                            DefValue::Compound(bin, *value)
                        }
                        None => DefValue::Assign(*value),
                    };
                    effect.defs.push(Definition {
                        symbol: *symbol,
                        value: def_value,
                    });
                }
                ExprKind::Index { base, index } => {
                    let array = identifier_symbol(ctx.program, *base)
                        .ok_or(AnalysisError::InvalidAssignTarget(*target))?;
                    effect.exprs.push(*index);
                    effect.exprs.push(*value);
                    if *op != AssignOp::Assign {
                        effect.add_use(array);
                    }
                    effect.defs.push(Definition {
                        symbol: array,
                        value: DefValue::Element,
                    });
                }
                _ => return Err(AnalysisError::InvalidAssignTarget(*target)),
            }
        }
        (StmtKind::Expr(expr), _) | (StmtKind::Return(Some(expr)), _) => effect.exprs.push(*expr),
        (StmtKind::If { condition, .. }, _) | (StmtKind::While { condition, .. }, _) => {
            effect.exprs.push(*condition)
        }
        (StmtKind::For { variable, start, .. }, NodeRole::LoopInit) => {
            effect.exprs.push(*start);
            effect.defs.push(Definition {
                symbol: *variable,
                value: DefValue::Assign(*start),
            });
        }
        (StmtKind::For { variable, end, .. }, NodeRole::LoopTest) => {
            effect.add_use(*variable);
            effect.exprs.push(*end);
        }
        (StmtKind::For { variable, step, .. }, NodeRole::LoopStep) => {
            effect.add_use(*variable);
            if let Some(step) = step {
                effect.exprs.push(*step);
            }
            effect.defs.push(Definition {
                symbol: *variable,
                value: DefValue::Increment(*step),
            });
        }
        _ => {}
    }

    for expr in effect.exprs.clone() {
        for symbol in read_symbols(ctx.program, expr)? {
            effect.add_use(symbol);
        }
    }
    Ok(effect)
}

/// The symbol of an identifier expression.
pub fn identifier_symbol(program: &Program, expr: ExprId) -> Option<SymbolId> {
    match program.expr(expr).map(|e| &e.kind) {
        Some(ExprKind::Identifier(symbol)) => Some(*symbol),
        _ => None,
    }
}

/// Visit `root` and all of its sub-expressions in pre-order.
pub fn walk_expr(
    program: &Program,
    root: ExprId,
    visit: &mut impl FnMut(ExprId, &Expr) -> AnalysisResult<()>,
) -> AnalysisResult<()> {
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        let expr = program.expr(id).ok_or(AnalysisError::UnknownExpr(id))?;
        visit(id, expr)?;
        // Reverse so children come off the stack left to right
        stack.extend(expr.children().into_iter().rev());
    }
    Ok(())
}

/// Variables whose value `expr` reads. `@x` takes an address and is not a read.
pub fn read_symbols(program: &Program, expr: ExprId) -> AnalysisResult<Vec<SymbolId>> {
    let mut reads = Vec::new();
    walk_expr(program, expr, &mut |_, e| {
        if let ExprKind::Identifier(symbol) = e.kind {
            if !reads.contains(&symbol) {
                reads.push(symbol);
            }
        }
        Ok(())
    })?;
    Ok(reads)
}

/// Every statement of `body`, nested ones included, in source order.
pub fn flatten_statements(program: &Program, body: &[StmtId]) -> AnalysisResult<Vec<StmtId>> {
    let mut out = Vec::new();
    let mut stack: Vec<StmtId> = body.iter().rev().copied().collect();
    while let Some(id) = stack.pop() {
        let stmt = program.stmt(id).ok_or(AnalysisError::UnknownStmt(id))?;
        out.push(id);
        for nested in stmt.nested_bodies().into_iter().rev() {
            stack.extend(nested.iter().rev().copied());
        }
    }
    Ok(out)
}

/// Root expressions of a statement, assignment targets included.
pub fn statement_roots(program: &Program, id: StmtId) -> AnalysisResult<Vec<ExprId>> {
    let stmt = program.stmt(id).ok_or(AnalysisError::UnknownStmt(id))?;
    Ok(match &stmt.kind {
        StmtKind::VarDecl { initializer, .. } => initializer.iter().copied().collect(),
        StmtKind::Assign { target, value, .. } => vec![*target, *value],
        StmtKind::Expr(expr) => vec![*expr],
        StmtKind::If { condition, .. } | StmtKind::While { condition, .. } => vec![*condition],
        StmtKind::For {
            start, end, step, ..
        } => {
            let mut roots = vec![*start, *end];
            roots.extend(step.iter().copied());
            roots
        }
        StmtKind::Return(value) => value.iter().copied().collect(),
        StmtKind::Break | StmtKind::Continue | StmtKind::Block(_) => Vec::new(),
    })
}

/// Every expression of the function body, sub-expressions included.
pub fn function_expressions(ctx: &FunctionContext<'_>) -> AnalysisResult<Vec<ExprId>> {
    let mut out = Vec::new();
    for stmt in flatten_statements(ctx.program, &ctx.function.body)? {
        for root in statement_roots(ctx.program, stmt)? {
            walk_expr(ctx.program, root, &mut |id, _| {
                out.push(id);
                Ok(())
            })?;
        }
    }
    Ok(out)
}

/// Symbols whose address is taken anywhere in the function.
pub fn address_taken_symbols(ctx: &FunctionContext<'_>) -> AnalysisResult<BTreeSet<SymbolId>> {
    let mut taken = BTreeSet::new();
    for id in function_expressions(ctx)? {
        if let ExprKind::AddressOf(symbol) = ctx.expr(id)?.kind {
            taken.insert(symbol);
        }
    }
    Ok(taken)
}

/// Numeric value of an expression from published constant facts, or from
/// the literal itself when no fact was published.
pub fn constant_number(
    ctx: &FunctionContext<'_>,
    facts: &MetadataStore,
    expr: ExprId,
) -> AnalysisResult<Option<i64>> {
    if let Some(value) = facts.constant(expr) {
        return Ok(value.as_number());
    }
    Ok(match ctx.expr(expr)?.kind {
        ExprKind::Literal(Literal::Number(n)) => Some(n),
        _ => None,
    })
}
