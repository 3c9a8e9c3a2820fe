//! Programmatic construction of a [`Program`] and its [`SymbolTable`].
//!
//! Front ends that already have a parse tree lower it through this builder;
//! tests use it to write fixtures without a parser. Expression types are
//! derived the way the type checker resolves them: comparisons and logic
//! yield `boolean`, arithmetic yields the wider operand type.
//!
//! Every statement is placed on its own synthetic source line so
//! diagnostics in tests carry distinguishable spans.

use super::{
    AssignOp, BinaryOp, Expr, ExprId, ExprKind, FunctionDecl, FunctionId, Intrinsic, Literal,
    Program, Stmt, StmtId, StmtKind, Type, UnaryOp,
};
use crate::span::Span;
use crate::symbols::{Declaration, Scope, StorageClass, Symbol, SymbolId, SymbolKind, SymbolTable};

/// A declared function: its id and its symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionHandle {
    pub id: FunctionId,
    pub symbol: SymbolId,
}

pub struct ProgramBuilder {
    program: Program,
    symbols: SymbolTable,
    line: u32,
    offset: u32,
}

impl Default for ProgramBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgramBuilder {
    pub fn new() -> Self {
        ProgramBuilder {
            program: Program::new(),
            symbols: SymbolTable::new(),
            line: 1,
            offset: 0,
        }
    }

    pub fn finish(self) -> (Program, SymbolTable) {
        (self.program, self.symbols)
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    fn next_span(&mut self) -> Span {
        let span = Span::new(self.offset, self.offset + 1, self.line, 1);
        self.offset += 1;
        span
    }

    fn next_line(&mut self) -> Span {
        self.line += 1;
        self.next_span()
    }

    fn add_symbol(
        &mut self,
        name: &str,
        kind: SymbolKind,
        ty: Type,
        scope: Scope,
        storage: StorageClass,
        address: Option<u16>,
    ) -> SymbolId {
        let span = self.next_span();
        self.symbols.insert(Symbol {
            id: SymbolId(0),
            name: name.to_string(),
            kind,
            ty,
            scope,
            storage,
            address,
            declaration: None,
            span,
        })
    }

    fn symbol_type(&self, symbol: SymbolId) -> Type {
        self.symbols
            .get(symbol)
            .map(|s| s.ty.clone())
            .unwrap_or(Type::Void)
    }

    fn expr_type(&self, expr: ExprId) -> Type {
        self.program
            .expr(expr)
            .map(|e| e.ty.clone())
            .unwrap_or(Type::Void)
    }

    // ── Symbols ─────────────────────────────────────────────────────────

    /// Module-level variable with default storage.
    pub fn global(&mut self, name: &str, ty: Type) -> SymbolId {
        self.global_in(name, ty, StorageClass::Default)
    }

    /// Module-level variable with an explicit storage class.
    pub fn global_in(&mut self, name: &str, ty: Type, storage: StorageClass) -> SymbolId {
        self.add_symbol(name, SymbolKind::Variable, ty, Scope::Global, storage, None)
    }

    /// Memory-mapped declaration (`@map name at $address: ty`).
    pub fn mapped(&mut self, name: &str, ty: Type, address: u16) -> SymbolId {
        self.add_symbol(
            name,
            SymbolKind::Variable,
            ty,
            Scope::Global,
            StorageClass::Mapped,
            Some(address),
        )
    }

    /// Symbol with an id that is deliberately absent from the table.
    pub fn dangling_symbol(&self) -> SymbolId {
        SymbolId(u32::MAX)
    }

    /// Declare a function so it can be called before its body exists.
    pub fn declare_function(&mut self, name: &str, return_type: Type) -> FunctionHandle {
        let span = self.next_line();
        let symbol = self.add_symbol(
            name,
            SymbolKind::Function,
            return_type.clone(),
            Scope::Global,
            StorageClass::Default,
            None,
        );
        let id = self.program.add_function(FunctionDecl {
            id: FunctionId(0),
            symbol,
            name: name.to_string(),
            params: Vec::new(),
            return_type,
            body: Vec::new(),
            exported: false,
            is_callback: false,
            span,
        });
        if let Some(sym) = self.symbols.get_mut(symbol) {
            sym.declaration = Some(Declaration::Function(id));
        }
        FunctionHandle { id, symbol }
    }

    pub fn param(&mut self, function: FunctionHandle, name: &str, ty: Type) -> SymbolId {
        let symbol = self.add_symbol(
            name,
            SymbolKind::Parameter,
            ty,
            Scope::Function(function.id),
            StorageClass::Default,
            None,
        );
        if let Some(decl) = self.program.function_mut(function.id) {
            let index = decl.params.len();
            decl.params.push(symbol);
            if let Some(sym) = self.symbols.get_mut(symbol) {
                sym.declaration = Some(Declaration::Parameter(function.id, index));
            }
        }
        symbol
    }

    /// Local variable of `function`; declare it with [`Self::declare`].
    pub fn local(&mut self, function: FunctionHandle, name: &str, ty: Type) -> SymbolId {
        self.add_symbol(
            name,
            SymbolKind::Variable,
            ty,
            Scope::Function(function.id),
            StorageClass::Default,
            None,
        )
    }

    pub fn set_body(&mut self, function: FunctionHandle, body: Vec<StmtId>) {
        if let Some(decl) = self.program.function_mut(function.id) {
            decl.body = body;
        }
    }

    pub fn set_exported(&mut self, function: FunctionHandle, exported: bool) {
        if let Some(decl) = self.program.function_mut(function.id) {
            decl.exported = exported;
        }
    }

    pub fn set_callback(&mut self, function: FunctionHandle, is_callback: bool) {
        if let Some(decl) = self.program.function_mut(function.id) {
            decl.is_callback = is_callback;
        }
    }

    // ── Expressions ─────────────────────────────────────────────────────

    pub fn expr(&mut self, kind: ExprKind, ty: Type) -> ExprId {
        let span = self.next_span();
        self.program.alloc_expr(Expr { kind, ty, span })
    }

    pub fn byte(&mut self, value: i64) -> ExprId {
        self.expr(ExprKind::Literal(Literal::Number(value)), Type::Byte)
    }

    pub fn word(&mut self, value: i64) -> ExprId {
        self.expr(ExprKind::Literal(Literal::Number(value)), Type::Word)
    }

    pub fn boolean(&mut self, value: bool) -> ExprId {
        self.expr(ExprKind::Literal(Literal::Bool(value)), Type::Bool)
    }

    pub fn var(&mut self, symbol: SymbolId) -> ExprId {
        let ty = self.symbol_type(symbol);
        self.expr(ExprKind::Identifier(symbol), ty)
    }

    pub fn binary(&mut self, op: BinaryOp, left: ExprId, right: ExprId) -> ExprId {
        let ty = if op.is_comparison() || op.is_logical() {
            Type::Bool
        } else {
            let (l, r) = (self.expr_type(left), self.expr_type(right));
            if l == Type::Word || r == Type::Word {
                Type::Word
            } else {
                l
            }
        };
        self.expr(ExprKind::Binary { op, left, right }, ty)
    }

    pub fn unary(&mut self, op: UnaryOp, operand: ExprId) -> ExprId {
        let ty = match op {
            UnaryOp::Not => Type::Bool,
            UnaryOp::Neg | UnaryOp::BitNot => self.expr_type(operand),
        };
        self.expr(ExprKind::Unary { op, operand }, ty)
    }

    pub fn address_of(&mut self, symbol: SymbolId) -> ExprId {
        self.expr(ExprKind::AddressOf(symbol), Type::Word)
    }

    pub fn index(&mut self, array: SymbolId, index: ExprId) -> ExprId {
        let array_ty = self.symbol_type(array);
        let base = self.expr(ExprKind::Identifier(array), array_ty.clone());
        self.expr(ExprKind::Index { base, index }, array_ty.element().clone())
    }

    pub fn call(&mut self, callee: SymbolId, args: Vec<ExprId>) -> ExprId {
        let ty = self.symbol_type(callee);
        self.expr(ExprKind::Call { callee, args }, ty)
    }

    pub fn intrinsic(&mut self, intrinsic: Intrinsic, args: Vec<ExprId>) -> ExprId {
        let ty = match intrinsic {
            Intrinsic::Peek | Intrinsic::Lo | Intrinsic::Hi => Type::Byte,
            Intrinsic::PeekWord => Type::Word,
            _ => Type::Void,
        };
        self.expr(ExprKind::Intrinsic { intrinsic, args }, ty)
    }

    // ── Statements ──────────────────────────────────────────────────────

    pub fn stmt(&mut self, kind: StmtKind) -> StmtId {
        let span = self.next_line();
        self.program.alloc_stmt(Stmt { kind, span })
    }

    /// `let symbol [= initializer]`; records the declaration on the symbol.
    pub fn declare(&mut self, symbol: SymbolId, initializer: Option<ExprId>) -> StmtId {
        let id = self.stmt(StmtKind::VarDecl {
            symbol,
            initializer,
        });
        if let Some(sym) = self.symbols.get_mut(symbol) {
            sym.declaration = Some(Declaration::Stmt(id));
        }
        id
    }

    /// Module-level `let`, recorded in the program's globals.
    pub fn declare_global(&mut self, symbol: SymbolId, initializer: Option<ExprId>) -> StmtId {
        let id = self.declare(symbol, initializer);
        self.program.add_global(id);
        id
    }

    pub fn assign(&mut self, symbol: SymbolId, value: ExprId) -> StmtId {
        self.assign_op(symbol, AssignOp::Assign, value)
    }

    pub fn assign_op(&mut self, symbol: SymbolId, op: AssignOp, value: ExprId) -> StmtId {
        let target = self.var(symbol);
        self.stmt(StmtKind::Assign { target, op, value })
    }

    /// `array[index] = value`
    pub fn assign_index(&mut self, array: SymbolId, index: ExprId, value: ExprId) -> StmtId {
        let target = self.index(array, index);
        self.stmt(StmtKind::Assign {
            target,
            op: AssignOp::Assign,
            value,
        })
    }

    pub fn expr_stmt(&mut self, expr: ExprId) -> StmtId {
        self.stmt(StmtKind::Expr(expr))
    }

    pub fn if_stmt(
        &mut self,
        condition: ExprId,
        then_branch: Vec<StmtId>,
        else_branch: Option<Vec<StmtId>>,
    ) -> StmtId {
        self.stmt(StmtKind::If {
            condition,
            then_branch,
            else_branch,
        })
    }

    pub fn while_stmt(&mut self, condition: ExprId, body: Vec<StmtId>) -> StmtId {
        self.stmt(StmtKind::While { condition, body })
    }

    pub fn for_stmt(
        &mut self,
        variable: SymbolId,
        start: ExprId,
        end: ExprId,
        step: Option<ExprId>,
        body: Vec<StmtId>,
    ) -> StmtId {
        self.stmt(StmtKind::For {
            variable,
            start,
            end,
            step,
            body,
        })
    }

    pub fn ret(&mut self, value: Option<ExprId>) -> StmtId {
        self.stmt(StmtKind::Return(value))
    }

    pub fn break_stmt(&mut self) -> StmtId {
        self.stmt(StmtKind::Break)
    }

    pub fn continue_stmt(&mut self) -> StmtId {
        self.stmt(StmtKind::Continue)
    }

    pub fn block(&mut self, body: Vec<StmtId>) -> StmtId {
        self.stmt(StmtKind::Block(body))
    }
}
