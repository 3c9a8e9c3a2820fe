//! Type-checked syntax tree handed over by the front end.
//!
//! Nodes live in flat arenas owned by [`Program`] and are addressed by
//! stable indices ([`ExprId`], [`StmtId`], [`FunctionId`]). Analyses never
//! hold references into the tree across phases; they key their facts by
//! these indices instead. All lookups return `Option` so a malformed tree
//! surfaces as an analysis error rather than a panic.

pub mod builder;

use crate::span::Span;
use crate::symbols::SymbolId;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use builder::{FunctionHandle, ProgramBuilder};

/// Index of an expression in [`Program`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExprId(pub u32);

/// Index of a statement in [`Program`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StmtId(pub u32);

/// Index of a function declaration in [`Program`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FunctionId(pub u32);

impl fmt::Display for ExprId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

impl fmt::Display for StmtId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Resolved type of an expression or symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    Void,
    Bool,
    Byte,
    Word,
    Array { element: Box<Type>, length: u16 },
}

impl Type {
    pub fn array(element: Type, length: u16) -> Type {
        Type::Array {
            element: Box::new(element),
            length,
        }
    }

    /// Storage size in bytes.
    pub fn size_in_bytes(&self) -> u32 {
        match self {
            Type::Void => 0,
            Type::Bool | Type::Byte => 1,
            Type::Word => 2,
            Type::Array { element, length } => element.size_in_bytes() * u32::from(*length),
        }
    }

    /// Number of value bits for arithmetic wrapping, if numeric.
    pub fn bit_width(&self) -> Option<u32> {
        match self {
            Type::Byte => Some(8),
            Type::Word => Some(16),
            _ => None,
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, Type::Bool | Type::Byte | Type::Word)
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Type::Array { .. })
    }

    /// Element type for arrays, the type itself otherwise.
    pub fn element(&self) -> &Type {
        match self {
            Type::Array { element, .. } => element,
            other => other,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Bool => write!(f, "boolean"),
            Type::Byte => write!(f, "byte"),
            Type::Word => write!(f, "word"),
            Type::Array { element, length } => write!(f, "{}[{}]", element, length),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Literal {
    Number(i64),
    Bool(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    pub fn is_arithmetic(self) -> bool {
        !self.is_comparison() && !self.is_logical()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
}

/// Built-in target primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Intrinsic {
    /// `peek(address): byte`
    Peek,
    /// `peekw(address): word`
    PeekWord,
    /// `poke(address, value)`
    Poke,
    /// `pokew(address, value)`
    PokeWord,
    /// `lo(word): byte`
    Lo,
    /// `hi(word): byte`
    Hi,
    /// Disable interrupts.
    Sei,
    /// Enable interrupts.
    Cli,
    Nop,
}

impl Intrinsic {
    /// Pure value computations that may be folded and hoisted.
    pub fn is_pure(self) -> bool {
        matches!(self, Intrinsic::Lo | Intrinsic::Hi | Intrinsic::Nop)
    }

    pub fn writes_memory(self) -> bool {
        matches!(self, Intrinsic::Poke | Intrinsic::PokeWord)
    }

    pub fn reads_memory(self) -> bool {
        matches!(self, Intrinsic::Peek | Intrinsic::PeekWord)
    }

    pub fn name(self) -> &'static str {
        match self {
            Intrinsic::Peek => "peek",
            Intrinsic::PeekWord => "peekw",
            Intrinsic::Poke => "poke",
            Intrinsic::PokeWord => "pokew",
            Intrinsic::Lo => "lo",
            Intrinsic::Hi => "hi",
            Intrinsic::Sei => "sei",
            Intrinsic::Cli => "cli",
            Intrinsic::Nop => "nop",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExprKind {
    Literal(Literal),
    Identifier(SymbolId),
    Binary {
        op: BinaryOp,
        left: ExprId,
        right: ExprId,
    },
    Unary {
        op: UnaryOp,
        operand: ExprId,
    },
    /// `@name`: the address of a variable or function.
    AddressOf(SymbolId),
    /// `base[index]`; `base` is an identifier expression of array type.
    Index {
        base: ExprId,
        index: ExprId,
    },
    Call {
        callee: SymbolId,
        args: Vec<ExprId>,
    },
    Intrinsic {
        intrinsic: Intrinsic,
        args: Vec<ExprId>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: Type,
    pub span: Span,
}

impl Expr {
    /// Direct sub-expressions in evaluation order.
    pub fn children(&self) -> Vec<ExprId> {
        match &self.kind {
            ExprKind::Literal(_) | ExprKind::Identifier(_) | ExprKind::AddressOf(_) => Vec::new(),
            ExprKind::Binary { left, right, .. } => vec![*left, *right],
            ExprKind::Unary { operand, .. } => vec![*operand],
            ExprKind::Index { base, index } => vec![*base, *index],
            ExprKind::Call { args, .. } | ExprKind::Intrinsic { args, .. } => args.clone(),
        }
    }
}

/// Operator of an assignment statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssignOp {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

impl AssignOp {
    /// The binary operator a compound assignment applies.
    pub fn binary_op(self) -> Option<BinaryOp> {
        match self {
            AssignOp::Assign => None,
            AssignOp::Add => Some(BinaryOp::Add),
            AssignOp::Sub => Some(BinaryOp::Sub),
            AssignOp::Mul => Some(BinaryOp::Mul),
            AssignOp::Div => Some(BinaryOp::Div),
            AssignOp::Mod => Some(BinaryOp::Mod),
            AssignOp::BitAnd => Some(BinaryOp::BitAnd),
            AssignOp::BitOr => Some(BinaryOp::BitOr),
            AssignOp::BitXor => Some(BinaryOp::BitXor),
            AssignOp::Shl => Some(BinaryOp::Shl),
            AssignOp::Shr => Some(BinaryOp::Shr),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StmtKind {
    VarDecl {
        symbol: SymbolId,
        initializer: Option<ExprId>,
    },
    /// `target op= value`; `target` is an identifier or index expression.
    Assign {
        target: ExprId,
        op: AssignOp,
        value: ExprId,
    },
    Expr(ExprId),
    If {
        condition: ExprId,
        then_branch: Vec<StmtId>,
        else_branch: Option<Vec<StmtId>>,
    },
    While {
        condition: ExprId,
        body: Vec<StmtId>,
    },
    /// `for variable = start to end [step step]`, inclusive of `end`.
    For {
        variable: SymbolId,
        start: ExprId,
        end: ExprId,
        step: Option<ExprId>,
        body: Vec<StmtId>,
    },
    Return(Option<ExprId>),
    Break,
    Continue,
    Block(Vec<StmtId>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

impl Stmt {
    /// Nested statement lists, in source order.
    pub fn nested_bodies(&self) -> Vec<&[StmtId]> {
        match &self.kind {
            StmtKind::If {
                then_branch,
                else_branch,
                ..
            } => {
                let mut bodies = vec![then_branch.as_slice()];
                if let Some(else_branch) = else_branch {
                    bodies.push(else_branch.as_slice());
                }
                bodies
            }
            StmtKind::While { body, .. } | StmtKind::For { body, .. } | StmtKind::Block(body) => {
                vec![body.as_slice()]
            }
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub id: FunctionId,
    /// The function's own symbol (kind `Function`).
    pub symbol: SymbolId,
    pub name: String,
    pub params: Vec<SymbolId>,
    pub return_type: Type,
    pub body: Vec<StmtId>,
    pub exported: bool,
    /// Interrupt handlers and other functions invoked by address.
    pub is_callback: bool,
    pub span: Span,
}

/// A whole compilation unit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Program {
    exprs: Vec<Expr>,
    stmts: Vec<Stmt>,
    functions: Vec<FunctionDecl>,
    /// Module-level declarations.
    globals: Vec<StmtId>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_expr(&mut self, expr: Expr) -> ExprId {
        let id = ExprId(self.exprs.len() as u32);
        self.exprs.push(expr);
        id
    }

    pub fn alloc_stmt(&mut self, stmt: Stmt) -> StmtId {
        let id = StmtId(self.stmts.len() as u32);
        self.stmts.push(stmt);
        id
    }

    /// Register a function; its `id` field is overwritten with the assigned id.
    pub fn add_function(&mut self, mut function: FunctionDecl) -> FunctionId {
        let id = FunctionId(self.functions.len() as u32);
        function.id = id;
        self.functions.push(function);
        id
    }

    pub fn add_global(&mut self, stmt: StmtId) {
        self.globals.push(stmt);
    }

    pub fn expr(&self, id: ExprId) -> Option<&Expr> {
        self.exprs.get(id.0 as usize)
    }

    pub fn stmt(&self, id: StmtId) -> Option<&Stmt> {
        self.stmts.get(id.0 as usize)
    }

    pub fn function(&self, id: FunctionId) -> Option<&FunctionDecl> {
        self.functions.get(id.0 as usize)
    }

    pub fn function_mut(&mut self, id: FunctionId) -> Option<&mut FunctionDecl> {
        self.functions.get_mut(id.0 as usize)
    }

    pub fn function_by_name(&self, name: &str) -> Option<&FunctionDecl> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn functions(&self) -> &[FunctionDecl] {
        &self.functions
    }

    pub fn globals(&self) -> &[StmtId] {
        &self.globals
    }

    pub fn expr_count(&self) -> usize {
        self.exprs.len()
    }

    pub fn stmt_count(&self) -> usize {
        self.stmts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_sizes() {
        assert_eq!(Type::Byte.size_in_bytes(), 1);
        assert_eq!(Type::Word.size_in_bytes(), 2);
        assert_eq!(Type::array(Type::Word, 8).size_in_bytes(), 16);
        assert_eq!(Type::array(Type::Byte, 4).element(), &Type::Byte);
    }

    #[test]
    fn test_lookup_out_of_range_is_none() {
        let program = Program::new();
        assert!(program.expr(ExprId(3)).is_none());
        assert!(program.stmt(StmtId(0)).is_none());
        assert!(program.function(FunctionId(1)).is_none());
    }

    #[test]
    fn test_compound_assign_maps_to_binary() {
        assert_eq!(AssignOp::Add.binary_op(), Some(BinaryOp::Add));
        assert_eq!(AssignOp::Assign.binary_op(), None);
    }
}
