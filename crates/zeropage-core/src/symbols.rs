//! Symbol table handed over by the front end.
//!
//! Symbols point back at their declarations through tree indices
//! ([`Declaration`]), never through references, so the table and the
//! [`Program`](crate::ast::Program) are owned independently.

use crate::ast::{FunctionId, StmtId, Type};
use crate::span::Span;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of a symbol in the [`SymbolTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SymbolId(pub u32);

impl fmt::Display for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SymbolKind {
    Variable,
    Parameter,
    Function,
}

/// Where a symbol is visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    Global,
    Function(FunctionId),
}

/// Explicit storage placement requested in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StorageClass {
    #[default]
    Default,
    /// `@zp`
    ZeroPage,
    /// `@ram`
    Ram,
    /// `@data`
    Data,
    /// `@map` at a fixed address.
    Mapped,
}

/// Location of a symbol's declaration in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Declaration {
    Stmt(StmtId),
    Function(FunctionId),
    Parameter(FunctionId, usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub id: SymbolId,
    pub name: String,
    pub kind: SymbolKind,
    pub ty: Type,
    pub scope: Scope,
    pub storage: StorageClass,
    /// Fixed address of memory-mapped declarations.
    pub address: Option<u16>,
    pub declaration: Option<Declaration>,
    pub span: Span,
}

impl Symbol {
    /// Local to `function` (variables and parameters declared inside it).
    pub fn is_local_to(&self, function: FunctionId) -> bool {
        self.scope == Scope::Function(function)
    }

    pub fn is_global(&self) -> bool {
        self.scope == Scope::Global
    }

    pub fn is_memory_mapped(&self) -> bool {
        self.storage == StorageClass::Mapped || self.address.is_some()
    }

    pub fn is_function(&self) -> bool {
        self.kind == SymbolKind::Function
    }

    /// Variables and parameters of scalar type.
    pub fn is_scalar_variable(&self) -> bool {
        self.kind != SymbolKind::Function && self.ty.is_scalar()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
    #[serde(skip)]
    by_name: FxHashMap<(Scope, String), SymbolId>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a symbol; its `id` field is overwritten with the assigned id.
    /// A later symbol with the same scope and name shadows the earlier one.
    pub fn insert(&mut self, mut symbol: Symbol) -> SymbolId {
        let id = SymbolId(self.symbols.len() as u32);
        symbol.id = id;
        self.by_name.insert((symbol.scope, symbol.name.clone()), id);
        self.symbols.push(symbol);
        id
    }

    pub fn get(&self, id: SymbolId) -> Option<&Symbol> {
        self.symbols.get(id.0 as usize)
    }

    pub fn get_mut(&mut self, id: SymbolId) -> Option<&mut Symbol> {
        self.symbols.get_mut(id.0 as usize)
    }

    /// Resolve `name` in `scope`, falling back to the global scope.
    pub fn lookup(&self, scope: Scope, name: &str) -> Option<&Symbol> {
        self.by_name
            .get(&(scope, name.to_string()))
            .or_else(|| self.by_name.get(&(Scope::Global, name.to_string())))
            .and_then(|id| self.get(*id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Name for messages; unknown ids render as their index.
    pub fn display_name(&self, id: SymbolId) -> String {
        self.get(id)
            .map(|s| s.name.clone())
            .unwrap_or_else(|| id.to_string())
    }
}
