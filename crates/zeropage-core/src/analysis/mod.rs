//! Analysis framework.
//!
//! Analyses compute facts without touching the tree. Each one takes a
//! [`FunctionContext`] (or the whole program for the program-wide tier),
//! returns an immutable result record, and publishes that record into the
//! [`MetadataStore`](crate::metadata::MetadataStore) through a writer bound
//! to its own namespace. The dependency chain is:
//!
//! ```text
//! CFG ─┬─> Reachability
//!      ├─> Expressions
//!      ├─> Escape
//!      ├─> Constants ─┬─> Alias (constant store addresses)
//!      │              └─> Loops (trip counts)
//!      ├─> ReachingDefinitions
//!      ├─> Liveness
//!      ├─> Dominance ─> Loops ─> Usage ─> TargetHints
//!      └─> Effects ─> CallGraph ─> Purity
//! ```
//!
//! Later analyses read earlier facts from the metadata store only, so a
//! failed analysis simply leaves its readers with the conservative defaults.
//!
//! All data structures use tree indices ([`ExprId`], [`StmtId`],
//! [`SymbolId`]) rather than references, keeping results decoupled from the
//! tree's lifetime.

pub mod alias;
pub mod call_graph;
pub mod constant_propagation;
pub mod defuse;
pub mod dominance;
pub mod escape;
pub mod expressions;
pub mod fixpoint;
pub mod liveness;
pub mod loops;
pub mod purity;
pub mod reachability;
pub mod reaching_definitions;
pub mod target_hints;
pub mod usage;

pub use alias::{AliasAnalyzer, AliasInfo, MemoryLocation};
pub use call_graph::{CallGraph, CallGraphAnalyzer};
pub use constant_propagation::{ConstValue, ConstantFacts, ConstantPropagation, ConstantResult, LatticeValue};
pub use dominance::Dominators;
pub use escape::{EscapeAnalyzer, EscapeInfo};
pub use expressions::{Coercion, ExpressionAnalyzer, ExpressionInfo};
pub use fixpoint::{DataflowProblem, Direction, FixpointResult, FixpointSolver, Lattice};
pub use liveness::{LiveRange, LivenessAnalysis, LivenessResult};
pub use loops::{LoopAnalyzer, LoopInfo, NaturalLoop};
pub use purity::{EffectFlags, FunctionEffects, PurityAnalyzer, PurityInfo, PurityLevel};
pub use reachability::{ReachabilityAnalyzer, ReachabilityInfo};
pub use reaching_definitions::{DefSite, ReachingDefinitions, ReachingResult};
pub use target_hints::{Register, TargetHintAnalyzer, TargetHints};
pub use usage::{UsageAnalyzer, UsageInfo, VariableUsage};

use crate::ast::{Expr, ExprId, FunctionDecl, FunctionId, Program, Stmt, StmtId};
use crate::cfg::{CfgError, ControlFlowGraph};
use crate::config::AnalysisConfig;
use crate::metadata::MetadataError;
use crate::symbols::{Symbol, SymbolId, SymbolTable};
use std::fmt;
use thiserror::Error;

/// Internal failure of an analysis. The orchestrator turns it into an
/// `Error` diagnostic and drops the analysis's facts for the function.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("expression {0} does not exist")]
    UnknownExpr(ExprId),
    #[error("statement {0} does not exist")]
    UnknownStmt(StmtId),
    #[error("symbol {0} is not in the symbol table")]
    UnknownSymbol(SymbolId),
    #[error("function {0:?} does not exist")]
    UnknownFunction(FunctionId),
    #[error("expression {0} is not assignable")]
    InvalidAssignTarget(ExprId),
    #[error("malformed control flow graph: {0}")]
    MalformedCfg(String),
    #[error(transparent)]
    Cfg(#[from] CfgError),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

pub type AnalysisResult<T> = Result<T, AnalysisError>;

/// Identity of an analysis in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AnalysisKind {
    Reachability,
    Expressions,
    Escape,
    Constants,
    ReachingDefinitions,
    Liveness,
    Alias,
    Loops,
    Usage,
    /// Per-function effect summary feeding purity and the call graph.
    Effects,
    CallGraph,
    Purity,
    TargetHints,
}

impl AnalysisKind {
    /// Per-function analyses in pipeline order.
    pub const FUNCTION_PIPELINE: [AnalysisKind; 10] = [
        AnalysisKind::Reachability,
        AnalysisKind::Expressions,
        AnalysisKind::Escape,
        AnalysisKind::Constants,
        AnalysisKind::ReachingDefinitions,
        AnalysisKind::Liveness,
        AnalysisKind::Alias,
        AnalysisKind::Loops,
        AnalysisKind::Usage,
        AnalysisKind::Effects,
    ];

    /// Program-wide analyses, run after every function.
    pub const PROGRAM_PIPELINE: [AnalysisKind; 3] = [
        AnalysisKind::CallGraph,
        AnalysisKind::Purity,
        AnalysisKind::TargetHints,
    ];

    pub fn name(self) -> &'static str {
        match self {
            AnalysisKind::Reachability => "reachability",
            AnalysisKind::Expressions => "expressions",
            AnalysisKind::Escape => "escape",
            AnalysisKind::Constants => "constant propagation",
            AnalysisKind::ReachingDefinitions => "reaching definitions",
            AnalysisKind::Liveness => "liveness",
            AnalysisKind::Alias => "alias",
            AnalysisKind::Loops => "loops",
            AnalysisKind::Usage => "variable usage",
            AnalysisKind::Effects => "effects",
            AnalysisKind::CallGraph => "call graph",
            AnalysisKind::Purity => "purity",
            AnalysisKind::TargetHints => "target hints",
        }
    }
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Read-only inputs of a per-function analysis.
#[derive(Clone, Copy)]
pub struct FunctionContext<'a> {
    pub program: &'a Program,
    pub symbols: &'a SymbolTable,
    pub function: &'a FunctionDecl,
    pub cfg: &'a ControlFlowGraph,
    pub config: &'a AnalysisConfig,
}

impl<'a> FunctionContext<'a> {
    pub fn new(
        program: &'a Program,
        symbols: &'a SymbolTable,
        function: &'a FunctionDecl,
        cfg: &'a ControlFlowGraph,
        config: &'a AnalysisConfig,
    ) -> Self {
        FunctionContext {
            program,
            symbols,
            function,
            cfg,
            config,
        }
    }

    pub fn expr(&self, id: ExprId) -> AnalysisResult<&'a Expr> {
        self.program.expr(id).ok_or(AnalysisError::UnknownExpr(id))
    }

    pub fn stmt(&self, id: StmtId) -> AnalysisResult<&'a Stmt> {
        self.program.stmt(id).ok_or(AnalysisError::UnknownStmt(id))
    }

    pub fn symbol(&self, id: SymbolId) -> AnalysisResult<&'a Symbol> {
        self.symbols.get(id).ok_or(AnalysisError::UnknownSymbol(id))
    }

    pub fn function_id(&self) -> FunctionId {
        self.function.id
    }

    pub fn name(&self) -> &'a str {
        &self.function.name
    }

    /// Declared in this function (parameter or local variable).
    pub fn is_local(&self, id: SymbolId) -> AnalysisResult<bool> {
        Ok(self.symbol(id)?.is_local_to(self.function.id))
    }
}
