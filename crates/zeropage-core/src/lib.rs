//! Analysis core of the Zeropage 6502 compiler.
//!
//! Takes a type-checked program tree, its symbol table and one control flow
//! graph per function, and computes the facts the IL and code generators
//! rely on: constants, data flow, aliasing, loops, purity, the call graph and
//! zero-page / register allocation hints. Facts land in a
//! [`MetadataStore`] keyed by tree index; the tree itself is never mutated.

pub mod analysis;
pub mod ast;
pub mod cfg;
pub mod config;
pub mod diagnostics;
pub mod memory;
pub mod metadata;
pub mod orchestrator;
pub mod span;
pub mod symbols;

pub use analysis::{AnalysisError, AnalysisKind, AnalysisResult, FunctionContext};
pub use ast::{ExprId, FunctionId, Program, ProgramBuilder, StmtId, Type};
pub use cfg::{CfgBuilder, ControlFlowGraph, NodeId};
pub use config::{AnalysisConfig, ConfigError};
pub use diagnostics::{
    CollectingDiagnosticHandler, Diagnostic, DiagnosticCode, DiagnosticHandler, DiagnosticLevel,
};
pub use memory::{AddressRange, MemoryMap, MemoryRegion};
pub use metadata::{KeyNamespace, MetadataError, MetadataKey, MetadataStore, MetadataValue, NodeRef};
pub use orchestrator::{AnalysisContext, AnalysisOrchestrator, AnalysisRecord, FunctionAnalysis};
pub use span::Span;
pub use symbols::{StorageClass, Symbol, SymbolId, SymbolTable};
