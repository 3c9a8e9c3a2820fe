//! Diagnostics produced by the analysis core.
//!
//! Analyses never abort compilation. Internal failures become `Error`
//! diagnostics scoped to the failing function; heuristic findings and
//! solver truncation become `Warning`s. Handlers are shared behind `Arc`
//! and must be `Send + Sync`.

use crate::span::Span;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DiagnosticLevel {
    Error,
    Warning,
}

impl fmt::Display for DiagnosticLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticLevel::Error => write!(f, "error"),
            DiagnosticLevel::Warning => write!(f, "warning"),
        }
    }
}

/// Stable diagnostic codes emitted by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiagnosticCode {
    /// An analysis failed internally; its facts for the function are absent.
    AnalysisFailed,
    /// No control-flow graph was supplied for a function.
    MissingControlFlowGraph,
    /// A data-flow solver hit its iteration cap.
    FixpointIncomplete,
    /// The points-to solver hit its iteration cap.
    PointsToIncomplete,
    /// A store targets the program's own code segment.
    SelfModifyingCode,
    /// A statement can never execute.
    UnreachableCode,
    /// A function is never called, exported, or referenced.
    UnusedFunction,
    /// A function participates in a call cycle.
    RecursiveCall,
}

impl DiagnosticCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticCode::AnalysisFailed => "ZP0001",
            DiagnosticCode::MissingControlFlowGraph => "ZP0002",
            DiagnosticCode::FixpointIncomplete => "ZP1001",
            DiagnosticCode::PointsToIncomplete => "ZP1002",
            DiagnosticCode::SelfModifyingCode => "ZP2001",
            DiagnosticCode::UnreachableCode => "ZP2002",
            DiagnosticCode::UnusedFunction => "ZP2003",
            DiagnosticCode::RecursiveCall => "ZP2004",
        }
    }
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single diagnostic message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub code: DiagnosticCode,
    pub level: DiagnosticLevel,
    pub message: String,
    pub span: Span,
    /// Name of the function the diagnostic is scoped to, if any.
    pub function: Option<String>,
}

impl Diagnostic {
    pub fn error(code: DiagnosticCode, span: Span, message: impl Into<String>) -> Self {
        Diagnostic {
            code,
            level: DiagnosticLevel::Error,
            message: message.into(),
            span,
            function: None,
        }
    }

    pub fn warning(code: DiagnosticCode, span: Span, message: impl Into<String>) -> Self {
        Diagnostic {
            code,
            level: DiagnosticLevel::Warning,
            message: message.into(),
            span,
            function: None,
        }
    }

    /// Scope this diagnostic to a function.
    pub fn in_function(mut self, name: impl Into<String>) -> Self {
        self.function = Some(name.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}] {}: {}", self.level, self.code, self.span, self.message)?;
        if let Some(function) = &self.function {
            write!(f, " (in function '{}')", function)?;
        }
        Ok(())
    }
}

/// Sink for diagnostics.
pub trait DiagnosticHandler: Send + Sync {
    fn report(&self, diagnostic: Diagnostic);

    fn error(&self, code: DiagnosticCode, span: Span, message: &str) {
        self.report(Diagnostic::error(code, span, message));
    }

    fn warning(&self, code: DiagnosticCode, span: Span, message: &str) {
        self.report(Diagnostic::warning(code, span, message));
    }

    fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    fn error_count(&self) -> usize;

    fn warning_count(&self) -> usize;

    fn get_diagnostics(&self) -> Vec<Diagnostic>;
}

/// Handler that keeps every diagnostic in memory.
#[derive(Debug, Default)]
pub struct CollectingDiagnosticHandler {
    diagnostics: Mutex<Vec<Diagnostic>>,
}

impl CollectingDiagnosticHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Diagnostics carrying the given code, in report order.
    pub fn with_code(&self, code: DiagnosticCode) -> Vec<Diagnostic> {
        self.diagnostics
            .lock()
            .iter()
            .filter(|d| d.code == code)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.diagnostics.lock().clear();
    }
}

impl DiagnosticHandler for CollectingDiagnosticHandler {
    fn report(&self, diagnostic: Diagnostic) {
        self.diagnostics.lock().push(diagnostic);
    }

    fn error_count(&self) -> usize {
        self.diagnostics
            .lock()
            .iter()
            .filter(|d| d.level == DiagnosticLevel::Error)
            .count()
    }

    fn warning_count(&self) -> usize {
        self.diagnostics
            .lock()
            .iter()
            .filter(|d| d.level == DiagnosticLevel::Warning)
            .count()
    }

    fn get_diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.lock().clone()
    }
}
