//! Run the full analysis pipeline over a fixture.

use crate::fixtures::Fixture;
use std::sync::Arc;
use zeropage_core::diagnostics::{CollectingDiagnosticHandler, Diagnostic, DiagnosticCode, DiagnosticHandler};
use zeropage_core::orchestrator::{AnalysisContext, AnalysisOrchestrator};
use zeropage_core::AnalysisConfig;

/// Output of one orchestrator run plus every diagnostic it reported.
pub struct Analyzed {
    pub context: AnalysisContext,
    pub diagnostics: Arc<CollectingDiagnosticHandler>,
}

impl Analyzed {
    pub fn with_code(&self, code: DiagnosticCode) -> Vec<Diagnostic> {
        self.diagnostics.with_code(code)
    }

    pub fn errors(&self) -> usize {
        self.diagnostics.error_count()
    }
}

/// Analyze with the default configuration.
pub fn analyze(fixture: &Fixture) -> Analyzed {
    analyze_with(fixture, AnalysisConfig::default())
}

pub fn analyze_with(fixture: &Fixture, config: AnalysisConfig) -> Analyzed {
    let diagnostics = Arc::new(CollectingDiagnosticHandler::new());
    let orchestrator = AnalysisOrchestrator::new(config, diagnostics.clone());
    let context = orchestrator.run(&fixture.program, &fixture.symbols);
    Analyzed { context, diagnostics }
}
