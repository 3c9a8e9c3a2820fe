//! Runs every analysis over a program in dependency order.
//!
//! Per function: Reachability → Expressions → Escape → Constants →
//! ReachingDefinitions → Liveness → Alias → Loops → Usage → Effects.
//! Then, program-wide: CallGraph → Purity → TargetHints.
//!
//! A failing analysis is reported as an `AnalysisFailed` error scoped to
//! the function and publishes nothing; the rest of the pipeline still runs
//! and reads the conservative defaults in its place. Per-function analysis
//! state is dropped after each stage; only the immutable results and the
//! published metadata are kept.

use crate::analysis::{
    AliasAnalyzer, AliasInfo, AnalysisKind, AnalysisResult, CallGraph, CallGraphAnalyzer,
    ConstantPropagation, ConstantResult, EscapeAnalyzer, EscapeInfo, ExpressionAnalyzer,
    ExpressionInfo, FunctionContext, FunctionEffects, LivenessAnalysis, LivenessResult,
    LoopAnalyzer, LoopInfo, PurityAnalyzer, PurityInfo, ReachabilityAnalyzer, ReachabilityInfo,
    ReachingDefinitions, ReachingResult, TargetHintAnalyzer, TargetHints, UsageAnalyzer, UsageInfo,
};
use crate::analysis::usage::ProgramUsage;
use crate::ast::{FunctionDecl, FunctionId, Program};
use crate::cfg::{CfgBuilder, ControlFlowGraph};
use crate::config::AnalysisConfig;
use crate::diagnostics::{Diagnostic, DiagnosticCode, DiagnosticHandler};
use crate::metadata::MetadataStore;
use crate::span::Span;
use crate::symbols::SymbolTable;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Results of the per-function pipeline. `None` means the analysis failed
/// (or never ran) for this function.
#[derive(Debug)]
pub struct FunctionAnalysis {
    pub function: FunctionId,
    pub name: String,
    pub cfg: ControlFlowGraph,
    pub reachability: Option<ReachabilityInfo>,
    pub expressions: Option<ExpressionInfo>,
    pub escape: Option<EscapeInfo>,
    pub constants: Option<ConstantResult>,
    pub reaching_definitions: Option<ReachingResult>,
    pub liveness: Option<LivenessResult>,
    pub alias: Option<AliasInfo>,
    pub loops: Option<LoopInfo>,
    pub usage: Option<UsageInfo>,
    pub effects: Option<FunctionEffects>,
    /// Analyses that returned an error, in pipeline order.
    pub failures: Vec<AnalysisKind>,
}

impl FunctionAnalysis {
    fn new(function: &FunctionDecl, cfg: ControlFlowGraph) -> Self {
        FunctionAnalysis {
            function: function.id,
            name: function.name.clone(),
            cfg,
            reachability: None,
            expressions: None,
            escape: None,
            constants: None,
            reaching_definitions: None,
            liveness: None,
            alias: None,
            loops: None,
            usage: None,
            effects: None,
            failures: Vec::new(),
        }
    }

    pub fn succeeded(&self, kind: AnalysisKind) -> bool {
        self.result(kind).is_some()
    }

    pub fn result(&self, kind: AnalysisKind) -> Option<AnalysisRecord<'_>> {
        match kind {
            AnalysisKind::Reachability => self.reachability.as_ref().map(AnalysisRecord::Reachability),
            AnalysisKind::Expressions => self.expressions.as_ref().map(AnalysisRecord::Expressions),
            AnalysisKind::Escape => self.escape.as_ref().map(AnalysisRecord::Escape),
            AnalysisKind::Constants => self.constants.as_ref().map(AnalysisRecord::Constants),
            AnalysisKind::ReachingDefinitions => self
                .reaching_definitions
                .as_ref()
                .map(AnalysisRecord::ReachingDefinitions),
            AnalysisKind::Liveness => self.liveness.as_ref().map(AnalysisRecord::Liveness),
            AnalysisKind::Alias => self.alias.as_ref().map(AnalysisRecord::Alias),
            AnalysisKind::Loops => self.loops.as_ref().map(AnalysisRecord::Loops),
            AnalysisKind::Usage => self.usage.as_ref().map(AnalysisRecord::Usage),
            AnalysisKind::Effects => self.effects.as_ref().map(AnalysisRecord::Effects),
            AnalysisKind::CallGraph | AnalysisKind::Purity | AnalysisKind::TargetHints => None,
        }
    }
}

/// Results of the program-wide tier.
#[derive(Debug, Default)]
pub struct ProgramAnalysis {
    pub usage: ProgramUsage,
    pub call_graph: Option<CallGraph>,
    pub purity: Option<PurityInfo>,
    pub target_hints: Option<TargetHints>,
    pub failures: Vec<AnalysisKind>,
}

impl ProgramAnalysis {
    pub fn result(&self, kind: AnalysisKind) -> Option<AnalysisRecord<'_>> {
        match kind {
            AnalysisKind::CallGraph => self.call_graph.as_ref().map(AnalysisRecord::CallGraph),
            AnalysisKind::Purity => self.purity.as_ref().map(AnalysisRecord::Purity),
            AnalysisKind::TargetHints => self.target_hints.as_ref().map(AnalysisRecord::TargetHints),
            _ => None,
        }
    }
}

/// Borrowed view of one analysis result.
#[derive(Debug, Clone, Copy)]
pub enum AnalysisRecord<'a> {
    Reachability(&'a ReachabilityInfo),
    Expressions(&'a ExpressionInfo),
    Escape(&'a EscapeInfo),
    Constants(&'a ConstantResult),
    ReachingDefinitions(&'a ReachingResult),
    Liveness(&'a LivenessResult),
    Alias(&'a AliasInfo),
    Loops(&'a LoopInfo),
    Usage(&'a UsageInfo),
    Effects(&'a FunctionEffects),
    CallGraph(&'a CallGraph),
    Purity(&'a PurityInfo),
    TargetHints(&'a TargetHints),
}

/// Everything one orchestrator run produced.
#[derive(Debug, Default)]
pub struct AnalysisContext {
    /// Keyed by function name.
    function_analyses: FxHashMap<String, FunctionAnalysis>,
    /// Function names in program order.
    order: Vec<String>,
    pub program: ProgramAnalysis,
    pub metadata: MetadataStore,
}

impl AnalysisContext {
    pub fn function_analysis(&self, name: &str) -> Option<&FunctionAnalysis> {
        self.function_analyses.get(name)
    }

    /// Result of `kind` for `function`. Program-wide kinds ignore the name.
    pub fn result(&self, function: &str, kind: AnalysisKind) -> Option<AnalysisRecord<'_>> {
        if AnalysisKind::PROGRAM_PIPELINE.contains(&kind) {
            return self.program.result(kind);
        }
        self.function_analysis(function)?.result(kind)
    }

    /// Analyzed functions in program order.
    pub fn analyzed_functions(&self) -> impl Iterator<Item = &FunctionAnalysis> {
        self.order.iter().filter_map(|name| self.function_analyses.get(name))
    }

    pub fn call_graph(&self) -> Option<&CallGraph> {
        self.program.call_graph.as_ref()
    }

    pub fn purity(&self) -> Option<&PurityInfo> {
        self.program.purity.as_ref()
    }

    pub fn target_hints(&self) -> Option<&TargetHints> {
        self.program.target_hints.as_ref()
    }
}

pub struct AnalysisOrchestrator {
    config: AnalysisConfig,
    diagnostics: Arc<dyn DiagnosticHandler>,
}

impl AnalysisOrchestrator {
    pub fn new(config: AnalysisConfig, diagnostics: Arc<dyn DiagnosticHandler>) -> Self {
        AnalysisOrchestrator { config, diagnostics }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Build every function's CFG, then analyze the program.
    pub fn run(&self, program: &Program, symbols: &SymbolTable) -> AnalysisContext {
        let mut cfgs = FxHashMap::default();
        let mut broken = Vec::new();
        for function in program.functions() {
            match CfgBuilder::build(program, function) {
                Ok(cfg) => {
                    cfgs.insert(function.id, cfg);
                }
                Err(err) => {
                    broken.push(function.id);
                    tracing::warn!(function = %function.name, %err, "control flow graph construction failed");
                    self.report(
                        Diagnostic::error(
                            DiagnosticCode::AnalysisFailed,
                            function.span,
                            format!("building the control flow graph failed: {}", err),
                        )
                        .in_function(function.name.clone()),
                    );
                }
            }
        }
        self.execute(program, symbols, cfgs, &broken)
    }

    /// Analyze the program with caller-supplied CFGs. A function with no
    /// CFG gets one `MissingControlFlowGraph` error and no facts; one whose
    /// CFG fails [`ControlFlowGraph::validate`] gets one `AnalysisFailed`
    /// error and no facts.
    pub fn run_with_cfgs(
        &self,
        program: &Program,
        symbols: &SymbolTable,
        cfgs: FxHashMap<FunctionId, ControlFlowGraph>,
    ) -> AnalysisContext {
        self.execute(program, symbols, cfgs, &[])
    }

    /// `broken` functions already had their CFG failure reported.
    fn execute(
        &self,
        program: &Program,
        symbols: &SymbolTable,
        mut cfgs: FxHashMap<FunctionId, ControlFlowGraph>,
        broken: &[FunctionId],
    ) -> AnalysisContext {
        let mut output = AnalysisContext::default();

        for function in program.functions() {
            let Some(mut cfg) = cfgs.remove(&function.id) else {
                if broken.contains(&function.id) {
                    continue;
                }
                self.report(
                    Diagnostic::error(
                        DiagnosticCode::MissingControlFlowGraph,
                        function.span,
                        format!("no control flow graph for function '{}'", function.name),
                    )
                    .in_function(function.name.clone()),
                );
                continue;
            };
            if let Err(err) = cfg.validate() {
                tracing::warn!(function = %function.name, %err, "rejecting malformed control flow graph");
                self.report(
                    Diagnostic::error(
                        DiagnosticCode::AnalysisFailed,
                        function.span,
                        format!("malformed control flow graph: {}", err),
                    )
                    .in_function(function.name.clone()),
                );
                continue;
            }
            cfg.compute_reachability();
            let analysis = self.analyze_function(program, symbols, function, cfg, &mut output.metadata);
            output.order.push(function.name.clone());
            output.function_analyses.insert(function.name.clone(), analysis);
        }

        self.analyze_program(program, symbols, &mut output);

        tracing::debug!(
            functions = output.order.len(),
            facts = output.metadata.len(),
            "analysis complete"
        );
        output
    }

    fn analyze_function(
        &self,
        program: &Program,
        symbols: &SymbolTable,
        function: &FunctionDecl,
        cfg: ControlFlowGraph,
        store: &mut MetadataStore,
    ) -> FunctionAnalysis {
        let mut record = FunctionAnalysis::new(function, cfg);
        let ctx = FunctionContext::new(program, symbols, function, &record.cfg, &self.config);
        let mut failures = Vec::new();
        let _span = tracing::debug_span!("function", name = %function.name).entered();

        let reachability = self.stage(&ctx, AnalysisKind::Reachability, &mut failures, || {
            let info = ReachabilityAnalyzer::new(ctx).analyze()?;
            info.publish(store)?;
            Ok(info)
        });
        if let Some(info) = &reachability {
            if self.config.report_unreachable_code {
                self.report_all(&ctx, &info.warnings);
            }
        }

        let expressions = self.stage(&ctx, AnalysisKind::Expressions, &mut failures, || {
            let info = ExpressionAnalyzer::new(ctx).analyze()?;
            info.publish(store)?;
            Ok(info)
        });

        let escape = self.stage(&ctx, AnalysisKind::Escape, &mut failures, || {
            let info = EscapeAnalyzer::new(ctx).analyze()?;
            info.publish(store)?;
            Ok(info)
        });

        let constants = self.stage(&ctx, AnalysisKind::Constants, &mut failures, || {
            let result = ConstantPropagation::new(ctx)?.analyze()?;
            result.publish(store)?;
            Ok(result)
        });
        if let Some(warning) = constants.as_ref().and_then(|r| r.warning()) {
            self.report_scoped(&ctx, warning.clone());
        }

        let reaching_definitions = self.stage(&ctx, AnalysisKind::ReachingDefinitions, &mut failures, || {
            let result = ReachingDefinitions::new(ctx)?.analyze()?;
            result.publish(store)?;
            Ok(result)
        });
        if let Some(warning) = reaching_definitions.as_ref().and_then(|r| r.facts.warning.as_ref()) {
            self.report_scoped(&ctx, warning.clone());
        }

        let liveness = self.stage(&ctx, AnalysisKind::Liveness, &mut failures, || {
            let result = LivenessAnalysis::new(ctx)?.analyze()?;
            result.publish(store)?;
            Ok(result)
        });
        if let Some(warning) = liveness.as_ref().and_then(|r| r.facts.warning.as_ref()) {
            self.report_scoped(&ctx, warning.clone());
        }

        let alias = self.stage(&ctx, AnalysisKind::Alias, &mut failures, || {
            let info = AliasAnalyzer::new(ctx, store).analyze()?;
            info.publish(store)?;
            Ok(info)
        });
        if let Some(info) = &alias {
            self.report_all(&ctx, &info.warnings);
        }

        let loops = self.stage(&ctx, AnalysisKind::Loops, &mut failures, || {
            let info = LoopAnalyzer::new(ctx, store).analyze()?;
            info.publish(store)?;
            Ok(info)
        });

        let usage = self.stage(&ctx, AnalysisKind::Usage, &mut failures, || {
            let info = UsageAnalyzer::new(ctx, store).analyze()?;
            info.publish(store)?;
            Ok(info)
        });

        // Published program-wide, by purity and the call graph
        let effects = self.stage(&ctx, AnalysisKind::Effects, &mut failures, || {
            FunctionEffects::collect(ctx, store)
        });

        record.reachability = reachability;
        record.expressions = expressions;
        record.escape = escape;
        record.constants = constants;
        record.reaching_definitions = reaching_definitions;
        record.liveness = liveness;
        record.alias = alias;
        record.loops = loops;
        record.usage = usage;
        record.effects = effects;
        record.failures = failures;
        record
    }

    fn analyze_program(&self, program: &Program, symbols: &SymbolTable, output: &mut AnalysisContext) {
        let _span = tracing::debug_span!("program").entered();
        let functions: Vec<&FunctionAnalysis> = output.analyzed_functions().collect();
        let usage = ProgramUsage::merge(functions.iter().filter_map(|f| f.usage.as_ref()));
        let effects: Vec<FunctionEffects> = functions.iter().filter_map(|f| f.effects.clone()).collect();
        let store = &mut output.metadata;
        let result = &mut output.program;

        if let Err(err) = usage.publish_globals(symbols, store) {
            self.program_failure(AnalysisKind::Usage, &err);
            result.failures.push(AnalysisKind::Usage);
        }

        let graph = CallGraphAnalyzer::new(program, symbols, &effects).analyze();
        match graph.publish(store) {
            Ok(_) => {
                for warning in &graph.warnings {
                    if warning.code == DiagnosticCode::UnusedFunction && !self.config.report_unused_functions {
                        continue;
                    }
                    self.report(warning.clone());
                }
            }
            Err(err) => {
                self.program_failure(AnalysisKind::CallGraph, &err);
                result.failures.push(AnalysisKind::CallGraph);
            }
        }

        let purity = PurityAnalyzer::new(&graph, &effects).analyze();
        match purity.publish(store) {
            Ok(_) => result.purity = Some(purity),
            Err(err) => {
                self.program_failure(AnalysisKind::Purity, &err);
                result.failures.push(AnalysisKind::Purity);
            }
        }
        if !result.failures.contains(&AnalysisKind::CallGraph) {
            result.call_graph = Some(graph);
        }

        let hints = TargetHintAnalyzer::new(symbols, &self.config, &usage, store).analyze();
        match hints.publish(store) {
            Ok(_) => result.target_hints = Some(hints),
            Err(err) => {
                self.program_failure(AnalysisKind::TargetHints, &err);
                result.failures.push(AnalysisKind::TargetHints);
            }
        }
        result.usage = usage;
    }

    /// Run one analysis; an error becomes a diagnostic and `None`.
    fn stage<T>(
        &self,
        ctx: &FunctionContext<'_>,
        kind: AnalysisKind,
        failures: &mut Vec<AnalysisKind>,
        run: impl FnOnce() -> AnalysisResult<T>,
    ) -> Option<T> {
        match run() {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(function = ctx.name(), analysis = %kind, %err, "analysis failed");
                self.report(
                    Diagnostic::error(
                        DiagnosticCode::AnalysisFailed,
                        ctx.function.span,
                        format!("{} analysis failed: {}", kind, err),
                    )
                    .in_function(ctx.name()),
                );
                failures.push(kind);
                None
            }
        }
    }

    fn program_failure(&self, kind: AnalysisKind, err: &dyn std::error::Error) {
        tracing::warn!(analysis = %kind, %err, "program analysis failed");
        self.report(Diagnostic::error(
            DiagnosticCode::AnalysisFailed,
            Span::default(),
            format!("{} analysis failed: {}", kind, err),
        ));
    }

    fn report_all(&self, ctx: &FunctionContext<'_>, warnings: &[Diagnostic]) {
        for warning in warnings {
            self.report_scoped(ctx, warning.clone());
        }
    }

    fn report_scoped(&self, ctx: &FunctionContext<'_>, diagnostic: Diagnostic) {
        let diagnostic = if diagnostic.function.is_none() {
            diagnostic.in_function(ctx.name())
        } else {
            diagnostic
        };
        self.report(diagnostic);
    }

    fn report(&self, diagnostic: Diagnostic) {
        self.diagnostics.report(diagnostic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryOp, ProgramBuilder, Type};
    use crate::cfg::NodeId;
    use crate::diagnostics::CollectingDiagnosticHandler;
    use crate::metadata::MetadataKey;

    #[test]
    fn test_pipeline_publishes_every_tier() {
        let mut b = ProgramBuilder::new();
        let main = b.declare_function("main", Type::Byte);
        let x = b.local(main, "x", Type::Byte);
        let two = b.byte(2);
        let d = b.declare(x, Some(two));
        let rx = b.var(x);
        let three = b.byte(3);
        let sum = b.binary(BinaryOp::Add, rx, three);
        let ret = b.ret(Some(sum));
        b.set_body(main, vec![d, ret]);
        let (program, symbols) = b.finish();

        let handler = Arc::new(CollectingDiagnosticHandler::new());
        let orchestrator = AnalysisOrchestrator::new(AnalysisConfig::default(), handler.clone());
        let output = orchestrator.run(&program, &symbols);

        assert_eq!(handler.error_count(), 0);
        let analysis = output.function_analysis("main").unwrap();
        assert!(analysis.failures.is_empty());
        for kind in AnalysisKind::FUNCTION_PIPELINE {
            assert!(output.result("main", kind).is_some(), "{} missing", kind);
        }
        for kind in AnalysisKind::PROGRAM_PIPELINE {
            assert!(output.result("main", kind).is_some(), "{} missing", kind);
        }
        assert_eq!(output.metadata.constant(sum).and_then(|c| c.as_number()), Some(5));
        assert!(output.metadata.has(main.symbol, MetadataKey::PurityLevel));
        assert!(output.metadata.has(x, MetadataKey::ZeroPagePriority));
    }

    #[test]
    fn test_missing_cfg_reported_once() {
        let mut b = ProgramBuilder::new();
        let main = b.declare_function("main", Type::Void);
        b.set_body(main, vec![]);
        let other = b.declare_function("other", Type::Void);
        b.set_body(other, vec![]);
        let (program, symbols) = b.finish();

        let mut cfgs = FxHashMap::default();
        let function = program.function(main.id).unwrap();
        cfgs.insert(main.id, CfgBuilder::build(&program, function).unwrap());

        let handler = Arc::new(CollectingDiagnosticHandler::new());
        let orchestrator = AnalysisOrchestrator::new(AnalysisConfig::default(), handler.clone());
        let output = orchestrator.run_with_cfgs(&program, &symbols, cfgs);

        let missing = handler.with_code(DiagnosticCode::MissingControlFlowGraph);
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].function.as_deref(), Some("other"));
        assert!(output.function_analysis("main").is_some());
        assert!(output.function_analysis("other").is_none());
        // The call graph lacks a summary for `other`, so nothing is unused
        assert!(handler.with_code(DiagnosticCode::UnusedFunction).is_empty());
    }

    #[test]
    fn test_malformed_cfg_isolated_to_its_function() {
        let mut b = ProgramBuilder::new();
        let good = b.declare_function("good", Type::Byte);
        let x = b.local(good, "x", Type::Byte);
        let four = b.byte(4);
        let dx = b.declare(x, Some(four));
        let rx = b.var(x);
        let ret = b.ret(Some(rx));
        b.set_body(good, vec![dx, ret]);
        let bad = b.declare_function("bad", Type::Void);
        b.set_body(bad, vec![]);
        let (program, symbols) = b.finish();

        let mut cfgs = FxHashMap::default();
        for function in program.functions() {
            cfgs.insert(function.id, CfgBuilder::build(&program, function).unwrap());
        }
        let corrupt = cfgs.get_mut(&bad.id).unwrap();
        corrupt.nodes[NodeId::EXIT.index()].predecessors.push(NodeId(42));

        let handler = Arc::new(CollectingDiagnosticHandler::new());
        let orchestrator = AnalysisOrchestrator::new(AnalysisConfig::default(), handler.clone());
        let output = orchestrator.run_with_cfgs(&program, &symbols, cfgs);

        assert_eq!(handler.error_count(), 1);
        let errors = handler.with_code(DiagnosticCode::AnalysisFailed);
        assert!(errors[0].message.contains("malformed control flow graph"));
        assert_eq!(errors[0].function.as_deref(), Some("bad"));
        assert!(output.function_analysis("bad").is_none());
        assert!(output.function_analysis("good").unwrap().failures.is_empty());
        assert_eq!(output.metadata.constant(rx).and_then(|c| c.as_number()), Some(4));
    }
}
