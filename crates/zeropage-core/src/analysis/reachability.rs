//! Unreachable statement detection.
//!
//! A statement is unreachable when the CFG node executing it cannot be
//! reached from the entry node. Reachability is recomputed here instead of
//! trusting the nodes' cached flags, since callers may hand in graphs they
//! built themselves.

use super::{AnalysisResult, FunctionContext};
use crate::ast::StmtId;
use crate::cfg::NodeId;
use crate::diagnostics::{Diagnostic, DiagnosticCode};
use crate::metadata::{FactBatch, KeyNamespace, MetadataKey, MetadataStore};
use rustc_hash::FxHashSet;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default)]
pub struct ReachabilityInfo {
    pub unreachable: BTreeSet<StmtId>,
    /// One warning per run of consecutive unreachable statements.
    pub warnings: Vec<Diagnostic>,
}

impl ReachabilityInfo {
    pub fn is_unreachable(&self, stmt: StmtId) -> bool {
        self.unreachable.contains(&stmt)
    }

    pub fn publish(&self, store: &mut MetadataStore) -> AnalysisResult<usize> {
        let mut batch = FactBatch::new();
        for stmt in &self.unreachable {
            batch.flag(*stmt, MetadataKey::Unreachable);
        }
        Ok(batch.commit(store, KeyNamespace::ControlFlow)?)
    }
}

pub struct ReachabilityAnalyzer<'a> {
    ctx: FunctionContext<'a>,
    reachable: FxHashSet<NodeId>,
    info: ReachabilityInfo,
}

impl<'a> ReachabilityAnalyzer<'a> {
    pub fn new(ctx: FunctionContext<'a>) -> Self {
        ReachabilityAnalyzer {
            reachable: ctx.cfg.postorder().into_iter().collect(),
            ctx,
            info: ReachabilityInfo::default(),
        }
    }

    pub fn analyze(mut self) -> AnalysisResult<ReachabilityInfo> {
        let body = self.ctx.function.body.clone();
        self.visit_body(&body, false)?;
        tracing::debug!(
            function = self.ctx.name(),
            unreachable = self.info.unreachable.len(),
            "reachability analyzed"
        );
        Ok(self.info)
    }

    fn is_reachable(&self, stmt: StmtId) -> bool {
        // Statements absent from the graph are assumed reachable
        self.ctx
            .cfg
            .node_for_stmt(stmt)
            .map_or(true, |node| self.reachable.contains(&node))
    }

    /// `inside_dead` suppresses warnings for statements nested in an
    /// already reported unreachable statement.
    fn visit_body(&mut self, body: &[StmtId], inside_dead: bool) -> AnalysisResult<()> {
        let mut in_run = inside_dead;
        for &id in body {
            let stmt = self.ctx.stmt(id)?;
            let dead = !self.is_reachable(id);
            if dead {
                self.info.unreachable.insert(id);
                if !in_run {
                    self.info.warnings.push(Diagnostic::warning(
                        DiagnosticCode::UnreachableCode,
                        stmt.span,
                        "unreachable code",
                    ));
                    in_run = true;
                }
            } else {
                in_run = inside_dead;
            }
            for nested in stmt.nested_bodies() {
                self.visit_body(nested, inside_dead || dead)?;
            }
        }
        Ok(())
    }
}
