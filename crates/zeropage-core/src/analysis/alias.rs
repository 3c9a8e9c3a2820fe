//! Alias analysis for 6502 programs.
//!
//! Flow-insensitive, intraprocedural, Andersen-style points-to analysis.
//! An assignment `x = y` or `x = @y` yields the constraint
//! `pts(x) ⊇ pts(y) ∪ {y}`; word-sized `+`/`-` propagate both operands
//! (pointer arithmetic). Constraints are solved by sweeping the copy edges
//! until no set grows, bounded by `points_to_max_iterations`.
//!
//! Target-specific rules:
//! - Every location is classified into a [`MemoryRegion`] from its static
//!   address through the configured memory map, else from its storage class.
//! - Locations in provably different regions never alias, unless one may
//!   point to the other.
//! - A truncated solver publishes no non-alias facts: a missed points-to
//!   edge must never turn into a false "no alias".
//! - Stores whose static target lies in the code segment (and outside the
//!   hardware ranges) are reported as possible self-modifying code.

use super::defuse;
use super::{AnalysisResult, FunctionContext};
use crate::ast::{BinaryOp, ExprId, ExprKind, Intrinsic, StmtId, StmtKind, Type};
use crate::diagnostics::{Diagnostic, DiagnosticCode};
use crate::memory::MemoryRegion;
use crate::metadata::{FactBatch, KeyNamespace, MetadataKey, MetadataStore, MetadataValue};
use crate::span::Span;
use crate::symbols::{StorageClass, Symbol, SymbolId};
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, BTreeSet};

static NO_SYMBOLS: BTreeSet<SymbolId> = BTreeSet::new();

/// An abstract memory location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryLocation {
    pub symbol: SymbolId,
    pub region: MemoryRegion,
    /// Present for memory-mapped declarations.
    pub address: Option<u16>,
}

/// Result of querying whether two symbols may alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasResult {
    /// Definitely do not alias (distinct memory regions).
    NoAlias,
    /// May possibly alias (conservative approximation).
    MayAlias,
    /// The same location.
    MustAlias,
}

/// Alias analysis results for one function.
#[derive(Debug, Clone, Default)]
pub struct AliasInfo {
    pub locations: BTreeMap<SymbolId, MemoryLocation>,
    pub points_to: BTreeMap<SymbolId, BTreeSet<SymbolId>>,
    /// Empty when the solver was truncated.
    pub non_alias: BTreeMap<SymbolId, BTreeSet<SymbolId>>,
    /// Statements that may write program code, with the target address.
    pub self_modifying: BTreeMap<StmtId, u16>,
    pub iterations: usize,
    pub converged: bool,
    pub warnings: Vec<Diagnostic>,
    /// Symbols declared in the analyzed function.
    locals: BTreeSet<SymbolId>,
}

impl AliasInfo {
    pub fn points_to(&self, symbol: SymbolId) -> &BTreeSet<SymbolId> {
        self.points_to.get(&symbol).unwrap_or(&NO_SYMBOLS)
    }

    pub fn non_alias(&self, symbol: SymbolId) -> &BTreeSet<SymbolId> {
        self.non_alias.get(&symbol).unwrap_or(&NO_SYMBOLS)
    }

    pub fn region(&self, symbol: SymbolId) -> MemoryRegion {
        self.locations
            .get(&symbol)
            .map_or(MemoryRegion::Unknown, |loc| loc.region)
    }

    pub fn query(&self, a: SymbolId, b: SymbolId) -> AliasResult {
        if a == b {
            return AliasResult::MustAlias;
        }
        if self.non_alias(a).contains(&b) {
            AliasResult::NoAlias
        } else {
            AliasResult::MayAlias
        }
    }

    pub fn is_self_modifying(&self, stmt: StmtId) -> bool {
        self.self_modifying.contains_key(&stmt)
    }

    /// Points-to and non-alias sets are published for the function's own
    /// symbols; regions and static addresses for every location it touches.
    pub fn publish(&self, store: &mut MetadataStore) -> AnalysisResult<usize> {
        let mut batch = FactBatch::new();
        for (symbol, location) in &self.locations {
            batch.push(*symbol, MetadataKey::MemoryRegion, MetadataValue::Region(location.region));
            if let Some(address) = location.address {
                batch.number(*symbol, MetadataKey::StaticAddress, i64::from(address));
            }
        }
        for symbol in &self.locals {
            if let Some(pts) = self.points_to.get(symbol) {
                batch.push(*symbol, MetadataKey::PointsTo, MetadataValue::Symbols(pts.clone()));
            }
            if let Some(set) = self.non_alias.get(symbol) {
                batch.push(*symbol, MetadataKey::NonAlias, MetadataValue::Symbols(set.clone()));
            }
        }
        for stmt in self.self_modifying.keys() {
            batch.flag(*stmt, MetadataKey::SelfModifyingWrite);
        }
        Ok(batch.commit(store, KeyNamespace::Alias)?)
    }
}

/// Where a pointer-sized value may come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    /// `y` or `@y`: the target gets `{y} ∪ pts(y)`.
    Location(SymbolId),
    /// `y[i]`: the target gets `pts(y)`.
    Contents(SymbolId),
}

/// Builder for alias analysis via constraint solving.
pub struct AliasAnalyzer<'a> {
    ctx: FunctionContext<'a>,
    /// Earlier facts (constant store addresses).
    facts: &'a MetadataStore,
    points_to: FxHashMap<SymbolId, BTreeSet<SymbolId>>,
    /// `pts(dst) ⊇ pts(src)`
    copies: Vec<(SymbolId, SymbolId)>,
    touched: BTreeSet<SymbolId>,
}

impl<'a> AliasAnalyzer<'a> {
    pub fn new(ctx: FunctionContext<'a>, facts: &'a MetadataStore) -> Self {
        AliasAnalyzer {
            ctx,
            facts,
            points_to: FxHashMap::default(),
            copies: Vec::new(),
            touched: BTreeSet::new(),
        }
    }

    pub fn analyze(mut self) -> AnalysisResult<AliasInfo> {
        let statements = defuse::flatten_statements(self.ctx.program, &self.ctx.function.body)?;
        for &stmt in &statements {
            self.collect_constraints(stmt)?;
        }
        self.touched.extend(self.ctx.function.params.iter().copied());

        let (iterations, converged) = self.solve();
        let mut warnings = Vec::new();
        if converged {
            tracing::debug!(function = self.ctx.name(), iterations, "points-to solved");
        } else {
            tracing::warn!(
                function = self.ctx.name(),
                max_iterations = self.ctx.config.points_to_max_iterations,
                "points-to solver hit its iteration cap"
            );
            warnings.push(Diagnostic::warning(
                DiagnosticCode::PointsToIncomplete,
                self.ctx.function.span,
                format!(
                    "points-to analysis stopped after {} iterations; alias results may be incomplete",
                    iterations
                ),
            ));
        }

        let mut locations = BTreeMap::new();
        let mut locals = BTreeSet::new();
        for &symbol in &self.touched {
            let sym = self.ctx.symbol(symbol)?;
            if sym.is_function() {
                continue;
            }
            if sym.is_local_to(self.ctx.function_id()) {
                locals.insert(symbol);
            }
            locations.insert(symbol, self.classify(sym));
        }

        let points_to: BTreeMap<SymbolId, BTreeSet<SymbolId>> = self.points_to.drain().collect();
        let non_alias = if converged {
            Self::non_alias_sets(&locations, &points_to)
        } else {
            BTreeMap::new()
        };

        let mut self_modifying = BTreeMap::new();
        for &stmt in &statements {
            for (address, span) in self.static_stores(stmt)? {
                let segment = self.ctx.config.code_segment;
                if segment.contains(address) && !self.ctx.config.memory_map.is_hardware(address) {
                    tracing::warn!(function = self.ctx.name(), address, "store into code segment");
                    warnings.push(Diagnostic::warning(
                        DiagnosticCode::SelfModifyingCode,
                        span,
                        format!(
                            "write to ${:04X} lies inside the code segment {}; possible self-modifying code",
                            address, segment
                        ),
                    ));
                    self_modifying.insert(stmt, address);
                }
            }
        }

        Ok(AliasInfo {
            locations,
            points_to,
            non_alias,
            self_modifying,
            iterations,
            converged,
            warnings,
            locals,
        })
    }

    fn classify(&self, symbol: &Symbol) -> MemoryLocation {
        let region = match symbol.address {
            Some(address) => self.ctx.config.memory_map.classify(address),
            None => match symbol.storage {
                StorageClass::ZeroPage => MemoryRegion::ZeroPage,
                StorageClass::Ram | StorageClass::Data => MemoryRegion::Ram,
                StorageClass::Default | StorageClass::Mapped => MemoryRegion::Unknown,
            },
        };
        MemoryLocation {
            symbol: symbol.id,
            region,
            address: symbol.address,
        }
    }

    /// Pairs in disjoint known regions, minus anything either side may point to.
    fn non_alias_sets(
        locations: &BTreeMap<SymbolId, MemoryLocation>,
        points_to: &BTreeMap<SymbolId, BTreeSet<SymbolId>>,
    ) -> BTreeMap<SymbolId, BTreeSet<SymbolId>> {
        let empty = BTreeSet::new();
        let mut out: BTreeMap<SymbolId, BTreeSet<SymbolId>> = BTreeMap::new();
        for (a, loc_a) in locations {
            let pts_a = points_to.get(a).unwrap_or(&empty);
            for (b, loc_b) in locations {
                if a == b || !loc_a.region.is_disjoint_from(loc_b.region) {
                    continue;
                }
                let pts_b = points_to.get(b).unwrap_or(&empty);
                if pts_a.contains(b) || pts_b.contains(a) {
                    continue;
                }
                out.entry(*a).or_default().insert(*b);
            }
        }
        out
    }

    // ── Constraint collection ───────────────────────────────────────────

    fn collect_constraints(&mut self, stmt_id: StmtId) -> AnalysisResult<()> {
        let stmt = self.ctx.stmt(stmt_id)?;
        for root in defuse::statement_roots(self.ctx.program, stmt_id)? {
            self.touch_symbols(root)?;
        }
        match &stmt.kind {
            StmtKind::VarDecl {
                symbol,
                initializer: Some(init),
            } => {
                self.touched.insert(*symbol);
                self.add_assignment(*symbol, *init)?;
            }
            StmtKind::VarDecl { symbol, .. } | StmtKind::For { variable: symbol, .. } => {
                self.touched.insert(*symbol);
            }
            StmtKind::Assign { target, value, .. } => {
                let target_expr = self.ctx.expr(*target)?;
                let dst = match &target_expr.kind {
                    ExprKind::Identifier(symbol) => Some(*symbol),
                    // Storing a pointer into an array makes the array hold it
                    ExprKind::Index { base, .. } => defuse::identifier_symbol(self.ctx.program, *base),
                    _ => None,
                };
                if let Some(dst) = dst {
                    self.add_assignment(dst, *value)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn touch_symbols(&mut self, root: ExprId) -> AnalysisResult<()> {
        let touched = &mut self.touched;
        defuse::walk_expr(self.ctx.program, root, &mut |_, expr| {
            match expr.kind {
                ExprKind::Identifier(symbol) | ExprKind::AddressOf(symbol) => {
                    touched.insert(symbol);
                }
                _ => {}
            }
            Ok(())
        })
    }

    fn add_assignment(&mut self, dst: SymbolId, value: ExprId) -> AnalysisResult<()> {
        let mut sources = Vec::new();
        self.pointer_sources(value, &mut sources)?;
        for source in sources {
            match source {
                Source::Location(src) => {
                    tracing::trace!(dst = %dst, src = %src, "points-to base constraint");
                    self.points_to.entry(dst).or_default().insert(src);
                    self.copies.push((dst, src));
                }
                Source::Contents(src) => self.copies.push((dst, src)),
            }
        }
        Ok(())
    }

    fn pointer_sources(&self, expr: ExprId, out: &mut Vec<Source>) -> AnalysisResult<()> {
        let node = self.ctx.expr(expr)?;
        match &node.kind {
            ExprKind::Identifier(symbol) | ExprKind::AddressOf(symbol) => {
                out.push(Source::Location(*symbol))
            }
            ExprKind::Index { base, .. } => {
                if let Some(array) = defuse::identifier_symbol(self.ctx.program, *base) {
                    out.push(Source::Contents(array));
                }
            }
            ExprKind::Binary {
                op: BinaryOp::Add | BinaryOp::Sub,
                left,
                right,
            } if node.ty == Type::Word => {
                self.pointer_sources(*left, out)?;
                self.pointer_sources(*right, out)?;
            }
            _ => {}
        }
        Ok(())
    }

    // ── Solving ─────────────────────────────────────────────────────────

    /// Sweep the copy constraints until no set grows. Returns the sweep
    /// count and whether a fixpoint was reached within the cap.
    fn solve(&mut self) -> (usize, bool) {
        let max = self.ctx.config.points_to_max_iterations.max(1);
        let mut iterations = 0;
        while iterations < max {
            iterations += 1;
            let mut changed = false;
            for &(dst, src) in &self.copies {
                if dst == src {
                    continue;
                }
                let Some(src_set) = self.points_to.get(&src) else {
                    continue;
                };
                let dst_set = self.points_to.get(&dst);
                if dst_set.is_some_and(|d| src_set.is_subset(d)) {
                    continue;
                }
                let additions: Vec<SymbolId> = src_set
                    .iter()
                    .filter(|s| !dst_set.is_some_and(|d| d.contains(*s)))
                    .copied()
                    .collect();
                tracing::trace!(dst = %dst, src = %src, added = additions.len(), "points-to set grew");
                self.points_to.entry(dst).or_default().extend(additions);
                changed = true;
            }
            if !changed {
                return (iterations, true);
            }
        }
        (iterations, false)
    }

    // ── Self-modifying stores ───────────────────────────────────────────

    /// Statically known target addresses of the stores a statement performs.
    fn static_stores(&self, stmt_id: StmtId) -> AnalysisResult<Vec<(u16, Span)>> {
        let stmt = self.ctx.stmt(stmt_id)?;
        let mut stores = Vec::new();

        if let StmtKind::Assign { target, .. } = &stmt.kind {
            let target_expr = self.ctx.expr(*target)?;
            match &target_expr.kind {
                ExprKind::Identifier(symbol) => {
                    if let Some(address) = self.ctx.symbol(*symbol)?.address {
                        stores.push((address, stmt.span));
                    }
                }
                ExprKind::Index { base, index } => {
                    let array = defuse::identifier_symbol(self.ctx.program, *base)
                        .map(|s| self.ctx.symbol(s))
                        .transpose()?;
                    if let (Some(array), Some(offset)) = (array, defuse::constant_number(&self.ctx, self.facts, *index)?) {
                        if let Some(address) = array.address {
                            let element = i64::from(array.ty.element().size_in_bytes());
                            let target = i64::from(address) + offset * element;
                            if let Ok(target) = u16::try_from(target) {
                                stores.push((target, stmt.span));
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        for root in defuse::statement_roots(self.ctx.program, stmt_id)? {
            let mut pokes = Vec::new();
            defuse::walk_expr(self.ctx.program, root, &mut |_, expr| {
                if let ExprKind::Intrinsic { intrinsic, args } = &expr.kind {
                    if matches!(intrinsic, Intrinsic::Poke | Intrinsic::PokeWord) {
                        if let Some(address) = args.first() {
                            pokes.push((*address, expr.span));
                        }
                    }
                }
                Ok(())
            })?;
            for (address, span) in pokes {
                if let Some(value) = defuse::constant_number(&self.ctx, self.facts, address)? {
                    if let Ok(address) = u16::try_from(value) {
                        stores.push((address, span));
                    }
                }
            }
        }
        Ok(stores)
    }
}
