//! Program-wide call graph.
//!
//! Built from the per-function [`FunctionEffects`] summaries. Recursion is
//! found with Tarjan's strongly connected components: a function is
//! recursive when its component has more than one member or it calls
//! itself. The 6502 hardware stack is 256 bytes, so every cycle is worth a
//! warning.

use super::defuse;
use super::purity::FunctionEffects;
use crate::ast::{ExprId, ExprKind, Program, StmtKind};
use crate::diagnostics::{Diagnostic, DiagnosticCode};
use crate::metadata::{FactBatch, KeyNamespace, MetadataKey, MetadataStore, MetadataValue};
use crate::symbols::{SymbolId, SymbolTable};
use indexmap::{IndexMap, IndexSet};
use std::collections::{BTreeMap, BTreeSet};

use super::AnalysisResult;

#[derive(Debug, Clone, Default)]
pub struct CallGraph {
    /// Caller to callees, in program order. Functions without a summary
    /// appear with no edges.
    pub edges: IndexMap<SymbolId, IndexSet<SymbolId>>,
    /// Number of call expressions targeting each function.
    pub call_sites: BTreeMap<SymbolId, usize>,
    pub address_taken: BTreeSet<SymbolId>,
    pub unused: BTreeSet<SymbolId>,
    pub recursive: BTreeSet<SymbolId>,
    /// Recursive through a tail call to itself.
    pub tail_recursive: BTreeSet<SymbolId>,
    pub tail_calls: BTreeSet<ExprId>,
    /// Strongly connected components, callees before callers.
    pub components: Vec<Vec<SymbolId>>,
    /// Every function's calls were collected.
    pub complete: bool,
    pub warnings: Vec<Diagnostic>,
}

impl CallGraph {
    pub fn callees(&self, function: SymbolId) -> impl Iterator<Item = SymbolId> + '_ {
        self.edges.get(&function).into_iter().flatten().copied()
    }

    pub fn callers(&self, function: SymbolId) -> Vec<SymbolId> {
        self.edges
            .iter()
            .filter(|(_, callees)| callees.contains(&function))
            .map(|(caller, _)| *caller)
            .collect()
    }

    pub fn call_site_count(&self, function: SymbolId) -> usize {
        self.call_sites.get(&function).copied().unwrap_or(0)
    }

    pub fn is_unused(&self, function: SymbolId) -> bool {
        self.unused.contains(&function)
    }

    pub fn is_recursive(&self, function: SymbolId) -> bool {
        self.recursive.contains(&function)
    }

    pub fn is_tail_recursive(&self, function: SymbolId) -> bool {
        self.tail_recursive.contains(&function)
    }

    pub fn is_tail_call(&self, call: ExprId) -> bool {
        self.tail_calls.contains(&call)
    }

    /// Call-site counts are only published when every function's calls
    /// were collected; a partial count would read as exact.
    pub fn publish(&self, store: &mut MetadataStore) -> AnalysisResult<usize> {
        let mut batch = FactBatch::new();
        if self.complete {
            for function in self.edges.keys() {
                batch.number(*function, MetadataKey::CallSiteCount, self.call_site_count(*function) as i64);
                batch.push(*function, MetadataKey::Unused, MetadataValue::Bool(self.is_unused(*function)));
            }
        }
        for function in &self.recursive {
            batch.flag(*function, MetadataKey::Recursive);
        }
        for function in &self.tail_recursive {
            batch.flag(*function, MetadataKey::TailRecursive);
        }
        for call in &self.tail_calls {
            batch.flag(*call, MetadataKey::TailCall);
        }
        Ok(batch.commit(store, KeyNamespace::CallGraph)?)
    }
}

pub struct CallGraphAnalyzer<'a> {
    program: &'a Program,
    symbols: &'a SymbolTable,
    effects: BTreeMap<SymbolId, &'a FunctionEffects>,
}

impl<'a> CallGraphAnalyzer<'a> {
    pub fn new(program: &'a Program, symbols: &'a SymbolTable, effects: &'a [FunctionEffects]) -> Self {
        CallGraphAnalyzer {
            program,
            symbols,
            effects: effects.iter().map(|e| (e.symbol, e)).collect(),
        }
    }

    pub fn analyze(self) -> CallGraph {
        let mut graph = CallGraph {
            complete: true,
            ..CallGraph::default()
        };

        for function in self.program.functions() {
            let callees = graph.edges.entry(function.symbol).or_default();
            let Some(effects) = self.effects.get(&function.symbol) else {
                graph.complete = false;
                continue;
            };
            for call in &effects.calls {
                callees.insert(call.callee);
                *graph.call_sites.entry(call.callee).or_default() += 1;
                if call.tail {
                    graph.tail_calls.insert(call.expr);
                    if call.callee == function.symbol {
                        graph.tail_recursive.insert(function.symbol);
                    }
                }
            }
            graph.address_taken.extend(effects.address_taken_functions.iter().copied());
        }
        self.global_address_uses(&mut graph.address_taken);

        graph.components = strongly_connected_components(&graph.edges);
        for component in &graph.components {
            let cyclic = match component.as_slice() {
                [single] => graph.edges.get(single).is_some_and(|c| c.contains(single)),
                _ => true,
            };
            if cyclic {
                graph.recursive.extend(component.iter().copied());
                graph.warnings.push(self.recursion_warning(component));
            }
        }

        if graph.complete {
            self.mark_unused(&mut graph);
        } else {
            tracing::debug!("call graph incomplete, unused-function detection skipped");
        }

        tracing::debug!(
            functions = graph.edges.len(),
            components = graph.components.len(),
            recursive = graph.recursive.len(),
            unused = graph.unused.len(),
            "call graph built"
        );
        graph
    }

    /// `@f` in a global initializer keeps `f` alive.
    fn global_address_uses(&self, taken: &mut BTreeSet<SymbolId>) {
        for &stmt in self.program.globals() {
            let Some(StmtKind::VarDecl {
                initializer: Some(init),
                ..
            }) = self.program.stmt(stmt).map(|s| &s.kind)
            else {
                continue;
            };
            let walked = defuse::walk_expr(self.program, *init, &mut |_, expr| {
                if let ExprKind::AddressOf(symbol) = expr.kind {
                    if self.symbols.get(symbol).is_some_and(|s| s.is_function()) {
                        taken.insert(symbol);
                    }
                }
                Ok(())
            });
            if let Err(err) = walked {
                tracing::warn!(%err, "skipping malformed global initializer");
            }
        }
    }

    fn mark_unused(&self, graph: &mut CallGraph) {
        for function in self.program.functions() {
            let symbol = function.symbol;
            if function.exported
                || function.is_callback
                || function.name == "main"
                || graph.address_taken.contains(&symbol)
            {
                continue;
            }
            let called_elsewhere = graph.callers(symbol).iter().any(|caller| *caller != symbol);
            if called_elsewhere {
                continue;
            }
            graph.unused.insert(symbol);
            graph.warnings.push(
                Diagnostic::warning(
                    DiagnosticCode::UnusedFunction,
                    function.span,
                    format!("function '{}' is never called", function.name),
                )
                .in_function(function.name.clone()),
            );
        }
    }

    fn recursion_warning(&self, component: &[SymbolId]) -> Diagnostic {
        let names: Vec<String> = component.iter().map(|s| self.symbols.display_name(*s)).collect();
        let first = component
            .first()
            .and_then(|s| self.program.functions().iter().find(|f| f.symbol == *s));
        let span = first.map(|f| f.span).unwrap_or_default();
        let message = match names.as_slice() {
            [single] => format!("function '{}' calls itself; stack depth is unbounded", single),
            _ => format!(
                "functions {} are mutually recursive; stack depth is unbounded",
                names.iter().map(|n| format!("'{}'", n)).collect::<Vec<_>>().join(", ")
            ),
        };
        let diagnostic = Diagnostic::warning(DiagnosticCode::RecursiveCall, span, message);
        match first {
            Some(f) => diagnostic.in_function(f.name.clone()),
            None => diagnostic,
        }
    }
}

/// Iterative Tarjan. Components come out in reverse topological order.
fn strongly_connected_components(edges: &IndexMap<SymbolId, IndexSet<SymbolId>>) -> Vec<Vec<SymbolId>> {
    const UNVISITED: usize = usize::MAX;
    let n = edges.len();
    let mut index = vec![UNVISITED; n];
    let mut lowlink = vec![0usize; n];
    let mut on_stack = vec![false; n];
    let mut stack: Vec<usize> = Vec::new();
    let mut components = Vec::new();
    let mut next_index = 0;

    let successors = |v: usize| -> Vec<usize> {
        edges
            .get_index(v)
            .map(|(_, callees)| callees.iter().filter_map(|c| edges.get_index_of(c)).collect())
            .unwrap_or_default()
    };

    for root in 0..n {
        if index[root] != UNVISITED {
            continue;
        }
        // (node, successors, next successor to visit)
        let mut work: Vec<(usize, Vec<usize>, usize)> = vec![(root, successors(root), 0)];
        index[root] = next_index;
        lowlink[root] = next_index;
        next_index += 1;
        stack.push(root);
        on_stack[root] = true;

        while let Some((v, succs, next)) = work.last_mut() {
            let v = *v;
            if let Some(&w) = succs.get(*next) {
                *next += 1;
                if index[w] == UNVISITED {
                    index[w] = next_index;
                    lowlink[w] = next_index;
                    next_index += 1;
                    stack.push(w);
                    on_stack[w] = true;
                    work.push((w, successors(w), 0));
                } else if on_stack[w] {
                    lowlink[v] = lowlink[v].min(index[w]);
                }
                continue;
            }

            work.pop();
            if let Some((parent, _, _)) = work.last() {
                lowlink[*parent] = lowlink[*parent].min(lowlink[v]);
            }
            if lowlink[v] == index[v] {
                let mut component = Vec::new();
                while let Some(w) = stack.pop() {
                    on_stack[w] = false;
                    if let Some((symbol, _)) = edges.get_index(w) {
                        component.push(*symbol);
                    }
                    if w == v {
                        break;
                    }
                }
                component.sort();
                components.push(component);
            }
        }
    }
    components
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::FunctionContext;
    use crate::ast::{BinaryOp, ProgramBuilder, Type};
    use crate::cfg::CfgBuilder;
    use crate::config::AnalysisConfig;

    fn build(program: &Program, symbols: &SymbolTable) -> (Vec<FunctionEffects>, CallGraph) {
        let config = AnalysisConfig::default();
        let store = MetadataStore::new();
        let effects: Vec<FunctionEffects> = program
            .functions()
            .iter()
            .map(|function| {
                let cfg = CfgBuilder::build(program, function).unwrap();
                let ctx = FunctionContext::new(program, symbols, function, &cfg, &config);
                FunctionEffects::collect(ctx, &store).unwrap()
            })
            .collect();
        let graph = CallGraphAnalyzer::new(program, symbols, &effects).analyze();
        (effects, graph)
    }

    #[test]
    fn test_scc_order_and_cycles() {
        let a = SymbolId(0);
        let b = SymbolId(1);
        let c = SymbolId(2);
        let mut edges: IndexMap<SymbolId, IndexSet<SymbolId>> = IndexMap::new();
        edges.entry(a).or_default().insert(b);
        edges.entry(b).or_default().insert(a);
        edges.entry(b).or_default().insert(c);
        edges.entry(c).or_default();
        let components = strongly_connected_components(&edges);
        assert_eq!(components, vec![vec![c], vec![a, b]]);
    }

    #[test]
    fn test_recursion_and_tail_calls() {
        let mut b = ProgramBuilder::new();
        let countdown = b.declare_function("countdown", Type::Void);
        let n = b.param(countdown, "n", Type::Byte);
        let rn = b.var(n);
        let zero = b.byte(0);
        let cond = b.binary(BinaryOp::Eq, rn, zero);
        let early = b.ret(None);
        let guard = b.if_stmt(cond, vec![early], None);
        let rn2 = b.var(n);
        let one = b.byte(1);
        let dec = b.binary(BinaryOp::Sub, rn2, one);
        let recurse = b.call(countdown.symbol, vec![dec]);
        let tail = b.expr_stmt(recurse);
        b.set_body(countdown, vec![guard, tail]);

        let ping = b.declare_function("ping", Type::Void);
        let pong = b.declare_function("pong", Type::Void);
        let to_pong = b.call(pong.symbol, vec![]);
        let s = b.expr_stmt(to_pong);
        b.set_body(ping, vec![s]);
        let to_ping = b.call(ping.symbol, vec![]);
        let s = b.expr_stmt(to_ping);
        let after = b.byte(0);
        let s2 = b.expr_stmt(after);
        b.set_body(pong, vec![s, s2]);

        let main = b.declare_function("main", Type::Void);
        let ten = b.byte(10);
        let c1 = b.call(countdown.symbol, vec![ten]);
        let s1 = b.expr_stmt(c1);
        let c2 = b.call(ping.symbol, vec![]);
        let s2 = b.expr_stmt(c2);
        b.set_body(main, vec![s1, s2]);
        let (program, symbols) = b.finish();

        let (_, graph) = build(&program, &symbols);
        assert!(graph.is_recursive(countdown.symbol));
        assert!(graph.is_tail_recursive(countdown.symbol));
        assert!(graph.is_tail_call(recurse));
        assert!(graph.is_recursive(ping.symbol));
        assert!(graph.is_recursive(pong.symbol));
        assert!(!graph.is_tail_call(to_ping));
        assert!(!graph.is_recursive(main.symbol));
        assert_eq!(graph.call_site_count(ping.symbol), 2);
        assert_eq!(
            graph
                .warnings
                .iter()
                .filter(|d| d.code == DiagnosticCode::RecursiveCall)
                .count(),
            2
        );
    }

    #[test]
    fn test_unused_functions() {
        let mut b = ProgramBuilder::new();
        let dead = b.declare_function("dead", Type::Void);
        let again = b.call(dead.symbol, vec![]);
        let s = b.expr_stmt(again);
        b.set_body(dead, vec![s]);
        let api = b.declare_function("api", Type::Void);
        b.set_body(api, vec![]);
        b.set_exported(api, true);
        let irq = b.declare_function("irq", Type::Void);
        b.set_body(irq, vec![]);
        b.set_callback(irq, true);
        let table_entry = b.declare_function("table_entry", Type::Void);
        b.set_body(table_entry, vec![]);
        let vector = b.global("vector", Type::Word);
        let addr = b.address_of(table_entry.symbol);
        b.declare_global(vector, Some(addr));
        let main = b.declare_function("main", Type::Void);
        b.set_body(main, vec![]);
        let (program, symbols) = b.finish();

        let (effects, graph) = build(&program, &symbols);
        assert!(graph.is_unused(dead.symbol));
        assert!(!graph.is_unused(api.symbol));
        assert!(!graph.is_unused(irq.symbol));
        assert!(!graph.is_unused(table_entry.symbol));
        assert!(!graph.is_unused(main.symbol));

        let mut store = MetadataStore::new();
        graph.publish(&mut store).unwrap();
        assert!(store.bool_or_default(dead.symbol, MetadataKey::Unused));
        assert_eq!(store.number(dead.symbol, MetadataKey::CallSiteCount), Some(1));

        // Missing one summary disables unused marking
        let partial: Vec<FunctionEffects> = effects
            .into_iter()
            .filter(|e| e.symbol != main.symbol)
            .collect();
        let graph = CallGraphAnalyzer::new(&program, &symbols, &partial).analyze();
        assert!(!graph.complete);
        assert!(graph.unused.is_empty());
    }
}
