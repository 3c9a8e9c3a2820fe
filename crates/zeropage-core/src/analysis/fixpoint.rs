//! Generic iterative data-flow solver.
//!
//! A [`DataflowProblem`] supplies the lattice, the direction and a per-node
//! transfer function; [`FixpointSolver`] sweeps the reachable nodes in
//! reverse postorder (forward) or postorder (backward) until a complete
//! sweep changes nothing. The sweep count is capped. Hitting the cap is not
//! an error: the solver reports one incompleteness warning and returns the
//! last approximation with `converged == false`.

use super::AnalysisResult;
use crate::cfg::{CfgNode, ControlFlowGraph, NodeId};
use crate::diagnostics::{Diagnostic, DiagnosticCode};
use std::collections::BTreeSet;

/// A join semilattice. `join` must be commutative, associative and
/// idempotent; equality is `PartialEq`.
pub trait Lattice: Clone + PartialEq {
    fn join(&self, other: &Self) -> Self;
}

/// Set lattice ordered by inclusion, join = union.
impl<T: Ord + Clone> Lattice for BTreeSet<T> {
    fn join(&self, other: &Self) -> Self {
        if self.len() >= other.len() {
            let mut out = self.clone();
            out.extend(other.iter().cloned());
            out
        } else {
            let mut out = other.clone();
            out.extend(self.iter().cloned());
            out
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

pub trait DataflowProblem {
    type Fact: Lattice;

    /// Name used in logs and warnings.
    fn name(&self) -> &'static str;

    fn direction(&self) -> Direction;

    /// Initial value of every fact.
    fn neutral(&self) -> Self::Fact;

    /// Fact flowing into the entry node (forward) or out of the exit node
    /// (backward).
    fn boundary(&self) -> Self::Fact;

    /// Fact on the far side of `node` given the fact on its near side.
    fn transfer(&self, node: &CfgNode, input: &Self::Fact) -> AnalysisResult<Self::Fact>;
}

/// Facts before and after every node, in program order regardless of the
/// direction the problem was solved in.
#[derive(Debug, Clone)]
pub struct FixpointResult<F> {
    pub before: Vec<F>,
    pub after: Vec<F>,
    /// Number of sweeps performed, including the final unchanged one.
    pub iterations: usize,
    pub converged: bool,
    /// Set when the cap was hit.
    pub warning: Option<Diagnostic>,
}

impl<F> FixpointResult<F> {
    pub fn before(&self, node: NodeId) -> Option<&F> {
        self.before.get(node.index())
    }

    pub fn after(&self, node: NodeId) -> Option<&F> {
        self.after.get(node.index())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixpointSolver {
    max_iterations: usize,
}

impl FixpointSolver {
    pub fn new(max_iterations: usize) -> Self {
        FixpointSolver {
            max_iterations: max_iterations.max(1),
        }
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn solve<P: DataflowProblem>(
        &self,
        cfg: &ControlFlowGraph,
        problem: &P,
    ) -> AnalysisResult<FixpointResult<P::Fact>> {
        let n = cfg.node_count();
        let neutral = problem.neutral();
        let mut before = vec![neutral.clone(); n];
        let mut after = vec![neutral.clone(); n];

        let direction = problem.direction();
        let order = match direction {
            Direction::Forward => cfg.reverse_postorder(),
            Direction::Backward => cfg.postorder(),
        };

        let mut iterations = 0;
        let mut converged = false;
        while iterations < self.max_iterations {
            iterations += 1;
            let mut changed = false;

            for &id in &order {
                let node = cfg
                    .node(id)
                    .ok_or_else(|| super::AnalysisError::MalformedCfg(format!("missing node {}", id)))?;
                match direction {
                    Direction::Forward => {
                        let input = if id == NodeId::ENTRY {
                            problem.boundary()
                        } else {
                            join_all(cfg.preds(id).iter().filter_map(|p| after.get(p.index())), &neutral)
                        };
                        let output = problem.transfer(node, &input)?;
                        if output != after[id.index()] {
                            changed = true;
                            after[id.index()] = output;
                        }
                        before[id.index()] = input;
                    }
                    Direction::Backward => {
                        let input = if id == NodeId::EXIT {
                            problem.boundary()
                        } else {
                            join_all(cfg.succs(id).iter().filter_map(|s| before.get(s.index())), &neutral)
                        };
                        let output = problem.transfer(node, &input)?;
                        if output != before[id.index()] {
                            changed = true;
                            before[id.index()] = output;
                        }
                        after[id.index()] = input;
                    }
                }
            }

            if !changed {
                converged = true;
                break;
            }
        }

        let warning = if converged {
            tracing::debug!(analysis = problem.name(), iterations, "fixpoint converged");
            None
        } else {
            tracing::warn!(
                analysis = problem.name(),
                max_iterations = self.max_iterations,
                "fixpoint did not converge"
            );
            let span = cfg.node(NodeId::ENTRY).map(|n| n.span).unwrap_or_default();
            Some(Diagnostic::warning(
                DiagnosticCode::FixpointIncomplete,
                span,
                format!(
                    "{} did not converge within {} iterations; results may be incomplete",
                    problem.name(),
                    self.max_iterations
                ),
            ))
        };

        Ok(FixpointResult {
            before,
            after,
            iterations,
            converged,
            warning,
        })
    }
}

fn join_all<'a, F: Lattice + 'a>(facts: impl Iterator<Item = &'a F>, neutral: &F) -> F {
    let mut acc: Option<F> = None;
    for fact in facts {
        acc = Some(match acc {
            None => fact.clone(),
            Some(current) => current.join(fact),
        });
    }
    acc.unwrap_or_else(|| neutral.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::AnalysisError;
    use crate::cfg::NodeRole;
    use crate::span::Span;

    /// Collects the ids of every node on some path to the current one.
    struct Visited;

    impl DataflowProblem for Visited {
        type Fact = BTreeSet<u32>;

        fn name(&self) -> &'static str {
            "visited"
        }

        fn direction(&self) -> Direction {
            Direction::Forward
        }

        fn neutral(&self) -> Self::Fact {
            BTreeSet::new()
        }

        fn boundary(&self) -> Self::Fact {
            BTreeSet::new()
        }

        fn transfer(&self, node: &CfgNode, input: &Self::Fact) -> AnalysisResult<Self::Fact> {
            let mut out = input.clone();
            out.insert(node.id.0);
            Ok(out)
        }
    }

    /// Backward variant: nodes reachable from here to the exit.
    struct Ahead;

    impl DataflowProblem for Ahead {
        type Fact = BTreeSet<u32>;

        fn name(&self) -> &'static str {
            "ahead"
        }

        fn direction(&self) -> Direction {
            Direction::Backward
        }

        fn neutral(&self) -> Self::Fact {
            BTreeSet::new()
        }

        fn boundary(&self) -> Self::Fact {
            BTreeSet::new()
        }

        fn transfer(&self, node: &CfgNode, input: &Self::Fact) -> AnalysisResult<Self::Fact> {
            let mut out = input.clone();
            out.insert(node.id.0);
            Ok(out)
        }
    }

    /// Never stabilizes: every visit produces a fresh value.
    struct Counter;

    impl DataflowProblem for Counter {
        type Fact = BTreeSet<u64>;

        fn name(&self) -> &'static str {
            "counter"
        }

        fn direction(&self) -> Direction {
            Direction::Forward
        }

        fn neutral(&self) -> Self::Fact {
            BTreeSet::new()
        }

        fn boundary(&self) -> Self::Fact {
            BTreeSet::new()
        }

        fn transfer(&self, _node: &CfgNode, input: &Self::Fact) -> AnalysisResult<Self::Fact> {
            let mut out = input.clone();
            out.insert(input.len() as u64);
            Ok(out)
        }
    }

    struct Failing;

    impl DataflowProblem for Failing {
        type Fact = BTreeSet<u32>;

        fn name(&self) -> &'static str {
            "failing"
        }

        fn direction(&self) -> Direction {
            Direction::Forward
        }

        fn neutral(&self) -> Self::Fact {
            BTreeSet::new()
        }

        fn boundary(&self) -> Self::Fact {
            BTreeSet::new()
        }

        fn transfer(&self, node: &CfgNode, _input: &Self::Fact) -> AnalysisResult<Self::Fact> {
            Err(AnalysisError::MalformedCfg(format!("rejected {}", node.id)))
        }
    }

    /// ENTRY -> a -> b -> EXIT with a back edge b -> a.
    fn looping_cfg() -> (ControlFlowGraph, NodeId, NodeId) {
        let mut cfg = ControlFlowGraph::new(crate::ast::FunctionId(0));
        let a = cfg.add_node(None, NodeRole::LoopTest, Span::dummy());
        let b = cfg.add_node(None, NodeRole::Statement, Span::dummy());
        cfg.add_edge(NodeId::ENTRY, a);
        cfg.add_edge(a, b);
        cfg.add_edge(b, a);
        cfg.add_edge(a, NodeId::EXIT);
        cfg.compute_reachability();
        (cfg, a, b)
    }

    #[test]
    fn test_forward_reaches_fixpoint_through_loop() {
        let (cfg, a, b) = looping_cfg();
        let result = FixpointSolver::new(10).solve(&cfg, &Visited).unwrap();

        assert!(result.converged);
        assert!(result.warning.is_none());
        // The loop header sees the body through the back edge
        assert!(result.before(a).unwrap().contains(&b.0));
        assert!(result.after(NodeId::EXIT).unwrap().contains(&a.0));
    }

    #[test]
    fn test_backward_sees_successors() {
        let (cfg, a, b) = looping_cfg();
        let result = FixpointSolver::new(10).solve(&cfg, &Ahead).unwrap();

        assert!(result.converged);
        let at_entry = result.before(NodeId::ENTRY).unwrap();
        assert!(at_entry.contains(&a.0));
        assert!(at_entry.contains(&b.0));
        assert!(at_entry.contains(&NodeId::EXIT.0));
    }

    #[test]
    fn test_cap_produces_single_warning() {
        let (cfg, _, _) = looping_cfg();
        let result = FixpointSolver::new(3).solve(&cfg, &Counter).unwrap();

        assert!(!result.converged);
        assert_eq!(result.iterations, 3);
        let warning = result.warning.expect("capped run must warn");
        assert_eq!(warning.code, DiagnosticCode::FixpointIncomplete);
        assert!(warning.message.contains("results may be incomplete"));
    }

    #[test]
    fn test_transfer_error_propagates() {
        let (cfg, _, _) = looping_cfg();
        assert!(FixpointSolver::new(5).solve(&cfg, &Failing).is_err());
    }

    #[test]
    fn test_zero_cap_is_clamped_to_one() {
        assert_eq!(FixpointSolver::new(0).max_iterations(), 1);
    }

    #[test]
    fn test_dangling_edges_do_not_panic() {
        let (mut cfg, a, _) = looping_cfg();
        cfg.nodes[NodeId::EXIT.index()].predecessors.push(NodeId(42));
        cfg.nodes[a.index()].successors.push(NodeId(42));

        let forward = FixpointSolver::new(10).solve(&cfg, &Visited).unwrap();
        assert!(forward.converged);
        assert!(forward.after(NodeId::EXIT).unwrap().contains(&a.0));
        let backward = FixpointSolver::new(10).solve(&cfg, &Ahead).unwrap();
        assert!(backward.before(NodeId::ENTRY).unwrap().contains(&a.0));
    }
}
