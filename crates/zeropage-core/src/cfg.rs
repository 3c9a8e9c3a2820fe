//! Statement-level control flow graph.
//!
//! Every executable statement gets one node (a `for` loop gets three: its
//! initialization, its test and its step). Entry and exit are sentinel
//! nodes without statements. The graph is consumed by the analyses; callers
//! either build it themselves through [`ControlFlowGraph::add_node`] /
//! [`ControlFlowGraph::add_edge`] or lower a function body with
//! [`CfgBuilder`].
//!
//! Design: nodes reference statements by [`StmtId`] rather than by
//! reference, so the graph is independent of the tree's lifetime and can be
//! discarded once a function's analyses are done.

use crate::ast::{FunctionDecl, FunctionId, Program, StmtId, StmtKind};
use crate::span::Span;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::fmt;
use thiserror::Error;

/// Unique identifier for a node within a CFG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    /// The entry node. Control flow begins here.
    pub const ENTRY: NodeId = NodeId(0);
    /// The exit node. Every return and the final fall-through lead here.
    pub const EXIT: NodeId = NodeId(1);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "N{}", self.0)
    }
}

/// What part of its statement a node executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRole {
    Entry,
    Exit,
    /// A straight-line statement (declaration, assignment, call, return, ...).
    Statement,
    /// Condition of an `if`.
    Branch,
    /// Condition of a `while`, or the bound check of a `for`.
    LoopTest,
    /// `for` variable initialization.
    LoopInit,
    /// `for` variable increment.
    LoopStep,
}

#[derive(Debug, Clone)]
pub struct CfgNode {
    pub id: NodeId,
    /// The statement this node executes, absent for entry and exit.
    pub stmt: Option<StmtId>,
    pub role: NodeRole,
    pub predecessors: Vec<NodeId>,
    pub successors: Vec<NodeId>,
    /// Set by [`ControlFlowGraph::compute_reachability`].
    pub reachable: bool,
    pub span: Span,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CfgError {
    #[error("statement {0} does not exist")]
    UnknownStatement(StmtId),
    #[error("missing {0} sentinel node")]
    MissingSentinel(&'static str),
    #[error("node at position {position} is numbered {id}")]
    MisnumberedNode { position: usize, id: NodeId },
    #[error("edge {from} -> {to} leaves the graph of {count} nodes")]
    DanglingEdge { from: NodeId, to: NodeId, count: usize },
    #[error("edge {from} -> {to} is recorded on one side only")]
    OneSidedEdge { from: NodeId, to: NodeId },
}

/// The control flow graph for a single function.
#[derive(Debug, Clone)]
pub struct ControlFlowGraph {
    pub function: FunctionId,
    /// All nodes, indexed by `NodeId`.
    pub nodes: Vec<CfgNode>,
    /// First node executing each statement.
    pub stmt_to_node: FxHashMap<StmtId, NodeId>,
    /// Targets of loop back edges.
    pub loop_headers: Vec<NodeId>,
}

impl ControlFlowGraph {
    /// An empty graph holding only the entry and exit sentinels.
    pub fn new(function: FunctionId) -> Self {
        let mut cfg = ControlFlowGraph {
            function,
            nodes: Vec::new(),
            stmt_to_node: FxHashMap::default(),
            loop_headers: Vec::new(),
        };
        let entry = cfg.add_node(None, NodeRole::Entry, Span::dummy());
        let exit = cfg.add_node(None, NodeRole::Exit, Span::dummy());
        debug_assert_eq!(entry, NodeId::ENTRY);
        debug_assert_eq!(exit, NodeId::EXIT);
        cfg
    }

    pub fn entry(&self) -> NodeId {
        NodeId::ENTRY
    }

    pub fn exit(&self) -> NodeId {
        NodeId::EXIT
    }

    pub fn add_node(&mut self, stmt: Option<StmtId>, role: NodeRole, span: Span) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(CfgNode {
            id,
            stmt,
            role,
            predecessors: Vec::new(),
            successors: Vec::new(),
            reachable: false,
            span,
        });
        if let Some(stmt) = stmt {
            self.stmt_to_node.entry(stmt).or_insert(id);
        }
        id
    }

    /// Add an edge; duplicate edges are ignored.
    pub fn add_edge(&mut self, from: NodeId, to: NodeId) {
        if from.index() >= self.nodes.len() || to.index() >= self.nodes.len() {
            return;
        }
        if self.nodes[from.index()].successors.contains(&to) {
            return;
        }
        self.nodes[from.index()].successors.push(to);
        self.nodes[to.index()].predecessors.push(from);
    }

    pub fn node(&self, id: NodeId) -> Option<&CfgNode> {
        self.nodes.get(id.index())
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn preds(&self, id: NodeId) -> &[NodeId] {
        self.node(id)
            .map(|n| n.predecessors.as_slice())
            .unwrap_or(&[])
    }

    pub fn succs(&self, id: NodeId) -> &[NodeId] {
        self.node(id).map(|n| n.successors.as_slice()).unwrap_or(&[])
    }

    pub fn node_for_stmt(&self, stmt: StmtId) -> Option<NodeId> {
        self.stmt_to_node.get(&stmt).copied()
    }

    /// Check the shape the analyses index by: both sentinels present, node
    /// `i` stored at position `i`, and every edge in range and mirrored in
    /// the other endpoint's adjacency list.
    pub fn validate(&self) -> Result<(), CfgError> {
        if self.nodes.len() <= NodeId::ENTRY.index() {
            return Err(CfgError::MissingSentinel("entry"));
        }
        if self.nodes.len() <= NodeId::EXIT.index() {
            return Err(CfgError::MissingSentinel("exit"));
        }
        let count = self.nodes.len();
        for (position, node) in self.nodes.iter().enumerate() {
            if node.id.index() != position {
                return Err(CfgError::MisnumberedNode { position, id: node.id });
            }
            for &succ in &node.successors {
                if succ.index() >= count {
                    return Err(CfgError::DanglingEdge { from: node.id, to: succ, count });
                }
                if !self.preds(succ).contains(&node.id) {
                    return Err(CfgError::OneSidedEdge { from: node.id, to: succ });
                }
            }
            for &pred in &node.predecessors {
                if pred.index() >= count {
                    return Err(CfgError::DanglingEdge { from: pred, to: node.id, count });
                }
                if !self.succs(pred).contains(&node.id) {
                    return Err(CfgError::OneSidedEdge { from: pred, to: node.id });
                }
            }
        }
        Ok(())
    }

    /// Recompute every node's `reachable` flag from the entry node.
    pub fn compute_reachability(&mut self) {
        for node in &mut self.nodes {
            node.reachable = false;
        }
        let mut queue = VecDeque::new();
        if let Some(entry) = self.nodes.get_mut(NodeId::ENTRY.index()) {
            entry.reachable = true;
            queue.push_back(NodeId::ENTRY);
        }
        while let Some(id) = queue.pop_front() {
            for succ in self.succs(id).to_vec() {
                let Some(node) = self.nodes.get_mut(succ.index()) else {
                    continue;
                };
                if !node.reachable {
                    node.reachable = true;
                    queue.push_back(succ);
                }
            }
        }
    }

    pub fn is_reachable(&self, id: NodeId) -> bool {
        self.node(id).map(|n| n.reachable).unwrap_or(false)
    }

    /// Nodes reachable from the entry, in reverse postorder.
    pub fn reverse_postorder(&self) -> Vec<NodeId> {
        let mut order = self.postorder();
        order.reverse();
        order
    }

    /// Nodes reachable from the entry, in postorder.
    pub fn postorder(&self) -> Vec<NodeId> {
        let mut visited = vec![false; self.nodes.len()];
        let mut postorder = Vec::with_capacity(self.nodes.len());
        if self.nodes.is_empty() {
            return postorder;
        }
        // Explicit stack of (node, next successor index) keeps deep graphs off the call stack.
        let mut stack: Vec<(NodeId, usize)> = vec![(NodeId::ENTRY, 0)];
        visited[NodeId::ENTRY.index()] = true;
        while let Some((node, next)) = stack.last_mut() {
            let succs = self.succs(*node);
            if *next < succs.len() {
                let succ = succs[*next];
                *next += 1;
                if let Some(seen) = visited.get_mut(succ.index()) {
                    if !*seen {
                        *seen = true;
                        stack.push((succ, 0));
                    }
                }
            } else {
                postorder.push(*node);
                stack.pop();
            }
        }
        postorder
    }
}

/// Per-loop bookkeeping for `break`/`continue` resolution.
struct LoopFrame {
    /// Where `continue` jumps, when already known (`while` header).
    continue_target: Option<NodeId>,
    /// `continue` nodes waiting for a `for` step node.
    continues: Vec<NodeId>,
    breaks: Vec<NodeId>,
}

/// Builder that lowers a function body into a [`ControlFlowGraph`].
///
/// The builder threads the set of "open" nodes (nodes whose fall-through
/// successor is the next statement) through the body. A statement reached
/// with no open nodes gets a node without predecessors, which is how code
/// after `return`, `break` and `continue` becomes unreachable.
pub struct CfgBuilder<'a> {
    program: &'a Program,
    cfg: ControlFlowGraph,
    loop_stack: Vec<LoopFrame>,
}

impl<'a> CfgBuilder<'a> {
    /// Build the CFG of a function body.
    pub fn build(program: &'a Program, function: &FunctionDecl) -> Result<ControlFlowGraph, CfgError> {
        let mut builder = CfgBuilder {
            program,
            cfg: ControlFlowGraph::new(function.id),
            loop_stack: Vec::new(),
        };
        builder.cfg.nodes[NodeId::ENTRY.index()].span = function.span;
        builder.cfg.nodes[NodeId::EXIT.index()].span = function.span;

        let open = builder.build_body(&function.body, vec![NodeId::ENTRY])?;
        builder.connect(&open, NodeId::EXIT);
        builder.cfg.compute_reachability();
        Ok(builder.cfg)
    }

    fn connect(&mut self, from: &[NodeId], to: NodeId) {
        for &node in from {
            self.cfg.add_edge(node, to);
        }
    }

    fn build_body(&mut self, body: &[StmtId], mut open: Vec<NodeId>) -> Result<Vec<NodeId>, CfgError> {
        for &stmt in body {
            open = self.process_statement(stmt, open)?;
        }
        Ok(open)
    }

    /// Process a single statement. Returns the nodes that fall through to
    /// whatever follows it.
    fn process_statement(&mut self, id: StmtId, open: Vec<NodeId>) -> Result<Vec<NodeId>, CfgError> {
        let program = self.program;
        let stmt = program.stmt(id).ok_or(CfgError::UnknownStatement(id))?;
        let span = stmt.span;

        match &stmt.kind {
            StmtKind::VarDecl { .. } | StmtKind::Assign { .. } | StmtKind::Expr(_) => {
                let node = self.cfg.add_node(Some(id), NodeRole::Statement, span);
                self.connect(&open, node);
                Ok(vec![node])
            }

            StmtKind::Block(body) => {
                let node = self.cfg.add_node(Some(id), NodeRole::Statement, span);
                self.connect(&open, node);
                self.build_body(body, vec![node])
            }

            StmtKind::If {
                then_branch,
                else_branch,
                ..
            } => {
                let branch = self.cfg.add_node(Some(id), NodeRole::Branch, span);
                self.connect(&open, branch);

                let mut out = self.build_body(then_branch, vec![branch])?;
                match else_branch {
                    Some(else_branch) => out.extend(self.build_body(else_branch, vec![branch])?),
                    // No else: the false edge falls through
                    None => out.push(branch),
                }
                Ok(out)
            }

            StmtKind::While { body, .. } => {
                let header = self.cfg.add_node(Some(id), NodeRole::LoopTest, span);
                self.connect(&open, header);

                self.loop_stack.push(LoopFrame {
                    continue_target: Some(header),
                    continues: Vec::new(),
                    breaks: Vec::new(),
                });
                let body_end = self.build_body(body, vec![header]);
                let frame = self.pop_frame();
                let body_end = body_end?;

                // Body -> header (back edge)
                self.connect(&body_end, header);
                self.cfg.loop_headers.push(header);

                let mut out = vec![header];
                out.extend(frame.breaks);
                Ok(out)
            }

            StmtKind::For { body, .. } => {
                let init = self.cfg.add_node(Some(id), NodeRole::LoopInit, span);
                self.connect(&open, init);
                let test = self.cfg.add_node(Some(id), NodeRole::LoopTest, span);
                self.cfg.add_edge(init, test);

                self.loop_stack.push(LoopFrame {
                    continue_target: None,
                    continues: Vec::new(),
                    breaks: Vec::new(),
                });
                let body_end = self.build_body(body, vec![test]);
                let frame = self.pop_frame();
                let body_end = body_end?;

                let step = self.cfg.add_node(Some(id), NodeRole::LoopStep, span);
                self.connect(&body_end, step);
                self.connect(&frame.continues, step);
                // Step -> test (back edge)
                self.cfg.add_edge(step, test);
                self.cfg.loop_headers.push(test);

                let mut out = vec![test];
                out.extend(frame.breaks);
                Ok(out)
            }

            StmtKind::Return(_) => {
                let node = self.cfg.add_node(Some(id), NodeRole::Statement, span);
                self.connect(&open, node);
                self.cfg.add_edge(node, NodeId::EXIT);
                Ok(Vec::new())
            }

            StmtKind::Break => {
                let node = self.cfg.add_node(Some(id), NodeRole::Statement, span);
                self.connect(&open, node);
                // Break outside a loop has no successor; the type checker rejects it upstream
                if let Some(frame) = self.loop_stack.last_mut() {
                    frame.breaks.push(node);
                }
                Ok(Vec::new())
            }

            StmtKind::Continue => {
                let node = self.cfg.add_node(Some(id), NodeRole::Statement, span);
                self.connect(&open, node);
                let target = match self.loop_stack.last_mut() {
                    Some(frame) => match frame.continue_target {
                        Some(target) => Some(target),
                        None => {
                            frame.continues.push(node);
                            None
                        }
                    },
                    None => None,
                };
                if let Some(target) = target {
                    self.cfg.add_edge(node, target);
                }
                Ok(Vec::new())
            }
        }
    }

    fn pop_frame(&mut self) -> LoopFrame {
        self.loop_stack.pop().unwrap_or(LoopFrame {
            continue_target: None,
            continues: Vec::new(),
            breaks: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{ProgramBuilder, Type};

    fn build(b: ProgramBuilder, name: &str) -> (Program, ControlFlowGraph) {
        let (program, _) = b.finish();
        let function = program.function_by_name(name).unwrap().clone();
        let cfg = CfgBuilder::build(&program, &function).unwrap();
        (program, cfg)
    }

    #[test]
    fn test_linear_code_chain() {
        let mut b = ProgramBuilder::new();
        let main = b.declare_function("main", Type::Void);
        let x = b.local(main, "x", Type::Byte);
        let one = b.byte(1);
        let s1 = b.declare(x, Some(one));
        let two = b.byte(2);
        let s2 = b.assign(x, two);
        b.set_body(main, vec![s1, s2]);
        let (_, cfg) = build(b, "main");

        // ENTRY, EXIT and one node per statement
        assert_eq!(cfg.node_count(), 4);
        let n1 = cfg.node_for_stmt(s1).unwrap();
        let n2 = cfg.node_for_stmt(s2).unwrap();
        assert_eq!(cfg.succs(NodeId::ENTRY), &[n1]);
        assert_eq!(cfg.succs(n1), &[n2]);
        assert_eq!(cfg.succs(n2), &[NodeId::EXIT]);
        assert!(cfg.loop_headers.is_empty());
    }

    #[test]
    fn test_return_makes_following_code_unreachable() {
        let mut b = ProgramBuilder::new();
        let main = b.declare_function("main", Type::Void);
        let x = b.local(main, "x", Type::Byte);
        let ret = b.ret(None);
        let dead = b.declare(x, None);
        b.set_body(main, vec![ret, dead]);
        let (_, cfg) = build(b, "main");

        let dead_node = cfg.node_for_stmt(dead).unwrap();
        assert!(cfg.preds(dead_node).is_empty());
        assert!(!cfg.is_reachable(dead_node));
        assert!(cfg.is_reachable(cfg.node_for_stmt(ret).unwrap()));
    }

    #[test]
    fn test_if_else_both_returning() {
        let mut b = ProgramBuilder::new();
        let main = b.declare_function("main", Type::Byte);
        let flag = b.param(main, "flag", Type::Bool);
        let x = b.local(main, "x", Type::Byte);
        let cond = b.var(flag);
        let one = b.byte(1);
        let r1 = b.ret(Some(one));
        let two = b.byte(2);
        let r2 = b.ret(Some(two));
        let if_stmt = b.if_stmt(cond, vec![r1], Some(vec![r2]));
        let after = b.declare(x, None);
        b.set_body(main, vec![if_stmt, after]);
        let (_, cfg) = build(b, "main");

        let branch = cfg.node_for_stmt(if_stmt).unwrap();
        assert_eq!(cfg.succs(branch).len(), 2);
        assert!(!cfg.is_reachable(cfg.node_for_stmt(after).unwrap()));
        assert_eq!(cfg.preds(NodeId::EXIT).len(), 2);
    }

    #[test]
    fn test_while_loop_back_edge() {
        let mut b = ProgramBuilder::new();
        let main = b.declare_function("main", Type::Void);
        let x = b.local(main, "x", Type::Byte);
        let cond = b.boolean(true);
        let one = b.byte(1);
        let body = b.assign(x, one);
        let brk = b.break_stmt();
        let w = b.while_stmt(cond, vec![body, brk]);
        b.set_body(main, vec![w]);
        let (_, cfg) = build(b, "main");

        let header = cfg.node_for_stmt(w).unwrap();
        assert_eq!(cfg.loop_headers, vec![header]);
        let body_node = cfg.node_for_stmt(body).unwrap();
        assert!(cfg.succs(header).contains(&body_node));
        // The break leaves the loop and reaches EXIT
        let brk_node = cfg.node_for_stmt(brk).unwrap();
        assert_eq!(cfg.succs(brk_node), &[NodeId::EXIT]);
    }

    #[test]
    fn test_for_loop_shape() {
        let mut b = ProgramBuilder::new();
        let main = b.declare_function("main", Type::Void);
        let i = b.local(main, "i", Type::Byte);
        let start = b.byte(0);
        let end = b.byte(9);
        let cont = b.continue_stmt();
        let f = b.for_stmt(i, start, end, None, vec![cont]);
        b.set_body(main, vec![f]);
        let (_, cfg) = build(b, "main");

        let init = cfg.node_for_stmt(f).unwrap();
        assert_eq!(cfg.node(init).unwrap().role, NodeRole::LoopInit);
        let test = cfg.succs(init)[0];
        assert_eq!(cfg.node(test).unwrap().role, NodeRole::LoopTest);
        assert_eq!(cfg.loop_headers, vec![test]);

        // continue -> step -> test
        let cont_node = cfg.node_for_stmt(cont).unwrap();
        let step = cfg.succs(cont_node)[0];
        assert_eq!(cfg.node(step).unwrap().role, NodeRole::LoopStep);
        assert_eq!(cfg.succs(step), &[test]);
    }

    #[test]
    fn test_predecessor_successor_consistency() {
        let mut b = ProgramBuilder::new();
        let main = b.declare_function("main", Type::Void);
        let i = b.local(main, "i", Type::Byte);
        let cond = b.boolean(true);
        let inner_start = b.byte(0);
        let inner_end = b.byte(3);
        let inner = b.for_stmt(i, inner_start, inner_end, None, vec![]);
        let w = b.while_stmt(cond, vec![inner]);
        b.set_body(main, vec![w]);
        let (_, cfg) = build(b, "main");

        for node in &cfg.nodes {
            for succ in &node.successors {
                assert!(cfg.preds(*succ).contains(&node.id));
            }
            for pred in &node.predecessors {
                assert!(cfg.succs(*pred).contains(&node.id));
            }
        }
        assert_eq!(cfg.loop_headers.len(), 2);
    }

    #[test]
    fn test_reverse_postorder_starts_at_entry() {
        let mut b = ProgramBuilder::new();
        let main = b.declare_function("main", Type::Void);
        let x = b.local(main, "x", Type::Byte);
        let s = b.declare(x, None);
        b.set_body(main, vec![s]);
        let (_, cfg) = build(b, "main");

        let rpo = cfg.reverse_postorder();
        assert_eq!(rpo.first(), Some(&NodeId::ENTRY));
        assert_eq!(rpo.last(), Some(&NodeId::EXIT));
    }

    #[test]
    fn test_unknown_statement_is_an_error() {
        let mut b = ProgramBuilder::new();
        let main = b.declare_function("main", Type::Void);
        b.set_body(main, vec![StmtId(999)]);
        let (program, _) = b.finish();
        let function = program.function(main.id).unwrap();
        assert_eq!(
            CfgBuilder::build(&program, function).unwrap_err(),
            CfgError::UnknownStatement(StmtId(999))
        );
    }

    #[test]
    fn test_validate_accepts_built_graph() {
        let mut b = ProgramBuilder::new();
        let main = b.declare_function("main", Type::Void);
        let x = b.local(main, "x", Type::Byte);
        let rx = b.var(x);
        let body = b.assign(x, rx);
        let cond = b.boolean(true);
        let lp = b.while_stmt(cond, vec![body]);
        b.set_body(main, vec![lp]);
        let (_, cfg) = build(b, "main");
        assert_eq!(cfg.validate(), Ok(()));
    }

    #[test]
    fn test_validate_rejects_out_of_range_edge() {
        let mut cfg = ControlFlowGraph::new(FunctionId(0));
        cfg.add_edge(NodeId::ENTRY, NodeId::EXIT);
        cfg.nodes[NodeId::EXIT.index()].predecessors.push(NodeId(42));
        assert_eq!(
            cfg.validate(),
            Err(CfgError::DanglingEdge {
                from: NodeId(42),
                to: NodeId::EXIT,
                count: 2
            })
        );
        // Traversals skip the dangling id instead of indexing with it
        cfg.nodes[NodeId::ENTRY.index()].successors.push(NodeId(42));
        assert_eq!(cfg.postorder(), vec![NodeId::EXIT, NodeId::ENTRY]);
        cfg.compute_reachability();
        assert!(cfg.is_reachable(NodeId::EXIT));
    }

    #[test]
    fn test_validate_rejects_misnumbered_and_one_sided() {
        let mut cfg = ControlFlowGraph::new(FunctionId(0));
        cfg.nodes[NodeId::EXIT.index()].id = NodeId(7);
        assert_eq!(
            cfg.validate(),
            Err(CfgError::MisnumberedNode {
                position: 1,
                id: NodeId(7)
            })
        );

        let mut cfg = ControlFlowGraph::new(FunctionId(0));
        cfg.nodes[NodeId::ENTRY.index()].successors.push(NodeId::EXIT);
        assert_eq!(
            cfg.validate(),
            Err(CfgError::OneSidedEdge {
                from: NodeId::ENTRY,
                to: NodeId::EXIT
            })
        );

        let mut cfg = ControlFlowGraph::new(FunctionId(0));
        cfg.nodes.truncate(1);
        assert_eq!(cfg.validate(), Err(CfgError::MissingSentinel("exit")));
    }
}
