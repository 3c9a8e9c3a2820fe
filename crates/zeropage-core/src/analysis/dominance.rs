//! Dominator relation of a function's CFG.
//!
//! Loop detection is the only consumer: an edge `n -> h` closes a loop when
//! `h` dominates `n`. Immediate dominators are stored in a table indexed by
//! [`NodeId::index`], refined over the graph's postorder numbering until
//! nothing moves.

use crate::cfg::{ControlFlowGraph, NodeId};

#[derive(Debug, Clone, Default)]
pub struct Dominators {
    /// Immediate dominator by node index. `None` for ENTRY and for nodes
    /// ENTRY cannot reach.
    idom: Vec<Option<NodeId>>,
    /// Postorder number by node index, `None` when unreachable.
    post_number: Vec<Option<usize>>,
}

impl Dominators {
    pub fn compute(cfg: &ControlFlowGraph) -> Self {
        let postorder = cfg.postorder();
        let count = cfg.node_count();
        let mut post_number = vec![None; count];
        for (number, node) in postorder.iter().enumerate() {
            if let Some(slot) = post_number.get_mut(node.index()) {
                *slot = Some(number);
            }
        }

        // While solving, ENTRY points at itself so it counts as processed.
        let mut idom: Vec<Option<NodeId>> = vec![None; count];
        match idom.get_mut(NodeId::ENTRY.index()) {
            Some(slot) => *slot = Some(NodeId::ENTRY),
            None => return Dominators::default(),
        }

        let mut changed = true;
        while changed {
            changed = false;
            for &node in postorder.iter().rev() {
                if node == NodeId::ENTRY {
                    continue;
                }
                let candidate = cfg
                    .preds(node)
                    .iter()
                    .copied()
                    .filter(|pred| idom.get(pred.index()).copied().flatten().is_some())
                    .reduce(|a, b| nearest_common(&idom, &post_number, a, b));
                let Some(candidate) = candidate else {
                    continue;
                };
                if let Some(slot) = idom.get_mut(node.index()) {
                    if *slot != Some(candidate) {
                        *slot = Some(candidate);
                        changed = true;
                    }
                }
            }
        }

        if let Some(slot) = idom.get_mut(NodeId::ENTRY.index()) {
            *slot = None;
        }
        Dominators { idom, post_number }
    }

    pub fn is_reachable(&self, node: NodeId) -> bool {
        self.post_number.get(node.index()).copied().flatten().is_some()
    }

    pub fn immediate_dominator(&self, node: NodeId) -> Option<NodeId> {
        self.idom.get(node.index()).copied().flatten()
    }

    /// Strict dominators of `node`, nearest first, ending at ENTRY.
    pub fn strict_dominators(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.immediate_dominator(node), move |up| self.immediate_dominator(*up))
    }

    /// Every ENTRY-to-`b` path crosses `a`. Reflexive on reachable nodes.
    pub fn dominates(&self, a: NodeId, b: NodeId) -> bool {
        if !self.is_reachable(a) || !self.is_reachable(b) {
            return false;
        }
        a == b || self.strict_dominators(b).any(|up| up == a)
    }
}

/// Climb from whichever node sits lower in postorder until both meet.
fn nearest_common(idom: &[Option<NodeId>], post_number: &[Option<usize>], mut a: NodeId, mut b: NodeId) -> NodeId {
    let rank = |node: NodeId| post_number.get(node.index()).copied().flatten().unwrap_or(usize::MAX);
    let parent = |node: NodeId| idom.get(node.index()).copied().flatten();
    while a != b {
        if rank(a) < rank(b) {
            match parent(a) {
                Some(up) => a = up,
                None => return b,
            }
        } else {
            match parent(b) {
                Some(up) => b = up,
                None => return a,
            }
        }
    }
    a
}
