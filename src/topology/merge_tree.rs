//! Boundary merge tree used by the streaming builder.
//!
//! Every node has at most one child (`down`, the next node in sweep order
//! on its branch) and any number of parents (`ups`). A branch is the chain
//! reached by following `down` links; each branch is sorted by the tree
//! order, which is what lets [`MergeTree::integrate_edge`] merge two
//! branches by splicing instead of rebuilding.
//!
//! Multiplicity is the number of leaf patches that still have to finalize a
//! vertex. A node whose count has reached zero is finalized: it can no
//! longer gain edges from its inputs and is removed as soon as it becomes
//! regular (one parent, one child).

use std::ops::Index;

use crate::algs::stream::TokenSink;
use crate::algs::wire::{EdgeToken, FinalToken, Token, VertexToken};
use crate::data::{IndexedNodeStore, NodeHandle};
use crate::debug_invariants::DebugInvariants;
use crate::topo_error::TopoError;
use crate::topology::order::{NodeKey, ValueOrder};
use crate::{FunctionType, GlobalIndex, GraphId};

/// Finalization state of a tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Some inputs may still reference the vertex.
    Open,
    /// Every input has finalized the vertex.
    Finalized,
}

#[derive(Debug, Clone)]
pub struct TreeNode {
    id: GlobalIndex,
    value: FunctionType,
    declared: u32,
    remaining: u32,
    down: Option<NodeHandle>,
    ups: Vec<NodeHandle>,
}

impl TreeNode {
    fn new(id: GlobalIndex, value: FunctionType, multiplicity: u32) -> Self {
        Self {
            id,
            value,
            declared: multiplicity,
            remaining: multiplicity,
            down: None,
            ups: Vec::new(),
        }
    }

    pub fn id(&self) -> GlobalIndex {
        self.id
    }

    pub fn value(&self) -> FunctionType {
        self.value
    }

    pub fn key(&self) -> NodeKey {
        NodeKey::new(self.value, self.id)
    }

    /// Total number of patches sharing the vertex.
    pub fn declared_multiplicity(&self) -> u32 {
        self.declared
    }

    /// Finalizations still outstanding.
    pub fn remaining_multiplicity(&self) -> u32 {
        self.remaining
    }

    pub fn state(&self) -> NodeState {
        if self.remaining == 0 {
            NodeState::Finalized
        } else {
            NodeState::Open
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.state() == NodeState::Finalized
    }

    pub fn down(&self) -> Option<NodeHandle> {
        self.down
    }

    pub fn ups(&self) -> &[NodeHandle] {
        &self.ups
    }

    /// One parent and one child.
    pub fn is_regular(&self) -> bool {
        self.down.is_some() && self.ups.len() == 1
    }

    /// FINAL tokens owed downstream: one per finalization seen here.
    fn finals_seen(&self) -> u32 {
        self.declared.saturating_sub(self.remaining)
    }
}

/// A (partial) merge or split tree owned by one stage of the pipeline.
#[derive(Debug, Clone)]
pub struct MergeTree {
    graph_id: GraphId,
    order: ValueOrder,
    nodes: IndexedNodeStore<TreeNode>,
}

impl MergeTree {
    pub fn new(graph_id: GraphId, order: ValueOrder) -> Self {
        Self {
            graph_id,
            order,
            nodes: IndexedNodeStore::new(),
        }
    }

    pub fn with_block_bits(graph_id: GraphId, order: ValueOrder, bits: u8) -> Self {
        Self {
            graph_id,
            order,
            nodes: IndexedNodeStore::with_block_bits(bits),
        }
    }

    pub fn graph_id(&self) -> GraphId {
        self.graph_id
    }

    pub fn order(&self) -> ValueOrder {
        self.order
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: GlobalIndex) -> bool {
        self.nodes.contains(id)
    }

    pub fn find(&self, id: GlobalIndex) -> Option<NodeHandle> {
        self.nodes.find(id)
    }

    pub fn get(&self, id: GlobalIndex) -> Option<&TreeNode> {
        self.nodes.get(id)
    }

    pub fn node(&self, h: NodeHandle) -> Result<&TreeNode, TopoError> {
        self.nodes.at(h)
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeHandle, &TreeNode)> {
        self.nodes.iter()
    }

    /// `a` comes before `b` in this tree's sweep.
    #[inline]
    pub fn greater(&self, a: NodeHandle, b: NodeHandle) -> bool {
        self.order.greater(self.nodes[a].key(), self.nodes[b].key())
    }

    /// Insert a new vertex; inserting an existing id is an error.
    pub fn add_node(
        &mut self,
        id: GlobalIndex,
        value: FunctionType,
        multiplicity: u32,
    ) -> Result<NodeHandle, TopoError> {
        self.nodes
            .insert(id, TreeNode::new(id, value, multiplicity))
            .ok_or(TopoError::DuplicateVertex(id))
    }

    /// Insert a vertex unless it is already present.
    pub fn ensure_node(&mut self, id: GlobalIndex, value: FunctionType, multiplicity: u32) -> NodeHandle {
        self.nodes
            .get_or_insert_with(id, || TreeNode::new(id, value, multiplicity))
            .0
    }

    pub fn child(&self, h: NodeHandle) -> Option<NodeHandle> {
        self.nodes[h].down
    }

    /// Re-link `v` below `d`, keeping the parent lists consistent.
    pub fn set_child(&mut self, v: NodeHandle, d: Option<NodeHandle>) {
        if let Some(old) = self.nodes[v].down.take() {
            let ups = &mut self.nodes[old].ups;
            if let Some(i) = ups.iter().position(|&x| x == v) {
                ups.remove(i);
            }
        }
        self.nodes[v].down = d;
        if let Some(d) = d {
            self.nodes[d].ups.push(v);
        }
    }

    pub fn is_regular(&self, h: NodeHandle) -> bool {
        self.nodes[h].is_regular()
    }

    pub fn is_finalized(&self, id: GlobalIndex) -> bool {
        self.get(id).is_some_and(TreeNode::is_finalized)
    }

    /// Count one finalization of `h`; returns `true` when it was the last.
    pub fn finalize(&mut self, h: NodeHandle) -> Result<bool, TopoError> {
        let node = self.nodes.at_mut(h)?;
        if node.remaining == 0 {
            return Err(TopoError::NegativeMultiplicity(node.id));
        }
        node.remaining -= 1;
        Ok(node.remaining == 0)
    }

    /// Link the single parent of a regular node directly to its child and
    /// drop the node.
    pub fn bypass(&mut self, h: NodeHandle) -> Result<(), TopoError> {
        let node = self.nodes.at(h)?;
        let (Some(down), [up]) = (node.down, node.ups.as_slice()) else {
            return Err(TopoError::UnsupportedSaddle {
                id: node.id,
                degree: node.ups.len() + usize::from(node.down.is_some()),
            });
        };
        let up = *up;
        self.set_child(up, Some(down));
        self.set_child(h, None);
        self.nodes.erase_handle(h);
        Ok(())
    }

    /// Nodes without a child, in id order.
    pub fn roots(&self) -> Vec<NodeHandle> {
        self.nodes
            .iter()
            .filter(|(_, n)| n.down.is_none())
            .map(|(h, _)| h)
            .collect()
    }

    /// `(upper id, lower id)` of every tree edge, sorted.
    pub fn edges(&self) -> Vec<(GlobalIndex, GlobalIndex)> {
        let mut out: Vec<_> = self
            .nodes
            .iter()
            .filter_map(|(_, n)| n.down.map(|d| (n.id, self.nodes[d].id)))
            .collect();
        out.sort_unstable();
        out
    }

    /// Lowest node on the branch of `high` that is still above `low`.
    pub fn find_integration_vertex(&self, mut high: NodeHandle, low: NodeHandle) -> NodeHandle {
        let low_key = self.nodes[low].key();
        while let Some(c) = self.nodes[high].down {
            if self.order.greater(low_key, self.nodes[c].key()) {
                break;
            }
            high = c;
        }
        high
    }

    /// Hang the branch starting at `head` below `tail`, which must not have
    /// a child yet. Returns `tail` if it is finalized and changed type.
    pub fn attach_branch(
        &mut self,
        tail: NodeHandle,
        head: NodeHandle,
    ) -> Result<Option<NodeHandle>, TopoError> {
        if let Some(c) = self.nodes[tail].down {
            return Err(TopoError::BranchOccupied {
                tail: self.nodes[tail].id,
                child: self.nodes[c].id,
            });
        }
        self.set_child(tail, Some(head));
        Ok(self.nodes[tail].is_finalized().then_some(tail))
    }

    /// Zip the branches below `left` and starting at `right` into one
    /// sorted branch. `left` must be greater than `right`.
    ///
    /// At most one node changes its classification during a merge; it is
    /// returned when it is finalized so the caller can re-examine it.
    pub fn merge_branches(
        &mut self,
        mut left: NodeHandle,
        mut right: NodeHandle,
    ) -> Result<Option<NodeHandle>, TopoError> {
        debug_assert!(self.greater(left, right));
        while left != right {
            let Some(next_left) = self.nodes[left].down else {
                break;
            };
            let next_right = self.nodes[right].down;
            self.set_child(left, Some(right));
            self.set_child(right, Some(next_left));
            match next_right {
                // right gained a child
                None => return Ok(self.nodes[right].is_finalized().then_some(right)),
                Some(nr) => {
                    left = self.find_integration_vertex(right, nr);
                    right = nr;
                }
            }
        }
        if left != right {
            self.set_child(left, Some(right));
        }
        // either left gained a child or the branches met at left, which
        // lost a parent
        Ok(self.nodes[left].is_finalized().then_some(left))
    }

    /// Merge the edge `(a, b)` into the tree. Re-adding an edge already
    /// implied by the tree is a no-op. Returns a finalized node whose
    /// classification changed, if any.
    pub fn integrate_edge(
        &mut self,
        a: NodeHandle,
        b: NodeHandle,
    ) -> Result<Option<NodeHandle>, TopoError> {
        if a == b {
            return Err(TopoError::SelfLoop(self.node(a)?.id));
        }
        let (high, low) = if self.greater(a, b) { (a, b) } else { (b, a) };
        let head = self.find_integration_vertex(high, low);
        if head == low {
            return Ok(None);
        }
        if self.nodes[head].down.is_none() {
            self.attach_branch(head, low)
        } else {
            self.merge_branches(head, low)
        }
    }

    /// Write every subtree as tokens: VERTEX before the first edge of a
    /// vertex, FINAL after its last one, children before parents.
    pub fn emit(&self, sink: &mut dyn TokenSink) -> Result<(), TopoError> {
        for root in self.roots() {
            self.emit_subtree(root, sink)?;
        }
        Ok(())
    }

    fn emit_subtree(&self, root: NodeHandle, sink: &mut dyn TokenSink) -> Result<(), TopoError> {
        enum Visit {
            Enter(NodeHandle),
            Link {
                up: NodeHandle,
                down: NodeHandle,
                first: bool,
            },
        }

        let mut stack = vec![Visit::Enter(root)];
        while let Some(visit) = stack.pop() {
            match visit {
                Visit::Enter(n) => {
                    let ups = &self.nodes[n].ups;
                    if ups.is_empty() {
                        sink.write(&self.vertex_token(n))?;
                    }
                    for (i, &up) in ups.iter().enumerate().rev() {
                        stack.push(Visit::Link {
                            up,
                            down: n,
                            first: i == 0,
                        });
                        stack.push(Visit::Enter(up));
                    }
                }
                Visit::Link { up, down, first } => {
                    if first {
                        sink.write(&self.vertex_token(down))?;
                    }
                    sink.write(&Token::Edge(EdgeToken {
                        source: self.nodes[up].id,
                        destination: self.nodes[down].id,
                    }))?;
                    self.write_finals(up, sink)?;
                }
            }
        }
        self.write_finals(root, sink)
    }

    fn vertex_token(&self, h: NodeHandle) -> Token {
        let n = &self.nodes[h];
        Token::Vertex(VertexToken {
            id: n.id,
            value: n.value,
            multiplicity: n.declared,
        })
    }

    fn write_finals(&self, h: NodeHandle, sink: &mut dyn TokenSink) -> Result<(), TopoError> {
        let n = &self.nodes[h];
        for _ in 0..n.finals_seen() {
            sink.write(&Token::Final(FinalToken { id: n.id }))?;
        }
        Ok(())
    }
}

impl Index<NodeHandle> for MergeTree {
    type Output = TreeNode;

    fn index(&self, h: NodeHandle) -> &TreeNode {
        &self.nodes[h]
    }
}

impl DebugInvariants for MergeTree {
    fn validate_invariants(&self) -> Result<(), TopoError> {
        self.nodes.validate_invariants()?;
        for (h, n) in self.nodes.iter() {
            if let Some(d) = n.down {
                let child = self.nodes.at(d)?;
                if !child.ups.contains(&h) || !self.order.greater(n.key(), child.key()) {
                    return Err(TopoError::MissingArc(n.id, child.id));
                }
            }
            for &u in &n.ups {
                let parent = self.nodes.at(u)?;
                if parent.down != Some(h) {
                    return Err(TopoError::MissingArc(parent.id, n.id));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Tree over `(id, value)` pairs, all with multiplicity 1.
    fn tree(nodes: &[(GlobalIndex, FunctionType)]) -> MergeTree {
        let mut t = MergeTree::new(0, ValueOrder::MERGE);
        for &(id, v) in nodes {
            t.add_node(id, v, 1).unwrap();
        }
        t
    }

    fn link(t: &mut MergeTree, hi: GlobalIndex, lo: GlobalIndex) -> Option<GlobalIndex> {
        let a = t.find(hi).unwrap();
        let b = t.find(lo).unwrap();
        t.integrate_edge(a, b).unwrap().map(|h| t[h].id())
    }

    #[test]
    fn attach_then_repeat_is_noop() {
        let mut t = tree(&[(1, 5.0), (2, 3.0)]);
        link(&mut t, 1, 2);
        let before = t.edges();
        link(&mut t, 1, 2);
        link(&mut t, 2, 1);
        assert_eq!(t.edges(), before);
        assert_eq!(before, vec![(1, 2)]);
    }

    #[test]
    fn merge_interleaves_sorted_branches() {
        // branch 10 > 8 > 6 and branch 9 > 7 > 5
        let mut t = tree(&[(10, 10.0), (8, 8.0), (6, 6.0), (9, 9.0), (7, 7.0), (5, 5.0)]);
        link(&mut t, 10, 8);
        link(&mut t, 8, 6);
        link(&mut t, 9, 7);
        link(&mut t, 7, 5);
        link(&mut t, 10, 9);
        assert_eq!(
            t.edges(),
            vec![(6, 5), (7, 6), (8, 7), (9, 8), (10, 9)]
        );
        t.validate_invariants().unwrap();
    }

    #[test]
    fn edge_into_middle_of_branch() {
        let mut t = tree(&[(1, 9.0), (2, 5.0), (3, 1.0), (4, 7.0)]);
        link(&mut t, 1, 2);
        link(&mut t, 2, 3);
        // 4 joins the branch at 2
        link(&mut t, 4, 2);
        assert_eq!(t.edges(), vec![(1, 2), (2, 3), (4, 2)]);
        assert_eq!(t[t.find(2).unwrap()].ups().len(), 2);
    }

    #[test]
    fn attach_to_occupied_slot_fails() {
        let mut t = tree(&[(1, 9.0), (2, 5.0), (3, 1.0)]);
        link(&mut t, 1, 2);
        let (a, c) = (t.find(1).unwrap(), t.find(3).unwrap());
        assert_eq!(
            t.attach_branch(a, c),
            Err(TopoError::BranchOccupied { tail: 1, child: 2 })
        );
    }

    #[test]
    fn bypass_requires_regular() {
        let mut t = tree(&[(1, 9.0), (2, 5.0), (3, 1.0)]);
        link(&mut t, 1, 2);
        link(&mut t, 2, 3);
        let h = t.find(2).unwrap();
        assert!(t.is_regular(h));
        t.bypass(h).unwrap();
        assert_eq!(t.edges(), vec![(1, 3)]);
        let top = t.find(1).unwrap();
        assert!(t.bypass(top).is_err());
    }

    #[test]
    fn finalize_counts_down_once() {
        let mut t = MergeTree::new(0, ValueOrder::MERGE);
        let h = t.add_node(1, 0.0, 2).unwrap();
        assert!(!t.finalize(h).unwrap());
        assert!(t.finalize(h).unwrap());
        assert_eq!(t.finalize(h), Err(TopoError::NegativeMultiplicity(1)));
        assert_eq!(t.add_node(1, 0.0, 1), Err(TopoError::DuplicateVertex(1)));
    }

    #[test]
    fn split_order_flips_branches() {
        let mut t = MergeTree::new(0, ValueOrder::SPLIT);
        for (id, v) in [(1, 1.0), (2, 4.0), (3, 2.0)] {
            t.add_node(id, v, 1).unwrap();
        }
        link(&mut t, 1, 2);
        link(&mut t, 3, 2);
        assert_eq!(t.edges(), vec![(1, 2), (3, 2)]);
        // 1 < 2 < 4: the two branches zip into one
        link(&mut t, 1, 3);
        assert_eq!(t.edges(), vec![(1, 3), (3, 2)]);
        t.validate_invariants().unwrap();
    }
}
