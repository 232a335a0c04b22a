//! CriticalPointGraph: arc graph over critical points.
//!
//! Arcs are undirected but stored oriented: the endpoint with the larger
//! [`NodeKey`] lists the other under `downs`, the smaller one lists it under
//! `ups`. Node type is always derived from the current arc counts.

use std::ops::Index;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::data::{IndexedNodeStore, NodeHandle};
use crate::debug_invariants::DebugInvariants;
use crate::topo_error::TopoError;
use crate::topology::node::{GraphNode, MorseType, TreeType};
use crate::topology::order::NodeKey;
use crate::{FunctionType, GlobalIndex};

/// How arc lengths are measured by [`CriticalPointGraph::split_graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitType {
    /// `|f(u) - f(v)|`.
    Absolute,
    /// Absolute length relative to the value range.
    Relative,
    /// Difference of `ln(f - min + 1)`.
    Log,
    /// Log length relative to `ln(max - min + 1)`.
    RelativeLog,
}

/// Flat description of an active node, with compact indices into the list
/// of active nodes (ordered by id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: GlobalIndex,
    pub value: FunctionType,
    pub persistence: FunctionType,
    pub parent: Option<u32>,
    pub ups: Vec<u32>,
    pub downs: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct CriticalPointGraph {
    nodes: IndexedNodeStore<GraphNode>,
    min_value: FunctionType,
    max_value: FunctionType,
    max_index: Option<GlobalIndex>,
}

impl Default for CriticalPointGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl CriticalPointGraph {
    pub fn new() -> Self {
        Self::with_store(IndexedNodeStore::new())
    }

    /// Graph whose node store uses blocks of `1 << bits` slots.
    pub fn with_block_bits(bits: u8) -> Self {
        Self::with_store(IndexedNodeStore::with_block_bits(bits))
    }

    fn with_store(nodes: IndexedNodeStore<GraphNode>) -> Self {
        Self {
            nodes,
            min_value: FunctionType::INFINITY,
            max_value: FunctionType::NEG_INFINITY,
            max_index: None,
        }
    }

    /// Number of stored nodes, active or not.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.nodes.iter().filter(|(_, n)| n.active).count()
    }

    /// Smallest value inserted so far (`+inf` when empty).
    pub fn min_value(&self) -> FunctionType {
        self.min_value
    }

    /// Largest value inserted so far (`-inf` when empty).
    pub fn max_value(&self) -> FunctionType {
        self.max_value
    }

    pub fn max_index(&self) -> Option<GlobalIndex> {
        self.max_index
    }

    /// Insert a node, or return the existing one with the same id.
    pub fn add_node(&mut self, id: GlobalIndex, value: FunctionType) -> NodeHandle {
        let (h, inserted) = self
            .nodes
            .get_or_insert_with(id, || GraphNode::new(id, value));
        if inserted {
            self.min_value = self.min_value.min(value);
            self.max_value = self.max_value.max(value);
            self.max_index = Some(self.max_index.map_or(id, |m| m.max(id)));
        }
        h
    }

    /// [`add_node`](Self::add_node) that records a type hint on new nodes.
    pub fn add_node_hinted(
        &mut self,
        id: GlobalIndex,
        value: FunctionType,
        hint: MorseType,
    ) -> NodeHandle {
        let fresh = !self.nodes.contains(id);
        let h = self.add_node(id, value);
        if fresh {
            self.nodes[h].hint = Some(hint);
        }
        h
    }

    /// Insert a node with a fresh id above every id seen so far.
    pub fn insert_virtual_node(&mut self, value: FunctionType) -> NodeHandle {
        let id = self.max_index.map_or(0, |m| m + 1);
        let h = self.add_node(id, value);
        self.nodes[h].is_virtual = true;
        h
    }

    pub fn is_virtual_node(&self, id: GlobalIndex) -> bool {
        self.nodes.get(id).is_some_and(|n| n.is_virtual)
    }

    pub fn find(&self, id: GlobalIndex) -> Option<NodeHandle> {
        self.nodes.find(id)
    }

    pub fn get(&self, id: GlobalIndex) -> Option<&GraphNode> {
        self.nodes.get(id)
    }

    pub fn node(&self, h: NodeHandle) -> Result<&GraphNode, TopoError> {
        self.nodes.at(h)
    }

    pub(crate) fn node_mut(&mut self, h: NodeHandle) -> Result<&mut GraphNode, TopoError> {
        self.nodes.at_mut(h)
    }

    pub fn contains(&self, h: NodeHandle) -> bool {
        self.nodes.is_live(h)
    }

    pub fn key(&self, h: NodeHandle) -> Result<NodeKey, TopoError> {
        Ok(self.node(h)?.key())
    }

    pub fn tree_type(&self, h: NodeHandle) -> Result<TreeType, TopoError> {
        Ok(self.node(h)?.tree_type())
    }

    pub fn morse_type(&self, h: NodeHandle) -> Result<MorseType, TopoError> {
        Ok(self.node(h)?.morse_type())
    }

    /// All nodes in increasing id order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeHandle, &GraphNode)> {
        self.nodes.iter()
    }

    pub fn handles(&self) -> Vec<NodeHandle> {
        self.nodes.handles()
    }

    pub fn active_handles(&self) -> Vec<NodeHandle> {
        self.nodes
            .iter()
            .filter(|(_, n)| n.active)
            .map(|(h, _)| h)
            .collect()
    }

    /// `(lower, upper)` endpoints of the arc between `a` and `b`.
    fn orient(&self, a: NodeHandle, b: NodeHandle) -> Result<(NodeHandle, NodeHandle), TopoError> {
        if self.key(a)? < self.key(b)? {
            Ok((a, b))
        } else {
            Ok((b, a))
        }
    }

    pub fn has_arc(&self, a: NodeHandle, b: NodeHandle) -> bool {
        match self.orient(a, b) {
            Ok((lo, hi)) => self.nodes[lo].ups.contains(&hi),
            Err(_) => false,
        }
    }

    /// Connect `a` and `b`; the larger key becomes the upper endpoint.
    pub fn add_arc(&mut self, a: NodeHandle, b: NodeHandle) -> Result<(), TopoError> {
        if a == b {
            return Err(TopoError::SelfLoop(self.node(a)?.id));
        }
        let (lo, hi) = self.orient(a, b)?;
        if self.nodes[lo].ups.contains(&hi) {
            return Err(TopoError::DuplicateArc {
                lower: self.nodes[lo].id,
                upper: self.nodes[hi].id,
            });
        }
        self.nodes[lo].ups.push(hi);
        self.nodes[hi].downs.push(lo);
        Ok(())
    }

    pub fn add_arc_by_id(&mut self, a: GlobalIndex, b: GlobalIndex) -> Result<(), TopoError> {
        let ha = self.find(a).ok_or(TopoError::UnknownVertex(a))?;
        let hb = self.find(b).ok_or(TopoError::UnknownVertex(b))?;
        self.add_arc(ha, hb)
    }

    pub fn remove_arc(&mut self, a: NodeHandle, b: NodeHandle) -> Result<(), TopoError> {
        let (lo, hi) = self.orient(a, b)?;
        let removed_up = self.nodes[lo].remove_up(hi);
        let removed_down = self.nodes[hi].remove_down(lo);
        if removed_up && removed_down {
            Ok(())
        } else {
            Err(TopoError::MissingArc(self.nodes[lo].id, self.nodes[hi].id))
        }
    }

    /// Remove an isolated node; nodes with arcs are refused.
    pub fn remove_node(&mut self, h: NodeHandle) -> Result<GraphNode, TopoError> {
        let node = self.node(h)?;
        if node.degree() > 0 {
            return Err(TopoError::DanglingArcs(node.id));
        }
        let id = node.id;
        self.nodes.erase(id).ok_or(TopoError::UnknownVertex(id))
    }

    /// Replace an interior node by a direct arc between its two neighbors
    /// and drop it.
    pub fn bypass(&mut self, h: NodeHandle) -> Result<GraphNode, TopoError> {
        let node = self.node(h)?;
        if node.tree_type() != TreeType::Interior {
            return Err(TopoError::UnsupportedSaddle {
                id: node.id,
                degree: node.degree(),
            });
        }
        let (up, down) = (node.ups[0], node.downs[0]);
        self.remove_arc(h, up)?;
        self.remove_arc(h, down)?;
        self.add_arc(up, down)?;
        self.remove_node(h)
    }

    /// Remove a leaf and its arc; an interior neighbor left behind is
    /// bypassed as well. Returns `false` for non-leaves.
    pub fn remove_leaf_branch(&mut self, h: NodeHandle) -> Result<bool, TopoError> {
        let node = self.node(h)?;
        let saddle = match (node.ups.as_slice(), node.downs.as_slice()) {
            ([s], []) | ([], [s]) => *s,
            _ => {
                log::warn!("node {} is not a leaf and cannot be removed as leaf branch", node.id);
                return Ok(false);
            }
        };
        self.remove_arc(h, saddle)?;
        if self.tree_type(saddle)? == TreeType::Interior {
            self.bypass(saddle)?;
        }
        self.remove_node(h)?;
        Ok(true)
    }

    /// Decrement the finalize counter of `h`; returns `true` exactly when it
    /// reaches zero.
    pub fn finalize_node(&mut self, h: NodeHandle) -> Result<bool, TopoError> {
        let node = self.node_mut(h)?;
        if node.multiplicity == 0 {
            return Err(TopoError::NegativeMultiplicity(node.id));
        }
        node.multiplicity -= 1;
        Ok(node.multiplicity == 0)
    }

    pub fn set_multiplicity(&mut self, h: NodeHandle, multiplicity: u32) -> Result<(), TopoError> {
        self.node_mut(h)?.multiplicity = multiplicity;
        Ok(())
    }

    /// Walk parent links from `id` to the first active node.
    pub fn find_active_node(&self, id: GlobalIndex) -> Option<NodeHandle> {
        self.walk_parents(id, |n| n.active)
    }

    /// Walk parent links from `id` to the first active leaf.
    pub fn find_active_leaf(&self, id: GlobalIndex) -> Option<NodeHandle> {
        self.walk_parents(id, |n| n.active && n.tree_type() == TreeType::Leaf)
    }

    fn walk_parents(&self, id: GlobalIndex, stop: impl Fn(&GraphNode) -> bool) -> Option<NodeHandle> {
        let mut h = self.find(id)?;
        for _ in 0..=self.nodes.len() {
            let node = self.nodes.try_at(h)?;
            if stop(node) {
                return Some(h);
            }
            h = node.parent?;
        }
        log::warn!("parent chain from {id} does not terminate");
        None
    }

    /// Insert a node `(id, value)` on the single arc next to `h`: below it
    /// when the new key is smaller, above it otherwise.
    pub fn split_arc(
        &mut self,
        h: NodeHandle,
        id: GlobalIndex,
        value: FunctionType,
    ) -> Result<NodeHandle, TopoError> {
        let node = self.node(h)?;
        let below = node.key() > NodeKey::new(value, id);
        let side = if below { &node.downs } else { &node.ups };
        if side.len() > 1 {
            return Err(TopoError::MultiSaddleSplit(node.id));
        }
        let neighbor = side.first().copied();
        let split = self.add_node(id, value);
        if let Some(n) = neighbor {
            self.remove_arc(h, n)?;
            self.add_arc(split, n)?;
        }
        self.add_arc(split, h)?;
        Ok(split)
    }

    /// Subdivide arcs with virtual midpoint nodes until no arc is longer
    /// than `delta` under the chosen measure.
    pub fn split_graph(&mut self, delta: FunctionType, kind: SplitType) -> Result<usize, TopoError> {
        let range = self.max_value - self.min_value;
        let (delta, kind) = match kind {
            SplitType::Relative => (delta * range, SplitType::Absolute),
            SplitType::RelativeLog => (delta * (range + 1.0).ln(), SplitType::Log),
            k => (delta, k),
        };
        if !(delta > 0.0) {
            return Err(TopoError::InvalidConfig(format!("split delta {delta} must be positive")));
        }
        let mut work: Vec<(NodeHandle, NodeHandle)> = Vec::new();
        for (h, n) in self.nodes.iter() {
            work.extend(n.downs.iter().map(|&d| (h, d)));
        }
        let mut inserted = 0;
        while let Some((up, down)) = work.pop() {
            let (fu, fd) = (self.nodes[up].value, self.nodes[down].value);
            if self.split_length(fu, fd, kind) <= delta {
                continue;
            }
            let mid = self.insert_virtual_node(0.5 * (fu + fd));
            self.remove_arc(up, down)?;
            self.add_arc(up, mid)?;
            self.add_arc(mid, down)?;
            work.push((up, mid));
            work.push((mid, down));
            inserted += 1;
        }
        Ok(inserted)
    }

    fn split_length(&self, up: FunctionType, down: FunctionType, kind: SplitType) -> FunctionType {
        let lg = |f: FunctionType| (f - self.min_value + 1.0).ln();
        match kind {
            SplitType::Absolute => (up - down).abs(),
            SplitType::Relative => (up - down).abs() / (self.max_value - self.min_value),
            SplitType::Log if (up - down).abs() < 1e-5 => 0.0,
            SplitType::Log => (lg(up) - lg(down)).abs(),
            SplitType::RelativeLog => {
                (lg(up) - lg(down)).abs() / (self.max_value - self.min_value + 1.0).ln()
            }
        }
    }

    /// Compact index of every active node, in id order.
    pub fn active_index_map(&self) -> hashbrown::HashMap<NodeHandle, u32> {
        self.nodes
            .iter()
            .filter(|(_, n)| n.active)
            .enumerate()
            .map(|(i, (h, _))| (h, i as u32))
            .collect()
    }

    /// Flat export of the active nodes.
    pub fn active_records(&self) -> Vec<NodeRecord> {
        let map = self.active_index_map();
        let compact = |list: &[NodeHandle]| -> Vec<u32> {
            list.iter().filter_map(|h| map.get(h).copied()).collect()
        };
        self.nodes
            .iter()
            .filter(|(_, n)| n.active)
            .map(|(_, n)| NodeRecord {
                id: n.id,
                value: n.value,
                persistence: n.persistence,
                parent: n.parent.and_then(|p| map.get(&p).copied()),
                ups: compact(&n.ups),
                downs: compact(&n.downs),
            })
            .collect()
    }

    /// Arcs between active nodes as sorted `(lower id, upper id)` pairs.
    pub fn active_arcs(&self) -> Vec<(GlobalIndex, GlobalIndex)> {
        self.nodes
            .iter()
            .filter(|(_, n)| n.active)
            .flat_map(|(_, n)| {
                n.ups
                    .iter()
                    .filter(|&&u| self.nodes[u].active)
                    .map(move |&u| (n.id, self.nodes[u].id))
            })
            .sorted_unstable()
            .collect()
    }

    /// Ids of active nodes of the given Morse type.
    pub fn ids_of_type(&self, kind: MorseType) -> Vec<GlobalIndex> {
        self.nodes
            .iter()
            .filter(|(_, n)| n.active && n.morse_type() == kind)
            .map(|(_, n)| n.id)
            .collect()
    }
}

impl Index<NodeHandle> for CriticalPointGraph {
    type Output = GraphNode;

    fn index(&self, h: NodeHandle) -> &GraphNode {
        &self.nodes[h]
    }
}

impl DebugInvariants for CriticalPointGraph {
    fn validate_invariants(&self) -> Result<(), TopoError> {
        self.nodes.validate_invariants()?;
        for (h, n) in self.nodes.iter() {
            for (i, &u) in n.ups.iter().enumerate() {
                let up = self.node(u)?;
                if u == h {
                    return Err(TopoError::SelfLoop(n.id));
                }
                if up.key() <= n.key() || !up.downs.contains(&h) {
                    return Err(TopoError::MissingArc(n.id, up.id));
                }
                if n.ups[..i].contains(&u) {
                    return Err(TopoError::DuplicateArc {
                        lower: n.id,
                        upper: up.id,
                    });
                }
            }
            for &d in &n.downs {
                let down = self.node(d)?;
                if down.key() >= n.key() || !down.ups.contains(&h) {
                    return Err(TopoError::MissingArc(down.id, n.id));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(values: &[FunctionType]) -> (CriticalPointGraph, Vec<NodeHandle>) {
        let mut g = CriticalPointGraph::new();
        let hs: Vec<_> = values
            .iter()
            .enumerate()
            .map(|(i, &v)| g.add_node(i as GlobalIndex, v))
            .collect();
        for w in hs.windows(2) {
            g.add_arc(w[0], w[1]).unwrap();
        }
        (g, hs)
    }

    #[test]
    fn hinted_node_keeps_first_hint() {
        let mut g = CriticalPointGraph::new();
        let h = g.add_node_hinted(4, 5.0, MorseType::Minimum);
        assert_eq!(g[h].hint(), Some(MorseType::Minimum));
        assert_eq!(g.morse_type(h).unwrap(), MorseType::Isolated);

        // re-adding is idempotent and keeps the original value and hint
        assert_eq!(g.add_node_hinted(4, 9.0, MorseType::Maximum), h);
        assert_eq!(g.add_node(4, 9.0), h);
        assert_eq!(g.len(), 1);
        assert_eq!(g[h].value(), 5.0);
        assert_eq!(g[h].hint(), Some(MorseType::Minimum));
        assert_eq!(g.max_value(), 5.0);

        // arcs decide the type, not the hint
        let low = g.add_node(2, 1.0);
        g.add_arc(h, low).unwrap();
        assert_eq!(g.tree_type(h).unwrap(), TreeType::Leaf);
        assert_eq!(g.morse_type(h).unwrap(), MorseType::Maximum);
        assert_eq!(g[low].hint(), None);
    }

    #[test]
    fn add_arc_orders_by_key() {
        let (g, hs) = chain(&[1.0, 5.0]);
        assert_eq!(g[hs[0]].ups(), &[hs[1]]);
        assert_eq!(g[hs[1]].downs(), &[hs[0]]);
        assert_eq!(g.tree_type(hs[0]).unwrap(), TreeType::Leaf);
        assert_eq!(g.morse_type(hs[0]).unwrap(), MorseType::Minimum);
        assert_eq!(g.morse_type(hs[1]).unwrap(), MorseType::Maximum);
    }

    #[test]
    fn equal_values_use_id() {
        let mut g = CriticalPointGraph::new();
        let a = g.add_node(10, 2.0);
        let b = g.add_node(3, 2.0);
        g.add_arc(a, b).unwrap();
        assert_eq!(g[b].ups(), &[a]);
    }

    #[test]
    fn arc_errors() {
        let (mut g, hs) = chain(&[1.0, 2.0, 3.0]);
        assert_eq!(g.add_arc(hs[0], hs[0]), Err(TopoError::SelfLoop(0)));
        assert_eq!(
            g.add_arc(hs[1], hs[0]),
            Err(TopoError::DuplicateArc { lower: 0, upper: 1 })
        );
        assert_eq!(g.remove_arc(hs[0], hs[2]), Err(TopoError::MissingArc(0, 2)));
        assert_eq!(g.remove_node(hs[1]).unwrap_err(), TopoError::DanglingArcs(1));
    }

    #[test]
    fn add_node_is_idempotent_and_tracks_range() {
        let mut g = CriticalPointGraph::new();
        let a = g.add_node(4, 3.0);
        let b = g.add_node(4, 9.0);
        assert_eq!(a, b);
        assert_eq!(g[a].value(), 3.0);
        g.add_node(1, -2.0);
        assert_eq!((g.min_value(), g.max_value()), (-2.0, 3.0));
        assert_eq!(g.max_index(), Some(4));
    }

    #[test]
    fn split_arc_below_and_above() {
        let (mut g, hs) = chain(&[0.0, 10.0]);
        let mid = g.split_arc(hs[1], 7, 5.0).unwrap();
        assert_eq!(g.active_arcs(), vec![(0, 7), (7, 1)]);
        let top = g.split_arc(hs[1], 8, 20.0).unwrap();
        assert_eq!(g[top].downs(), &[hs[1]]);
        assert_eq!(g.tree_type(mid).unwrap(), TreeType::Interior);
        g.validate_invariants().unwrap();
    }

    #[test]
    fn split_arc_refuses_multi_saddle() {
        let mut g = CriticalPointGraph::new();
        let s = g.add_node(0, 5.0);
        let a = g.add_node(1, 1.0);
        let b = g.add_node(2, 2.0);
        g.add_arc(s, a).unwrap();
        g.add_arc(s, b).unwrap();
        assert_eq!(g.split_arc(s, 3, 3.0), Err(TopoError::MultiSaddleSplit(0)));
    }

    #[test]
    fn split_graph_bounds_arc_length() {
        let (mut g, _) = chain(&[0.0, 10.0]);
        let added = g.split_graph(3.0, SplitType::Absolute).unwrap();
        assert_eq!(added, 3);
        for (lo, hi) in g.active_arcs() {
            let d = g.get(hi).unwrap().value() - g.get(lo).unwrap().value();
            assert!(d <= 3.0);
        }
        assert!(g.is_virtual_node(2));
        assert!(!g.is_virtual_node(0));
        g.validate_invariants().unwrap();
    }

    #[test]
    fn bypass_and_leaf_branch() {
        let (mut g, hs) = chain(&[0.0, 1.0, 2.0]);
        g.bypass(hs[1]).unwrap();
        assert_eq!(g.active_arcs(), vec![(0, 2)]);

        let mut g = CriticalPointGraph::new();
        let hs: Vec<_> = (0..4).map(|i| g.add_node(i, i as FunctionType)).collect();
        for (a, b) in [(0, 1), (1, 2), (1, 3)] {
            g.add_arc(hs[a], hs[b]).unwrap();
        }
        assert!(!g.remove_leaf_branch(hs[1]).unwrap());
        assert!(g.remove_leaf_branch(hs[3]).unwrap());
        assert_eq!(g.active_arcs(), vec![(0, 2)]);
        assert!(g.get(1).is_none());
    }

    #[test]
    fn finalize_reaches_zero_once() {
        let mut g = CriticalPointGraph::new();
        let h = g.add_node(0, 0.0);
        g.set_multiplicity(h, 3).unwrap();
        assert!(!g.finalize_node(h).unwrap());
        assert!(!g.finalize_node(h).unwrap());
        assert!(g.finalize_node(h).unwrap());
        assert_eq!(g.finalize_node(h), Err(TopoError::NegativeMultiplicity(0)));
    }

    #[test]
    fn records_use_compact_indices() {
        let (mut g, hs) = chain(&[0.0, 1.0, 2.0]);
        g.node_mut(hs[0]).unwrap().active = false;
        let recs = g.active_records();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].id, 1);
        assert_eq!(recs[0].ups, vec![1]);
        assert!(recs[0].downs.is_empty());
    }
}
