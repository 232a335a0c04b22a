//! Critical point records and their derived classifications.

use serde::{Deserialize, Serialize};

use crate::data::NodeHandle;
use crate::topology::order::NodeKey;
use crate::{FunctionType, GlobalIndex};

/// Persistence of a node that has not been cancelled.
pub const UNSET_PERSISTENCE: FunctionType = FunctionType::MAX;

/// Shape of a node in the arc graph, derived from its arc counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TreeType {
    /// No arcs at all.
    Root,
    /// Exactly one arc.
    Leaf,
    /// One arc up and one arc down.
    Interior,
    /// Anything else.
    Branch,
}

impl TreeType {
    pub fn classify(ups: usize, downs: usize) -> Self {
        match (ups, downs) {
            (0, 0) => TreeType::Root,
            (u, d) if u + d == 1 => TreeType::Leaf,
            (1, 1) => TreeType::Interior,
            _ => TreeType::Branch,
        }
    }
}

/// Morse classification, derived from arc counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MorseType {
    Isolated,
    Minimum,
    Maximum,
    SplitSaddle,
    MergeSaddle,
    Regular,
    MultiSaddle,
}

impl MorseType {
    pub fn classify(ups: usize, downs: usize) -> Self {
        match (ups, downs) {
            (0, 0) => MorseType::Isolated,
            (0, 1) => MorseType::Maximum,
            (1, 0) => MorseType::Minimum,
            (1, 1) => MorseType::Regular,
            (1, d) if d > 1 => MorseType::SplitSaddle,
            (u, 1) if u > 1 => MorseType::MergeSaddle,
            _ => MorseType::MultiSaddle,
        }
    }
}

/// A critical point of the [`CriticalPointGraph`](super::graph::CriticalPointGraph).
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub(crate) id: GlobalIndex,
    pub(crate) value: FunctionType,
    pub(crate) ups: Vec<NodeHandle>,
    pub(crate) downs: Vec<NodeHandle>,
    pub(crate) multiplicity: u32,
    pub(crate) active: bool,
    pub(crate) parent: Option<NodeHandle>,
    pub(crate) representative: Option<NodeHandle>,
    pub(crate) persistence: FunctionType,
    pub(crate) is_virtual: bool,
    pub(crate) hint: Option<MorseType>,
}

impl GraphNode {
    pub(crate) fn new(id: GlobalIndex, value: FunctionType) -> Self {
        Self {
            id,
            value,
            ups: Vec::new(),
            downs: Vec::new(),
            multiplicity: 1,
            active: true,
            parent: None,
            representative: None,
            persistence: UNSET_PERSISTENCE,
            is_virtual: false,
            hint: None,
        }
    }

    #[inline]
    pub fn id(&self) -> GlobalIndex {
        self.id
    }

    #[inline]
    pub fn value(&self) -> FunctionType {
        self.value
    }

    #[inline]
    pub fn key(&self) -> NodeKey {
        NodeKey::new(self.value, self.id)
    }

    /// Neighbors with a larger key.
    pub fn ups(&self) -> &[NodeHandle] {
        &self.ups
    }

    /// Neighbors with a smaller key.
    pub fn downs(&self) -> &[NodeHandle] {
        &self.downs
    }

    pub fn degree(&self) -> usize {
        self.ups.len() + self.downs.len()
    }

    pub fn tree_type(&self) -> TreeType {
        TreeType::classify(self.ups.len(), self.downs.len())
    }

    pub fn morse_type(&self) -> MorseType {
        MorseType::classify(self.ups.len(), self.downs.len())
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Surviving node this one was merged into when it was cancelled.
    pub fn parent(&self) -> Option<NodeHandle> {
        self.parent
    }

    /// Most extreme descendant, filled in by relevance metrics.
    pub fn representative(&self) -> Option<NodeHandle> {
        self.representative
    }

    pub fn persistence(&self) -> FunctionType {
        self.persistence
    }

    pub fn is_cancelled(&self) -> bool {
        self.persistence != UNSET_PERSISTENCE
    }

    /// Remaining finalize count.
    pub fn multiplicity(&self) -> u32 {
        self.multiplicity
    }

    /// Inserted by arc refinement rather than taken from the field.
    pub fn is_virtual(&self) -> bool {
        self.is_virtual
    }

    /// Type hint given at insertion, if any.
    pub fn hint(&self) -> Option<MorseType> {
        self.hint
    }

    pub(crate) fn remove_up(&mut self, h: NodeHandle) -> bool {
        remove_swap(&mut self.ups, h)
    }

    pub(crate) fn remove_down(&mut self, h: NodeHandle) -> bool {
        remove_swap(&mut self.downs, h)
    }
}

fn remove_swap(list: &mut Vec<NodeHandle>, h: NodeHandle) -> bool {
    match list.iter().position(|&x| x == h) {
        Some(i) => {
            list.swap_remove(i);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tree_type_from_counts() {
        assert_eq!(TreeType::classify(0, 0), TreeType::Root);
        assert_eq!(TreeType::classify(1, 0), TreeType::Leaf);
        assert_eq!(TreeType::classify(0, 1), TreeType::Leaf);
        assert_eq!(TreeType::classify(1, 1), TreeType::Interior);
        assert_eq!(TreeType::classify(2, 1), TreeType::Branch);
        assert_eq!(TreeType::classify(2, 0), TreeType::Branch);
    }

    #[test]
    fn morse_type_from_counts() {
        assert_eq!(MorseType::classify(0, 1), MorseType::Maximum);
        assert_eq!(MorseType::classify(1, 0), MorseType::Minimum);
        assert_eq!(MorseType::classify(2, 1), MorseType::MergeSaddle);
        assert_eq!(MorseType::classify(1, 3), MorseType::SplitSaddle);
        assert_eq!(MorseType::classify(2, 2), MorseType::MultiSaddle);
        assert_eq!(MorseType::classify(2, 0), MorseType::MultiSaddle);
    }
}
