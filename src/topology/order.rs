//! Total order on `(value, id)` pairs shared by every tree algorithm.
//!
//! Values compare with [`f32::total_cmp`]; exact ties are broken by the
//! global id, the larger id being the greater key. Split trees use the same
//! order reversed.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::{FunctionType, GlobalIndex};

/// Ordering key of a vertex.
#[derive(Debug, Clone, Copy)]
pub struct NodeKey {
    pub value: FunctionType,
    pub id: GlobalIndex,
}

impl NodeKey {
    #[inline]
    pub fn new(value: FunctionType, id: GlobalIndex) -> Self {
        Self { value, id }
    }
}

impl PartialEq for NodeKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for NodeKey {}

impl PartialOrd for NodeKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NodeKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value
            .total_cmp(&other.value)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Which sweep direction a tree follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeOrientation {
    /// Superlevel sets, sweeping from the top; maxima are leaves.
    #[default]
    Merge,
    /// Sublevel sets, sweeping from the bottom; minima are leaves.
    Split,
}

/// Comparator used by trees of either orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ValueOrder {
    orientation: TreeOrientation,
}

impl ValueOrder {
    pub const MERGE: ValueOrder = ValueOrder {
        orientation: TreeOrientation::Merge,
    };
    pub const SPLIT: ValueOrder = ValueOrder {
        orientation: TreeOrientation::Split,
    };

    pub fn new(orientation: TreeOrientation) -> Self {
        Self { orientation }
    }

    #[inline]
    pub fn orientation(self) -> TreeOrientation {
        self.orientation
    }

    #[inline]
    pub fn is_inverted(self) -> bool {
        self.orientation == TreeOrientation::Split
    }

    #[inline]
    pub fn compare(self, a: NodeKey, b: NodeKey) -> Ordering {
        let o = a.cmp(&b);
        if self.is_inverted() { o.reverse() } else { o }
    }

    /// `a` is processed before `b` in this sweep.
    #[inline]
    pub fn greater(self, a: NodeKey, b: NodeKey) -> bool {
        self.compare(a, b) == Ordering::Greater
    }

    #[inline]
    pub fn smaller(self, a: NodeKey, b: NodeKey) -> bool {
        self.compare(a, b) == Ordering::Less
    }
}
