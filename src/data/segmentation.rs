//! Segmentation sinks: regular vertices are assigned to the critical point
//! whose arc they lie on.

use std::collections::BTreeMap;

use hashbrown::HashMap;

use crate::GlobalIndex;

/// Receives `(representative, member)` pairs during local computation.
pub trait SegmentationSink {
    fn add_to_segment(&mut self, representative: GlobalIndex, member: GlobalIndex);
}

/// Discards every assignment.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSegmentation;

impl SegmentationSink for NoSegmentation {
    fn add_to_segment(&mut self, _representative: GlobalIndex, _member: GlobalIndex) {}
}

/// In-memory segmentation keyed by representative id.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Segmentation {
    segments: BTreeMap<GlobalIndex, Vec<GlobalIndex>>,
    owner: HashMap<GlobalIndex, GlobalIndex>,
}

impl Segmentation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Members of the segment labelled `representative`, in insertion order.
    pub fn segment(&self, representative: GlobalIndex) -> &[GlobalIndex] {
        self.segments
            .get(&representative)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Representative a member was assigned to.
    pub fn representative_of(&self, member: GlobalIndex) -> Option<GlobalIndex> {
        self.owner.get(&member).copied()
    }

    /// Segments in increasing representative order.
    pub fn iter(&self) -> impl Iterator<Item = (GlobalIndex, &[GlobalIndex])> {
        self.segments.iter().map(|(&r, m)| (r, m.as_slice()))
    }

    pub fn member_count(&self) -> usize {
        self.owner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owner.is_empty()
    }
}

impl SegmentationSink for Segmentation {
    fn add_to_segment(&mut self, representative: GlobalIndex, member: GlobalIndex) {
        self.segments.entry(representative).or_default().push(member);
        self.owner.insert(member, representative);
    }
}
