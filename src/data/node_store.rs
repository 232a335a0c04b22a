//! Block-allocated node storage addressed by global vertex ids.
//!
//! Slots live in fixed-size blocks that are never reallocated once created,
//! so a slot keeps its address for as long as it is occupied. Erased slots
//! are threaded onto a hole list through their `Vacant` placeholder and are
//! reused by later inserts. Every slot carries a generation counter that is
//! bumped on erase; a [`NodeHandle`] remembers the generation it was issued
//! for, which lets lookups reject handles to freed or reused slots.
//!
//! The id index is a `BTreeMap`, so iteration follows increasing
//! [`GlobalIndex`] order rather than storage order.

use std::collections::BTreeMap;
use std::ops::{Index, IndexMut};

use crate::debug_invariants::DebugInvariants;
use crate::topo_error::TopoError;
use crate::{GlobalIndex, LocalIndex};

/// Default block size is `1 << DEFAULT_BLOCK_BITS` slots.
pub const DEFAULT_BLOCK_BITS: u8 = 10;

const MAX_BLOCK_BITS: u8 = 24;

/// Stable reference to an occupied slot.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle {
    index: LocalIndex,
    generation: u32,
}

impl NodeHandle {
    /// Dense local index of the slot.
    #[inline]
    pub fn index(self) -> LocalIndex {
        self.index
    }

    /// Generation the handle was issued for.
    #[inline]
    pub fn generation(self) -> u32 {
        self.generation
    }

    fn stale(self) -> TopoError {
        TopoError::StaleHandle {
            index: self.index,
            generation: self.generation,
        }
    }
}

#[derive(Debug, Clone)]
enum Slot<T> {
    Occupied {
        id: GlobalIndex,
        generation: u32,
        value: T,
    },
    Vacant {
        generation: u32,
        next_hole: Option<LocalIndex>,
    },
}

/// Growable arena mapping [`GlobalIndex`] to node records.
#[derive(Debug, Clone)]
pub struct IndexedNodeStore<T> {
    blocks: Vec<Vec<Slot<T>>>,
    block_bits: u8,
    index: BTreeMap<GlobalIndex, LocalIndex>,
    first_hole: Option<LocalIndex>,
    slot_count: LocalIndex,
}

impl<T> Default for IndexedNodeStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> IndexedNodeStore<T> {
    /// Empty store with the default block size.
    pub fn new() -> Self {
        Self::with_block_bits(DEFAULT_BLOCK_BITS)
    }

    /// Empty store whose blocks hold `1 << bits` slots (clamped to `1..=24`).
    pub fn with_block_bits(bits: u8) -> Self {
        Self {
            blocks: Vec::new(),
            block_bits: bits.clamp(1, MAX_BLOCK_BITS),
            index: BTreeMap::new(),
            first_hole: None,
            slot_count: 0,
        }
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        1usize << self.block_bits
    }

    /// Number of live nodes.
    #[inline]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Number of slots ever created (live + holes).
    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slot_count as usize
    }

    #[inline]
    pub fn contains(&self, id: GlobalIndex) -> bool {
        self.index.contains_key(&id)
    }

    #[inline]
    fn locate(&self, index: LocalIndex) -> (usize, usize) {
        let i = index as usize;
        (i >> self.block_bits, i & (self.block_size() - 1))
    }

    fn slot(&self, index: LocalIndex) -> Option<&Slot<T>> {
        let (b, o) = self.locate(index);
        self.blocks.get(b)?.get(o)
    }

    fn slot_mut(&mut self, index: LocalIndex) -> Option<&mut Slot<T>> {
        let (b, o) = self.locate(index);
        self.blocks.get_mut(b)?.get_mut(o)
    }

    /// Insert `value` under `id`.
    ///
    /// Returns `None` if `id` is already present; the existing node is left
    /// untouched.
    pub fn insert(&mut self, id: GlobalIndex, value: T) -> Option<NodeHandle> {
        if self.index.contains_key(&id) {
            return None;
        }
        Some(self.place(id, value))
    }

    /// Handle of the node under `id`, inserting `make()` first if absent.
    /// The flag reports whether an insert happened.
    pub fn get_or_insert_with(
        &mut self,
        id: GlobalIndex,
        make: impl FnOnce() -> T,
    ) -> (NodeHandle, bool) {
        match self.find(id) {
            Some(h) => (h, false),
            None => (self.place(id, make()), true),
        }
    }

    fn place(&mut self, id: GlobalIndex, value: T) -> NodeHandle {
        if let Some(hole) = self.first_hole {
            if let Some(slot) = self.slot_mut(hole) {
                if let Slot::Vacant {
                    generation,
                    next_hole,
                } = *slot
                {
                    *slot = Slot::Occupied {
                        id,
                        generation,
                        value,
                    };
                    self.first_hole = next_hole;
                    self.index.insert(id, hole);
                    return NodeHandle {
                        index: hole,
                        generation,
                    };
                }
            }
            log::warn!("hole list head {hole} is not vacant, dropping the hole list");
            self.first_hole = None;
        }

        let block_size = self.block_size();
        let slot = Slot::Occupied {
            id,
            generation: 0,
            value,
        };
        match self.blocks.last_mut() {
            Some(block) if block.len() < block_size => block.push(slot),
            _ => {
                let mut block = Vec::with_capacity(block_size);
                block.push(slot);
                self.blocks.push(block);
            }
        }
        let index = self.slot_count;
        self.slot_count += 1;
        self.index.insert(id, index);
        NodeHandle {
            index,
            generation: 0,
        }
    }

    /// Handle of the node stored under `id`.
    pub fn find(&self, id: GlobalIndex) -> Option<NodeHandle> {
        let index = *self.index.get(&id)?;
        match self.slot(index)? {
            Slot::Occupied { generation, .. } => Some(NodeHandle {
                index,
                generation: *generation,
            }),
            Slot::Vacant { .. } => None,
        }
    }

    pub fn get(&self, id: GlobalIndex) -> Option<&T> {
        self.find(id).and_then(|h| self.try_at(h))
    }

    pub fn get_mut(&mut self, id: GlobalIndex) -> Option<&mut T> {
        let h = self.find(id)?;
        self.try_at_mut(h)
    }

    /// Whether `handle` still refers to the slot generation it was issued for.
    pub fn is_live(&self, handle: NodeHandle) -> bool {
        self.try_at(handle).is_some()
    }

    pub fn try_at(&self, handle: NodeHandle) -> Option<&T> {
        match self.slot(handle.index)? {
            Slot::Occupied {
                generation, value, ..
            } if *generation == handle.generation => Some(value),
            _ => None,
        }
    }

    pub fn try_at_mut(&mut self, handle: NodeHandle) -> Option<&mut T> {
        match self.slot_mut(handle.index)? {
            Slot::Occupied {
                generation, value, ..
            } if *generation == handle.generation => Some(value),
            _ => None,
        }
    }

    /// Direct access by handle, reporting stale handles as errors.
    pub fn at(&self, handle: NodeHandle) -> Result<&T, TopoError> {
        self.try_at(handle).ok_or_else(|| handle.stale())
    }

    pub fn at_mut(&mut self, handle: NodeHandle) -> Result<&mut T, TopoError> {
        self.try_at_mut(handle).ok_or_else(|| handle.stale())
    }

    /// Global id stored in the slot behind `handle`.
    pub fn id_of(&self, handle: NodeHandle) -> Option<GlobalIndex> {
        match self.slot(handle.index)? {
            Slot::Occupied { id, generation, .. } if *generation == handle.generation => Some(*id),
            _ => None,
        }
    }

    /// Remove the node stored under `id` and push its slot onto the hole list.
    pub fn erase(&mut self, id: GlobalIndex) -> Option<T> {
        let index = self.index.remove(&id)?;
        let next_hole = self.first_hole;
        let slot = self.slot_mut(index)?;
        let generation = match slot {
            Slot::Occupied { generation, .. } => generation.wrapping_add(1),
            Slot::Vacant { .. } => return None,
        };
        let old = std::mem::replace(
            slot,
            Slot::Vacant {
                generation,
                next_hole,
            },
        );
        self.first_hole = Some(index);
        match old {
            Slot::Occupied { value, .. } => Some(value),
            Slot::Vacant { .. } => None,
        }
    }

    /// Remove the node behind `handle`; stale handles remove nothing.
    pub fn erase_handle(&mut self, handle: NodeHandle) -> Option<T> {
        let id = self.id_of(handle)?;
        self.erase(id)
    }

    /// Live nodes in increasing id order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeHandle, &T)> {
        self.index.values().filter_map(|&index| match self.slot(index) {
            Some(Slot::Occupied {
                generation, value, ..
            }) => Some((
                NodeHandle {
                    index,
                    generation: *generation,
                },
                value,
            )),
            _ => None,
        })
    }

    /// Snapshot of live handles in increasing id order.
    pub fn handles(&self) -> Vec<NodeHandle> {
        self.iter().map(|(h, _)| h).collect()
    }

    pub fn ids(&self) -> impl Iterator<Item = GlobalIndex> + '_ {
        self.index.keys().copied()
    }

    /// Drop every node and every block.
    pub fn clear(&mut self) {
        self.blocks.clear();
        self.index.clear();
        self.first_hole = None;
        self.slot_count = 0;
    }
}

impl<T> Index<NodeHandle> for IndexedNodeStore<T> {
    type Output = T;

    fn index(&self, handle: NodeHandle) -> &T {
        match self.try_at(handle) {
            Some(v) => v,
            None => panic!("{}", handle.stale()),
        }
    }
}

impl<T> IndexMut<NodeHandle> for IndexedNodeStore<T> {
    fn index_mut(&mut self, handle: NodeHandle) -> &mut T {
        match self.try_at_mut(handle) {
            Some(v) => v,
            None => panic!("{}", handle.stale()),
        }
    }
}

impl<T> DebugInvariants for IndexedNodeStore<T> {
    fn validate_invariants(&self) -> Result<(), TopoError> {
        for (&id, &index) in &self.index {
            match self.slot(index) {
                Some(Slot::Occupied { id: stored, .. }) if *stored == id => {}
                _ => return Err(TopoError::UnknownVertex(id)),
            }
        }
        let mut holes = 0usize;
        let mut cursor = self.first_hole;
        while let Some(index) = cursor {
            match self.slot(index) {
                Some(Slot::Vacant { next_hole, .. }) => cursor = *next_hole,
                _ => {
                    return Err(TopoError::StaleHandle {
                        index,
                        generation: 0,
                    });
                }
            }
            holes += 1;
            if holes > self.slot_count() {
                return Err(TopoError::InvalidConfig("hole list is cyclic".into()));
            }
        }
        if holes + self.len() != self.slot_count() {
            return Err(TopoError::InvalidConfig(format!(
                "{} holes + {} nodes != {} slots",
                holes,
                self.len(),
                self.slot_count()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod layout_tests {
    use super::*;
    use static_assertions::assert_eq_size;

    assert_eq_size!(NodeHandle, u64);
}
