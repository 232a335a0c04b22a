//! Tree and graph structures over critical points.
//!
//! This module provides:
//! - the `(value, id)` order shared by every algorithm, for merge and split trees
//! - [`CriticalPointGraph`], the arc graph hierarchies are built on
//! - [`MergeTree`], the single-child representation used while streaming
//! - patch descriptions consumed by the local stage

pub mod graph;
pub mod merge_tree;
pub mod node;
pub mod order;
pub mod patch;

pub use graph::{CriticalPointGraph, NodeRecord, SplitType};
pub use merge_tree::MergeTree;
pub use node::{GraphNode, MorseType, TreeType};
pub use order::{NodeKey, TreeOrientation, ValueOrder};
pub use patch::{Connectivity, GridDecomposition, GridPatch, MeshPatch, PatchDomain};
