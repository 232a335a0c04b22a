#![cfg_attr(docsrs, feature(doc_cfg))]
//! # streaming-topology
//!
//! streaming-topology builds merge trees and split trees of scalar fields
//! that are too large to process in one piece. The domain is cut into
//! patches; each patch is reduced to a small boundary tree, the boundary
//! trees are merged in a streaming fashion by a tree of gather stages, and
//! the result is simplified into a multi-resolution persistence hierarchy.
//!
//! ## Features
//! - Arena node storage with generation-checked handles
//! - Critical point graphs with derived tree and Morse types
//! - Union-find local trees over grids and explicit meshes
//! - Streaming gather with exact-once finalization and scatter corrections
//! - Persistence hierarchies with pluggable arc metrics and lossless replay
//! - A token wire format, FIFO buffers and a serial communicator that can be
//!   swapped for a network transport
//!
//! ## Determinism
//!
//! Every comparison goes through the `(value, id)` order, so ties never
//! depend on input order. Tests and benches draw random fields from
//! `SmallRng` with fixed seeds.
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! streaming-topology = "0.3"
//! # features = ["rayon"]
//! ```
//!
//! A full run over a decomposed grid:
//!
//! ```
//! use streaming_topology::prelude::*;
//!
//! let field = [9.0f32, 2.0, 7.0, 4.0, 1.0, 6.0, 8.0, 3.0, 5.0];
//! let grid = GridDecomposition::new([3, 3, 1], [2, 2, 1]).unwrap();
//! let patches = grid.patches(&field, Connectivity::Face).unwrap();
//! let out = SerialControl::new(TopologyConfig::default())
//!     .unwrap()
//!     .run(&patches)
//!     .unwrap();
//!
//! let mut hierarchy = PersistenceHierarchy::new(out.graph);
//! hierarchy.construct(&HierarchyOptions::default()).unwrap();
//! hierarchy.update_persistence(2.5).unwrap();
//! ```

pub mod algs;
pub mod config;
pub mod data;
pub mod debug_invariants;
pub mod hierarchy;
pub mod topo_error;
pub mod topology;

pub use debug_invariants::DebugInvariants;
pub use topo_error::TopoError;

/// Scalar field values.
pub type FunctionType = f32;
/// Stable identifier of a sample in the whole domain.
pub type GlobalIndex = u64;
/// Dense slot index inside one node store.
pub type LocalIndex = u32;
/// Identifier of a pipeline stage.
pub type GraphId = u32;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::communicator::{SerialCommunicator, TopoCommunicator};
    pub use crate::algs::control::{GraphAssembler, SerialControl, TopologyOutput};
    pub use crate::algs::flow::{ControlFlow, ModuloGather, ModuloScatter};
    pub use crate::algs::gather::StreamingGather;
    pub use crate::algs::local_compute::LocalSortedUF;
    pub use crate::algs::scatter::StreamingScatter;
    pub use crate::algs::stream::{TokenSink, TokenSource, TopoInputStream, TopoOutputStream};
    pub use crate::algs::wire::Token;
    pub use crate::config::{HierarchyMode, HierarchyOptions, HierarchyType, TopologyConfig};
    pub use crate::data::{IndexedNodeStore, NodeHandle, Segmentation, SegmentationSink};
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::hierarchy::{ArcMetric, MetricKind, PersistenceHierarchy};
    pub use crate::topo_error::TopoError;
    pub use crate::topology::{
        Connectivity, CriticalPointGraph, GridDecomposition, GridPatch, MergeTree, MeshPatch,
        MorseType, PatchDomain, TreeOrientation, TreeType, ValueOrder,
    };
    pub use crate::{FunctionType, GlobalIndex, GraphId, LocalIndex};
}
