//! Data module: node storage and segmentation.

pub mod node_store;
pub mod segmentation;

pub use node_store::{IndexedNodeStore, NodeHandle};
pub use segmentation::{NoSegmentation, Segmentation, SegmentationSink};
