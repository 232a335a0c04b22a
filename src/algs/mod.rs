//! Streaming algorithms and the plumbing that connects them.
//!
//! Local and gather stages build trees; wire, FIFO, communicator, stream
//! and flow move tokens between them; control runs a whole pipeline.

pub mod communicator;
pub mod control;
pub mod fifo;
pub mod flow;
pub mod gather;
pub mod local_compute;
pub mod scatter;
pub mod stream;
pub mod wire;

pub use control::{GraphAssembler, SerialControl, TopologyOutput};
pub use gather::StreamingGather;
pub use local_compute::LocalSortedUF;
pub use scatter::StreamingScatter;
