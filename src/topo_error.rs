//! TopoError: unified error type for streaming-topology public APIs.
//!
//! Structural and ordering violations detected while building trees,
//! replaying hierarchies or decoding token streams are reported through this
//! enum instead of aborting, so the driver decides how to stop a run.

use thiserror::Error;

use crate::{GlobalIndex, GraphId};

/// Unified error type for streaming-topology operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TopoError {
    /// An edge, finalize or lookup referenced a vertex that was never inserted.
    #[error("vertex {0} is unknown")]
    UnknownVertex(GlobalIndex),
    /// The same vertex id was inserted twice on the local union-find path.
    #[error("vertex {0} was inserted twice")]
    DuplicateVertex(GlobalIndex),
    /// An arc from a node to itself was requested.
    #[error("self loop on vertex {0}")]
    SelfLoop(GlobalIndex),
    /// The arc already exists; parallel arcs are not allowed.
    #[error("arc {lower} -> {upper} already exists")]
    DuplicateArc { lower: GlobalIndex, upper: GlobalIndex },
    /// The arc to remove is not present.
    #[error("arc between {0} and {1} does not exist")]
    MissingArc(GlobalIndex, GlobalIndex),
    /// A node cannot be removed while it still has arcs.
    #[error("vertex {0} still has arcs and cannot be removed")]
    DanglingArcs(GlobalIndex),
    /// A handle refers to a slot that was freed or reused.
    #[error("stale handle (slot {index}, generation {generation})")]
    StaleHandle { index: u32, generation: u32 },
    /// More FINAL tokens arrived than the declared multiplicity.
    #[error("multiplicity of vertex {0} dropped below zero")]
    NegativeMultiplicity(GlobalIndex),
    /// An edge referenced a vertex whose multiplicity already reached zero.
    #[error("edge ({high}, {low}) references finalized vertex {finalized}")]
    EdgeAfterFinalize {
        high: GlobalIndex,
        low: GlobalIndex,
        finalized: GlobalIndex,
    },
    /// A branch was attached below a vertex that already has a child.
    #[error("cannot attach below vertex {tail}: it already has child {child}")]
    BranchOccupied { tail: GlobalIndex, child: GlobalIndex },
    /// Cancellation reached a saddle configuration the case table does not cover.
    #[error("unsupported saddle configuration at vertex {id} (degree {degree})")]
    UnsupportedSaddle { id: GlobalIndex, degree: usize },
    /// Splitting an arc next to a saddle with several arcs on that side.
    #[error("cannot split next to multi-saddle {0}")]
    MultiSaddleSplit(GlobalIndex),
    /// A metric that assumes a pure merge or split tree was used on a mixed hierarchy.
    #[error("metric `{0}` requires a pure minima or maxima hierarchy")]
    MixedHierarchy(&'static str),
    /// A token carried an unknown kind tag.
    #[error("unknown token kind {0}")]
    UnknownTokenKind(u32),
    /// A token was cut short.
    #[error("truncated token: need {needed} bytes, {available} available")]
    TruncatedToken { needed: usize, available: usize },
    /// A token arrived in a context where it is not allowed.
    #[error("unexpected {token} token: {context}")]
    UnexpectedToken {
        token: &'static str,
        context: &'static str,
    },
    /// A read found no pending data on a serial stream.
    #[error("input stream {0} is empty")]
    StreamUnderflow(GraphId),
    /// A pop tried to consume more than the contiguous front of a buffer.
    #[error("pop of {requested} bytes exceeds the {available} contiguous bytes")]
    BufferUnderrun { requested: usize, available: usize },
    /// A message was sent to a graph id without a registered input stream.
    #[error("graph {0} has no registered input stream")]
    UnknownGraph(GraphId),
    /// Two input streams were registered under the same graph id.
    #[error("graph {0} already has an input stream")]
    AlreadyConnected(GraphId),
    /// The control flow description is inconsistent.
    #[error("invalid control flow: {0}")]
    InvalidFlow(String),
    /// A patch description is inconsistent.
    #[error("invalid patch: {0}")]
    InvalidPatch(String),
    /// Configuration values are out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
