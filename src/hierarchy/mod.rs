//! Hierarchy module: cancellation metrics, multi-resolution replay and export.

pub mod export;
pub mod metrics;
pub mod multires;

pub use export::{FeatureRecord, SimplificationSequence};
pub use metrics::{ArcMetric, LifeTime, MetricKind};
pub use multires::{Cancellation, PersistenceHierarchy, Substitution};
