//! Run configuration.
//!
//! [`TopologyConfig`] drives a full serial pipeline and [`HierarchyOptions`]
//! a hierarchy construction. Both are plain serde records with defaults, so
//! a partial JSON document is a valid configuration.

use serde::{Deserialize, Serialize};

use crate::FunctionType;
use crate::algs::stream::DEFAULT_MIN_MESSAGE;
use crate::data::node_store::DEFAULT_BLOCK_BITS;
use crate::hierarchy::metrics::MetricKind;
use crate::topo_error::TopoError;
use crate::topology::order::{TreeOrientation, ValueOrder};
use crate::topology::patch::Connectivity;

/// Default fan-in of the gather tree.
pub const DEFAULT_FAN_IN: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    pub orientation: TreeOrientation,
    pub connectivity: Connectivity,
    /// Inputs per gather stage.
    pub fan_in: u32,
    /// Output streams flush once this many bytes are buffered.
    pub min_message: usize,
    /// Node stores allocate blocks of `1 << block_bits` slots.
    pub block_bits: u8,
    /// Send the merged tree back to the patches.
    pub scatter: bool,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            orientation: TreeOrientation::Merge,
            connectivity: Connectivity::Face,
            fan_in: DEFAULT_FAN_IN,
            min_message: DEFAULT_MIN_MESSAGE,
            block_bits: DEFAULT_BLOCK_BITS,
            scatter: true,
        }
    }
}

impl TopologyConfig {
    pub fn validate(&self) -> Result<(), TopoError> {
        if self.fan_in < 2 {
            return Err(TopoError::InvalidConfig(format!(
                "gather fan-in must be at least 2, got {}",
                self.fan_in
            )));
        }
        if self.block_bits == 0 || self.block_bits > 24 {
            return Err(TopoError::InvalidConfig(format!(
                "block bits must be in 1..=24, got {}",
                self.block_bits
            )));
        }
        Ok(())
    }

    pub fn order(&self) -> ValueOrder {
        ValueOrder::new(self.orientation)
    }
}

/// Which extrema a hierarchy cancels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HierarchyType {
    Minima,
    #[default]
    Maxima,
    Mixed,
}

/// What happens to cancelled nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HierarchyMode {
    /// Nodes are deleted; nothing can be replayed.
    Destructive,
    /// Nodes stay inactive with their parent set; no replay.
    Recorded,
    /// Every cancellation is kept and can be undone.
    #[default]
    Recoverable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HierarchyOptions {
    pub kind: HierarchyType,
    pub mode: HierarchyMode,
    /// Cancellations above this value are not performed.
    pub threshold: FunctionType,
    pub metric: MetricKind,
}

impl Default for HierarchyOptions {
    fn default() -> Self {
        Self {
            kind: HierarchyType::Maxima,
            mode: HierarchyMode::Recoverable,
            threshold: FunctionType::MAX / 2.0,
            metric: MetricKind::Absolute,
        }
    }
}
