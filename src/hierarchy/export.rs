//! Flat export of a constructed hierarchy.

use serde::{Deserialize, Serialize};

use crate::config::HierarchyType;
use crate::hierarchy::metrics::LifeTime;
use crate::hierarchy::multires::PersistenceHierarchy;
use crate::topo_error::TopoError;
use crate::{FunctionType, GlobalIndex};

/// One active node of the sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub id: GlobalIndex,
    pub life: LifeTime,
    /// Compact index of the node this branch hangs from: the first down
    /// neighbor for maxima, the first up neighbor for minima.
    pub link: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimplificationSequence {
    pub metric: String,
    pub kind: HierarchyType,
    /// Range covered by all life times.
    pub low: FunctionType,
    pub high: FunctionType,
    pub features: Vec<FeatureRecord>,
}

impl PersistenceHierarchy {
    /// Life times of the active nodes at the current level, in id order.
    pub fn simplification_sequence(&self) -> Result<SimplificationSequence, TopoError> {
        let metric = self
            .metric()
            .ok_or_else(|| TopoError::InvalidConfig("hierarchy has not been constructed".into()))?;
        let maxima = match self.kind() {
            HierarchyType::Maxima => true,
            HierarchyType::Minima => false,
            HierarchyType::Mixed => return Err(TopoError::MixedHierarchy(metric.name())),
        };
        let graph = self.graph();
        let map = graph.active_index_map();
        let mut low = FunctionType::INFINITY;
        let mut high = FunctionType::NEG_INFINITY;
        let mut features = Vec::with_capacity(map.len());
        for (_, node) in graph.iter().filter(|(_, n)| n.is_active()) {
            let life = metric.life_time(graph, node);
            low = low.min(life.low);
            high = high.max(life.high);
            let side = if maxima { node.downs() } else { node.ups() };
            features.push(FeatureRecord {
                id: node.id(),
                life,
                link: side.first().and_then(|h| map.get(h).copied()),
            });
        }
        log::debug!(
            "simplification sequence `{}`: {} features in [{low}, {high}]",
            metric.name(),
            features.len()
        );
        Ok(SimplificationSequence {
            metric: metric.name().to_string(),
            kind: self.kind(),
            low,
            high,
            features,
        })
    }
}
