//! Which stage feeds which.
//!
//! A control flow numbers the stages of a pipeline and answers, for each
//! stage, where its tokens come from, where they go and at which level it
//! runs. Running every stage of level `L` before any stage of level `L + 1`
//! guarantees that a stage finds all of its input already delivered.

use crate::GraphId;
use crate::topo_error::TopoError;

pub trait ControlFlow: Send + Sync {
    /// Stages feeding `sink`.
    fn sources(&self, sink: GraphId) -> Result<Vec<GraphId>, TopoError>;

    /// Stages fed by `source`.
    fn sinks(&self, source: GraphId) -> Result<Vec<GraphId>, TopoError>;

    /// Longest distance from a pure source.
    fn level(&self, id: GraphId) -> Result<u32, TopoError>;

    /// Total number of stages.
    fn size(&self) -> u32;
}

/// `factor`-ary reduction tree over `base` leaves, numbered level by level:
/// leaves first, the single root last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuloFlow {
    factor: u32,
    level_count: Vec<u32>,
    /// `aggregated[l]` is the first id of level `l`; the final entry is the
    /// total number of stages.
    aggregated: Vec<u32>,
}

impl ModuloFlow {
    pub fn new(base: u32, factor: u32) -> Result<Self, TopoError> {
        if factor < 2 {
            return Err(TopoError::InvalidFlow(format!(
                "fan-in factor must be at least 2, got {factor}"
            )));
        }
        if base == 0 {
            return Err(TopoError::InvalidFlow("flow needs at least one leaf".into()));
        }
        let mut level_count = vec![base];
        let mut aggregated = vec![0];
        let mut count = base;
        while count > 1 {
            aggregated.push(aggregated[aggregated.len() - 1] + count);
            count = count.div_ceil(factor);
            level_count.push(count);
        }
        aggregated.push(aggregated[aggregated.len() - 1] + count);
        Ok(Self {
            factor,
            level_count,
            aggregated,
        })
    }

    pub fn factor(&self) -> u32 {
        self.factor
    }

    pub fn leaf_count(&self) -> u32 {
        self.level_count[0]
    }

    /// Number of levels, leaves included.
    pub fn level_count(&self) -> u32 {
        self.level_count.len() as u32
    }

    pub fn size(&self) -> u32 {
        self.aggregated[self.aggregated.len() - 1]
    }

    pub fn root(&self) -> GraphId {
        self.size() - 1
    }

    /// Level of `id` counted from the leaves.
    pub fn tree_level(&self, id: GraphId) -> Result<u32, TopoError> {
        if id >= self.size() {
            return Err(TopoError::InvalidFlow(format!(
                "stage {id} outside flow of size {}",
                self.size()
            )));
        }
        let above = self.aggregated.partition_point(|&a| a <= id);
        Ok(above as u32 - 1)
    }

    pub fn children(&self, id: GraphId) -> Result<Vec<GraphId>, TopoError> {
        let lvl = self.tree_level(id)? as usize;
        if lvl == 0 {
            return Ok(Vec::new());
        }
        let k = id - self.aggregated[lvl];
        let lo = k * self.factor;
        let hi = self.level_count[lvl - 1].min((k + 1) * self.factor);
        let first = self.aggregated[lvl - 1];
        Ok((lo..hi).map(|i| first + i).collect())
    }

    pub fn parent(&self, id: GraphId) -> Result<Option<GraphId>, TopoError> {
        let lvl = self.tree_level(id)? as usize;
        if lvl + 1 >= self.level_count.len() {
            return Ok(None);
        }
        let k = id - self.aggregated[lvl];
        Ok(Some(self.aggregated[lvl + 1] + k / self.factor))
    }

    /// Number of ancestors of `id`.
    pub fn depth(&self, id: GraphId) -> Result<u32, TopoError> {
        Ok(self.level_count() - 1 - self.tree_level(id)?)
    }
}

/// Leaves flow into their parents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuloGather(pub ModuloFlow);

impl ModuloGather {
    pub fn new(source_count: u32, factor: u32) -> Result<Self, TopoError> {
        ModuloFlow::new(source_count, factor).map(Self)
    }

    pub fn flow(&self) -> &ModuloFlow {
        &self.0
    }
}

impl ControlFlow for ModuloGather {
    fn sources(&self, sink: GraphId) -> Result<Vec<GraphId>, TopoError> {
        self.0.children(sink)
    }

    fn sinks(&self, source: GraphId) -> Result<Vec<GraphId>, TopoError> {
        Ok(self.0.parent(source)?.into_iter().collect())
    }

    fn level(&self, id: GraphId) -> Result<u32, TopoError> {
        self.0.tree_level(id)
    }

    fn size(&self) -> u32 {
        self.0.size()
    }
}

/// The mirror of [`ModuloGather`]: the root flows out to the leaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuloScatter(pub ModuloFlow);

impl ModuloScatter {
    pub fn new(sink_count: u32, factor: u32) -> Result<Self, TopoError> {
        ModuloFlow::new(sink_count, factor).map(Self)
    }

    pub fn flow(&self) -> &ModuloFlow {
        &self.0
    }
}

impl ControlFlow for ModuloScatter {
    fn sources(&self, sink: GraphId) -> Result<Vec<GraphId>, TopoError> {
        Ok(self.0.parent(sink)?.into_iter().collect())
    }

    fn sinks(&self, source: GraphId) -> Result<Vec<GraphId>, TopoError> {
        self.0.children(source)
    }

    fn level(&self, id: GraphId) -> Result<u32, TopoError> {
        self.0.depth(id)
    }

    fn size(&self) -> u32 {
        self.0.size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_flow_over_four_leaves() {
        let g = ModuloGather::new(4, 2).unwrap();
        assert_eq!(g.size(), 7);
        assert_eq!(g.flow().level_count(), 3);
        assert_eq!(g.sinks(0).unwrap(), vec![4]);
        assert_eq!(g.sinks(3).unwrap(), vec![5]);
        assert_eq!(g.sinks(5).unwrap(), vec![6]);
        assert!(g.sinks(6).unwrap().is_empty());
        assert_eq!(g.sources(4).unwrap(), vec![0, 1]);
        // level 2 children start at the first id of level 1
        assert_eq!(g.sources(6).unwrap(), vec![4, 5]);
        assert_eq!(
            (0..7).map(|i| g.level(i).unwrap()).collect::<Vec<_>>(),
            vec![0, 0, 0, 0, 1, 1, 2]
        );
        assert!(g.level(7).is_err());
    }

    #[test]
    fn uneven_fan_in() {
        let g = ModuloGather::new(5, 3).unwrap();
        // 5 leaves -> 2 -> 1
        assert_eq!(g.size(), 8);
        assert_eq!(g.sources(5).unwrap(), vec![0, 1, 2]);
        assert_eq!(g.sources(6).unwrap(), vec![3, 4]);
        assert_eq!(g.sources(7).unwrap(), vec![5, 6]);
    }

    #[test]
    fn scatter_mirrors_gather() {
        let s = ModuloScatter::new(4, 2).unwrap();
        assert_eq!(s.sinks(6).unwrap(), vec![4, 5]);
        assert_eq!(s.sources(1).unwrap(), vec![4]);
        assert_eq!(s.level(6).unwrap(), 0);
        assert_eq!(s.level(5).unwrap(), 1);
        assert_eq!(s.level(0).unwrap(), 2);
    }

    #[test]
    fn single_leaf_and_bad_factor() {
        let g = ModuloGather::new(1, 2).unwrap();
        assert_eq!(g.size(), 1);
        assert!(g.sources(0).unwrap().is_empty());
        assert!(g.sinks(0).unwrap().is_empty());
        assert!(matches!(ModuloFlow::new(4, 1), Err(TopoError::InvalidFlow(_))));
        assert!(ModuloFlow::new(0, 2).is_err());
    }
}
