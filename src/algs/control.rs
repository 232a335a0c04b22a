//! Serial driver of the full pipeline.
//!
//! Patches are reduced to boundary trees, gathered level by level into one
//! tree, assembled into a [`CriticalPointGraph`] and, optionally, scattered
//! back so every stage ends up with the global structure of its region.
//! Stages only talk through two communicators, one per direction.

use num_traits::ToPrimitive;
#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::GraphId;
use crate::algs::communicator::{SerialCommunicator, TopoCommunicator};
use crate::algs::flow::{ControlFlow, ModuloGather, ModuloScatter};
use crate::algs::gather::{GatherStats, StreamingGather};
use crate::algs::local_compute::{LocalSortedUF, LocalStats};
use crate::algs::scatter::{ScatterStats, StreamingScatter};
use crate::algs::stream::{TokenSink, TopoInputStream, TopoOutputStream};
use crate::algs::wire::Token;
use crate::config::TopologyConfig;
use crate::data::Segmentation;
use crate::topo_error::TopoError;
use crate::topology::graph::CriticalPointGraph;
use crate::topology::merge_tree::MergeTree;
use crate::topology::patch::{GridDecomposition, PatchDomain};

/// Builds a [`CriticalPointGraph`] from one finished token stream.
#[derive(Debug, Default)]
pub struct GraphAssembler {
    graph: CriticalPointGraph,
    done: bool,
}

impl GraphAssembler {
    pub fn new(graph: CriticalPointGraph) -> Self {
        Self { graph, done: false }
    }

    /// Whether EMPTY has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn graph(&self) -> &CriticalPointGraph {
        &self.graph
    }

    /// The assembled graph; nodes still owed FINAL tokens are reported.
    pub fn finish(self) -> Result<CriticalPointGraph, TopoError> {
        if !self.done {
            return Err(TopoError::UnexpectedToken {
                token: "end of stream",
                context: "graph assembly before EMPTY",
            });
        }
        let open = self.graph.iter().filter(|(_, n)| n.multiplicity() > 0).count();
        if open > 0 {
            log::warn!("{open} nodes left unfinalized after assembly");
        }
        crate::debug_invariants!(&self.graph);
        Ok(self.graph)
    }
}

impl TokenSink for GraphAssembler {
    fn write(&mut self, token: &Token) -> Result<(), TopoError> {
        if self.done {
            return Err(TopoError::UnexpectedToken {
                token: token.name(),
                context: "graph assembly after EMPTY",
            });
        }
        match *token {
            Token::Vertex(v) => {
                if self.graph.find(v.id).is_none() {
                    let h = self.graph.add_node(v.id, v.value);
                    self.graph.set_multiplicity(h, v.multiplicity)?;
                }
            }
            Token::Edge(e) => self.graph.add_arc_by_id(e.source, e.destination)?,
            Token::Final(f) => {
                let h = self.graph.find(f.id).ok_or(TopoError::UnknownVertex(f.id))?;
                self.graph.finalize_node(h)?;
            }
            Token::Empty => self.done = true,
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub local: Vec<LocalStats>,
    pub gather: Vec<GatherStats>,
    pub scatter: Vec<ScatterStats>,
}

/// Everything a pipeline run produces.
#[derive(Debug)]
pub struct TopologyOutput {
    /// The global tree.
    pub graph: CriticalPointGraph,
    /// Tree of every stage, indexed by graph id; patches come first.
    pub trees: Vec<MergeTree>,
    /// Regular vertices of each patch, by representative.
    pub segmentations: Vec<Segmentation>,
    pub stats: PipelineStats,
}

/// Runs local, gather and scatter stages in level order on one thread of
/// control.
#[derive(Debug, Clone)]
pub struct SerialControl {
    config: TopologyConfig,
}

impl SerialControl {
    pub fn new(config: TopologyConfig) -> Result<Self, TopoError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &TopologyConfig {
        &self.config
    }

    /// Cut an x-fastest grid field into `blocks` overlapping patches with
    /// the configured connectivity and run the pipeline on them.
    pub fn run_grid<T: ToPrimitive>(
        &self,
        dims: [u32; 3],
        blocks: [u32; 3],
        field: &[T],
    ) -> Result<TopologyOutput, TopoError> {
        let patches = GridDecomposition::new(dims, blocks)?.patches(field, self.config.connectivity)?;
        self.run(&patches)
    }

    pub fn run<P: PatchDomain + Sync>(&self, patches: &[P]) -> Result<TopologyOutput, TopoError> {
        let base = GraphId::try_from(patches.len())
            .map_err(|_| TopoError::InvalidFlow(format!("{} patches", patches.len())))?;
        let gather = ModuloGather::new(base, self.config.fan_in)?;
        let scatter = ModuloScatter::new(base, self.config.fan_in)?;
        let size = gather.size();
        let root = gather.flow().root();
        let result_id = size;

        let gather_comm = SerialCommunicator::new();
        let scatter_comm = SerialCommunicator::new();
        for id in 0..=result_id {
            gather_comm.connect(id)?;
        }
        if self.config.scatter {
            for id in 0..size {
                scatter_comm.connect(id)?;
            }
        }
        let downstream = |id: GraphId| -> Result<Vec<GraphId>, TopoError> {
            let sinks = gather.sinks(id)?;
            Ok(if sinks.is_empty() { vec![result_id] } else { sinks })
        };
        log::info!(
            "pipeline: {base} patches, {size} stages, fan-in {}",
            self.config.fan_in
        );

        // local
        let local = |(i, patch): (usize, &P)| -> Result<(MergeTree, Segmentation, LocalStats), TopoError> {
            let id = i as GraphId;
            let mut tree = MergeTree::with_block_bits(id, self.config.order(), self.config.block_bits);
            let mut segmentation = Segmentation::new();
            let mut out = TopoOutputStream::with_min_message(
                downstream(id)?,
                &gather_comm,
                self.config.min_message,
            );
            let stats = LocalSortedUF::new().apply(patch, &mut tree, &mut segmentation, &mut out)?;
            Ok((tree, segmentation, stats))
        };
        #[cfg(feature = "rayon")]
        let results: Vec<_> = patches
            .par_iter()
            .enumerate()
            .map(local)
            .collect::<Result<_, TopoError>>()?;
        #[cfg(not(feature = "rayon"))]
        let results: Vec<_> = patches
            .iter()
            .enumerate()
            .map(local)
            .collect::<Result<_, TopoError>>()?;

        let mut stats = PipelineStats::default();
        let mut trees = Vec::with_capacity(size as usize);
        let mut segmentations = Vec::with_capacity(patches.len());
        for (tree, segmentation, s) in results {
            trees.push(tree);
            segmentations.push(segmentation);
            stats.local.push(s);
        }
        log::info!("local phase done: {} trees", trees.len());

        // gather, in level order
        for id in base..size {
            let sources = gather.sources(id)?;
            let upstream = if self.config.scatter {
                scatter.sinks(id)?
            } else {
                Vec::new()
            };
            let mut tree = MergeTree::with_block_bits(id, self.config.order(), self.config.block_bits);
            let mut input = TopoInputStream::new(id, &gather_comm);
            let mut down =
                TopoOutputStream::with_min_message(downstream(id)?, &gather_comm, self.config.min_message);
            let mut up =
                TopoOutputStream::with_min_message(upstream, &scatter_comm, self.config.min_message);
            let s = StreamingGather::new(&mut tree, sources.len()).run(&mut input, &mut down, &mut up)?;
            stats.gather.push(s);
            trees.push(tree);
        }

        let mut assembler = GraphAssembler::new(CriticalPointGraph::with_block_bits(self.config.block_bits));
        let mut input = TopoInputStream::new(result_id, &gather_comm);
        while !assembler.is_done() {
            let token = input.expect_token()?;
            assembler.write(&token)?;
        }
        let graph = assembler.finish()?;
        log::info!(
            "gather phase done: {} nodes, {} arcs",
            graph.len(),
            graph.active_arcs().len()
        );

        // scatter, from the root outwards
        if self.config.scatter {
            for id in (0..size).rev() {
                if id == root {
                    continue;
                }
                let expected = scatter.level(id)? as usize;
                let mut input = TopoInputStream::new(id, &scatter_comm);
                let mut forward = TopoOutputStream::with_min_message(
                    scatter.sinks(id)?,
                    &scatter_comm,
                    self.config.min_message,
                );
                let s = StreamingScatter::new(&mut trees[id as usize], expected)
                    .run(&mut input, &mut forward)?;
                stats.scatter.push(s);
            }
            log::info!("scatter phase done: {} stages", stats.scatter.len());
        }

        Ok(TopologyOutput {
            graph,
            trees,
            segmentations,
            stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::patch::MeshPatch;

    fn line(range: std::ops::Range<u64>, values: &[f32], shared: &[u64]) -> MeshPatch {
        let vertices = range
            .clone()
            .map(|i| (i, values[i as usize], if shared.contains(&i) { 2 } else { 1 }))
            .collect();
        let edges: Vec<_> = range.clone().skip(1).map(|i| (i - 1, i)).collect();
        MeshPatch::from_edges(vertices, &edges).unwrap()
    }

    #[test]
    fn assembler_counts_finals() {
        let mut a = GraphAssembler::default();
        for t in [
            Token::vertex(1, 2.0, 2),
            Token::vertex(0, 1.0, 1),
            Token::edge(1, 0),
            Token::finalize(1),
            Token::finalize(0),
            Token::finalize(1),
            Token::Empty,
        ] {
            a.write(&t).unwrap();
        }
        assert!(a.write(&Token::Empty).is_err());
        let g = a.finish().unwrap();
        assert_eq!(g.active_arcs(), vec![(0, 1)]);
        assert!(g.iter().all(|(_, n)| n.multiplicity() == 0));
    }

    #[test]
    fn two_patches_match_single_patch() {
        let values = [1.0, 3.0, 2.0, 5.0, 4.0, 0.0, 6.0];
        let whole = [line(0..7, &values, &[])];
        let split = [line(0..3, &values, &[2]), line(2..7, &values, &[2])];
        let control = SerialControl::new(TopologyConfig::default()).unwrap();
        let single = control.run(&whole).unwrap();
        let merged = control.run(&split).unwrap();
        assert_eq!(single.graph.active_arcs(), merged.graph.active_arcs());
        assert_eq!(
            merged.graph.active_arcs(),
            vec![(2, 1), (2, 3), (5, 2), (5, 6)]
        );
        assert_eq!(merged.trees.len(), 3);
        assert_eq!(merged.stats.gather.len(), 1);
        assert_eq!(merged.stats.scatter.len(), 2);
        // the left patch learned where its branch ends
        let left = &merged.trees[0];
        let roots: Vec<_> = left.roots().into_iter().map(|h| left[h].id()).collect();
        assert_eq!(roots, vec![5]);
    }

    #[test]
    fn invalid_fan_in_is_rejected() {
        let cfg = TopologyConfig {
            fan_in: 1,
            ..TopologyConfig::default()
        };
        assert!(SerialControl::new(cfg).is_err());
    }
}
