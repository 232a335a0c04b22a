//! Streaming merge of boundary trees.
//!
//! A gather stage reads the interleaved token streams of all of its inputs
//! and integrates every edge into one [`MergeTree`] as it arrives. Vertices
//! whose multiplicity has been counted down to zero are complete; once such
//! a vertex becomes regular it is bypassed, which keeps the tree close to
//! the size of the boundary rather than of the patches.
//!
//! When every input has sent EMPTY the remaining tree is written both
//! downstream, to the next gather stage, and upstream, to the scatter
//! stages of the inputs.

use crate::algs::stream::{TeeSink, TokenSink, TokenSource};
use crate::algs::wire::Token;
use crate::data::NodeHandle;
use crate::topo_error::TopoError;
use crate::topology::merge_tree::MergeTree;

/// Progress of a gather pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GatherPhase {
    #[default]
    NotStarted,
    Receiving,
    /// Every input ended; the tree is ready to be written.
    Draining,
    Done,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatherStats {
    pub inputs: usize,
    pub vertices: usize,
    pub edges: usize,
    pub finals: usize,
    /// Finalized regular nodes removed from the tree.
    pub bypassed: usize,
}

/// One gather pass over a tree.
pub struct StreamingGather<'t> {
    tree: &'t mut MergeTree,
    input_count: usize,
    phase: GatherPhase,
    stats: GatherStats,
}

impl<'t> StreamingGather<'t> {
    pub fn new(tree: &'t mut MergeTree, input_count: usize) -> Self {
        Self {
            tree,
            input_count,
            phase: GatherPhase::NotStarted,
            stats: GatherStats {
                inputs: input_count,
                ..GatherStats::default()
            },
        }
    }

    pub fn phase(&self) -> GatherPhase {
        self.phase
    }

    pub fn stats(&self) -> GatherStats {
        self.stats
    }

    /// Inputs that have not sent EMPTY yet.
    pub fn remaining_inputs(&self) -> usize {
        self.input_count
    }

    pub fn tree(&self) -> &MergeTree {
        self.tree
    }

    /// Apply one token. Returns `true` once the last input has ended.
    pub fn process(&mut self, token: &Token) -> Result<bool, TopoError> {
        if matches!(self.phase, GatherPhase::Draining | GatherPhase::Done) {
            return Err(TopoError::UnexpectedToken {
                token: token.name(),
                context: "gather after all inputs ended",
            });
        }
        self.phase = GatherPhase::Receiving;
        log::trace!("gather {}: {:?}", self.tree.graph_id(), token);
        match *token {
            Token::Vertex(v) => {
                self.tree.ensure_node(v.id, v.value, v.multiplicity);
                self.stats.vertices += 1;
            }
            Token::Edge(e) => {
                let high = self
                    .tree
                    .find(e.source)
                    .ok_or(TopoError::UnknownVertex(e.source))?;
                let low = self
                    .tree
                    .find(e.destination)
                    .ok_or(TopoError::UnknownVertex(e.destination))?;
                for h in [high, low] {
                    if self.tree[h].is_finalized() {
                        return Err(TopoError::EdgeAfterFinalize {
                            high: e.source,
                            low: e.destination,
                            finalized: self.tree[h].id(),
                        });
                    }
                }
                if let Some(changed) = self.tree.integrate_edge(high, low)? {
                    self.finalize_vertex(changed)?;
                }
                self.stats.edges += 1;
            }
            Token::Final(f) => {
                let h = self.tree.find(f.id).ok_or(TopoError::UnknownVertex(f.id))?;
                if self.tree.finalize(h)? {
                    self.finalize_vertex(h)?;
                }
                self.stats.finals += 1;
            }
            Token::Empty => {
                if self.input_count == 0 {
                    return Err(TopoError::UnexpectedToken {
                        token: token.name(),
                        context: "gather without inputs",
                    });
                }
                self.input_count -= 1;
                if self.input_count == 0 {
                    self.phase = GatherPhase::Draining;
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// A complete vertex that has become regular carries no information.
    fn finalize_vertex(&mut self, h: NodeHandle) -> Result<(), TopoError> {
        if self.tree[h].is_finalized() && self.tree.is_regular(h) {
            self.tree.bypass(h)?;
            self.stats.bypassed += 1;
        }
        Ok(())
    }

    /// Write the tree to both outputs, each closed by EMPTY.
    pub fn finish(
        &mut self,
        downstream: &mut dyn TokenSink,
        upstream: &mut dyn TokenSink,
    ) -> Result<(), TopoError> {
        crate::debug_invariants!(&*self.tree);
        let mut both = TeeSink::new(downstream, upstream);
        self.tree.emit(&mut both)?;
        both.write(&Token::Empty)?;
        both.flush()?;
        self.phase = GatherPhase::Done;
        log::debug!(
            "gather {} done: {} inputs, {} vertices, {} edges, {} finals, {} bypassed, {} nodes left",
            self.tree.graph_id(),
            self.stats.inputs,
            self.stats.vertices,
            self.stats.edges,
            self.stats.finals,
            self.stats.bypassed,
            self.tree.len()
        );
        Ok(())
    }

    /// Drain `input` until every input has ended, then write the result.
    pub fn run(
        mut self,
        input: &mut dyn TokenSource,
        downstream: &mut dyn TokenSink,
        upstream: &mut dyn TokenSink,
    ) -> Result<GatherStats, TopoError> {
        while self.input_count > 0 {
            let token = input
                .next_token()?
                .ok_or(TopoError::StreamUnderflow(self.tree.graph_id()))?;
            if self.process(&token)? {
                break;
            }
        }
        self.finish(downstream, upstream)?;
        Ok(self.stats)
    }
}
