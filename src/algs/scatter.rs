//! Corrections flowing back from the gather root.
//!
//! Each gather stage sends its merged tree to the stages that fed it. A
//! scatter stage integrates every tree it receives into its own tree, using
//! the same branch integration as the gather, and forwards the tokens to its
//! own inputs. Multiplicities are not touched: the corrections only add
//! structure that other patches contributed.

use crate::algs::stream::{TokenSink, TokenSource};
use crate::algs::wire::Token;
use crate::topo_error::TopoError;
use crate::topology::merge_tree::MergeTree;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScatterStats {
    /// Vertices new to this tree.
    pub added: usize,
    pub edges: usize,
    pub forwarded: usize,
}

pub struct StreamingScatter<'t> {
    tree: &'t mut MergeTree,
    /// EMPTY tokens still expected, one per ancestor.
    expected: usize,
    stats: ScatterStats,
}

impl<'t> StreamingScatter<'t> {
    pub fn new(tree: &'t mut MergeTree, expected: usize) -> Self {
        Self {
            tree,
            expected,
            stats: ScatterStats::default(),
        }
    }

    fn apply(&mut self, token: &Token) -> Result<(), TopoError> {
        match *token {
            Token::Vertex(v) => {
                if !self.tree.contains(v.id) {
                    self.tree.ensure_node(v.id, v.value, v.multiplicity);
                    self.stats.added += 1;
                }
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
                self.tree.integrate_edge(high, low)?;
                self.stats.edges += 1;
            }
            Token::Final(_) => {}
            Token::Empty => {
                if self.expected == 0 {
                    return Err(TopoError::UnexpectedToken {
                        token: token.name(),
                        context: "scatter received more trees than ancestors",
                    });
                }
                self.expected -= 1;
            }
        }
        Ok(())
    }

    /// Apply and forward tokens until every ancestor's tree has arrived.
    pub fn run(
        mut self,
        input: &mut dyn TokenSource,
        forward: &mut dyn TokenSink,
    ) -> Result<ScatterStats, TopoError> {
        while self.expected > 0 {
            let token = input
                .next_token()?
                .ok_or(TopoError::StreamUnderflow(self.tree.graph_id()))?;
            self.apply(&token)?;
            forward.write(&token)?;
            self.stats.forwarded += 1;
        }
        forward.flush()?;
        crate::debug_invariants!(&*self.tree);
        log::debug!(
            "scatter {}: {} vertices added, {} edges applied",
            self.tree.graph_id(),
            self.stats.added,
            self.stats.edges
        );
        Ok(self.stats)
    }
}
