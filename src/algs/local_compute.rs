//! Boundary tree of a single patch.
//!
//! Vertices are swept from the top of the tree order down. A union-find
//! over the local index space tracks the components of the part of the
//! patch swept so far; each component remembers the lowest tree node it
//! contains and the last vertex added to it. A vertex that touches no
//! component starts one, a vertex that joins two or more is a saddle, and
//! a vertex that extends exactly one is regular unless it is shared with
//! other patches, in which case it is kept as a node so the gather stages
//! can stitch patches together along it.

use crate::algs::stream::TokenSink;
use crate::algs::wire::Token;
use crate::data::{NodeHandle, SegmentationSink};
use crate::topo_error::TopoError;
use crate::topology::merge_tree::MergeTree;
use crate::topology::order::NodeKey;
use crate::topology::patch::PatchDomain;
use crate::{GlobalIndex, LocalIndex};

/// Counters of one local pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalStats {
    pub vertices: usize,
    pub nodes: usize,
    pub saddles: usize,
    pub segmented: usize,
}

#[derive(Debug, Clone, Copy)]
struct Component {
    lowest: NodeHandle,
    tail: LocalIndex,
    /// Regular tail not yet reported, as (representative, vertex). It is
    /// dropped if the tail ends up closing the component.
    pending: Option<(GlobalIndex, GlobalIndex)>,
}

impl Component {
    fn start(lowest: NodeHandle, tail: LocalIndex) -> Self {
        Self {
            lowest,
            tail,
            pending: None,
        }
    }

    fn report(&mut self, segmentation: &mut dyn SegmentationSink, stats: &mut LocalStats) {
        if let Some((rep, id)) = self.pending.take() {
            segmentation.add_to_segment(rep, id);
            stats.segmented += 1;
        }
    }
}

/// Sorted sweep with union-find.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalSortedUF;

impl LocalSortedUF {
    pub fn new() -> Self {
        Self
    }

    /// Build the boundary tree of `patch` into `tree`, which should be
    /// empty, and report every regular vertex to `segmentation`.
    ///
    /// Multiplicities are left as declared; see [`apply`](Self::apply) for
    /// the full local stage.
    pub fn compute<P: PatchDomain + ?Sized>(
        &self,
        patch: &P,
        tree: &mut MergeTree,
        segmentation: &mut dyn SegmentationSink,
    ) -> Result<LocalStats, TopoError> {
        let n = patch.len();
        let order = tree.order();
        let key = |l: LocalIndex| NodeKey::new(patch.value(l), patch.global_index(l));

        let mut sweep: Vec<LocalIndex> = (0..n as LocalIndex).collect();
        sweep.sort_unstable_by(|&a, &b| order.compare(key(b), key(a)));

        let mut parent: Vec<Option<LocalIndex>> = vec![None; n];
        let mut comps: Vec<Option<Component>> = vec![None; n];
        let mut neighbors = Vec::new();
        let mut roots: Vec<LocalIndex> = Vec::new();
        let mut stats = LocalStats {
            vertices: n,
            ..LocalStats::default()
        };

        for v in sweep {
            let vi = v as usize;
            parent[vi] = Some(v);
            patch.neighbors(v, &mut neighbors);
            roots.clear();
            for &u in &neighbors {
                if u as usize >= n {
                    return Err(TopoError::InvalidPatch(format!(
                        "vertex {v} has neighbor {u} outside a patch of {n} vertices"
                    )));
                }
                if parent[u as usize].is_some() && u != v {
                    let r = find(&mut parent, u);
                    if !roots.contains(&r) {
                        roots.push(r);
                    }
                }
            }

            let (id, value, m) = (patch.global_index(v), patch.value(v), patch.multiplicity(v));
            match roots.as_slice() {
                [] => {
                    let h = tree.add_node(id, value, m)?;
                    comps[vi] = Some(Component::start(h, v));
                    stats.nodes += 1;
                }
                &[r] => {
                    let c = component(&mut comps, r)?;
                    c.report(segmentation, &mut stats);
                    if m > 1 {
                        let h = tree.add_node(id, value, m)?;
                        tree.set_child(c.lowest, Some(h));
                        c.lowest = h;
                        stats.nodes += 1;
                    } else {
                        c.pending = Some((tree[c.lowest].id(), id));
                    }
                    c.tail = v;
                    parent[vi] = Some(r);
                }
                rs => {
                    let h = tree.add_node(id, value, m)?;
                    for &r in rs {
                        let mut c = *component(&mut comps, r)?;
                        c.report(segmentation, &mut stats);
                        tree.set_child(c.lowest, Some(h));
                        comps[r as usize] = None;
                        parent[r as usize] = Some(v);
                    }
                    comps[vi] = Some(Component::start(h, v));
                    stats.nodes += 1;
                    stats.saddles += 1;
                }
            }
        }

        // the last vertex of each component closes its tree; a pending tail
        // is that vertex, so it never reaches the segmentation
        for c in comps.into_iter().flatten() {
            let id = patch.global_index(c.tail);
            if !tree.contains(id) {
                let h = tree.add_node(id, patch.value(c.tail), patch.multiplicity(c.tail))?;
                tree.set_child(c.lowest, Some(h));
                stats.nodes += 1;
            }
        }
        log::trace!(
            "patch of {} vertices: {} nodes, {} saddles",
            stats.vertices,
            stats.nodes,
            stats.saddles
        );
        Ok(stats)
    }

    /// Full local stage: compute the tree, release this patch's share of
    /// every node and stream the tree to `downstream`, closed by EMPTY.
    pub fn apply<P: PatchDomain + ?Sized>(
        &self,
        patch: &P,
        tree: &mut MergeTree,
        segmentation: &mut dyn SegmentationSink,
        downstream: &mut dyn TokenSink,
    ) -> Result<LocalStats, TopoError> {
        let stats = self.compute(patch, tree, segmentation)?;
        let handles: Vec<NodeHandle> = tree.iter().map(|(h, _)| h).collect();
        for h in handles {
            tree.finalize(h)?;
        }
        tree.emit(downstream)?;
        downstream.write(&Token::Empty)?;
        downstream.flush()?;
        Ok(stats)
    }
}

/// Root of `x` with path compression.
fn find(parent: &mut [Option<LocalIndex>], start: LocalIndex) -> LocalIndex {
    let mut root = start;
    while let Some(p) = parent[root as usize] {
        if p == root {
            break;
        }
        root = p;
    }
    let mut x = start;
    while x != root {
        let Some(next) = parent[x as usize] else {
            break;
        };
        parent[x as usize] = Some(root);
        x = next;
    }
    root
}

fn component(comps: &mut [Option<Component>], root: LocalIndex) -> Result<&mut Component, TopoError> {
    comps[root as usize]
        .as_mut()
        .ok_or(TopoError::UnknownVertex(GlobalIndex::from(root)))
}
