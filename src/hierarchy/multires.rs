//! Multi-resolution hierarchy over a [`CriticalPointGraph`].
//!
//! Leaf branches are cancelled in metric order. Each cancellation removes
//! one to three arcs and adds at most one, and is recorded as a
//! [`Substitution`]. In recoverable mode the recorded sequence can be
//! replayed one step at a time in either direction: `coarsen` applies
//! substitution `level` and `refine` undoes it.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::data::NodeHandle;
use crate::hierarchy::metrics::ArcMetric;
use crate::topo_error::TopoError;
use crate::topology::graph::CriticalPointGraph;
use crate::topology::node::{TreeType, UNSET_PERSISTENCE};
use crate::topology::order::NodeKey;
use crate::config::{HierarchyMode, HierarchyOptions, HierarchyType};
use crate::{FunctionType, GlobalIndex};

/// A pending cancellation of the arc between a leaf and its neighbor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cancellation {
    pub persistence: FunctionType,
    pub extremum: NodeHandle,
    pub saddle: NodeHandle,
    extremum_key: NodeKey,
    saddle_key: NodeKey,
}

impl Cancellation {
    pub fn new(
        persistence: FunctionType,
        extremum: NodeHandle,
        extremum_key: NodeKey,
        saddle: NodeHandle,
        saddle_key: NodeKey,
    ) -> Self {
        Self {
            persistence,
            extremum,
            saddle,
            extremum_key,
            saddle_key,
        }
    }

    pub fn extremum_key(&self) -> NodeKey {
        self.extremum_key
    }

    pub fn saddle_key(&self) -> NodeKey {
        self.saddle_key
    }
}

/// One recorded simplification step.
#[derive(Debug, Clone, PartialEq)]
pub struct Substitution {
    pub persistence: FunctionType,
    pub extremum: NodeHandle,
    pub saddle: NodeHandle,
    /// Arcs removed by the step, the extremum arc first.
    pub outgoing: Vec<(NodeHandle, NodeHandle)>,
    /// Arc added by the step.
    pub incoming: Option<(NodeHandle, NodeHandle)>,
    pub cancels_extremum: bool,
    pub cancels_saddle: bool,
}

/// Queue entry ordered by [`ArcMetric::greater`], reversed so that the top
/// of the max-heap is the next cancellation to perform.
struct Ranked<'m> {
    metric: &'m dyn ArcMetric,
    cancellation: Cancellation,
}

impl Ord for Ranked<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        if self.metric.greater(&self.cancellation, &other.cancellation) {
            Ordering::Less
        } else if self.metric.greater(&other.cancellation, &self.cancellation) {
            Ordering::Greater
        } else {
            Ordering::Equal
        }
    }
}

impl PartialOrd for Ranked<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Ranked<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked<'_> {}

struct CancellationQueue<'m> {
    metric: &'m dyn ArcMetric,
    heap: BinaryHeap<Ranked<'m>>,
}

impl<'m> CancellationQueue<'m> {
    fn new(metric: &'m dyn ArcMetric) -> Self {
        Self {
            metric,
            heap: BinaryHeap::new(),
        }
    }

    fn push(&mut self, cancellation: Cancellation) {
        self.heap.push(Ranked {
            metric: self.metric,
            cancellation,
        });
    }

    fn pop(&mut self) -> Option<Cancellation> {
        self.heap.pop().map(|r| r.cancellation)
    }
}

#[derive(Debug)]
pub struct PersistenceHierarchy {
    graph: CriticalPointGraph,
    substitutions: Vec<Substitution>,
    /// Number of substitutions currently applied.
    level: usize,
    persistence: FunctionType,
    kind: HierarchyType,
    metric: Option<Box<dyn ArcMetric>>,
}

impl PersistenceHierarchy {
    pub fn new(graph: CriticalPointGraph) -> Self {
        Self {
            graph,
            substitutions: Vec::new(),
            level: 0,
            persistence: -1.0,
            kind: HierarchyType::Maxima,
            metric: None,
        }
    }

    pub fn graph(&self) -> &CriticalPointGraph {
        &self.graph
    }

    pub fn into_graph(self) -> CriticalPointGraph {
        self.graph
    }

    /// Recorded substitutions, in cancellation order.
    pub fn substitutions(&self) -> &[Substitution] {
        &self.substitutions
    }

    pub fn len(&self) -> usize {
        self.substitutions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.substitutions.is_empty()
    }

    pub fn level(&self) -> usize {
        self.level
    }

    /// Persistence of the current resolution.
    pub fn persistence(&self) -> FunctionType {
        self.persistence
    }

    pub fn kind(&self) -> HierarchyType {
        self.kind
    }

    /// Metric of the last construction.
    pub fn metric(&self) -> Option<&dyn ArcMetric> {
        self.metric.as_deref()
    }

    /// Build the hierarchy with the metric named in `options`.
    pub fn construct(&mut self, options: &HierarchyOptions) -> Result<usize, TopoError> {
        self.construct_with_metric(options.metric.into_metric(), options)
    }

    /// Cancel leaf branches in metric order until the queue is empty or the
    /// next value exceeds `options.threshold`. In recoverable mode the
    /// graph is left at full resolution with every step recorded. Returns
    /// the number of cancellations performed.
    pub fn construct_with_metric(
        &mut self,
        metric: Box<dyn ArcMetric>,
        options: &HierarchyOptions,
    ) -> Result<usize, TopoError> {
        let kind = options.kind;
        if kind == HierarchyType::Mixed {
            if metric.needs_representatives() {
                return Err(TopoError::MixedHierarchy(metric.name()));
            }
            log::warn!("building mixed hierarchy with `{}`", metric.name());
        }
        self.reset()?;
        self.kind = kind;
        if metric.needs_representatives() {
            self.initialize_representatives(kind)?;
        }

        let mut queue = CancellationQueue::new(metric.as_ref());
        for (h, n) in self.graph.iter() {
            if !n.is_active() || n.tree_type() != TreeType::Leaf {
                continue;
            }
            if let [up] = n.ups() {
                if kind != HierarchyType::Maxima {
                    queue.push(candidate(&self.graph, metric.as_ref(), h, *up)?);
                }
            } else if let [down] = n.downs() {
                if kind != HierarchyType::Minima {
                    queue.push(candidate(&self.graph, metric.as_ref(), h, *down)?);
                }
            }
        }

        let mut count = 0;
        while let Some(top) = queue.pop() {
            if self.is_stale(&top) {
                continue;
            }
            if top.persistence > options.threshold {
                break;
            }
            let sub = self.cancel_branch(&top, options.mode)?;
            count += 1;
            if let Some((a, b)) = sub.incoming {
                for (x, y) in [(a, b), (b, a)] {
                    if self.accepts_leaf(x, y, kind) {
                        queue.push(candidate(&self.graph, metric.as_ref(), x, y)?);
                        break;
                    }
                }
            }
        }

        if options.mode == HierarchyMode::Recoverable {
            self.level = self.substitutions.len();
            self.persistence = UNSET_PERSISTENCE;
            self.update_persistence_level(0)?;
        } else {
            self.level = 0;
            self.persistence = -1.0;
        }
        log::info!(
            "{} hierarchy ({:?}, {:?}): {} cancellations, {} recorded",
            metric.name(),
            kind,
            options.mode,
            count,
            self.substitutions.len()
        );
        crate::debug_invariants!(&self.graph);
        self.metric = Some(metric);
        Ok(count)
    }

    /// Return to full resolution and forget any previous construction.
    fn reset(&mut self) -> Result<(), TopoError> {
        if self.substitutions.is_empty() {
            return Ok(());
        }
        self.update_persistence_level(0)?;
        for h in self.graph.handles() {
            let node = self.graph.node_mut(h)?;
            node.persistence = UNSET_PERSISTENCE;
            node.parent = None;
        }
        self.substitutions.clear();
        self.level = 0;
        Ok(())
    }

    fn is_stale(&self, c: &Cancellation) -> bool {
        let (Ok(e), Ok(s)) = (self.graph.node(c.extremum), self.graph.node(c.saddle)) else {
            return true;
        };
        !e.is_active()
            || !s.is_active()
            || s.is_cancelled()
            || e.tree_type() != TreeType::Leaf
            || !self.graph.has_arc(c.extremum, c.saddle)
    }

    /// Whether `x` is an active leaf that `kind` may cancel against `y`.
    fn accepts_leaf(&self, x: NodeHandle, y: NodeHandle, kind: HierarchyType) -> bool {
        let (Ok(nx), Ok(ny)) = (self.graph.node(x), self.graph.node(y)) else {
            return false;
        };
        if !nx.is_active() || nx.tree_type() != TreeType::Leaf {
            return false;
        }
        if nx.key() > ny.key() {
            kind != HierarchyType::Minima
        } else {
            kind != HierarchyType::Maxima
        }
    }

    /// Point every node at the most extreme node of its subtree.
    fn initialize_representatives(&mut self, kind: HierarchyType) -> Result<(), TopoError> {
        let maxima = match kind {
            HierarchyType::Maxima => true,
            HierarchyType::Minima => false,
            HierarchyType::Mixed => return Err(TopoError::MixedHierarchy("representatives")),
        };
        let mut order = self.graph.handles();
        order.sort_by_cached_key(|&h| self.graph[h].key());
        if maxima {
            order.reverse();
        }
        for h in order {
            let node = &self.graph[h];
            let side = if maxima { node.ups() } else { node.downs() };
            let mut rep = h;
            let mut rep_key = node.key();
            for &n in side {
                let r = self.graph[n].representative().unwrap_or(n);
                let k = self.graph.key(r)?;
                if (maxima && k > rep_key) || (!maxima && k < rep_key) {
                    rep = r;
                    rep_key = k;
                }
            }
            self.graph.node_mut(h)?.representative = Some(rep);
        }
        Ok(())
    }

    /// Remove the branch of `c`, marking the cancelled nodes according to
    /// `mode`.
    ///
    /// Cancelled nodes are parented to the neighbor on the extremum's side:
    /// `up` for maxima and `down` for minima when a saddle is spliced out,
    /// and the extremum itself when the saddle was already regular, for
    /// minima as well as maxima.
    fn cancel_branch(
        &mut self,
        c: &Cancellation,
        mode: HierarchyMode,
    ) -> Result<Substitution, TopoError> {
        let (ext, sad) = (c.extremum, c.saddle);
        let upper = c.extremum_key() > c.saddle_key();
        let was_interior = self.graph.tree_type(sad)? == TreeType::Interior;
        self.graph.remove_arc(ext, sad)?;

        let mut sub = Substitution {
            persistence: c.persistence,
            extremum: ext,
            saddle: sad,
            outgoing: vec![(ext, sad)],
            incoming: None,
            cancels_extremum: true,
            cancels_saddle: false,
        };
        let node = self.graph.node(sad)?;
        let (ups, downs) = (node.ups().to_vec(), node.downs().to_vec());
        let id = node.id();
        let first = |list: &[NodeHandle]| -> Result<NodeHandle, TopoError> {
            list.first().copied().ok_or(TopoError::UnsupportedSaddle {
                id,
                degree: ups.len() + downs.len(),
            })
        };

        let parent = if was_interior {
            // the saddle was regular: the extremum slides down onto its neighbor
            let other = if upper { first(&downs)? } else { first(&ups)? };
            self.graph.remove_arc(sad, other)?;
            self.graph.add_arc(ext, other)?;
            sub.outgoing.push((sad, other));
            sub.incoming = Some((ext, other));
            sub.cancels_extremum = false;
            sub.cancels_saddle = true;
            Some(ext)
        } else {
            match TreeType::classify(ups.len(), downs.len()) {
                TreeType::Interior => {
                    let (up, down) = (first(&ups)?, first(&downs)?);
                    self.graph.remove_arc(sad, up)?;
                    self.graph.remove_arc(sad, down)?;
                    self.graph.add_arc(up, down)?;
                    sub.outgoing.push((sad, up));
                    sub.outgoing.push((sad, down));
                    sub.incoming = Some((up, down));
                    sub.cancels_saddle = true;
                    Some(if upper { up } else { down })
                }
                TreeType::Root => {
                    sub.cancels_saddle = true;
                    None
                }
                TreeType::Leaf | TreeType::Branch => {
                    let (near, far) = if upper { (&ups, &downs) } else { (&downs, &ups) };
                    near.first().or(far.first()).copied()
                }
            }
        };

        let cancelled = [
            (sub.cancels_extremum, ext),
            (sub.cancels_saddle, sad),
        ];
        for (flag, h) in cancelled {
            if !flag {
                continue;
            }
            if mode == HierarchyMode::Destructive {
                self.graph.remove_node(h)?;
            } else {
                let n = self.graph.node_mut(h)?;
                n.persistence = c.persistence;
                n.parent = parent;
                n.active = false;
            }
        }
        log::trace!(
            "cancel {:?} -> {:?} at {}",
            c.extremum_key(),
            c.saddle_key(),
            c.persistence
        );
        if mode == HierarchyMode::Recoverable {
            self.substitutions.push(sub.clone());
        }
        Ok(sub)
    }

    /// Move to `level` applied substitutions, clamped to the recorded range,
    /// one step at a time.
    pub fn update_persistence_level(&mut self, level: usize) -> Result<(), TopoError> {
        let effective = level.min(self.substitutions.len());
        while self.level > 0 && self.level > effective {
            self.level -= 1;
            self.refine_graph(self.level)?;
            self.persistence = if self.level == 0 {
                (self.substitutions[0].persistence - 1.0).min(0.0)
            } else {
                self.substitutions[self.level - 1].persistence
            };
        }
        while self.level < effective {
            self.coarsen_graph(self.level)?;
            self.persistence = self.substitutions[self.level].persistence;
            self.level += 1;
        }
        Ok(())
    }

    /// Move to the coarsest level whose substitutions all have persistence
    /// at most `p`.
    pub fn update_persistence(&mut self, p: FunctionType) -> Result<(), TopoError> {
        let mut level = self.level.min(self.substitutions.len());
        while level > 0 && self.substitutions[level - 1].persistence > p {
            level -= 1;
        }
        while level < self.substitutions.len() && self.substitutions[level].persistence <= p {
            level += 1;
        }
        self.update_persistence_level(level)
    }

    /// Undo substitution `level`.
    fn refine_graph(&mut self, level: usize) -> Result<(), TopoError> {
        let sub = self.substitutions[level].clone();
        for h in [sub.extremum, sub.saddle] {
            self.graph.node_mut(h)?.active = true;
        }
        if let Some((a, b)) = sub.incoming {
            if let Err(e) = self.graph.remove_arc(a, b) {
                log::warn!("refining level {level}: {e}");
            }
        }
        for (a, b) in sub.outgoing {
            self.graph.add_arc(a, b)?;
        }
        Ok(())
    }

    /// Apply substitution `level`.
    fn coarsen_graph(&mut self, level: usize) -> Result<(), TopoError> {
        let sub = self.substitutions[level].clone();
        for (flag, h) in [
            (sub.cancels_extremum, sub.extremum),
            (sub.cancels_saddle, sub.saddle),
        ] {
            if flag {
                self.graph.node_mut(h)?.active = false;
            }
        }
        for (a, b) in sub.outgoing {
            if let Err(e) = self.graph.remove_arc(a, b) {
                log::warn!("coarsening level {level}: {e}");
            }
        }
        if let Some((a, b)) = sub.incoming {
            self.graph.add_arc(a, b)?;
        }
        Ok(())
    }

    /// Active node `id` was merged into at the current level.
    pub fn find_active_node(&self, id: GlobalIndex) -> Option<NodeHandle> {
        self.graph.find_active_node(id)
    }

    /// Active leaf `id` was merged into at the current level.
    pub fn find_active_leaf(&self, id: GlobalIndex) -> Option<NodeHandle> {
        self.graph.find_active_leaf(id)
    }
}

fn candidate(
    graph: &CriticalPointGraph,
    metric: &dyn ArcMetric,
    extremum: NodeHandle,
    saddle: NodeHandle,
) -> Result<Cancellation, TopoError> {
    Ok(Cancellation::new(
        metric.evaluate(graph, extremum, saddle),
        extremum,
        graph.key(extremum)?,
        saddle,
        graph.key(saddle)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::metrics::MetricKind;

    /// Comb of saddles 1..=4 above root 0 with maxima 5..=9; the maxima
    /// have persistence 1, 2, 3, 4 and 60.
    fn comb() -> CriticalPointGraph {
        let mut g = CriticalPointGraph::new();
        let values = [0.0, 10.0, 20.0, 30.0, 40.0, 11.0, 22.0, 33.0, 44.0, 100.0];
        for (id, &v) in values.iter().enumerate() {
            g.add_node(id as GlobalIndex, v);
        }
        for (a, b) in [(0, 1), (1, 2), (2, 3), (3, 4), (1, 5), (2, 6), (3, 7), (4, 8), (4, 9)] {
            g.add_arc_by_id(a, b).unwrap();
        }
        g
    }

    fn id(h: &PersistenceHierarchy, handle: Option<NodeHandle>) -> Option<GlobalIndex> {
        handle.map(|x| h.graph()[x].id())
    }

    #[test]
    fn queue_pops_in_metric_order() {
        let g = comb();
        let metric = MetricKind::Absolute.into_metric();
        let mut queue = CancellationQueue::new(metric.as_ref());
        for (leaf, saddle) in [(8, 4), (5, 1), (9, 4), (7, 3), (6, 2)] {
            let (x, y) = (g.find(leaf).unwrap(), g.find(saddle).unwrap());
            queue.push(candidate(&g, metric.as_ref(), x, y).unwrap());
        }
        let mut popped = Vec::new();
        while let Some(c) = queue.pop() {
            popped.push((g[c.extremum].id(), c.persistence));
        }
        assert_eq!(
            popped,
            vec![(5, 1.0), (6, 2.0), (7, 3.0), (8, 4.0), (9, 60.0)]
        );
    }

    #[test]
    fn regular_saddle_is_parented_to_its_extremum() {
        // chain 0 < 1 < 2: cancelling either end leaves 1 regular
        for (ext, other) in [(0, 2), (2, 0)] {
            let mut g = CriticalPointGraph::new();
            for (id, v) in [(0, 1.0), (1, 5.0), (2, 9.0)] {
                g.add_node(id, v);
            }
            g.add_arc_by_id(0, 1).unwrap();
            g.add_arc_by_id(1, 2).unwrap();
            let (x, s) = (g.find(ext).unwrap(), g.find(1).unwrap());
            let metric = MetricKind::Absolute.into_metric();
            let c = candidate(&g, metric.as_ref(), x, s).unwrap();

            let mut h = PersistenceHierarchy::new(g);
            let sub = h.cancel_branch(&c, HierarchyMode::Recoverable).unwrap();
            assert!(sub.cancels_saddle && !sub.cancels_extremum);
            assert_eq!(id(&h, sub.incoming.map(|(a, _)| a)), Some(ext));
            assert_eq!(id(&h, sub.incoming.map(|(_, b)| b)), Some(other));
            assert!(!h.graph()[s].is_active());
            assert_eq!(id(&h, h.graph()[s].parent()), Some(ext));
            assert_eq!(h.graph().active_arcs(), vec![(0, 2)]);
        }
    }

    #[test]
    fn recoverable_construction_records_every_step() {
        let mut h = PersistenceHierarchy::new(comb());
        let arcs = h.graph().active_arcs();
        let n = h.construct(&HierarchyOptions::default()).unwrap();
        assert_eq!(n, 5);
        assert_eq!(h.len(), 5);
        assert_eq!(h.level(), 0);
        assert_eq!(h.graph().active_arcs(), arcs);
        let p: Vec<_> = h.substitutions().iter().map(|s| s.persistence).collect();
        assert_eq!(p, vec![1.0, 2.0, 3.0, 4.0, 100.0]);
    }

    #[test]
    fn coarsening_merges_branches() {
        let mut h = PersistenceHierarchy::new(comb());
        h.construct(&HierarchyOptions::default()).unwrap();
        h.update_persistence_level(2).unwrap();
        assert_eq!(h.persistence(), 2.0);
        assert_eq!(
            h.graph().active_arcs(),
            vec![(0, 3), (3, 4), (3, 7), (4, 8), (4, 9)]
        );
        h.update_persistence(3.5).unwrap();
        assert_eq!(h.level(), 3);
        h.update_persistence(0.5).unwrap();
        assert_eq!(h.level(), 0);
        h.update_persistence_level(99).unwrap();
        assert_eq!(h.level(), 5);
        assert!(h.graph().active_arcs().is_empty());
    }

    #[test]
    fn replay_is_lossless() {
        let mut h = PersistenceHierarchy::new(comb());
        h.construct(&HierarchyOptions::default()).unwrap();
        h.update_persistence_level(3).unwrap();
        let arcs = h.graph().active_arcs();
        let nodes: Vec<_> = h.graph().active_handles();
        h.update_persistence_level(0).unwrap();
        h.update_persistence_level(3).unwrap();
        assert_eq!(h.graph().active_arcs(), arcs);
        assert_eq!(h.graph().active_handles(), nodes);
    }

    #[test]
    fn active_node_follows_parents() {
        let mut h = PersistenceHierarchy::new(comb());
        h.construct(&HierarchyOptions::default()).unwrap();
        // maximum 8 is removed by the fourth substitution
        h.update_persistence_level(1).unwrap();
        assert_eq!(id(&h, h.find_active_node(8)), Some(8));
        h.update_persistence_level(4).unwrap();
        assert_eq!(id(&h, h.find_active_node(8)), Some(9));
        assert_eq!(id(&h, h.find_active_node(5)), Some(9));
        assert_eq!(id(&h, h.find_active_leaf(1)), Some(9));
    }

    #[test]
    fn threshold_stops_construction() {
        let mut h = PersistenceHierarchy::new(comb());
        let opts = HierarchyOptions {
            threshold: 2.5,
            mode: HierarchyMode::Recorded,
            ..HierarchyOptions::default()
        };
        assert_eq!(h.construct(&opts).unwrap(), 2);
        assert!(h.is_empty());
        assert!(!h.graph().get(5).unwrap().is_active());
        assert_eq!(h.graph().active_arcs(), vec![(0, 3), (3, 4), (3, 7), (4, 8), (4, 9)]);
    }

    #[test]
    fn destructive_mode_deletes_nodes() {
        let mut h = PersistenceHierarchy::new(comb());
        let opts = HierarchyOptions {
            threshold: 3.5,
            mode: HierarchyMode::Destructive,
            ..HierarchyOptions::default()
        };
        h.construct(&opts).unwrap();
        assert_eq!(h.graph().len(), 4);
        assert!(h.graph().get(1).is_none());
    }

    #[test]
    fn relevance_on_mixed_hierarchy_is_rejected() {
        let mut h = PersistenceHierarchy::new(comb());
        let opts = HierarchyOptions {
            kind: HierarchyType::Mixed,
            metric: MetricKind::MaximaRelevance,
            ..HierarchyOptions::default()
        };
        assert_eq!(
            h.construct(&opts),
            Err(TopoError::MixedHierarchy("Maxima Relevance"))
        );
    }

    #[test]
    fn regular_saddle_slides_extremum() {
        // 2 (5.0) - 1 (3.0) - 0 (1.0): node 1 is interior
        let mut g = CriticalPointGraph::new();
        for (i, v) in [1.0, 3.0, 5.0].into_iter().enumerate() {
            g.add_node(i as GlobalIndex, v);
        }
        g.add_arc_by_id(0, 1).unwrap();
        g.add_arc_by_id(1, 2).unwrap();
        let mut h = PersistenceHierarchy::new(g);
        h.construct(&HierarchyOptions::default()).unwrap();
        let first = &h.substitutions()[0];
        assert!(first.cancels_saddle && !first.cancels_extremum);
        assert_eq!(first.persistence, 2.0);
        h.update_persistence_level(1).unwrap();
        assert_eq!(h.graph().active_arcs(), vec![(0, 2)]);
        assert_eq!(id(&h, h.find_active_node(1)), Some(2));
    }
}
