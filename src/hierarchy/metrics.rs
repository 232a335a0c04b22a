//! Arc metrics: how important a cancellation is.
//!
//! A metric assigns a value to the arc between a leaf and its saddle, orders
//! two pending cancellations, and describes the life time of a surviving
//! node for export. Lower values are cancelled first.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::FunctionType;
use crate::data::NodeHandle;
use crate::hierarchy::multires::Cancellation;
use crate::topology::graph::CriticalPointGraph;
use crate::topology::node::{GraphNode, MorseType, TreeType, UNSET_PERSISTENCE};

/// Interval of the metric over which a node exists, plus the direction in
/// which the interval is read (1 for increasing, 0 for decreasing).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LifeTime {
    pub low: FunctionType,
    pub high: FunctionType,
    pub direction: u8,
}

impl LifeTime {
    pub fn new(low: FunctionType, high: FunctionType, direction: u8) -> Self {
        Self {
            low,
            high,
            direction,
        }
    }
}

pub trait ArcMetric: Send + Sync + fmt::Debug {
    /// Name recorded with exported sequences.
    fn name(&self) -> &'static str;

    /// Value of cancelling the arc between `u` and `v`, one of which is a
    /// leaf. Arcs that cannot be cancelled yet evaluate to
    /// [`UNSET_PERSISTENCE`].
    fn evaluate(&self, graph: &CriticalPointGraph, u: NodeHandle, v: NodeHandle) -> FunctionType;

    fn life_time(&self, graph: &CriticalPointGraph, node: &GraphNode) -> LifeTime {
        let _ = graph;
        LifeTime::new(-0.001, node.persistence(), 1)
    }

    /// Whether `c0` should be cancelled after `c1`.
    ///
    /// Ties on the value go to the lower extremum for maxima and the higher
    /// one for minima.
    fn greater(&self, c0: &Cancellation, c1: &Cancellation) -> bool {
        if c0.persistence != c1.persistence {
            return c0.persistence > c1.persistence;
        }
        (c0.extremum_key() > c0.saddle_key()) == (c0.extremum_key() > c1.extremum_key())
    }

    /// Whether nodes must carry their representative before evaluation.
    fn needs_representatives(&self) -> bool {
        false
    }
}

fn range(graph: &CriticalPointGraph) -> FunctionType {
    graph.max_value() - graph.min_value()
}

fn relative(value: FunctionType, range: FunctionType) -> FunctionType {
    if value == UNSET_PERSISTENCE {
        value
    } else if range > 0.0 {
        value / range
    } else {
        0.0
    }
}

fn is_leaf(graph: &CriticalPointGraph, h: NodeHandle) -> bool {
    graph[h].tree_type() == TreeType::Leaf
}

fn representative_value(graph: &CriticalPointGraph, h: NodeHandle) -> FunctionType {
    let node = &graph[h];
    node.representative()
        .and_then(|r| graph.node(r).ok())
        .map_or(node.value(), |r| r.value())
}

/// `|f(u) - f(v)|`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AbsolutePersistence;

impl ArcMetric for AbsolutePersistence {
    fn name(&self) -> &'static str {
        "Absolute Persistence"
    }

    fn evaluate(&self, graph: &CriticalPointGraph, u: NodeHandle, v: NodeHandle) -> FunctionType {
        (graph[u].value() - graph[v].value()).abs()
    }
}

/// Absolute persistence over the value range.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelativePersistence;

impl ArcMetric for RelativePersistence {
    fn name(&self) -> &'static str {
        "Relative Persistence"
    }

    fn evaluate(&self, graph: &CriticalPointGraph, u: NodeHandle, v: NodeHandle) -> FunctionType {
        relative((graph[u].value() - graph[v].value()).abs(), range(graph))
    }
}

/// Relative persistence of `ln(1 + f - min)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogRelativePersistence;

impl ArcMetric for LogRelativePersistence {
    fn name(&self) -> &'static str {
        "Log-Relative Persistence"
    }

    fn evaluate(&self, graph: &CriticalPointGraph, u: NodeHandle, v: NodeHandle) -> FunctionType {
        let min = graph.min_value();
        let t = |f: FunctionType| (1.0 + f - min).ln();
        relative((t(graph[u].value()) - t(graph[v].value())).abs(), t(graph.max_value()))
    }
}

/// Cancels the branch with the highest saddle first; values are the
/// distance of the saddle below the global maximum.
#[derive(Debug, Clone, Copy, Default)]
pub struct HighestSaddleFirst;

impl HighestSaddleFirst {
    fn raw(graph: &CriticalPointGraph, u: NodeHandle, v: NodeHandle) -> FunctionType {
        let max = graph.max_value();
        let (fu, fv) = (graph[u].value(), graph[v].value());
        match (is_leaf(graph, u), is_leaf(graph, v)) {
            (true, true) => max - fu.min(fv),
            (false, true) => max - fu,
            (true, false) => max - fv,
            (false, false) => UNSET_PERSISTENCE,
        }
    }
}

fn highest_saddle_greater(c0: &Cancellation, c1: &Cancellation) -> bool {
    if c0.persistence != c1.persistence {
        return c0.persistence > c1.persistence;
    }
    if c0.saddle != c1.saddle {
        return c0.saddle_key() < c1.saddle_key();
    }
    (c0.extremum_key() > c0.saddle_key()) == (c0.extremum_key() > c1.extremum_key())
}

impl ArcMetric for HighestSaddleFirst {
    fn name(&self) -> &'static str {
        "High Threshold"
    }

    fn evaluate(&self, graph: &CriticalPointGraph, u: NodeHandle, v: NodeHandle) -> FunctionType {
        Self::raw(graph, u, v)
    }

    fn life_time(&self, graph: &CriticalPointGraph, node: &GraphNode) -> LifeTime {
        let low = node
            .downs()
            .first()
            .map_or(graph.min_value(), |&d| graph[d].value());
        LifeTime::new(low, node.value(), 0)
    }

    fn greater(&self, c0: &Cancellation, c1: &Cancellation) -> bool {
        highest_saddle_greater(c0, c1)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HighestSaddleFirstRelative;

impl ArcMetric for HighestSaddleFirstRelative {
    fn name(&self) -> &'static str {
        "High Relative Threshold"
    }

    fn evaluate(&self, graph: &CriticalPointGraph, u: NodeHandle, v: NodeHandle) -> FunctionType {
        relative(HighestSaddleFirst::raw(graph, u, v), range(graph))
    }

    fn life_time(&self, graph: &CriticalPointGraph, node: &GraphNode) -> LifeTime {
        let (max, r) = (graph.max_value(), range(graph));
        let high = node
            .downs()
            .first()
            .map_or(1.0, |&d| relative(max - graph[d].value(), r));
        LifeTime::new(relative(max - node.value(), r), high, 0)
    }

    fn greater(&self, c0: &Cancellation, c1: &Cancellation) -> bool {
        highest_saddle_greater(c0, c1)
    }
}

/// Cancels the branch with the lowest saddle first; values are the height
/// of the saddle above the global minimum.
#[derive(Debug, Clone, Copy, Default)]
pub struct LowestSaddleFirst;

impl LowestSaddleFirst {
    fn raw(graph: &CriticalPointGraph, u: NodeHandle, v: NodeHandle) -> FunctionType {
        let min = graph.min_value();
        if is_leaf(graph, u) {
            graph[v].value() - min
        } else if is_leaf(graph, v) {
            graph[u].value() - min
        } else {
            UNSET_PERSISTENCE
        }
    }
}

fn lowest_saddle_greater(c0: &Cancellation, c1: &Cancellation) -> bool {
    if c0.persistence != c1.persistence {
        return c0.persistence > c1.persistence;
    }
    c0.saddle_key() > c1.saddle_key()
}

impl ArcMetric for LowestSaddleFirst {
    fn name(&self) -> &'static str {
        "Low Threshold"
    }

    fn evaluate(&self, graph: &CriticalPointGraph, u: NodeHandle, v: NodeHandle) -> FunctionType {
        Self::raw(graph, u, v)
    }

    fn life_time(&self, graph: &CriticalPointGraph, node: &GraphNode) -> LifeTime {
        let high = node
            .ups()
            .first()
            .map_or(graph.max_value(), |&u| graph[u].value());
        LifeTime::new(node.value(), high, 1)
    }

    fn greater(&self, c0: &Cancellation, c1: &Cancellation) -> bool {
        lowest_saddle_greater(c0, c1)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LowestSaddleFirstRelative;

impl ArcMetric for LowestSaddleFirstRelative {
    fn name(&self) -> &'static str {
        "Low Relative Threshold"
    }

    fn evaluate(&self, graph: &CriticalPointGraph, u: NodeHandle, v: NodeHandle) -> FunctionType {
        relative(LowestSaddleFirst::raw(graph, u, v), range(graph))
    }

    fn greater(&self, c0: &Cancellation, c1: &Cancellation) -> bool {
        lowest_saddle_greater(c0, c1)
    }
}

/// Drop of the saddle below the highest maximum of its subtree, relative
/// to that maximum's height.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaximaRelevance;

fn maxima_relevance(graph: &CriticalPointGraph, saddle: NodeHandle) -> FunctionType {
    let s = &graph[saddle];
    if s.downs().is_empty() {
        return 1.0;
    }
    let top = representative_value(graph, saddle);
    let span = top - graph.min_value();
    if span > 0.0 { (top - s.value()) / span } else { 0.0 }
}

fn minima_relevance(graph: &CriticalPointGraph, saddle: NodeHandle) -> FunctionType {
    let s = &graph[saddle];
    if s.ups().is_empty() {
        return 1.0;
    }
    let bottom = representative_value(graph, saddle);
    let span = graph.max_value() - bottom;
    if span > 0.0 { (s.value() - bottom) / span } else { 0.0 }
}

fn relevance_life_time(graph: &CriticalPointGraph, node: &GraphNode) -> LifeTime {
    match node.downs().first() {
        None => LifeTime::new(1.0, 1.0, 1),
        Some(&d) => {
            let low = if node.tree_type() == TreeType::Leaf {
                0.0
            } else {
                node.persistence()
            };
            LifeTime::new(low, graph[d].persistence(), 1)
        }
    }
}

impl ArcMetric for MaximaRelevance {
    fn name(&self) -> &'static str {
        "Maxima Relevance"
    }

    fn evaluate(&self, graph: &CriticalPointGraph, u: NodeHandle, v: NodeHandle) -> FunctionType {
        if is_leaf(graph, u) {
            maxima_relevance(graph, v)
        } else if is_leaf(graph, v) {
            maxima_relevance(graph, u)
        } else {
            UNSET_PERSISTENCE
        }
    }

    fn life_time(&self, graph: &CriticalPointGraph, node: &GraphNode) -> LifeTime {
        relevance_life_time(graph, node)
    }

    fn needs_representatives(&self) -> bool {
        true
    }
}

/// Rise of the upper endpoint above the lowest minimum of its subtree,
/// relative to the remaining range.
#[derive(Debug, Clone, Copy, Default)]
pub struct MinimaRelevance;

impl ArcMetric for MinimaRelevance {
    fn name(&self) -> &'static str {
        "Minima Relevance"
    }

    fn evaluate(&self, graph: &CriticalPointGraph, u: NodeHandle, v: NodeHandle) -> FunctionType {
        let top = if graph[u].key() < graph[v].key() { v } else { u };
        let bottom = representative_value(graph, top);
        let span = graph.max_value() - bottom;
        if span > 0.0 {
            (graph[top].value() - bottom) / span
        } else {
            0.0
        }
    }

    fn life_time(&self, graph: &CriticalPointGraph, node: &GraphNode) -> LifeTime {
        match node.ups().first() {
            None => {
                // cancelled root branches keep their value, isolated nodes start at 0
                let low = if node.persistence() < 10.0 {
                    node.persistence()
                } else {
                    0.0
                };
                LifeTime::new(low, 1.0, 1)
            }
            Some(&u) => {
                let low = if node.tree_type() == TreeType::Leaf {
                    0.0
                } else {
                    node.persistence()
                };
                LifeTime::new(low, graph[u].persistence(), 1)
            }
        }
    }

    fn needs_representatives(&self) -> bool {
        true
    }
}

/// Maxima relevance for maxima, minima relevance for minima.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalThreshold;

impl ArcMetric for LocalThreshold {
    fn name(&self) -> &'static str {
        "Local Threshold"
    }

    fn evaluate(&self, graph: &CriticalPointGraph, u: NodeHandle, v: NodeHandle) -> FunctionType {
        let (leaf, saddle) = if is_leaf(graph, u) {
            (u, v)
        } else if is_leaf(graph, v) {
            (v, u)
        } else {
            return UNSET_PERSISTENCE;
        };
        if graph[leaf].morse_type() == MorseType::Maximum {
            maxima_relevance(graph, saddle)
        } else {
            minima_relevance(graph, saddle)
        }
    }

    fn life_time(&self, graph: &CriticalPointGraph, node: &GraphNode) -> LifeTime {
        relevance_life_time(graph, node)
    }

    fn needs_representatives(&self) -> bool {
        true
    }
}

/// Serializable name of a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    #[default]
    Absolute,
    Relative,
    LogRelative,
    HighestSaddleFirst,
    HighestSaddleFirstRelative,
    LowestSaddleFirst,
    LowestSaddleFirstRelative,
    MaximaRelevance,
    MinimaRelevance,
    LocalThreshold,
}

impl MetricKind {
    pub const ALL: [MetricKind; 10] = [
        MetricKind::Absolute,
        MetricKind::Relative,
        MetricKind::LogRelative,
        MetricKind::HighestSaddleFirst,
        MetricKind::HighestSaddleFirstRelative,
        MetricKind::LowestSaddleFirst,
        MetricKind::LowestSaddleFirstRelative,
        MetricKind::MaximaRelevance,
        MetricKind::MinimaRelevance,
        MetricKind::LocalThreshold,
    ];

    pub fn into_metric(self) -> Box<dyn ArcMetric> {
        match self {
            MetricKind::Absolute => Box::new(AbsolutePersistence),
            MetricKind::Relative => Box::new(RelativePersistence),
            MetricKind::LogRelative => Box::new(LogRelativePersistence),
            MetricKind::HighestSaddleFirst => Box::new(HighestSaddleFirst),
            MetricKind::HighestSaddleFirstRelative => Box::new(HighestSaddleFirstRelative),
            MetricKind::LowestSaddleFirst => Box::new(LowestSaddleFirst),
            MetricKind::LowestSaddleFirstRelative => Box::new(LowestSaddleFirstRelative),
            MetricKind::MaximaRelevance => Box::new(MaximaRelevance),
            MetricKind::MinimaRelevance => Box::new(MinimaRelevance),
            MetricKind::LocalThreshold => Box::new(LocalThreshold),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::order::NodeKey;

    /// Maximum 0 (9.0) and maximum 1 (7.0) joining at saddle 2 (4.0) above
    /// root 3 (0.0).
    fn fork() -> (CriticalPointGraph, [NodeHandle; 4]) {
        let mut g = CriticalPointGraph::new();
        let hs = [
            g.add_node(0, 9.0),
            g.add_node(1, 7.0),
            g.add_node(2, 4.0),
            g.add_node(3, 0.0),
        ];
        g.add_arc(hs[0], hs[2]).unwrap();
        g.add_arc(hs[1], hs[2]).unwrap();
        g.add_arc(hs[2], hs[3]).unwrap();
        (g, hs)
    }

    fn cancellation(g: &CriticalPointGraph, p: FunctionType, e: NodeHandle, s: NodeHandle) -> Cancellation {
        Cancellation::new(p, e, g[e].key(), s, g[s].key())
    }

    #[test]
    fn persistence_metrics() {
        let (g, [a, b, s, _]) = fork();
        assert_eq!(AbsolutePersistence.evaluate(&g, b, s), 3.0);
        assert_eq!(RelativePersistence.evaluate(&g, b, s), 3.0 / 9.0);
        let log = LogRelativePersistence.evaluate(&g, a, s);
        assert!((log - (10.0f32.ln() - 5.0f32.ln()) / 10.0f32.ln()).abs() < 1e-6);
    }

    #[test]
    fn threshold_metrics_need_a_leaf() {
        let (g, [a, b, s, r]) = fork();
        assert_eq!(HighestSaddleFirst.evaluate(&g, b, s), 5.0);
        assert_eq!(LowestSaddleFirst.evaluate(&g, a, s), 4.0);
        assert_eq!(HighestSaddleFirst.evaluate(&g, s, s), UNSET_PERSISTENCE);
        assert_eq!(LowestSaddleFirst.evaluate(&g, s, r), 4.0);
    }

    #[test]
    fn default_order_prefers_lower_maximum_on_ties() {
        let (_, [a, b, s, _]) = fork();
        let low = Cancellation::new(2.0, b, NodeKey::new(5.0, 1), s, NodeKey::new(3.0, 2));
        let high = Cancellation::new(2.0, a, NodeKey::new(6.0, 0), s, NodeKey::new(4.0, 2));
        let m = AbsolutePersistence;
        assert!(m.greater(&high, &low));
        assert!(!m.greater(&low, &high));
    }

    #[test]
    fn lowest_saddle_order() {
        let (g, [a, b, s, r]) = fork();
        let c0 = cancellation(&g, 1.0, a, s);
        let c1 = cancellation(&g, 1.0, b, r);
        assert!(LowestSaddleFirst.greater(&c0, &c1));
        assert!(!LowestSaddleFirst.greater(&c1, &c0));
        assert!(HighestSaddleFirst.greater(&c1, &c0));
    }

    #[test]
    fn maxima_relevance_uses_representative() {
        let (mut g, [a, b, s, _]) = fork();
        g.node_mut(s).unwrap().representative = Some(a);
        assert_eq!(MaximaRelevance.evaluate(&g, b, s), (9.0 - 4.0) / 9.0);
        assert!(MaximaRelevance.needs_representatives());
        assert_eq!(LocalThreshold.evaluate(&g, b, s), (9.0 - 4.0) / 9.0);
    }

    #[test]
    fn every_kind_builds_a_named_metric() {
        let names: Vec<_> = MetricKind::ALL.iter().map(|k| k.into_metric().name()).collect();
        assert_eq!(names.len(), 10);
        assert!(names.contains(&"Maxima Relevance"));
        let json = serde_json::to_string(&MetricKind::LogRelative).unwrap();
        assert_eq!(json, "\"log_relative\"");
    }
}
