use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use streaming_topology::prelude::*;

const DIMS: [u32; 3] = [12, 10, 1];

fn random_field(seed: u64) -> Vec<f32> {
    let mut rng = SmallRng::seed_from_u64(seed);
    (0..DIMS.iter().product::<u32>())
        .map(|_| rng.gen_range(0.0f32..100.0))
        .collect()
}

fn pipeline_graph(seed: u64, orientation: TreeOrientation) -> CriticalPointGraph {
    let field = random_field(seed);
    let patch = GridPatch::whole(DIMS, &field, Connectivity::Face).unwrap();
    let config = TopologyConfig {
        orientation,
        ..TopologyConfig::default()
    };
    SerialControl::new(config).unwrap().run(&[patch]).unwrap().graph
}

fn extreme_ids(g: &CriticalPointGraph) -> (GlobalIndex, GlobalIndex) {
    let mut nodes: Vec<_> = g.iter().map(|(_, n)| (n.key(), n.id())).collect();
    nodes.sort_by_key(|&(k, _)| k);
    (nodes[0].1, nodes[nodes.len() - 1].1)
}

fn check_hierarchy(graph: CriticalPointGraph, kind: HierarchyType) {
    let extrema = match kind {
        HierarchyType::Maxima => graph.ids_of_type(MorseType::Maximum).len(),
        _ => graph.ids_of_type(MorseType::Minimum).len(),
    };
    let (min_id, max_id) = extreme_ids(&graph);
    let range = graph.max_value() - graph.min_value();
    let arcs = graph.active_arcs();

    let mut h = PersistenceHierarchy::new(graph);
    let opts = HierarchyOptions {
        kind,
        ..HierarchyOptions::default()
    };
    let n = h.construct(&opts).unwrap();
    assert_eq!(n, extrema);
    assert_eq!(h.len(), n);
    assert_eq!(h.level(), 0);
    assert_eq!(h.graph().active_arcs(), arcs);

    let p: Vec<_> = h.substitutions().iter().map(|s| s.persistence).collect();
    assert!(p.windows(2).all(|w| w[0] <= w[1]), "{p:?}");
    assert!((p[n - 1] - range).abs() < 1e-4);

    // one step before the end only the outermost branch is left
    h.update_persistence_level(n - 1).unwrap();
    assert_eq!(h.graph().active_arcs(), vec![(min_id, max_id)]);

    // a persistence between two levels lands on the coarser side of the lower one
    let mid = p[n / 2];
    h.update_persistence(mid).unwrap();
    assert!(h.substitutions()[..h.level()].iter().all(|s| s.persistence <= mid));
    assert!(h.substitutions()[h.level()..].iter().all(|s| s.persistence > mid));

    h.update_persistence_level(0).unwrap();
    assert_eq!(h.graph().active_arcs(), arcs);
    assert!(h.graph().validate_invariants().is_ok());
}

#[test]
fn maxima_hierarchy_of_merge_tree() {
    for seed in [1, 7, 42] {
        check_hierarchy(pipeline_graph(seed, TreeOrientation::Merge), HierarchyType::Maxima);
    }
}

#[test]
fn minima_hierarchy_of_split_tree() {
    for seed in [3, 11] {
        check_hierarchy(pipeline_graph(seed, TreeOrientation::Split), HierarchyType::Minima);
    }
}

#[test]
fn every_metric_builds_a_replayable_hierarchy() {
    let graph = pipeline_graph(5, TreeOrientation::Merge);
    let arcs = graph.active_arcs();
    let mut h = PersistenceHierarchy::new(graph);
    for metric in MetricKind::ALL {
        let opts = HierarchyOptions {
            metric,
            ..HierarchyOptions::default()
        };
        let n = h.construct(&opts).unwrap();
        assert!(n > 0, "{metric:?}");
        assert_eq!(h.metric().map(|m| m.name()), Some(metric.into_metric().name()));
        h.update_persistence_level(n).unwrap();
        h.update_persistence_level(0).unwrap();
        assert_eq!(h.graph().active_arcs(), arcs, "{metric:?}");
    }
}

#[test]
fn maxima_remap_to_surviving_features() {
    let graph = pipeline_graph(9, TreeOrientation::Merge);
    let maxima = graph.ids_of_type(MorseType::Maximum);
    let (_, max_id) = extreme_ids(&graph);
    let mut h = PersistenceHierarchy::new(graph);
    let n = h.construct(&HierarchyOptions::default()).unwrap();
    h.update_persistence_level(n - 1).unwrap();
    for id in maxima {
        let active = h.find_active_node(id).unwrap();
        assert_eq!(h.graph()[active].id(), max_id, "maximum {id}");
    }
}

#[test]
fn simplification_sequence_covers_active_nodes() {
    let graph = pipeline_graph(13, TreeOrientation::Merge);
    let range = graph.max_value() - graph.min_value();
    let mut h = PersistenceHierarchy::new(graph);
    h.construct(&HierarchyOptions::default()).unwrap();
    let seq = h.simplification_sequence().unwrap();
    assert_eq!(seq.kind, HierarchyType::Maxima);
    assert_eq!(seq.features.len(), h.graph().active_count());
    assert!(seq.features.iter().all(|f| f.life.low <= f.life.high));
    assert!((seq.high - range).abs() < 1e-4);
    assert!(seq.features.windows(2).all(|w| w[0].id < w[1].id));
    let json = serde_json::to_value(&seq).unwrap();
    assert_eq!(json["metric"], "Absolute Persistence");
    assert_eq!(json["kind"], "maxima");
}
