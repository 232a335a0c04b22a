use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use streaming_topology::prelude::*;

fn random_field(dims: [u32; 3], seed: u64) -> Vec<f32> {
    let mut rng = SmallRng::seed_from_u64(seed);
    (0..dims.iter().product::<u32>())
        .map(|_| rng.gen_range(-1.0f32..1.0))
        .collect()
}

fn compare_decomposition(dims: [u32; 3], blocks: [u32; 3], config: TopologyConfig, seed: u64) {
    let field = random_field(dims, seed);
    let control = SerialControl::new(config.clone()).unwrap();
    let whole = GridPatch::whole(dims, &field, config.connectivity).unwrap();
    let single = control.run(&[whole]).unwrap();

    let decomposition = GridDecomposition::new(dims, blocks).unwrap();
    let patches = decomposition.patches(&field, config.connectivity).unwrap();
    assert_eq!(patches.len(), decomposition.block_count());
    let merged = control.run(&patches).unwrap();

    assert_eq!(
        merged.graph.active_arcs(),
        single.graph.active_arcs(),
        "dims {dims:?} blocks {blocks:?} seed {seed}"
    );
    assert!(merged.graph.iter().all(|(_, n)| n.multiplicity() == 0));
    assert!(merged.graph.validate_invariants().is_ok());

    // every vertex of the whole grid is either a node or a segment member
    let local = single.stats.local[0];
    assert_eq!(local.nodes + local.segmented, local.vertices);
    assert_eq!(single.segmentations[0].member_count(), local.segmented);

    if config.scatter {
        for tree in &merged.trees[..patches.len()] {
            for (_, node) in merged.graph.iter() {
                assert!(tree.contains(node.id()), "patch {} misses {}", tree.graph_id(), node.id());
            }
        }
    }
}

#[test]
fn four_patches_match_whole_grid() {
    for seed in [1, 2, 3] {
        compare_decomposition([9, 8, 1], [2, 2, 1], TopologyConfig::default(), seed);
    }
}

#[test]
fn uneven_blocks_and_wide_fan_in() {
    let config = TopologyConfig {
        fan_in: 3,
        min_message: 64,
        ..TopologyConfig::default()
    };
    compare_decomposition([11, 7, 1], [3, 2, 1], config, 17);
}

#[test]
fn split_tree_with_full_connectivity() {
    let config = TopologyConfig {
        orientation: TreeOrientation::Split,
        connectivity: Connectivity::Full,
        ..TopologyConfig::default()
    };
    compare_decomposition([8, 8, 1], [2, 2, 1], config, 23);
}

#[test]
fn volume_decomposition() {
    let config = TopologyConfig {
        fan_in: 4,
        block_bits: 4,
        ..TopologyConfig::default()
    };
    compare_decomposition([6, 5, 5], [2, 2, 2], config, 31);
}

#[test]
fn gather_only_run_skips_scatter() {
    let config = TopologyConfig {
        scatter: false,
        ..TopologyConfig::default()
    };
    compare_decomposition([7, 7, 1], [2, 2, 1], config.clone(), 5);

    let field = random_field([7, 7, 1], 5);
    let patches = GridDecomposition::new([7, 7, 1], [2, 2, 1])
        .unwrap()
        .patches(&field, Connectivity::Face)
        .unwrap();
    let out = SerialControl::new(config).unwrap().run(&patches).unwrap();
    assert!(out.stats.scatter.is_empty());
    assert_eq!(out.stats.gather.len(), 3);
    assert_eq!(out.trees.len(), 7);
}

#[test]
fn config_from_json_drives_a_run() {
    let config: TopologyConfig =
        serde_json::from_str(r#"{"fan_in": 3, "connectivity": "full", "scatter": false}"#).unwrap();
    assert_eq!(config.orientation, TreeOrientation::Merge);
    let field = random_field([5, 5, 1], 8);
    let patch = GridPatch::whole([5, 5, 1], &field, config.connectivity).unwrap();
    let out = SerialControl::new(config).unwrap().run(&[patch]).unwrap();
    assert!(out.stats.gather.is_empty());
    assert!(!out.graph.is_empty());

    let bad: TopologyConfig = serde_json::from_str(r#"{"block_bits": 30}"#).unwrap();
    assert!(matches!(SerialControl::new(bad), Err(TopoError::InvalidConfig(_))));
}

#[test]
fn mismatched_field_is_rejected() {
    let decomposition = GridDecomposition::new([4, 4, 1], [2, 1, 1]).unwrap();
    let err = decomposition.patches(&[0.0f32; 15], Connectivity::Face).unwrap_err();
    assert!(matches!(err, TopoError::InvalidPatch(_)));
    assert!(GridDecomposition::new([2, 1, 1], [3, 1, 1]).is_err());
}

#[test]
fn run_grid_uses_configured_connectivity() {
    // the two maxima touch only along the diagonal
    let field = [1.0f32, 0.0, 0.0, 1.0];
    let maxima = |connectivity| {
        let config = TopologyConfig {
            connectivity,
            ..TopologyConfig::default()
        };
        let out = SerialControl::new(config).unwrap().run_grid([2, 2, 1], [1, 1, 1], &field).unwrap();
        out.graph.ids_of_type(MorseType::Maximum)
    };
    assert_eq!(maxima(Connectivity::Face), vec![0, 3]);
    assert_eq!(maxima(Connectivity::Full), vec![3]);
}

#[test]
fn run_grid_matches_explicit_decomposition() {
    let config = TopologyConfig {
        connectivity: Connectivity::Full,
        ..TopologyConfig::default()
    };
    let control = SerialControl::new(config).unwrap();
    let field = random_field([9, 9, 1], 41);
    let patches = GridDecomposition::new([9, 9, 1], [3, 2, 1])
        .unwrap()
        .patches(&field, Connectivity::Full)
        .unwrap();
    let explicit = control.run(&patches).unwrap();
    let grid = control.run_grid([9, 9, 1], [3, 2, 1], &field).unwrap();
    assert_eq!(grid.graph.active_arcs(), explicit.graph.active_arcs());
    assert_eq!(grid.trees.len(), explicit.trees.len());

    assert!(matches!(
        control.run_grid([9, 9, 1], [3, 2, 1], &field[1..]),
        Err(TopoError::InvalidPatch(_))
    ));
}
