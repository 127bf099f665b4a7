//! Integration tests for the acceptance rule shared by every pass: a kept
//! pass never lowers the worst quality of its scope, and a rejected one
//! leaves the mesh exactly as it found it.

mod common;

use approx::assert_relative_eq;
use common::{assert_all_positive, init_tracing, jittered_grid, tet_keys, total_volume, worst};
use tetimprove::core::algorithms::contraction::contract_pass;
use tetimprove::prelude::*;

type PassFn = fn(
    &mut ImproveMesh,
    &ImproveConfig,
    &TetStack,
    Option<&mut TetStack>,
) -> Result<PassStats, ImproveError>;

/// Positions of every vertex, sorted by tag.
fn positions(mesh: &ImproveMesh) -> Vec<(VertexTag, Point3<f64>)> {
    let mut tags = mesh.complex().vertex_tags();
    tags.sort_unstable();
    tags.into_iter()
        .map(|v| (v, mesh.position(v).unwrap()))
        .collect()
}

fn check_global(pass: PassFn, conserves_volume: bool) {
    init_tracing();
    let config = ImproveConfig::default();
    let oracle = config.oracle();
    for seed in 0..4 {
        let (mut mesh, _) = jittered_grid(3, 0.25, seed);
        let volume = total_volume(&mesh);
        let before = worst(&mesh, &config);
        let stack = fill_by_percent(&mesh, &oracle, 1.0).unwrap();

        let stats = pass(&mut mesh, &config, &stack, None).unwrap();

        let after = worst(&mesh, &config);
        assert!(after >= before, "seed {seed}: {after} < {before}");
        assert_relative_eq!(stats.min_before, before);
        if stats.accepted {
            assert_relative_eq!(stats.min_after, after);
        }
        assert_all_positive(&mesh);
        if conserves_volume {
            assert_relative_eq!(total_volume(&mesh), volume, epsilon = 1e-12);
        }
    }
}

fn check_local(pass: PassFn) {
    init_tracing();
    let config = ImproveConfig::default();
    let oracle = config.oracle();
    for seed in 0..4 {
        let (mut mesh, _) = jittered_grid(3, 0.25, seed);
        let global_before = worst(&mesh, &config);
        let stack = fill_by_quality(&mesh, &oracle, global_before + 0.2).unwrap();
        let local_before = stack_quality(&mesh, &oracle, &stack).unwrap().min;
        let tets = tet_keys(&mesh);
        let points = positions(&mesh);
        let mut output = TetStack::new();

        let stats = pass(&mut mesh, &config, &stack, Some(&mut output)).unwrap();

        if stats.accepted {
            let local_after = stack_quality(&mesh, &oracle, &output).unwrap().min;
            assert!(local_after >= local_before, "seed {seed}");
            assert!(worst(&mesh, &config) >= global_before, "seed {seed}");
        } else {
            assert_eq!(tet_keys(&mesh), tets, "seed {seed}");
            assert_eq!(positions(&mesh), points, "seed {seed}");
        }
        assert_all_positive(&mesh);
    }
}

macro_rules! pass_monotonicity_tests {
    ($name:ident, $pass:path, $conserves_volume:literal) => {
        pastey::paste! {
            #[test]
            fn [<test_global_ $name _pass_never_lowers_minimum>]() {
                check_global($pass, $conserves_volume);
            }

            #[test]
            fn [<test_local_ $name _pass_is_kept_only_if_it_helps>]() {
                check_local($pass);
            }
        }
    };
}

pass_monotonicity_tests!(smooth, smooth_pass, true);
pass_monotonicity_tests!(topological, topo_pass, true);
pass_monotonicity_tests!(contraction, contract_pass, false);
pass_monotonicity_tests!(insertion, insert_pass, true);

#[test]
fn test_repeated_passes_converge() {
    init_tracing();
    let config = ImproveConfig::default();
    let oracle = config.oracle();
    let (mut mesh, _) = jittered_grid(3, 0.25, 42);
    let mut previous = worst(&mesh, &config);
    for _ in 0..5 {
        let stack = fill_by_percent(&mesh, &oracle, 1.0).unwrap();
        smooth_pass(&mut mesh, &config, &stack, None).unwrap();
        let stack = fill_by_percent(&mesh, &oracle, 1.0).unwrap();
        topo_pass(&mut mesh, &config, &stack, None).unwrap();
        let current = worst(&mesh, &config);
        assert!(current >= previous);
        previous = current;
    }
    assert_all_positive(&mesh);
}

#[test]
fn test_disabled_operations_leave_mesh_untouched() {
    init_tracing();
    let config = ImproveConfigBuilder::default()
        .nonsmooth(false)
        .edge_removal(false)
        .single_face_removal(false)
        .multi_face_removal(false)
        .flip22(false)
        .edge_contraction(false)
        .enable_insert(false)
        .build()
        .unwrap();
    let oracle = config.oracle();
    let (mut mesh, _) = jittered_grid(2, 0.2, 5);
    let tets = tet_keys(&mesh);
    let points = positions(&mesh);
    let stack = fill_by_percent(&mesh, &oracle, 1.0).unwrap();

    topo_pass(&mut mesh, &config, &stack, None).unwrap();
    contract_pass(&mut mesh, &config, &stack, None).unwrap();
    insert_pass(&mut mesh, &config, &stack, None).unwrap();

    assert_eq!(tet_keys(&mesh), tets);
    assert_eq!(positions(&mesh), points);
}
