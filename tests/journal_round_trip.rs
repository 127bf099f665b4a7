//! Integration tests for the mutation journal.
//!
//! Every operation the engine performs is recorded, so reverting to a
//! checkpoint must restore connectivity, positions and vertex data exactly,
//! however many operations ran in between.

mod common;

use common::{assert_all_positive, init_tracing, jittered_grid, tet_keys};
use proptest::prelude::*;
use tetimprove::core::algorithms::contraction::try_edge_contract;
use tetimprove::core::algorithms::insertion::split_body;
use tetimprove::core::algorithms::smoothing::smooth_vertex;
use tetimprove::core::algorithms::topological::try_edge_removal;
use tetimprove::prelude::*;

/// Everything a revert must restore.
#[derive(Debug, PartialEq)]
struct Snapshot {
    tets: Vec<Tet>,
    vertices: Vec<(VertexTag, Point3<f64>, VertexInfo)>,
}

fn snapshot(mesh: &ImproveMesh) -> Snapshot {
    let mut tags = mesh.complex().vertex_tags();
    tags.sort_unstable();
    Snapshot {
        tets: tet_keys(mesh),
        vertices: tags
            .into_iter()
            .map(|v| (v, mesh.position(v).unwrap(), mesh.info(v)))
            .collect(),
    }
}

/// One mutation applied to the tet picked by `index`.
#[derive(Clone, Copy, Debug)]
enum Step {
    Smooth,
    SplitBody,
    RemoveEdge,
    Contract,
    Insert,
    Nudge([f64; 3]),
}

fn step_strategy() -> impl Strategy<Value = (Step, usize)> {
    let offset = -0.05..0.05;
    let step = prop_oneof![
        Just(Step::Smooth),
        Just(Step::SplitBody),
        Just(Step::RemoveEdge),
        Just(Step::Contract),
        Just(Step::Insert),
        [offset.clone(), offset.clone(), offset].prop_map(Step::Nudge),
    ];
    (step, any::<usize>())
}

/// Applies `step`, leaving the mesh valid.
fn apply(mesh: &mut ImproveMesh, config: &ImproveConfig, step: Step, index: usize) {
    let tets = mesh.tets();
    let tet = tets[index % tets.len()];
    let rotated = rotate_to_front(&tet, tet[(index / tets.len()) % 4]).unwrap();
    match step {
        Step::Smooth => {
            let mut stats = SmoothingStats::default();
            smooth_vertex(mesh, config, &rotated, None, &mut stats).unwrap();
        }
        Step::SplitBody => {
            split_body(mesh, &tet).unwrap();
        }
        Step::RemoveEdge => {
            let mut stats = TopologyStats::default();
            try_edge_removal(mesh, config, &tet, &mut TetStack::new(), &mut stats).unwrap();
        }
        Step::Contract => {
            let mut stats = PassStats::new(PassKind::Contract);
            try_edge_contract(mesh, config, &tet, true, false, None, &mut stats).unwrap();
        }
        Step::Insert => {
            let quality = mesh.quality(&tet, &config.oracle()).unwrap();
            let mut stats = PassStats::new(PassKind::Insert);
            insert_vertex(mesh, config, &tet, quality, false, None, &mut stats).unwrap();
        }
        Step::Nudge(offset) => {
            let vertex = rotated[0];
            if mesh.kind(vertex) != VertexKind::Free {
                return;
            }
            let checkpoint = mesh.checkpoint();
            let position = mesh.position(vertex).unwrap();
            let moved = Point3::new(
                position.x + offset[0],
                position.y + offset[1],
                position.z + offset[2],
            );
            mesh.move_vertex(vertex, moved).unwrap();
            let inverted = mesh
                .star(vertex)
                .tets
                .iter()
                .any(|t| mesh.quality(t, &config.oracle()).unwrap() <= 0.0);
            if inverted {
                mesh.revert_to(checkpoint).unwrap();
            }
        }
    }
}

#[test]
fn test_full_schedule_is_reverted_exactly() {
    init_tracing();
    let (mut mesh, _) = jittered_grid(3, 0.25, 7);
    let original = snapshot(&mesh);
    let checkpoint = mesh.checkpoint();

    let stats = improve_mesh(&mut mesh, &ImproveConfig::default()).unwrap();
    assert!(!stats.passes.is_empty());
    assert!(mesh.journal().len() > checkpoint.position());

    mesh.revert_to(checkpoint).unwrap();
    assert_eq!(snapshot(&mesh), original);
    assert_eq!(mesh.journal().len(), checkpoint.position());
}

#[test]
fn test_nested_checkpoints_unwind_in_order() {
    init_tracing();
    let (mut mesh, _) = jittered_grid(2, 0.1, 3);
    let outer = mesh.checkpoint();
    let first = snapshot(&mesh);

    let tet = mesh.tets()[0];
    split_body(&mut mesh, &tet).unwrap();
    let inner = mesh.checkpoint();
    let second = snapshot(&mesh);

    let tet = mesh.tets()[0];
    split_body(&mut mesh, &tet).unwrap();
    assert_ne!(snapshot(&mesh), second);

    mesh.revert_to(inner).unwrap();
    assert_eq!(snapshot(&mesh), second);
    mesh.revert_to(outer).unwrap();
    assert_eq!(snapshot(&mesh), first);

    // the inner checkpoint is gone with the entries it marked
    assert!(matches!(
        mesh.revert_to(inner),
        Err(MeshError::UnknownCheckpoint { .. })
    ));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: any sequence of operations is undone exactly by one revert
    #[test]
    fn prop_random_operations_revert_exactly(
        seed in 0_u64..1000,
        steps in prop::collection::vec(step_strategy(), 1..12)
    ) {
        let (mut mesh, _) = jittered_grid(2, 0.15, seed);
        let config = ImproveConfig::default();
        let original = snapshot(&mesh);
        let checkpoint = mesh.checkpoint();

        for (step, index) in steps {
            apply(&mut mesh, &config, step, index);
        }
        assert_all_positive(&mesh);

        mesh.revert_to(checkpoint).unwrap();
        prop_assert_eq!(snapshot(&mesh), original);
    }

    /// Property: reverting to an intermediate checkpoint keeps earlier work
    #[test]
    fn prop_partial_revert_keeps_prefix(
        seed in 0_u64..1000,
        prefix in prop::collection::vec(step_strategy(), 1..6),
        suffix in prop::collection::vec(step_strategy(), 1..6)
    ) {
        let (mut mesh, _) = jittered_grid(2, 0.15, seed);
        let config = ImproveConfig::default();
        for (step, index) in prefix {
            apply(&mut mesh, &config, step, index);
        }
        let middle = snapshot(&mesh);
        let checkpoint = mesh.checkpoint();
        for (step, index) in suffix {
            apply(&mut mesh, &config, step, index);
        }
        mesh.revert_to(checkpoint).unwrap();
        prop_assert_eq!(snapshot(&mesh), middle);
    }
}
