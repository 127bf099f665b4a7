//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use rand::{Rng, SeedableRng, rngs::StdRng};
use tetimprove::prelude::*;

/// Installs a test-writer subscriber once; filter with `RUST_LOG`.
pub fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Swaps the first two indices of `t` if the tet is negatively oriented.
pub fn orient(points: &[Point3<f64>], t: [usize; 4]) -> [usize; 4] {
    if orient3d(&points[t[0]], &points[t[1]], &points[t[2]], &points[t[3]]) > 0.0 {
        t
    } else {
        [t[1], t[0], t[2], t[3]]
    }
}

/// Eight tets fanned from `center` to the faces of the unit octahedron.
pub fn octahedron(center: Point3<f64>) -> (ImproveMesh, Vec<VertexTag>) {
    let points = vec![
        center,
        Point3::new(1.0, 0.0, 0.0),
        Point3::new(-1.0, 0.0, 0.0),
        Point3::new(0.0, 1.0, 0.0),
        Point3::new(0.0, -1.0, 0.0),
        Point3::new(0.0, 0.0, 1.0),
        Point3::new(0.0, 0.0, -1.0),
    ];
    let mut tets = Vec::new();
    for x in [1, 2] {
        for y in [3, 4] {
            for z in [5, 6] {
                tets.push(orient(&points, [0, x, y, z]));
            }
        }
    }
    let (mut mesh, tags) = ImproveMesh::from_tets(&points, &tets).unwrap();
    mesh.classify_vertices();
    (mesh, tags)
}

/// Kuhn triangulation of an `n`³ grid over the unit cube, six tets per cell
/// around its main diagonal.
///
/// Interior vertices are displaced by up to `jitter` cell widths per
/// coordinate; `jitter` below `0.3` keeps every tet positive.
pub fn jittered_grid(n: usize, jitter: f64, seed: u64) -> (ImproveMesh, Vec<VertexTag>) {
    let h = 1.0 / n as f64;
    let side = n + 1;
    let index = |i: usize, j: usize, k: usize| (k * side + j) * side + i;

    let mut points = Vec::with_capacity(side * side * side);
    for k in 0..side {
        for j in 0..side {
            for i in 0..side {
                points.push(Point3::new(i as f64 * h, j as f64 * h, k as f64 * h));
            }
        }
    }

    let mut tets = Vec::with_capacity(6 * n * n * n);
    let axes = [[1, 2, 4], [1, 4, 2], [2, 1, 4], [2, 4, 1], [4, 1, 2], [4, 2, 1]];
    for k in 0..n {
        for j in 0..n {
            for i in 0..n {
                let corner = |bits: usize| {
                    index(i + (bits & 1), j + ((bits >> 1) & 1), k + ((bits >> 2) & 1))
                };
                for [a, b, _] in axes {
                    let t = [corner(0), corner(a), corner(a | b), corner(7)];
                    tets.push(orient(&points, t));
                }
            }
        }
    }

    let mut rng = StdRng::seed_from_u64(seed);
    for k in 1..n {
        for j in 1..n {
            for i in 1..n {
                let p = &mut points[index(i, j, k)];
                for c in 0..3 {
                    p[c] += rng.random_range(-jitter..=jitter) * h;
                }
            }
        }
    }

    let (mut mesh, tags) = ImproveMesh::from_tets(&points, &tets).unwrap();
    mesh.classify_vertices();
    (mesh, tags)
}

/// Sum of the signed volumes of every tet.
pub fn total_volume(mesh: &ImproveMesh) -> f64 {
    mesh.tets()
        .iter()
        .map(|tet| tet_volume(&mesh.tet_points(tet).unwrap()))
        .sum()
}

/// Worst quality of the mesh under `config`.
pub fn worst(mesh: &ImproveMesh, config: &ImproveConfig) -> f64 {
    mesh_quality(mesh, &config.oracle()).unwrap().min
}

/// Asserts that every tet is positively oriented.
pub fn assert_all_positive(mesh: &ImproveMesh) {
    for tet in mesh.tets() {
        let points = mesh.tet_points(&tet).unwrap();
        assert!(
            orient3d(&points[0], &points[1], &points[2], &points[3]) > 0.0,
            "tet {tet:?} is not positive"
        );
    }
}

/// Live tets as a sorted list of even-permutation-invariant keys.
pub fn tet_keys(mesh: &ImproveMesh) -> Vec<Tet> {
    let mut keys: Vec<Tet> = mesh.tets().iter().map(tet_key).collect();
    keys.sort_unstable();
    keys
}
