//! Topological improvement.
//!
//! Two families of operations change which tets the mesh has without moving
//! any vertex:
//!
//! - **Edge removal** deletes every tet around an edge and retriangulates the
//!   polygon of ring vertices. The best triangulation (the one maximizing the
//!   worst new tet) is found by dynamic programming over sub-polygons and is
//!   realized as a chain of 2-3 flips closed by a 3-2 flip (or a 2-2 flip for
//!   a boundary edge).
//! - **Face removal** deletes a face shared by two tets, by a single 2-3 flip
//!   or, for a tree of faces sandwiched between the same two apexes, by a 2-3
//!   flip followed by a cascade of 3-2 flips. Faces with a coplanar edge on the
//!   boundary can instead be removed with a 2-2 flip.
//!
//! Every operation checks its result before touching the mesh, and every
//! change goes through [`Flip`] so the journal can undo it.
//!
//! # Ring Triangulation
//!
//! For an edge `(a, b)` with ring `r_0 .. r_{m-1}`, `Q[i][j]` is the best worst
//! quality achievable for the sub-polygon `r_i .. r_j`:
//!
//! ```text
//! Q[i][j] = max over i < k < j of
//!           min(q(a, r_i, r_k, r_j), q(r_i, r_k, r_j, b), Q[i][k], Q[k][j])
//! ```
//!
//! with `Q[i][i + 1]` absent. The edge is removed when `Q[0][m - 1]` beats the
//! worst tet currently around the edge.

use nalgebra::Vector3;

use crate::core::algorithms::flips::Flip;
use crate::core::algorithms::improve::ImproveError;
use crate::core::boundary::{BoundaryAnalysis, EdgeRing, edge_first};
use crate::core::collections::SmallBuffer;
use crate::core::complex::{Face, Tet, TetComplex, VertexTag};
use crate::core::config::{ImproveConfig, SINE1};
use crate::core::mesh::{ImproveMesh, MeshError};
use crate::core::stats::{PassKind, PassStats, TopologyStats};
use crate::core::worklist::{TetStack, local_mean_improve, mesh_quality, stack_quality};
use crate::geometry::predicates::orient3d;
use crate::geometry::quality::{QualityOracle, face_vertices};

/// Rings around an edge with more tets than this are left alone.
pub const MAX_RING_TETS: usize = 70;
/// Largest face tree a multi-face removal may build.
pub const MAX_FACE_TREE_SIZE: usize = 50;
/// A flip creating a tet at or below this quality is refused.
pub const MIN_FLIP_QUALITY: f64 = 1.0e-14;
/// Ring triangulation refuses new tets with four boundary vertices below this
/// quality, since no later operation can repair them.
pub const MIN_ALL_BOUNDARY_QUALITY: f64 = SINE1;

const DYNAMIC_MEAN_IMPROVEMENT: f64 = 1.0e-3;

/// Result of a successful face removal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FaceRemoval {
    /// Faces removed: 1 for a 2-3 or 2-2 flip, the tree size plus one for a
    /// multi-face removal.
    pub faces: usize,
    /// The tets created.
    pub created: Vec<Tet>,
}

fn orientation<C>(mesh: &ImproveMesh<C>, tet: &Tet) -> Result<f64, MeshError>
where
    C: TetComplex,
{
    let [a, b, c, d] = mesh.tet_points(tet)?;
    Ok(orient3d(&a, &b, &c, &d))
}

fn apply_flip<C>(
    mesh: &mut ImproveMesh<C>,
    flip: Flip,
    stats: &mut TopologyStats,
) -> Result<(), MeshError>
where
    C: TetComplex,
{
    mesh.flip(flip)?;
    stats.record_flip(flip.kind);
    Ok(())
}

fn push_created<C>(
    mesh: &ImproveMesh<C>,
    oracle: &QualityOracle,
    created: &[Tet],
    output: &mut TetStack,
) -> Result<(), MeshError>
where
    C: TetComplex,
{
    for tet in created.iter().filter(|tet| mesh.tet_exists(tet)) {
        output.push_unique(*tet, mesh.quality(tet, oracle)?);
    }
    Ok(())
}

// =============================================================================
// EDGE REMOVAL
// =============================================================================

/// Split table of the best triangulation of a ring polygon.
struct RingTriangulation {
    size: usize,
    quality: f64,
    split: Vec<usize>,
}

impl RingTriangulation {
    fn split(&self, i: usize, j: usize) -> usize {
        self.split[i * self.size + j]
    }
}

/// Quality of a candidate tet, with tets spanning four boundary vertices
/// counted as inverted when they would be nearly flat.
fn candidate_quality<C>(
    mesh: &ImproveMesh<C>,
    oracle: &QualityOracle,
    tet: &Tet,
    old_min: f64,
) -> Result<f64, MeshError>
where
    C: TetComplex,
{
    let quality = mesh.quality(tet, oracle)?;
    if quality > old_min
        && quality < MIN_ALL_BOUNDARY_QUALITY
        && mesh.boundary_vertex_count(tet) == 4
    {
        return Ok(-1.0);
    }
    Ok(quality)
}

/// Fills the dynamic-programming tables for the polygon `ring` between the
/// apexes `a` (above) and `b` (below). Needs at least three ring vertices.
fn triangulate_ring<C>(
    mesh: &ImproveMesh<C>,
    oracle: &QualityOracle,
    a: VertexTag,
    b: VertexTag,
    ring: &[VertexTag],
    old_min: f64,
) -> Result<RingTriangulation, MeshError>
where
    C: TetComplex,
{
    let m = ring.len();
    let mut quality = vec![f64::NEG_INFINITY; m * m];
    let mut split = vec![0; m * m];
    for i in (0..m - 2).rev() {
        for j in (i + 2)..m {
            for k in (i + 1)..j {
                let upper = candidate_quality(mesh, oracle, &[a, ring[i], ring[k], ring[j]], old_min)?;
                let lower = candidate_quality(mesh, oracle, &[ring[i], ring[k], ring[j], b], old_min)?;
                let mut q = upper.min(lower);
                if k < j - 1 {
                    q = q.min(quality[k * m + j]);
                }
                if k > i + 1 {
                    q = q.min(quality[i * m + k]);
                }
                if k == i + 1 || q > quality[i * m + j] {
                    quality[i * m + j] = q;
                    split[i * m + j] = k;
                }
            }
        }
    }
    Ok(RingTriangulation {
        size: m,
        quality: quality[m - 1],
        split,
    })
}

/// Realizes the triangulation of the sub-polygon `r_i .. r_j` with 2-3 flips,
/// leaving one tet around the edge spanning `r_i` and `r_j`.
#[allow(clippy::too_many_arguments)]
fn flip_sub_polygon<C>(
    mesh: &mut ImproveMesh<C>,
    table: &RingTriangulation,
    a: VertexTag,
    b: VertexTag,
    ring: &[VertexTag],
    (i, j): (usize, usize),
    created: &mut Vec<Tet>,
    stats: &mut TopologyStats,
) -> Result<(), MeshError>
where
    C: TetComplex,
{
    if j < i + 2 {
        return Ok(());
    }
    let k = table.split(i, j);
    flip_sub_polygon(mesh, table, a, b, ring, (i, k), created, stats)?;
    flip_sub_polygon(mesh, table, a, b, ring, (k, j), created, stats)?;
    apply_flip(mesh, Flip::flip23(a, ring[k], b, ring[i], ring[j]), stats)?;
    created.push([a, ring[i], ring[k], ring[j]]);
    created.push([ring[i], ring[k], ring[j], b]);
    Ok(())
}

/// Removes the edge of `ring` if the best retriangulation of its polygon
/// beats `old_min`. Returns the new worst quality and the tets created.
fn remove_edge<C>(
    mesh: &mut ImproveMesh<C>,
    oracle: &QualityOracle,
    ring: &EdgeRing,
    old_min: f64,
    stats: &mut TopologyStats,
) -> Result<Option<(f64, Vec<Tet>)>, MeshError>
where
    C: TetComplex,
{
    let (a, b) = (ring.destination, ring.origin);
    let r = ring.ring.as_slice();
    let m = r.len();
    let table = triangulate_ring(mesh, oracle, a, b, r, old_min)?;
    if table.quality <= old_min {
        return Ok(None);
    }

    let mut created = Vec::with_capacity(2 * m);
    let k = table.split(0, m - 1);
    flip_sub_polygon(mesh, &table, a, b, r, (0, k), &mut created, stats)?;
    flip_sub_polygon(mesh, &table, a, b, r, (k, m - 1), &mut created, stats)?;
    let last = if ring.is_boundary() {
        Flip::flip22(b, a, r[k], r[0], r[m - 1])
    } else {
        Flip::flip32(r[0], r[k], r[m - 1], b, a)
    };
    apply_flip(mesh, last, stats)?;
    created.push([a, r[0], r[k], r[m - 1]]);
    created.push([r[0], r[k], r[m - 1], b]);
    Ok(Some((table.quality, created)))
}

/// Tries to remove the edge of `ring`, pushing the created tets on `output`.
fn remove_ring<C>(
    mesh: &mut ImproveMesh<C>,
    config: &ImproveConfig,
    ring: &EdgeRing,
    output: &mut TetStack,
    stats: &mut TopologyStats,
) -> Result<bool, MeshError>
where
    C: TetComplex,
{
    let count = ring.tet_count();
    if ring.ring.len() < 3 {
        return Ok(false);
    }
    if count > MAX_RING_TETS {
        tracing::warn!(
            tets = count,
            max = MAX_RING_TETS,
            "ring too large for edge removal; skipping"
        );
        return Ok(false);
    }

    let oracle = config.oracle();
    let mut old_min = f64::INFINITY;
    for tet in ring.tets() {
        old_min = old_min.min(mesh.quality(&tet, &oracle)?);
    }
    let removed = remove_edge(mesh, &oracle, ring, old_min, stats)?;
    let histogram = if ring.is_boundary() {
        &mut stats.boundary_edge_removal
    } else {
        &mut stats.edge_removal
    };
    histogram.record(count, removed.is_some());

    let Some((quality, created)) = removed else {
        return Ok(false);
    };
    tracing::trace!(
        ring = count,
        boundary = ring.is_boundary(),
        before = old_min,
        after = quality,
        "removed edge"
    );
    push_created(mesh, &oracle, &created, output)?;
    Ok(true)
}

/// Whether the two boundary faces at the edge `(origin, destination)` lie in
/// one plane with the same outward normal.
#[allow(clippy::float_cmp)]
fn coplanar_boundary_faces<C>(mesh: &ImproveMesh<C>, ring: &EdgeRing) -> Result<bool, MeshError>
where
    C: TetComplex,
{
    let Some([first, last]) = ring.boundary else {
        return Ok(false);
    };
    let origin = mesh.position(ring.origin)?;
    let edge = mesh.position(ring.destination)? - origin;
    let first = mesh.position(first)? - origin;
    let last = mesh.position(last)? - origin;
    let normals: Option<(Vector3<f64>, Vector3<f64>)> = first
        .cross(&edge)
        .try_normalize(0.0)
        .zip(edge.cross(&last).try_normalize(0.0));
    Ok(normals.is_some_and(|(n1, n2)| n1.dot(&n2) == 1.0))
}

/// Tries to remove a boundary edge of `tet` lying between two coplanar
/// boundary faces.
fn try_boundary_edge_removal<C>(
    mesh: &mut ImproveMesh<C>,
    config: &ImproveConfig,
    tet: &Tet,
    output: &mut TetStack,
    stats: &mut TopologyStats,
) -> Result<bool, ImproveError>
where
    C: TetComplex,
{
    for edge in mesh.complex().boundary_edges(tet)? {
        if !coplanar_boundary_faces(mesh, &edge.ring)? {
            continue;
        }
        if remove_ring(mesh, config, &edge.ring, output, stats)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Tries to remove one edge of `tet`, pushing the created tets on `output`.
///
/// Boundary edges between coplanar faces are tried first when
/// [`ImproveConfig::boundary_edge_removal`] is set; then each interior edge,
/// stopping at the first success.
///
/// # Errors
///
/// Returns an [`ImproveError`] if a ring walk or flip finds the complex
/// inconsistent.
pub fn try_edge_removal<C>(
    mesh: &mut ImproveMesh<C>,
    config: &ImproveConfig,
    tet: &Tet,
    output: &mut TetStack,
    stats: &mut TopologyStats,
) -> Result<bool, ImproveError>
where
    C: TetComplex,
{
    if !mesh.tet_exists(tet) {
        return Ok(false);
    }
    if config.boundary_edge_removal
        && try_boundary_edge_removal(mesh, config, tet, output, stats)?
    {
        return Ok(true);
    }
    for i in 0..3 {
        for j in (i + 1)..4 {
            let ring = mesh.complex().edge_ring(&edge_first(tet, i, j))?;
            if ring.is_boundary() {
                continue;
            }
            if remove_ring(mesh, config, &ring, output, stats)? {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

// =============================================================================
// FACE REMOVAL
// =============================================================================

/// Shape of the two tets on either side of a face.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FaceShape {
    /// Apex above the face.
    pub top: VertexTag,
    /// Apex below the face.
    pub bottom: VertexTag,
    /// Face edges where the union of the two tets is reflex.
    pub reflex: usize,
    /// Face edges `(i, j)` (local indices) where the union is flat.
    pub coplanar: SmallBuffer<[usize; 2], 3>,
}

/// Classifies the edges of `face` by the convexity of the union of the two
/// tets sharing it. Returns `None` unless a tet lies on each side.
///
/// # Errors
///
/// Returns [`MeshError::MissingVertex`] if a vertex has no position.
pub fn face_shape<C>(mesh: &ImproveMesh<C>, face: &Face) -> Result<Option<FaceShape>, MeshError>
where
    C: TetComplex,
{
    let Some(adjacency) = mesh.complex().adjacencies(face) else {
        return Ok(None);
    };
    let (Some(top), Some(bottom)) = (adjacency.top, adjacency.bottom) else {
        return Ok(None);
    };
    let mut shape = FaceShape {
        top,
        bottom,
        reflex: 0,
        coplanar: SmallBuffer::new(),
    };
    for i in 0..3 {
        let j = (i + 1) % 3;
        let orient = orientation(mesh, &[face[i], face[j], top, bottom])?;
        if orient < 0.0 {
            shape.reflex += 1;
        } else if orient == 0.0 {
            shape.coplanar.push([i, j]);
        }
    }
    Ok(Some(shape))
}

/// Tries a 2-2 flip of `face` across its coplanar edge `edge`.
///
/// Both tets must have their faces at the edge on the boundary, so the two
/// tets form a flat-bottomed pair whose diagonal can be swapped.
#[allow(clippy::too_many_arguments)]
fn try_flip22<C>(
    mesh: &mut ImproveMesh<C>,
    config: &ImproveConfig,
    face: &Face,
    bottom: VertexTag,
    top: VertexTag,
    edge: [usize; 2],
    require_improve: bool,
    stats: &mut TopologyStats,
) -> Result<Option<FaceRemoval>, MeshError>
where
    C: TetComplex,
{
    if mesh.is_anisotropic() {
        return Ok(None);
    }
    let oracle = config.oracle();
    let [f0, f1, f2] = *face;
    let before = mesh
        .quality(&[top, f0, f1, f2], &oracle)?
        .min(mesh.quality(&[bottom, f2, f1, f0], &oracle)?);

    let other = face[3 - edge[0] - edge[1]];
    let (e0, e1) = (face[edge[0]], face[edge[1]]);
    let exposed = |f: Face| {
        mesh.complex()
            .adjacencies(&f)
            .is_some_and(|adjacency| adjacency.top.is_none())
    };
    if !exposed([top, e0, e1]) || !exposed([bottom, e1, e0]) {
        return Ok(None);
    }

    let created = vec![[other, e0, top, bottom], [other, e1, bottom, top]];
    let mut after = f64::INFINITY;
    for tet in &created {
        let quality = mesh.quality(tet, &oracle)?;
        if quality < MIN_FLIP_QUALITY {
            return Ok(None);
        }
        after = after.min(quality);
    }
    if after <= before && require_improve {
        return Ok(None);
    }
    apply_flip(mesh, Flip::flip22(e0, e1, other, bottom, top), stats)?;
    Ok(Some(FaceRemoval { faces: 1, created }))
}

/// Tries to remove `face` with a single 2-3 flip, or with a 2-2 flip if it
/// has exactly one coplanar edge.
///
/// # Errors
///
/// Returns a [`MeshError`] if the flip finds the complex inconsistent.
pub fn try_flip23<C>(
    mesh: &mut ImproveMesh<C>,
    config: &ImproveConfig,
    face: &Face,
    require_improve: bool,
    stats: &mut TopologyStats,
) -> Result<Option<FaceRemoval>, MeshError>
where
    C: TetComplex,
{
    let Some(shape) = face_shape(mesh, face)? else {
        return Ok(None);
    };
    if shape.reflex != 0 {
        return Ok(None);
    }
    match shape.coplanar.as_slice() {
        [] => {}
        [edge] if config.flip22 => {
            return try_flip22(
                mesh,
                config,
                face,
                shape.bottom,
                shape.top,
                *edge,
                require_improve,
                stats,
            );
        }
        _ => return Ok(None),
    }

    let oracle = config.oracle();
    let (top, bottom) = (shape.top, shape.bottom);
    let [v1, v2, v3] = *face;
    let before = mesh
        .quality(&[top, v1, v2, v3], &oracle)?
        .min(mesh.quality(&[bottom, v3, v2, v1], &oracle)?);
    let created = vec![
        [top, v1, v2, bottom],
        [top, v2, v3, bottom],
        [top, v3, v1, bottom],
    ];
    let mut after = f64::INFINITY;
    for tet in &created {
        let quality = mesh.quality(tet, &oracle)?;
        if quality < MIN_FLIP_QUALITY {
            return Ok(None);
        }
        after = after.min(quality);
    }
    if after <= before && require_improve {
        return Ok(None);
    }
    apply_flip(mesh, Flip::flip23(v1, v2, v3, bottom, top), stats)?;
    Ok(Some(FaceRemoval { faces: 1, created }))
}

/// The apex `v` such that both `(v1, v2, a)` and `(v2, v1, b)` have `v` on
/// their far side, i.e. the face `(v1, v2, v)` is sandwiched between `a` and
/// `b`.
#[must_use]
pub fn sandwich_neighbor<C>(
    mesh: &ImproveMesh<C>,
    v1: VertexTag,
    v2: VertexTag,
    a: VertexTag,
    b: VertexTag,
) -> Option<VertexTag>
where
    C: TetComplex,
{
    let above = mesh.complex().adjacencies(&[v1, v2, a])?.top?;
    let below = mesh.complex().adjacencies(&[v2, v1, b])?.top?;
    (above == below).then_some(above)
}

#[derive(Clone, Copy, Debug)]
struct FaceNode {
    face: Face,
    children: [Option<usize>; 2],
}

struct NeighborTest {
    old: f64,
    new: f64,
    node: Option<usize>,
}

/// Grows the face tree across the edge `(u, w)` of a face between `a` and
/// `b`.
///
/// Returns the worst quality of the tets the subtree would delete and of
/// those it would create. When the subtree is not worth removing, it is
/// dropped from `tree` and only the tet `(a, b, u, w)` is reported as created.
fn test_neighbor<C>(
    mesh: &ImproveMesh<C>,
    oracle: &QualityOracle,
    (a, b): (VertexTag, VertexTag),
    (u, w): (VertexTag, VertexTag),
    tree: &mut Vec<FaceNode>,
) -> Result<NeighborTest, MeshError>
where
    C: TetComplex,
{
    let quw = mesh.quality(&[a, b, u, w], oracle)?;
    let leaf = NeighborTest {
        old: f64::INFINITY,
        new: quw,
        node: None,
    };
    if tree.len() >= MAX_FACE_TREE_SIZE {
        return Ok(leaf);
    }
    let Some(v) = sandwich_neighbor(mesh, u, w, a, b) else {
        return Ok(leaf);
    };
    let positive = [[a, b, u, v], [a, b, v, w], [a, b, w, u]]
        .iter()
        .map(|tet| orientation(mesh, tet))
        .collect::<Result<SmallBuffer<f64, 3>, _>>()?
        .into_iter()
        .filter(|&orient| orient > 0.0)
        .count();
    if positive < 2 {
        return Ok(leaf);
    }

    let mark = tree.len();
    let uv = test_neighbor(mesh, oracle, (a, b), (u, v), tree)?;
    let vw = test_neighbor(mesh, oracle, (a, b), (v, w), tree)?;
    let old = mesh
        .quality(&[a, u, v, w], oracle)?
        .min(mesh.quality(&[u, v, w, b], oracle)?)
        .min(uv.old)
        .min(vw.old);
    let new = uv.new.min(vw.new);
    if (new > old || new > quw) && tree.len() < MAX_FACE_TREE_SIZE {
        tree.push(FaceNode {
            face: [u, v, w],
            children: [uv.node, vw.node],
        });
        return Ok(NeighborTest {
            old,
            new,
            node: Some(tree.len() - 1),
        });
    }
    tree.truncate(mark);
    Ok(leaf)
}

/// Removes the tree face `node` and its subtree with 3-2 flips.
fn flip32_recurse<C>(
    mesh: &mut ImproveMesh<C>,
    tree: &[FaceNode],
    node: usize,
    (a, b): (VertexTag, VertexTag),
    created: &mut Vec<Tet>,
    stats: &mut TopologyStats,
) -> Result<(), MeshError>
where
    C: TetComplex,
{
    let FaceNode {
        face: [u, v, w],
        children,
    } = tree[node];
    apply_flip(mesh, Flip::flip32(a, b, v, w, u), stats)?;
    for (child, tet) in children.into_iter().zip([[a, b, u, v], [a, b, v, w]]) {
        match child {
            Some(child) => flip32_recurse(mesh, tree, child, (a, b), created, stats)?,
            None => created.push(tet),
        }
    }
    Ok(())
}

/// Removes `face` together with the largest tree of neighboring faces
/// sandwiched between the same two apexes that improves quality.
///
/// # Errors
///
/// Returns a [`MeshError`] if a flip finds the complex inconsistent.
pub fn remove_multi_face<C>(
    mesh: &mut ImproveMesh<C>,
    config: &ImproveConfig,
    face: &Face,
    stats: &mut TopologyStats,
) -> Result<Option<FaceRemoval>, MeshError>
where
    C: TetComplex,
{
    let Some(adjacency) = mesh.complex().adjacencies(face) else {
        return Ok(None);
    };
    let (Some(a), Some(b)) = (adjacency.top, adjacency.bottom) else {
        return Ok(None);
    };
    let [u, v, w] = *face;
    let sides = [
        orientation(mesh, &[a, b, u, v])?,
        orientation(mesh, &[a, b, v, w])?,
        orientation(mesh, &[a, b, w, u])?,
    ];
    if sides.iter().filter(|&&orient| orient > 0.0).count() < 2 {
        return Ok(None);
    }

    let oracle = config.oracle();
    let mut tree = Vec::new();
    let uv = test_neighbor(mesh, &oracle, (a, b), (u, v), &mut tree)?;
    let vw = test_neighbor(mesh, &oracle, (a, b), (v, w), &mut tree)?;
    let wu = test_neighbor(mesh, &oracle, (a, b), (w, u), &mut tree)?;
    let old = mesh
        .quality(&[a, u, v, w], &oracle)?
        .min(mesh.quality(&[u, v, w, b], &oracle)?)
        .min(uv.old)
        .min(vw.old)
        .min(wu.old);
    let new = uv.new.min(vw.new).min(wu.new);
    if new <= old {
        return Ok(None);
    }

    // the segment ab must cross the face or one of the tree faces
    let mut pierced = sides.iter().all(|&orient| orient > 0.0);
    for node in &tree {
        if pierced {
            break;
        }
        let [x, y, z] = node.face;
        let mut crosses = true;
        for tet in [[a, b, x, y], [a, b, y, z], [a, b, z, x]] {
            if orientation(mesh, &tet)? < 0.0 {
                crosses = false;
                break;
            }
        }
        pierced = crosses;
    }
    if !pierced {
        return Ok(None);
    }

    let mut created = Vec::with_capacity(2 * tree.len() + 3);
    apply_flip(mesh, Flip::flip23(u, v, w, b, a), stats)?;
    for (test, (x, y)) in [uv, vw, wu].into_iter().zip([(u, v), (v, w), (w, u)]) {
        match test.node {
            Some(node) => flip32_recurse(mesh, &tree, node, (a, b), &mut created, stats)?,
            None => created.push([a, b, x, y]),
        }
    }
    tracing::trace!(faces = tree.len() + 1, before = old, after = new, "removed face tree");
    Ok(Some(FaceRemoval {
        faces: tree.len() + 1,
        created,
    }))
}

/// Tries to remove `face` with whichever face operations are enabled.
///
/// # Errors
///
/// Returns a [`MeshError`] if a flip finds the complex inconsistent.
pub fn try_face_removal<C>(
    mesh: &mut ImproveMesh<C>,
    config: &ImproveConfig,
    face: &Face,
    require_improve: bool,
    stats: &mut TopologyStats,
) -> Result<Option<FaceRemoval>, MeshError>
where
    C: TetComplex,
{
    if mesh.complex().adjacencies(face).is_none() {
        return Ok(None);
    }
    let mut result = None;
    if let Some(shape) = face_shape(mesh, face)? {
        if shape.reflex == 0 && !shape.coplanar.is_empty() {
            if let [edge] = shape.coplanar.as_slice() {
                if config.flip22 && !mesh.is_anisotropic() {
                    result = try_flip22(
                        mesh,
                        config,
                        face,
                        shape.bottom,
                        shape.top,
                        *edge,
                        require_improve,
                        stats,
                    )?;
                }
            }
            stats.face_removal.record(1, result.is_some());
            return Ok(result);
        }
        if shape.reflex == 0 && config.single_face_removal {
            if !require_improve {
                result = try_flip23(mesh, config, face, false, stats)?;
            } else if !config.multi_face_removal {
                result = try_flip23(mesh, config, face, true, stats)?;
            }
        }
    }
    if result.is_none() && config.multi_face_removal {
        result = remove_multi_face(mesh, config, face, stats)?;
    }
    let faces = result.as_ref().map_or(1, |removal| removal.faces);
    stats.face_removal.record(faces, result.is_some());
    Ok(result)
}

/// Tries to remove each face of `tet`, pushing created tets on `output`.
/// Returns the number of faces removed.
///
/// # Errors
///
/// Returns a [`MeshError`] if a flip finds the complex inconsistent.
pub fn try_remove_all_faces<C>(
    mesh: &mut ImproveMesh<C>,
    config: &ImproveConfig,
    tet: &Tet,
    require_improve: bool,
    output: &mut TetStack,
    stats: &mut TopologyStats,
) -> Result<usize, MeshError>
where
    C: TetComplex,
{
    if !mesh.tet_exists(tet) {
        return Ok(0);
    }
    let oracle = config.oracle();
    let mut removed = 0;
    for i in 0..4 {
        let (j, k, l) = face_vertices(i);
        let face = [tet[j], tet[k], tet[l]];
        if mesh.complex().adjacencies(&face).is_none() {
            continue;
        }
        let result = if require_improve {
            try_face_removal(mesh, config, &face, true, stats)?
        } else {
            try_flip23(mesh, config, &face, false, stats)?
        };
        if let Some(removal) = result {
            removed += 1;
            push_created(mesh, &oracle, &removal.created, output)?;
        }
    }
    Ok(removed)
}

// =============================================================================
// PASS
// =============================================================================

/// One topological pass over `stack`.
///
/// Each live tet gets an edge removal attempt and, if that fails, a face
/// removal attempt on each of its faces. With `output`, the pass is local:
/// it collects the created and untouched tets there and is undone unless the
/// worst quality over them rose (or, under dynamic improvement, the means
/// rose without the worst falling). Without `output` the pass is global and
/// is undone only if the worst quality of the mesh fell.
///
/// # Errors
///
/// Returns an [`ImproveError`] if the complex is found inconsistent.
pub fn topo_pass<C>(
    mesh: &mut ImproveMesh<C>,
    config: &ImproveConfig,
    stack: &TetStack,
    mut output: Option<&mut TetStack>,
) -> Result<PassStats, ImproveError>
where
    C: TetComplex,
{
    let oracle = config.oracle();
    let mut stats = PassStats::new(PassKind::Topological);
    let before = if output.is_some() {
        stack_quality(mesh, &oracle, stack)?
    } else {
        mesh_quality(mesh, &oracle)?
    };
    stats.min_before = before.min;
    if let Some(output) = output.as_deref_mut() {
        output.clear();
    }

    if !config.any_topological() {
        if let Some(output) = output {
            output.append_unique(stack);
        }
        stats.min_after = before.min;
        stats.accepted = true;
        return Ok(stats);
    }

    let checkpoint = mesh.checkpoint();
    let mut produced = TetStack::new();
    let mut work = stack.clone();
    let mut changes = 0_usize;
    while let Some(entry) = work.pop() {
        if !mesh.tet_exists(&entry.tet) {
            stats.topology.stale += 1;
            continue;
        }
        let removed = config.edge_removal
            && try_edge_removal(mesh, config, &entry.tet, &mut produced, &mut stats.topology)?;
        let flipped = if removed {
            0
        } else {
            try_remove_all_faces(
                mesh,
                config,
                &entry.tet,
                true,
                &mut produced,
                &mut stats.topology,
            )?
        };
        if removed || flipped > 0 {
            changes += 1;
        } else {
            produced.push_unique(entry.tet, entry.quality);
        }
    }

    let after = match output.as_deref() {
        Some(_) => stack_quality(mesh, &oracle, &produced)?,
        None => mesh_quality(mesh, &oracle)?,
    };
    let rejected = if output.is_some() {
        let dynamic_success = config.dynamic_improvement
            && local_mean_improve(
                &before.thresholded_means,
                &after.thresholded_means,
                DYNAMIC_MEAN_IMPROVEMENT,
            )
            && after.min >= before.min;
        (after.min < before.min || changes == 0) && !dynamic_success
    } else {
        after.min < before.min
    };

    if rejected {
        tracing::debug!(
            before = before.min,
            after = after.min,
            changes,
            "topological pass did not improve; rolling back"
        );
        mesh.revert_to(checkpoint)?;
        if let Some(output) = output {
            output.append_unique(stack);
        }
        stats.min_after = before.min;
        stats.accepted = false;
    } else {
        if let Some(output) = output {
            output.append_unique(&produced);
        }
        stats.min_after = after.min;
        stats.accepted = true;
    }
    tracing::debug!(
        edges = stats.topology.edge_removal.total().successes,
        faces = stats.topology.face_removal.total().successes,
        min_before = stats.min_before,
        min_after = stats.min_after,
        "topological pass done"
    );
    Ok(stats)
}

// =============================================================================
// TESTS
// =============================================================================
