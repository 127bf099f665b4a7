//! Vertex kinds, constraint vectors and boundary classification.
//!
//! Before improvement every vertex is classified by how freely it may move:
//!
//! | Kind      | Boundary faces around it            | Motion                 |
//! |-----------|-------------------------------------|------------------------|
//! | `Free`    | none                                | anywhere               |
//! | `Facet`   | all coplanar                        | in the facet plane     |
//! | `Segment` | two coplanar groups                 | along their crease     |
//! | `Fixed`   | anything else                       | none (quadric-guarded) |
//! | `Input`   | not classified yet                  | none                   |

use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

use crate::core::boundary::BoundaryAnalysis;
use crate::core::complex::{Face, IncidentTets, TetComplex, VertexTag};
use crate::geometry::quadric::Quadric;

/// Tolerance on normal dot products for two boundary faces to count as coplanar.
pub const COPLANAR_TOLERANCE: f64 = 1.0e-4;

/// Smooth vertices on boundary facets.
pub const SMOOTH_FACET_VERTICES: u8 = 0x01;
/// Smooth vertices on boundary segments.
pub const SMOOTH_SEGMENT_VERTICES: u8 = 0x02;
/// Smooth fixed boundary vertices.
pub const SMOOTH_FIXED_VERTICES: u8 = 0x04;

/// How freely a vertex may move.
///
/// The discriminants order kinds from most to least constrained, after the
/// unclassified `Input` kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum VertexKind {
    /// Not classified yet.
    #[default]
    Input = 0,
    /// Corner of the boundary; does not move.
    Fixed = 1,
    /// On a crease between two boundary planes.
    Segment = 2,
    /// On a single boundary plane.
    Facet = 3,
    /// Interior vertex.
    Free = 4,
}

impl VertexKind {
    /// Whether the smoother may move a vertex of this kind under `smooth_kinds`.
    ///
    /// Free vertices are always smoothable; unclassified ones never are.
    #[must_use]
    pub const fn smoothable(self, smooth_kinds: u8) -> bool {
        match self {
            Self::Free => true,
            Self::Facet => smooth_kinds & SMOOTH_FACET_VERTICES != 0,
            Self::Segment => smooth_kinds & SMOOTH_SEGMENT_VERTICES != 0,
            Self::Fixed => smooth_kinds & SMOOTH_FIXED_VERTICES != 0,
            Self::Input => false,
        }
    }

    /// Whether the vertex lies on the boundary.
    #[must_use]
    pub const fn is_boundary(self) -> bool {
        matches!(self, Self::Fixed | Self::Segment | Self::Facet)
    }
}

impl std::fmt::Display for VertexKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Input => "input",
            Self::Fixed => "fixed",
            Self::Segment => "segment",
            Self::Facet => "facet",
            Self::Free => "free",
        };
        f.write_str(name)
    }
}

/// Per-vertex improvement data.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VertexInfo {
    /// Motion constraint class.
    pub kind: VertexKind,
    /// Facet normal or segment direction (unit length), zero otherwise.
    pub vec: Vector3<f64>,
    /// Surface quadric for boundary vertices, if collected.
    pub quadric: Option<Quadric>,
}

impl VertexInfo {
    /// Info for a vertex of `kind` with constraint vector `vec`.
    #[must_use]
    pub const fn new(kind: VertexKind, vec: Vector3<f64>) -> Self {
        Self {
            kind,
            vec,
            quadric: None,
        }
    }

    /// Interior vertex.
    #[must_use]
    pub fn free() -> Self {
        Self::new(VertexKind::Free, Vector3::zeros())
    }
}

/// Unit normal of a triangle, or `None` if it is degenerate.
#[must_use]
pub fn face_normal(a: &Point3<f64>, b: &Point3<f64>, c: &Point3<f64>) -> Option<Vector3<f64>> {
    (b - a).cross(&(c - a)).try_normalize(0.0)
}

#[inline]
fn coplanar(n: &Vector3<f64>, reference: &Vector3<f64>) -> bool {
    (n.dot(reference) - 1.0).abs() <= COPLANAR_TOLERANCE
}

/// Classifies a boundary vertex from the unit normals of its boundary faces.
///
/// Returns `Facet` with the common normal, `Segment` with the unit crease
/// direction, or `Fixed`.
#[must_use]
pub fn classify_from_normals(normals: &[Vector3<f64>]) -> VertexInfo {
    let fixed = VertexInfo::new(VertexKind::Fixed, Vector3::zeros());
    let Some(first) = normals.first() else {
        return fixed;
    };
    if normals.len() < 3 {
        return fixed;
    }
    if normals.iter().all(|n| coplanar(n, first)) {
        return VertexInfo::new(VertexKind::Facet, *first);
    }

    let mut second: Option<Vector3<f64>> = None;
    for n in normals {
        if coplanar(n, first) {
            continue;
        }
        match second {
            None => second = Some(*n),
            Some(s) if coplanar(n, &s) => {}
            Some(_) => return fixed,
        }
    }
    second
        .and_then(|s| first.cross(&s).try_normalize(0.0))
        .map_or(fixed, |direction| VertexInfo::new(VertexKind::Segment, direction))
}

/// Boundary faces of `star` that contain `vertex`.
#[must_use]
pub fn star_boundary_faces<C>(complex: &C, vertex: VertexTag, star: &IncidentTets) -> Vec<Face>
where
    C: TetComplex + ?Sized,
{
    star.tets
        .iter()
        .flat_map(|tet| complex.boundary_faces(tet))
        .filter(|face| face.contains(&vertex))
        .collect()
}

/// Classifies the vertex `star.tets[0][0]` from its star.
///
/// Faces whose corners are missing or degenerate are skipped.
#[must_use]
pub fn classify_star<C>(complex: &C, star: &IncidentTets) -> VertexInfo
where
    C: TetComplex + ?Sized,
{
    if star.interior {
        return VertexInfo::free();
    }
    let Some(vertex) = star.tets.first().map(|tet| tet[0]) else {
        return VertexInfo::new(VertexKind::Fixed, Vector3::zeros());
    };
    let normals: Vec<Vector3<f64>> = star_boundary_faces(complex, vertex, star)
        .iter()
        .filter_map(|face| {
            let a = complex.position(face[0])?;
            let b = complex.position(face[1])?;
            let c = complex.position(face[2])?;
            face_normal(&a, &b, &c)
        })
        .collect();
    classify_from_normals(&normals)
}

// =============================================================================
// TESTS
// =============================================================================
