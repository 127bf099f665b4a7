//! Tetrahedral complex storage and adjacency queries.
//!
//! The improvement engine never touches storage directly: it talks to a
//! [`TetComplex`], which answers existence and face-adjacency queries and
//! performs raw tet insertion and deletion. [`TetMesh`] is the bundled
//! implementation, a map from oriented faces to the vertex beneath them.
//!
//! # Orientation
//!
//! A tet `[a, b, c, d]` is stored only if `orient3d(a, b, c, d) > 0`. Its four
//! outward faces, each listed counterclockwise when seen from outside, are
//!
//! ```text
//! (a, b, c) over d,   (a, c, d) over b,   (a, d, b) over c,   (b, d, c) over a
//! ```
//!
//! Even permutations of a tet describe the same tet; tet identity for sets is
//! the sorted tag array (see [`tet_key`]).
//!
//! # Examples
//!
//! ```rust
//! use nalgebra::Point3;
//! use tetimprove::core::complex::{TetComplex, TetMesh};
//!
//! let points = [
//!     Point3::new(0.0, 0.0, 0.0),
//!     Point3::new(0.0, 1.0, 0.0),
//!     Point3::new(1.0, 0.0, 0.0),
//!     Point3::new(0.0, 0.0, 1.0),
//! ];
//! let (mesh, tags) = TetMesh::from_tets(&points, &[[0, 1, 2, 3]]).unwrap();
//! assert_eq!(mesh.number_of_tets(), 1);
//! assert!(mesh.tet_exists(&[tags[0], tags[1], tags[2], tags[3]]));
//! // odd permutations are a different (inverted) tet
//! assert!(!mesh.tet_exists(&[tags[1], tags[0], tags[2], tags[3]]));
//! ```

use nalgebra::Point3;
use slotmap::new_key_type;
use thiserror::Error;

use crate::core::collections::{FastHashMap, FastHashSet, StorageMap};
use crate::geometry::predicates::orient3d;

new_key_type! {
    /// Stable identifier of a vertex in a complex.
    pub struct VertexTag;
}

/// A tetrahedron as four vertex tags, positively oriented.
pub type Tet = [VertexTag; 4];

/// An oriented triangle as three vertex tags.
pub type Face = [VertexTag; 3];

/// Even permutations bringing local index `i` to the front.
const FRONT_ROTATIONS: [[usize; 4]; 4] = [[0, 1, 2, 3], [1, 0, 3, 2], [2, 3, 0, 1], [3, 2, 1, 0]];

/// Errors raised while building a [`TetMesh`] from raw arrays.
#[derive(Clone, Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum ComplexError {
    /// A tet references a point index outside the point array.
    #[error("Tet {tet_index} references unknown point index {point_index}")]
    UnknownPoint {
        /// Index of the offending tet.
        tet_index: usize,
        /// The out-of-range point index.
        point_index: usize,
    },

    /// A tet has zero or negative volume.
    #[error("Tet {tet_index} is not positively oriented (orient3d = {orient})")]
    NotPositive {
        /// Index of the offending tet.
        tet_index: usize,
        /// Orientation determinant of its corners.
        orient: f64,
    },

    /// A tet's face is already claimed by another tet.
    #[error("Tet {tet_index} overlaps a face that is already in use")]
    NonManifoldFace {
        /// Index of the offending tet.
        tet_index: usize,
    },
}

/// The two apexes on either side of an oriented face.
///
/// `bottom` is the apex of the tet for which the face is outward; `top` is the
/// apex on the other side. `None` means the face is on the boundary on that
/// side (a ghost tet).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FaceAdjacency {
    /// Apex across the face, if any.
    pub top: Option<VertexTag>,
    /// Apex beneath the face, if any.
    pub bottom: Option<VertexTag>,
}

impl FaceAdjacency {
    /// Whether one side of the face is outside the mesh.
    #[must_use]
    pub const fn is_boundary(&self) -> bool {
        self.top.is_none() || self.bottom.is_none()
    }
}

/// Tets around a vertex, each rotated so that the vertex comes first.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IncidentTets {
    /// The tets of the star.
    pub tets: Vec<Tet>,
    /// `true` if no face of the star lies on the boundary.
    pub interior: bool,
}

/// Outward faces of `tet` with the apex opposite each.
#[inline]
#[must_use]
pub const fn outward_faces(tet: &Tet) -> [(Face, VertexTag); 4] {
    let [a, b, c, d] = *tet;
    [([a, b, c], d), ([a, c, d], b), ([a, d, b], c), ([b, d, c], a)]
}

/// Order-independent identity of a tet.
#[inline]
#[must_use]
pub fn tet_key(tet: &Tet) -> Tet {
    let mut key = *tet;
    key.sort_unstable();
    key
}

/// Whether `a` and `b` have the same vertices.
#[inline]
#[must_use]
pub fn same_tet(a: &Tet, b: &Tet) -> bool {
    tet_key(a) == tet_key(b)
}

/// Rotation of `face` starting at its smallest tag.
#[inline]
#[must_use]
pub fn canonical_face(face: &Face) -> Face {
    let [x, y, z] = *face;
    if x < y && x < z {
        [x, y, z]
    } else if y < z {
        [y, z, x]
    } else {
        [z, x, y]
    }
}

/// Even permutation of `tet` that puts `vertex` first.
#[must_use]
pub fn rotate_to_front(tet: &Tet, vertex: VertexTag) -> Option<Tet> {
    let index = tet.iter().position(|&v| v == vertex)?;
    Some(FRONT_ROTATIONS[index].map(|i| tet[i]))
}

/// Storage and adjacency interface consumed by the improvement engine.
///
/// Implementations must keep every stored tet positively oriented *by tag*;
/// they do not check geometry on insertion.
pub trait TetComplex {
    /// Inserts a tet. Returns `false` if a vertex is unknown or any of its
    /// outward faces is already occupied.
    fn insert_tet(&mut self, tet: Tet) -> bool;

    /// Deletes a tet. Returns `false` if it is not in the complex.
    fn delete_tet(&mut self, tet: Tet) -> bool;

    /// Apexes on both sides of `face`, or `None` if no tet has the face.
    fn adjacencies(&self, face: &Face) -> Option<FaceAdjacency>;

    /// Coordinates of a vertex.
    fn position(&self, vertex: VertexTag) -> Option<Point3<f64>>;

    /// Moves a vertex. Returns `false` for an unknown vertex.
    fn set_position(&mut self, vertex: VertexTag, position: Point3<f64>) -> bool;

    /// Creates a vertex that no tet uses yet.
    fn add_vertex(&mut self, position: Point3<f64>) -> VertexTag;

    /// Removes a vertex. Returns `false` if it is unknown.
    fn remove_vertex(&mut self, vertex: VertexTag) -> bool;

    /// Every live tet, once each.
    fn tets(&self) -> Vec<Tet>;

    /// Number of live tets.
    fn number_of_tets(&self) -> usize;

    /// Number of vertices, including ones no tet uses.
    fn number_of_vertices(&self) -> usize;

    /// Every vertex tag.
    fn vertex_tags(&self) -> Vec<VertexTag>;

    /// Whether the exact tet (up to even permutation) is live.
    fn tet_exists(&self, tet: &Tet) -> bool {
        self.adjacencies(&[tet[0], tet[1], tet[2]])
            .and_then(|adj| adj.bottom)
            == Some(tet[3])
    }

    /// Walks the star of `seed[0]` through face adjacency.
    ///
    /// Returns an empty star if `seed` is not live.
    fn incident_tets(&self, seed: &Tet) -> IncidentTets {
        let mut star = IncidentTets {
            tets: Vec::new(),
            interior: true,
        };
        if !self.tet_exists(seed) {
            return star;
        }
        let v = seed[0];
        let mut visited: FastHashSet<Tet> = FastHashSet::default();
        let mut stack = vec![*seed];
        visited.insert(tet_key(seed));
        while let Some(tet) = stack.pop() {
            let [_, a, b, c] = tet;
            star.tets.push(tet);
            for [x, y] in [[a, b], [b, c], [c, a]] {
                match self.adjacencies(&[v, x, y]).and_then(|adj| adj.top) {
                    Some(w) => {
                        let neighbor = [v, y, x, w];
                        if visited.insert(tet_key(&neighbor)) {
                            stack.push(neighbor);
                        }
                    }
                    None => star.interior = false,
                }
            }
        }
        star
    }
}

/// Face-map tetrahedral complex.
///
/// Each live tet contributes its four outward faces (in canonical rotation)
/// mapped to the apex beneath them.
#[derive(Clone, Debug, Default)]
pub struct TetMesh {
    vertices: StorageMap<VertexTag, Point3<f64>>,
    faces: FastHashMap<Face, VertexTag>,
    tet_count: usize,
}

impl TetMesh {
    /// Empty complex.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a complex from points and index tets.
    ///
    /// Returns the complex together with the tag of each input point, in
    /// input order.
    ///
    /// # Errors
    ///
    /// Returns a [`ComplexError`] if a tet references an unknown point, is not
    /// positively oriented, or overlaps a face of an earlier tet.
    pub fn from_tets(
        points: &[Point3<f64>],
        tets: &[[usize; 4]],
    ) -> Result<(Self, Vec<VertexTag>), ComplexError> {
        let mut mesh = Self::new();
        let tags: Vec<VertexTag> = points.iter().map(|&p| mesh.add_vertex(p)).collect();
        for (tet_index, indices) in tets.iter().enumerate() {
            let mut corners = [Point3::origin(); 4];
            let mut tet = [VertexTag::default(); 4];
            for (slot, &point_index) in indices.iter().enumerate() {
                let Some(&p) = points.get(point_index) else {
                    return Err(ComplexError::UnknownPoint {
                        tet_index,
                        point_index,
                    });
                };
                corners[slot] = p;
                tet[slot] = tags[point_index];
            }
            let orient = orient3d(&corners[0], &corners[1], &corners[2], &corners[3]);
            if orient <= 0.0 {
                return Err(ComplexError::NotPositive { tet_index, orient });
            }
            if !mesh.insert_tet(tet) {
                return Err(ComplexError::NonManifoldFace { tet_index });
            }
        }
        Ok((mesh, tags))
    }

    fn apex(&self, face: &Face) -> Option<VertexTag> {
        self.faces.get(&canonical_face(face)).copied()
    }
}

impl TetComplex for TetMesh {
    fn insert_tet(&mut self, tet: Tet) -> bool {
        if tet.iter().any(|&v| !self.vertices.contains_key(v)) {
            return false;
        }
        let key = tet_key(&tet);
        if key.windows(2).any(|w| w[0] == w[1]) {
            return false;
        }
        let faces = outward_faces(&tet);
        if faces
            .iter()
            .any(|(face, _)| self.faces.contains_key(&canonical_face(face)))
        {
            return false;
        }
        for (face, apex) in faces {
            self.faces.insert(canonical_face(&face), apex);
        }
        self.tet_count += 1;
        true
    }

    fn delete_tet(&mut self, tet: Tet) -> bool {
        let faces = outward_faces(&tet);
        if faces
            .iter()
            .any(|(face, apex)| self.apex(face) != Some(*apex))
        {
            return false;
        }
        for (face, _) in faces {
            self.faces.remove(&canonical_face(&face));
        }
        self.tet_count -= 1;
        true
    }

    fn adjacencies(&self, face: &Face) -> Option<FaceAdjacency> {
        let [x, y, z] = *face;
        let adjacency = FaceAdjacency {
            top: self.apex(&[x, z, y]),
            bottom: self.apex(face),
        };
        (adjacency.top.is_some() || adjacency.bottom.is_some()).then_some(adjacency)
    }

    fn position(&self, vertex: VertexTag) -> Option<Point3<f64>> {
        self.vertices.get(vertex).copied()
    }

    fn set_position(&mut self, vertex: VertexTag, position: Point3<f64>) -> bool {
        match self.vertices.get_mut(vertex) {
            Some(p) => {
                *p = position;
                true
            }
            None => false,
        }
    }

    fn add_vertex(&mut self, position: Point3<f64>) -> VertexTag {
        self.vertices.insert(position)
    }

    fn remove_vertex(&mut self, vertex: VertexTag) -> bool {
        self.vertices.remove(vertex).is_some()
    }

    fn tets(&self) -> Vec<Tet> {
        // each tet is reported through the face opposite its smallest tag
        self.faces
            .iter()
            .filter(|&(face, apex)| *apex < face[0])
            .map(|(face, &apex)| [face[0], face[1], face[2], apex])
            .collect()
    }

    fn number_of_tets(&self) -> usize {
        self.tet_count
    }

    fn number_of_vertices(&self) -> usize {
        self.vertices.len()
    }

    fn vertex_tags(&self) -> Vec<VertexTag> {
        self.vertices.keys().collect()
    }
}

// =============================================================================
// TESTS
// =============================================================================
