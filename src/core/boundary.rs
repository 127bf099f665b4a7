//! Boundary and edge-ring analysis.
//!
//! This module implements the [`BoundaryAnalysis`] trait for every
//! [`TetComplex`], answering which vertices, edges and faces of a tet touch the
//! mesh boundary and walking the ring of tets around an edge.
//!
//! # Boundary Invariant
//!
//! A face is on the boundary when there is no tet on one side of it (a ghost
//! tet, reported as `None` by [`TetComplex::adjacencies`]). A boundary edge has
//! exactly two incident boundary faces, and its ring of tets is a fan rather
//! than a closed cycle.

use smallvec::SmallVec;
use thiserror::Error;

use crate::core::collections::{FaceBuffer, SmallBuffer};
use crate::core::complex::{Face, Tet, TetComplex, VertexTag, outward_faces, rotate_to_front};
use crate::geometry::quality::edge_faces;

/// Errors raised when adjacency around an edge is inconsistent.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum RingError {
    /// The walk around an edge neither closed nor hit the boundary.
    #[error("Ring around edge {edge:?} did not close after {steps} steps")]
    RingNotClosed {
        /// The edge being walked.
        edge: [VertexTag; 2],
        /// Steps taken before giving up.
        steps: usize,
    },

    /// A face that must exist is missing from the complex.
    #[error("Face {face:?} expected during ring walk is not in the complex")]
    MissingFace {
        /// The face that was looked up.
        face: Face,
    },

    /// A boundary walk found only one of the two boundary faces.
    #[error("Boundary edge {edge:?} has an unmatched boundary face")]
    UnmatchedBoundary {
        /// The edge being walked.
        edge: [VertexTag; 2],
    },
}

/// The ring of tets around an edge.
///
/// `ring` lists the vertices around the edge `(origin, destination)` in the
/// order that makes `[origin, destination, ring[i + 1], ring[i]]` a
/// positively oriented tet for every consecutive pair. For an interior edge
/// the ring is cyclic (the last vertex pairs with the first).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EdgeRing {
    /// First edge vertex.
    pub origin: VertexTag,
    /// Second edge vertex.
    pub destination: VertexTag,
    /// Vertices around the edge.
    pub ring: Vec<VertexTag>,
    /// For a boundary edge, the third vertices of the two boundary faces
    /// (first and last ring entries).
    pub boundary: Option<[VertexTag; 2]>,
}

impl EdgeRing {
    /// Whether the edge lies on the boundary.
    #[must_use]
    pub const fn is_boundary(&self) -> bool {
        self.boundary.is_some()
    }

    /// Number of tets around the edge.
    #[must_use]
    pub fn tet_count(&self) -> usize {
        if self.is_boundary() {
            self.ring.len().saturating_sub(1)
        } else {
            self.ring.len()
        }
    }

    /// The tets around the edge, each as `[origin, destination, next, prev]`.
    #[must_use]
    pub fn tets(&self) -> Vec<Tet> {
        let n = self.ring.len();
        (0..self.tet_count())
            .map(|i| {
                [
                    self.origin,
                    self.destination,
                    self.ring[(i + 1) % n],
                    self.ring[i],
                ]
            })
            .collect()
    }
}

/// A boundary edge of a tet together with its ring.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BoundaryEdge {
    /// The edge endpoints.
    pub edge: [VertexTag; 2],
    /// The ring around it.
    pub ring: EdgeRing,
}

/// Even permutation of `tet` starting with local vertices `i` and `j`.
#[must_use]
pub fn edge_first(tet: &Tet, i: usize, j: usize) -> Tet {
    let (mut k, mut l) = edge_faces(i, j);
    if (i + j) % 2 == 0 {
        std::mem::swap(&mut k, &mut l);
    }
    [tet[i], tet[j], tet[k], tet[l]]
}

/// Boundary queries for tetrahedral complexes.
pub trait BoundaryAnalysis {
    /// Outward faces of `tet` with no tet beyond them.
    fn boundary_faces(&self, tet: &Tet) -> FaceBuffer;

    /// Whether any face of `tet` is on the boundary.
    fn is_boundary_tet(&self, tet: &Tet) -> bool {
        !self.boundary_faces(tet).is_empty()
    }

    /// Vertices of `tet` whose star reaches the boundary.
    fn boundary_vertices(&self, tet: &Tet) -> SmallBuffer<VertexTag, 4>;

    /// Walks the ring of tets around the edge `(tet[0], tet[1])` of the live
    /// tet `tet`.
    ///
    /// # Errors
    ///
    /// Returns a [`RingError`] if adjacency around the edge is inconsistent.
    fn edge_ring(&self, tet: &Tet) -> Result<EdgeRing, RingError>;

    /// Edges of `tet` on the boundary, with their rings.
    ///
    /// # Errors
    ///
    /// Propagates [`RingError`] from the ring walks.
    fn boundary_edges(&self, tet: &Tet) -> Result<SmallVec<[BoundaryEdge; 6]>, RingError>;

    /// Every boundary face of the complex, oriented outward.
    fn surface_faces(&self) -> Vec<Face>;
}

impl<C> BoundaryAnalysis for C
where
    C: TetComplex + ?Sized,
{
    fn boundary_faces(&self, tet: &Tet) -> FaceBuffer {
        outward_faces(tet)
            .into_iter()
            .filter(|(face, _)| self.adjacencies(face).is_some_and(|adj| adj.top.is_none()))
            .map(|(face, _)| face)
            .collect()
    }

    fn boundary_vertices(&self, tet: &Tet) -> SmallBuffer<VertexTag, 4> {
        tet.iter()
            .filter(|&&v| {
                rotate_to_front(tet, v).is_some_and(|seed| !self.incident_tets(&seed).interior)
            })
            .copied()
            .collect()
    }

    fn edge_ring(&self, tet: &Tet) -> Result<EdgeRing, RingError> {
        let [v1, v2, v3, v4] = *tet;
        let limit = self.number_of_tets() + 1;

        let forward = match walk(self, [v1, v2], v3, limit)? {
            Walk::Closed(ring) => {
                return Ok(EdgeRing {
                    origin: v1,
                    destination: v2,
                    ring,
                    boundary: None,
                });
            }
            Walk::Boundary(forward) => forward,
        };

        let Walk::Boundary(mut backward) = walk(self, [v2, v1], v4, limit)? else {
            return Err(RingError::UnmatchedBoundary { edge: [v1, v2] });
        };
        backward.reverse();
        backward.extend(forward);
        let first = backward[0];
        let last = backward[backward.len() - 1];
        Ok(EdgeRing {
            origin: v1,
            destination: v2,
            ring: backward,
            boundary: Some([first, last]),
        })
    }

    fn boundary_edges(&self, tet: &Tet) -> Result<SmallVec<[BoundaryEdge; 6]>, RingError> {
        let mut edges = SmallVec::new();
        for i in 0..3 {
            for j in (i + 1)..4 {
                let ring = self.edge_ring(&edge_first(tet, i, j))?;
                if ring.is_boundary() {
                    edges.push(BoundaryEdge {
                        edge: [tet[i], tet[j]],
                        ring,
                    });
                }
            }
        }
        Ok(edges)
    }

    fn surface_faces(&self) -> Vec<Face> {
        self.tets()
            .iter()
            .flat_map(|tet| self.boundary_faces(tet))
            .collect()
    }
}

enum Walk {
    Closed(Vec<VertexTag>),
    Boundary(Vec<VertexTag>),
}

/// Rotates around `edge` starting from the face `(edge, start)`.
fn walk<C>(
    complex: &C,
    edge: [VertexTag; 2],
    start: VertexTag,
    limit: usize,
) -> Result<Walk, RingError>
where
    C: TetComplex + ?Sized,
{
    let [e1, e2] = edge;
    let mut ring = vec![start];
    let mut current = start;
    loop {
        let face = [e1, e2, current];
        let adjacency = complex
            .adjacencies(&face)
            .ok_or(RingError::MissingFace { face })?;
        match adjacency.top {
            None => return Ok(Walk::Boundary(ring)),
            Some(next) if next == start => return Ok(Walk::Closed(ring)),
            Some(next) => {
                if ring.len() > limit {
                    return Err(RingError::RingNotClosed {
                        edge,
                        steps: ring.len(),
                    });
                }
                ring.push(next);
                current = next;
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
