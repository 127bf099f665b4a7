//! Flip operations for tetrahedral complexes.
//!
//! Every local re-triangulation in the engine is one of nine flips. Each flip
//! is described by a [`Flip`]: its [`FlipKind`] plus five vertex tags. The
//! descriptor alone determines the tets removed and the tets created, so one
//! generic routine applies any flip and the same routine applied to
//! [`Flip::inverse`] undoes it.
//!
//! | Kind          | Vertices                   | Removed                         | Created                                             |
//! |---------------|----------------------------|---------------------------------|-----------------------------------------------------|
//! | `Flip23`      | `(1, 2, 3, bot, top)`      | `(top,1,2,3)` `(bot,3,2,1)`     | `(top,1,2,bot)` `(top,2,3,bot)` `(top,3,1,bot)`     |
//! | `Flip22`      | `(1, 2, 3, bot, top)`      | `(top,1,2,3)` `(bot,3,2,1)`     | `(3,1,top,bot)` `(3,2,bot,top)`                     |
//! | `Flip14`      | `(1, 2, 3, 4, body)`       | `(1,2,3,4)`                     | `(1,2,3,b)` `(1,3,4,b)` `(1,4,2,b)` `(b,2,3,4)`     |
//! | `Flip13`      | `(1, 2, 3, 4, facet)`      | `(1,2,3,4)`                     | `(1,2,f,4)` `(1,2,3,f)` `(1,3,4,f)`                 |
//! | `Flip12`      | `(1, 2, 3, 4, segment)`    | `(1,2,3,4)`                     | `(1,3,4,s)` `(2,4,3,s)`                             |
//!
//! `Flip32`, `Flip41`, `Flip31` and `Flip21` swap the removed and created
//! sets of their mirror. A 2-2 flip is its own mirror up to relabelling.
//!
//! # References
//! - Joe, B. (1995) - "Construction of three-dimensional improved-quality
//!   triangulations using local transformations"
//! - Klingner, B.M. and Shewchuk, J.R. (2007) - "Aggressive Tetrahedral Mesh
//!   Improvement"

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::collections::TetBuffer;
use crate::core::complex::{Tet, TetComplex, VertexTag};

/// The nine flip kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlipKind {
    /// Split a tet around an interior vertex.
    Flip14,
    /// Merge four tets around an interior vertex.
    Flip41,
    /// Split a boundary-face tet around a vertex on that face.
    Flip13,
    /// Merge three tets around a boundary-face vertex.
    Flip31,
    /// Split a boundary-edge tet around a vertex on that edge.
    Flip12,
    /// Merge two tets around a boundary-edge vertex.
    Flip21,
    /// Replace two tets sharing a face with three sharing an edge.
    Flip23,
    /// Replace three tets sharing an edge with two sharing a face.
    Flip32,
    /// Re-triangulate two boundary tets across a coplanar boundary edge.
    Flip22,
}

impl FlipKind {
    /// The kind that undoes this one.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use tetimprove::core::algorithms::flips::FlipKind;
    ///
    /// assert_eq!(FlipKind::Flip23.inverse(), FlipKind::Flip32);
    /// assert_eq!(FlipKind::Flip22.inverse(), FlipKind::Flip22);
    /// ```
    #[must_use]
    pub const fn inverse(self) -> Self {
        match self {
            Self::Flip14 => Self::Flip41,
            Self::Flip41 => Self::Flip14,
            Self::Flip13 => Self::Flip31,
            Self::Flip31 => Self::Flip13,
            Self::Flip12 => Self::Flip21,
            Self::Flip21 => Self::Flip12,
            Self::Flip23 => Self::Flip32,
            Self::Flip32 => Self::Flip23,
            Self::Flip22 => Self::Flip22,
        }
    }

    /// Number of tets removed and created, in that order.
    #[must_use]
    pub const fn arity(self) -> (usize, usize) {
        match self {
            Self::Flip14 => (1, 4),
            Self::Flip41 => (4, 1),
            Self::Flip13 => (1, 3),
            Self::Flip31 => (3, 1),
            Self::Flip12 => (1, 2),
            Self::Flip21 => (2, 1),
            Self::Flip23 => (2, 3),
            Self::Flip32 => (3, 2),
            Self::Flip22 => (2, 2),
        }
    }
}

impl fmt::Display for FlipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (removed, created) = self.arity();
        write!(f, "{removed}-{created} flip")
    }
}

/// Errors raised when a flip does not match the complex.
///
/// A failed flip leaves the complex as it was.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum FlipError {
    /// A tet the flip removes is not live.
    #[error("{kind} expects tet {tet:?}, which is not in the complex")]
    MissingTet {
        /// The flip kind.
        kind: FlipKind,
        /// The missing tet.
        tet: Tet,
    },
    /// A tet the flip creates could not be inserted.
    #[error("{kind} cannot insert tet {tet:?}")]
    BlockedTet {
        /// The flip kind.
        kind: FlipKind,
        /// The blocked tet.
        tet: Tet,
    },
}

/// A flip descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Flip {
    /// Which flip.
    pub kind: FlipKind,
    /// The five vertices in the order given by the kind.
    pub vertices: [VertexTag; 5],
}

impl Flip {
    /// Descriptor from raw parts.
    #[must_use]
    pub const fn new(kind: FlipKind, vertices: [VertexTag; 5]) -> Self {
        Self { kind, vertices }
    }

    /// 2-3 flip of the face `(v1, v2, v3)` between `bot` and `top`.
    #[must_use]
    pub const fn flip23(
        v1: VertexTag,
        v2: VertexTag,
        v3: VertexTag,
        bot: VertexTag,
        top: VertexTag,
    ) -> Self {
        Self::new(FlipKind::Flip23, [v1, v2, v3, bot, top])
    }

    /// 3-2 flip removing the edge `(bot, top)` with ring `(v1, v2, v3)`.
    #[must_use]
    pub const fn flip32(
        v1: VertexTag,
        v2: VertexTag,
        v3: VertexTag,
        bot: VertexTag,
        top: VertexTag,
    ) -> Self {
        Self::new(FlipKind::Flip32, [v1, v2, v3, bot, top])
    }

    /// 2-2 flip replacing the boundary edge `(v1, v2)` with `(bot, top)`.
    #[must_use]
    pub const fn flip22(
        v1: VertexTag,
        v2: VertexTag,
        v3: VertexTag,
        bot: VertexTag,
        top: VertexTag,
    ) -> Self {
        Self::new(FlipKind::Flip22, [v1, v2, v3, bot, top])
    }

    /// 1-4 flip of `tet` around `body`.
    #[must_use]
    pub const fn flip14(tet: &Tet, body: VertexTag) -> Self {
        Self::new(FlipKind::Flip14, [tet[0], tet[1], tet[2], tet[3], body])
    }

    /// 1-3 flip of `tet` around `facet`, a vertex on face `(tet[1], tet[2], tet[3])`.
    #[must_use]
    pub const fn flip13(tet: &Tet, facet: VertexTag) -> Self {
        Self::new(FlipKind::Flip13, [tet[0], tet[1], tet[2], tet[3], facet])
    }

    /// 1-2 flip of `tet` around `segment`, a vertex on edge `(tet[0], tet[1])`.
    #[must_use]
    pub const fn flip12(tet: &Tet, segment: VertexTag) -> Self {
        Self::new(FlipKind::Flip12, [tet[0], tet[1], tet[2], tet[3], segment])
    }

    /// The descriptor that undoes this flip.
    #[must_use]
    pub const fn inverse(&self) -> Self {
        let [v1, v2, v3, v4, v5] = self.vertices;
        match self.kind {
            // the 2-2 flip mirrored onto its own output
            FlipKind::Flip22 => Self::new(FlipKind::Flip22, [v4, v5, v3, v2, v1]),
            kind => Self::new(kind.inverse(), self.vertices),
        }
    }

    /// Tets removed by the flip.
    #[must_use]
    pub fn old_tets(&self) -> TetBuffer {
        match self.kind {
            FlipKind::Flip14 | FlipKind::Flip13 | FlipKind::Flip12 => self.split_side(),
            FlipKind::Flip41 | FlipKind::Flip31 | FlipKind::Flip21 => self.fan_side(),
            FlipKind::Flip23 | FlipKind::Flip22 => self.two_face_side(),
            FlipKind::Flip32 => self.three_edge_side(),
        }
    }

    /// Tets created by the flip.
    #[must_use]
    pub fn new_tets(&self) -> TetBuffer {
        match self.kind {
            FlipKind::Flip14 | FlipKind::Flip13 | FlipKind::Flip12 => self.fan_side(),
            FlipKind::Flip41 | FlipKind::Flip31 | FlipKind::Flip21 => self.split_side(),
            FlipKind::Flip23 => self.three_edge_side(),
            FlipKind::Flip32 => self.two_face_side(),
            FlipKind::Flip22 => {
                let [v1, v2, v3, bot, top] = self.vertices;
                TetBuffer::from_slice(&[[v3, v1, top, bot], [v3, v2, bot, top]])
            }
        }
    }

    /// The single tet on the unsplit side of a 1-n flip.
    fn split_side(&self) -> TetBuffer {
        let [v1, v2, v3, v4, _] = self.vertices;
        TetBuffer::from_slice(&[[v1, v2, v3, v4]])
    }

    /// The fan around the new vertex of a 1-n flip.
    fn fan_side(&self) -> TetBuffer {
        let [v1, v2, v3, v4, n] = self.vertices;
        match self.kind {
            FlipKind::Flip14 | FlipKind::Flip41 => TetBuffer::from_slice(&[
                [v1, v2, v3, n],
                [v1, v3, v4, n],
                [v1, v4, v2, n],
                [n, v2, v3, v4],
            ]),
            FlipKind::Flip13 | FlipKind::Flip31 => {
                TetBuffer::from_slice(&[[v1, v2, n, v4], [v1, v2, v3, n], [v1, v3, v4, n]])
            }
            _ => TetBuffer::from_slice(&[[v1, v3, v4, n], [v2, v4, v3, n]]),
        }
    }

    fn two_face_side(&self) -> TetBuffer {
        let [v1, v2, v3, bot, top] = self.vertices;
        TetBuffer::from_slice(&[[top, v1, v2, v3], [bot, v3, v2, v1]])
    }

    fn three_edge_side(&self) -> TetBuffer {
        let [v1, v2, v3, bot, top] = self.vertices;
        TetBuffer::from_slice(&[[top, v1, v2, bot], [top, v2, v3, bot], [top, v3, v1, bot]])
    }

    /// Applies the flip to `complex`.
    ///
    /// # Errors
    ///
    /// Returns a [`FlipError`] if a removed tet is missing or a created tet is
    /// blocked. The complex is left unchanged in that case.
    pub fn apply<C>(&self, complex: &mut C) -> Result<(), FlipError>
    where
        C: TetComplex + ?Sized,
    {
        let old = self.old_tets();
        if let Some(&tet) = old.iter().find(|tet| !complex.tet_exists(tet)) {
            return Err(FlipError::MissingTet {
                kind: self.kind,
                tet,
            });
        }
        for &tet in &old {
            complex.delete_tet(tet);
        }
        let new = self.new_tets();
        for (inserted, &tet) in new.iter().enumerate() {
            if !complex.insert_tet(tet) {
                for &undo in &new[..inserted] {
                    complex.delete_tet(undo);
                }
                for &restore in &old {
                    complex.insert_tet(restore);
                }
                return Err(FlipError::BlockedTet {
                    kind: self.kind,
                    tet,
                });
            }
        }
        Ok(())
    }

    /// Undoes the flip on `complex`.
    ///
    /// # Errors
    ///
    /// Same as [`Flip::apply`] for the inverse flip.
    pub fn invert<C>(&self, complex: &mut C) -> Result<(), FlipError>
    where
        C: TetComplex + ?Sized,
    {
        self.inverse().apply(complex)
    }
}

impl fmt::Display for Flip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {:?}", self.kind, self.vertices)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::complex::{TetMesh, tet_key};
    use crate::geometry::predicates::orient3d;
    use nalgebra::Point3;

    fn sorted_tets(mesh: &TetMesh) -> Vec<Tet> {
        let mut tets: Vec<Tet> = mesh.tets().iter().map(tet_key).collect();
        tets.sort_unstable();
        tets
    }

    fn all_positive(mesh: &TetMesh) -> bool {
        mesh.tets().iter().all(|tet| {
            let p = tet.map(|v| mesh.position(v).unwrap());
            orient3d(&p[0], &p[1], &p[2], &p[3]) > 0.0
        })
    }

    /// Two tets sharing face (1, 2, 3) with apexes `bot` below and `top` above.
    fn two_tets() -> (TetMesh, [VertexTag; 5]) {
        let points = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.3, 0.3, -1.0),
            Point3::new(0.3, 0.3, 1.0),
        ];
        // (1, 2, 3) is counterclockwise seen from top
        let (mesh, t) = TetMesh::from_tets(&points, &[[4, 0, 1, 2], [3, 2, 1, 0]]).unwrap();
        let flip = [t[0], t[1], t[2], t[3], t[4]];
        (mesh, flip)
    }

    #[test]
    fn test_flip23_then_flip32_round_trip() {
        let (mut mesh, [v1, v2, v3, bot, top]) = two_tets();
        let before = sorted_tets(&mesh);
        let flip = Flip::flip23(v1, v2, v3, bot, top);
        assert_eq!(flip.old_tets().len(), 2);
        for tet in flip.old_tets() {
            assert!(mesh.tet_exists(&tet), "{tet:?}");
        }
        flip.apply(&mut mesh).unwrap();
        assert_eq!(mesh.number_of_tets(), 3);
        assert!(all_positive(&mesh));
        Flip::flip32(v1, v2, v3, bot, top).apply(&mut mesh).unwrap();
        assert_eq!(sorted_tets(&mesh), before);
    }

    #[test]
    fn test_invert_restores_complex() {
        let (mut mesh, [v1, v2, v3, bot, top]) = two_tets();
        let before = sorted_tets(&mesh);
        let flip = Flip::flip23(v1, v2, v3, bot, top);
        flip.apply(&mut mesh).unwrap();
        flip.invert(&mut mesh).unwrap();
        assert_eq!(sorted_tets(&mesh), before);
    }

    #[test]
    fn test_flip22_inverse_is_flip22() {
        let (mut mesh, [v1, v2, v3, bot, top]) = two_tets();
        let before = sorted_tets(&mesh);
        let flip = Flip::flip22(v1, v2, v3, bot, top);
        flip.apply(&mut mesh).unwrap();
        assert_eq!(mesh.number_of_tets(), 2);
        let inverse = flip.inverse();
        assert_eq!(inverse.kind, FlipKind::Flip22);
        let mut expected: Vec<Tet> = flip.new_tets().iter().map(tet_key).collect();
        let mut removed: Vec<Tet> = inverse.old_tets().iter().map(tet_key).collect();
        expected.sort_unstable();
        removed.sort_unstable();
        assert_eq!(expected, removed);
        inverse.apply(&mut mesh).unwrap();
        assert_eq!(sorted_tets(&mesh), before);
    }

    #[test]
    fn test_flip14_round_trip() {
        let points = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
        ];
        let (mut mesh, t) = TetMesh::from_tets(&points, &[[0, 1, 2, 3]]).unwrap();
        let body = mesh.add_vertex(Point3::new(0.25, 0.25, 0.25));
        let tet = [t[0], t[1], t[2], t[3]];
        let flip = Flip::flip14(&tet, body);
        flip.apply(&mut mesh).unwrap();
        assert_eq!(mesh.number_of_tets(), 4);
        assert!(all_positive(&mesh));
        flip.invert(&mut mesh).unwrap();
        assert_eq!(mesh.number_of_tets(), 1);
        assert!(mesh.tet_exists(&tet));
    }

    #[test]
    fn test_flip13_and_flip12_produce_positive_tets() {
        let points = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
        ];
        let (mut mesh, t) = TetMesh::from_tets(&points, &[[0, 1, 2, 3]]).unwrap();
        let tet = [t[0], t[1], t[2], t[3]];
        let face = mesh.add_vertex(Point3::new(1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0));
        let flip = Flip::flip13(&tet, face);
        flip.apply(&mut mesh).unwrap();
        assert_eq!(mesh.number_of_tets(), 3);
        assert!(all_positive(&mesh));
        flip.invert(&mut mesh).unwrap();

        let midpoint = mesh.add_vertex(Point3::new(0.0, 0.5, 0.0));
        let flip = Flip::flip12(&tet, midpoint);
        flip.apply(&mut mesh).unwrap();
        assert_eq!(mesh.number_of_tets(), 2);
        assert!(all_positive(&mesh));
        flip.invert(&mut mesh).unwrap();
        assert!(mesh.tet_exists(&tet));
    }

    #[test]
    fn test_failed_flip_leaves_complex_unchanged() {
        let (mut mesh, [v1, v2, v3, bot, top]) = two_tets();
        let before = sorted_tets(&mesh);
        let err = Flip::flip32(v1, v2, v3, bot, top).apply(&mut mesh).unwrap_err();
        assert!(matches!(err, FlipError::MissingTet { kind: FlipKind::Flip32, .. }));
        assert_eq!(sorted_tets(&mesh), before);
    }

    #[test]
    fn test_kind_metadata() {
        assert_eq!(FlipKind::Flip14.arity(), (1, 4));
        assert_eq!(FlipKind::Flip41.inverse(), FlipKind::Flip14);
        assert_eq!(FlipKind::Flip32.to_string(), "3-2 flip");
    }
}
