//! The mesh being improved.
//!
//! [`ImproveMesh`] bundles a [`TetComplex`] with the per-vertex data the
//! engine needs ([`VertexInfo`]), the [`Journal`] of every mutation, and an
//! optional [`DeformationField`] for anisotropic quality. All algorithm code
//! mutates the complex through the journaled methods here, so any attempt can
//! be rolled back with [`ImproveMesh::revert_to`].
//!
//! # Examples
//!
//! ```rust
//! use nalgebra::Point3;
//! use tetimprove::core::mesh::ImproveMesh;
//!
//! let points = [
//!     Point3::new(0.0, 0.0, 0.0),
//!     Point3::new(0.0, 1.0, 0.0),
//!     Point3::new(1.0, 0.0, 0.0),
//!     Point3::new(0.0, 0.0, 1.0),
//! ];
//! let (mut mesh, t) = ImproveMesh::from_tets(&points, &[[0, 1, 2, 3]]).unwrap();
//! let checkpoint = mesh.checkpoint();
//! let tet = [t[0], t[1], t[2], t[3]];
//! mesh.delete_tet(tet).unwrap();
//! assert_eq!(mesh.number_of_tets(), 0);
//! mesh.revert_to(checkpoint).unwrap();
//! assert!(mesh.tet_exists(&tet));
//! ```

use std::fmt;

use nalgebra::Point3;
use thiserror::Error;

use crate::core::algorithms::flips::{Flip, FlipError};
use crate::core::boundary::BoundaryAnalysis;
use crate::core::collections::{FastHashMap, SecondaryMap, fast_hash_map_with_capacity};
use crate::core::complex::{
    ComplexError, IncidentTets, Tet, TetComplex, TetMesh, VertexTag, rotate_to_front,
};
use crate::core::journal::{Checkpoint, Journal, JournalEntry};
use crate::core::vertex::{VertexInfo, VertexKind, classify_star, star_boundary_faces};
use crate::geometry::anisotropy::{DeformationField, transform_tet};
use crate::geometry::quadric::Quadric;
use crate::geometry::quality::QualityOracle;

/// Errors raised by journaled mutations and their inversion.
///
/// Every variant means the complex and the algorithm disagree about what is
/// live, which is a bug rather than a data condition.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum MeshError {
    /// A vertex has no coordinates in the complex.
    #[error("Vertex {vertex:?} is not in the complex")]
    MissingVertex {
        /// The unknown vertex.
        vertex: VertexTag,
    },

    /// A tet expected to be live is missing.
    #[error("Tet {tet:?} is not in the complex")]
    MissingTet {
        /// The missing tet.
        tet: Tet,
    },

    /// A tet could not be inserted because one of its faces is occupied.
    #[error("Cannot insert tet {tet:?}: a face is already occupied")]
    OccupiedFace {
        /// The rejected tet.
        tet: Tet,
    },

    /// A flip did not match the complex.
    #[error(transparent)]
    Flip(#[from] FlipError),

    /// A checkpoint lies beyond the end of the journal.
    #[error("Checkpoint {checkpoint} is beyond the journal ({len} entries)")]
    UnknownCheckpoint {
        /// Position of the checkpoint.
        checkpoint: usize,
        /// Current journal length.
        len: usize,
    },
}

/// A complex under improvement, with vertex data and a mutation journal.
pub struct ImproveMesh<C = TetMesh>
where
    C: TetComplex,
{
    complex: C,
    info: SecondaryMap<VertexTag, VertexInfo>,
    /// Some tet each vertex was last seen in; may be stale.
    hints: SecondaryMap<VertexTag, Tet>,
    journal: Journal,
    deformation: Option<Box<dyn DeformationField>>,
}

impl<C> fmt::Debug for ImproveMesh<C>
where
    C: TetComplex + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImproveMesh")
            .field("complex", &self.complex)
            .field("info", &self.info)
            .field("journal_len", &self.journal.len())
            .field("anisotropic", &self.deformation.is_some())
            .finish()
    }
}

impl ImproveMesh<TetMesh> {
    /// Builds a mesh over a fresh [`TetMesh`].
    ///
    /// # Errors
    ///
    /// Propagates [`ComplexError`] from [`TetMesh::from_tets`].
    pub fn from_tets(
        points: &[Point3<f64>],
        tets: &[[usize; 4]],
    ) -> Result<(Self, Vec<VertexTag>), ComplexError> {
        let (complex, tags) = TetMesh::from_tets(points, tets)?;
        Ok((Self::new(complex), tags))
    }
}

impl<C> ImproveMesh<C>
where
    C: TetComplex,
{
    /// Wraps `complex`. Every vertex starts out unclassified.
    pub fn new(complex: C) -> Self {
        let mut mesh = Self {
            complex,
            info: SecondaryMap::new(),
            hints: SecondaryMap::new(),
            journal: Journal::new(),
            deformation: None,
        };
        for tet in mesh.complex.tets() {
            mesh.remember(&tet);
        }
        mesh
    }

    /// Evaluates quality in the space deformed by `field`.
    #[must_use]
    pub fn with_deformation<F>(mut self, field: F) -> Self
    where
        F: DeformationField + 'static,
    {
        self.deformation = Some(Box::new(field));
        self
    }

    /// Whether quality is evaluated anisotropically.
    #[must_use]
    pub fn is_anisotropic(&self) -> bool {
        self.deformation.is_some()
    }

    /// The deformation field, if any.
    #[must_use]
    pub fn deformation(&self) -> Option<&dyn DeformationField> {
        self.deformation.as_deref()
    }

    /// The underlying complex.
    #[must_use]
    pub const fn complex(&self) -> &C {
        &self.complex
    }

    /// Unwraps the complex, dropping the journal.
    pub fn into_complex(self) -> C {
        self.complex
    }

    /// The mutation journal.
    #[must_use]
    pub const fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Forgets every recorded mutation. Earlier checkpoints become invalid.
    pub fn clear_journal(&mut self) {
        self.journal.clear();
    }

    /// Number of live tets.
    #[must_use]
    pub fn number_of_tets(&self) -> usize {
        self.complex.number_of_tets()
    }

    /// Every live tet.
    #[must_use]
    pub fn tets(&self) -> Vec<Tet> {
        self.complex.tets()
    }

    /// Whether `tet` is live.
    #[must_use]
    pub fn tet_exists(&self, tet: &Tet) -> bool {
        self.complex.tet_exists(tet)
    }

    /// Info of `vertex`; unclassified vertices report the `Input` kind.
    #[must_use]
    pub fn info(&self, vertex: VertexTag) -> VertexInfo {
        self.info.get(vertex).copied().unwrap_or_default()
    }

    /// Kind of `vertex`.
    #[must_use]
    pub fn kind(&self, vertex: VertexTag) -> VertexKind {
        self.info(vertex).kind
    }

    /// Coordinates of `vertex`.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::MissingVertex`] for an unknown vertex.
    pub fn position(&self, vertex: VertexTag) -> Result<Point3<f64>, MeshError> {
        self.complex
            .position(vertex)
            .ok_or(MeshError::MissingVertex { vertex })
    }

    /// Coordinates of the corners of `tet`.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::MissingVertex`] if a corner is unknown.
    pub fn tet_points(&self, tet: &Tet) -> Result<[Point3<f64>; 4], MeshError> {
        Ok([
            self.position(tet[0])?,
            self.position(tet[1])?,
            self.position(tet[2])?,
            self.position(tet[3])?,
        ])
    }

    /// Quality of the tet spanned by `points`, in deformed space when the
    /// mesh is anisotropic.
    #[must_use]
    pub fn evaluate(&self, points: &[Point3<f64>; 4], oracle: &QualityOracle) -> f64 {
        match self.deformation() {
            Some(field) => oracle.quality(&transform_tet(field, points).0),
            None => oracle.quality(points),
        }
    }

    /// Quality of `tet`, which need not be live.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::MissingVertex`] if a corner is unknown.
    pub fn quality(&self, tet: &Tet, oracle: &QualityOracle) -> Result<f64, MeshError> {
        Ok(self.evaluate(&self.tet_points(tet)?, oracle))
    }

    /// Quality of `tet` in physical space, ignoring any deformation.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::MissingVertex`] if a corner is unknown.
    pub fn physical_quality(&self, tet: &Tet, oracle: &QualityOracle) -> Result<f64, MeshError> {
        Ok(oracle.quality(&self.tet_points(tet)?))
    }

    /// Length of the edge `(a, b)`.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::MissingVertex`] if an endpoint is unknown.
    pub fn edge_length(&self, a: VertexTag, b: VertexTag) -> Result<f64, MeshError> {
        Ok((self.position(a)? - self.position(b)?).norm())
    }

    /// Star of `vertex`, each tet rotated so that `vertex` comes first.
    ///
    /// Returns an empty star for a vertex no live tet uses.
    #[must_use]
    pub fn star(&self, vertex: VertexTag) -> IncidentTets {
        self.hints
            .get(vertex)
            .and_then(|tet| rotate_to_front(tet, vertex))
            .filter(|tet| self.complex.tet_exists(tet))
            .or_else(|| self.journal.find_tet_from_vertex(&self.complex, vertex))
            .map(|seed| self.complex.incident_tets(&seed))
            .unwrap_or_default()
    }

    /// Records `tet` as the star hint of its four vertices.
    fn remember(&mut self, tet: &Tet) {
        for &vertex in tet {
            self.hints.insert(vertex, *tet);
        }
    }

    // =========================================================================
    // JOURNALED MUTATIONS
    // =========================================================================

    /// The current journal position.
    #[must_use]
    pub fn checkpoint(&self) -> Checkpoint {
        self.journal.checkpoint()
    }

    /// Inserts `tet`.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::OccupiedFace`] if the complex rejects it.
    pub fn insert_tet(&mut self, tet: Tet) -> Result<(), MeshError> {
        if !self.complex.insert_tet(tet) {
            return Err(MeshError::OccupiedFace { tet });
        }
        self.remember(&tet);
        self.journal.push(JournalEntry::InsertTet(tet));
        Ok(())
    }

    /// Deletes `tet`.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::MissingTet`] if it is not live.
    pub fn delete_tet(&mut self, tet: Tet) -> Result<(), MeshError> {
        if !self.complex.delete_tet(tet) {
            return Err(MeshError::MissingTet { tet });
        }
        self.journal.push(JournalEntry::DeleteTet(tet));
        Ok(())
    }

    /// Applies `flip`.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::Flip`] if the flip does not match the complex; the
    /// complex is unchanged in that case.
    pub fn flip(&mut self, flip: Flip) -> Result<(), MeshError> {
        flip.apply(&mut self.complex)?;
        for tet in flip.new_tets() {
            self.remember(&tet);
        }
        self.journal.push(JournalEntry::Flip(flip));
        Ok(())
    }

    /// Creates a vertex with `info` at `position`.
    pub fn add_vertex(&mut self, position: Point3<f64>, info: VertexInfo) -> VertexTag {
        let vertex = self.complex.add_vertex(position);
        self.info.insert(vertex, info);
        self.journal
            .push(JournalEntry::InsertVertex { vertex, position });
        vertex
    }

    /// Moves `vertex` to `position`.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::MissingVertex`] for an unknown vertex.
    pub fn move_vertex(&mut self, vertex: VertexTag, position: Point3<f64>) -> Result<(), MeshError> {
        let old = self.position(vertex)?;
        self.complex.set_position(vertex, position);
        self.journal.push(JournalEntry::SmoothVertex {
            vertex,
            old,
            new: position,
        });
        Ok(())
    }

    /// Replaces the info of `vertex`.
    pub fn set_info(&mut self, vertex: VertexTag, info: VertexInfo) {
        let old = self.info.insert(vertex, info);
        self.journal.push(JournalEntry::Classify {
            vertex,
            old,
            new: info,
        });
    }

    /// Undoes every mutation recorded after `checkpoint`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::UnknownCheckpoint`] if `checkpoint` is not in the
    /// journal, or the error of the first entry that cannot be inverted.
    pub fn revert_to(&mut self, checkpoint: Checkpoint) -> Result<(), MeshError> {
        if !self.journal.contains(checkpoint) {
            return Err(MeshError::UnknownCheckpoint {
                checkpoint: checkpoint.position(),
                len: self.journal.len(),
            });
        }
        let undone = self.journal.len() - checkpoint.position();
        while let Some(entry) = self.journal.pop_after(checkpoint) {
            self.invert(entry)?;
        }
        if undone > 0 {
            tracing::trace!(undone, "reverted journal");
        }
        Ok(())
    }

    fn invert(&mut self, entry: JournalEntry) -> Result<(), MeshError> {
        match entry {
            JournalEntry::InsertTet(tet) => {
                if !self.complex.delete_tet(tet) {
                    return Err(MeshError::MissingTet { tet });
                }
            }
            JournalEntry::DeleteTet(tet) => {
                if !self.complex.insert_tet(tet) {
                    return Err(MeshError::OccupiedFace { tet });
                }
                self.remember(&tet);
            }
            JournalEntry::Flip(flip) => {
                flip.invert(&mut self.complex)?;
                for tet in flip.old_tets() {
                    self.remember(&tet);
                }
            }
            JournalEntry::InsertVertex { vertex, .. } => {
                if !self.complex.remove_vertex(vertex) {
                    return Err(MeshError::MissingVertex { vertex });
                }
                self.info.remove(vertex);
                self.hints.remove(vertex);
            }
            JournalEntry::SmoothVertex { vertex, old, .. } => {
                if !self.complex.set_position(vertex, old) {
                    return Err(MeshError::MissingVertex { vertex });
                }
            }
            JournalEntry::Classify { vertex, old, .. } => match old {
                Some(info) => {
                    self.info.insert(vertex, info);
                }
                None => {
                    self.info.remove(vertex);
                }
            },
        }
        Ok(())
    }

    // =========================================================================
    // CLASSIFICATION
    // =========================================================================

    /// One live tet per used vertex, rotated so the vertex comes first.
    fn vertex_seeds(&self) -> FastHashMap<VertexTag, Tet> {
        let tets = self.complex.tets();
        let mut seeds = fast_hash_map_with_capacity(self.complex.number_of_vertices());
        for tet in &tets {
            for &v in tet {
                if let Some(seed) = rotate_to_front(tet, v) {
                    seeds.entry(v).or_insert(seed);
                }
            }
        }
        seeds
    }

    /// Classifies every vertex used by a live tet as free, facet, segment or
    /// fixed. Each change is journaled.
    ///
    /// Returns the number of vertices of each kind, indexed by discriminant.
    pub fn classify_vertices(&mut self) -> [usize; 5] {
        let mut counts = [0; 5];
        for (vertex, seed) in self.vertex_seeds() {
            let star = self.complex.incident_tets(&seed);
            let mut info = classify_star(&self.complex, &star);
            info.quadric = self.info(vertex).quadric;
            counts[info.kind as usize] += 1;
            if self.info.get(vertex) != Some(&info) {
                self.set_info(vertex, info);
            }
        }
        tracing::debug!(
            free = counts[VertexKind::Free as usize],
            facet = counts[VertexKind::Facet as usize],
            segment = counts[VertexKind::Segment as usize],
            fixed = counts[VertexKind::Fixed as usize],
            "classified vertices"
        );
        counts
    }

    /// Builds the surface quadric of every boundary vertex from its current
    /// boundary faces. Returns how many quadrics were stored.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::MissingVertex`] if a face corner is unknown.
    pub fn collect_quadrics(&mut self) -> Result<usize, MeshError> {
        let mut stored = 0;
        for (vertex, seed) in self.vertex_seeds() {
            let star = self.complex.incident_tets(&seed);
            if star.interior {
                continue;
            }
            let Some(quadric) = self.star_quadric(vertex, &star)? else {
                continue;
            };
            let mut info = self.info(vertex);
            info.quadric = Some(quadric);
            self.set_info(vertex, info);
            stored += 1;
        }
        Ok(stored)
    }

    /// Quadric of `vertex` from the boundary faces of its star.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::MissingVertex`] if a face corner is unknown.
    pub fn star_quadric(
        &self,
        vertex: VertexTag,
        star: &IncidentTets,
    ) -> Result<Option<Quadric>, MeshError> {
        let mut faces = Vec::new();
        for face in star_boundary_faces(&self.complex, vertex, star) {
            // the vertex goes first so the edge terms use its own edges
            let Some(index) = face.iter().position(|&v| v == vertex) else {
                continue;
            };
            let rotated = [face[index], face[(index + 1) % 3], face[(index + 2) % 3]];
            faces.push([
                self.position(rotated[0])?,
                self.position(rotated[1])?,
                self.position(rotated[2])?,
            ]);
        }
        Ok(Quadric::from_faces(self.position(vertex)?, &faces))
    }

    /// Number of corners of `tet` whose kind is on the boundary.
    #[must_use]
    pub fn boundary_vertex_count(&self, tet: &Tet) -> usize {
        tet.iter().filter(|&&v| self.kind(v).is_boundary()).count()
    }

    /// Whether any face of `tet` lies on the boundary.
    #[must_use]
    pub fn is_boundary_tet(&self, tet: &Tet) -> bool {
        self.complex.is_boundary_tet(tet)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::complex::tet_key;
    use crate::geometry::anisotropy::UniformDeformation;
    use crate::geometry::quality::QualityMeasure;
    use approx::assert_relative_eq;

    fn corner() -> (ImproveMesh, Tet) {
        let points = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
        ];
        let (mesh, t) = ImproveMesh::from_tets(&points, &[[0, 1, 2, 3]]).unwrap();
        (mesh, [t[0], t[1], t[2], t[3]])
    }

    fn sorted_keys(mesh: &ImproveMesh) -> Vec<Tet> {
        let mut keys: Vec<Tet> = mesh.tets().iter().map(tet_key).collect();
        keys.sort_unstable();
        keys
    }

    #[test]
    fn test_revert_restores_everything() {
        let (mut mesh, tet) = corner();
        let before = sorted_keys(&mesh);
        let checkpoint = mesh.checkpoint();

        let body = mesh.add_vertex(Point3::new(0.2, 0.2, 0.2), VertexInfo::free());
        mesh.flip(Flip::flip14(&tet, body)).unwrap();
        mesh.move_vertex(body, Point3::new(0.1, 0.2, 0.3)).unwrap();
        mesh.set_info(tet[0], VertexInfo::free());
        assert_eq!(mesh.number_of_tets(), 4);

        mesh.revert_to(checkpoint).unwrap();
        assert_eq!(sorted_keys(&mesh), before);
        assert!(mesh.position(body).is_err());
        assert_eq!(mesh.kind(tet[0]), VertexKind::Input);
        assert_eq!(mesh.journal().len(), checkpoint.position());
    }

    #[test]
    fn test_revert_to_unknown_checkpoint() {
        let (mut mesh, _) = corner();
        let err = mesh.revert_to(Checkpoint(3)).unwrap_err();
        assert_eq!(
            err,
            MeshError::UnknownCheckpoint {
                checkpoint: 3,
                len: 0
            }
        );
    }

    #[test]
    fn test_failed_mutations_are_not_journaled() {
        let (mut mesh, tet) = corner();
        assert!(matches!(
            mesh.insert_tet(tet),
            Err(MeshError::OccupiedFace { .. })
        ));
        mesh.delete_tet(tet).unwrap();
        assert!(matches!(
            mesh.delete_tet(tet),
            Err(MeshError::MissingTet { .. })
        ));
        assert_eq!(mesh.journal().len(), 1);
    }

    #[test]
    fn test_classify_and_quadrics() {
        let (mut mesh, tet) = corner();
        let counts = mesh.classify_vertices();
        assert_eq!(counts[VertexKind::Fixed as usize], 4);
        assert_eq!(mesh.boundary_vertex_count(&tet), 4);
        assert!(mesh.is_boundary_tet(&tet));
        // a corner vertex sees three faces, enough for a quadric
        assert_eq!(mesh.collect_quadrics().unwrap(), 4);
        let quadric = mesh.info(tet[0]).quadric.unwrap();
        assert_relative_eq!(quadric.error(&Point3::origin()), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_anisotropic_quality_differs() {
        let (mesh, tet) = corner();
        let oracle = QualityOracle::new(QualityMeasure::RadiusRatio);
        let isotropic = mesh.quality(&tet, &oracle).unwrap();
        let stretched = mesh.with_deformation(UniformDeformation::scale(1.0, 1.0, 4.0));
        assert!(stretched.is_anisotropic());
        let anisotropic = stretched.quality(&tet, &oracle).unwrap();
        assert!((anisotropic - isotropic).abs() > 1e-3);
        assert_relative_eq!(stretched.physical_quality(&tet, &oracle).unwrap(), isotropic);
    }

    #[test]
    fn test_star_of_new_vertex() {
        let (mut mesh, tet) = corner();
        let body = mesh.add_vertex(Point3::new(0.2, 0.2, 0.2), VertexInfo::free());
        assert!(mesh.star(body).tets.is_empty());
        mesh.flip(Flip::flip14(&tet, body)).unwrap();
        let star = mesh.star(body);
        assert_eq!(star.tets.len(), 4);
        assert!(star.interior);
        assert_relative_eq!(mesh.edge_length(tet[0], tet[2]).unwrap(), 1.0);
    }

    #[test]
    fn test_star_hints_follow_mutations_and_reverts() {
        let (mut mesh, tet) = corner();
        assert!(tet.iter().all(|&v| mesh.hints.get(v) == Some(&tet)));

        let body = mesh.add_vertex(Point3::new(0.2, 0.2, 0.2), VertexInfo::free());
        mesh.flip(Flip::flip14(&tet, body)).unwrap();
        // the star is found without the journal
        mesh.clear_journal();
        for &v in tet.iter().chain([&body]) {
            let hint = mesh.hints.get(v).unwrap();
            assert!(mesh.tet_exists(hint));
            assert_eq!(mesh.star(v).tets.len(), if v == body { 4 } else { 3 });
        }

        let (mut mesh, tet) = corner();
        let body = mesh.add_vertex(Point3::new(0.2, 0.2, 0.2), VertexInfo::free());
        let checkpoint = mesh.checkpoint();
        mesh.flip(Flip::flip14(&tet, body)).unwrap();
        mesh.revert_to(checkpoint).unwrap();
        for &v in &tet {
            let hint = mesh.hints.get(v).unwrap();
            assert!(mesh.tet_exists(hint));
            assert_eq!(mesh.star(v).tets.len(), 1);
        }
        assert!(mesh.star(body).tets.is_empty());
    }
}
