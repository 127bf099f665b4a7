//! Append-only log of mesh mutations.
//!
//! Every change the engine makes to a mesh goes through [`ImproveMesh`], which
//! records one [`JournalEntry`] per primitive mutation. A [`Checkpoint`] is
//! simply the journal length at some moment; reverting to it replays the
//! inverse of every later entry, newest first, and truncates the log.
//!
//! [`ImproveMesh`]: crate::core::mesh::ImproveMesh

use nalgebra::Point3;
use serde::{Deserialize, Serialize};

use crate::core::algorithms::flips::Flip;
use crate::core::complex::{Tet, TetComplex, VertexTag, rotate_to_front};
use crate::core::vertex::VertexInfo;

/// One recorded mutation, with enough data to invert it exactly.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum JournalEntry {
    /// A tet was inserted.
    InsertTet(Tet),
    /// A tet was deleted.
    DeleteTet(Tet),
    /// A flip was applied.
    Flip(Flip),
    /// A vertex was created.
    InsertVertex {
        /// The new vertex.
        vertex: VertexTag,
        /// Where it was created.
        position: Point3<f64>,
    },
    /// A vertex was moved.
    SmoothVertex {
        /// The moved vertex.
        vertex: VertexTag,
        /// Position before the move.
        old: Point3<f64>,
        /// Position after the move.
        new: Point3<f64>,
    },
    /// A vertex was (re)classified.
    Classify {
        /// The vertex.
        vertex: VertexTag,
        /// Info before classification, if it had any.
        old: Option<VertexInfo>,
        /// Info after classification.
        new: VertexInfo,
    },
}

impl JournalEntry {
    /// Whether the entry changed connectivity.
    #[must_use]
    pub const fn is_topological(&self) -> bool {
        matches!(self, Self::InsertTet(_) | Self::DeleteTet(_) | Self::Flip(_))
    }

    /// Tets that existed right after this entry was applied.
    #[must_use]
    pub fn created_tets(&self) -> Vec<Tet> {
        match self {
            Self::InsertTet(tet) => vec![*tet],
            Self::Flip(flip) => flip.new_tets().to_vec(),
            _ => Vec::new(),
        }
    }
}

/// Journal position to revert to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Checkpoint(pub(crate) usize);

impl Checkpoint {
    /// Number of entries recorded before the checkpoint.
    #[must_use]
    pub const fn position(self) -> usize {
        self.0
    }
}

/// Append-only mutation log.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Journal {
    entries: Vec<JournalEntry>,
}

impl Journal {
    /// Empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an entry.
    pub fn push(&mut self, entry: JournalEntry) {
        self.entries.push(entry);
    }

    /// The current position.
    #[must_use]
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint(self.entries.len())
    }

    /// Whether `checkpoint` lies within the current log.
    #[must_use]
    pub fn contains(&self, checkpoint: Checkpoint) -> bool {
        checkpoint.0 <= self.entries.len()
    }

    /// Removes and returns the newest entry recorded after `checkpoint`.
    pub fn pop_after(&mut self, checkpoint: Checkpoint) -> Option<JournalEntry> {
        if self.entries.len() > checkpoint.0 {
            self.entries.pop()
        } else {
            None
        }
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries oldest first.
    #[must_use]
    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    /// Entries recorded since `checkpoint`.
    #[must_use]
    pub fn since(&self, checkpoint: Checkpoint) -> &[JournalEntry] {
        self.entries.get(checkpoint.0..).unwrap_or_default()
    }

    /// Drops every entry. Only safe once the caller will never revert.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// A live tet incident to `vertex`, rotated so `vertex` comes first.
    ///
    /// Searches topological entries newest first, since the vertex most likely
    /// took part in a recent change, then falls back to scanning the complex.
    #[must_use]
    pub fn find_tet_from_vertex<C>(&self, complex: &C, vertex: VertexTag) -> Option<Tet>
    where
        C: TetComplex + ?Sized,
    {
        let live_incident = |tet: &Tet| {
            rotate_to_front(tet, vertex).filter(|rotated| complex.tet_exists(rotated))
        };
        self.entries
            .iter()
            .rev()
            .filter(|entry| entry.is_topological())
            .flat_map(JournalEntry::created_tets)
            .find_map(|tet| live_incident(&tet))
            .or_else(|| complex.tets().iter().find_map(live_incident))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::complex::TetMesh;

    fn single() -> (TetMesh, Tet) {
        let points = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
        ];
        let (mesh, t) = TetMesh::from_tets(&points, &[[0, 1, 2, 3]]).unwrap();
        (mesh, [t[0], t[1], t[2], t[3]])
    }

    #[test]
    fn test_checkpoint_and_pop() {
        let (_, tet) = single();
        let mut journal = Journal::new();
        journal.push(JournalEntry::InsertTet(tet));
        let checkpoint = journal.checkpoint();
        assert_eq!(checkpoint.position(), 1);
        journal.push(JournalEntry::DeleteTet(tet));
        journal.push(JournalEntry::InsertTet(tet));
        assert_eq!(journal.since(checkpoint).len(), 2);
        assert_eq!(journal.pop_after(checkpoint), Some(JournalEntry::InsertTet(tet)));
        assert_eq!(journal.pop_after(checkpoint), Some(JournalEntry::DeleteTet(tet)));
        assert_eq!(journal.pop_after(checkpoint), None);
        assert_eq!(journal.len(), 1);
        assert!(journal.contains(checkpoint));
        assert!(!journal.contains(Checkpoint(5)));
    }

    #[test]
    fn test_find_tet_from_vertex_uses_recent_flip() {
        let (mut mesh, tet) = single();
        let body = mesh.add_vertex(Point3::new(0.25, 0.25, 0.25));
        let flip = Flip::flip14(&tet, body);
        flip.apply(&mut mesh).unwrap();
        let mut journal = Journal::new();
        journal.push(JournalEntry::Flip(flip));
        let found = journal.find_tet_from_vertex(&mesh, body).unwrap();
        assert_eq!(found[0], body);
        assert!(mesh.tet_exists(&found));
    }

    #[test]
    fn test_find_tet_from_vertex_falls_back_to_complex() {
        let (mesh, tet) = single();
        let journal = Journal::new();
        let found = journal.find_tet_from_vertex(&mesh, tet[2]).unwrap();
        assert_eq!(found[0], tet[2]);
        let mut other = TetMesh::new();
        let lonely = other.add_vertex(Point3::origin());
        assert!(journal.find_tet_from_vertex(&other, lonely).is_none());
    }

    #[test]
    fn test_entry_kinds() {
        let (_, tet) = single();
        assert!(JournalEntry::DeleteTet(tet).is_topological());
        let smooth = JournalEntry::SmoothVertex {
            vertex: tet[0],
            old: Point3::origin(),
            new: Point3::new(1.0, 0.0, 0.0),
        };
        assert!(!smooth.is_topological());
        assert!(smooth.created_tets().is_empty());
    }
}
