//! Worklists of tets to improve.
//!
//! A [`TetStack`] holds tets together with the quality they had when pushed.
//! Passes pop it in LIFO order; after [`TetStack::sort_worst_on_top`] that
//! means worst first. Entries may go stale as earlier operations delete tets,
//! so consumers re-check [`ImproveMesh::tet_exists`] after popping.

use serde::{Deserialize, Serialize};

use crate::core::boundary::edge_first;
use crate::core::collections::{FastHashMap, FastHashSet, fast_hash_set_with_capacity};
use crate::core::complex::{Tet, TetComplex, VertexTag, tet_key};
use crate::core::mesh::{ImproveMesh, MeshError};
use crate::core::stats::QualitySummary;
use crate::geometry::quality::{NUM_MEAN_THRESHOLDS, QualityOracle};

/// Hard cap on the number of tets an insertion pass attacks.
pub const MAX_INSERT_TETS: usize = 4000;

/// One worklist entry.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StackTet {
    /// The tet, in any even permutation.
    pub tet: Tet,
    /// Its quality when pushed.
    pub quality: f64,
}

/// LIFO worklist of tets.
#[derive(Clone, Debug, Default)]
pub struct TetStack {
    entries: Vec<StackTet>,
    keys: FastHashMap<Tet, usize>,
}

impl TetStack {
    /// Empty stack.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stack holding `tets` with the given qualities, last on top.
    #[must_use]
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = StackTet>,
    {
        let mut stack = Self::new();
        for entry in entries {
            stack.push(entry.tet, entry.quality);
        }
        stack
    }

    /// Pushes `tet`.
    pub fn push(&mut self, tet: Tet, quality: f64) {
        *self.keys.entry(tet_key(&tet)).or_insert(0) += 1;
        self.entries.push(StackTet { tet, quality });
    }

    /// Pushes `tet` unless the same tet (in any permutation) is already
    /// present. Returns whether it was pushed.
    pub fn push_unique(&mut self, tet: Tet, quality: f64) -> bool {
        if self.contains(&tet) {
            return false;
        }
        self.push(tet, quality);
        true
    }

    /// Removes the top entry.
    pub fn pop(&mut self) -> Option<StackTet> {
        let entry = self.entries.pop()?;
        let key = tet_key(&entry.tet);
        if let Some(count) = self.keys.get_mut(&key) {
            *count -= 1;
            if *count == 0 {
                self.keys.remove(&key);
            }
        }
        Some(entry)
    }

    /// Whether `tet` is on the stack in any permutation.
    #[must_use]
    pub fn contains(&self, tet: &Tet) -> bool {
        self.keys.contains_key(&tet_key(tet))
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the stack is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.keys.clear();
    }

    /// Entries bottom to top.
    pub fn iter(&self) -> impl Iterator<Item = &StackTet> {
        self.entries.iter()
    }

    /// Tets bottom to top.
    #[must_use]
    pub fn tets(&self) -> Vec<Tet> {
        self.entries.iter().map(|e| e.tet).collect()
    }

    /// Orders the stack so the worst tet is popped first.
    pub fn sort_worst_on_top(&mut self) {
        self.entries
            .sort_by(|a, b| b.quality.total_cmp(&a.quality));
    }

    /// Pushes every entry of `other` not already present.
    pub fn append_unique(&mut self, other: &Self) {
        for entry in &other.entries {
            self.push_unique(entry.tet, entry.quality);
        }
    }

    /// Keeps only entries whose tet is still live.
    pub fn retain_live<C>(&mut self, mesh: &ImproveMesh<C>)
    where
        C: TetComplex,
    {
        let live: Vec<StackTet> = self
            .entries
            .iter()
            .filter(|e| mesh.tet_exists(&e.tet))
            .copied()
            .collect();
        *self = Self::from_entries(live);
    }
}

impl Extend<StackTet> for TetStack {
    fn extend<I: IntoIterator<Item = StackTet>>(&mut self, iter: I) {
        for entry in iter {
            self.push(entry.tet, entry.quality);
        }
    }
}

/// Quality of every live tet of `mesh`.
///
/// # Errors
///
/// Returns [`MeshError::MissingVertex`] if a tet references an unknown vertex.
pub fn mesh_qualities<C>(
    mesh: &ImproveMesh<C>,
    oracle: &QualityOracle,
) -> Result<Vec<StackTet>, MeshError>
where
    C: TetComplex,
{
    mesh.tets()
        .into_iter()
        .map(|tet| {
            Ok(StackTet {
                tet,
                quality: mesh.quality(&tet, oracle)?,
            })
        })
        .collect()
}

/// Quality summary of the whole mesh.
///
/// # Errors
///
/// Returns [`MeshError::MissingVertex`] if a tet references an unknown vertex.
pub fn mesh_quality<C>(
    mesh: &ImproveMesh<C>,
    oracle: &QualityOracle,
) -> Result<QualitySummary, MeshError>
where
    C: TetComplex,
{
    let thresholds = oracle.measure.mean_thresholds();
    let qualities = mesh_qualities(mesh, oracle)?;
    Ok(QualitySummary::from_qualities(
        qualities.iter().map(|e| e.quality),
        &thresholds,
    ))
}

/// Every tet of quality below `threshold`, worst on top.
///
/// # Errors
///
/// Returns [`MeshError::MissingVertex`] if a tet references an unknown vertex.
pub fn fill_by_quality<C>(
    mesh: &ImproveMesh<C>,
    oracle: &QualityOracle,
    threshold: f64,
) -> Result<TetStack, MeshError>
where
    C: TetComplex,
{
    let mut stack = TetStack::from_entries(
        mesh_qualities(mesh, oracle)?
            .into_iter()
            .filter(|e| e.quality < threshold),
    );
    stack.sort_worst_on_top();
    Ok(stack)
}

/// The worst `percent` of the mesh's tets (at most [`MAX_INSERT_TETS`]),
/// worst on top.
///
/// # Errors
///
/// Returns [`MeshError::MissingVertex`] if a tet references an unknown vertex.
pub fn fill_by_percent<C>(
    mesh: &ImproveMesh<C>,
    oracle: &QualityOracle,
    percent: f64,
) -> Result<TetStack, MeshError>
where
    C: TetComplex,
{
    let mut all = mesh_qualities(mesh, oracle)?;
    all.sort_by(|a, b| a.quality.total_cmp(&b.quality));
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let wanted = (percent.clamp(0.0, 1.0) * all.len() as f64) as usize;
    all.truncate(wanted.min(MAX_INSERT_TETS));
    let mut stack = TetStack::from_entries(all);
    stack.sort_worst_on_top();
    Ok(stack)
}

/// One tet per edge of the mesh, rotated so the edge comes first.
///
/// The qualities recorded are the edge lengths.
///
/// # Errors
///
/// Returns [`MeshError::MissingVertex`] if a tet references an unknown vertex.
pub fn fill_by_edges<C>(mesh: &ImproveMesh<C>) -> Result<TetStack, MeshError>
where
    C: TetComplex,
{
    let tets = mesh.tets();
    let mut seen: FastHashSet<[VertexTag; 2]> = fast_hash_set_with_capacity(tets.len() * 2);
    let mut stack = TetStack::new();
    for tet in &tets {
        for i in 0..3 {
            for j in (i + 1)..4 {
                let edge = if tet[i] < tet[j] {
                    [tet[i], tet[j]]
                } else {
                    [tet[j], tet[i]]
                };
                if seen.insert(edge) {
                    let length = mesh.edge_length(tet[i], tet[j])?;
                    stack.push(edge_first(tet, i, j), length);
                }
            }
        }
    }
    Ok(stack)
}

/// Quality summary of the live tets on `stack`.
///
/// # Errors
///
/// Returns [`MeshError::MissingVertex`] if a tet references an unknown vertex.
pub fn stack_quality<C>(
    mesh: &ImproveMesh<C>,
    oracle: &QualityOracle,
    stack: &TetStack,
) -> Result<QualitySummary, MeshError>
where
    C: TetComplex,
{
    let thresholds = oracle.measure.mean_thresholds();
    let mut qualities = Vec::with_capacity(stack.len());
    for entry in stack.iter().filter(|e| mesh.tet_exists(&e.tet)) {
        qualities.push(mesh.quality(&entry.tet, oracle)?);
    }
    Ok(QualitySummary::from_qualities(qualities, &thresholds))
}

/// Shortest and longest edge over the live tets on `stack`.
///
/// Returns `(INFINITY, 0)` for a stack with no live tets.
///
/// # Errors
///
/// Returns [`MeshError::MissingVertex`] if a tet references an unknown vertex.
pub fn stack_edge_extremes<C>(
    mesh: &ImproveMesh<C>,
    stack: &TetStack,
) -> Result<(f64, f64), MeshError>
where
    C: TetComplex,
{
    let mut shortest = f64::INFINITY;
    let mut longest = 0.0_f64;
    for entry in stack.iter().filter(|e| mesh.tet_exists(&e.tet)) {
        let tet = entry.tet;
        for i in 0..3 {
            for j in (i + 1)..4 {
                let length = mesh.edge_length(tet[i], tet[j])?;
                shortest = shortest.min(length);
                longest = longest.max(length);
            }
        }
    }
    Ok((shortest, longest))
}

/// Whether some thresholded mean rose by more than `threshold`.
#[must_use]
pub fn local_mean_improve(
    old: &[f64; NUM_MEAN_THRESHOLDS],
    new: &[f64; NUM_MEAN_THRESHOLDS],
    threshold: f64,
) -> bool {
    old.iter()
        .zip(new)
        .any(|(&before, &after)| after > before && after - before > threshold)
}

// =============================================================================
// TESTS
// =============================================================================
