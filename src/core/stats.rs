//! Per-pass and per-run statistics.
//!
//! Every pass driver returns a [`PassStats`] describing what it attempted and
//! whether the pass was kept. [`ImproveStats`] accumulates them over a whole
//! schedule together with [`QualitySummary`] snapshots of the mesh.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::algorithms::flips::FlipKind;
use crate::core::vertex::VertexKind;
use crate::geometry::quality::NUM_MEAN_THRESHOLDS;

/// Kinds of improvement pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PassKind {
    /// Vertex smoothing.
    Smooth,
    /// Edge and face removal.
    Topological,
    /// Edge contraction of the worst tets.
    Contract,
    /// Edge contraction of every edge.
    ContractAll,
    /// Vertex insertion at the worst tets.
    Insert,
    /// Vertex insertion with a raised quality threshold.
    Desperate,
}

impl PassKind {
    /// Whether the pass inserts vertices.
    #[must_use]
    pub const fn is_insertion(self) -> bool {
        matches!(self, Self::Insert | Self::Desperate)
    }
}

impl fmt::Display for PassKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Smooth => "smoothing",
            Self::Topological => "topological",
            Self::Contract => "contraction",
            Self::ContractAll => "contract-all",
            Self::Insert => "insertion",
            Self::Desperate => "desperate insertion",
        };
        f.write_str(name)
    }
}

/// Attempts and successes of one kind of operation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    /// Times tried.
    pub attempts: usize,
    /// Times it succeeded.
    pub successes: usize,
}

impl Tally {
    /// Records one attempt and its outcome.
    pub fn record(&mut self, success: bool) {
        self.attempts += 1;
        if success {
            self.successes += 1;
        }
    }

    fn absorb(&mut self, other: &Self) {
        self.attempts += other.attempts;
        self.successes += other.successes;
    }
}

/// A tally keyed by a small integer such as a ring size.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Histogram {
    buckets: Vec<Tally>,
}

impl Histogram {
    /// Records an attempt in bucket `key`.
    pub fn record(&mut self, key: usize, success: bool) {
        if self.buckets.len() <= key {
            self.buckets.resize(key + 1, Tally::default());
        }
        self.buckets[key].record(success);
    }

    /// Tally for bucket `key`.
    #[must_use]
    pub fn get(&self, key: usize) -> Tally {
        self.buckets.get(key).copied().unwrap_or_default()
    }

    /// Sum over every bucket.
    #[must_use]
    pub fn total(&self) -> Tally {
        let mut total = Tally::default();
        for tally in &self.buckets {
            total.absorb(tally);
        }
        total
    }

    fn absorb(&mut self, other: &Self) {
        for (key, tally) in other.buckets.iter().enumerate() {
            if self.buckets.len() <= key {
                self.buckets.resize(key + 1, Tally::default());
            }
            self.buckets[key].absorb(tally);
        }
    }
}

/// Smoothing counters, by vertex kind.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmoothingStats {
    /// Optimizer runs by kind, indexed by [`VertexKind`] discriminant.
    pub by_kind: [Tally; 5],
    /// Worklist tets that no longer existed when popped.
    pub stale: usize,
}

impl SmoothingStats {
    /// Records one optimizer run on a vertex of `kind`.
    pub fn record(&mut self, kind: VertexKind, success: bool) {
        self.by_kind[kind as usize].record(success);
    }

    /// Runs over every kind.
    #[must_use]
    pub fn total(&self) -> Tally {
        let mut total = Tally::default();
        for tally in &self.by_kind {
            total.absorb(tally);
        }
        total
    }

    fn absorb(&mut self, other: &Self) {
        for (mine, theirs) in self.by_kind.iter_mut().zip(&other.by_kind) {
            mine.absorb(theirs);
        }
        self.stale += other.stale;
    }
}

/// Topological counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyStats {
    /// Interior edge removals by ring size.
    pub edge_removal: Histogram,
    /// Boundary edge removals by ring size.
    pub boundary_edge_removal: Histogram,
    /// Face removals by face-tree size (1 for a single face).
    pub face_removal: Histogram,
    /// Flips applied, indexed like [`FlipKind`] in declaration order.
    pub flips: [usize; 9],
    /// Worklist tets that no longer existed when popped.
    pub stale: usize,
}

impl TopologyStats {
    /// Counts one applied flip.
    pub fn record_flip(&mut self, kind: FlipKind) {
        self.flips[flip_index(kind)] += 1;
    }

    /// Number of flips of `kind` applied.
    #[must_use]
    pub fn flip_count(&self, kind: FlipKind) -> usize {
        self.flips[flip_index(kind)]
    }

    fn absorb(&mut self, other: &Self) {
        self.edge_removal.absorb(&other.edge_removal);
        self.boundary_edge_removal
            .absorb(&other.boundary_edge_removal);
        self.face_removal.absorb(&other.face_removal);
        for (mine, theirs) in self.flips.iter_mut().zip(other.flips) {
            *mine += theirs;
        }
        self.stale += other.stale;
    }
}

const fn flip_index(kind: FlipKind) -> usize {
    match kind {
        FlipKind::Flip14 => 0,
        FlipKind::Flip41 => 1,
        FlipKind::Flip13 => 2,
        FlipKind::Flip31 => 3,
        FlipKind::Flip12 => 4,
        FlipKind::Flip21 => 5,
        FlipKind::Flip23 => 6,
        FlipKind::Flip32 => 7,
        FlipKind::Flip22 => 8,
    }
}

/// Edge contraction counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractionStats {
    /// Contractions by endpoint-kind case, indexed by `EdgeCase` discriminant.
    pub by_case: Histogram,
    /// Rejected because a new edge would be too long.
    pub too_long: usize,
}

impl ContractionStats {
    fn absorb(&mut self, other: &Self) {
        self.by_case.absorb(&other.by_case);
        self.too_long += other.too_long;
    }
}

/// Insertion counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertionStats {
    /// Body insertions.
    pub body: Tally,
    /// Facet insertions.
    pub facet: Tally,
    /// Segment insertions.
    pub segment: Tally,
    /// Tets deleted by committed cavities.
    pub cavity_tets_deleted: usize,
    /// Tets created by committed cavities.
    pub cavity_tets_created: usize,
    /// Largest cavity DAG built.
    pub largest_cavity: usize,
    /// Insertions rejected by the size check.
    pub too_long: usize,
}

impl InsertionStats {
    fn absorb(&mut self, other: &Self) {
        self.body.absorb(&other.body);
        self.facet.absorb(&other.facet);
        self.segment.absorb(&other.segment);
        self.cavity_tets_deleted += other.cavity_tets_deleted;
        self.cavity_tets_created += other.cavity_tets_created;
        self.largest_cavity = self.largest_cavity.max(other.largest_cavity);
        self.too_long += other.too_long;
    }
}

/// What one pass did.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PassStats {
    /// Which pass.
    pub kind: PassKind,
    /// Worst quality over the pass's scope before it ran.
    pub min_before: f64,
    /// Worst quality over the pass's scope afterwards.
    pub min_after: f64,
    /// Whether the pass was kept.
    pub accepted: bool,
    /// Smoothing counters.
    pub smoothing: SmoothingStats,
    /// Topological counters.
    pub topology: TopologyStats,
    /// Contraction counters.
    pub contraction: ContractionStats,
    /// Insertion counters.
    pub insertion: InsertionStats,
}

impl PassStats {
    /// Empty stats for a pass of `kind`.
    #[must_use]
    pub fn new(kind: PassKind) -> Self {
        Self {
            kind,
            min_before: f64::INFINITY,
            min_after: f64::INFINITY,
            accepted: false,
            smoothing: SmoothingStats::default(),
            topology: TopologyStats::default(),
            contraction: ContractionStats::default(),
            insertion: InsertionStats::default(),
        }
    }

    /// Adds the counters of `other`. Quality bounds and acceptance are not
    /// touched.
    pub fn absorb(&mut self, other: &Self) {
        self.smoothing.absorb(&other.smoothing);
        self.topology.absorb(&other.topology);
        self.contraction.absorb(&other.contraction);
        self.insertion.absorb(&other.insertion);
    }

    /// Whether the worst quality rose.
    #[must_use]
    pub fn improved(&self) -> bool {
        self.min_after > self.min_before
    }
}

/// Quality snapshot of a mesh or a set of tets.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct QualitySummary {
    /// Number of tets measured.
    pub tet_count: usize,
    /// Worst quality.
    pub min: f64,
    /// Plain mean quality.
    pub mean: f64,
    /// Means of `min(q, threshold_i)`, see
    /// [`QualityMeasure::mean_thresholds`](crate::geometry::quality::QualityMeasure::mean_thresholds).
    pub thresholded_means: [f64; NUM_MEAN_THRESHOLDS],
}

impl Default for QualitySummary {
    fn default() -> Self {
        Self {
            tet_count: 0,
            min: f64::INFINITY,
            mean: 0.0,
            thresholded_means: [0.0; NUM_MEAN_THRESHOLDS],
        }
    }
}

impl QualitySummary {
    /// Summary of `qualities` under the cut-offs `thresholds`.
    #[must_use]
    pub fn from_qualities<I>(qualities: I, thresholds: &[f64; NUM_MEAN_THRESHOLDS]) -> Self
    where
        I: IntoIterator<Item = f64>,
    {
        let mut summary = Self::default();
        let mut sum = 0.0;
        for q in qualities {
            summary.tet_count += 1;
            summary.min = summary.min.min(q);
            sum += q;
            for (mean, &threshold) in summary.thresholded_means.iter_mut().zip(thresholds) {
                *mean += q.min(threshold);
            }
        }
        if summary.tet_count > 0 {
            #[allow(clippy::cast_precision_loss)]
            let n = summary.tet_count as f64;
            summary.mean = sum / n;
            for mean in &mut summary.thresholded_means {
                *mean /= n;
            }
        }
        summary
    }
}

impl fmt::Display for QualitySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} tets, worst {:.6}, mean {:.6}",
            self.tet_count, self.min, self.mean
        )
    }
}

/// What a whole improvement schedule did.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImproveStats {
    /// Mesh quality before improvement.
    pub initial: QualitySummary,
    /// Mesh quality afterwards.
    pub last: QualitySummary,
    /// Every pass run, in order.
    pub passes: Vec<PassStats>,
    /// Counters summed over all passes, bounded by the initial and final
    /// worst quality.
    pub totals: PassStats,
    /// Vertices added by insertion.
    pub vertices_inserted: usize,
    /// Whether the goal angles were reached.
    pub reached_goal: bool,
}

impl ImproveStats {
    /// Stats starting from `initial`.
    #[must_use]
    pub fn new(initial: QualitySummary) -> Self {
        Self {
            initial,
            last: initial,
            passes: Vec::new(),
            totals: PassStats {
                min_before: initial.min,
                min_after: initial.min,
                ..PassStats::new(PassKind::Smooth)
            },
            vertices_inserted: 0,
            reached_goal: false,
        }
    }

    /// Appends one pass.
    pub fn record(&mut self, pass: PassStats) {
        self.totals.absorb(&pass);
        self.vertices_inserted += pass.insertion.body.successes
            + pass.insertion.facet.successes
            + pass.insertion.segment.successes;
        self.passes.push(pass);
    }

    /// Number of passes of `kind`.
    #[must_use]
    pub fn pass_count(&self, kind: PassKind) -> usize {
        self.passes.iter().filter(|p| p.kind == kind).count()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_histogram_grows() {
        let mut h = Histogram::default();
        h.record(5, true);
        h.record(3, false);
        h.record(5, false);
        assert_eq!(h.get(5), Tally { attempts: 2, successes: 1 });
        assert_eq!(h.get(40), Tally::default());
        assert_eq!(h.total().attempts, 3);
    }

    #[test]
    fn test_summary() {
        let thresholds = [0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7];
        let s = QualitySummary::from_qualities([0.05, 0.45], &thresholds);
        assert_eq!(s.tet_count, 2);
        assert_relative_eq!(s.min, 0.05);
        assert_relative_eq!(s.mean, 0.25);
        assert_relative_eq!(s.thresholded_means[0], 0.075);
        assert_relative_eq!(s.thresholded_means[6], 0.25);
        let empty = QualitySummary::from_qualities(std::iter::empty(), &thresholds);
        assert_eq!(empty.tet_count, 0);
        assert!(empty.min.is_infinite());
    }

    #[test]
    fn test_improve_stats_accumulate() {
        let mut stats = ImproveStats::new(QualitySummary::default());
        let mut pass = PassStats::new(PassKind::Insert);
        pass.insertion.body.record(true);
        pass.insertion.facet.record(false);
        pass.topology.record_flip(FlipKind::Flip23);
        stats.record(pass.clone());
        stats.record(pass);
        assert_eq!(stats.vertices_inserted, 2);
        assert_eq!(stats.totals.insertion.facet.attempts, 2);
        assert_eq!(stats.totals.topology.flip_count(FlipKind::Flip23), 2);
        assert_eq!(stats.pass_count(PassKind::Insert), 2);
        assert_eq!(stats.pass_count(PassKind::Smooth), 0);
    }
}
