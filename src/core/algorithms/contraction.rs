//! Edge contraction.
//!
//! Contracting the edge `(keep, drop)` deletes the ring of tets around it and
//! re-points every other tet of `drop`'s star at `keep`. The endpoint with the
//! more constrained [`VertexKind`] survives, so boundary vertices are never
//! pulled off the boundary. The surviving vertex is then smoothed and the
//! contraction is kept only if the worst quality of the two stars improved.
//!
//! The dropped vertex stays in the vertex table with an empty star.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::algorithms::improve::ImproveError;
use crate::core::algorithms::smoothing::optimize_vertex;
use crate::core::boundary::{BoundaryAnalysis, edge_first};
use crate::core::complex::{Tet, TetComplex, VertexTag, rotate_to_front};
use crate::core::config::ImproveConfig;
use crate::core::mesh::{ImproveMesh, MeshError};
use crate::core::stats::{PassKind, PassStats};
use crate::core::vertex::VertexKind;
use crate::core::worklist::{
    TetStack, fill_by_edges, fill_by_percent, fill_by_quality, local_mean_improve, mesh_quality,
    stack_quality,
};

/// Smallest rise of the worst quality that counts as an improvement.
pub const MIN_CONTRACT_IMPROVEMENT: f64 = 1.0e-6;
/// Without an improvement requirement, results must still reach this quality.
pub const MIN_CONTRACT_QUALITY: f64 = 5.0e-2;
/// A re-pointed tet at or below this quality counts as inverted.
pub const MIN_TET_QUALITY: f64 = 1.0e-14;
/// In anisotropic mode, re-pointed tets must reach this physical quality.
pub const MIN_SIZE_TET_QUALITY: f64 = 1.0e-10;
/// Contraction only allows edges up to this fraction of the longest allowed.
pub const SIZE_SAFETY_FACTOR: f64 = 0.7;

const DYNAMIC_MEAN_IMPROVEMENT: f64 = 1.0e-3;

/// Endpoint kinds of a contracted edge, freest first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeCase {
    /// Two interior vertices.
    FreeFree = 1,
    /// Interior and facet.
    FreeFacet = 2,
    /// Interior and segment.
    FreeSegment = 3,
    /// Interior and fixed.
    FreeFixed = 4,
    /// Two facet vertices.
    FacetFacet = 5,
    /// Facet and segment.
    FacetSegment = 6,
    /// Facet and fixed.
    FacetFixed = 7,
    /// Two segment vertices.
    SegmentSegment = 8,
    /// Segment and fixed.
    SegmentFixed = 9,
    /// Two fixed vertices.
    FixedFixed = 10,
}

impl EdgeCase {
    /// Case of an edge between vertices of kinds `a` and `b`, or `None` if
    /// either is unclassified.
    #[must_use]
    pub fn classify(a: VertexKind, b: VertexKind) -> Option<Self> {
        let (freer, stiffer) = if a >= b { (a, b) } else { (b, a) };
        let case = match (freer, stiffer) {
            (VertexKind::Free, VertexKind::Free) => Self::FreeFree,
            (VertexKind::Free, VertexKind::Facet) => Self::FreeFacet,
            (VertexKind::Free, VertexKind::Segment) => Self::FreeSegment,
            (VertexKind::Free, VertexKind::Fixed) => Self::FreeFixed,
            (VertexKind::Facet, VertexKind::Facet) => Self::FacetFacet,
            (VertexKind::Facet, VertexKind::Segment) => Self::FacetSegment,
            (VertexKind::Facet, VertexKind::Fixed) => Self::FacetFixed,
            (VertexKind::Segment, VertexKind::Segment) => Self::SegmentSegment,
            (VertexKind::Segment, VertexKind::Fixed) => Self::SegmentFixed,
            (VertexKind::Fixed, VertexKind::Fixed) => Self::FixedFixed,
            _ => return None,
        };
        Some(case)
    }

    /// Whether an edge of this case may be contracted at all. Facet and
    /// segment pairs additionally need a boundary edge; segment pairs also
    /// need the edge to run along the segment.
    #[must_use]
    pub const fn may_contract(self) -> bool {
        !matches!(
            self,
            Self::FacetFixed | Self::SegmentFixed | Self::FixedFixed
        )
    }

    /// Whether the edge must lie on the boundary.
    #[must_use]
    pub const fn needs_boundary_edge(self) -> bool {
        matches!(
            self,
            Self::FacetFacet | Self::FacetSegment | Self::SegmentSegment
        )
    }
}

impl fmt::Display for EdgeCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::FreeFree => "free-free",
            Self::FreeFacet => "free-facet",
            Self::FreeSegment => "free-segment",
            Self::FreeFixed => "free-fixed",
            Self::FacetFacet => "facet-facet",
            Self::FacetSegment => "facet-segment",
            Self::FacetFixed => "facet-fixed",
            Self::SegmentSegment => "segment-segment",
            Self::SegmentFixed => "segment-fixed",
            Self::FixedFixed => "fixed-fixed",
        };
        f.write_str(name)
    }
}

/// What an edge contraction attempt did.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ContractionOutcome {
    /// The edge was contracted onto `kept`.
    Contracted {
        /// The surviving endpoint.
        kept: VertexTag,
        /// The endpoint that was removed from the mesh.
        removed: VertexTag,
        /// Endpoint kinds.
        case: EdgeCase,
        /// Worst quality of both stars before.
        min_before: f64,
        /// Worst quality of the merged star after.
        min_after: f64,
    },
    /// The endpoint kinds or the edge geometry forbid contraction.
    Ineligible,
    /// Re-pointing a tet at the surviving vertex would invert it.
    Inverted,
    /// The merged star was not good enough.
    NoImprovement {
        /// Worst quality of both stars before.
        min_before: f64,
        /// Worst quality of the merged star.
        min_after: f64,
    },
    /// The merged star has an edge over the size bound.
    TooLong,
}

impl ContractionOutcome {
    /// Whether the mesh changed.
    #[must_use]
    pub const fn is_contracted(&self) -> bool {
        matches!(self, Self::Contracted { .. })
    }
}

/// Whether the edge `(a, b)` runs exactly along the segment direction of `a`.
#[allow(clippy::float_cmp)]
fn along_segment<C>(mesh: &ImproveMesh<C>, a: VertexTag, b: VertexTag) -> Result<bool, MeshError>
where
    C: TetComplex,
{
    let direction = mesh.position(b)? - mesh.position(a)?;
    let Some(unit) = direction.try_normalize(0.0) else {
        return Ok(false);
    };
    Ok(unit.dot(&mesh.info(a).vec).abs() == 1.0)
}

/// Contracts the edge `(tet[0], tet[1])` of the live tet `tet`.
///
/// Mesh changes are undone unless the outcome is
/// [`ContractionOutcome::Contracted`]. With `require_improve`, the worst
/// quality over both stars must rise by [`MIN_CONTRACT_IMPROVEMENT`];
/// otherwise it need only reach [`MIN_CONTRACT_QUALITY`].
///
/// # Errors
///
/// Returns an [`ImproveError`] if the ring walk or a journaled mutation finds
/// the complex inconsistent.
pub fn edge_contract<C>(
    mesh: &mut ImproveMesh<C>,
    config: &ImproveConfig,
    tet: &Tet,
    require_improve: bool,
    stats: &mut PassStats,
) -> Result<ContractionOutcome, ImproveError>
where
    C: TetComplex,
{
    let [v1, v2, v3, v4] = *tet;
    let (k1, k2) = (mesh.kind(v1), mesh.kind(v2));
    let Some(case) = EdgeCase::classify(k1, k2) else {
        return Ok(ContractionOutcome::Ineligible);
    };
    if !case.may_contract() {
        return Ok(ContractionOutcome::Ineligible);
    }
    let ring = mesh.complex().edge_ring(tet)?;
    if case.needs_boundary_edge() && !ring.is_boundary() {
        return Ok(ContractionOutcome::Ineligible);
    }
    if case == EdgeCase::SegmentSegment && !along_segment(mesh, v1, v2)? {
        return Ok(ContractionOutcome::Ineligible);
    }

    let [kept, removed, _, _] = if k2 < k1 {
        [v2, v1, v4, v3]
    } else {
        [v1, v2, v3, v4]
    };
    let oracle = config.oracle();
    let kept_star = mesh.star(kept);
    let removed_star = mesh.star(removed);
    let mut min_before = f64::INFINITY;
    for star_tet in kept_star.tets.iter().chain(&removed_star.tets) {
        min_before = min_before.min(mesh.quality(star_tet, &oracle)?);
    }

    let checkpoint = mesh.checkpoint();
    for ring_tet in ring.tets() {
        mesh.delete_tet(ring_tet)?;
    }
    let mut replacements = Vec::with_capacity(removed_star.tets.len());
    for star_tet in &removed_star.tets {
        if !mesh.tet_exists(star_tet) {
            continue;
        }
        let Some([_, a, b, c]) = rotate_to_front(star_tet, removed) else {
            continue;
        };
        let replacement = [kept, a, b, c];
        let inverted = if mesh.is_anisotropic()
            && mesh.physical_quality(&replacement, &oracle)? <= MIN_SIZE_TET_QUALITY
        {
            true
        } else {
            mesh.quality(&replacement, &oracle)? <= MIN_TET_QUALITY
        };
        if inverted {
            tracing::trace!(?kept, ?removed, "contraction would invert a tet");
            mesh.revert_to(checkpoint)?;
            stats.contraction.by_case.record(case as usize, false);
            return Ok(ContractionOutcome::Inverted);
        }
        mesh.delete_tet(*star_tet)?;
        replacements.push(replacement);
    }
    if replacements.is_empty() {
        mesh.revert_to(checkpoint)?;
        return Ok(ContractionOutcome::Ineligible);
    }
    for replacement in replacements {
        mesh.insert_tet(replacement)?;
    }

    let merged = mesh.star(kept);
    let min_after = match optimize_vertex(mesh, config, kept, &merged, &mut stats.smoothing)? {
        Some(smoothed) => smoothed,
        None => {
            let mut worst = f64::INFINITY;
            for star_tet in &merged.tets {
                worst = worst.min(mesh.quality(star_tet, &oracle)?);
            }
            worst
        }
    };
    let good_enough = if require_improve {
        min_after - min_before >= MIN_CONTRACT_IMPROVEMENT
    } else {
        min_after >= MIN_CONTRACT_QUALITY
    };
    if !good_enough {
        mesh.revert_to(checkpoint)?;
        stats.contraction.by_case.record(case as usize, false);
        return Ok(ContractionOutcome::NoImprovement {
            min_before,
            min_after,
        });
    }

    if config.sizing && config.target_edge_length > 0.0 {
        let limit = config.target_edge_length * config.longer_factor * SIZE_SAFETY_FACTOR;
        for star_tet in &mesh.star(kept).tets {
            for i in 0..3 {
                for j in (i + 1)..4 {
                    if mesh.edge_length(star_tet[i], star_tet[j])? > limit {
                        mesh.revert_to(checkpoint)?;
                        stats.contraction.too_long += 1;
                        stats.contraction.by_case.record(case as usize, false);
                        return Ok(ContractionOutcome::TooLong);
                    }
                }
            }
        }
    }

    stats.contraction.by_case.record(case as usize, true);
    tracing::debug!(
        ?kept,
        ?removed,
        %case,
        ring = ring.tet_count(),
        before = min_before,
        after = min_after,
        "contracted edge"
    );
    Ok(ContractionOutcome::Contracted {
        kept,
        removed,
        case,
        min_before,
        min_after,
    })
}

/// Tries to contract an edge of `tet`, each edge in both directions.
///
/// On success the merged star is pushed on `output`. With `just_first_edge`
/// only the edge `(tet[0], tet[1])` is tried.
///
/// # Errors
///
/// Returns an [`ImproveError`] if the complex is found inconsistent.
pub fn try_edge_contract<C>(
    mesh: &mut ImproveMesh<C>,
    config: &ImproveConfig,
    tet: &Tet,
    require_improve: bool,
    just_first_edge: bool,
    output: Option<&mut TetStack>,
    stats: &mut PassStats,
) -> Result<bool, ImproveError>
where
    C: TetComplex,
{
    if !mesh.tet_exists(tet) {
        return Ok(false);
    }
    for i in 0..3 {
        for j in (i + 1)..4 {
            let forward = edge_first(tet, i, j);
            let mut outcome = edge_contract(mesh, config, &forward, require_improve, stats)?;
            if !outcome.is_contracted() {
                let reverse = [forward[1], forward[0], forward[3], forward[2]];
                outcome = edge_contract(mesh, config, &reverse, require_improve, stats)?;
            }
            if let ContractionOutcome::Contracted { kept, .. } = outcome {
                if let Some(output) = output {
                    let oracle = config.oracle();
                    for star_tet in mesh.star(kept).tets {
                        let quality = mesh.quality(&star_tet, &oracle)?;
                        output.push_unique(star_tet, quality);
                    }
                }
                return Ok(true);
            }
            if just_first_edge {
                return Ok(false);
            }
        }
    }
    Ok(false)
}

fn run_contract_pass<C>(
    mesh: &mut ImproveMesh<C>,
    config: &ImproveConfig,
    stack: &TetStack,
    mut output: Option<&mut TetStack>,
    kind: PassKind,
    just_first_edge: bool,
) -> Result<PassStats, ImproveError>
where
    C: TetComplex,
{
    let oracle = config.oracle();
    let mut stats = PassStats::new(kind);
    let local = output.is_some();
    let before = if local {
        stack_quality(mesh, &oracle, stack)?
    } else {
        mesh_quality(mesh, &oracle)?
    };
    stats.min_before = before.min;
    if let Some(output) = output.as_deref_mut() {
        output.clear();
    }
    if !config.edge_contraction {
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
    let mut contracted = 0_usize;
    while let Some(entry) = work.pop() {
        let success = try_edge_contract(
            mesh,
            config,
            &entry.tet,
            true,
            just_first_edge,
            Some(&mut produced),
            &mut stats,
        )?;
        if success {
            contracted += 1;
        } else if mesh.tet_exists(&entry.tet) {
            produced.push_unique(entry.tet, entry.quality);
        }
    }

    let after = if local {
        stack_quality(mesh, &oracle, &produced)?
    } else {
        mesh_quality(mesh, &oracle)?
    };
    let rejected = if local {
        let dynamic_success = config.dynamic_improvement
            && local_mean_improve(
                &before.thresholded_means,
                &after.thresholded_means,
                DYNAMIC_MEAN_IMPROVEMENT,
            )
            && after.min >= before.min;
        (after.min < before.min || contracted == 0) && !dynamic_success
    } else {
        after.min < before.min
    };

    if rejected {
        tracing::debug!(
            before = before.min,
            after = after.min,
            contracted,
            "contraction pass did not improve; rolling back"
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
        %kind,
        contracted,
        min_before = stats.min_before,
        min_after = stats.min_after,
        "contraction pass done"
    );
    Ok(stats)
}

/// One contraction pass over `stack`, trying every edge of each tet.
///
/// Local (with `output`) and global passes are accepted like
/// [`topo_pass`](crate::core::algorithms::topological::topo_pass).
///
/// # Errors
///
/// Returns an [`ImproveError`] if the complex is found inconsistent.
pub fn contract_pass<C>(
    mesh: &mut ImproveMesh<C>,
    config: &ImproveConfig,
    stack: &TetStack,
    output: Option<&mut TetStack>,
) -> Result<PassStats, ImproveError>
where
    C: TetComplex,
{
    run_contract_pass(mesh, config, stack, output, PassKind::Contract, false)
}

/// Tries to contract every edge of the mesh once.
///
/// # Errors
///
/// Returns an [`ImproveError`] if the complex is found inconsistent.
pub fn contract_all_pass<C>(
    mesh: &mut ImproveMesh<C>,
    config: &ImproveConfig,
) -> Result<PassStats, ImproveError>
where
    C: TetComplex,
{
    let stack = fill_by_edges(mesh)?;
    run_contract_pass(mesh, config, &stack, None, PassKind::ContractAll, true)
}

/// Global contraction pass over the worst tets.
///
/// Normally every tet is attacked. In desperate mode only tets below a
/// threshold just above the current worst are.
///
/// # Errors
///
/// Returns an [`ImproveError`] if the complex is found inconsistent.
pub fn contract_worst<C>(
    mesh: &mut ImproveMesh<C>,
    config: &ImproveConfig,
    desperate: bool,
) -> Result<PassStats, ImproveError>
where
    C: TetComplex,
{
    let oracle = config.oracle();
    let stack = if desperate {
        let worst = mesh_quality(mesh, &oracle)?.min;
        fill_by_quality(mesh, &oracle, config.desperate_threshold(worst))?
    } else {
        fill_by_percent(mesh, &oracle, 1.0)?
    };
    run_contract_pass(mesh, config, &stack, None, PassKind::Contract, false)
}

// =============================================================================
// TESTS
// =============================================================================
