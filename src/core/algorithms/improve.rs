//! Static improvement schedule.
//!
//! [`improve_mesh`] drives the passes of the other modules over a whole mesh:
//! one smoothing, topological and contraction pass up front, then rounds of
//! smoothing, falling back to topological improvement and then to
//! contraction plus insertion whenever the cheaper pass stalls. A round
//! succeeds if it raises the worst quality or one of the thresholded means.
//! Improvement stops after [`MAX_STALLED_ROUNDS`] failed rounds in a row, or
//! once every dihedral angle lies inside the configured goal.

use thiserror::Error;

use crate::core::algorithms::contraction::{contract_all_pass, contract_worst};
use crate::core::algorithms::flips::FlipError;
use crate::core::algorithms::insertion::{CavityError, worst_tet_attack};
use crate::core::algorithms::smoothing::smooth_pass;
use crate::core::algorithms::topological::topo_pass;
use crate::core::boundary::RingError;
use crate::core::collections::{FastHashSet, fast_hash_set_with_capacity};
use crate::core::complex::TetComplex;
use crate::core::config::ImproveConfig;
use crate::core::mesh::{ImproveMesh, MeshError};
use crate::core::stats::{ImproveStats, PassKind, PassStats, QualitySummary};
use crate::core::worklist::{fill_by_quality, mesh_quality};
use crate::geometry::quality::{NUM_MEAN_THRESHOLDS, extreme_dihedral_angles};

/// Rounds without improvement before the schedule gives up.
pub const MAX_STALLED_ROUNDS: usize = 3;
/// Desperate insertion passes allowed per run.
pub const MAX_DESPERATE_PASSES: usize = 3;
/// A pass raises the worst quality only if it gains more than this.
pub const MIN_MIN_IMPROVEMENT: f64 = 1.0e-15;

/// Fatal errors of the improvement engine.
///
/// Every variant means the complex or a search structure broke an invariant;
/// an operation that merely fails to improve the mesh is rolled back and
/// reported through its return value instead.
#[derive(Clone, Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum ImproveError {
    /// A journaled mutation or its inversion failed.
    #[error(transparent)]
    Mesh(#[from] MeshError),

    /// An edge ring walk failed.
    #[error(transparent)]
    Ring(#[from] RingError),

    /// A flip did not match the complex.
    #[error(transparent)]
    Flip(#[from] FlipError),

    /// A cavity DAG was inconsistent.
    #[error(transparent)]
    Cavity(#[from] CavityError),

    /// The input mesh has an inverted or degenerate tet.
    #[error("Input mesh has a tet of non-positive quality {quality}")]
    InvertedInput {
        /// Worst quality of the input.
        quality: f64,
    },
}

/// Raises `best` to `new` wherever `new` is larger and reports whether any
/// entry rose by more than `threshold`.
pub fn mean_improve(
    best: &mut [f64; NUM_MEAN_THRESHOLDS],
    new: &[f64; NUM_MEAN_THRESHOLDS],
    threshold: f64,
) -> bool {
    let mut improved = false;
    for (best, &new) in best.iter_mut().zip(new) {
        if new > *best {
            improved |= new - *best > threshold;
            *best = new;
        }
    }
    improved
}

/// Smallest and largest dihedral angle over the mesh, in degrees.
///
/// # Errors
///
/// Returns [`MeshError::MissingVertex`] if a tet references an unknown vertex.
pub fn mesh_extreme_angles<C>(mesh: &ImproveMesh<C>) -> Result<(f64, f64), MeshError>
where
    C: TetComplex,
{
    let mut smallest = f64::INFINITY;
    let mut largest = 0.0_f64;
    for tet in mesh.tets() {
        let (min, max) = extreme_dihedral_angles(&mesh.tet_points(&tet)?);
        smallest = smallest.min(min);
        largest = largest.max(max);
    }
    Ok((smallest, largest))
}

/// Mean length of the edges of the mesh, each counted once.
///
/// # Errors
///
/// Returns [`MeshError::MissingVertex`] if a tet references an unknown vertex.
pub fn mean_edge_length<C>(mesh: &ImproveMesh<C>) -> Result<f64, MeshError>
where
    C: TetComplex,
{
    let tets = mesh.tets();
    let mut seen: FastHashSet<[_; 2]> = fast_hash_set_with_capacity(tets.len() * 2);
    let mut total = 0.0;
    for tet in &tets {
        for i in 0..3 {
            for j in (i + 1)..4 {
                let edge = if tet[i] < tet[j] {
                    [tet[i], tet[j]]
                } else {
                    [tet[j], tet[i]]
                };
                if seen.insert(edge) {
                    total += mesh.edge_length(edge[0], edge[1])?;
                }
            }
        }
    }
    if seen.is_empty() {
        Ok(0.0)
    } else {
        #[allow(clippy::cast_precision_loss)]
        Ok(total / seen.len() as f64)
    }
}

/// Whether a pass raised the worst quality or a thresholded mean.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct PassVerdict {
    min_success: bool,
    mean_success: bool,
    reached_goal: bool,
}

impl PassVerdict {
    const fn succeeded(self) -> bool {
        self.min_success || self.mean_success
    }
}

struct Schedule<'a, C>
where
    C: TetComplex,
{
    mesh: &'a mut ImproveMesh<C>,
    config: ImproveConfig,
    best_means: [f64; NUM_MEAN_THRESHOLDS],
    stats: ImproveStats,
}

impl<C> Schedule<'_, C>
where
    C: TetComplex,
{
    fn run(&mut self, kind: PassKind) -> Result<PassVerdict, ImproveError> {
        let oracle = self.config.oracle();
        let before = mesh_quality(self.mesh, &oracle)?;
        let pass: PassStats = match kind {
            PassKind::Smooth => {
                let stack = fill_by_quality(self.mesh, &oracle, f64::INFINITY)?;
                smooth_pass(self.mesh, &self.config, &stack, None)?
            }
            PassKind::Topological => {
                let stack = fill_by_quality(self.mesh, &oracle, f64::INFINITY)?;
                topo_pass(self.mesh, &self.config, &stack, None)?
            }
            PassKind::ContractAll => contract_all_pass(self.mesh, &self.config)?,
            PassKind::Contract => contract_worst(self.mesh, &self.config, true)?,
            PassKind::Insert => worst_tet_attack(self.mesh, &self.config, false)?,
            PassKind::Desperate => worst_tet_attack(self.mesh, &self.config, true)?,
        };
        let after = mesh_quality(self.mesh, &oracle)?;

        let threshold = if kind.is_insertion() {
            self.config.min_insertion_improvement
        } else {
            self.config.min_step_improvement
        };
        let mut verdict = PassVerdict {
            min_success: after.min - before.min >= MIN_MIN_IMPROVEMENT,
            mean_success: mean_improve(&mut self.best_means, &after.thresholded_means, threshold),
            reached_goal: false,
        };
        tracing::info!(
            pass = self.stats.passes.len() + 1,
            %kind,
            tets = after.tet_count,
            before = before.min,
            after = after.min,
            min_success = verdict.min_success,
            mean_success = verdict.mean_success,
            "improvement pass"
        );
        self.stats.record(pass);
        self.stats.last = after;

        let goal_min = self.config.goal_angle_min.to_radians().sin();
        let goal_max = self.config.goal_angle_max.to_radians().sin();
        if after.min > goal_min || after.min > goal_max {
            let (smallest, largest) = mesh_extreme_angles(self.mesh)?;
            if smallest > self.config.goal_angle_min && largest < self.config.goal_angle_max {
                tracing::info!(smallest, largest, "goal angles reached");
                verdict.reached_goal = true;
                self.stats.reached_goal = true;
            }
        }
        Ok(verdict)
    }
}

/// Improves `mesh` in place until no pass helps any more.
///
/// Vertices are classified and, with quadrics enabled, their surface
/// quadrics collected before the first pass. With sizing on and no target
/// edge length, the mean edge length of the input becomes the target.
///
/// # Errors
///
/// Returns [`ImproveError::InvertedInput`] if the input has a tet of
/// non-positive quality, or any fatal error raised by a pass.
///
/// # Examples
///
/// ```rust
/// use nalgebra::Point3;
/// use tetimprove::core::algorithms::improve::improve_mesh;
/// use tetimprove::core::config::ImproveConfig;
/// use tetimprove::core::mesh::ImproveMesh;
///
/// let points = [
///     Point3::new(0.0, 0.0, 0.0),
///     Point3::new(0.0, 1.0, 0.0),
///     Point3::new(1.0, 0.0, 0.0),
///     Point3::new(0.0, 0.0, 1.0),
/// ];
/// let (mut mesh, _) = ImproveMesh::from_tets(&points, &[[0, 1, 2, 3]]).unwrap();
/// let stats = improve_mesh(&mut mesh, &ImproveConfig::default()).unwrap();
/// assert!(stats.last.min >= stats.initial.min);
/// ```
pub fn improve_mesh<C>(
    mesh: &mut ImproveMesh<C>,
    config: &ImproveConfig,
) -> Result<ImproveStats, ImproveError>
where
    C: TetComplex,
{
    let mut config = config.clone();
    if config.sizing && config.target_edge_length <= 0.0 {
        config.target_edge_length = mean_edge_length(mesh)?;
        tracing::debug!(target = config.target_edge_length, "using mean edge length as target");
    }

    let kinds = mesh.classify_vertices();
    tracing::debug!(?kinds, "classified vertices");
    if config.use_quadrics {
        let quadrics = mesh.collect_quadrics()?;
        tracing::debug!(quadrics, "collected surface quadrics");
    }

    let initial: QualitySummary = mesh_quality(mesh, &config.oracle())?;
    if initial.tet_count > 0 && initial.min <= 0.0 {
        return Err(ImproveError::InvertedInput {
            quality: initial.min,
        });
    }
    tracing::info!(%initial, "improving mesh");

    let mut best_means = [0.0; NUM_MEAN_THRESHOLDS];
    mean_improve(&mut best_means, &initial.thresholded_means, config.min_step_improvement);
    let skip_contract_all = mesh.is_anisotropic();
    let mut schedule = Schedule {
        mesh,
        config,
        best_means,
        stats: ImproveStats::new(initial),
    };

    let mut stop = schedule.run(PassKind::Smooth)?.reached_goal;
    stop = schedule.run(PassKind::Topological)?.reached_goal || stop;
    if !skip_contract_all {
        stop = schedule.run(PassKind::ContractAll)?.reached_goal || stop;
    }

    let mut stalled = 0;
    let mut desperate = 0;
    while !stop && stalled < MAX_STALLED_ROUNDS {
        let mut verdict = schedule.run(PassKind::Smooth)?;
        if verdict.reached_goal {
            break;
        }
        if !verdict.succeeded() {
            verdict = schedule.run(PassKind::Topological)?;
            if verdict.reached_goal {
                break;
            }
            if !verdict.succeeded() && schedule.config.any_insertion() {
                let mut contracted_to_goal = false;
                if schedule.config.edge_contraction {
                    contracted_to_goal = schedule.run(PassKind::Contract)?.reached_goal;
                }
                let kind = if stalled == 1 && desperate < MAX_DESPERATE_PASSES {
                    desperate += 1;
                    PassKind::Desperate
                } else {
                    PassKind::Insert
                };
                verdict = schedule.run(kind)?;
                if verdict.reached_goal || contracted_to_goal {
                    break;
                }
            }
        }
        if verdict.succeeded() {
            stalled = 0;
        } else {
            stalled += 1;
            tracing::debug!(stalled, "round did not improve");
        }
    }

    let Schedule {
        mesh,
        config,
        mut stats,
        ..
    } = schedule;
    stats.last = mesh_quality(mesh, &config.oracle())?;
    stats.totals.min_after = stats.last.min;
    stats.totals.accepted = stats.last.min >= stats.initial.min;
    tracing::info!(
        initial = %stats.initial,
        last = %stats.last,
        passes = stats.passes.len(),
        inserted = stats.vertices_inserted,
        "improvement finished"
    );
    Ok(stats)
}

// =============================================================================
// TESTS
// =============================================================================
